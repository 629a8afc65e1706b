use axum::http::HeaderMap;
use axum::http::header::ACCEPT_LANGUAGE;

/// Locales the API can render messages in. Anything we don't recognise falls
/// back to English.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    En,
    Zh,
}

/// Picks a locale from the Accept-Language header, honouring the listed order.
/// Only the primary language subtag matters ("zh-CN" and "zh-TW" both resolve
/// to Zh).
pub fn resolve(headers: &HeaderMap) -> Locale {
    let Some(value) = headers.get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok()) else {
        return Locale::En;
    };

    for entry in value.split(',') {
        // strip any ;q=... weight, then the region subtag
        let tag = entry.split(';').next().unwrap_or("").trim();
        let language = tag.split('-').next().unwrap_or("");
        match language.to_ascii_lowercase().as_str() {
            "zh" => return Locale::Zh,
            "en" => return Locale::En,
            _ => continue,
        }
    }

    Locale::En
}

/// Static message catalog. Unknown keys log and render a placeholder instead
/// of panicking.
pub fn message(locale: Locale, key: &str) -> &'static str {
    match (locale, key) {
        (Locale::En, "hello.world") => "Hello, World!",
        (Locale::Zh, "hello.world") => "你好，世界！",
        (Locale::En, "onboarding.completed") => "Onboarding complete",
        (Locale::Zh, "onboarding.completed") => "引导流程已完成",
        _ => {
            tracing::warn!("missing i18n message for key '{}'", key);
            "?"
        }
    }
}
