use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::auth::provider::ExchangeError;

/// A backing store (session registry, state store, user directory) could not
/// be reached. Deliberately separate from authentication failures: an outage
/// must surface as a 5xx, never as "not authenticated".
#[derive(Debug, thiserror::Error)]
#[error("backing store unavailable: {0}")]
pub struct StoreError(pub String);

/// Request-level error taxonomy. Gates and handlers return these and the
/// pipeline short-circuits with the mapped status code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing/invalid/expired credential, revoked session, or a
    /// token/session user mismatch.
    #[error("not authenticated")]
    Unauthenticated,

    /// Authenticated, but onboarding is still in progress.
    #[error("onboarding required")]
    OnboardingIncomplete,

    /// Authenticated, but not allowed (admin allow-list miss).
    #[error("forbidden")]
    Forbidden,

    /// OAuth state token was missing, expired, or already consumed.
    #[error("invalid or expired OAuth state")]
    InvalidState,

    /// No provider registered under this name.
    #[error("unknown OAuth provider: {0}")]
    UnknownProvider(String),

    /// The provider's userinfo response carried no email address.
    #[error("provider profile missing email")]
    MissingEmail,

    /// The code exchange or userinfo fetch against the provider failed.
    #[error("provider exchange failed: {0}")]
    Upstream(#[from] ExchangeError),

    /// A backing store is unreachable.
    #[error(transparent)]
    Dependency(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, description) = match &self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated", None),
            Self::OnboardingIncomplete => (
                StatusCode::FORBIDDEN,
                "onboarding_required",
                Some("complete onboarding before accessing this resource".to_string()),
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", None),
            Self::InvalidState => (
                StatusCode::UNAUTHORIZED,
                "invalid_state",
                Some("invalid or expired OAuth state".to_string()),
            ),
            Self::UnknownProvider(name) => (
                StatusCode::NOT_FOUND,
                "unknown_provider",
                Some(format!("no OAuth provider registered as '{name}'")),
            ),
            Self::MissingEmail => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                Some("provider did not supply an email address".to_string()),
            ),
            Self::Upstream(e) => {
                // log the detail, don't leak it to the client
                tracing::error!("OAuth provider exchange failed: {}", e);
                (StatusCode::BAD_GATEWAY, "upstream_error", None)
            }
            Self::Dependency(e) => {
                tracing::error!("backing store unavailable: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", None)
            }
            Self::Internal(e) => {
                tracing::error!("internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
            }
        };

        let body = ErrorBody {
            error,
            error_description: description,
        };
        let mut response = (status, Json(body)).into_response();

        if matches!(self, Self::OnboardingIncomplete) {
            response
                .headers_mut()
                .insert("x-error-code", HeaderValue::from_static("ONBOARDING_REQUIRED"));
        }

        response
    }
}
