use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use std::collections::HashMap;

/// Static description of one OAuth2 provider: where to send the user, where
/// to exchange the code, and where to fetch the profile.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_uri: String,
    pub token_uri: String,
    pub userinfo_uri: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    pub fn google(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            name: "google".to_string(),
            client_id,
            client_secret,
            authorization_uri: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_uri: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            redirect_uri,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }
    }

    pub fn github(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            name: "github".to_string(),
            client_id,
            client_secret,
            authorization_uri: "https://github.com/login/oauth/authorize".to_string(),
            token_uri: "https://github.com/login/oauth/access_token".to_string(),
            userinfo_uri: "https://api.github.com/user".to_string(),
            redirect_uri,
            scopes: vec!["read:user".to_string(), "user:email".to_string()],
        }
    }
}

/// Providers registered at startup, looked up by name on every login.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(configs: impl IntoIterator<Item = ProviderConfig>) -> Self {
        Self {
            providers: configs
                .into_iter()
                .map(|config| (config.name.clone(), config))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// The verified identity a provider hands back after a code exchange.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub provider_user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("HTTP error talking to provider: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected the exchange: {0}")]
    Provider(String),
}

/// Drives the provider side of the authorization-code flow.
#[async_trait]
pub trait ProviderExchange: Send + Sync {
    /// Exchanges the authorization code for a provider access token, then
    /// fetches the userinfo profile with it.
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
    ) -> Result<ProviderProfile, ExchangeError>;
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
}

pub struct HttpProviderExchange {
    client: Client,
}

impl Default for HttpProviderExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProviderExchange {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ProviderExchange for HttpProviderExchange {
    async fn exchange(
        &self,
        provider: &ProviderConfig,
        code: &str,
    ) -> Result<ProviderProfile, ExchangeError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
            ("redirect_uri", provider.redirect_uri.as_str()),
        ];

        // github answers with urlencoded unless told otherwise
        let response = self
            .client
            .post(&provider.token_uri)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(
                "token endpoint for '{}' returned {}",
                provider.name,
                status
            );
            return Err(ExchangeError::Provider(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenEndpointResponse = response.json().await?;

        let response = self
            .client
            .get(&provider.userinfo_uri)
            .bearer_auth(&token.access_token)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, "mealgate")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ExchangeError::Provider(format!(
                "userinfo endpoint returned {status}"
            )));
        }

        let userinfo: serde_json::Value = response.json().await?;
        profile_from_userinfo(&userinfo)
    }
}

/// Pulls the stable user identifier and email out of a userinfo payload.
/// OIDC providers (google) use "sub"; github uses a numeric "id".
fn profile_from_userinfo(userinfo: &serde_json::Value) -> Result<ProviderProfile, ExchangeError> {
    let provider_user_id = match userinfo.get("sub") {
        Some(sub) if sub.is_string() => sub.as_str().map(String::from),
        _ => userinfo.get("id").map(|id| match id.as_str() {
            Some(s) => s.to_string(),
            None => id.to_string(),
        }),
    };

    let Some(provider_user_id) = provider_user_id else {
        return Err(ExchangeError::Provider(
            "userinfo payload has no 'sub' or 'id' field".to_string(),
        ));
    };

    let email = userinfo
        .get("email")
        .and_then(|e| e.as_str())
        .map(String::from);

    Ok(ProviderProfile {
        provider_user_id,
        email,
    })
}
