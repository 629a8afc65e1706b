mod handlers;
mod middleware;
pub mod provider;
pub mod session;
pub mod state;
pub mod token;

pub use handlers::{auth_uri_handler, login_handler, revoke_sessions_handler};
pub use middleware::{Principal, admin_gate, authentication_gate, onboarding_gate};
pub use session::{InMemorySessionRegistry, SessionRegistry};
pub use state::{InMemoryStateStore, StateStore};
pub use token::{Claims, Role, TokenError, TokenService};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::error::ApiError;
use crate::users::{AdminDirectory, UserDirectory};
use provider::{ProviderExchange, ProviderRegistry};

/// Configuration for the authentication system
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
}

/// Both halves of a successful login: the signed credential and an opaque
/// refresh token. The refresh token is returned but not tracked or validated
/// anywhere in this service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Everything a client needs to start the authorization-code flow and later
/// hand the state back with the code.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUriResponse {
    pub auth_uri: String,
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// Orchestrates the OAuth login flow and owns the pieces the gates consult:
/// token service, state store, session registry, user and admin directories.
pub struct AuthService {
    tokens: TokenService,
    states: Arc<dyn StateStore>,
    sessions: Arc<dyn SessionRegistry>,
    users: Arc<dyn UserDirectory>,
    admins: Arc<dyn AdminDirectory>,
    exchange: Arc<dyn ProviderExchange>,
    providers: ProviderRegistry,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        states: Arc<dyn StateStore>,
        sessions: Arc<dyn SessionRegistry>,
        users: Arc<dyn UserDirectory>,
        admins: Arc<dyn AdminDirectory>,
        exchange: Arc<dyn ProviderExchange>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            tokens: TokenService::new(&config.jwt_secret, config.token_ttl),
            states,
            sessions,
            users,
            admins,
            exchange,
            providers,
        }
    }

    // Delegate for the authentication gate
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.tokens.verify(token)
    }

    /// Issues a state token and builds the provider's authorization URI with
    /// the standard query parameters.
    pub async fn auth_uri(&self, provider_name: &str) -> Result<AuthUriResponse, ApiError> {
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| ApiError::UnknownProvider(provider_name.to_string()))?;

        let state = self.states.issue().await?;

        let mut auth_uri = Url::parse(&provider.authorization_uri)
            .map_err(|e| ApiError::Internal(format!("bad authorization URI configured: {e}")))?;
        auth_uri
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &provider.client_id)
            .append_pair("scope", &provider.scopes.join(" "))
            .append_pair("state", &state);

        Ok(AuthUriResponse {
            auth_uri: auth_uri.to_string(),
            state,
            client_id: provider.client_id.clone(),
            redirect_uri: provider.redirect_uri.clone(),
            scopes: provider.scopes.clone(),
        })
    }

    /// The login orchestration: consume state, exchange the code, resolve the
    /// local user, mint a credential, register its session.
    pub async fn login(
        &self,
        provider_name: &str,
        code: &str,
        state: &str,
    ) -> Result<TokenPair, ApiError> {
        if !self.states.validate_and_consume(state).await? {
            tracing::warn!("rejected login for '{}': invalid or replayed state", provider_name);
            return Err(ApiError::InvalidState);
        }

        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| ApiError::UnknownProvider(provider_name.to_string()))?;

        let profile = self.exchange.exchange(provider, code).await?;
        let Some(email) = profile.email else {
            return Err(ApiError::MissingEmail);
        };

        let user = self
            .users
            .find_or_create(provider_name, &profile.provider_user_id, &email)
            .await?;

        let role = if self.admins.is_admin(user.id).await? {
            Role::Admin
        } else {
            Role::User
        };

        let minted = self
            .tokens
            .mint(user.id, role)
            .map_err(|e| ApiError::Internal(format!("failed to mint credential: {e}")))?;

        // session TTL matches the credential lifetime exactly
        self.sessions
            .register(&minted.jti, user.id, minted.expires_in)
            .await?;

        tracing::info!("user {} logged in via {}", user.id, provider_name);

        Ok(TokenPair {
            access_token: minted.token,
            refresh_token: Uuid::new_v4().to_string(),
        })
    }
}
