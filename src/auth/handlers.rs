use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::middleware::Principal;
use super::{AuthUriResponse, TokenPair};
use crate::error::ApiError;
use crate::server::AppState;

/// Body of POST /api/auth/{provider}: the callback parameters the client
/// received from the provider redirect.
#[derive(Debug, Deserialize)]
pub struct OAuthLoginRequest {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRevokeRequest {
    pub user_id: i64,
}

/// GET /api/auth/{provider} - hands the client a state token and the
/// provider's authorization URI.
pub async fn auth_uri_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<AuthUriResponse>, ApiError> {
    let response = state.auth.auth_uri(&provider).await?;
    Ok(Json(response))
}

/// POST /api/auth/{provider} - completes the code exchange and returns the
/// minted credential pair.
pub async fn login_handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(request): Json<OAuthLoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let tokens = state.auth.login(&provider, &request.code, &request.state).await?;
    Ok(Json(tokens))
}

/// POST /api/admin/sessions/revoke - bulk-revokes every session of the named
/// user. The admin gate has already vetted the caller.
pub async fn revoke_sessions_handler(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<AdminRevokeRequest>,
) -> Result<StatusCode, ApiError> {
    state.sessions.revoke_all(request.user_id).await?;
    tracing::info!(
        "admin {} revoked all sessions for user {}",
        principal.user_id,
        request.user_id
    );
    Ok(StatusCode::OK)
}
