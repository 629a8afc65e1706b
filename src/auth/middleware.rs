use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use super::token::Role;
use crate::error::ApiError;
use crate::server::AppState;

/// The resolved, request-scoped identity after the authentication gate has
/// passed. Constructed exactly once per request, read-only afterwards, and
/// carried in the request extensions for downstream gates and handlers.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub email: String,
    pub onboarding_step: i32,
    /// The credential identifier (jti) backing this request's session.
    pub session_id: String,
    pub role: Role,
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Routes that never require a credential: the login endpoints themselves,
/// public tag lookups, the localized hello, and the health check. Paths
/// outside /api are not ours to gate.
fn requires_authentication(path: &str) -> bool {
    if !path.starts_with("/api/") {
        return false;
    }
    !path.starts_with("/api/auth/") && !path.starts_with("/api/tags/") && path != "/api/hello"
}

/// Onboarding must stay completable: the login and onboarding-submission
/// routes bypass the onboarding gate.
fn exempt_from_onboarding(path: &str) -> bool {
    path.starts_with("/api/auth/") || path.starts_with("/api/onboarding/")
}

/// First gate. Verifies the bearer credential, confirms its session is still
/// live, cross-checks token subject against the session's user, and attaches
/// the Principal. Any authentication failure short-circuits with 401; a store
/// outage propagates as 503 instead.
pub async fn authentication_gate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();
    if !requires_authentication(&path) {
        return Ok(next.run(req).await);
    }

    let bearer = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = bearer else {
        tracing::warn!("missing bearer credential for {}", path);
        return Err(ApiError::Unauthenticated);
    };

    let claims = state.auth.verify_token(token).map_err(|e| {
        tracing::warn!("rejected credential for {}: {}", path, e);
        ApiError::Unauthenticated
    })?;

    let token_user_id = claims.user_id().ok_or(ApiError::Unauthenticated)?;

    // live read of the session registry; absence covers logout, revocation
    // and expiry alike
    let session_user_id = state
        .sessions
        .resolve_user(&claims.jti)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    if token_user_id != session_user_id {
        tracing::warn!(
            "token subject {} does not own session {}",
            token_user_id,
            claims.jti
        );
        return Err(ApiError::Unauthenticated);
    }

    let user = state
        .users
        .find_by_id(session_user_id)
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    req.extensions_mut().insert(Principal {
        user_id: user.id,
        email: user.email,
        onboarding_step: user.onboarding_step,
        session_id: claims.jti,
        role: claims.role,
    });

    Ok(next.run(req).await)
}

/// Second gate. Blocks general resources until onboarding is complete.
/// Unauthenticated requests pass through untouched; the authentication gate
/// already rejected them wherever a credential was required.
pub async fn onboarding_gate(req: Request, next: Next) -> Result<Response, ApiError> {
    if exempt_from_onboarding(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    if let Some(principal) = req.extensions().get::<Principal>() {
        if principal.onboarding_step > 0 {
            tracing::debug!(
                "user {} blocked at onboarding step {}",
                principal.user_id,
                principal.onboarding_step
            );
            return Err(ApiError::OnboardingIncomplete);
        }
    }

    Ok(next.run(req).await)
}

/// Third gate, applied to admin routes only. Checks the live allow-list, not
/// the role claim baked into the token, so a demotion takes effect without
/// waiting for the credential to expire.
pub async fn admin_gate(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(principal) = req.extensions().get::<Principal>() else {
        // only reachable if the pipeline was assembled out of order
        return Err(ApiError::Unauthenticated);
    };

    if !state.admins.is_admin(principal.user_id).await? {
        tracing::warn!(
            "user {} denied access to admin route {}",
            principal.user_id,
            req.uri().path()
        );
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(req).await)
}
