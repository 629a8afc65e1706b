use axum::extract::State;
use axum::http::HeaderMap;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor};
use tower_http::cors::CorsLayer;

use crate::auth::{
    AuthService, Principal, SessionRegistry, admin_gate, auth_uri_handler, authentication_gate,
    login_handler, onboarding_gate, revoke_sessions_handler,
};
use crate::error::ApiError;
use crate::i18n;
use crate::users::{AdminDirectory, UserDirectory, UserProfile};

/// Shared state for all handlers and gates.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub users: Arc<dyn UserDirectory>,
    pub admins: Arc<dyn AdminDirectory>,
}

/// Assembles the full application router. The gate ordering
/// (authentication, then onboarding, then per-route admin) lives here and
/// only here; it is a correctness invariant, not a configuration choice.
pub fn router(state: AppState) -> Router {
    // Stricter rate limiting for the auth endpoints: 5 requests per second,
    // burst of 10. SmartIpKeyExtractor checks x-forwarded-for and friends
    // before falling back to the peer ip.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(5)
            .burst_size(10)
            .finish()
            .expect("Failed to build auth rate limiter config"),
    );

    let auth_routes = Router::new()
        .route(
            "/api/auth/{provider}",
            get(auth_uri_handler).post(login_handler),
        )
        .layer(GovernorLayer::new(auth_governor_conf));

    let admin_routes = Router::new()
        .route("/api/admin/sessions/revoke", post(revoke_sessions_handler))
        .layer(middleware::from_fn_with_state(state.clone(), admin_gate));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/hello", get(hello_handler))
        .route("/api/tags/occupations", get(occupation_tags_handler))
        .route("/api/tags/allergens", get(allergen_tags_handler))
        .route(
            "/api/tags/dietary-preferences",
            get(dietary_preference_tags_handler),
        )
        .route(
            "/api/onboarding/profile",
            get(profile_handler).post(onboarding_profile_handler),
        )
        .route("/api/secure/ping", get(secure_ping_handler))
        .merge(auth_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(onboarding_gate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authentication_gate,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Public, localized via Accept-Language.
async fn hello_handler(headers: HeaderMap) -> &'static str {
    i18n::message(i18n::resolve(&headers), "hello.world")
}

/// Authenticated + onboarded smoke endpoint.
async fn secure_ping_handler(_principal: Principal) -> &'static str {
    "pong"
}

/// Returns the stored profile, empty if nothing has been submitted yet.
async fn profile_handler(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state
        .users
        .find_profile(principal.user_id)
        .await?
        .unwrap_or_default();
    Ok(Json(profile))
}

/// Saves the submitted profile and marks onboarding complete. Reachable while
/// onboarding is still in progress (the onboarding gate exempts this path).
async fn onboarding_profile_handler(
    State(state): State<AppState>,
    principal: Principal,
    Json(profile): Json<UserProfile>,
) -> Result<Json<UserProfile>, ApiError> {
    let saved = state.users.save_profile(principal.user_id, profile).await?;
    state.users.complete_onboarding(principal.user_id).await?;
    tracing::info!("user {} completed onboarding", principal.user_id);
    Ok(Json(saved))
}

#[derive(Debug, Serialize)]
struct Tag {
    id: i64,
    name: &'static str,
}

fn tags(names: &[&'static str]) -> Vec<Tag> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Tag {
            id: i as i64 + 1,
            name,
        })
        .collect()
}

// Public lookup tables for the onboarding UI. A database-backed catalog is a
// drop-in replacement; the auth core only cares that these stay public.

async fn occupation_tags_handler() -> Json<Vec<Tag>> {
    Json(tags(&[
        "Software engineer",
        "Designer",
        "Teacher",
        "Healthcare worker",
        "Student",
        "Other",
    ]))
}

async fn allergen_tags_handler() -> Json<Vec<Tag>> {
    Json(tags(&[
        "Peanuts",
        "Tree nuts",
        "Dairy",
        "Eggs",
        "Shellfish",
        "Soy",
        "Wheat",
    ]))
}

async fn dietary_preference_tags_handler() -> Json<Vec<Tag>> {
    Json(tags(&[
        "Vegetarian",
        "Vegan",
        "Low carb",
        "High protein",
        "Halal",
        "No preference",
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::{
        ExchangeError, ProviderConfig, ProviderExchange, ProviderProfile, ProviderRegistry,
    };
    use crate::auth::token::{Role, TokenService};
    use crate::auth::{AuthConfig, InMemorySessionRegistry, InMemoryStateStore};
    use crate::error::StoreError;
    use crate::users::{InMemoryUserDirectory, StaticAdminDirectory};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    const TEST_SECRET: &str = "test-secret";
    const TEST_TTL: Duration = Duration::from_secs(15 * 60);

    /// Stands in for the provider network calls: the "code" determines the
    /// identity that comes back, so tests can log in as different users.
    struct StubExchange;

    #[async_trait]
    impl ProviderExchange for StubExchange {
        async fn exchange(
            &self,
            _provider: &ProviderConfig,
            code: &str,
        ) -> Result<ProviderProfile, ExchangeError> {
            if code == "exchange-fails" {
                return Err(ExchangeError::Provider("boom".to_string()));
            }
            let email = if code == "no-email" {
                None
            } else {
                Some(format!("{code}@example.com"))
            };
            Ok(ProviderProfile {
                provider_user_id: format!("sub-{code}"),
                email,
            })
        }
    }

    /// A session registry whose backing store is down.
    struct FailingSessions;

    #[async_trait]
    impl SessionRegistry for FailingSessions {
        async fn register(&self, _: &str, _: i64, _: Duration) -> Result<(), StoreError> {
            Err(StoreError("session store down".to_string()))
        }
        async fn is_active(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError("session store down".to_string()))
        }
        async fn resolve_user(&self, _: &str) -> Result<Option<i64>, StoreError> {
            Err(StoreError("session store down".to_string()))
        }
        async fn revoke_all(&self, _: i64) -> Result<(), StoreError> {
            Err(StoreError("session store down".to_string()))
        }
    }

    fn test_state_with_sessions(sessions: Arc<dyn SessionRegistry>) -> AppState {
        let states = Arc::new(InMemoryStateStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        // the first user ever created (id 1) is the admin in these tests
        let admins = Arc::new(StaticAdminDirectory::new([1]));
        let providers = ProviderRegistry::new([ProviderConfig::google(
            "client-id".to_string(),
            "client-secret".to_string(),
            "http://localhost:5173/callback".to_string(),
        )]);

        let auth = Arc::new(AuthService::new(
            AuthConfig {
                jwt_secret: TEST_SECRET.to_string(),
                token_ttl: TEST_TTL,
            },
            states,
            sessions.clone(),
            users.clone(),
            admins.clone(),
            Arc::new(StubExchange),
            providers,
        ));

        AppState {
            auth,
            sessions,
            users,
            admins,
        }
    }

    fn test_state() -> AppState {
        test_state_with_sessions(Arc::new(InMemorySessionRegistry::new()))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap()
    }

    fn get_bearer(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.7")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Runs the full login flow for the given stub code and returns the
    /// access token.
    async fn login(app: &Router, code: &str) -> String {
        let response = app.clone().oneshot(get("/api/auth/google")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let auth_uri = body_json(response).await;
        let state = auth_uri["state"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/google",
                None,
                json!({"code": code, "state": state}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let tokens = body_json(response).await;
        tokens["accessToken"].as_str().unwrap().to_string()
    }

    async fn complete_onboarding(app: &Router, token: &str) {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/onboarding/profile",
                Some(token),
                json!({"nickname": "t", "allergens": ["Peanuts"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_and_hello_are_public() {
        let app = router(test_state());

        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get("/api/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut request = get("/api/hello");
        request
            .headers_mut()
            .insert(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9".parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), "你好，世界！");
    }

    #[tokio::test]
    async fn tag_lookups_are_public() {
        let app = router(test_state());
        let response = app
            .clone()
            .oneshot(get("/api/tags/occupations"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let tags = body_json(response).await;
        assert!(tags.as_array().unwrap().len() > 1);
    }

    #[tokio::test]
    async fn auth_uri_carries_state_and_oauth_params() {
        let app = router(test_state());
        let response = app.clone().oneshot(get("/api/auth/google")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let state = body["state"].as_str().unwrap();
        let uri = body["authUri"].as_str().unwrap();
        assert!(uri.contains("response_type=code"));
        assert!(uri.contains("client_id=client-id"));
        assert!(uri.contains(&format!("state={state}")));
        assert_eq!(body["clientId"], "client-id");
        assert_eq!(body["redirectUri"], "http://localhost:5173/callback");
    }

    #[tokio::test]
    async fn unknown_provider_is_404() {
        let app = router(test_state());
        let response = app.clone().oneshot(get("/api/auth/gitlab")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn login_succeeds_once_per_state_and_rejects_replay() {
        let app = router(test_state());

        let response = app.clone().oneshot(get("/api/auth/google")).await.unwrap();
        let state = body_json(response).await["state"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/google",
                None,
                json!({"code": "c1", "state": state}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let tokens = body_json(response).await;
        assert!(tokens["accessToken"].as_str().is_some());
        assert!(tokens["refreshToken"].as_str().is_some());

        // same state a second time: consumed, so 401
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/google",
                None,
                json!({"code": "c1", "state": state}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_with_unissued_state_is_401() {
        let app = router(test_state());
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/google",
                None,
                json!({"code": "c1", "state": "never-issued"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn provider_failures_surface_as_bad_gateway() {
        let app = router(test_state());

        for code in ["exchange-fails", "no-email"] {
            let response = app.clone().oneshot(get("/api/auth/google")).await.unwrap();
            let state = body_json(response).await["state"]
                .as_str()
                .unwrap()
                .to_string();

            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/auth/google",
                    None,
                    json!({"code": code, "state": state}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "code {code}");
        }
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_and_garbage_credentials() {
        let app = router(test_state());

        let response = app.clone().oneshot(get("/api/secure/ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", "not-a-jwt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_bound_to_another_users_session_is_401() {
        let state = test_state();
        let app = router(state.clone());

        // credential minted for user 1, but its jti is registered to a
        // different user - the gate must refuse the pairing
        let tokens = TokenService::new(TEST_SECRET, TEST_TTL);
        let minted = tokens.mint(1, Role::User).unwrap();
        state
            .sessions
            .register(&minted.jti, 999, TEST_TTL)
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &minted.token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_without_a_registered_session_is_401() {
        let app = router(test_state());

        // signed with the right secret, but never registered in the session
        // registry - covers revoked and never-issued identifiers alike
        let tokens = TokenService::new(TEST_SECRET, TEST_TTL);
        let minted = tokens.mint(1, Role::User).unwrap();

        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &minted.token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn onboarding_gate_blocks_until_profile_is_submitted() {
        let app = router(test_state());
        let token = login(&app, "fresh-user").await;

        // general resource: blocked with the machine-readable error code
        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get("x-error-code").unwrap(),
            "ONBOARDING_REQUIRED"
        );

        // the submission route itself stays reachable
        complete_onboarding(&app, &token).await;

        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn submitted_profile_reads_back() {
        let app = router(test_state());
        let token = login(&app, "dave").await;
        complete_onboarding(&app, &token).await;

        let response = app
            .clone()
            .oneshot(get_bearer("/api/onboarding/profile", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let profile = body_json(response).await;
        assert_eq!(profile["nickname"], "t");
        assert_eq!(profile["allergens"][0], "Peanuts");
    }

    #[tokio::test]
    async fn admin_route_enforces_the_allow_list() {
        let app = router(test_state());

        // user 1 is the configured admin, user 2 is not
        let admin_token = login(&app, "alice").await;
        complete_onboarding(&app, &admin_token).await;
        let user_token = login(&app, "bob").await;
        complete_onboarding(&app, &user_token).await;

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/admin/sessions/revoke",
                Some(&user_token),
                json!({"userId": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/admin/sessions/revoke",
                Some(&admin_token),
                json!({"userId": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // bob's sessions are gone; alice is untouched
        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &user_token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &admin_token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_route_without_credential_is_401() {
        let app = router(test_state());
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/admin/sessions/revoke",
                None,
                json!({"userId": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_store_outage_is_a_dependency_error_not_401() {
        let app = router(test_state_with_sessions(Arc::new(FailingSessions)));

        let tokens = TokenService::new(TEST_SECRET, TEST_TTL);
        let minted = tokens.mint(1, Role::User).unwrap();

        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &minted.token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn repeat_logins_resolve_to_the_same_user() {
        let app = router(test_state());

        let first = login(&app, "carol").await;
        complete_onboarding(&app, &first).await;
        let second = login(&app, "carol").await;

        // the second credential works immediately: onboarding state belongs
        // to the user, not the session
        let response = app
            .clone()
            .oneshot(get_bearer("/api/secure/ping", &second))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
