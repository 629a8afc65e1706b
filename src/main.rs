mod auth;
mod error;
mod i18n;
mod server;
mod users;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::provider::{HttpProviderExchange, ProviderConfig, ProviderRegistry};
use auth::{AuthConfig, AuthService, InMemorySessionRegistry, InMemoryStateStore};
use server::AppState;
use users::{InMemoryUserDirectory, StaticAdminDirectory};

#[derive(Parser, Debug)]
#[command(name = "mealgate")]
#[command(about = "OAuth2 login, revocable sessions and layered request gating for the mealgate API")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "MEALGATE_HOST", default_value = "localhost")]
    host: String,

    /// Port to bind to
    #[arg(short, long, env = "MEALGATE_PORT", default_value = "8080")]
    port: u16,

    /// JWT signing secret (hashed before use, never used raw)
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Access token lifetime in minutes; sessions expire with it
    #[arg(long, env = "TOKEN_TTL_MINUTES", default_value = "15")]
    token_ttl_minutes: u64,

    /// Comma-separated user ids on the admin allow-list
    #[arg(long, env = "ADMIN_USER_IDS", default_value = "")]
    admin_user_ids: String,

    /// Google OAuth client ID
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    google_client_id: Option<String>,

    /// Google OAuth client secret
    #[arg(long, env = "GOOGLE_CLIENT_SECRET")]
    google_client_secret: Option<String>,

    /// GitHub OAuth client ID
    #[arg(long, env = "GITHUB_CLIENT_ID")]
    github_client_id: Option<String>,

    /// GitHub OAuth client secret
    #[arg(long, env = "GITHUB_CLIENT_SECRET")]
    github_client_secret: Option<String>,

    /// Redirect URI registered with the providers (the frontend callback)
    #[arg(
        long,
        env = "OAUTH_REDIRECT_URI",
        default_value = "http://localhost:5173/auth/callback"
    )]
    oauth_redirect_uri: String,
}

fn provider_registry(args: &Args) -> ProviderRegistry {
    let mut configs = Vec::new();

    if let (Some(id), Some(secret)) = (&args.google_client_id, &args.google_client_secret) {
        configs.push(ProviderConfig::google(
            id.clone(),
            secret.clone(),
            args.oauth_redirect_uri.clone(),
        ));
    }
    if let (Some(id), Some(secret)) = (&args.github_client_id, &args.github_client_secret) {
        configs.push(ProviderConfig::github(
            id.clone(),
            secret.clone(),
            args.oauth_redirect_uri.clone(),
        ));
    }

    ProviderRegistry::new(configs)
}

fn admin_ids(args: &Args) -> Result<Vec<i64>> {
    args.admin_user_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("invalid admin user id '{s}'"))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mealgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let providers = provider_registry(&args);
    if providers.is_empty() {
        tracing::warn!(
            "No OAuth providers configured - every login attempt will fail. \
             Set GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET or GITHUB_CLIENT_ID/GITHUB_CLIENT_SECRET."
        );
    }

    let admins = admin_ids(&args)?;
    if admins.is_empty() {
        tracing::info!("admin allow-list is empty; admin routes will reject everyone");
    }

    let state_store = Arc::new(InMemoryStateStore::new());
    let session_registry = Arc::new(InMemorySessionRegistry::new());
    let user_directory = Arc::new(InMemoryUserDirectory::new());
    let admin_directory = Arc::new(StaticAdminDirectory::new(admins));

    // Periodic housekeeping: expired state tokens and sessions are invalid
    // the moment they lapse, this just reclaims their memory
    tokio::spawn({
        let states = state_store.clone();
        let sessions = session_registry.clone();
        async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                states.sweep_expired().await;
                sessions.sweep_expired().await;
            }
        }
    });

    let auth = Arc::new(AuthService::new(
        AuthConfig {
            jwt_secret: args.jwt_secret.clone(),
            token_ttl: Duration::from_secs(args.token_ttl_minutes * 60),
        },
        state_store.clone(),
        session_registry.clone(),
        user_directory.clone(),
        admin_directory.clone(),
        Arc::new(HttpProviderExchange::new()),
        providers,
    ));

    let app = server::router(AppState {
        auth,
        sessions: session_registry,
        users: user_directory,
        admins: admin_directory,
    });

    // we pass this to TcpListener::bind() which accepts ToSocketAddrs,
    // so hostnames like "localhost" get resolved properly
    let bind_addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("mealgate listening on http://{}", bind_addr);

    // connect info gives the rate limiter a peer ip to fall back on when no
    // proxy headers are present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
