//! VMForge - VM Hosting Backend
//! Mission: Account, session, and rate-limit core with Proxmox VE
//! pass-through routes for VM lifecycle management

use anyhow::{Context, Result};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{env, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vmforge_backend::{
    api::routes::{self, AppState},
    auth::{
        api as auth_api, auth_middleware, db::open_auth_db, jwt::DEFAULT_SESSION_TTL_SECS,
        AuthState, SessionStore, TokenSigner, UserStore,
    },
    hypervisor::{HypervisorClient, MockHypervisor, ProxmoxClient, ProxmoxConfig},
    middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimiter},
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("🚀 VMForge backend starting");

    // Auth core: credential store + session store over one SQLite database
    let auth_db_path = resolve_data_path(env::var("AUTH_DB_PATH").ok(), "vmforge_users.db");
    let db = open_auth_db(&auth_db_path)?;
    let users = UserStore::new(db.clone());
    let sessions = SessionStore::new(db);

    let jwt_secret = env::var("JWT_SECRET")
        .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());
    let session_ttl_secs = env::var("SESSION_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SESSION_TTL_SECS);
    let signer = Arc::new(TokenSigner::new(jwt_secret, session_ttl_secs));

    let auth_state = AuthState::new(users, sessions.clone(), signer);
    info!("🔐 Authentication initialized at: {}", auth_db_path);

    // Hypervisor collaborator: real Proxmox when configured, mock otherwise
    let hypervisor = build_hypervisor()?;
    let app_state = AppState { hypervisor };

    // Rate limiter guards every route
    let limiter = RateLimiter::new(RateLimitConfig {
        max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 10),
        window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 60)),
    });

    // Background sweeps: expired sessions and idle rate-limit keys
    tokio::spawn(session_purge_loop(sessions));
    tokio::spawn(limiter_sweep_loop(limiter.clone()));

    let app = build_router(auth_state, app_state, limiter);

    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Assemble the full router: public, auth, and token-guarded tiers, with
/// rate limiting applied ahead of everything else.
fn build_router(auth_state: AuthState, app_state: AppState, limiter: RateLimiter) -> Router {
    let public_routes = Router::new()
        .route("/api/health", get(routes::health_check))
        .route("/api/contact", post(routes::contact));

    let auth_routes = Router::new()
        .route("/api/signup", post(auth_api::signup))
        .route("/api/login", post(auth_api::login))
        .route("/api/logout", post(auth_api::logout))
        .route("/api/verify-session", get(auth_api::verify_session))
        .with_state(auth_state.clone());

    let account_routes = Router::new()
        .route("/api/users/me", get(auth_api::me))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ));

    let vm_routes = routes::vm_router(app_state).route_layer(
        axum_middleware::from_fn_with_state(auth_state, auth_middleware),
    );

    // Layer order (outermost first at request time): CORS, request logging,
    // rate limiting, then routing; throttled requests never reach the guard.
    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(account_routes)
        .merge(vm_routes)
        .layer(axum_middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive())
}

/// Select the hypervisor backend from the environment. A configured
/// PROXMOX_HOST selects the real client; anything else runs against the mock.
fn build_hypervisor() -> Result<Arc<dyn HypervisorClient>> {
    match env::var("PROXMOX_HOST").ok().filter(|h| !h.trim().is_empty()) {
        Some(host) => {
            let config = ProxmoxConfig {
                host,
                node: env::var("PROXMOX_NODE").unwrap_or_else(|_| "pve".to_string()),
                token_id: env::var("PROXMOX_TOKEN_ID").context("PROXMOX_TOKEN_ID must be set")?,
                token_secret: env::var("PROXMOX_TOKEN_SECRET")
                    .context("PROXMOX_TOKEN_SECRET must be set")?,
                verify_ssl: env::var("PROXMOX_VERIFY_SSL")
                    .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
                    .unwrap_or(false),
            };
            info!("🖥️  Using Proxmox VE hypervisor at {}", config.host);
            Ok(Arc::new(ProxmoxClient::new(config)?))
        }
        None => {
            warn!("PROXMOX_HOST not set, using in-memory mock hypervisor");
            Ok(Arc::new(MockHypervisor::new()))
        }
    }
}

/// Periodically delete expired session rows
async fn session_purge_loop(sessions: SessionStore) {
    let period = Duration::from_secs(env_parse("SESSION_PURGE_INTERVAL_SECS", 3600));
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        match sessions.purge_expired(chrono::Utc::now().timestamp()) {
            Ok(0) => {}
            Ok(purged) => info!("🧹 Purged {} expired sessions", purged),
            Err(e) => warn!("Session purge failed: {}", e),
        }
    }
}

/// Periodically evict rate-limit keys with drained windows
async fn limiter_sweep_loop(limiter: RateLimiter) {
    let mut ticker = interval(Duration::from_secs(300));

    loop {
        ticker.tick().await;
        limiter.sweep_idle(std::time::Instant::now());
        debug!("Rate limiter tracking {} client keys", limiter.tracked_keys());
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Initialize tracing with env-filter overrides
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vmforge=debug,vmforge_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_data_path(filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    // Relative paths anchor at the crate directory, not the caller's cwd
    base.join(p).to_string_lossy().to_string()
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Also try the crate directory .env (common when running with
    //    --manifest-path from elsewhere)
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));

    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];

    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}
