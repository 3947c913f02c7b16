pub mod api;
pub mod auth;
pub mod cache;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;

use api::{AppState, create_api_router};
use auth::{ClientIpHeader, SessionManager};
use axum::Router;
use cache::SessionCache;
use clock::{Clock, SystemClock};
use db::Database;
use jwt::TokenCodec;
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Identity snapshot cache (Redis or in-process)
    pub cache: SessionCache,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Access token lifetime in seconds
    pub access_ttl: u64,
    /// Secret for signing refresh tokens, distinct from the access secret
    pub refresh_secret: Vec<u8>,
    /// Refresh token lifetime in seconds
    pub refresh_ttl: u64,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// Header carrying the client IP (requires running behind a proxy)
    pub ip_header: Option<ClientIpHeader>,
    /// Sign-in attempts allowed per client IP per minute
    pub sign_in_per_minute: u32,
    /// Sign-ups allowed per client IP per minute
    pub sign_up_per_minute: u32,
    /// Interval between expired-session sweeps
    pub sweep_interval: Duration,
    /// Time source for token issuance and expiry
    pub clock: Arc<dyn Clock>,
}

impl ServerConfig {
    /// Configuration with default TTLs and limits, the system clock and an
    /// in-process cache.
    pub fn new(db: Database, access_secret: Vec<u8>, refresh_secret: Vec<u8>) -> Self {
        Self {
            db,
            cache: SessionCache::memory(cache::DEFAULT_CACHE_TTL_SECS),
            access_secret,
            access_ttl: jwt::DEFAULT_ACCESS_TTL_SECS,
            refresh_secret,
            refresh_ttl: jwt::DEFAULT_REFRESH_TTL_SECS,
            secure_cookies: false,
            ip_header: None,
            sign_in_per_minute: 10,
            sign_up_per_minute: 5,
            sweep_interval: cleanup::DEFAULT_SWEEP_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }

    /// Build the session manager these settings describe.
    pub fn session_manager(&self) -> SessionManager {
        let codec = TokenCodec::new(
            &self.access_secret,
            self.access_ttl,
            &self.refresh_secret,
            self.refresh_ttl,
        );
        SessionManager::new(
            self.db.clone(),
            self.cache.clone(),
            codec,
            self.clock.clone(),
            self.secure_cookies,
        )
    }
}

/// Create the application router around an existing session manager.
pub fn create_router(sessions: SessionManager, config: &ServerConfig) -> Router {
    let state = AppState {
        sessions,
        ip_header: config.ip_header,
    };
    let rate_limits = Arc::new(RateLimitConfig::new(
        config.sign_in_per_minute,
        config.sign_up_per_minute,
        config.ip_header,
    ));

    Router::new().nest("/api", create_api_router(state, rate_limits))
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    create_router(config.session_manager(), config)
}

/// Sweep expired sessions and spawn the background scheduler.
/// Call this before starting the server.
pub async fn init_sweep(config: &ServerConfig) -> tokio::task::JoinHandle<()> {
    let sessions = config.session_manager();
    cleanup::run_sweep(&sessions).await;
    cleanup::spawn_sweep_scheduler(sessions, config.sweep_interval)
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_sweep` before this to sweep on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_sweep(&config).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
