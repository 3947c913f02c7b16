//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;
use std::time::Duration;

use crate::ServerConfig;
use crate::auth::ClientIpHeader;
use crate::cache::{RedisCache, SessionCache};
use crate::clock::SystemClock;
use crate::db::Database;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

const MIN_SECRET_LENGTH: usize = 32;

/// Upper bound for every configurable lifetime: ten years.
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sessiongate",
    about = "Cookie-based session service with rotating refresh tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "sessiongate.db")]
    pub database: String,

    /// Redis URI for the identity cache. Without it an in-process cache is used
    #[arg(long, env = "CACHE_URI")]
    pub cache_uri: Option<String>,

    /// Seconds an identity snapshot stays cached
    #[arg(long, env = "CACHE_TTL", default_value = "1800",
        value_parser = clap::value_parser!(u64).range(1..=MAX_LIFETIME_SECS))]
    pub cache_ttl: u64,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_EXPIRY", default_value = "900",
        value_parser = clap::value_parser!(u64).range(1..=MAX_LIFETIME_SECS))]
    pub access_expiry: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_EXPIRY", default_value = "1209600",
        value_parser = clap::value_parser!(u64).range(2..=MAX_LIFETIME_SECS))]
    pub refresh_expiry: u64,

    /// Deployment environment. Production marks cookies Secure
    #[arg(long, env = "APP_ENV", default_value = "development")]
    pub environment: Environment,

    /// Read the client IP from this proxy header instead of the socket address
    #[arg(long)]
    pub ip_header: Option<ClientIpHeader>,

    /// Seconds between sweeps of expired sessions
    #[arg(long, default_value = "3600",
        value_parser = clap::value_parser!(u64).range(1..=MAX_LIFETIME_SECS))]
    pub sweep_interval: u64,

    /// Sign-in attempts allowed per client IP per minute
    #[arg(long, default_value = "10")]
    pub sign_in_per_minute: u32,

    /// Sign-ups allowed per client IP per minute
    #[arg(long, default_value = "5")]
    pub sign_up_per_minute: u32,

    /// Path to file containing the access token secret. Prefer the ACCESS_SECRET env var instead
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer the REFRESH_SECRET env var instead
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load a signing secret from an environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable (recommended) or pass a secret file",
            env_var
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// The access and refresh secrets must differ, or a leaked access key could
/// sign refresh tokens.
pub fn validate_secrets(access: &str, refresh: &str) -> bool {
    if access == refresh {
        error!("ACCESS_SECRET and REFRESH_SECRET must be different");
        return false;
    }
    true
}

/// Parse and validate the cache URI. Returns None and logs an error if
/// validation fails.
pub fn validate_cache_uri(uri: &str) -> Option<Url> {
    let url = match Url::parse(uri) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "Invalid cache URI");
            return None;
        }
    };

    if !matches!(url.scheme(), "redis" | "rediss") {
        error!(scheme = %url.scheme(), "Cache URI must use redis:// or rediss://");
        return None;
    }

    Some(url)
}

/// The URI with any password removed, for logging.
pub fn redact_uri(url: &Url) -> String {
    let mut redacted = url.clone();
    if redacted.password().is_some() {
        redacted.set_password(Some("***")).ok();
    }
    redacted.to_string()
}

/// Open the identity cache. Without a URI the cache is in-process.
/// An unreachable Redis server is not fatal; the cache starts degraded.
pub async fn open_cache(uri: Option<&str>, ttl: u64) -> Option<SessionCache> {
    let Some(uri) = uri else {
        info!("No cache URI configured, using in-process cache");
        return Some(SessionCache::memory(ttl));
    };

    let url = validate_cache_uri(uri)?;
    match RedisCache::connect(url.as_str()).await {
        Ok(cache) => {
            info!(uri = %redact_uri(&url), "Cache configured");
            Some(SessionCache::redis(cache, ttl))
        }
        Err(e) => {
            error!(uri = %redact_uri(&url), error = %e, "Failed to configure cache");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    cache: SessionCache,
    access_secret: String,
    refresh_secret: String,
) -> ServerConfig {
    let secure_cookies = args.environment == Environment::Production;
    if !secure_cookies {
        warn!("Running outside production, cookies are not marked Secure");
    }

    ServerConfig {
        db,
        cache,
        access_secret: access_secret.into_bytes(),
        access_ttl: args.access_expiry,
        refresh_secret: refresh_secret.into_bytes(),
        refresh_ttl: args.refresh_expiry,
        secure_cookies,
        ip_header: args.ip_header,
        sign_in_per_minute: args.sign_in_per_minute,
        sign_up_per_minute: args.sign_up_per_minute,
        sweep_interval: Duration::from_secs(args.sweep_interval),
        clock: Arc::new(SystemClock),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
