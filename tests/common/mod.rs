#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use sessiongate::{
    ServerConfig,
    cache::SessionCache,
    clock::ManualClock,
    create_app,
    db::{Database, Gender, ProfileUpdate},
    password::hash_password,
};
use tower::ServiceExt;

/// Start of every test timeline.
pub const T0: u64 = 1_700_000_000;
pub const ACCESS_TTL: u64 = 900;
pub const REFRESH_TTL: u64 = 3600;
pub const PASSWORD: &str = "correct-horse-battery";

pub const ACCESS_SECRET: &[u8] = b"test-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &[u8] = b"test-refresh-secret-0123456789abcdef";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub cache: SessionCache,
}

pub struct Setup {
    pub db: Option<Database>,
    pub cache: SessionCache,
    pub secure_cookies: bool,
    pub sign_in_per_minute: u32,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            db: None,
            cache: SessionCache::memory(60),
            secure_cookies: false,
            sign_in_per_minute: 1000,
        }
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with(Setup::default()).await
    }

    pub async fn with(setup: Setup) -> Self {
        let db = match setup.db {
            Some(db) => db,
            None => Database::open(":memory:")
                .await
                .expect("Failed to open test database"),
        };
        let clock = Arc::new(ManualClock::new(T0));

        let mut config =
            ServerConfig::new(db.clone(), ACCESS_SECRET.to_vec(), REFRESH_SECRET.to_vec());
        config.cache = setup.cache.clone();
        config.access_ttl = ACCESS_TTL;
        config.refresh_ttl = REFRESH_TTL;
        config.secure_cookies = setup.secure_cookies;
        config.sign_in_per_minute = setup.sign_in_per_minute;
        config.sign_up_per_minute = 1000;
        config.clock = clock.clone();

        Self {
            router: create_app(&config),
            db,
            clock,
            cache: setup.cache,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Run a request on its own task, so several can be in flight at once on
    /// a multi-threaded runtime.
    pub fn spawn_send(&self, request: Request<Body>) -> tokio::task::JoinHandle<Response<Body>> {
        let router = self.router.clone();
        tokio::spawn(async move { router.oneshot(request).await.unwrap() })
    }

    /// Insert an identity directly, optionally with a completed profile.
    /// Returns its subject id.
    pub async fn create_identity(&self, email: &str, username: Option<&str>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let hash = hash_password(PASSWORD).unwrap();
        self.db.identities().create(&id, email, &hash).await.unwrap();

        if let Some(username) = username {
            self.db
                .identities()
                .update_profile(
                    &id,
                    &ProfileUpdate {
                        name: Some("Test User".to_string()),
                        username: Some(username.to_string()),
                        gender: Some(Gender::Other),
                        bio: None,
                    },
                )
                .await
                .unwrap();
        }
        id
    }

    /// Sign in through the API and return the Set-Cookie values.
    pub async fn sign_in(&self, email: &str) -> Vec<String> {
        let response = self
            .send(post_json(
                "/api/auth/sign-in",
                serde_json::json!({ "email": email, "password": PASSWORD }),
                None,
            ))
            .await;
        assert!(response.status().is_success(), "sign-in failed: {}", response.status());
        extract_set_cookies(&response)
    }
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value, cookie: Option<&str>) -> Request<Body> {
    json_request("POST", uri, body, cookie)
}

pub fn patch_json(uri: &str, body: serde_json::Value, cookie: Option<&str>) -> Request<Body> {
    json_request("PATCH", uri, body, cookie)
}

fn json_request(
    method: &str,
    uri: &str,
    body: serde_json::Value,
    cookie: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Extract Set-Cookie headers from response
pub fn extract_set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// Value of a cookie being set (not cleared) by the response.
pub fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    cookies
        .iter()
        .filter(|c| !c.contains("Max-Age=0"))
        .find_map(|c| c.strip_prefix(&prefix))
        .and_then(|rest| rest.split(';').next())
        .map(str::to_string)
}

/// Check if cookies contain a cookie being cleared (Max-Age=0)
pub fn has_cleared_cookie(cookies: &[String], name: &str) -> bool {
    let prefix = format!("{}=", name);
    cookies
        .iter()
        .any(|c| c.starts_with(&prefix) && c.contains("Max-Age=0"))
}

/// Build a Cookie request header from the cookies a response set.
pub fn cookie_header(cookies: &[String]) -> String {
    ["access", "refresh", "current"]
        .into_iter()
        .filter_map(|name| cookie_value(cookies, name).map(|v| format!("{}={}", name, v)))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn refresh_cookies(refresh: &str, session_id: &str) -> String {
    format!("refresh={}; current={}", refresh, session_id)
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
