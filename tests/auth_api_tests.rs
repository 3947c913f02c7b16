//! Tests for sign-up, sign-in, sign-out and the profile endpoints.

mod common;

use axum::http::StatusCode;
use common::*;
use sessiongate::cache::{RedisCache, SessionCache};
use serde_json::json;

// =============================================================================
// Sign Up
// =============================================================================

#[tokio::test]
async fn test_sign_up_creates_identity() {
    let app = TestApp::new().await;

    let response = app
        .send(post_json(
            "/api/auth/sign-up",
            json!({ "email": "Bob@Example.com", "password": PASSWORD }),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(extract_set_cookies(&response).is_empty());

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Signed up successfully!");
    assert_eq!(json["data"]["email"], "bob@example.com");
    assert_eq!(json["data"]["setup"], false);
    assert!(json["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_sign_up_duplicate_email_conflicts() {
    let app = TestApp::new().await;
    app.create_identity("bob@example.com", None).await;

    let response = app
        .send(post_json(
            "/api/auth/sign-up",
            json!({ "email": "BOB@example.com", "password": PASSWORD }),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn test_sign_up_rejects_bad_input() {
    let app = TestApp::new().await;

    let short = app
        .send(post_json(
            "/api/auth/sign-up",
            json!({ "email": "bob@example.com", "password": "short" }),
            None,
        ))
        .await;
    assert_eq!(short.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(short).await["error"], "bad_request");

    let no_at = app
        .send(post_json(
            "/api/auth/sign-up",
            json!({ "email": "bob.example.com", "password": PASSWORD }),
            None,
        ))
        .await;
    assert_eq!(no_at.status(), StatusCode::BAD_REQUEST);

    let malformed = app
        .send(post_json("/api/auth/sign-up", json!({ "email": 5 }), None))
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(malformed).await["success"], false);
}

// =============================================================================
// Sign In
// =============================================================================

#[tokio::test]
async fn test_sign_in_with_incomplete_setup_issues_access_only() {
    let app = TestApp::new().await;
    let id = app.create_identity("bob@example.com", None).await;

    let response = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "email": "bob@example.com", "password": PASSWORD }),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let cookies = extract_set_cookies(&response);
    assert!(cookie_value(&cookies, "access").is_some());
    assert!(cookie_value(&cookies, "refresh").is_none());
    assert!(cookie_value(&cookies, "current").is_none());

    let json = body_json(response).await;
    assert_eq!(json["message"], "Please, complete your profile!");
    assert!(
        app.db
            .sessions()
            .list_by_subject(&id, T0)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_sign_in_with_complete_setup_opens_session() {
    let app = TestApp::new().await;
    let id = app.create_identity("alice@example.com", Some("alice")).await;

    let response = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "username": "Alice", "password": PASSWORD }),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = extract_set_cookies(&response);
    assert_eq!(cookies.len(), 3);
    for cookie in &cookies {
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(!cookie.contains("Secure"));
    }

    let refresh = cookie_value(&cookies, "refresh").unwrap();
    let session_id = cookie_value(&cookies, "current").unwrap();
    let record = app
        .db
        .sessions()
        .find_by_credential(&session_id, &refresh)
        .await
        .unwrap()
        .expect("session row");
    assert_eq!(record.subject_id, id);
    assert_eq!(record.expires_at, (T0 + REFRESH_TTL) as i64);

    let json = body_json(response).await;
    assert_eq!(json["message"], "Signed in successfully!");
    assert_eq!(json["data"]["username"], "alice");
}

#[tokio::test]
async fn test_sign_in_wrong_password_clears_cookies() {
    let app = TestApp::new().await;
    app.create_identity("alice@example.com", Some("alice")).await;

    let response = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "email": "alice@example.com", "password": "wrong-password" }),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let cookies = extract_set_cookies(&response);
    assert!(has_cleared_cookie(&cookies, "access"));
    assert!(has_cleared_cookie(&cookies, "refresh"));
    assert!(has_cleared_cookie(&cookies, "current"));
    assert_eq!(body_json(response).await["error"], "forbidden");
}

#[tokio::test]
async fn test_sign_in_unknown_user_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "email": "nobody@example.com", "password": PASSWORD }),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_sign_in_without_identifier_is_bad_request() {
    let app = TestApp::new().await;

    let response = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "password": PASSWORD }),
            None,
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Email or Username required");
}

#[tokio::test]
async fn test_sign_in_rate_limited() {
    let app = TestApp::with(Setup {
        sign_in_per_minute: 2,
        ..Default::default()
    })
    .await;
    app.create_identity("alice@example.com", Some("alice")).await;

    let attempt = || {
        post_json(
            "/api/auth/sign-in",
            json!({ "email": "alice@example.com", "password": "wrong-password" }),
            None,
        )
    };

    assert_eq!(app.send(attempt()).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.send(attempt()).await.status(), StatusCode::FORBIDDEN);

    let limited = app.send(attempt()).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(limited).await["error"], "rate_limited");
}

#[tokio::test]
async fn test_secure_cookies() {
    let app = TestApp::with(Setup {
        secure_cookies: true,
        ..Default::default()
    })
    .await;
    app.create_identity("alice@example.com", Some("alice")).await;

    let cookies = app.sign_in("alice@example.com").await;
    assert_eq!(cookies.len(), 3);
    assert!(cookies.iter().all(|c| c.contains("; Secure")));
}

// =============================================================================
// Sign Out
// =============================================================================

#[tokio::test]
async fn test_sign_out_without_cookies_succeeds() {
    let app = TestApp::new().await;

    let response = app.send(post_json("/api/auth/sign-out", json!({}), None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = extract_set_cookies(&response);
    assert!(has_cleared_cookie(&cookies, "access"));
    assert!(has_cleared_cookie(&cookies, "refresh"));
    assert!(has_cleared_cookie(&cookies, "current"));
    assert_eq!(body_json(response).await["message"], "Signed out successfully!");
}

#[tokio::test]
async fn test_sign_out_ends_session() {
    let app = TestApp::new().await;
    let id = app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;
    let refresh = cookie_value(&cookies, "refresh").unwrap();
    let session_id = cookie_value(&cookies, "current").unwrap();
    assert!(app.cache.get(&id).await.is_some());

    let response = app
        .send(post_json(
            "/api/auth/sign-out",
            json!({}),
            Some(&cookie_header(&cookies)),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(
        app.db
            .sessions()
            .find_by_credential(&session_id, &refresh)
            .await
            .unwrap()
            .is_none()
    );
    assert!(app.cache.get(&id).await.is_none());

    let refreshed = app
        .send(get(
            "/api/auth/refresh",
            Some(&refresh_cookies(&refresh, &session_id)),
        ))
        .await;
    assert_eq!(refreshed.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_sign_out_with_expired_refresh_still_removes_session() {
    let app = TestApp::new().await;
    app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;
    let refresh = cookie_value(&cookies, "refresh").unwrap();
    let session_id = cookie_value(&cookies, "current").unwrap();

    app.clock.set(T0 + REFRESH_TTL + 10);
    let response = app
        .send(post_json(
            "/api/auth/sign-out",
            json!({}),
            Some(&refresh_cookies(&refresh, &session_id)),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(
        app.db
            .sessions()
            .find_by_credential(&session_id, &refresh)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_sign_out_with_access_cookie_only_evicts_cache() {
    let app = TestApp::new().await;
    let (id, cookies) = pending_identity(&app).await;
    assert_eq!(cookies.len(), 1);
    assert!(app.cache.get(&id).await.is_some());

    let response = app
        .send(post_json(
            "/api/auth/sign-out",
            json!({}),
            Some(&cookie_header(&cookies)),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let cleared = extract_set_cookies(&response);
    assert!(has_cleared_cookie(&cleared, "access"));
    assert!(has_cleared_cookie(&cleared, "refresh"));
    assert!(has_cleared_cookie(&cleared, "current"));
    assert!(app.cache.get(&id).await.is_none());
}

// =============================================================================
// Identity Resolution
// =============================================================================

#[tokio::test]
async fn test_me_requires_access_cookie() {
    let app = TestApp::new().await;

    let missing = app.send(get("/api/user/me", None)).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(missing).await["error"], "unauthorized");

    let garbage = app.send(get("/api/user/me", Some("access=garbage"))).await;
    assert_eq!(garbage.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(garbage).await["error"], "forbidden");
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = TestApp::new().await;
    app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;
    let refresh = cookie_value(&cookies, "refresh").unwrap();

    let response = app
        .send(get("/api/user/me", Some(&format!("access={}", refresh))))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_me_returns_snapshot() {
    let app = TestApp::new().await;
    let id = app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;

    let response = app
        .send(get("/api/user/me", Some(&cookie_header(&cookies))))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "User profile details!");
    assert_eq!(json["data"]["id"], id);
    assert_eq!(json["data"]["username"], "alice");
    assert_eq!(json["data"]["setup"], true);
}

#[tokio::test]
async fn test_me_falls_back_to_store_when_cache_is_down() {
    let cache = SessionCache::redis(RedisCache::new("redis://127.0.0.1:1").unwrap(), 60);
    let app = TestApp::with(Setup {
        cache,
        ..Default::default()
    })
    .await;
    app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;

    let response = app
        .send(get("/api/user/me", Some(&cookie_header(&cookies))))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["username"], "alice");
}

#[tokio::test]
async fn test_deleted_identity_is_not_found() {
    let app = TestApp::new().await;
    let id = app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;

    app.db.identities().delete(&id).await.unwrap();
    app.cache.delete(&id).await;

    let response = app
        .send(get("/api/user/me", Some(&cookie_header(&cookies))))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Profile Setup
// =============================================================================

async fn pending_identity(app: &TestApp) -> (String, Vec<String>) {
    let id = app.create_identity("bob@example.com", None).await;
    let response = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "email": "bob@example.com", "password": PASSWORD }),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    (id, extract_set_cookies(&response))
}

#[tokio::test]
async fn test_profile_setup_completes_and_opens_session() {
    let app = TestApp::new().await;
    let (id, cookies) = pending_identity(&app).await;

    let response = app
        .send(patch_json(
            "/api/user/profile-setup",
            json!({ "name": "Bob", "username": "Bob_99", "gender": "Male", "bio": "hi" }),
            Some(&cookie_header(&cookies)),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let set = extract_set_cookies(&response);
    assert!(cookie_value(&set, "access").is_some());
    let refresh = cookie_value(&set, "refresh").expect("refresh cookie");
    let session_id = cookie_value(&set, "current").expect("session cookie");
    assert!(
        app.db
            .sessions()
            .find_by_credential(&session_id, &refresh)
            .await
            .unwrap()
            .is_some()
    );

    let json = body_json(response).await;
    assert_eq!(json["message"], "Profile updated successfully!");
    assert_eq!(json["data"]["username"], "bob_99");
    assert_eq!(json["data"]["setup"], true);

    let cached = app.cache.get(&id).await.expect("cached snapshot");
    assert_eq!(cached.username.as_deref(), Some("bob_99"));
    assert!(cached.setup);

    // Updating again with a session in place only reissues the access cookie.
    let again = app
        .send(patch_json(
            "/api/user/profile-setup",
            json!({ "bio": "updated" }),
            Some(&cookie_header(&set)),
        ))
        .await;
    assert_eq!(again.status(), StatusCode::OK);
    let set_again = extract_set_cookies(&again);
    assert_eq!(set_again.len(), 1);
    assert!(cookie_value(&set_again, "access").is_some());
    assert_eq!(app.db.sessions().list_by_subject(&id, T0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_partial_profile_stays_pending() {
    let app = TestApp::new().await;
    let (id, cookies) = pending_identity(&app).await;

    let response = app
        .send(patch_json(
            "/api/user/profile-setup",
            json!({ "name": "Bob" }),
            Some(&cookie_header(&cookies)),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(extract_set_cookies(&response).is_empty());
    let json = body_json(response).await;
    assert_eq!(json["message"], "Please, complete your profile!");
    assert_eq!(json["data"]["setup"], false);
    assert!(app.db.sessions().list_by_subject(&id, T0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_username_clash_conflicts() {
    let app = TestApp::new().await;
    app.create_identity("alice@example.com", Some("alice")).await;
    let (_, cookies) = pending_identity(&app).await;

    let response = app
        .send(patch_json(
            "/api/user/profile-setup",
            json!({ "name": "Bob", "username": "ALICE", "gender": "Male" }),
            Some(&cookie_header(&cookies)),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "conflict");
}

#[tokio::test]
async fn test_profile_rejects_invalid_username() {
    let app = TestApp::new().await;
    let (_, cookies) = pending_identity(&app).await;

    let response = app
        .send(patch_json(
            "/api/user/profile-setup",
            json!({ "username": "no-dashes!" }),
            Some(&cookie_header(&cookies)),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_profile_setup_requires_access() {
    let app = TestApp::new().await;

    let response = app
        .send(patch_json(
            "/api/user/profile-setup",
            json!({ "name": "Bob" }),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Change Password
// =============================================================================

async fn change_password(
    app: &TestApp,
    cookies: &[String],
    old: &str,
    new: &str,
) -> axum::http::Response<axum::body::Body> {
    app.send(patch_json(
        "/api/user/change-password",
        json!({ "old_password": old, "new_password": new }),
        Some(&cookie_header(cookies)),
    ))
    .await
}

#[tokio::test]
async fn test_change_password_reissues_access() {
    let app = TestApp::new().await;
    let id = app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;

    let response = change_password(&app, &cookies, PASSWORD, "a-brand-new-secret").await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let set = extract_set_cookies(&response);
    assert_eq!(set.len(), 1);
    assert!(cookie_value(&set, "access").is_some());
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Password changed successfully!");
    assert_eq!(json["data"]["id"], id);

    let old = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "email": "alice@example.com", "password": PASSWORD }),
            None,
        ))
        .await;
    assert_eq!(old.status(), StatusCode::FORBIDDEN);

    let new = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "email": "alice@example.com", "password": "a-brand-new-secret" }),
            None,
        ))
        .await;
    assert_eq!(new.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_change_password_to_same_value_is_bad_request() {
    let app = TestApp::new().await;
    app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;

    let response = change_password(&app, &cookies, PASSWORD, PASSWORD).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "bad_request");
    assert_eq!(json["message"], "Please, choose a different password!");
}

#[tokio::test]
async fn test_change_password_with_wrong_old_password_is_forbidden() {
    let app = TestApp::new().await;
    app.create_identity("alice@example.com", Some("alice")).await;
    let cookies = app.sign_in("alice@example.com").await;

    let response = change_password(&app, &cookies, "not-my-password", "a-brand-new-secret").await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "forbidden");

    // The stored password is unchanged.
    let still = app
        .send(post_json(
            "/api/auth/sign-in",
            json!({ "email": "alice@example.com", "password": PASSWORD }),
            None,
        ))
        .await;
    assert_eq!(still.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_change_password_requires_access() {
    let app = TestApp::new().await;

    let response = change_password(&app, &[], PASSWORD, "a-brand-new-secret").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Session Listing
// =============================================================================

#[tokio::test]
async fn test_sessions_listing_hides_tokens() {
    let app = TestApp::new().await;
    app.create_identity("alice@example.com", Some("alice")).await;
    let first = app.sign_in("alice@example.com").await;
    let second = app.sign_in("alice@example.com").await;

    let response = app
        .send(get("/api/user/sessions", Some(&cookie_header(&second))))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(!text.contains(&cookie_value(&first, "refresh").unwrap()));
    assert!(!text.contains(&cookie_value(&second, "refresh").unwrap()));

    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let sessions = json["data"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);

    let current = cookie_value(&second, "current").unwrap();
    let marked: Vec<_> = sessions
        .iter()
        .filter(|s| s["current"] == true)
        .map(|s| s["session_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(marked, vec![current]);
}
