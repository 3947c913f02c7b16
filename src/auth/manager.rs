//! Session lifecycle: sign-in, access resolution, refresh rotation and
//! sign-out.
//!
//! Refresh credentials move through three states relative to their expiry
//! `exp` and the refresh TTL:
//!
//! - fresh: `now < exp - ttl/2`, only a new access token is issued
//! - renewable: `exp - ttl/2 <= now < exp`, the refresh token is rotated
//! - expired: `now >= exp`, the session is deleted and cookies cleared
//!
//! Rotation is a compare-and-swap on `(session_id, refresh_token)` in the
//! store, so of two concurrent refreshes with the same credential exactly one
//! wins.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::cookie::{CookieSettings, RefreshCredentials};
use super::errors::AuthError;
use crate::cache::SessionCache;
use crate::clock::Clock;
use crate::db::{Database, IdentitySnapshot, Login, ProfileUpdate, SessionMetadata};
use crate::jwt::{JwtError, TokenCodec, UnsafeDecode};
use crate::password::{self, MAX_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH};

const MAX_EMAIL_LENGTH: usize = 254;
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 30;
const MAX_NAME_LENGTH: usize = 100;
const MAX_BIO_LENGTH: usize = 500;

/// Where a correctly signed refresh token sits in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Fresh,
    Renewable,
    Expired,
}

/// Classify a refresh token expiring at `expires_at`, issued with `ttl`.
pub fn classify(expires_at: u64, ttl: u64, now: u64) -> RefreshState {
    if now >= expires_at {
        RefreshState::Expired
    } else if now >= expires_at.saturating_sub(ttl / 2) {
        RefreshState::Renewable
    } else {
        RefreshState::Fresh
    }
}

/// Result of a password change.
#[derive(Debug)]
pub struct PasswordOutcome {
    pub identity: IdentitySnapshot,
    pub cookies: Vec<String>,
}

/// Result of a successful sign-in.
#[derive(Debug)]
pub struct SignInOutcome {
    pub identity: IdentitySnapshot,
    pub cookies: Vec<String>,
    /// Profile setup is incomplete; only an access cookie was issued.
    pub setup_required: bool,
}

/// Result of a successful refresh.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub identity: IdentitySnapshot,
    pub cookies: Vec<String>,
    pub rotated: bool,
}

/// Result of a profile update.
#[derive(Debug)]
pub struct ProfileOutcome {
    pub identity: IdentitySnapshot,
    pub cookies: Vec<String>,
}

/// One of the caller's sessions, without its credential.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
    pub expires_at: i64,
    pub current: bool,
}

/// Owns every handle a session operation needs. Built once at startup and
/// shared through the router state.
#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    cache: SessionCache,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    cookies: CookieSettings,
}

impl SessionManager {
    pub fn new(
        db: Database,
        cache: SessionCache,
        codec: TokenCodec,
        clock: Arc<dyn Clock>,
        secure_cookies: bool,
    ) -> Self {
        let cookies = CookieSettings {
            secure: secure_cookies,
            access_ttl: codec.access_ttl(),
            refresh_ttl: codec.refresh_ttl(),
        };
        Self {
            db,
            cache,
            codec,
            clock,
            cookies,
        }
    }

    pub fn cookies(&self) -> &CookieSettings {
        &self.cookies
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Register a new identity with setup incomplete.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<IdentitySnapshot, AuthError> {
        let email = normalize_email(email)?;
        validate_password(password)?;

        if self.db.identities().email_exists(&email).await? {
            return Err(AuthError::Conflict("Email already exists"));
        }

        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {}", e)))??;

        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .identities()
            .create(&id, &email, &hash)
            .await
            .map_err(|e| unique_violation_as(e, "Email already exists"))?;

        info!(subject_id = %id, "Identity created");

        self.db
            .identities()
            .get_by_id(&id)
            .await?
            .map(|identity| IdentitySnapshot::from(&identity))
            .ok_or_else(|| AuthError::Internal("identity vanished after insert".to_string()))
    }

    /// Check credentials and issue tokens. Identities with incomplete setup
    /// get an access token only.
    pub async fn sign_in(
        &self,
        login: &Login,
        password: &str,
        metadata: &SessionMetadata,
    ) -> Result<SignInOutcome, AuthError> {
        if password.is_empty() || password.len() > MAX_PASSWORD_LENGTH {
            return Err(AuthError::BadRequest("Invalid password".to_string()));
        }

        let credentials = self
            .db
            .identities()
            .get_credentials(login)
            .await?
            .ok_or(AuthError::NotFound("User does not exist"))?;

        let password = password.to_string();
        let hash = credentials.password_hash;
        let matches =
            tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
                .await
                .map_err(|e| AuthError::Internal(format!("verification task failed: {}", e)))?;
        if !matches {
            info!(subject_id = %credentials.identity.id, "Sign-in rejected: incorrect password");
            return Err(AuthError::Forbidden("Incorrect password"));
        }

        let identity = IdentitySnapshot::from(&credentials.identity);
        let now = self.clock.now();
        let access = self.codec.issue_access(&identity.id, now)?;
        let mut cookies = vec![self.cookies.access(&access.token)];

        self.cache.set(&identity).await;

        if !identity.setup {
            info!(subject_id = %identity.id, "Signed in, profile setup pending");
            return Ok(SignInOutcome {
                identity,
                cookies,
                setup_required: true,
            });
        }

        cookies.extend(self.open_session(&identity.id, metadata, now).await?);
        info!(subject_id = %identity.id, "Signed in");

        Ok(SignInOutcome {
            identity,
            cookies,
            setup_required: false,
        })
    }

    /// Mint a refresh token, store a session for it and return its cookies.
    async fn open_session(
        &self,
        subject_id: &str,
        metadata: &SessionMetadata,
        now: u64,
    ) -> Result<Vec<String>, AuthError> {
        let refresh = self.codec.issue_refresh(subject_id, now)?;
        let session_id = self
            .db
            .sessions()
            .create(subject_id, &refresh.token, refresh.expires_at, metadata, now)
            .await?;

        debug!(subject_id, session_id = %session_id, "Session opened");

        Ok(vec![
            self.cookies.refresh(&refresh.token),
            self.cookies.session(&session_id),
        ])
    }

    /// Resolve the identity behind an access token.
    pub async fn resolve_access(&self, token: Option<&str>) -> Result<IdentitySnapshot, AuthError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Unauthorized("Unauthorized access request"))?;

        let claims = match self.codec.verify_access(token, self.clock.now()) {
            Ok(claims) => claims,
            Err(JwtError::Expired) => {
                return Err(AuthError::Unauthorized("Access token expired"));
            }
            Err(e) => {
                debug!(error = %e, "Rejected access token");
                return Err(AuthError::Forbidden("Invalid access request"));
            }
        };

        self.resolve_identity(&claims.sub).await
    }

    /// Cache first, then the store. A store hit repopulates the cache.
    pub async fn resolve_identity(&self, subject_id: &str) -> Result<IdentitySnapshot, AuthError> {
        if let Some(snapshot) = self.cache.get(subject_id).await {
            return Ok(snapshot);
        }

        let identity = self
            .db
            .identities()
            .get_by_id(subject_id)
            .await?
            .ok_or(AuthError::NotFound("User does not exist"))?;

        let snapshot = IdentitySnapshot::from(&identity);
        self.cache.set(&snapshot).await;
        Ok(snapshot)
    }

    /// Exchange a refresh credential for a new access token, rotating the
    /// refresh token once it is past half its lifetime.
    pub async fn refresh(
        &self,
        credentials: &RefreshCredentials,
        metadata: &SessionMetadata,
    ) -> Result<RefreshOutcome, AuthError> {
        let (Some(token), Some(session_id)) = (
            credentials.refresh_token.as_deref(),
            credentials.session_id.as_deref(),
        ) else {
            return Err(AuthError::Unauthorized("Unauthorized refresh request"));
        };

        let now = self.clock.now();
        let claims = match self.codec.verify_refresh(token, now) {
            Ok(claims) => claims,
            Err(JwtError::Expired) => return Err(self.expire_session(token, session_id).await),
            Err(e) => {
                debug!(error = %e, "Rejected refresh token");
                return Err(AuthError::Forbidden("Invalid refresh request"));
            }
        };

        let record = self
            .db
            .sessions()
            .find_by_credential(session_id, token)
            .await?
            .filter(|record| record.subject_id == claims.sub);
        if record.is_none() {
            warn!(subject_id = %claims.sub, session_id, "Refresh token does not match any session");
            return Err(AuthError::Forbidden("Invalid user request"));
        }

        let identity = self.resolve_fresh_identity(&claims.sub).await?;
        let access = self.codec.issue_access(&claims.sub, now)?;
        let mut cookies = vec![self.cookies.access(&access.token)];
        let ip_address = metadata.ip_address.as_deref();

        let rotated = match classify(claims.exp, self.codec.refresh_ttl(), now) {
            RefreshState::Expired => return Err(self.expire_session(token, session_id).await),
            RefreshState::Renewable => {
                let next = self.codec.issue_refresh(&claims.sub, now)?;
                let swapped = self
                    .db
                    .sessions()
                    .rotate(session_id, token, &next.token, next.expires_at, ip_address, now)
                    .await?;
                if !swapped {
                    warn!(subject_id = %claims.sub, session_id, "Lost refresh rotation race");
                    return Err(AuthError::Forbidden("Invalid refresh request"));
                }
                info!(subject_id = %claims.sub, session_id, "Refresh token rotated");
                cookies.push(self.cookies.refresh(&next.token));
                cookies.push(self.cookies.session(session_id));
                true
            }
            RefreshState::Fresh => {
                if let Err(e) = self.db.sessions().touch(session_id, ip_address, now).await {
                    warn!(session_id, error = %e, "Failed to record session use");
                }
                false
            }
        };

        Ok(RefreshOutcome {
            identity,
            cookies,
            rotated,
        })
    }

    /// Identity snapshot straight from the store, written through to the cache.
    async fn resolve_fresh_identity(&self, subject_id: &str) -> Result<IdentitySnapshot, AuthError> {
        let identity = self
            .db
            .identities()
            .get_by_id(subject_id)
            .await?
            .ok_or(AuthError::Forbidden("Invalid user request"))?;
        let snapshot = IdentitySnapshot::from(&identity);
        self.cache.set(&snapshot).await;
        Ok(snapshot)
    }

    /// Remove the session an expired refresh token belonged to. Always yields
    /// `SessionExpired` unless the store itself fails.
    async fn expire_session(&self, token: &str, session_id: &str) -> AuthError {
        let subject = match UnsafeDecode::claims(token) {
            Ok(claims) => claims.sub,
            Err(e) => {
                debug!(error = %e, "Expired refresh token could not be decoded");
                return AuthError::SessionExpired;
            }
        };

        match self.db.sessions().delete(&subject, session_id, token).await {
            Ok(true) => info!(subject_id = %subject, session_id, "Expired session removed"),
            Ok(false) => debug!(subject_id = %subject, session_id, "Expired session already gone"),
            Err(e) => return AuthError::Database(e),
        }

        AuthError::SessionExpired
    }

    /// End the caller's session. Never fails: missing or garbage cookies just
    /// mean there is nothing to delete. Returns cookies clearing all three.
    ///
    /// The cached snapshot is dropped for whichever subject a correctly signed
    /// cookie names, so a caller holding only an access cookie (setup still
    /// pending) is evicted too.
    pub async fn sign_out(
        &self,
        credentials: &RefreshCredentials,
        access_token: Option<&str>,
    ) -> Vec<String> {
        let now = self.clock.now();
        let refresh_subject = credentials.refresh_token.as_deref().and_then(|token| {
            signed_subject(self.codec.verify_refresh(token, now).map(|c| c.sub), token)
        });

        if let (Some(subject), Some(token), Some(session_id)) = (
            refresh_subject.as_deref(),
            credentials.refresh_token.as_deref(),
            credentials.session_id.as_deref(),
        ) {
            match self.db.sessions().delete(subject, session_id, token).await {
                Ok(_) => info!(subject_id = %subject, session_id, "Signed out"),
                Err(e) => error!(subject_id = %subject, error = %e, "Failed to delete session"),
            }
        }

        let subject = refresh_subject.or_else(|| {
            access_token.filter(|t| !t.is_empty()).and_then(|token| {
                signed_subject(self.codec.verify_access(token, now).map(|c| c.sub), token)
            })
        });
        if let Some(subject) = subject {
            self.cache.delete(&subject).await;
        }

        self.cookies.clear_all()
    }

    /// Replace the caller's password after checking the current one, and
    /// issue a fresh access cookie. Existing sessions stay open.
    pub async fn change_password(
        &self,
        subject_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<PasswordOutcome, AuthError> {
        if old_password == new_password {
            return Err(AuthError::BadRequest(
                "Please, choose a different password!".to_string(),
            ));
        }
        validate_password(new_password)?;
        if old_password.len() > MAX_PASSWORD_LENGTH {
            return Err(AuthError::Forbidden("Incorrect old password"));
        }

        let stored = self
            .db
            .identities()
            .get_password_hash(subject_id)
            .await?
            .ok_or(AuthError::Forbidden("Invalid authorization"))?;

        let old_password = old_password.to_string();
        let new_password = new_password.to_string();
        let hash = tokio::task::spawn_blocking(move || {
            if password::verify_password(&old_password, &stored) {
                password::hash_password(&new_password).map(Some)
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| AuthError::Internal(format!("hashing task failed: {}", e)))??;

        let Some(hash) = hash else {
            info!(subject_id, "Password change rejected: incorrect old password");
            return Err(AuthError::Forbidden("Incorrect old password"));
        };

        if !self.db.identities().update_password(subject_id, &hash).await? {
            return Err(AuthError::Forbidden("Invalid authorization"));
        }
        info!(subject_id, "Password changed");

        let identity = self.resolve_fresh_identity(subject_id).await?;
        let access = self.codec.issue_access(subject_id, self.clock.now())?;

        Ok(PasswordOutcome {
            identity,
            cookies: vec![self.cookies.access(&access.token)],
        })
    }

    /// Update profile fields. Completing setup for a caller without a session
    /// opens one, so they do not need to sign in again.
    pub async fn complete_profile(
        &self,
        subject_id: &str,
        update: ProfileUpdate,
        has_session: bool,
        metadata: &SessionMetadata,
    ) -> Result<ProfileOutcome, AuthError> {
        let update = normalize_profile(update)?;

        if let Some(username) = update.username.as_deref() {
            if self.db.identities().username_taken(username, subject_id).await? {
                return Err(AuthError::Conflict("Username already exists"));
            }
        }

        let before = self
            .db
            .identities()
            .get_by_id(subject_id)
            .await?
            .ok_or(AuthError::NotFound("User does not exist"))?;

        // Fields absent from the request keep their stored values.
        let update = ProfileUpdate {
            name: update.name.or_else(|| before.name.clone()),
            username: update.username.or_else(|| before.username.clone()),
            gender: update.gender.or(before.gender),
            bio: update.bio.or_else(|| before.bio.clone()),
        };

        let identity = self
            .db
            .identities()
            .update_profile(subject_id, &update)
            .await
            .map_err(|e| unique_violation_as(e, "Username already exists"))?
            .ok_or(AuthError::NotFound("User does not exist"))?;

        let snapshot = IdentitySnapshot::from(&identity);
        self.cache.set(&snapshot).await;

        let mut cookies = Vec::new();
        if identity.setup_complete {
            let now = self.clock.now();
            let access = self.codec.issue_access(subject_id, now)?;
            cookies.push(self.cookies.access(&access.token));

            if !before.setup_complete && !has_session {
                cookies.extend(self.open_session(subject_id, metadata, now).await?);
                info!(subject_id, "Profile setup completed, session opened");
            }
        }

        Ok(ProfileOutcome {
            identity: snapshot,
            cookies,
        })
    }

    /// The caller's live sessions, flagging the one this request came from.
    pub async fn list_sessions(
        &self,
        subject_id: &str,
        current_session: Option<&str>,
    ) -> Result<Vec<SessionSummary>, AuthError> {
        let records = self
            .db
            .sessions()
            .list_by_subject(subject_id, self.clock.now())
            .await?;

        Ok(records
            .into_iter()
            .map(|record| SessionSummary {
                current: current_session == Some(record.session_id.as_str()),
                session_id: record.session_id,
                device: record.device,
                ip_address: record.ip_address,
                last_used_at: record.last_used_at,
                created_at: record.created_at,
                expires_at: record.expires_at,
            })
            .collect())
    }

    /// Delete every expired session.
    pub async fn sweep_expired(&self) -> Result<u64, sqlx::Error> {
        self.db.sessions().sweep_expired(self.clock.now()).await
    }
}

/// Subject of a correctly signed token, whether or not it has expired.
fn signed_subject(verified: Result<String, JwtError>, token: &str) -> Option<String> {
    match verified {
        Ok(subject) => Some(subject),
        Err(JwtError::Expired) => UnsafeDecode::claims(token).ok().map(|c| c.sub),
        Err(_) => None,
    }
}

fn unique_violation_as(e: sqlx::Error, message: &'static str) -> AuthError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AuthError::Conflict(message),
        _ => AuthError::Database(e),
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LENGTH
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
        && !email.chars().any(char::is_whitespace);
    if !valid {
        return Err(AuthError::BadRequest("Invalid email address".to_string()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&len) {
        return Err(AuthError::BadRequest(format!(
            "Password must be between {} and {} characters",
            MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Trim fields, drop empty ones, lowercase the username and check lengths.
fn normalize_profile(update: ProfileUpdate) -> Result<ProfileUpdate, AuthError> {
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let username = update
        .username
        .map(|u| u.split_whitespace().collect::<String>().to_lowercase())
        .filter(|u| !u.is_empty());
    if let Some(username) = username.as_deref() {
        let len = username.chars().count();
        if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len)
            || !username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(AuthError::BadRequest(format!(
                "Username must be {}-{} letters, digits, '_' or '.'",
                MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
            )));
        }
    }

    let name = clean(update.name);
    if name.as_deref().is_some_and(|n| n.chars().count() > MAX_NAME_LENGTH) {
        return Err(AuthError::BadRequest("Name is too long".to_string()));
    }

    let bio = clean(update.bio);
    if bio.as_deref().is_some_and(|b| b.chars().count() > MAX_BIO_LENGTH) {
        return Err(AuthError::BadRequest("Bio is too long".to_string()));
    }

    Ok(ProfileUpdate {
        name,
        username,
        gender: update.gender,
        bio,
    })
}
