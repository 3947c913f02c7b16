//! Identity records and the snapshot exposed to request handlers.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct IdentityStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Male" => Some(Gender::Male),
            "Female" => Some(Gender::Female),
            "Other" => Some(Gender::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub gender: Option<Gender>,
    pub bio: Option<String>,
    pub setup_complete: bool,
}

/// An identity together with its stored password hash. Only sign-in sees this.
#[derive(Debug, Clone)]
pub struct IdentityCredentials {
    pub identity: Identity,
    pub password_hash: String,
}

/// How a caller names themselves at sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Login {
    Email(String),
    Username(String),
}

/// Cacheable view of an identity. Profile fields stay hidden until setup is
/// complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub setup: bool,
}

impl From<&Identity> for IdentitySnapshot {
    fn from(identity: &Identity) -> Self {
        if identity.setup_complete {
            Self {
                id: identity.id.clone(),
                email: identity.email.clone(),
                username: identity.username.clone(),
                name: identity.name.clone(),
                gender: identity.gender,
                bio: identity.bio.clone(),
                setup: true,
            }
        } else {
            Self {
                id: identity.id.clone(),
                email: identity.email.clone(),
                username: None,
                name: None,
                gender: None,
                bio: None,
                setup: false,
            }
        }
    }
}

/// New profile values. Setup completes once name, username and gender are
/// all present.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub username: Option<String>,
    pub gender: Option<Gender>,
    pub bio: Option<String>,
}

impl ProfileUpdate {
    pub fn completes_setup(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        filled(&self.name) && filled(&self.username) && self.gender.is_some()
    }
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: String,
    email: String,
    username: Option<String>,
    name: Option<String>,
    gender: Option<String>,
    bio: Option<String>,
    setup_complete: i32,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            username: row.username,
            name: row.name,
            gender: row.gender.as_deref().and_then(Gender::parse),
            bio: row.bio,
            setup_complete: row.setup_complete != 0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialsRow {
    #[sqlx(flatten)]
    identity: IdentityRow,
    password_hash: String,
}

impl IdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new identity with setup incomplete.
    pub async fn create(&self, id: &str, email: &str, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO identities (id, email, password_hash) VALUES (?, ?, ?)")
            .bind(id)
            .bind(email)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM identities WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Check whether a username belongs to anyone other than `except_id`.
    pub async fn username_taken(&self, username: &str, except_id: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) =
            sqlx::query_as("SELECT COUNT(*) FROM identities WHERE username = ? AND id != ?")
                .bind(username)
                .bind(except_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 > 0)
    }

    /// Get an identity by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Identity>, sqlx::Error> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, email, username, name, gender, bio, setup_complete FROM identities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Identity::from))
    }

    /// Get an identity and its password hash by email or username.
    pub async fn get_credentials(&self, login: &Login) -> Result<Option<IdentityCredentials>, sqlx::Error> {
        let query = match login {
            Login::Email(_) => {
                "SELECT id, email, username, name, gender, bio, setup_complete, password_hash FROM identities WHERE email = ?"
            }
            Login::Username(_) => {
                "SELECT id, email, username, name, gender, bio, setup_complete, password_hash FROM identities WHERE username = ?"
            }
        };
        let value = match login {
            Login::Email(v) | Login::Username(v) => v.as_str(),
        };

        let row: Option<CredentialsRow> = sqlx::query_as(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| IdentityCredentials {
            identity: Identity::from(row.identity),
            password_hash: row.password_hash,
        }))
    }

    pub async fn get_password_hash(&self, id: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT password_hash FROM identities WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(hash,)| hash))
    }

    /// Replace the stored password hash. Returns false if the identity does
    /// not exist.
    pub async fn update_password(&self, id: &str, password_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE identities SET password_hash = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the profile fields and recompute the setup flag.
    /// Returns the updated identity, or None if it does not exist.
    pub async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<Identity>, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE identities SET name = ?, username = ?, gender = ?, bio = ?, setup_complete = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(update.name.as_deref())
        .bind(update.username.as_deref())
        .bind(update.gender.map(|g| g.as_str()))
        .bind(update.bio.as_deref())
        .bind(update.completes_setup() as i32)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    /// Delete an identity by ID. Its sessions go with it.
    pub async fn delete(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM identities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn full_profile() -> ProfileUpdate {
        ProfileUpdate {
            name: Some("Alice".to_string()),
            username: Some("alice".to_string()),
            gender: Some(Gender::Female),
            bio: None,
        }
    }

    #[test]
    fn test_snapshot_hides_profile_until_setup() {
        let mut identity = Identity {
            id: "uuid-1".to_string(),
            email: "alice@example.com".to_string(),
            username: Some("alice".to_string()),
            name: Some("Alice".to_string()),
            gender: Some(Gender::Female),
            bio: Some("hi".to_string()),
            setup_complete: false,
        };

        let snapshot = IdentitySnapshot::from(&identity);
        assert!(snapshot.username.is_none());
        assert!(snapshot.name.is_none());
        assert!(!snapshot.setup);

        identity.setup_complete = true;
        let snapshot = IdentitySnapshot::from(&identity);
        assert_eq!(snapshot.username.as_deref(), Some("alice"));
        assert_eq!(snapshot.bio.as_deref(), Some("hi"));
        assert!(snapshot.setup);
    }

    #[test]
    fn test_completes_setup_needs_name_username_gender() {
        assert!(full_profile().completes_setup());

        let mut missing_gender = full_profile();
        missing_gender.gender = None;
        assert!(!missing_gender.completes_setup());

        let mut empty_name = full_profile();
        empty_name.name = Some(String::new());
        assert!(!empty_name.completes_setup());
    }

    #[tokio::test]
    async fn test_get_credentials_by_email_or_username() {
        let db = Database::open(":memory:").await.unwrap();
        let store = db.identities();
        store.create("uuid-1", "alice@example.com", "hash").await.unwrap();
        store.update_profile("uuid-1", &full_profile()).await.unwrap();

        let by_email = store
            .get_credentials(&Login::Email("alice@example.com".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.identity.id, "uuid-1");
        assert_eq!(by_email.password_hash, "hash");

        let by_username = store
            .get_credentials(&Login::Username("alice".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_username.identity.id, "uuid-1");

        assert!(
            store
                .get_credentials(&Login::Username("bob".to_string()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_profile_sets_setup_flag() {
        let db = Database::open(":memory:").await.unwrap();
        let store = db.identities();
        store.create("uuid-1", "alice@example.com", "hash").await.unwrap();

        let partial = ProfileUpdate {
            name: Some("Alice".to_string()),
            ..Default::default()
        };
        let identity = store.update_profile("uuid-1", &partial).await.unwrap().unwrap();
        assert!(!identity.setup_complete);

        let identity = store
            .update_profile("uuid-1", &full_profile())
            .await
            .unwrap()
            .unwrap();
        assert!(identity.setup_complete);
        assert_eq!(identity.gender, Some(Gender::Female));

        assert!(
            store
                .update_profile("missing", &full_profile())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_password_replaces_hash() {
        let db = Database::open(":memory:").await.unwrap();
        let store = db.identities();
        store.create("uuid-1", "alice@example.com", "old-hash").await.unwrap();

        assert!(store.update_password("uuid-1", "new-hash").await.unwrap());
        assert_eq!(
            store.get_password_hash("uuid-1").await.unwrap().as_deref(),
            Some("new-hash")
        );

        assert!(!store.update_password("missing", "hash").await.unwrap());
        assert!(store.get_password_hash("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_username_taken_ignores_own_identity() {
        let db = Database::open(":memory:").await.unwrap();
        let store = db.identities();
        store.create("uuid-1", "alice@example.com", "hash").await.unwrap();
        store.create("uuid-2", "bob@example.com", "hash").await.unwrap();
        store.update_profile("uuid-1", &full_profile()).await.unwrap();

        assert!(!store.username_taken("alice", "uuid-1").await.unwrap());
        assert!(store.username_taken("alice", "uuid-2").await.unwrap());
        assert!(store.email_exists("alice@example.com").await.unwrap());
        assert!(!store.email_exists("carol@example.com").await.unwrap());
    }
}
