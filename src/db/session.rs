use sqlx::sqlite::SqlitePool;

/// Where a session was opened from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    pub device: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRecord {
    pub session_id: String,
    pub subject_id: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub device: Option<String>,
    pub ip_address: Option<String>,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new session and return its generated session id.
    pub async fn create(
        &self,
        subject_id: &str,
        refresh_token: &str,
        expires_at: u64,
        metadata: &SessionMetadata,
        now: u64,
    ) -> Result<String, sqlx::Error> {
        let session_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sessions (session_id, subject_id, refresh_token, expires_at, device, ip_address, last_used_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session_id)
        .bind(subject_id)
        .bind(refresh_token)
        .bind(expires_at as i64)
        .bind(metadata.device.as_deref())
        .bind(metadata.ip_address.as_deref())
        .bind(now as i64)
        .bind(now as i64)
        .execute(&self.pool)
        .await?;
        Ok(session_id)
    }

    /// Look up a session by the exact (session id, refresh token) pair.
    pub async fn find_by_credential(
        &self,
        session_id: &str,
        refresh_token: &str,
    ) -> Result<Option<SessionRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT session_id, subject_id, refresh_token, expires_at, device, ip_address, last_used_at, created_at FROM sessions WHERE session_id = ? AND refresh_token = ?",
        )
        .bind(session_id)
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await
    }

    /// Swap the stored refresh token, but only if it still equals `old_token`.
    /// Returns false when another caller rotated (or deleted) the session first.
    pub async fn rotate(
        &self,
        session_id: &str,
        old_token: &str,
        new_token: &str,
        new_expires_at: u64,
        ip_address: Option<&str>,
        now: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET refresh_token = ?, expires_at = ?, ip_address = COALESCE(?, ip_address), last_used_at = ? WHERE session_id = ? AND refresh_token = ?",
        )
        .bind(new_token)
        .bind(new_expires_at as i64)
        .bind(ip_address)
        .bind(now as i64)
        .bind(session_id)
        .bind(old_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Record use of a session without changing its credential.
    pub async fn touch(
        &self,
        session_id: &str,
        ip_address: Option<&str>,
        now: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sessions SET last_used_at = ?, ip_address = COALESCE(?, ip_address) WHERE session_id = ?",
        )
        .bind(now as i64)
        .bind(ip_address)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete the session matching all three values. Deleting a missing
    /// session is not an error.
    pub async fn delete(
        &self,
        subject_id: &str,
        session_id: &str,
        refresh_token: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE subject_id = ? AND session_id = ? AND refresh_token = ?",
        )
        .bind(subject_id)
        .bind(session_id)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every session whose expiry has passed. Returns the number removed.
    pub async fn sweep_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Live sessions of a subject, most recently used first.
    pub async fn list_by_subject(
        &self,
        subject_id: &str,
        now: u64,
    ) -> Result<Vec<SessionRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT session_id, subject_id, refresh_token, expires_at, device, ip_address, last_used_at, created_at FROM sessions WHERE subject_id = ? AND expires_at > ? ORDER BY COALESCE(last_used_at, created_at) DESC, id DESC",
        )
        .bind(subject_id)
        .bind(now as i64)
        .fetch_all(&self.pool)
        .await
    }
}
