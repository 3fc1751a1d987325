use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{SessionProgress, SessionStatus, UploadSession};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::time::Duration;

/// One received chunk as recorded in the chunk set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub chunk_index: u32,
    pub size: u64,
    pub checksum: String,
}

/// Upload sessions keyed by upload id.
///
/// Received chunk indices live in their own table with `(upload_id, chunk_index)`
/// as primary key, so a resent chunk replaces its row instead of adding one.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Create session store on an existing pool, initializing the schema
    pub async fn new(pool: SqlitePool) -> SessionResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_sessions (
                upload_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                metadata TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_chunks (
                upload_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                size INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                received_at INTEGER NOT NULL,
                PRIMARY KEY (upload_id, chunk_index)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_upload_sessions_user ON upload_sessions(user_id)")
            .execute(&pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_sessions_expires ON upload_sessions(expires_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Create session store with in-memory database (for testing)
    pub async fn new_in_memory() -> SessionResult<Self> {
        let pool = crate::db::connect_in_memory().await?;
        Self::new(pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a freshly initialized session
    pub async fn insert(&self, session: &UploadSession) -> SessionResult<()> {
        let metadata_json = serde_json::to_string(&session.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO upload_sessions
            (upload_id, user_id, file_name, file_size, total_chunks, metadata, status, created_at, updated_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.upload_id)
        .bind(&session.user_id)
        .bind(&session.file_name)
        .bind(session.file_size as i64)
        .bind(session.total_chunks as i64)
        .bind(metadata_json)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        for chunk_index in &session.uploaded_chunks {
            self.insert_chunk_row(&session.upload_id, *chunk_index, 0, "").await?;
        }

        Ok(())
    }

    /// Load session by ID, including its received chunk set
    pub async fn load(&self, upload_id: &str) -> SessionResult<Option<UploadSession>> {
        let row = sqlx::query("SELECT * FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut session = session_from_row(&row)?;
        session.uploaded_chunks = self.chunk_indices(upload_id).await?;
        Ok(Some(session))
    }

    /// Load session by ID, failing with `NotFound` when absent
    pub async fn get(&self, upload_id: &str) -> SessionResult<UploadSession> {
        self.load(upload_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(upload_id.to_string()))
    }

    /// Add a chunk index to the session's set and push its expiry forward.
    ///
    /// Only open sessions accept chunks. Returns the number of distinct indices held.
    pub async fn record_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        size: u64,
        checksum: &str,
        ttl: Duration,
    ) -> SessionResult<u32> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT OR REPLACE INTO upload_chunks (upload_id, chunk_index, size, checksum, received_at)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM upload_sessions
                WHERE upload_id = ? AND status IN ('initialized', 'receiving')
            )
            "#,
        )
        .bind(upload_id)
        .bind(chunk_index as i64)
        .bind(size as i64)
        .bind(checksum)
        .bind(now)
        .bind(upload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.status(upload_id).await? {
                None => Err(SessionError::NotFound(upload_id.to_string())),
                Some(status) => Err(SessionError::InvalidState(format!(
                    "Upload {upload_id} no longer accepts chunks (status: {status})"
                ))),
            };
        }

        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'receiving', updated_at = ?, expires_at = ?
            WHERE upload_id = ? AND status IN ('initialized', 'receiving')
            "#,
        )
        .bind(now)
        .bind(now + ttl.as_secs() as i64)
        .bind(upload_id)
        .execute(&self.pool)
        .await?;

        self.chunk_count(upload_id).await
    }

    /// Received chunks with their recorded sizes and checksums, ordered by index
    pub async fn chunk_records(&self, upload_id: &str) -> SessionResult<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            "SELECT chunk_index, size, checksum FROM upload_chunks WHERE upload_id = ? ORDER BY chunk_index",
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(ChunkRecord {
                chunk_index: row.try_get::<i64, _>("chunk_index")? as u32,
                size: row.try_get::<i64, _>("size")? as u64,
                checksum: row.try_get("checksum")?,
            });
        }
        Ok(records)
    }

    /// Drop indices from the chunk set, e.g. when their files vanished from disk
    pub async fn remove_chunks(&self, upload_id: &str, indices: &[u32]) -> SessionResult<()> {
        for index in indices {
            sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ? AND chunk_index = ?")
                .bind(upload_id)
                .bind(*index as i64)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Atomically move a session from one of `from` to `to`.
    ///
    /// Returns `false` when the session is missing or in another status.
    pub async fn claim(
        &self,
        upload_id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> SessionResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE upload_sessions SET status = ?, updated_at = ? WHERE upload_id = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(upload_id);
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Update session status, checking the transition against the current status
    pub async fn update_status(&self, upload_id: &str, status: SessionStatus) -> SessionResult<()> {
        let current = self
            .status(upload_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(upload_id.to_string()))?;

        if !current.can_transition_to(status) {
            return Err(SessionError::InvalidState(format!(
                "Cannot move upload {upload_id} from {current} to {status}"
            )));
        }

        if !self.claim(upload_id, &[current], status).await? {
            return Err(SessionError::InvalidState(format!(
                "Upload {upload_id} changed status concurrently"
            )));
        }
        Ok(())
    }

    pub async fn status(&self, upload_id: &str) -> SessionResult<Option<SessionStatus>> {
        let row = sqlx::query("SELECT status FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("status")?.parse()?)),
            None => Ok(None),
        }
    }

    /// Progress summaries of the sessions owned by a user
    pub async fn list_for_user(&self, user_id: &str) -> SessionResult<Vec<SessionProgress>> {
        let rows = sqlx::query("SELECT * FROM upload_sessions WHERE user_id = ? ORDER BY updated_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let mut session = session_from_row(&row)?;
            session.uploaded_chunks = self.chunk_indices(&session.upload_id).await?;
            summaries.push(SessionProgress::from_session(&session));
        }
        Ok(summaries)
    }

    /// Delete session and its chunk set
    pub async fn delete(&self, upload_id: &str) -> SessionResult<bool> {
        sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Open sessions whose expiry has passed. Sessions being merged or uploaded are left alone.
    pub async fn expired(&self, now: i64) -> SessionResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT upload_id FROM upload_sessions WHERE expires_at <= ? AND status IN ('initialized', 'receiving')",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("upload_id").map_err(SessionError::from))
            .collect()
    }

    /// Claim and delete every expired open session, returning the ids removed.
    ///
    /// A session claimed by a concurrent finalize or cancel in the meantime is skipped.
    pub async fn cleanup_expired(&self, now: i64) -> SessionResult<Vec<String>> {
        let mut removed = Vec::new();
        for upload_id in self.expired(now).await? {
            if self
                .claim(&upload_id, &SessionStatus::OPEN, SessionStatus::Cancelled)
                .await?
            {
                self.delete(&upload_id).await?;
                removed.push(upload_id);
            }
        }
        Ok(removed)
    }

    /// Sessions left in `merging` or `uploading` since `cutoff` or earlier
    pub async fn stale_claims(&self, cutoff: i64) -> SessionResult<Vec<(String, SessionStatus)>> {
        let rows = sqlx::query(
            "SELECT upload_id, status FROM upload_sessions WHERE updated_at <= ? AND status IN ('merging', 'uploading')",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut claims = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            claims.push((row.try_get("upload_id")?, status.parse()?));
        }
        Ok(claims)
    }

    /// Move a claim untouched since `cutoff` to `to`, with a new expiry.
    ///
    /// Returns `false` if the session moved on or was touched after `cutoff`.
    pub async fn reset_stale_claim(
        &self,
        upload_id: &str,
        from: SessionStatus,
        to: SessionStatus,
        cutoff: i64,
        expires_at: i64,
    ) -> SessionResult<bool> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET status = ?, updated_at = ?, expires_at = ? WHERE upload_id = ? AND status = ? AND updated_at <= ?",
        )
        .bind(to.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(expires_at)
        .bind(upload_id)
        .bind(from.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get session count
    pub async fn count(&self) -> SessionResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM upload_sessions")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    /// Check if session exists
    pub async fn exists(&self, upload_id: &str) -> SessionResult<bool> {
        Ok(self.status(upload_id).await?.is_some())
    }

    async fn chunk_count(&self, upload_id: &str) -> SessionResult<u32> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM upload_chunks WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>("count")? as u32)
    }

    async fn chunk_indices(&self, upload_id: &str) -> SessionResult<BTreeSet<u32>> {
        let rows = sqlx::query("SELECT chunk_index FROM upload_chunks WHERE upload_id = ?")
            .bind(upload_id)
            .fetch_all(&self.pool)
            .await?;

        let mut indices = BTreeSet::new();
        for row in rows {
            indices.insert(row.try_get::<i64, _>("chunk_index")? as u32);
        }
        Ok(indices)
    }

    async fn insert_chunk_row(
        &self,
        upload_id: &str,
        chunk_index: u32,
        size: u64,
        checksum: &str,
    ) -> SessionResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO upload_chunks (upload_id, chunk_index, size, checksum, received_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(upload_id)
        .bind(chunk_index as i64)
        .bind(size as i64)
        .bind(checksum)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn session_from_row(row: &SqliteRow) -> SessionResult<UploadSession> {
    Ok(UploadSession {
        upload_id: row.try_get("upload_id")?,
        user_id: row.try_get("user_id")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get::<i64, _>("file_size")? as u64,
        total_chunks: row.try_get::<i64, _>("total_chunks")? as u32,
        uploaded_chunks: BTreeSet::new(),
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::UploadMetadata;

    const TTL: Duration = Duration::from_secs(3600);

    fn create_test_session(upload_id: &str, total_chunks: u32) -> UploadSession {
        UploadSession::new(
            upload_id.to_string(),
            "teacher-1".to_string(),
            "lecture.mp4".to_string(),
            3_000_000,
            total_chunks,
            UploadMetadata {
                title: Some("Week 1".to_string()),
                ..Default::default()
            },
            TTL,
        )
    }

    #[tokio::test]
    async fn test_store_creation() {
        let store = SessionStore::new_in_memory().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let session = create_test_session("up-1", 3);
        store.insert(&session).await.unwrap();

        let loaded = store.load("up-1").await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "teacher-1");
        assert_eq!(loaded.file_size, 3_000_000);
        assert_eq!(loaded.total_chunks, 3);
        assert_eq!(loaded.status, SessionStatus::Initialized);
        assert_eq!(loaded.metadata.title.as_deref(), Some("Week 1"));
        assert!(loaded.uploaded_chunks.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_chunk_is_set_based() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.insert(&create_test_session("up-1", 3)).await.unwrap();

        assert_eq!(store.record_chunk("up-1", 0, 10, "aa", TTL).await.unwrap(), 1);
        assert_eq!(store.record_chunk("up-1", 0, 12, "bb", TTL).await.unwrap(), 1);
        assert_eq!(store.record_chunk("up-1", 2, 10, "cc", TTL).await.unwrap(), 2);

        let loaded = store.get("up-1").await.unwrap();
        assert_eq!(loaded.status, SessionStatus::Receiving);
        assert_eq!(loaded.uploaded_chunks.iter().copied().collect::<Vec<_>>(), vec![0, 2]);

        let records = store.chunk_records("up-1").await.unwrap();
        assert_eq!(records[0].size, 12);
        assert_eq!(records[0].checksum, "bb");
    }

    #[tokio::test]
    async fn test_record_chunk_missing_session() {
        let store = SessionStore::new_in_memory().await.unwrap();
        let err = store.record_chunk("ghost", 0, 1, "", TTL).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_chunk_rejected_while_merging() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.insert(&create_test_session("up-1", 2)).await.unwrap();
        assert!(store
            .claim("up-1", &SessionStatus::OPEN, SessionStatus::Merging)
            .await
            .unwrap());

        let err = store.record_chunk("up-1", 0, 1, "", TTL).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_claim_only_once() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.insert(&create_test_session("up-1", 2)).await.unwrap();

        let first = store
            .claim("up-1", &SessionStatus::OPEN, SessionStatus::Merging)
            .await
            .unwrap();
        let second = store
            .claim("up-1", &SessionStatus::OPEN, SessionStatus::Cancelled)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.status("up-1").await.unwrap(), Some(SessionStatus::Merging));
    }

    #[tokio::test]
    async fn test_update_status_checks_transition() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.insert(&create_test_session("up-1", 2)).await.unwrap();

        let err = store
            .update_status("up-1", SessionStatus::Uploading)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));

        store.update_status("up-1", SessionStatus::Merging).await.unwrap();
        store.update_status("up-1", SessionStatus::Uploading).await.unwrap();
        assert_eq!(
            store.status("up-1").await.unwrap(),
            Some(SessionStatus::Uploading)
        );
    }

    #[tokio::test]
    async fn test_remove_chunks() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.insert(&create_test_session("up-1", 3)).await.unwrap();
        for i in 0..3 {
            store.record_chunk("up-1", i, 1, "", TTL).await.unwrap();
        }

        store.remove_chunks("up-1", &[1]).await.unwrap();
        let loaded = store.get("up-1").await.unwrap();
        assert_eq!(loaded.missing_chunks(), vec![1]);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.insert(&create_test_session("up-1", 2)).await.unwrap();
        store.record_chunk("up-1", 0, 1, "", TTL).await.unwrap();

        assert!(store.delete("up-1").await.unwrap());
        assert!(!store.exists("up-1").await.unwrap());
        assert!(store.chunk_records("up-1").await.unwrap().is_empty());
        assert!(!store.delete("up-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_skips_claimed_sessions() {
        let store = SessionStore::new_in_memory().await.unwrap();

        let mut stale = create_test_session("stale", 2);
        stale.expires_at = chrono::Utc::now().timestamp() - 10;
        store.insert(&stale).await.unwrap();

        let mut merging = create_test_session("merging", 2);
        merging.expires_at = chrono::Utc::now().timestamp() - 10;
        store.insert(&merging).await.unwrap();
        store
            .claim("merging", &SessionStatus::OPEN, SessionStatus::Merging)
            .await
            .unwrap();

        store.insert(&create_test_session("fresh", 2)).await.unwrap();

        let expired = store.expired(chrono::Utc::now().timestamp()).await.unwrap();
        assert_eq!(expired, vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = SessionStore::new_in_memory().await.unwrap();

        let mut stale = create_test_session("stale", 2);
        stale.expires_at = chrono::Utc::now().timestamp() - 10;
        store.insert(&stale).await.unwrap();
        store.insert(&create_test_session("fresh", 2)).await.unwrap();

        let removed = store
            .cleanup_expired(chrono::Utc::now().timestamp())
            .await
            .unwrap();
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(!store.exists("stale").await.unwrap());
        assert!(store.exists("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_claims_are_reset() {
        let store = SessionStore::new_in_memory().await.unwrap();
        store.insert(&create_test_session("merging", 2)).await.unwrap();
        store.insert(&create_test_session("open", 2)).await.unwrap();
        assert!(store
            .claim("merging", &SessionStatus::OPEN, SessionStatus::Merging)
            .await
            .unwrap());

        let now = chrono::Utc::now().timestamp();
        assert!(store.stale_claims(now - 60).await.unwrap().is_empty());

        let claims = store.stale_claims(now).await.unwrap();
        assert_eq!(claims, vec![("merging".to_string(), SessionStatus::Merging)]);

        // Wrong source status leaves the claim alone
        assert!(!store
            .reset_stale_claim("merging", SessionStatus::Uploading, SessionStatus::Receiving, now, now)
            .await
            .unwrap());
        assert!(store
            .reset_stale_claim("merging", SessionStatus::Merging, SessionStatus::Receiving, now, now + 60)
            .await
            .unwrap());

        let session = store.get("merging").await.unwrap();
        assert_eq!(session.status, SessionStatus::Receiving);
        assert_eq!(session.expires_at, now + 60);
    }

    #[tokio::test]
    async fn test_list_for_user() {
        let store = SessionStore::new_in_memory().await.unwrap();
        for i in 0..3 {
            store
                .insert(&create_test_session(&format!("up-{i}"), 4))
                .await
                .unwrap();
        }
        let mut other = create_test_session("up-other", 4);
        other.user_id = "teacher-2".to_string();
        store.insert(&other).await.unwrap();

        store.record_chunk("up-0", 1, 1, "", TTL).await.unwrap();

        let sessions = store.list_for_user("teacher-1").await.unwrap();
        assert_eq!(sessions.len(), 3);
        let up0 = sessions.iter().find(|s| s.upload_id == "up-0").unwrap();
        assert_eq!(up0.progress, 25.0);
        assert_eq!(up0.received_indices, vec![1]);
    }
}
