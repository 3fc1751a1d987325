use crate::content::error::{ContentError, ContentResult};
use crate::content::types::{ContentFilter, RecordedContent};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

/// Recorded content rows, one per finished upload
#[derive(Clone)]
pub struct ContentStore {
    pool: SqlitePool,
}

impl ContentStore {
    /// Create content store on an existing pool, initializing the schema
    pub async fn new(pool: SqlitePool) -> ContentResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recorded_contents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                course_id TEXT,
                batch_id TEXT,
                teacher_id TEXT NOT NULL,
                video_url TEXT NOT NULL,
                thumbnail_url TEXT,
                duration REAL,
                file_size INTEGER NOT NULL,
                format TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_recorded_contents_course ON recorded_contents(course_id, batch_id)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Create content store with in-memory database (for testing)
    pub async fn new_in_memory() -> ContentResult<Self> {
        let pool = crate::db::connect_in_memory().await?;
        Self::new(pool).await
    }

    pub async fn create(&self, record: &RecordedContent) -> ContentResult<()> {
        let metadata_json = serde_json::to_string(&record.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO recorded_contents
            (id, title, description, course_id, batch_id, teacher_id, video_url, thumbnail_url,
             duration, file_size, format, status, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.course_id)
        .bind(&record.batch_id)
        .bind(&record.teacher_id)
        .bind(&record.video_url)
        .bind(&record.thumbnail_url)
        .bind(record.duration)
        .bind(record.file_size as i64)
        .bind(&record.format)
        .bind(record.status.as_str())
        .bind(metadata_json)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(content_id = %record.id, status = %record.status, "Recorded content");
        Ok(())
    }

    pub async fn load(&self, id: &str) -> ContentResult<Option<RecordedContent>> {
        let row = sqlx::query("SELECT * FROM recorded_contents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(content_from_row).transpose()
    }

    pub async fn get(&self, id: &str) -> ContentResult<RecordedContent> {
        self.load(id)
            .await?
            .ok_or_else(|| ContentError::NotFound(id.to_string()))
    }

    /// Overwrite every mutable column of an existing record
    pub async fn update(&self, record: &RecordedContent) -> ContentResult<()> {
        let metadata_json = serde_json::to_string(&record.metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE recorded_contents
            SET title = ?, description = ?, course_id = ?, batch_id = ?, video_url = ?,
                thumbnail_url = ?, duration = ?, file_size = ?, format = ?, status = ?,
                metadata = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.course_id)
        .bind(&record.batch_id)
        .bind(&record.video_url)
        .bind(&record.thumbnail_url)
        .bind(record.duration)
        .bind(record.file_size as i64)
        .bind(&record.format)
        .bind(record.status.as_str())
        .bind(metadata_json)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ContentError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> ContentResult<bool> {
        let result = sqlx::query("DELETE FROM recorded_contents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records matching every set field of `filter`, newest first
    pub async fn list(&self, filter: &ContentFilter) -> ContentResult<Vec<RecordedContent>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM recorded_contents WHERE 1 = 1");

        if let Some(course_id) = &filter.course_id {
            query.push(" AND course_id = ").push_bind(course_id);
        }
        if let Some(batch_id) = &filter.batch_id {
            query.push(" AND batch_id = ").push_bind(batch_id);
        }
        if let Some(teacher_id) = &filter.teacher_id {
            query.push(" AND teacher_id = ").push_bind(teacher_id);
        }
        query.push(" ORDER BY created_at DESC, rowid DESC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(content_from_row).collect()
    }

    pub async fn count(&self) -> ContentResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM recorded_contents")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }
}

fn content_from_row(row: &SqliteRow) -> ContentResult<RecordedContent> {
    Ok(RecordedContent {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        course_id: row.try_get("course_id")?,
        batch_id: row.try_get("batch_id")?,
        teacher_id: row.try_get("teacher_id")?,
        video_url: row.try_get("video_url")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        duration: row.try_get("duration")?,
        file_size: row.try_get::<i64, _>("file_size")? as u64,
        format: row.try_get("format")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata")?)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::types::ContentStatus;
    use crate::session::UploadMetadata;

    fn create_test_record(id: &str, course_id: &str, teacher_id: &str) -> RecordedContent {
        let metadata = UploadMetadata {
            course_id: Some(course_id.to_string()),
            batch_id: Some("batch-a".to_string()),
            ..Default::default()
        };
        RecordedContent::local(
            id.to_string(),
            teacher_id.to_string(),
            "lecture.mp4".to_string(),
            &format!("{id}_lecture.mp4"),
            format!("/data/videos/{id}_lecture.mp4"),
            1024,
            &metadata,
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = ContentStore::new_in_memory().await.unwrap();
        let record = create_test_record("c-1", "course-1", "teacher-1");
        store.create(&record).await.unwrap();

        let loaded = store.get("c-1").await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = ContentStore::new_in_memory().await.unwrap();
        assert!(matches!(
            store.get("nope").await.unwrap_err(),
            ContentError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_update() {
        let store = ContentStore::new_in_memory().await.unwrap();
        let mut record = create_test_record("c-1", "course-1", "teacher-1");
        store.create(&record).await.unwrap();

        record.mark_cloud_failed(crate::cloud::CloudProviderKind::S3, "bucket unreachable");
        store.update(&record).await.unwrap();

        let loaded = store.get("c-1").await.unwrap();
        assert_eq!(loaded.status, ContentStatus::Local);
        assert!(loaded.metadata.cloud_upload_failed);
        assert_eq!(loaded.metadata.cloud_error.as_deref(), Some("bucket unreachable"));
    }

    #[tokio::test]
    async fn test_update_missing() {
        let store = ContentStore::new_in_memory().await.unwrap();
        let record = create_test_record("c-1", "course-1", "teacher-1");
        assert!(matches!(
            store.update(&record).await.unwrap_err(),
            ContentError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list_filters_newest_first() {
        let store = ContentStore::new_in_memory().await.unwrap();
        store
            .create(&create_test_record("c-1", "course-1", "teacher-1"))
            .await
            .unwrap();
        store
            .create(&create_test_record("c-2", "course-1", "teacher-2"))
            .await
            .unwrap();
        store
            .create(&create_test_record("c-3", "course-2", "teacher-1"))
            .await
            .unwrap();

        let course1 = store
            .list(&ContentFilter {
                course_id: Some("course-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = course1.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-2", "c-1"]);

        let teacher1 = store
            .list(&ContentFilter {
                teacher_id: Some("teacher-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(teacher1.len(), 2);

        assert_eq!(store.list(&ContentFilter::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = ContentStore::new_in_memory().await.unwrap();
        store
            .create(&create_test_record("c-1", "course-1", "teacher-1"))
            .await
            .unwrap();

        assert!(store.delete("c-1").await.unwrap());
        assert!(!store.delete("c-1").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
