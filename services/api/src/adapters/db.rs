//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `LibraryStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Uniqueness (user email, progress per reader/document, sketch per
//! reader/document/page) lives in the schema, and every upsert is a single
//! `INSERT .. ON CONFLICT` statement, so concurrent first saves collapse into
//! one row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ebook_hub_core::domain::{
    Document, DocumentId, DocumentRecord, Highlight, NewHighlight, NewUser, ReadingProgress,
    Role, Sketch, User, UserId,
};
use ebook_hub_core::ports::{LibraryStore, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{error, info, warn};

/// Foreign-key violation.
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// Idempotent schema statements, run in order on every start. The
/// `cover_ref` column is added separately so older `documents` tables pick
/// it up.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        external_id TEXT NULL,
        role TEXT NOT NULL DEFAULT 'User' CHECK (role IN ('Admin', 'User')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS documents (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL CHECK (title <> ''),
        author TEXT NULL,
        asset_ref TEXT NOT NULL UNIQUE,
        uploaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    "ALTER TABLE documents ADD COLUMN IF NOT EXISTS cover_ref TEXT NULL",
    r#"CREATE TABLE IF NOT EXISTS reading_progress (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        document_id BIGINT NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
        last_position INTEGER NOT NULL CHECK (last_position >= 0),
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (user_id, document_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS highlights (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        document_id BIGINT NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
        selected_text TEXT NOT NULL CHECK (selected_text <> ''),
        note TEXT NULL,
        page_number INTEGER NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    "CREATE INDEX IF NOT EXISTS highlights_owner_idx ON highlights (user_id, document_id)",
    r#"CREATE TABLE IF NOT EXISTS sketches (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        document_id BIGINT NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
        page_number INTEGER NOT NULL,
        canvas_data TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (user_id, document_id, page_number)
    )"#,
];

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `LibraryStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates any missing tables, columns and indexes.
    pub async fn initialize(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Retries `initialize` a bounded number of times. Returns whether the
    /// schema is ready; the caller keeps serving either way.
    pub async fn initialize_with_retry(&self, attempts: u32, delay: Duration) -> bool {
        for attempt in 1..=attempts {
            match self.initialize().await {
                Ok(()) => {
                    info!("Database initialization successful.");
                    return true;
                }
                Err(e) if attempt == attempts => {
                    error!(
                        "Database could not be initialized after {} attempts: {}",
                        attempts, e
                    );
                }
                Err(e) => {
                    warn!(
                        "Database initialization attempt {} failed: {}. Retrying in {}s...",
                        attempt,
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        false
    }
}

fn map_db_error(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        sqlx::Error::Database(ref db) if db.code().as_deref() == Some(PG_FOREIGN_KEY_VIOLATION) => {
            PortError::NotFound(what())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    email: String,
    display_name: String,
    external_id: Option<String>,
    role: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        let role = self.role.parse::<Role>().map_err(PortError::Unexpected)?;
        Ok(User {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            external_id: self.external_id,
            role,
        })
    }
}

#[derive(FromRow)]
struct DocumentRow {
    id: i64,
    title: String,
    author: Option<String>,
    asset_ref: String,
    cover_ref: Option<String>,
    uploaded_at: DateTime<Utc>,
}
impl DocumentRow {
    fn to_domain(self) -> Document {
        Document {
            id: self.id,
            title: self.title,
            author: self.author,
            asset_ref: self.asset_ref,
            cover_ref: self.cover_ref,
            uploaded_at: self.uploaded_at,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    user_id: i64,
    document_id: i64,
    last_position: i32,
    updated_at: DateTime<Utc>,
}
impl ProgressRecord {
    fn to_domain(self) -> ReadingProgress {
        ReadingProgress {
            user_id: self.user_id,
            document_id: self.document_id,
            last_position: self.last_position,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct HighlightRecord {
    id: i64,
    user_id: i64,
    document_id: i64,
    selected_text: String,
    note: Option<String>,
    page_number: Option<i32>,
    created_at: DateTime<Utc>,
}
impl HighlightRecord {
    fn to_domain(self) -> Highlight {
        Highlight {
            id: self.id,
            user_id: self.user_id,
            document_id: self.document_id,
            selected_text: self.selected_text,
            note: self.note,
            page_number: self.page_number,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct SketchRecord {
    id: i64,
    user_id: i64,
    document_id: i64,
    page_number: i32,
    canvas_data: String,
    created_at: DateTime<Utc>,
}
impl SketchRecord {
    fn to_domain(self) -> Sketch {
        Sketch {
            id: self.id,
            user_id: self.user_id,
            document_id: self.document_id,
            page_number: self.page_number,
            canvas_data: self.canvas_data,
            created_at: self.created_at,
        }
    }
}

const DOCUMENT_COLUMNS: &str = "id, title, author, asset_ref, cover_ref, uploaded_at";
const HIGHLIGHT_COLUMNS: &str =
    "id, user_id, document_id, selected_text, note, page_number, created_at";
const SKETCH_COLUMNS: &str = "id, user_id, document_id, page_number, canvas_data, created_at";

//=========================================================================================
// `LibraryStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl LibraryStore for DbAdapter {
    async fn find_user_by_email(&self, email: &str) -> PortResult<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, display_name, external_id, role FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, || format!("User {} not found", email)))?;

        record.map(UserRecord::to_domain).transpose()
    }

    async fn get_or_create_user(&self, user: NewUser) -> PortResult<User> {
        sqlx::query(
            "INSERT INTO users (email, display_name, external_id, role) VALUES ($1, $2, $3, 'User') \
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.external_id)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, display_name, external_id, role FROM users WHERE email = $1",
        )
        .bind(&user.email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, || format!("User {} not found", user.email)))?;

        record.to_domain()
    }

    async fn list_documents(&self, search: Option<&str>) -> PortResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents \
             WHERE $1::TEXT IS NULL OR strpos(lower(title), lower($1)) > 0 \
             ORDER BY uploaded_at DESC, id DESC",
            DOCUMENT_COLUMNS
        );
        let records = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(search)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_error(e, || "Documents not found".to_string()))?;

        Ok(records.into_iter().map(DocumentRow::to_domain).collect())
    }

    async fn get_document(&self, document_id: DocumentId) -> PortResult<Document> {
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        let record = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, || format!("Document {} not found", document_id)))?;
        Ok(record.to_domain())
    }

    async fn insert_document(&self, record: DocumentRecord) -> PortResult<Document> {
        let sql = format!(
            "INSERT INTO documents (title, author, asset_ref, cover_ref, uploaded_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRow>(&sql)
            .bind(&record.title)
            .bind(&record.author)
            .bind(&record.asset_ref)
            .bind(&record.cover_ref)
            .bind(record.uploaded_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, || "Document insert returned no row".to_string()))?;
        Ok(row.to_domain())
    }

    async fn delete_document(&self, document_id: DocumentId) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, || format!("Document {} not found", document_id)))?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }
        Ok(())
    }

    async fn get_progress(
        &self,
        user_id: UserId,
        document_id: DocumentId,
    ) -> PortResult<Option<ReadingProgress>> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            "SELECT user_id, document_id, last_position, updated_at FROM reading_progress \
             WHERE user_id = $1 AND document_id = $2",
        )
        .bind(user_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_error(e, || format!("Progress for document {} not found", document_id)))?;
        Ok(record.map(ProgressRecord::to_domain))
    }

    async fn upsert_progress(&self, progress: ReadingProgress) -> PortResult<ReadingProgress> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            "INSERT INTO reading_progress (user_id, document_id, last_position, updated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, document_id) DO UPDATE \
             SET last_position = EXCLUDED.last_position, updated_at = EXCLUDED.updated_at \
             RETURNING user_id, document_id, last_position, updated_at",
        )
        .bind(progress.user_id)
        .bind(progress.document_id)
        .bind(progress.last_position)
        .bind(progress.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, || format!("Document {} not found", progress.document_id)))?;
        Ok(record.to_domain())
    }

    async fn list_highlights(
        &self,
        user_id: UserId,
        document_id: DocumentId,
    ) -> PortResult<Vec<Highlight>> {
        let sql = format!(
            "SELECT {} FROM highlights WHERE user_id = $1 AND document_id = $2 \
             ORDER BY page_number ASC NULLS LAST, id ASC",
            HIGHLIGHT_COLUMNS
        );
        let records = sqlx::query_as::<_, HighlightRecord>(&sql)
            .bind(user_id)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(records.into_iter().map(HighlightRecord::to_domain).collect())
    }

    async fn insert_highlight(
        &self,
        user_id: UserId,
        highlight: NewHighlight,
    ) -> PortResult<Highlight> {
        let sql = format!(
            "INSERT INTO highlights (user_id, document_id, selected_text, note, page_number) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            HIGHLIGHT_COLUMNS
        );
        let record = sqlx::query_as::<_, HighlightRecord>(&sql)
            .bind(user_id)
            .bind(highlight.document_id)
            .bind(&highlight.selected_text)
            .bind(&highlight.note)
            .bind(highlight.page_number)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_db_error(e, || format!("Document {} not found", highlight.document_id))
            })?;
        Ok(record.to_domain())
    }

    async fn list_sketches(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page_number: i32,
    ) -> PortResult<Vec<Sketch>> {
        let sql = format!(
            "SELECT {} FROM sketches WHERE user_id = $1 AND document_id = $2 AND page_number = $3",
            SKETCH_COLUMNS
        );
        let records = sqlx::query_as::<_, SketchRecord>(&sql)
            .bind(user_id)
            .bind(document_id)
            .bind(page_number)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(records.into_iter().map(SketchRecord::to_domain).collect())
    }

    async fn upsert_sketch(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page_number: i32,
        canvas_data: &str,
    ) -> PortResult<Sketch> {
        let sql = format!(
            "INSERT INTO sketches (user_id, document_id, page_number, canvas_data) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, document_id, page_number) DO UPDATE \
             SET canvas_data = EXCLUDED.canvas_data \
             RETURNING {}",
            SKETCH_COLUMNS
        );
        let record = sqlx::query_as::<_, SketchRecord>(&sql)
            .bind(user_id)
            .bind(document_id)
            .bind(page_number)
            .bind(canvas_data)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_error(e, || format!("Document {} not found", document_id)))?;
        Ok(record.to_domain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn retry_gives_up_when_the_database_is_unreachable() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(2))
            .connect_lazy("postgres://ebooks@127.0.0.1:1/ebooks")
            .unwrap();
        let adapter = DbAdapter::new(pool);

        assert!(!adapter.initialize_with_retry(2, Duration::ZERO).await);
    }
}
