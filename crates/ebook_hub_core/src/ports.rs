//! crates/ebook_hub_core/src/ports.rs
//!
//! Defines the service contracts (traits) the library core depends on.
//! Adapters for the relational store, blob storage and the external identity
//! provider implement these, keeping the core free of any concrete backend.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};

use crate::domain::{
    Document, DocumentId, DocumentRecord, Highlight, NewHighlight, NewUser, ReadingProgress,
    Sketch, StoredAsset, User, UserId,
};

/// A body that arrives in pieces, such as one part of a multipart upload.
pub type ChunkStream<'a> = BoxStream<'a, PortResult<Bytes>>;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The relational store. Uniqueness of users by email, progress by
/// (user, document) and sketches by (user, document, page) is enforced here,
/// so the upserts below must be atomic against those keys.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    // --- Users ---
    async fn find_user_by_email(&self, email: &str) -> PortResult<Option<User>>;

    /// Inserts the user unless one with the same email exists, then returns
    /// whichever row owns that email.
    async fn get_or_create_user(&self, user: NewUser) -> PortResult<User>;

    // --- Documents ---
    /// Newest first. `search` is a case-insensitive substring of the title.
    async fn list_documents(&self, search: Option<&str>) -> PortResult<Vec<Document>>;

    async fn get_document(&self, document_id: DocumentId) -> PortResult<Document>;

    async fn insert_document(&self, record: DocumentRecord) -> PortResult<Document>;

    /// Removes the row and every progress/highlight/sketch row that references it.
    async fn delete_document(&self, document_id: DocumentId) -> PortResult<()>;

    // --- Reading progress ---
    async fn get_progress(
        &self,
        user_id: UserId,
        document_id: DocumentId,
    ) -> PortResult<Option<ReadingProgress>>;

    async fn upsert_progress(&self, progress: ReadingProgress) -> PortResult<ReadingProgress>;

    // --- Annotations ---
    /// Ordered by page ascending with unpaged highlights last, ties by id.
    async fn list_highlights(
        &self,
        user_id: UserId,
        document_id: DocumentId,
    ) -> PortResult<Vec<Highlight>>;

    async fn insert_highlight(&self, user_id: UserId, highlight: NewHighlight)
        -> PortResult<Highlight>;

    async fn list_sketches(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page_number: i32,
    ) -> PortResult<Vec<Sketch>>;

    async fn upsert_sketch(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page_number: i32,
        canvas_data: &str,
    ) -> PortResult<Sketch>;
}

/// Binary storage for document files and cover images.
#[async_trait]
pub trait AssetGateway: Send + Sync {
    /// Stores the bytes under a freshly generated name and returns it.
    /// Two puts never yield the same reference, whatever `suggested_name` is.
    async fn put(&self, bytes: Bytes, suggested_name: &str) -> PortResult<String>;

    /// Stores a body chunk by chunk, with the same naming guarantee as `put`.
    /// Nothing is left behind when a chunk fails. The default buffers the
    /// whole body; gateways backed by real storage should write as it comes.
    async fn put_stream(
        &self,
        mut chunks: ChunkStream<'_>,
        suggested_name: &str,
    ) -> PortResult<StoredAsset> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let size = buffer.len() as u64;
        let asset_ref = self.put(buffer.freeze(), suggested_name).await?;
        Ok(StoredAsset { asset_ref, size })
    }

    /// Returns `PortError::NotFound` when nothing is stored under `asset_ref`.
    async fn delete(&self, asset_ref: &str) -> PortResult<()>;

    /// An address clients can fetch the asset from.
    fn resolve_url(&self, asset_ref: &str) -> String;
}

/// What the external identity provider vouches for.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub subject_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies an opaque identity assertion issued by the provider.
    async fn verify(&self, id_token: &str) -> PortResult<VerifiedIdentity>;
}

/// Keeps only the final path component of a client-supplied file name and
/// drops characters that are awkward in file names and URLs.
pub fn sanitize_file_name(suggested_name: &str) -> String {
    let base = suggested_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
