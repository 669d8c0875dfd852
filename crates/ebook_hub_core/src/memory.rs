//! crates/ebook_hub_core/src/memory.rs
//!
//! In-process implementations of the store and asset ports. They keep the
//! same uniqueness keys and cascade rules as the relational schema, with a
//! single mutex standing in for the database's constraint checks.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{
    Document, DocumentId, DocumentRecord, Highlight, NewHighlight, NewUser, ReadingProgress,
    Role, Sketch, User, UserId,
};
use crate::ports::{
    sanitize_file_name, AssetGateway, LibraryStore, PortError, PortResult,
};

//=========================================================================================
// MemoryStore
//=========================================================================================

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<UserId, User>,
    documents: BTreeMap<DocumentId, Document>,
    progress: HashMap<(UserId, DocumentId), ReadingProgress>,
    highlights: BTreeMap<i64, Highlight>,
    sketches: HashMap<(UserId, DocumentId, i32), Sketch>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_document(&self, document_id: DocumentId) -> PortResult<()> {
        if self.documents.contains_key(&document_id) {
            Ok(())
        } else {
            Err(PortError::NotFound(format!("Document {} not found", document_id)))
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| PortError::Unavailable("memory store poisoned".to_string()))
    }

    pub fn user_count(&self) -> usize {
        self.lock().map(|t| t.users.len()).unwrap_or_default()
    }

    pub fn progress_count(&self) -> usize {
        self.lock().map(|t| t.progress.len()).unwrap_or_default()
    }

    pub fn highlight_count(&self) -> usize {
        self.lock().map(|t| t.highlights.len()).unwrap_or_default()
    }

    pub fn sketch_count(&self) -> usize {
        self.lock().map(|t| t.sketches.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> PortResult<Option<User>> {
        let tables = self.lock()?;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_or_create_user(&self, user: NewUser) -> PortResult<User> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables.users.values().find(|u| u.email == user.email) {
            return Ok(existing.clone());
        }
        let id = tables.next_id();
        let record = User {
            id,
            email: user.email,
            display_name: user.display_name,
            external_id: user.external_id,
            role: Role::User,
        };
        tables.users.insert(id, record.clone());
        Ok(record)
    }

    async fn list_documents(&self, search: Option<&str>) -> PortResult<Vec<Document>> {
        let tables = self.lock()?;
        let needle = search.map(str::to_lowercase);
        let mut documents: Vec<Document> = tables
            .documents
            .values()
            .filter(|d| match &needle {
                Some(needle) => d.title.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        documents.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(documents)
    }

    async fn get_document(&self, document_id: DocumentId) -> PortResult<Document> {
        let tables = self.lock()?;
        tables
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Document {} not found", document_id)))
    }

    async fn insert_document(&self, record: DocumentRecord) -> PortResult<Document> {
        let mut tables = self.lock()?;
        if tables
            .documents
            .values()
            .any(|d| d.asset_ref == record.asset_ref)
        {
            return Err(PortError::Unexpected(format!(
                "asset reference {} already in use",
                record.asset_ref
            )));
        }
        let id = tables.next_id();
        let document = Document {
            id,
            title: record.title,
            author: record.author,
            asset_ref: record.asset_ref,
            cover_ref: record.cover_ref,
            uploaded_at: record.uploaded_at,
        };
        tables.documents.insert(id, document.clone());
        Ok(document)
    }

    async fn delete_document(&self, document_id: DocumentId) -> PortResult<()> {
        let mut tables = self.lock()?;
        if tables.documents.remove(&document_id).is_none() {
            return Err(PortError::NotFound(format!(
                "Document {} not found",
                document_id
            )));
        }
        tables.progress.retain(|_, p| p.document_id != document_id);
        tables.highlights.retain(|_, h| h.document_id != document_id);
        tables.sketches.retain(|_, s| s.document_id != document_id);
        Ok(())
    }

    async fn get_progress(
        &self,
        user_id: UserId,
        document_id: DocumentId,
    ) -> PortResult<Option<ReadingProgress>> {
        let tables = self.lock()?;
        Ok(tables.progress.get(&(user_id, document_id)).cloned())
    }

    async fn upsert_progress(&self, progress: ReadingProgress) -> PortResult<ReadingProgress> {
        let mut tables = self.lock()?;
        tables.require_document(progress.document_id)?;
        tables
            .progress
            .insert((progress.user_id, progress.document_id), progress.clone());
        Ok(progress)
    }

    async fn list_highlights(
        &self,
        user_id: UserId,
        document_id: DocumentId,
    ) -> PortResult<Vec<Highlight>> {
        let tables = self.lock()?;
        let mut highlights: Vec<Highlight> = tables
            .highlights
            .values()
            .filter(|h| h.user_id == user_id && h.document_id == document_id)
            .cloned()
            .collect();
        // None sorts after every page; ties keep id order.
        highlights.sort_by_key(|h| (h.page_number.is_none(), h.page_number, h.id));
        Ok(highlights)
    }

    async fn insert_highlight(
        &self,
        user_id: UserId,
        highlight: NewHighlight,
    ) -> PortResult<Highlight> {
        let mut tables = self.lock()?;
        tables.require_document(highlight.document_id)?;
        let id = tables.next_id();
        let record = Highlight {
            id,
            user_id,
            document_id: highlight.document_id,
            selected_text: highlight.selected_text,
            note: highlight.note,
            page_number: highlight.page_number,
            created_at: Utc::now(),
        };
        tables.highlights.insert(id, record.clone());
        Ok(record)
    }

    async fn list_sketches(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page_number: i32,
    ) -> PortResult<Vec<Sketch>> {
        let tables = self.lock()?;
        Ok(tables
            .sketches
            .get(&(user_id, document_id, page_number))
            .cloned()
            .into_iter()
            .collect())
    }

    async fn upsert_sketch(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        page_number: i32,
        canvas_data: &str,
    ) -> PortResult<Sketch> {
        let mut tables = self.lock()?;
        tables.require_document(document_id)?;
        let key = (user_id, document_id, page_number);
        if let Some(existing) = tables.sketches.get_mut(&key) {
            existing.canvas_data = canvas_data.to_string();
            return Ok(existing.clone());
        }
        let id = tables.next_id();
        let sketch = Sketch {
            id,
            user_id,
            document_id,
            page_number,
            canvas_data: canvas_data.to_string(),
            created_at: Utc::now(),
        };
        tables.sketches.insert(key, sketch.clone());
        Ok(sketch)
    }
}

//=========================================================================================
// MemoryAssetGateway
//=========================================================================================

#[derive(Default)]
pub struct MemoryAssetGateway {
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryAssetGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, asset_ref: &str) -> bool {
        self.blobs
            .lock()
            .map(|blobs| blobs.contains_key(asset_ref))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetGateway for MemoryAssetGateway {
    async fn put(&self, bytes: Bytes, suggested_name: &str) -> PortResult<String> {
        let asset_ref = format!("{}_{}", Uuid::new_v4(), sanitize_file_name(suggested_name));
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| PortError::Unavailable("asset map poisoned".to_string()))?;
        blobs.insert(asset_ref.clone(), bytes);
        Ok(asset_ref)
    }

    async fn delete(&self, asset_ref: &str) -> PortResult<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| PortError::Unavailable("asset map poisoned".to_string()))?;
        blobs
            .remove(asset_ref)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Asset {} not found", asset_ref)))
    }

    fn resolve_url(&self, asset_ref: &str) -> String {
        format!("/uploads/{}", asset_ref)
    }
}
