//! crates/ebook_hub_core/src/service.rs
//!
//! `LibraryService` runs every catalogue and reading-artifact operation:
//! authorize against the policy, validate, then touch the store and the
//! asset gateway in an order that never leaves a row pointing at a missing
//! blob.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{
    Document, DocumentDraft, DocumentId, DocumentRecord, Highlight, Identity, NewDocument,
    NewHighlight, ProgressUpdate, ReadingProgress, Sketch, SketchUpdate, StoredAsset, Upload,
    UserId,
};
use crate::error::{LibraryError, LibraryResult};
use crate::policy::{authorize, Operation, Scope};
use crate::ports::{AssetGateway, ChunkStream, LibraryStore};

pub struct LibraryService {
    store: Arc<dyn LibraryStore>,
    assets: Arc<dyn AssetGateway>,
}

impl LibraryService {
    pub fn new(store: Arc<dyn LibraryStore>, assets: Arc<dyn AssetGateway>) -> Self {
        Self { store, assets }
    }

    pub fn asset_url(&self, asset_ref: &str) -> String {
        self.assets.resolve_url(asset_ref)
    }

    //=====================================================================================
    // Documents
    //=====================================================================================

    pub async fn list_documents(
        &self,
        caller: &Identity,
        search: Option<&str>,
    ) -> LibraryResult<Vec<Document>> {
        authorize(caller, Operation::ListDocuments)?;
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        self.store
            .list_documents(search)
            .await
            .map_err(LibraryError::from_store)
    }

    pub async fn get_document(
        &self,
        caller: &Identity,
        document_id: DocumentId,
    ) -> LibraryResult<Document> {
        authorize(caller, Operation::GetDocument)?;
        self.store
            .get_document(document_id)
            .await
            .map_err(LibraryError::from_store)
    }

    /// Writes the blob(s) first and the row last, so a crash in between can
    /// only orphan a blob.
    pub async fn create_document(
        &self,
        caller: &Identity,
        upload: NewDocument,
    ) -> LibraryResult<Document> {
        authorize(caller, Operation::CreateDocument)?;

        let title = required_title(&upload.title)?;
        if upload.file.bytes.is_empty() {
            return Err(LibraryError::InvalidInput("file must not be empty".to_string()));
        }

        let file = self.store_bytes(upload.file).await?;
        let cover = match upload.cover.filter(|c| !c.bytes.is_empty()) {
            Some(cover) => match self.store_bytes(cover).await {
                Ok(stored) => Some(stored),
                Err(e) => {
                    self.release_assets(&[file.asset_ref.as_str()]).await;
                    return Err(e);
                }
            },
            None => None,
        };

        self.publish_document(
            caller,
            DocumentDraft {
                title,
                author: upload.author,
                file,
                cover,
            },
        )
        .await
    }

    async fn store_bytes(&self, upload: Upload) -> LibraryResult<StoredAsset> {
        let size = upload.bytes.len() as u64;
        let asset_ref = self
            .assets
            .put(upload.bytes, &upload.file_name)
            .await
            .map_err(LibraryError::from_dependency)?;
        Ok(StoredAsset { asset_ref, size })
    }

    /// Streams one part of an upload into storage ahead of `publish_document`.
    /// The blob is unreferenced until then; hand it to `discard_uploads` if
    /// the document is abandoned.
    pub async fn stage_upload(
        &self,
        caller: &Identity,
        chunks: ChunkStream<'_>,
        file_name: &str,
    ) -> LibraryResult<StoredAsset> {
        authorize(caller, Operation::CreateDocument)?;
        self.assets
            .put_stream(chunks, file_name)
            .await
            .map_err(LibraryError::from_dependency)
    }

    /// Writes the row for already stored blobs. On any failure the staged
    /// blobs are released. An empty cover is released and dropped.
    pub async fn publish_document(
        &self,
        caller: &Identity,
        draft: DocumentDraft,
    ) -> LibraryResult<Document> {
        let DocumentDraft {
            title,
            author,
            file,
            cover,
        } = draft;
        let cover = match cover {
            Some(empty) if empty.size == 0 => {
                self.release_assets(&[empty.asset_ref.as_str()]).await;
                None
            }
            other => other,
        };

        let mut refs = vec![file.asset_ref.as_str()];
        refs.extend(cover.as_ref().map(|c| c.asset_ref.as_str()));

        match self.insert_document(caller, title, author, &file, cover.as_ref()).await {
            Ok(document) => {
                info!("Document {} uploaded as {}", document.id, document.asset_ref);
                Ok(document)
            }
            Err(e) => {
                self.release_assets(&refs).await;
                Err(e)
            }
        }
    }

    /// Releases blobs staged for a document that will not be published.
    pub async fn discard_uploads(&self, staged: &[StoredAsset]) {
        let refs: Vec<&str> = staged.iter().map(|s| s.asset_ref.as_str()).collect();
        self.release_assets(&refs).await;
    }

    async fn insert_document(
        &self,
        caller: &Identity,
        title: String,
        author: Option<String>,
        file: &StoredAsset,
        cover: Option<&StoredAsset>,
    ) -> LibraryResult<Document> {
        authorize(caller, Operation::CreateDocument)?;
        let title = required_title(&title)?;
        if file.size == 0 {
            return Err(LibraryError::InvalidInput("file must not be empty".to_string()));
        }

        let record = DocumentRecord {
            title,
            author: author.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
            asset_ref: file.asset_ref.clone(),
            cover_ref: cover.map(|c| c.asset_ref.clone()),
            uploaded_at: Utc::now(),
        };
        self.store
            .insert_document(record)
            .await
            .map_err(LibraryError::from_store)
    }

    /// Deletes the row (and its cascade) before the blobs. Blob failures are
    /// logged and swallowed: an orphaned blob is tolerable, a row pointing
    /// at a deleted blob is not.
    pub async fn delete_document(
        &self,
        caller: &Identity,
        document_id: DocumentId,
    ) -> LibraryResult<()> {
        authorize(caller, Operation::DeleteDocument)?;

        let document = self
            .store
            .get_document(document_id)
            .await
            .map_err(LibraryError::from_store)?;
        self.store
            .delete_document(document_id)
            .await
            .map_err(LibraryError::from_store)?;
        info!("Document {} deleted", document_id);

        let mut refs = vec![document.asset_ref.as_str()];
        refs.extend(document.cover_ref.as_deref());
        self.release_assets(&refs).await;
        Ok(())
    }

    async fn release_assets(&self, asset_refs: &[&str]) {
        for asset_ref in asset_refs {
            if let Err(e) = self.assets.delete(asset_ref).await {
                warn!("Failed to delete asset {}: {}", asset_ref, e);
            }
        }
    }

    //=====================================================================================
    // Reading progress
    //=====================================================================================

    pub async fn get_progress(
        &self,
        caller: &Identity,
        document_id: DocumentId,
    ) -> LibraryResult<ReadingProgress> {
        let owner = owner_of(caller, Operation::GetProgress)?;
        self.store
            .get_progress(owner, document_id)
            .await
            .map_err(LibraryError::from_store)?
            .ok_or_else(|| {
                LibraryError::NotFound(format!("No progress saved for document {}", document_id))
            })
    }

    pub async fn save_progress(
        &self,
        caller: &Identity,
        update: ProgressUpdate,
    ) -> LibraryResult<ReadingProgress> {
        let owner = owner_of(caller, Operation::SaveProgress)?;
        if update.last_position < 0 {
            return Err(LibraryError::InvalidInput(
                "last_position must not be negative".to_string(),
            ));
        }
        self.require_document(update.document_id).await?;

        self.store
            .upsert_progress(ReadingProgress {
                user_id: owner,
                document_id: update.document_id,
                last_position: update.last_position,
                updated_at: Utc::now(),
            })
            .await
            .map_err(LibraryError::from_store)
    }

    //=====================================================================================
    // Annotations
    //=====================================================================================

    pub async fn list_highlights(
        &self,
        caller: &Identity,
        document_id: DocumentId,
    ) -> LibraryResult<Vec<Highlight>> {
        let owner = owner_of(caller, Operation::ListHighlights)?;
        self.require_document(document_id).await?;
        self.store
            .list_highlights(owner, document_id)
            .await
            .map_err(LibraryError::from_store)
    }

    pub async fn save_highlight(
        &self,
        caller: &Identity,
        highlight: NewHighlight,
    ) -> LibraryResult<Highlight> {
        let owner = owner_of(caller, Operation::SaveHighlight)?;
        if highlight.selected_text.trim().is_empty() {
            return Err(LibraryError::InvalidInput(
                "selected_text is required".to_string(),
            ));
        }
        if highlight.page_number.is_some_and(|page| page < 0) {
            return Err(LibraryError::InvalidInput(
                "page_number must not be negative".to_string(),
            ));
        }
        self.require_document(highlight.document_id).await?;

        let highlight = NewHighlight {
            note: highlight.note.filter(|n| !n.trim().is_empty()),
            ..highlight
        };
        self.store
            .insert_highlight(owner, highlight)
            .await
            .map_err(LibraryError::from_store)
    }

    pub async fn list_sketches(
        &self,
        caller: &Identity,
        document_id: DocumentId,
        page_number: i32,
    ) -> LibraryResult<Vec<Sketch>> {
        let owner = owner_of(caller, Operation::ListSketches)?;
        self.require_document(document_id).await?;
        self.store
            .list_sketches(owner, document_id, page_number)
            .await
            .map_err(LibraryError::from_store)
    }

    pub async fn save_sketch(
        &self,
        caller: &Identity,
        sketch: SketchUpdate,
    ) -> LibraryResult<Sketch> {
        let owner = owner_of(caller, Operation::SaveSketch)?;
        if sketch.page_number < 0 {
            return Err(LibraryError::InvalidInput(
                "page_number must not be negative".to_string(),
            ));
        }
        if sketch.canvas_data.is_empty() {
            return Err(LibraryError::InvalidInput("canvas_data is required".to_string()));
        }
        self.require_document(sketch.document_id).await?;

        self.store
            .upsert_sketch(owner, sketch.document_id, sketch.page_number, &sketch.canvas_data)
            .await
            .map_err(LibraryError::from_store)
    }

    async fn require_document(&self, document_id: DocumentId) -> LibraryResult<()> {
        self.store
            .get_document(document_id)
            .await
            .map(|_| ())
            .map_err(LibraryError::from_store)
    }
}

fn required_title(title: &str) -> LibraryResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(LibraryError::InvalidInput("title is required".to_string()));
    }
    Ok(title.to_string())
}

fn owner_of(caller: &Identity, operation: Operation) -> LibraryResult<UserId> {
    match authorize(caller, operation)? {
        Scope::Owner(user_id) => Ok(user_id),
        Scope::Library => Err(LibraryError::Forbidden),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewUser;
    use crate::error::LibraryError;
    use crate::memory::{MemoryAssetGateway, MemoryStore};
    use crate::ports::{PortError, PortResult};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct Fixture {
        service: Arc<LibraryService>,
        store: Arc<MemoryStore>,
        assets: Arc<MemoryAssetGateway>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let assets = Arc::new(MemoryAssetGateway::new());
        Fixture {
            service: Arc::new(LibraryService::new(store.clone(), assets.clone())),
            store,
            assets,
        }
    }

    async fn reader(store: &MemoryStore, email: &str) -> Identity {
        let user = store
            .get_or_create_user(NewUser {
                email: email.to_string(),
                display_name: email.to_string(),
                external_id: None,
            })
            .await
            .unwrap();
        Identity::user(user.id)
    }

    fn upload(title: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            author: Some("Herman Melville".to_string()),
            file: Upload {
                file_name: "moby-dick.pdf".to_string(),
                bytes: Bytes::from_static(b"%PDF-1.7 ..."),
            },
            cover: Some(Upload {
                file_name: "cover.png".to_string(),
                bytes: Bytes::from_static(b"\x89PNG"),
            }),
        }
    }

    #[tokio::test]
    async fn any_reader_can_fetch_uploaded_documents() {
        let fx = fixture();
        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();

        let ann = reader(&fx.store, "ann@example.com").await;
        let fetched = fx.service.get_document(&ann, doc.id).await.unwrap();
        assert_eq!(fetched, doc);
        assert!(fx.assets.contains(&doc.asset_ref));
        assert!(fx.assets.contains(doc.cover_ref.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn uploads_get_distinct_asset_refs() {
        let fx = fixture();
        let admin = Identity::admin();
        let a = fx.service.create_document(&admin, upload("A")).await.unwrap();
        let b = fx.service.create_document(&admin, upload("B")).await.unwrap();
        assert_ne!(a.asset_ref, b.asset_ref);
        assert!(a.asset_ref.ends_with("_moby-dick.pdf"));
    }

    #[tokio::test]
    async fn only_admins_upload() {
        let fx = fixture();
        let ann = reader(&fx.store, "ann@example.com").await;
        let result = fx.service.create_document(&ann, upload("Moby Dick")).await;
        assert!(matches!(result, Err(LibraryError::Forbidden)));
        assert!(fx.assets.is_empty());
    }

    #[tokio::test]
    async fn upload_validation() {
        let fx = fixture();
        let admin = Identity::admin();

        let blank_title = NewDocument {
            title: "   ".to_string(),
            ..upload("x")
        };
        assert!(matches!(
            fx.service.create_document(&admin, blank_title).await,
            Err(LibraryError::InvalidInput(_))
        ));

        let mut empty_file = upload("Empty");
        empty_file.file.bytes = Bytes::new();
        assert!(matches!(
            fx.service.create_document(&admin, empty_file).await,
            Err(LibraryError::InvalidInput(_))
        ));
        assert!(fx.assets.is_empty());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_substring() {
        let fx = fixture();
        let admin = Identity::admin();
        for title in ["Moby Dick", "Dracula", "The Dick Van Dyke Story"] {
            fx.service.create_document(&admin, upload(title)).await.unwrap();
        }
        let hits = fx.service.list_documents(&admin, Some("DICK")).await.unwrap();
        let titles: Vec<_> = hits.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, ["The Dick Van Dyke Story", "Moby Dick"]);

        let all = fx.service.list_documents(&admin, Some("  ")).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn delete_cascades_and_releases_blobs() {
        let fx = fixture();
        let admin = Identity::admin();
        let doc = fx.service.create_document(&admin, upload("Moby Dick")).await.unwrap();
        let ann = reader(&fx.store, "ann@example.com").await;

        fx.service
            .save_progress(&ann, ProgressUpdate { document_id: doc.id, last_position: 4 })
            .await
            .unwrap();
        fx.service
            .save_highlight(
                &ann,
                NewHighlight {
                    document_id: doc.id,
                    selected_text: "Call me Ishmael".to_string(),
                    note: None,
                    page_number: Some(1),
                },
            )
            .await
            .unwrap();
        fx.service
            .save_sketch(
                &ann,
                SketchUpdate { document_id: doc.id, page_number: 1, canvas_data: "{}".to_string() },
            )
            .await
            .unwrap();

        fx.service.delete_document(&admin, doc.id).await.unwrap();

        assert!(matches!(
            fx.service.get_document(&ann, doc.id).await,
            Err(LibraryError::NotFound(_))
        ));
        assert!(fx.assets.is_empty());
        assert_eq!(fx.store.progress_count(), 0);
        assert_eq!(fx.store.highlight_count(), 0);
        assert_eq!(fx.store.sketch_count(), 0);

        assert!(matches!(
            fx.service.delete_document(&admin, doc.id).await,
            Err(LibraryError::NotFound(_))
        ));
    }

    /// Stores nothing durable and refuses every delete.
    struct StubbornAssets;

    #[async_trait]
    impl AssetGateway for StubbornAssets {
        async fn put(&self, _bytes: Bytes, suggested_name: &str) -> PortResult<String> {
            Ok(format!("{}-{}", uuid::Uuid::new_v4(), suggested_name))
        }

        async fn delete(&self, _asset_ref: &str) -> PortResult<()> {
            Err(PortError::Unavailable("disk detached".to_string()))
        }

        fn resolve_url(&self, asset_ref: &str) -> String {
            asset_ref.to_string()
        }
    }

    #[tokio::test]
    async fn row_is_removed_even_when_blob_delete_fails() {
        let store = Arc::new(MemoryStore::new());
        let service = LibraryService::new(store.clone(), Arc::new(StubbornAssets));
        let admin = Identity::admin();

        let doc = service.create_document(&admin, upload("Moby Dick")).await.unwrap();
        service.delete_document(&admin, doc.id).await.unwrap();

        assert!(matches!(
            service.get_document(&admin, doc.id).await,
            Err(LibraryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn progress_upserts_per_reader_and_document() {
        let fx = fixture();
        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();
        let ann = reader(&fx.store, "ann@example.com").await;

        assert!(matches!(
            fx.service.get_progress(&ann, doc.id).await,
            Err(LibraryError::NotFound(_))
        ));

        for page in [5, 9] {
            fx.service
                .save_progress(&ann, ProgressUpdate { document_id: doc.id, last_position: page })
                .await
                .unwrap();
        }

        let progress = fx.service.get_progress(&ann, doc.id).await.unwrap();
        assert_eq!(progress.last_position, 9);
        assert_eq!(progress.user_id, ann.user_id);
        assert_eq!(fx.store.progress_count(), 1);
    }

    #[tokio::test]
    async fn progress_rejects_negative_positions_and_unknown_documents() {
        let fx = fixture();
        let ann = reader(&fx.store, "ann@example.com").await;

        assert!(matches!(
            fx.service
                .save_progress(&ann, ProgressUpdate { document_id: 77, last_position: 1 })
                .await,
            Err(LibraryError::NotFound(_))
        ));

        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();
        assert!(matches!(
            fx.service
                .save_progress(&ann, ProgressUpdate { document_id: doc.id, last_position: -1 })
                .await,
            Err(LibraryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn readers_never_see_each_others_artifacts() {
        let fx = fixture();
        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();
        let ann = reader(&fx.store, "ann@example.com").await;
        let bob = reader(&fx.store, "bob@example.com").await;

        fx.service
            .save_highlight(
                &ann,
                NewHighlight {
                    document_id: doc.id,
                    selected_text: "foo".to_string(),
                    note: None,
                    page_number: Some(3),
                },
            )
            .await
            .unwrap();
        fx.service
            .save_progress(&ann, ProgressUpdate { document_id: doc.id, last_position: 3 })
            .await
            .unwrap();
        fx.service
            .save_sketch(
                &ann,
                SketchUpdate { document_id: doc.id, page_number: 3, canvas_data: "ann".to_string() },
            )
            .await
            .unwrap();

        assert!(fx.service.list_highlights(&bob, doc.id).await.unwrap().is_empty());
        assert!(fx.service.list_sketches(&bob, doc.id, 3).await.unwrap().is_empty());
        assert!(matches!(
            fx.service.get_progress(&bob, doc.id).await,
            Err(LibraryError::NotFound(_))
        ));
        assert_eq!(fx.service.list_highlights(&ann, doc.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn admin_has_no_reading_artifacts() {
        let fx = fixture();
        let admin = Identity::admin();
        let doc = fx.service.create_document(&admin, upload("Moby Dick")).await.unwrap();

        assert!(matches!(
            fx.service.list_highlights(&admin, doc.id).await,
            Err(LibraryError::Forbidden)
        ));
        assert!(matches!(
            fx.service
                .save_progress(&admin, ProgressUpdate { document_id: doc.id, last_position: 1 })
                .await,
            Err(LibraryError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn highlights_accumulate_in_page_order() {
        let fx = fixture();
        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();
        let ann = reader(&fx.store, "ann@example.com").await;

        for (text, page) in [("c", Some(7)), ("none", None), ("a", Some(2)), ("b", Some(2))] {
            fx.service
                .save_highlight(
                    &ann,
                    NewHighlight {
                        document_id: doc.id,
                        selected_text: text.to_string(),
                        note: Some(" ".to_string()),
                        page_number: page,
                    },
                )
                .await
                .unwrap();
        }

        let listed = fx.service.list_highlights(&ann, doc.id).await.unwrap();
        let texts: Vec<_> = listed.iter().map(|h| h.selected_text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c", "none"]);
        assert!(listed.iter().all(|h| h.note.is_none()));

        assert!(matches!(
            fx.service
                .save_highlight(
                    &ann,
                    NewHighlight {
                        document_id: doc.id,
                        selected_text: "  ".to_string(),
                        note: None,
                        page_number: None,
                    },
                )
                .await,
            Err(LibraryError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn sketch_save_replaces_in_place() {
        let fx = fixture();
        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();
        let ann = reader(&fx.store, "ann@example.com").await;

        let first = fx
            .service
            .save_sketch(
                &ann,
                SketchUpdate { document_id: doc.id, page_number: 2, canvas_data: "v1".to_string() },
            )
            .await
            .unwrap();
        let second = fx
            .service
            .save_sketch(
                &ann,
                SketchUpdate { document_id: doc.id, page_number: 2, canvas_data: "v2".to_string() },
            )
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let page = fx.service.list_sketches(&ann, doc.id, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].canvas_data, "v2");
        assert!(fx.service.list_sketches(&ann, doc.id, 3).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_sketch_saves_leave_one_row() {
        let fx = fixture();
        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();
        let ann = reader(&fx.store, "ann@example.com").await;
        let document_id = doc.id;

        let saves = (0..8).map(|i| {
            let service = fx.service.clone();
            tokio::spawn(async move {
                service
                    .save_sketch(
                        &ann,
                        SketchUpdate {
                            document_id,
                            page_number: 5,
                            canvas_data: format!("stroke-{}", i),
                        },
                    )
                    .await
            })
        });
        for joined in futures::future::join_all(saves).await {
            joined.unwrap().unwrap();
        }

        assert_eq!(fx.store.sketch_count(), 1);
        assert_eq!(fx.service.list_sketches(&ann, doc.id, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_artifacts_of_a_missing_document_is_not_found() {
        let fx = fixture();
        let ann = reader(&fx.store, "ann@example.com").await;

        assert!(matches!(
            fx.service.list_highlights(&ann, 999).await,
            Err(LibraryError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.list_sketches(&ann, 999, 1).await,
            Err(LibraryError::NotFound(_))
        ));

        let admin = Identity::admin();
        let doc = fx.service.create_document(&admin, upload("Moby Dick")).await.unwrap();
        fx.service.delete_document(&admin, doc.id).await.unwrap();
        assert!(matches!(
            fx.service.list_highlights(&ann, doc.id).await,
            Err(LibraryError::NotFound(_))
        ));
        assert!(matches!(
            fx.service.list_sketches(&ann, doc.id, 1).await,
            Err(LibraryError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_progress_saves_leave_one_row() {
        let fx = fixture();
        let doc = fx
            .service
            .create_document(&Identity::admin(), upload("Moby Dick"))
            .await
            .unwrap();
        let ann = reader(&fx.store, "ann@example.com").await;
        let document_id = doc.id;

        let saves = (0..8).map(|i| {
            let service = fx.service.clone();
            tokio::spawn(async move {
                service
                    .save_progress(&ann, ProgressUpdate { document_id, last_position: i })
                    .await
            })
        });
        for joined in futures::future::join_all(saves).await {
            joined.unwrap().unwrap();
        }

        assert_eq!(fx.store.progress_count(), 1);
        let saved = fx.service.get_progress(&ann, document_id).await.unwrap();
        assert!((0..8).contains(&saved.last_position));
    }

    fn chunks(parts: Vec<PortResult<&'static str>>) -> ChunkStream<'static> {
        use futures::StreamExt;
        futures::stream::iter(
            parts
                .into_iter()
                .map(|part| part.map(|text| Bytes::from_static(text.as_bytes()))),
        )
        .boxed()
    }

    #[tokio::test]
    async fn staged_uploads_publish_from_chunks() {
        let fx = fixture();
        let admin = Identity::admin();

        let file = fx
            .service
            .stage_upload(&admin, chunks(vec![Ok("%PDF-"), Ok("1.7")]), "moby.pdf")
            .await
            .unwrap();
        assert_eq!(file.size, 8);

        let doc = fx
            .service
            .publish_document(
                &admin,
                DocumentDraft {
                    title: " Moby Dick ".to_string(),
                    author: Some("  ".to_string()),
                    file: file.clone(),
                    cover: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(doc.title, "Moby Dick");
        assert_eq!(doc.author, None);
        assert_eq!(doc.asset_ref, file.asset_ref);
        assert!(fx.assets.contains(&file.asset_ref));
    }

    #[tokio::test]
    async fn rejected_drafts_release_their_blobs() {
        let fx = fixture();
        let admin = Identity::admin();

        let file = fx
            .service
            .stage_upload(&admin, chunks(vec![Ok("%PDF")]), "moby.pdf")
            .await
            .unwrap();
        let cover = fx
            .service
            .stage_upload(&admin, chunks(vec![Ok("PNG")]), "cover.png")
            .await
            .unwrap();
        let result = fx
            .service
            .publish_document(
                &admin,
                DocumentDraft {
                    title: "   ".to_string(),
                    author: None,
                    file,
                    cover: Some(cover),
                },
            )
            .await;
        assert!(matches!(result, Err(LibraryError::InvalidInput(_))));
        assert!(fx.assets.is_empty());

        let empty = fx
            .service
            .stage_upload(&admin, chunks(vec![]), "empty.pdf")
            .await
            .unwrap();
        let result = fx
            .service
            .publish_document(
                &admin,
                DocumentDraft {
                    title: "Empty".to_string(),
                    author: None,
                    file: empty,
                    cover: None,
                },
            )
            .await;
        assert!(matches!(result, Err(LibraryError::InvalidInput(_))));
        assert!(fx.assets.is_empty());
    }

    #[tokio::test]
    async fn failed_or_forbidden_staging_stores_nothing() {
        let fx = fixture();
        let ann = reader(&fx.store, "ann@example.com").await;
        assert!(matches!(
            fx.service
                .stage_upload(&ann, chunks(vec![Ok("%PDF")]), "moby.pdf")
                .await,
            Err(LibraryError::Forbidden)
        ));

        let broken = chunks(vec![
            Ok("%PDF"),
            Err(PortError::Unexpected("connection reset".to_string())),
        ]);
        assert!(matches!(
            fx.service
                .stage_upload(&Identity::admin(), broken, "moby.pdf")
                .await,
            Err(LibraryError::DependencyFailure(_))
        ));
        assert!(fx.assets.is_empty());
    }

    #[tokio::test]
    async fn discarded_uploads_are_released() {
        let fx = fixture();
        let admin = Identity::admin();
        let staged = fx
            .service
            .stage_upload(&admin, chunks(vec![Ok("%PDF")]), "moby.pdf")
            .await
            .unwrap();
        assert_eq!(fx.assets.len(), 1);

        fx.service.discard_uploads(&[staged]).await;
        assert!(fx.assets.is_empty());
    }
}
