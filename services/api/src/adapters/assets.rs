//! services/api/src/adapters/assets.rs
//!
//! Stores uploaded document files and cover images on the local filesystem.
//! It implements the `AssetGateway` port from the `core` crate; the files are
//! served back to clients under `/uploads`.

use async_trait::async_trait;
use bytes::Bytes;
use ebook_hub_core::ports::{
    sanitize_file_name, AssetGateway, ChunkStream, PortError, PortResult,
};
use ebook_hub_core::StoredAsset;
use futures::stream::{self, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// The URL prefix under which the upload directory is served.
pub const UPLOADS_ROUTE: &str = "/uploads";

#[derive(Clone)]
pub struct FsAssetGateway {
    root: PathBuf,
    public_base_url: String,
}

impl FsAssetGateway {
    /// Creates the gateway, creating `root` if it does not exist yet.
    pub async fn new(root: impl Into<PathBuf>, public_base_url: &str) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a reference to a path inside `root`, refusing anything that could
    /// escape it.
    fn path_for(&self, asset_ref: &str) -> PortResult<PathBuf> {
        let valid = !asset_ref.is_empty()
            && !asset_ref.starts_with('.')
            && !asset_ref.contains(['/', '\\']);
        if valid {
            Ok(self.root.join(asset_ref))
        } else {
            Err(PortError::NotFound(format!("Asset {} not found", asset_ref)))
        }
    }
}

#[async_trait]
impl AssetGateway for FsAssetGateway {
    async fn put(&self, bytes: Bytes, suggested_name: &str) -> PortResult<String> {
        let body = stream::once(async move { Ok(bytes) }).boxed();
        let stored = self.put_stream(body, suggested_name).await?;
        Ok(stored.asset_ref)
    }

    /// Writes chunks to disk as they arrive; a failed upload removes its
    /// partial file.
    async fn put_stream(
        &self,
        mut chunks: ChunkStream<'_>,
        suggested_name: &str,
    ) -> PortResult<StoredAsset> {
        let asset_ref = format!("{}_{}", Uuid::new_v4(), sanitize_file_name(suggested_name));
        let path = self.path_for(&asset_ref)?;

        // `create_new` refuses to overwrite, so a reference is never reused.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to create {}: {}", asset_ref, e)))?;

        let written: PortResult<u64> = async {
            let mut size = 0u64;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await.map_err(|e| {
                    PortError::Unexpected(format!("Failed to write {}: {}", asset_ref, e))
                })?;
                size += chunk.len() as u64;
            }
            // The row that references this blob is only written after this returns.
            file.sync_all().await.map_err(|e| {
                PortError::Unexpected(format!("Failed to flush {}: {}", asset_ref, e))
            })?;
            Ok(size)
        }
        .await;

        match written {
            Ok(size) => Ok(StoredAsset { asset_ref, size }),
            Err(e) => {
                drop(file);
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove partial upload {}: {}", asset_ref, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, asset_ref: &str) -> PortResult<()> {
        let path = self.path_for(asset_ref)?;
        tokio::fs::remove_file(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => PortError::NotFound(format!("Asset {} not found", asset_ref)),
            _ => PortError::Unexpected(format!("Failed to delete {}: {}", asset_ref, e)),
        })
    }

    fn resolve_url(&self, asset_ref: &str) -> String {
        format!("{}{}/{}", self.public_base_url, UPLOADS_ROUTE, asset_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_never_reuses_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FsAssetGateway::new(dir.path(), "").await.unwrap();

        let a = gateway.put(Bytes::from_static(b"one"), "book.pdf").await.unwrap();
        let b = gateway.put(Bytes::from_static(b"two"), "book.pdf").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(tokio::fs::read(dir.path().join(&a)).await.unwrap(), b"one");
        assert_eq!(tokio::fs::read(dir.path().join(&b)).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn suggested_names_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let gateway = FsAssetGateway::new(&root, "").await.unwrap();

        let asset_ref = gateway
            .put(Bytes::from_static(b"x"), "../../outside.pdf")
            .await
            .unwrap();

        assert!(asset_ref.ends_with("_outside.pdf"));
        assert!(root.join(&asset_ref).exists());
        assert!(!dir.path().join("outside.pdf").exists());
    }

    #[tokio::test]
    async fn streamed_chunks_land_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FsAssetGateway::new(dir.path(), "").await.unwrap();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"%PDF-")),
            Ok(Bytes::from_static(b"1.7")),
        ])
        .boxed();

        let stored = gateway.put_stream(body, "book.pdf").await.unwrap();

        assert_eq!(stored.size, 8);
        assert_eq!(
            tokio::fs::read(dir.path().join(&stored.asset_ref)).await.unwrap(),
            b"%PDF-1.7"
        );
    }

    #[tokio::test]
    async fn a_broken_stream_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FsAssetGateway::new(dir.path(), "").await.unwrap();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"%PDF-")),
            Err(PortError::Unexpected("client went away".to_string())),
        ])
        .boxed();

        assert!(gateway.put_stream(body, "book.pdf").await.is_err());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_missing_assets() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FsAssetGateway::new(dir.path(), "").await.unwrap();
        let asset_ref = gateway.put(Bytes::from_static(b"x"), "a.pdf").await.unwrap();

        gateway.delete(&asset_ref).await.unwrap();
        assert!(matches!(
            gateway.delete(&asset_ref).await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(
            gateway.delete("../secrets").await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn urls_point_at_the_uploads_route() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FsAssetGateway::new(dir.path(), "https://books.test/")
            .await
            .unwrap();
        assert_eq!(
            gateway.resolve_url("abc_book.pdf"),
            "https://books.test/uploads/abc_book.pdf"
        );
    }
}
