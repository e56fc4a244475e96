//! File storage
//!
//! File metadata lives in the entity store, content in a blob backend
//! under `files/<id>`.

mod local;
mod s3;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncRead;
use tracing::debug;

pub use local::LocalBlobs;
pub use s3::S3Blobs;

use crate::config::StorageConfig;
use crate::models::{File, FileStatus};
use crate::store::FileStore;

/// Content of a downloaded file
pub enum Download {
    /// The blob already is a file on the local disk
    Local(PathBuf),
    Stream(Pin<Box<dyn AsyncRead + Send>>),
}

impl Download {
    /// Write the content into `path`
    pub async fn save_to(self, path: &Path) -> Result<()> {
        match self {
            Download::Local(source) => {
                tokio::fs::copy(&source, path)
                    .await
                    .with_context(|| format!("Failed to copy {:?} to {:?}", source, path))?;
            }
            Download::Stream(mut reader) => {
                let mut file = tokio::fs::File::create(path)
                    .await
                    .with_context(|| format!("Failed to create {:?}", path))?;
                tokio::io::copy(&mut reader, &mut file).await?;
                file.sync_all().await?;
            }
        }
        Ok(())
    }
}

/// Storage for file contents
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn download(&self, key: &str) -> Result<Download>;
    async fn upload(&self, key: &str, source: &Path) -> Result<()>;
}

pub async fn blob_storage(config: &StorageConfig) -> Result<Arc<dyn BlobStorage>> {
    Ok(match config {
        StorageConfig::S3(s3) => Arc::new(S3Blobs::new(s3)),
        StorageConfig::Local { dir } => Arc::new(LocalBlobs::new(dir.clone()).await?),
    })
}

fn blob_key(id: i64) -> String {
    format!("files/{}", id)
}

/// Size and hex encoded SHA-256 of a file
pub fn file_hash(path: &Path) -> Result<(u64, String)> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&chunk[..n]);
    }
    Ok((size, format!("{:x}", hasher.finalize())))
}

/// Files with metadata
#[derive(Clone)]
pub struct FileManager {
    files: Arc<dyn FileStore>,
    blobs: Arc<dyn BlobStorage>,
}

impl FileManager {
    pub fn new(files: Arc<dyn FileStore>, blobs: Arc<dyn BlobStorage>) -> Self {
        Self { files, blobs }
    }

    pub async fn download_file(&self, id: i64) -> Result<Download> {
        let file = self.files.get(id).await?;
        debug!("Downloading file {} ({})", file.id, file.name);
        self.blobs
            .download(&blob_key(file.id))
            .await
            .with_context(|| format!("Failed to download file {}", id))
    }

    /// Store content of `source` as a new pending file
    pub async fn upload_file(&self, name: &str, source: &Path) -> Result<File> {
        let path = source.to_path_buf();
        let (size, hash) = tokio::task::spawn_blocking(move || file_hash(&path)).await??;
        let mut file = File {
            id: 0,
            status: FileStatus::Pending,
            name: name.to_string(),
            size,
            hash,
        };
        self.files.create(&mut file).await?;
        self.blobs
            .upload(&blob_key(file.id), source)
            .await
            .with_context(|| format!("Failed to upload file {}", file.id))?;
        Ok(file)
    }

    /// Mark an uploaded file as available
    pub async fn confirm_upload_file(&self, file: &mut File) -> Result<()> {
        file.status = FileStatus::Available;
        self.files.update(file).await
    }

    pub async fn get_file(&self, id: i64) -> Result<File> {
        self.files.get(id).await
    }
}
