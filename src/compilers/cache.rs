//! Cache of extracted compiler images

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Compiler;
use crate::cache::{self, CacheError, Ref, Resource, Storage};
use crate::core::utils::extract_tar_gz_file;
use crate::models::CompilerConfig;
use crate::safeexec;
use crate::storage::{Download, FileManager};

/// Extracted compiler rootfs, removed from disk when released
pub struct CompilerImage {
    path: PathBuf,
    safeexec: Arc<safeexec::Manager>,
}

impl CompilerImage {
    pub fn compiler(&self, name: &str, config: CompilerConfig) -> Compiler {
        Compiler::new(name, self.path.clone(), config, self.safeexec.clone())
    }

    #[cfg(test)]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Resource for CompilerImage {
    fn release(&self) {
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("Cannot remove compiler image {:?}: {}", self.path, err);
            }
        }
    }
}

struct ImageStorage {
    files: FileManager,
    safeexec: Arc<safeexec::Manager>,
    dir: PathBuf,
    seq_id: AtomicI64,
}

#[async_trait]
impl Storage<i64, CompilerImage> for ImageStorage {
    async fn load(&self, file_id: i64) -> Result<CompilerImage> {
        let download = self.files.download_file(file_id).await?;
        let id = self.seq_id.fetch_add(1, Ordering::SeqCst) + 1;
        let image = CompilerImage {
            path: self.dir.join(id.to_string()),
            safeexec: self.safeexec.clone(),
        };
        match self.extract(id, download, &image).await {
            Ok(()) => {
                info!("Extracted compiler image {} into {:?}", file_id, image.path);
                Ok(image)
            }
            Err(err) => {
                image.release();
                Err(err)
            }
        }
    }
}

impl ImageStorage {
    async fn extract(&self, id: i64, download: Download, image: &CompilerImage) -> Result<()> {
        remove_all(&image.path).await?;
        let temp_path = self.dir.join(format!("{}.tmp", id));
        remove_all(&temp_path).await?;
        let (archive, spooled) = match download {
            Download::Local(path) => (path, false),
            stream => {
                stream.save_to(&temp_path).await?;
                (temp_path.clone(), true)
            }
        };
        let target = image.path.clone();
        let result = tokio::task::spawn_blocking(move || extract_tar_gz_file(&archive, &target))
            .await
            .context("Image extraction panicked")
            .and_then(|result| result.context("Cannot extract image"));
        if spooled {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }
}

async fn remove_all(path: &PathBuf) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await?,
        Ok(_) => tokio::fs::remove_file(path).await?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// Shared compiler images keyed by image file id
#[derive(Clone)]
pub struct CompilerImageManager {
    cache: cache::Manager<i64, CompilerImage>,
}

impl CompilerImageManager {
    pub fn new(files: FileManager, safeexec: Arc<safeexec::Manager>, dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create compilers dir {:?}", dir))?;
        let storage = ImageStorage {
            files,
            safeexec,
            dir,
            seq_id: AtomicI64::new(0),
        };
        Ok(Self {
            cache: cache::Manager::new(Arc::new(storage)),
        })
    }

    pub async fn load_sync(
        &self,
        file_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Ref<CompilerImage>, CacheError> {
        self.cache.load_sync(file_id, cancel).await
    }

    /// Evict an image; running users keep it until they release it
    #[cfg(test)]
    pub fn delete(&self, file_id: i64) -> bool {
        self.cache.delete(&file_id)
    }
}
