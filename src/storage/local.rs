use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::{BlobStorage, Download};

/// Blobs kept in a local directory; downloads hand out the stored file itself
pub struct LocalBlobs {
    dir: PathBuf,
}

impl LocalBlobs {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create storage dir {:?}", dir))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl BlobStorage for LocalBlobs {
    async fn download(&self, key: &str) -> Result<Download> {
        let path = self.dir.join(key);
        if !tokio::fs::try_exists(&path).await? {
            bail!("Blob {:?} does not exist", key);
        }
        Ok(Download::Local(path))
    }

    async fn upload(&self, key: &str, source: &Path) -> Result<()> {
        let path = self.dir.join(key);
        crate::core::utils::copy_file_rec(source, &path).await
    }
}
