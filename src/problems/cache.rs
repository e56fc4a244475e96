//! Cache of extracted problem packages

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{CompiledProblem, PolygonProblem, Problem, ProblemKind};
use crate::cache::{self, CacheError, Ref, Resource, Storage};
use crate::storage::{Download, FileManager};

/// Extracted package, removed from disk when released
pub struct ProblemPackage {
    path: PathBuf,
    problem: Problem,
}

impl ProblemPackage {
    pub fn problem(&self) -> &Problem {
        &self.problem
    }
}

impl Resource for ProblemPackage {
    fn release(&self) {
        remove_package(&self.path);
    }
}

fn remove_package(path: &Path) {
    if let Err(err) = std::fs::remove_dir_all(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("Cannot remove problem package {:?}: {}", path, err);
        }
    }
}

struct PackageStorage {
    files: FileManager,
    dir: PathBuf,
    seq_id: AtomicI64,
}

#[async_trait]
impl Storage<(i64, ProblemKind), ProblemPackage> for PackageStorage {
    async fn load(&self, key: (i64, ProblemKind)) -> Result<ProblemPackage> {
        let (file_id, kind) = key;
        let download = self.files.download_file(file_id).await?;
        let id = self.seq_id.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(id.to_string());
        match self.extract(id, download, kind, &path).await {
            Ok(problem) => {
                info!("Extracted {} problem package {} into {:?}", kind, file_id, path);
                Ok(ProblemPackage { path, problem })
            }
            Err(err) => {
                remove_package(&path);
                Err(err)
            }
        }
    }
}

impl PackageStorage {
    async fn extract(
        &self,
        id: i64,
        download: Download,
        kind: ProblemKind,
        path: &Path,
    ) -> Result<Problem> {
        let temp_path = self.dir.join(format!("{}.tmp", id));
        let _ = tokio::fs::remove_file(&temp_path).await;
        let (archive, spooled) = match download {
            Download::Local(source) => (source, false),
            stream => {
                stream.save_to(&temp_path).await?;
                (temp_path.clone(), true)
            }
        };
        let target = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || match kind {
            ProblemKind::Polygon => PolygonProblem::extract(&archive, &target).map(Problem::Polygon),
            ProblemKind::Compiled => {
                CompiledProblem::extract(&archive, &target).map(Problem::Compiled)
            }
        })
        .await
        .context("Package extraction panicked")
        .and_then(|result| result);
        if spooled {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }
}

/// Shared problem packages keyed by file id and format
#[derive(Clone)]
pub struct ProblemPackageManager {
    cache: cache::Manager<(i64, ProblemKind), ProblemPackage>,
}

impl ProblemPackageManager {
    /// Wipes `dir`: packages never outlive the process
    pub fn new(files: FileManager, dir: PathBuf) -> Result<Self> {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).with_context(|| format!("Cannot clean {:?}", dir)),
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create problems dir {:?}", dir))?;
        let storage = PackageStorage {
            files,
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
        kind: ProblemKind,
        cancel: &CancellationToken,
    ) -> Result<Ref<ProblemPackage>, CacheError> {
        self.cache.load_sync((file_id, kind), cancel).await
    }

    pub fn delete(&self, file_id: i64, kind: ProblemKind) -> bool {
        self.cache.delete(&(file_id, kind))
    }
}
