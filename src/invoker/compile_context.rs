//! Compiler resolution for a single task

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::Ref;
use crate::compilers::{Compiler, CompilerImage, CompilerImageManager};
use crate::models;
use crate::problems::CompileContext;
use crate::store::{CompilerStore, SettingStore};

/// Resolves compilers by id or name, holding one image reference per image
/// until released
pub struct BaseCompileContext {
    compilers: Arc<dyn CompilerStore>,
    images: CompilerImageManager,
    loaded: Mutex<HashMap<i64, Ref<CompilerImage>>>,
}

impl BaseCompileContext {
    pub fn new(compilers: Arc<dyn CompilerStore>, images: CompilerImageManager) -> Self {
        Self {
            compilers,
            images,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub async fn compiler_by_id(&self, id: i64, cancel: &CancellationToken) -> Result<Compiler> {
        let compiler = self.compilers.get(id).await?;
        self.compiler(compiler, cancel).await
    }

    pub async fn compiler_by_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Compiler> {
        let compiler = self.compilers.get_by_name(name).await?;
        self.compiler(compiler, cancel).await
    }

    async fn compiler(
        &self,
        compiler: models::Compiler,
        cancel: &CancellationToken,
    ) -> Result<Compiler> {
        let mut loaded = self.loaded.lock().await;
        if let Some(image) = loaded.get(&compiler.image_id).and_then(Ref::value) {
            return Ok(image.compiler(&compiler.name, compiler.config));
        }
        debug!("Loading image {} of compiler {}", compiler.image_id, compiler.name);
        let image = self
            .images
            .load_sync(compiler.image_id, cancel)
            .await
            .with_context(|| format!("Cannot load image of compiler {:?}", compiler.name))?;
        let result = image
            .value()
            .context("Compiler image is not loaded")?
            .compiler(&compiler.name, compiler.config);
        loaded.insert(compiler.image_id, image);
        Ok(result)
    }

    /// Drop every image reference taken by this context
    pub async fn release(&self) {
        for (_, image) in self.loaded.lock().await.drain() {
            image.release();
        }
    }
}

#[async_trait]
impl CompileContext for BaseCompileContext {
    async fn get_compiler(&self, name: &str, cancel: &CancellationToken) -> Result<Compiler> {
        self.compiler_by_name(name, cancel).await
    }
}

/// Maps polygon source types to compilers through settings
/// `invoker.compilers.polygon.<type>`
pub struct PolygonCompileContext<'a> {
    base: &'a BaseCompileContext,
    settings: Arc<dyn SettingStore>,
}

impl<'a> PolygonCompileContext<'a> {
    pub fn new(base: &'a BaseCompileContext, settings: Arc<dyn SettingStore>) -> Self {
        Self { base, settings }
    }

    async fn compiler_name(&self, polygon_type: &str) -> Result<String> {
        let name = format!("polygon.{}", polygon_type);
        match self
            .settings
            .get_by_key(&format!("invoker.compilers.{}", name))
            .await?
        {
            Some(setting) => Ok(setting.value),
            None => bail!("Cannot get compiler {:?}", name),
        }
    }
}

#[async_trait]
impl CompileContext for PolygonCompileContext<'_> {
    async fn get_compiler(
        &self,
        polygon_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Compiler> {
        let name = self.compiler_name(polygon_type).await?;
        self.base.compiler_by_name(&name, cancel).await
    }
}
