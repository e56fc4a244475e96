//! Compilers and executables
//!
//! A [`Compiler`] runs the compile step of a compiler image inside the
//! sandbox; an [`Executable`] runs the produced binary over the same image.

pub mod cache;
pub mod interaction;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use cache::{CompilerImage, CompilerImageManager};

use crate::core::utils::{copy_file_rec, join_rooted};
use crate::core::TruncateBuffer;
use crate::models::{CompilerCommandConfig, CompilerConfig};
use crate::safeexec::{self, Process, ProcessConfig, Redirect};

/// Extra file staged next to the source before compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountFile {
    pub source: PathBuf,
    /// Path relative to the compile working directory
    pub target: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub source: PathBuf,
    pub target: PathBuf,
    pub input_files: Vec<MountFile>,
    pub time_limit: Duration,
    pub memory_limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileReport {
    pub exit_code: i32,
    pub used_time: Duration,
    pub used_memory: i64,
    pub log: String,
}

impl CompileReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Default)]
pub struct ExecuteOptions {
    pub args: Vec<String>,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    pub time_limit: Duration,
    pub memory_limit: i64,
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Compiler bound to an extracted image layer
#[derive(Clone)]
pub struct Compiler {
    name: String,
    layer: PathBuf,
    config: CompilerConfig,
    safeexec: Arc<safeexec::Manager>,
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("name", &self.name)
            .field("layer", &self.layer)
            .finish()
    }
}

impl Compiler {
    pub fn new(
        name: impl Into<String>,
        layer: PathBuf,
        config: CompilerConfig,
        safeexec: Arc<safeexec::Manager>,
    ) -> Self {
        Self {
            name: name.into(),
            layer,
            config,
            safeexec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compile `options.source` into `options.target`.
    ///
    /// A failed compilation is not an error: check [`CompileReport::success`].
    pub async fn compile(
        &self,
        options: CompileOptions,
        cancel: &CancellationToken,
    ) -> Result<CompileReport> {
        let Some(compile) = &self.config.compile else {
            copy_file_rec(&options.source, &options.target)
                .await
                .context("Unable to copy source")?;
            return Ok(CompileReport::default());
        };
        let log = Arc::new(TruncateBuffer::default());
        let config = ProcessConfig {
            time_limit: options.time_limit,
            memory_limit: options.memory_limit,
            stdout: Redirect::Buffer(log.clone()),
            stderr: Redirect::Buffer(log.clone()),
            layers: vec![self.layer.clone()],
            environ: compile.environ.clone(),
            workdir: PathBuf::from(&compile.workdir),
            command: split_command(&compile.command),
            ..Default::default()
        };
        let mut process = self
            .safeexec
            .create(config, cancel)
            .await
            .context("Unable to create compiler")?;
        if let Some(source) = &compile.source {
            copy_file_rec(&options.source, &process.upper_path(source))
                .await
                .context("Unable to write source")?;
        }
        for file in &options.input_files {
            copy_file_rec(&file.source, &process.upper_path(&file.target))
                .await
                .context("Unable to write file")?;
        }
        process.start().context("Cannot start compiler")?;
        let report = process.wait().await?;
        if report.exit_code == 0 {
            if let Some(binary) = &compile.binary {
                copy_file_rec(&process.upper_path(binary), &options.target)
                    .await
                    .context("Unable to copy binary")?;
            }
        }
        process.release()?;
        debug!(
            "Compiler {} exited with code {} in {:?}",
            self.name, report.exit_code, report.time
        );
        Ok(CompileReport {
            exit_code: report.exit_code,
            used_time: report.time,
            used_memory: report.memory,
            log: log.text(),
        })
    }

    /// Prepare a runnable unit for a binary produced by [`Compiler::compile`]
    pub async fn create_executable(&self, binary_path: &Path) -> Result<Executable> {
        let Some(execute) = &self.config.execute else {
            bail!("Compiler has empty execute config");
        };
        let mut executable = Executable {
            compiler: self.clone(),
            layer: None,
            config: execute.clone(),
        };
        let Some(binary) = &execute.binary else {
            return Ok(executable);
        };
        let layer = tempfile::Builder::new().prefix("layer-").tempdir()?;
        let target = join_rooted(&join_rooted(layer.path(), Path::new(&execute.workdir)), Path::new(binary));
        copy_file_rec(binary_path, &target)
            .await
            .context("Unable to copy binary")?;
        executable.layer = Some(layer);
        Ok(executable)
    }
}

/// Runnable program: a private layer with the binary over the compiler image
pub struct Executable {
    compiler: Compiler,
    layer: Option<TempDir>,
    config: CompilerCommandConfig,
}

impl Executable {
    pub async fn create_process(
        &self,
        options: ExecuteOptions,
        cancel: &CancellationToken,
    ) -> Result<Process> {
        let mut command = split_command(&self.config.command);
        command.extend(options.args);
        let config = ProcessConfig {
            time_limit: options.time_limit,
            memory_limit: options.memory_limit,
            stdin: options.stdin,
            stdout: options.stdout,
            stderr: options.stderr,
            layers: self.layers(),
            environ: self.config.environ.clone(),
            workdir: PathBuf::from(&self.config.workdir),
            command,
        };
        self.compiler.safeexec.create(config, cancel).await
    }

    /// Layers of the process, topmost first
    pub fn layers(&self) -> Vec<PathBuf> {
        match &self.layer {
            Some(layer) => vec![layer.path().to_path_buf(), self.compiler.layer.clone()],
            None => vec![self.compiler.layer.clone()],
        }
    }

    /// Remove the private layer
    pub fn release(self) -> Result<()> {
        if let Some(layer) = self.layer {
            layer.close().context("Cannot remove executable layer")?;
        }
        Ok(())
    }
}
