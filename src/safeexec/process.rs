use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::utils::{clean_path, join_rooted};
use crate::core::TruncateBuffer;

/// Grace period between SIGTERM and SIGKILL on cancellation
const KILL_DELAY: Duration = Duration::from_secs(1);

/// Resource usage reported by the sandbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub exit_code: i32,
    /// CPU time
    pub time: Duration,
    /// Wall clock time
    pub real_time: Duration,
    /// Peak memory in bytes
    pub memory: i64,
}

impl Report {
    fn terminated() -> Self {
        Self {
            exit_code: -1,
            ..Self::default()
        }
    }
}

/// Parse the `key value` report written by the sandbox
pub fn parse_report(content: &str) -> Result<Report> {
    let mut report = Report::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            bail!("Cannot read report line {:?}", line);
        };
        match key {
            "exit_code" => {
                report.exit_code = value.parse().context("Cannot parse exit_code")?;
            }
            "time" => {
                report.time = Duration::from_millis(value.parse().context("Cannot parse time")?);
            }
            "real_time" => {
                report.real_time =
                    Duration::from_millis(value.parse().context("Cannot parse real_time")?);
            }
            "memory" => {
                report.memory = value.parse().context("Cannot parse memory")?;
            }
            _ => {}
        }
    }
    Ok(report)
}

pub(super) struct Parts {
    pub path: PathBuf,
    pub cgroup_path: PathBuf,
    pub workdir: PathBuf,
    pub command: Command,
    pub stdout_sink: Option<Arc<TruncateBuffer>>,
    pub stderr_sink: Option<Arc<TruncateBuffer>>,
    pub cancel: CancellationToken,
}

/// Sandboxed process; its run directory is removed on release or drop
pub struct Process {
    path: PathBuf,
    cgroup_path: PathBuf,
    workdir: PathBuf,
    command: Option<Command>,
    child: Option<Child>,
    stdout_sink: Option<Arc<TruncateBuffer>>,
    stderr_sink: Option<Arc<TruncateBuffer>>,
    readers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
    released: bool,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("path", &self.path)
            .field("workdir", &self.workdir)
            .field("released", &self.released)
            .finish()
    }
}

impl Process {
    pub(super) fn new(parts: Parts) -> Self {
        Self {
            path: parts.path,
            cgroup_path: parts.cgroup_path,
            workdir: parts.workdir,
            command: Some(parts.command),
            child: None,
            stdout_sink: parts.stdout_sink,
            stderr_sink: parts.stderr_sink,
            readers: Vec::new(),
            cancel: parts.cancel,
            released: false,
        }
    }

    /// Launch the sandbox.
    ///
    /// The prepared command is dropped right after spawning, so the parent
    /// keeps no copies of the redirected pipe ends.
    pub fn start(&mut self) -> Result<()> {
        let mut command = self.command.take().context("Process already started")?;
        let mut child = command.spawn().context("Failed to start safeexec")?;
        drop(command);
        if let Some(sink) = self.stdout_sink.take() {
            if let Some(stdout) = child.stdout.take() {
                self.readers.push(spawn_reader(stdout, sink));
            }
        }
        if let Some(sink) = self.stderr_sink.take() {
            if let Some(stderr) = child.stderr.take() {
                self.readers.push(spawn_reader(stderr, sink));
            }
        }
        self.child = Some(child);
        Ok(())
    }

    /// Wait for the process to exit and read its report.
    ///
    /// Cancellation and termination by SIGTERM are not errors: the report
    /// carries exit code -1 instead.
    pub async fn wait(&mut self) -> Result<Report> {
        let child = self.child.as_mut().context("Process is not started")?;
        let status = tokio::select! {
            status = child.wait() => Some(status.context("Failed to wait for safeexec")?),
            _ = self.cancel.cancelled() => None,
        };
        let Some(status) = status else {
            debug!("Terminating canceled process {:?}", self.path);
            terminate(child).await;
            for reader in self.readers.drain(..) {
                reader.abort();
            }
            return Ok(Report::terminated());
        };
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        if !status.success() {
            if status.signal() == Some(Signal::SIGTERM as i32) {
                return Ok(Report::terminated());
            }
            bail!("Safeexec failed: {}", status);
        }
        let path = self.path.join("report.txt");
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read report {:?}", path))?;
        parse_report(&content)
    }

    /// Writable layer of the process
    pub fn upper_dir(&self) -> PathBuf {
        self.path.join("upper")
    }

    /// Host path of `path` inside the writable layer; relative paths are
    /// resolved from the process working directory.
    pub fn upper_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            clean_path(path)
        } else {
            clean_path(&self.workdir.join(path))
        };
        join_rooted(&self.upper_dir(), &path)
    }

    /// Kill the process if needed and remove its run directory; idempotent
    pub fn release(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        self.command.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        let _ = std::fs::remove_dir(&self.cgroup_path);
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove {:?}", self.path)),
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to release process: {:#}", err);
        }
    }
}

async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    if tokio::time::timeout(KILL_DELAY, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

fn spawn_reader<R>(mut reader: R, sink: Arc<TruncateBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        // Keep draining past the limit so the writer never blocks.
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.write(&chunk[..n]),
            }
        }
    })
}
