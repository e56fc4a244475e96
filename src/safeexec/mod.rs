//! Sandboxed process execution
//!
//! Wraps the external `safeexec` binary: every process runs over a stack of
//! read-only overlay layers with a private writable upper directory, inside its
//! own cgroup, with time and memory limits.

mod cgroup;
mod process;

#[cfg(test)]
pub(crate) mod testing;

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use process::{Process, Report};

use crate::config::SafeexecConfig;
use crate::core::utils::{clean_path, random_name};
use crate::core::TruncateBuffer;

const MEMORY_PEAK_FLAG: u32 = 1;
const CPU_LIMIT_FLAG: u32 = 2;

const MAX_NAME_ATTEMPTS: usize = 100;

/// Where a standard stream of the sandboxed process goes
#[derive(Debug, Default)]
pub enum Redirect {
    #[default]
    Null,
    File(std::fs::File),
    /// One end of an OS pipe, owned by this process only
    Pipe(OwnedFd),
    /// Output captured into a shared log buffer
    Buffer(Arc<TruncateBuffer>),
}

impl Redirect {
    fn into_stdio(self, input: bool) -> Result<(Stdio, Option<Arc<TruncateBuffer>>)> {
        Ok(match self {
            Redirect::Null => (Stdio::null(), None),
            Redirect::File(file) => (Stdio::from(file), None),
            Redirect::Pipe(fd) => (Stdio::from(fd), None),
            Redirect::Buffer(_) if input => bail!("Cannot read stdin from log buffer"),
            Redirect::Buffer(buffer) => (Stdio::piped(), Some(buffer)),
        })
    }
}

#[derive(Debug, Default)]
pub struct ProcessConfig {
    pub time_limit: Duration,
    /// Memory limit in bytes
    pub memory_limit: i64,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    /// Read-only layers, topmost first
    pub layers: Vec<PathBuf>,
    /// `KEY=VALUE` pairs
    pub environ: Vec<String>,
    /// Working directory inside the sandbox
    pub workdir: PathBuf,
    pub command: Vec<String>,
}

/// Creates sandboxed processes
#[derive(Debug)]
pub struct Manager {
    path: PathBuf,
    execution_path: PathBuf,
    cgroup_path: PathBuf,
    memory_peak: bool,
    cpu_limit: bool,
    pids_limit: u32,
}

impl Manager {
    /// Prepare the sandbox cgroup and execution directory
    pub fn new(config: &SafeexecConfig) -> Result<Self> {
        let current = cgroup::current_cgroup()?;
        let cgroup_path = cgroup::resolve_cgroup(&current, &config.cgroup)?;
        cgroup::setup_cgroup(&cgroup_path)?;
        std::fs::create_dir_all(&config.execution_dir).with_context(|| {
            format!("Failed to create execution dir {:?}", config.execution_dir)
        })?;
        let memory_peak = config.memory_peak && cgroup::has_feature(&cgroup_path, "memory.peak")?;
        let cpu_limit = config.cpu_limit && cgroup::has_feature(&cgroup_path, "cpu.max")?;
        info!(
            "Sandbox cgroup {:?} (memory peak: {}, cpu limit: {})",
            cgroup_path, memory_peak, cpu_limit
        );
        Ok(Self {
            path: config.path.clone(),
            execution_path: config.execution_dir.clone(),
            cgroup_path,
            memory_peak,
            cpu_limit,
            pids_limit: config.pids_limit,
        })
    }

    /// Manager that does not touch the cgroup hierarchy
    #[cfg(test)]
    pub(crate) fn without_cgroup(path: PathBuf, execution_path: PathBuf, cgroup_path: PathBuf) -> Self {
        Self {
            path,
            execution_path,
            cgroup_path,
            memory_peak: false,
            cpu_limit: false,
            pids_limit: 0,
        }
    }

    /// Prepare a process; it is not started until [`Process::start`].
    ///
    /// Canceling `cancel` terminates the process and makes [`Process::wait`]
    /// return a report with exit code -1.
    pub async fn create(&self, mut config: ProcessConfig, cancel: &CancellationToken) -> Result<Process> {
        let (stdin, _) = std::mem::take(&mut config.stdin).into_stdio(true)?;
        let (stdout, stdout_sink) = std::mem::take(&mut config.stdout).into_stdio(false)?;
        let (stderr, stderr_sink) = std::mem::take(&mut config.stderr).into_stdio(false)?;
        let workdir = clean_path(&Path::new("/").join(&config.workdir));
        let name = self.create_process_dir().await?;
        let path = self.execution_path.join(&name);
        let cgroup_path = self.cgroup_path.join(&name);
        match std::fs::remove_dir(&cgroup_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                let _ = tokio::fs::remove_dir_all(&path).await;
                return Err(err).with_context(|| format!("Failed to remove stale cgroup {:?}", cgroup_path));
            }
        }
        for dir in ["upper", "workdir", "rootfs"] {
            if let Err(err) = tokio::fs::create_dir(path.join(dir)).await {
                let _ = tokio::fs::remove_dir_all(&path).await;
                return Err(err).with_context(|| format!("Failed to create {} for {:?}", dir, path));
            }
        }

        let mut command = Command::new(&self.path);
        command.args(self.build_args(&config, &path, &cgroup_path, &workdir));
        command.stdin(stdin).stdout(stdout).stderr(stderr);
        command.kill_on_drop(true);
        debug!("Prepared sandbox process {} ({:?})", name, config.command);

        Ok(Process::new(process::Parts {
            path,
            cgroup_path,
            workdir,
            command,
            stdout_sink,
            stderr_sink,
            cancel: cancel.clone(),
        }))
    }

    fn build_args(
        &self,
        config: &ProcessConfig,
        path: &Path,
        cgroup_path: &Path,
        workdir: &Path,
    ) -> Vec<String> {
        let layers: Vec<String> = config
            .layers
            .iter()
            .map(|layer| layer.display().to_string())
            .collect();
        let mut args = vec![
            "--time-limit".to_string(),
            config.time_limit.as_millis().to_string(),
            "--memory-limit".to_string(),
            config.memory_limit.to_string(),
        ];
        if self.cpu_limit {
            args.extend(["--cpu-limit".to_string(), "100".to_string()]);
        }
        if self.pids_limit > 0 {
            args.extend(["--pids-limit".to_string(), self.pids_limit.to_string()]);
        }
        let path_args = [
            ("--overlay-lowerdir", layers.join(":")),
            ("--overlay-upperdir", path.join("upper").display().to_string()),
            ("--overlay-workdir", path.join("workdir").display().to_string()),
            ("--rootfs", path.join("rootfs").display().to_string()),
            ("--cgroup-path", cgroup_path.display().to_string()),
            ("--report", path.join("report.txt").display().to_string()),
            ("--workdir", workdir.display().to_string()),
        ];
        for (flag, value) in path_args {
            args.push(flag.to_string());
            args.push(value);
        }
        let mut flags = 0;
        if self.memory_peak {
            flags |= MEMORY_PEAK_FLAG;
        }
        if self.cpu_limit {
            flags |= CPU_LIMIT_FLAG;
        }
        if flags > 0 {
            args.extend(["--flags".to_string(), flags.to_string()]);
        }
        for env in &config.environ {
            args.extend(["--env".to_string(), env.clone()]);
        }
        args.extend(config.command.iter().cloned());
        args
    }

    async fn create_process_dir(&self) -> Result<String> {
        tokio::fs::create_dir_all(&self.execution_path).await?;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = random_name();
            match tokio::fs::create_dir(self.execution_path.join(&name)).await {
                Ok(()) => return Ok(name),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err).context("Failed to create process dir"),
            }
        }
        bail!("Cannot prepare process")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safeexec::testing::fake_manager;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_build_args() {
        let manager = Manager {
            path: PathBuf::from("safeexec"),
            execution_path: PathBuf::from("/run"),
            cgroup_path: PathBuf::from("/sys/fs/cgroup/solve"),
            memory_peak: true,
            cpu_limit: true,
            pids_limit: 16,
        };
        let config = ProcessConfig {
            time_limit: Duration::from_secs(2),
            memory_limit: 1024,
            layers: vec![PathBuf::from("/layers/a"), PathBuf::from("/layers/b")],
            environ: vec!["PATH=/bin".to_string()],
            command: vec!["/bin/sh".to_string(), "-c".to_string(), "true".to_string()],
            ..Default::default()
        };
        let args = manager.build_args(
            &config,
            Path::new("/run/p"),
            Path::new("/sys/fs/cgroup/solve/p"),
            Path::new("/work"),
        );
        let expected = [
            "--time-limit", "2000", "--memory-limit", "1024",
            "--cpu-limit", "100", "--pids-limit", "16",
            "--overlay-lowerdir", "/layers/a:/layers/b",
            "--overlay-upperdir", "/run/p/upper",
            "--overlay-workdir", "/run/p/workdir",
            "--rootfs", "/run/p/rootfs",
            "--cgroup-path", "/sys/fs/cgroup/solve/p",
            "--report", "/run/p/report.txt",
            "--workdir", "/work",
            "--flags", "3",
            "--env", "PATH=/bin",
            "/bin/sh", "-c", "true",
        ];
        assert_eq!(args, expected);
    }

    #[tokio::test]
    async fn test_process_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = fake_manager(dir.path());
        let stdout = Arc::new(TruncateBuffer::default());
        let config = ProcessConfig {
            time_limit: Duration::from_secs(1),
            memory_limit: 1 << 20,
            stdout: Redirect::Buffer(stdout.clone()),
            workdir: PathBuf::from("work"),
            command: vec!["sh".into(), "-c".into(), "echo -n solve_test; echo 1 > out.txt".into()],
            ..Default::default()
        };
        let mut process = assert_ok!(manager.create(config, &CancellationToken::new()).await);
        assert_eq!(process.upper_path("out.txt"), process.upper_dir().join("work/out.txt"));
        assert_ok!(process.start());
        let report = assert_ok!(process.wait().await);
        assert_eq!(report.exit_code, 0);
        assert_eq!(stdout.text(), "solve_test");
        assert_eq!(
            std::fs::read_to_string(process.upper_path("/work/out.txt")).unwrap(),
            "1\n"
        );
        let run_dir = process.upper_dir().parent().unwrap().to_path_buf();
        assert_ok!(process.release());
        assert_ok!(process.release());
        assert!(!run_dir.exists());
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let manager = fake_manager(dir.path());
        let config = ProcessConfig {
            time_limit: Duration::from_secs(1),
            command: vec!["sh".into(), "-c".into(), "exit 3".into()],
            ..Default::default()
        };
        let mut process = manager.create(config, &CancellationToken::new()).await.unwrap();
        process.start().unwrap();
        assert_eq!(process.wait().await.unwrap().exit_code, 3);
    }

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let manager = fake_manager(dir.path());
        let cancel = CancellationToken::new();
        let config = ProcessConfig {
            time_limit: Duration::from_secs(30),
            command: vec!["sleep".into(), "30".into()],
            ..Default::default()
        };
        let mut process = manager.create(config, &cancel).await.unwrap();
        process.start().unwrap();
        let canceler = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceler.cancel();
        });
        let report = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("wait must return after cancel")
            .unwrap();
        assert_eq!(report.exit_code, -1);
    }

    #[tokio::test]
    async fn test_wait_before_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = fake_manager(dir.path());
        let mut process = manager
            .create(ProcessConfig::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_err!(process.wait().await);
    }

    #[tokio::test]
    async fn test_buffer_stdin_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = fake_manager(dir.path());
        let config = ProcessConfig {
            stdin: Redirect::Buffer(Arc::new(TruncateBuffer::default())),
            ..Default::default()
        };
        assert_err!(manager.create(config, &CancellationToken::new()).await);
    }

    fn real_manager(dir: &Path) -> Option<(Manager, PathBuf)> {
        let path = std::env::var("SAFEEXEC_PATH").ok()?;
        let rootfs = std::env::var("SAFEEXEC_ROOTFS").ok()?;
        let config = SafeexecConfig {
            path: PathBuf::from(path),
            execution_dir: dir.join("safeexec"),
            ..SafeexecConfig::default()
        };
        Some((Manager::new(&config).unwrap(), PathBuf::from(rootfs)))
    }

    #[tokio::test]
    #[ignore = "requires safeexec binary and cgroup v2"]
    async fn test_safeexec_time_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, rootfs) = real_manager(dir.path()).expect("SAFEEXEC_PATH and SAFEEXEC_ROOTFS");
        let config = ProcessConfig {
            layers: vec![rootfs],
            command: vec!["/bin/sh".into(), "-c".into(), "sleep 3".into()],
            time_limit: Duration::from_secs(1),
            memory_limit: 1 << 20,
            ..Default::default()
        };
        let mut process = manager.create(config, &CancellationToken::new()).await.unwrap();
        process.start().unwrap();
        let report = process.wait().await.unwrap();
        assert_ne!(report.exit_code, 0);
        assert!(report.real_time >= Duration::from_secs(1));
    }

    #[tokio::test]
    #[ignore = "requires safeexec binary and cgroup v2"]
    async fn test_safeexec_memory_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, rootfs) = real_manager(dir.path()).expect("SAFEEXEC_PATH and SAFEEXEC_ROOTFS");
        let config = ProcessConfig {
            layers: vec![rootfs],
            command: vec!["/bin/sh".into(), "-c".into(), "echo -n solve_test".into()],
            time_limit: Duration::from_secs(1),
            memory_limit: 1024,
            ..Default::default()
        };
        let mut process = manager.create(config, &CancellationToken::new()).await.unwrap();
        process.start().unwrap();
        let report = process.wait().await.unwrap();
        assert_ne!(report.exit_code, 0);
        assert!(report.memory > 1024);
    }
}
