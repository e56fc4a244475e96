//! Worker configuration
//!
//! Loaded from a TOML file (`INVOKER_CONFIG`, default `./invoker.toml`).
//! Connection settings can be overridden through the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "./invoker.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent task workers
    pub workers: i64,
    pub safeexec: SafeexecConfig,
    pub cache: CacheConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 1,
            safeexec: SafeexecConfig::default(),
            cache: CacheConfig::default(),
            redis: RedisConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafeexecConfig {
    /// Path to the sandbox binary
    pub path: PathBuf,
    /// Cgroup for sandboxed processes, relative to the worker cgroup unless absolute
    pub cgroup: String,
    pub memory_peak: bool,
    pub cpu_limit: bool,
    /// Maximum number of pids per process, 0 means unlimited
    pub pids_limit: u32,
    /// Directory for per-process run directories
    pub execution_dir: PathBuf,
}

impl Default for SafeexecConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("safeexec"),
            cgroup: "../solve-safeexec".to_string(),
            memory_peak: true,
            cpu_limit: true,
            pids_limit: 0,
            execution_dir: PathBuf::from("/tmp/solve-safeexec"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub compilers_dir: PathBuf,
    pub problems_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            compilers_dir: PathBuf::from("/tmp/solve-compilers"),
            problems_dir: PathBuf::from("/tmp/solve-problems"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    S3(S3Config),
    Local { dir: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::S3(S3Config::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            bucket: "solve".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

impl Config {
    /// Load config from `INVOKER_CONFIG` and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("INVOKER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a config file; a missing file yields defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("Failed to parse config {:?}", path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("Failed to read config {:?}", path)),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("REDIS_URL") {
            self.redis.url = url;
        }
        if let StorageConfig::S3(s3) = &mut self.storage {
            let overrides = [
                ("S3_ENDPOINT", &mut s3.endpoint),
                ("S3_ACCESS_KEY", &mut s3.access_key),
                ("S3_SECRET_KEY", &mut s3.secret_key),
                ("S3_BUCKET", &mut s3.bucket),
                ("S3_REGION", &mut s3.region),
            ];
            for (name, field) in overrides {
                if let Some(value) = var(name) {
                    *field = value;
                }
            }
        }
    }

    /// Number of workers to run, at least one
    pub fn worker_count(&self) -> usize {
        usize::try_from(self.workers).unwrap_or(0).max(1)
    }
}
