//! Persistence of entities consumed by the invoker
//!
//! Entities are stored as JSON documents in a key-value [`Backend`]
//! (Redis in production, memory in tests); [`Store`] implements the
//! typed per-entity traits on top of it.

mod entities;
#[cfg(test)]
mod memory;
mod redis_backend;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

pub use self::entities::Store;
#[cfg(test)]
pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;

use crate::models::{Compiler, File, Problem, ProblemResource, Setting, Solution, Task};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Primitive operations every storage backend provides
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Atomically increment a counter and return the new value
    async fn incr(&self, key: &str) -> Result<i64>;
    async fn set_add(&self, key: &str, member: i64) -> Result<()>;
    async fn set_remove(&self, key: &str, member: i64) -> Result<()>;
    async fn set_members(&self, key: &str) -> Result<Vec<i64>>;
    #[cfg(test)]
    async fn list_push(&self, key: &str, value: i64) -> Result<()>;
    /// Atomically remove and return the head of a list
    async fn list_pop(&self, key: &str) -> Result<Option<i64>>;
}

#[async_trait]
pub trait SolutionStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Solution>;
    #[cfg(test)]
    async fn create(&self, solution: &mut Solution) -> Result<()>;
    async fn update(&self, solution: &Solution) -> Result<()>;
}

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Problem>;
    #[cfg(test)]
    async fn create(&self, problem: &mut Problem) -> Result<()>;
    async fn update(&self, problem: &Problem) -> Result<()>;
}

#[async_trait]
pub trait CompilerStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Compiler>;
    async fn get_by_name(&self, name: &str) -> Result<Compiler>;
    #[cfg(test)]
    async fn create(&self, compiler: &mut Compiler) -> Result<()>;
}

#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn get_by_key(&self, key: &str) -> Result<Option<Setting>>;
    #[cfg(test)]
    async fn set(&self, key: &str, value: &str) -> Result<Setting>;
}

#[async_trait]
pub trait ProblemResourceStore: Send + Sync {
    async fn find_by_problem(&self, problem_id: i64) -> Result<Vec<ProblemResource>>;
    async fn create(&self, resource: &mut ProblemResource) -> Result<()>;
    async fn update(&self, resource: &ProblemResource) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    #[cfg(test)]
    async fn get(&self, id: i64) -> Result<Task>;
    #[cfg(test)]
    /// Store a new task and put it into the queue
    async fn create(&self, task: &mut Task) -> Result<()>;
    async fn update(&self, task: &Task) -> Result<()>;
    /// Claim the next queued task: it becomes running with a lease of `lease`
    async fn pop_queued(&self, lease: Duration) -> Result<Option<Task>>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<File>;
    async fn create(&self, file: &mut File) -> Result<()>;
    async fn update(&self, file: &File) -> Result<()>;
}

/// Entity stores used by the invoker
#[derive(Clone)]
pub struct Core {
    pub solutions: Arc<dyn SolutionStore>,
    pub problems: Arc<dyn ProblemStore>,
    pub compilers: Arc<dyn CompilerStore>,
    pub settings: Arc<dyn SettingStore>,
    pub problem_resources: Arc<dyn ProblemResourceStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub files: Arc<dyn FileStore>,
}

impl Core {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let store = Arc::new(Store::new(backend));
        Self {
            solutions: store.clone(),
            problems: store.clone(),
            compilers: store.clone(),
            settings: store.clone(),
            problem_resources: store.clone(),
            tasks: store.clone(),
            files: store,
        }
    }

    #[cfg(test)]
    /// In-memory core for tests
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    pub async fn redis(url: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(RedisBackend::connect(url).await?)))
    }
}
