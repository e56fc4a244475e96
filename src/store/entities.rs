use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::{
    Backend, CompilerStore, FileStore, ProblemResourceStore, ProblemStore, SettingStore,
    SolutionStore, StoreError, TaskStore,
};
use crate::core::utils::unix_now;
use crate::models::{
    Compiler, File, Problem, ProblemResource, Setting, Solution, Task, TaskStatus,
};

mod kinds {
    pub const SOLUTION: &str = "solution";
    pub const PROBLEM: &str = "problem";
    pub const COMPILER: &str = "compiler";
    pub const SETTING: &str = "setting";
    pub const PROBLEM_RESOURCE: &str = "problem_resource";
    pub const TASK: &str = "task";
    pub const FILE: &str = "file";
}

const TASK_QUEUE: &str = "task:queue";

fn entity_key(kind: &str, id: i64) -> String {
    format!("{}:{}", kind, id)
}

fn compiler_name_key(name: &str) -> String {
    format!("{}:name:{}", kinds::COMPILER, name)
}

fn setting_key(key: &str) -> String {
    format!("{}:key:{}", kinds::SETTING, key)
}

fn problem_resources_key(problem_id: i64) -> String {
    format!("{}:{}:resources", kinds::PROBLEM, problem_id)
}

/// Typed entity store over a key-value backend
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    async fn load<T: DeserializeOwned>(&self, kind: &'static str, id: i64) -> Result<T> {
        let raw = self
            .backend
            .get(&entity_key(kind, id))
            .await?
            .ok_or_else(|| StoreError::not_found(kind, id))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid {} {}", kind, id))
    }

    async fn save<T: Serialize>(&self, kind: &'static str, id: i64, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(&entity_key(kind, id), &raw).await
    }

    async fn ensure_exists(&self, kind: &'static str, id: i64) -> Result<()> {
        match self.backend.get(&entity_key(kind, id)).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(kind, id).into()),
        }
    }

    async fn next_id(&self, kind: &'static str) -> Result<i64> {
        self.backend.incr(&format!("{}:seq", kind)).await
    }
}

#[async_trait]
impl SolutionStore for Store {
    async fn get(&self, id: i64) -> Result<Solution> {
        self.load(kinds::SOLUTION, id).await
    }

    #[cfg(test)]
    async fn create(&self, solution: &mut Solution) -> Result<()> {
        solution.id = self.next_id(kinds::SOLUTION).await?;
        self.save(kinds::SOLUTION, solution.id, solution).await
    }

    async fn update(&self, solution: &Solution) -> Result<()> {
        self.ensure_exists(kinds::SOLUTION, solution.id).await?;
        self.save(kinds::SOLUTION, solution.id, solution).await
    }
}

#[async_trait]
impl ProblemStore for Store {
    async fn get(&self, id: i64) -> Result<Problem> {
        self.load(kinds::PROBLEM, id).await
    }

    #[cfg(test)]
    async fn create(&self, problem: &mut Problem) -> Result<()> {
        problem.id = self.next_id(kinds::PROBLEM).await?;
        self.save(kinds::PROBLEM, problem.id, problem).await
    }

    async fn update(&self, problem: &Problem) -> Result<()> {
        self.ensure_exists(kinds::PROBLEM, problem.id).await?;
        self.save(kinds::PROBLEM, problem.id, problem).await
    }
}

#[async_trait]
impl CompilerStore for Store {
    async fn get(&self, id: i64) -> Result<Compiler> {
        self.load(kinds::COMPILER, id).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Compiler> {
        let id = self
            .backend
            .get(&compiler_name_key(name))
            .await?
            .ok_or_else(|| StoreError::not_found(kinds::COMPILER, name))?;
        let id = id
            .parse()
            .with_context(|| format!("Invalid compiler index for {:?}", name))?;
        self.load(kinds::COMPILER, id).await
    }

    #[cfg(test)]
    async fn create(&self, compiler: &mut Compiler) -> Result<()> {
        compiler.id = self.next_id(kinds::COMPILER).await?;
        self.save(kinds::COMPILER, compiler.id, compiler).await?;
        self.backend
            .set(&compiler_name_key(&compiler.name), &compiler.id.to_string())
            .await
    }
}

#[async_trait]
impl SettingStore for Store {
    async fn get_by_key(&self, key: &str) -> Result<Option<Setting>> {
        match self.backend.get(&setting_key(key)).await? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).with_context(|| format!("Invalid setting {:?}", key))?,
            )),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    async fn set(&self, key: &str, value: &str) -> Result<Setting> {
        let id = match self.get_by_key(key).await? {
            Some(setting) => setting.id,
            None => self.next_id(kinds::SETTING).await?,
        };
        let setting = Setting {
            id,
            key: key.to_string(),
            value: value.to_string(),
        };
        self.backend
            .set(&setting_key(key), &serde_json::to_string(&setting)?)
            .await?;
        Ok(setting)
    }
}

#[async_trait]
impl ProblemResourceStore for Store {
    async fn find_by_problem(&self, problem_id: i64) -> Result<Vec<ProblemResource>> {
        let mut ids = self
            .backend
            .set_members(&problem_resources_key(problem_id))
            .await?;
        ids.sort_unstable();
        let mut resources = Vec::with_capacity(ids.len());
        for id in ids {
            resources.push(self.load(kinds::PROBLEM_RESOURCE, id).await?);
        }
        Ok(resources)
    }

    async fn create(&self, resource: &mut ProblemResource) -> Result<()> {
        resource.id = self.next_id(kinds::PROBLEM_RESOURCE).await?;
        self.save(kinds::PROBLEM_RESOURCE, resource.id, resource).await?;
        self.backend
            .set_add(&problem_resources_key(resource.problem_id), resource.id)
            .await
    }

    async fn update(&self, resource: &ProblemResource) -> Result<()> {
        self.ensure_exists(kinds::PROBLEM_RESOURCE, resource.id).await?;
        self.save(kinds::PROBLEM_RESOURCE, resource.id, resource).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let resource: ProblemResource = self.load(kinds::PROBLEM_RESOURCE, id).await?;
        self.backend
            .set_remove(&problem_resources_key(resource.problem_id), id)
            .await?;
        self.backend
            .delete(&entity_key(kinds::PROBLEM_RESOURCE, id))
            .await
    }
}

#[async_trait]
impl TaskStore for Store {
    #[cfg(test)]
    async fn get(&self, id: i64) -> Result<Task> {
        self.load(kinds::TASK, id).await
    }

    #[cfg(test)]
    async fn create(&self, task: &mut Task) -> Result<()> {
        task.id = self.next_id(kinds::TASK).await?;
        task.status = TaskStatus::Queued;
        self.save(kinds::TASK, task.id, task).await?;
        self.backend.list_push(TASK_QUEUE, task.id).await
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.ensure_exists(kinds::TASK, task.id).await?;
        self.save(kinds::TASK, task.id, task).await
    }

    async fn pop_queued(&self, lease: Duration) -> Result<Option<Task>> {
        while let Some(id) = self.backend.list_pop(TASK_QUEUE).await? {
            let mut task: Task = match self.load(kinds::TASK, id).await {
                Ok(task) => task,
                Err(err) => {
                    warn!("Skipping queued task {}: {:#}", id, err);
                    continue;
                }
            };
            if task.status != TaskStatus::Queued {
                continue;
            }
            task.status = TaskStatus::Running;
            task.expire_time = Some(unix_now() + lease.as_secs() as i64);
            self.save(kinds::TASK, id, &task).await?;
            return Ok(Some(task));
        }
        Ok(None)
    }
}

#[async_trait]
impl FileStore for Store {
    async fn get(&self, id: i64) -> Result<File> {
        self.load(kinds::FILE, id).await
    }

    async fn create(&self, file: &mut File) -> Result<()> {
        file.id = self.next_id(kinds::FILE).await?;
        self.save(kinds::FILE, file.id, file).await
    }

    async fn update(&self, file: &File) -> Result<()> {
        self.ensure_exists(kinds::FILE, file.id).await?;
        self.save(kinds::FILE, file.id, file).await
    }
}
