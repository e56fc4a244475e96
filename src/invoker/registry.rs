use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use super::judge_solution::JudgeSolutionTask;
use super::task::TaskContext;
use super::update_problem_package::UpdateProblemPackageTask;
use super::Invoker;
use crate::models::TaskKind;

/// Implementation of one task kind
#[async_trait]
pub trait TaskImpl: Send {
    async fn execute(&mut self, ctx: &TaskContext) -> Result<()>;
}

pub type TaskFactory = fn(&Invoker) -> Box<dyn TaskImpl>;

/// Task kinds a worker knows how to run
pub struct TaskRegistry {
    factories: HashMap<TaskKind, TaskFactory>,
}

impl TaskRegistry {
    /// Registry without any task kind
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn register(&mut self, kind: TaskKind, factory: TaskFactory) -> Result<()> {
        if self.factories.contains_key(&kind) {
            anyhow::bail!("Task {} is already registered", kind);
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    #[cfg(test)]
    pub fn is_supported(&self, kind: TaskKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn new_task(&self, kind: TaskKind, invoker: &Invoker) -> Option<Box<dyn TaskImpl>> {
        self.factories.get(&kind).map(|factory| factory(invoker))
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        let mut factories: HashMap<TaskKind, TaskFactory> = HashMap::new();
        factories.insert(TaskKind::JudgeSolution, JudgeSolutionTask::factory);
        factories.insert(
            TaskKind::UpdateProblemPackage,
            UpdateProblemPackageTask::factory,
        );
        Self { factories }
    }
}
