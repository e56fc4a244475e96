use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    JudgeSolution,
    UpdateProblemPackage,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::JudgeSolution => write!(f, "judge_solution"),
            TaskKind::UpdateProblemPackage => write!(f, "update_problem_package"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// Queued unit of background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub state: serde_json::Value,
    /// Lease expiration as unix seconds, set while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<i64>,
}

impl Task {
    #[cfg(test)]
    pub fn new<C: Serialize>(kind: TaskKind, config: &C) -> Result<Self> {
        Ok(Self {
            id: 0,
            kind,
            status: TaskStatus::Queued,
            config: serde_json::to_value(config)?,
            state: serde_json::Value::Null,
            expire_time: None,
        })
    }

    pub fn scan_config<C: DeserializeOwned>(&self) -> Result<C> {
        serde_json::from_value(self.config.clone())
            .with_context(|| format!("Invalid config of task {}", self.id))
    }

    #[cfg(test)]
    pub fn scan_state<S: DeserializeOwned + Default>(&self) -> Result<S> {
        if self.state.is_null() {
            return Ok(S::default());
        }
        serde_json::from_value(self.state.clone())
            .with_context(|| format!("Invalid state of task {}", self.id))
    }

    pub fn set_state<S: Serialize>(&mut self, state: &S) -> Result<()> {
        self.state = serde_json::to_value(state)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeSolutionTaskConfig {
    pub solution_id: i64,
    #[serde(default)]
    pub enable_points: bool,
}

/// Live judging progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeSolutionTaskState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stage: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub test: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProblemPackageTaskConfig {
    pub problem_id: i64,
    pub file_id: i64,
    #[serde(default)]
    pub compile: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateProblemPackageTaskState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}
