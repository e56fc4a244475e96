use serde::{Deserialize, Serialize};

use super::Verdict;

/// Peak resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Time in milliseconds
    pub time: i64,
    /// Memory in bytes
    pub memory: i64,
}

impl UsageReport {
    /// Component-wise maximum
    pub fn max(self, other: UsageReport) -> UsageReport {
        UsageReport {
            time: self.time.max(other.time),
            memory: self.memory.max(other.memory),
        }
    }
}

/// Usage and captured log of an auxiliary process (compiler, checker, interactor)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteReport {
    pub usage: UsageReport,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub verdict: Verdict,
    #[serde(default)]
    pub usage: UsageReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker: Option<ExecuteReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interactor: Option<ExecuteReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
}

impl TestReport {
    pub fn new(verdict: Verdict, usage: UsageReport) -> Self {
        Self {
            verdict,
            usage,
            checker: None,
            interactor: None,
            points: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionReport {
    pub verdict: Verdict,
    #[serde(default)]
    pub usage: UsageReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<ExecuteReport>,
    #[serde(default)]
    pub tests: Vec<TestReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
}

impl SolutionReport {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            usage: UsageReport::default(),
            compiler: None,
            tests: Vec::new(),
            points: None,
        }
    }
}
