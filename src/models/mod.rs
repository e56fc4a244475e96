//! Persisted entities and judging reports

mod compiler;
mod file;
mod problem;
mod report;
mod setting;
mod solution;
mod task;
mod verdict;

pub use compiler::{Compiler, CompilerCommandConfig, CompilerConfig};
pub use file::{File, FileStatus};
pub use problem::{
    Problem, ProblemConfig, ProblemResource, ProblemResourceKind,
    ProblemStatementConfig, ProblemStatementResourceConfig, ProblemStatementSample,
};
pub use report::{ExecuteReport, SolutionReport, TestReport, UsageReport};
pub use setting::Setting;
pub use solution::Solution;
pub use task::{
    JudgeSolutionTaskConfig, JudgeSolutionTaskState, Task, TaskKind, TaskStatus,
    UpdateProblemPackageTaskConfig, UpdateProblemPackageTaskState,
};
pub use verdict::Verdict;
