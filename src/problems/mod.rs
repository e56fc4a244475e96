//! Problem packages
//!
//! A package is either a polygon source package, which must be compiled
//! before use, or a compiled package produced from one.

pub mod cache;
pub mod compiled;
pub mod polygon;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use cache::ProblemPackageManager;
pub use compiled::{build_compiled_problem, CompiledProblem};
pub use polygon::PolygonProblem;

use crate::compilers::Compiler;
use crate::models::ProblemStatementConfig;

/// Resolves compilers for problem executables
#[async_trait]
pub trait CompileContext: Send + Sync {
    async fn get_compiler(&self, name: &str, cancel: &CancellationToken) -> Result<Compiler>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Polygon,
    Compiled,
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemKind::Polygon => write!(f, "polygon"),
            ProblemKind::Compiled => write!(f, "compiled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemTest {
    pub input_path: PathBuf,
    pub answer_path: PathBuf,
    pub points: f64,
    /// Empty when the test is not in a group
    pub group: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemExecutableKind {
    TestlibChecker,
    TestlibInteractor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemExecutable {
    pub name: String,
    pub kind: ProblemExecutableKind,
    pub binary_path: PathBuf,
    /// Compiler name, as understood by the compile context
    pub compiler: String,
}

impl ProblemExecutable {
    pub async fn compiler(
        &self,
        ctx: &dyn CompileContext,
        cancel: &CancellationToken,
    ) -> Result<Compiler> {
        ctx.get_compiler(&self.compiler, cancel).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointsPolicy {
    EachTest,
    CompleteGroup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemTestGroup {
    pub name: String,
    pub points_policy: PointsPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemTestSet {
    pub name: String,
    /// Milliseconds
    pub time_limit: i64,
    /// Bytes
    pub memory_limit: i64,
    pub tests: Vec<ProblemTest>,
    pub groups: Vec<ProblemTestGroup>,
}

/// File referenced from a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemStatementResource {
    pub name: String,
    pub path: PathBuf,
}

impl ProblemStatementResource {
    /// Hex encoded SHA-256 of the content
    pub fn hash(&self) -> Result<String> {
        Ok(crate::storage::file_hash(&self.path)?.1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProblemStatement {
    pub config: ProblemStatementConfig,
    pub resources: Vec<ProblemStatementResource>,
}

impl ProblemStatement {
    pub fn locale(&self) -> &str {
        &self.config.locale
    }
}

/// Problem package extracted on disk
pub enum Problem {
    Polygon(PolygonProblem),
    Compiled(CompiledProblem),
}

impl Problem {
    #[cfg(test)]
    pub fn kind(&self) -> ProblemKind {
        match self {
            Problem::Polygon(_) => ProblemKind::Polygon,
            Problem::Compiled(_) => ProblemKind::Compiled,
        }
    }

    /// Build executables and generate missing test files; a no-op for
    /// compiled packages
    pub async fn compile(&self, ctx: &dyn CompileContext, cancel: &CancellationToken) -> Result<()> {
        match self {
            Problem::Polygon(problem) => problem.compile(ctx, cancel).await,
            Problem::Compiled(_) => Ok(()),
        }
    }

    pub fn executables(&self) -> Result<Vec<ProblemExecutable>> {
        match self {
            Problem::Polygon(problem) => Ok(problem.executables()),
            Problem::Compiled(problem) => Ok(problem.executables()),
        }
    }

    pub fn test_sets(&self) -> Result<Vec<ProblemTestSet>> {
        match self {
            Problem::Polygon(problem) => problem.test_sets(),
            Problem::Compiled(problem) => Ok(problem.test_sets()),
        }
    }

    pub fn statements(&self) -> Result<Vec<ProblemStatement>> {
        match self {
            Problem::Polygon(problem) => problem.statements(),
            Problem::Compiled(_) => Ok(Vec::new()),
        }
    }

    /// Executable of the given kind, if the problem has one
    pub fn executable(&self, kind: ProblemExecutableKind) -> Result<Option<ProblemExecutable>> {
        Ok(self.executables()?.into_iter().find(|e| e.kind == kind))
    }
}
