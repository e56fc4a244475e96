//! Judging of a single solution
//!
//! The solution is compiled with its compiler, then run over every test of
//! the compiled problem package in order. Each passed run is verified by the
//! problem checker; interactive problems run the solution against the
//! interactor through a pair of pipes. The final [`SolutionReport`] is stored
//! on the solution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::checker::{run_testlib_checker, TESTLIB_ARGS};
use super::compile_context::BaseCompileContext;
use super::registry::TaskImpl;
use super::task::TaskContext;
use super::Invoker;
use crate::compilers::interaction::{wait_pair, InteractionPipes};
use crate::compilers::{CompileOptions, Compiler, CompilerImageManager, Executable, ExecuteOptions};
use crate::core::testlib::exit_code_to_verdict;
use crate::core::utils::copy_file_rec;
use crate::core::TruncateBuffer;
use crate::models::{
    ExecuteReport, JudgeSolutionTaskConfig, JudgeSolutionTaskState, Problem, Solution,
    SolutionReport, TestReport, UsageReport, Verdict,
};
use crate::problems::{
    self, PointsPolicy, ProblemExecutableKind, ProblemKind, ProblemPackageManager, ProblemTest,
    ProblemTestGroup, ProblemTestSet,
};
use crate::safeexec::{Redirect, Report};
use crate::storage::FileManager;
use crate::store::Core;

const COMPILE_TIME_LIMIT: Duration = Duration::from_secs(20);
const COMPILE_MEMORY_LIMIT: i64 = 256 * 1024 * 1024;
const INTERACTOR_MEMORY_LIMIT: i64 = 256 * 1024 * 1024;

pub struct JudgeSolutionTask {
    core: Core,
    files: FileManager,
    compiler_images: CompilerImageManager,
    problem_packages: ProblemPackageManager,
}

impl JudgeSolutionTask {
    pub fn factory(invoker: &Invoker) -> Box<dyn TaskImpl> {
        Box::new(Self {
            core: invoker.core.clone(),
            files: invoker.files.clone(),
            compiler_images: invoker.compiler_images.clone(),
            problem_packages: invoker.problem_packages.clone(),
        })
    }

    async fn judge(
        &self,
        ctx: &TaskContext,
        compile_ctx: &BaseCompileContext,
        config: &JudgeSolutionTaskConfig,
        solution: &mut Solution,
        problem: &Problem,
    ) -> Result<()> {
        let cancel = ctx.cancel_token();
        let compiler = compile_ctx
            .compiler_by_id(solution.compiler_id, cancel)
            .await
            .context("Unable to fetch compiler")?;
        let temp_dir = tempfile::Builder::new()
            .prefix("judge-")
            .tempdir()
            .context("Cannot create temp dir")?;
        let Some(compiled_id) = problem.compiled_id else {
            bail!("Cannot prepare problem: problem {} is not compiled", problem.id);
        };
        let package = self
            .problem_packages
            .load_sync(compiled_id, ProblemKind::Compiled, cancel)
            .await
            .context("Cannot download problem")?;
        let package = package
            .value()
            .context("Problem package is not loaded")?
            .problem();
        let source = self
            .prepare_solution(solution, temp_dir.path())
            .await
            .context("Cannot prepare solution")?;

        let mut report = SolutionReport::new(Verdict::Rejected);
        let executable = compile_solution(ctx, &compiler, &source, temp_dir.path(), &mut report)
            .await
            .context("Cannot compile solution")?;
        ensure_active(cancel)?;
        match executable {
            None => report.verdict = Verdict::CompilationError,
            Some(solution_executable) => {
                let checker = problem_executable(
                    compile_ctx,
                    package,
                    ProblemExecutableKind::TestlibChecker,
                    &temp_dir,
                    cancel,
                )
                .await?
                .ok_or_else(|| anyhow!("Cannot find checker executable"))?;
                let interactor = problem_executable(
                    compile_ctx,
                    package,
                    ProblemExecutableKind::TestlibInteractor,
                    &temp_dir,
                    cancel,
                )
                .await?;
                let judge = TestRunner {
                    dir: temp_dir.path().to_path_buf(),
                    solution: solution_executable,
                    checker,
                    interactor,
                    enable_points: config.enable_points,
                    cancel: cancel.clone(),
                };
                judge
                    .run(ctx, package, &mut report)
                    .await
                    .context("Cannot judge solution")?;
                judge.release()?;
            }
        }
        ensure_active(cancel)?;
        info!("Solution {} judged: {}", solution.id, report.verdict);
        solution.report = Some(report);
        self.core
            .solutions
            .update(solution)
            .await
            .context("Cannot save solution report")
    }

    /// Write the solution source into `dir`
    async fn prepare_solution(&self, solution: &Solution, dir: &Path) -> Result<PathBuf> {
        match solution.content_id {
            None => {
                let path = dir.join("solution.txt");
                tokio::fs::write(&path, &solution.content)
                    .await
                    .context("Cannot write solution")?;
                Ok(path)
            }
            Some(content_id) => {
                let path = dir.join("solution.bin");
                self.files
                    .download_file(content_id)
                    .await
                    .context("Cannot download solution")?
                    .save_to(&path)
                    .await?;
                Ok(path)
            }
        }
    }
}

#[async_trait]
impl TaskImpl for JudgeSolutionTask {
    async fn execute(&mut self, ctx: &TaskContext) -> Result<()> {
        let config: JudgeSolutionTaskConfig = ctx
            .scan_config()
            .await
            .context("Unable to scan task config")?;
        let mut solution = self
            .core
            .solutions
            .get(config.solution_id)
            .await
            .context("Unable to fetch solution")?;
        let problem = self
            .core
            .problems
            .get(solution.problem_id)
            .await
            .context("Unable to fetch problem")?;
        let compile_ctx =
            BaseCompileContext::new(self.core.compilers.clone(), self.compiler_images.clone());
        let result = self
            .judge(ctx, &compile_ctx, &config, &mut solution, &problem)
            .await;
        compile_ctx.release().await;
        result
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        bail!("Judging was canceled");
    }
    Ok(())
}

fn usage(report: &Report) -> UsageReport {
    UsageReport {
        time: report.time.as_millis() as i64,
        memory: report.memory,
    }
}

/// Compile the source; `None` when compilation failed
async fn compile_solution(
    ctx: &TaskContext,
    compiler: &Compiler,
    source: &Path,
    dir: &Path,
    report: &mut SolutionReport,
) -> Result<Option<Executable>> {
    ctx.set_state(&JudgeSolutionTaskState {
        stage: "compiling".to_string(),
        test: 0,
    })
    .await?;
    let target = dir.join("solution");
    let compiled = compiler
        .compile(
            CompileOptions {
                source: source.to_path_buf(),
                target: target.clone(),
                input_files: Vec::new(),
                time_limit: COMPILE_TIME_LIMIT,
                memory_limit: COMPILE_MEMORY_LIMIT,
            },
            ctx.cancel_token(),
        )
        .await?;
    report.compiler = Some(ExecuteReport {
        usage: UsageReport {
            time: compiled.used_time.as_millis() as i64,
            memory: compiled.used_memory,
        },
        log: compiled.log.clone(),
    });
    if !compiled.success() {
        return Ok(None);
    }
    Ok(Some(compiler.create_executable(&target).await?))
}

/// Copy an executable of the problem next to the solution and prepare it
async fn problem_executable(
    compile_ctx: &BaseCompileContext,
    problem: &problems::Problem,
    kind: ProblemExecutableKind,
    dir: &TempDir,
    cancel: &CancellationToken,
) -> Result<Option<Executable>> {
    let Some(executable) = problem.executable(kind)? else {
        return Ok(None);
    };
    let compiler = executable.compiler(compile_ctx, cancel).await?;
    let name = match kind {
        ProblemExecutableKind::TestlibChecker => "checker",
        ProblemExecutableKind::TestlibInteractor => "interactor",
    };
    let path = dir.path().join(name);
    copy_file_rec(&executable.binary_path, &path)
        .await
        .with_context(|| format!("Cannot copy {} binary", name))?;
    Ok(Some(compiler.create_executable(&path).await?))
}

/// Verdict decided by usage and exit code alone
fn limits_verdict(report: &Report, test_set: &ProblemTestSet) -> Option<Verdict> {
    if report.time.as_millis() as i64 > test_set.time_limit {
        Some(Verdict::TimeLimitExceeded)
    } else if report.memory > test_set.memory_limit {
        Some(Verdict::MemoryLimitExceeded)
    } else if report.exit_code != 0 {
        Some(Verdict::RuntimeError)
    } else {
        None
    }
}

/// Add points of every group of a test set.
///
/// `group_tests` maps group names to indices in `report.tests`; tests of
/// undeclared groups are scored one by one.
fn score_test_set(
    report: &mut SolutionReport,
    groups: &[ProblemTestGroup],
    group_tests: &BTreeMap<String, Vec<usize>>,
) {
    for (name, tests) in group_tests {
        let policy = groups
            .iter()
            .find(|group| &group.name == name)
            .map_or(PointsPolicy::EachTest, |group| group.points_policy);
        let points: f64 = tests
            .iter()
            .filter_map(|&id| report.tests[id].points)
            .sum();
        let accepted = tests
            .iter()
            .all(|&id| report.tests[id].verdict == Verdict::Accepted);
        match policy {
            PointsPolicy::CompleteGroup if !accepted => {
                for &id in tests {
                    report.tests[id].points = None;
                }
            }
            _ => *report.points.get_or_insert(0.0) += points,
        }
    }
}

/// Runs the compiled solution over the tests of a problem
struct TestRunner {
    dir: PathBuf,
    solution: Executable,
    checker: Executable,
    interactor: Option<Executable>,
    enable_points: bool,
    cancel: CancellationToken,
}

impl TestRunner {
    async fn run(
        &self,
        ctx: &TaskContext,
        problem: &problems::Problem,
        report: &mut SolutionReport,
    ) -> Result<()> {
        let mut state = JudgeSolutionTaskState {
            stage: "testing".to_string(),
            test: 0,
        };
        ctx.set_state(&state).await?;
        let test_sets = problem.test_sets()?;
        report.verdict = Verdict::Accepted;
        if self.enable_points {
            report.points = Some(0.0);
        }
        for test_set in &test_sets {
            let mut group_tests: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for test in &test_set.tests {
                state.test += 1;
                ctx.set_state(&state).await?;
                let mut test_report = self.run_test(test_set, test).await?;
                if !self.enable_points {
                    test_report.points = None;
                }
                group_tests
                    .entry(test.group.clone())
                    .or_default()
                    .push(report.tests.len());
                report.usage = report.usage.max(test_report.usage);
                debug!(test = state.test, verdict = %test_report.verdict, "Solution test completed");
                let verdict = test_report.verdict;
                report.tests.push(test_report);
                if verdict != Verdict::Accepted {
                    if !self.enable_points {
                        report.verdict = verdict;
                        return Ok(());
                    }
                    report.verdict = Verdict::PartiallyAccepted;
                }
            }
            if self.enable_points {
                score_test_set(report, &test_set.groups, &group_tests);
            }
        }
        Ok(())
    }

    async fn run_test(&self, test_set: &ProblemTestSet, test: &ProblemTest) -> Result<TestReport> {
        let input = self.dir.join("test.in");
        let output = self.dir.join("test.out");
        let answer = self.dir.join("test.ans");
        copy_file_rec(&test.input_path, &input)
            .await
            .context("Cannot copy test input")?;
        copy_file_rec(&test.answer_path, &answer)
            .await
            .context("Cannot copy test answer")?;
        let mut report = match &self.interactor {
            Some(interactor) => {
                self.execute_interactive(interactor, test_set, &input, &output, &answer)
                    .await?
            }
            None => self.execute(test_set, &input, &output).await?,
        };
        if report.verdict != Verdict::Accepted {
            return Ok(report);
        }
        let checked =
            run_testlib_checker(&self.checker, &input, &output, &answer, &self.cancel).await?;
        report.verdict = checked.verdict;
        report.checker = Some(checked.checker);
        if report.verdict == Verdict::Accepted && test.points > 0.0 {
            report.points = Some(test.points);
        }
        Ok(report)
    }

    async fn execute(
        &self,
        test_set: &ProblemTestSet,
        input: &Path,
        output: &Path,
    ) -> Result<TestReport> {
        let stdin = std::fs::File::open(input).context("Cannot open test input")?;
        let stdout = std::fs::File::create(output).context("Cannot create test output")?;
        let mut process = self
            .solution
            .create_process(
                ExecuteOptions {
                    stdin: Redirect::File(stdin),
                    stdout: Redirect::File(stdout),
                    time_limit: Duration::from_millis(test_set.time_limit as u64),
                    memory_limit: test_set.memory_limit,
                    ..Default::default()
                },
                &self.cancel,
            )
            .await
            .context("Cannot prepare solution")?;
        process.start().context("Cannot execute solution")?;
        let report = process.wait().await.context("Cannot wait solution")?;
        ensure_active(&self.cancel)?;
        process.release()?;
        let verdict = limits_verdict(&report, test_set).unwrap_or(Verdict::Accepted);
        Ok(TestReport::new(verdict, usage(&report)))
    }

    /// Run the solution against the interactor.
    ///
    /// Each pipe end is owned by exactly one process configuration and both
    /// processes are awaited together, so either side sees EOF as soon as
    /// its peer exits.
    async fn execute_interactive(
        &self,
        interactor: &Executable,
        test_set: &ProblemTestSet,
        input: &Path,
        output: &Path,
        answer: &Path,
    ) -> Result<TestReport> {
        let time_limit = Duration::from_millis(test_set.time_limit as u64);
        let ((solution_stdin, solution_stdout), (interactor_stdin, interactor_stdout)) =
            InteractionPipes::new()?.into_redirects();
        let log = Arc::new(TruncateBuffer::default());
        let mut interactor_process = interactor
            .create_process(
                ExecuteOptions {
                    args: TESTLIB_ARGS.iter().map(|arg| arg.to_string()).collect(),
                    stdin: interactor_stdin,
                    stdout: interactor_stdout,
                    stderr: Redirect::Buffer(log.clone()),
                    time_limit: time_limit * 2,
                    memory_limit: INTERACTOR_MEMORY_LIMIT,
                },
                &self.cancel,
            )
            .await
            .context("Cannot prepare interactor")?;
        copy_file_rec(input, &interactor_process.upper_path(TESTLIB_ARGS[0])).await?;
        copy_file_rec(answer, &interactor_process.upper_path(TESTLIB_ARGS[2])).await?;
        let mut solution_process = self
            .solution
            .create_process(
                ExecuteOptions {
                    stdin: solution_stdin,
                    stdout: solution_stdout,
                    time_limit,
                    memory_limit: test_set.memory_limit,
                    ..Default::default()
                },
                &self.cancel,
            )
            .await
            .context("Cannot prepare solution")?;
        interactor_process
            .start()
            .context("Cannot execute interactor")?;
        solution_process.start().context("Cannot execute solution")?;
        let (solution_report, interactor_report) =
            wait_pair(&mut solution_process, &mut interactor_process).await;
        let interactor_report = interactor_report.context("Cannot wait interactor")?;
        let solution_report = solution_report.context("Cannot wait solution")?;
        ensure_active(&self.cancel)?;
        copy_file_rec(&interactor_process.upper_path(TESTLIB_ARGS[1]), output)
            .await
            .context("Cannot copy interactor output")?;
        solution_process.release()?;
        interactor_process.release()?;
        let mut report = TestReport::new(Verdict::Accepted, usage(&solution_report));
        match limits_verdict(&solution_report, test_set) {
            Some(verdict) => report.verdict = verdict,
            None => {
                report.verdict = exit_code_to_verdict(interactor_report.exit_code)
                    .context("Interactor returned error")?;
                report.interactor = Some(ExecuteReport {
                    usage: usage(&interactor_report),
                    log: log.text(),
                });
            }
        }
        Ok(report)
    }

    fn release(self) -> Result<()> {
        self.solution.release()?;
        self.checker.release()?;
        if let Some(interactor) = self.interactor {
            interactor.release()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::testing::Fixture;
    use crate::models::{CompilerCommandConfig, TaskKind, TaskStatus};
    use crate::problems::testing::{interactive_package, simple_package, single_test_package};
    use tokio_test::assert_ok;

    const SUM: &str = "read a b; echo $((a + b))\n";

    async fn judge(fixture: &Fixture, solution: &Solution, enable_points: bool) -> TaskStatus {
        let config = JudgeSolutionTaskConfig {
            solution_id: solution.id,
            enable_points,
        };
        let task_id = fixture.queue(TaskKind::JudgeSolution, &config).await;
        assert!(fixture.invoker.run_tick(&CancellationToken::new()).await);
        fixture.core.tasks.get(task_id).await.unwrap().status
    }

    async fn report(fixture: &Fixture, solution: &Solution) -> SolutionReport {
        let solution = fixture.core.solutions.get(solution.id).await.unwrap();
        solution.report.unwrap()
    }

    #[tokio::test]
    async fn test_accepted_with_points() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(simple_package).await;
        let solution = fixture.solution(&problem, SUM).await;

        assert_eq!(judge(&fixture, &solution, true).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::Accepted);
        assert_eq!(report.tests.len(), 3);
        assert_eq!(report.points, Some(5.0));
        assert!(report.compiler.is_some());
        assert!(report.tests.iter().all(|test| test.checker.is_some()));
    }

    #[tokio::test]
    async fn test_wrong_answer_stops_judging() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(simple_package).await;
        let solution = fixture
            .solution(&problem, "read a b; if [ $a = 10 ]; then echo 0; else echo $((a + b)); fi\n")
            .await;

        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::WrongAnswer);
        assert_eq!(report.tests.len(), 2);
        assert_eq!(report.tests[1].verdict, Verdict::WrongAnswer);
        assert_eq!(report.tests[1].checker.as_ref().unwrap().log, "wrong answer\n");
        assert_eq!(report.points, None);
        assert!(report.tests.iter().all(|test| test.points.is_none()));
    }

    #[tokio::test]
    async fn test_failed_group_loses_points() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(simple_package).await;
        let solution = fixture
            .solution(&problem, "read a b; if [ $a = 10 ]; then echo 0; else echo $((a + b)); fi\n")
            .await;

        assert_eq!(judge(&fixture, &solution, true).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::PartiallyAccepted);
        assert_eq!(report.tests.len(), 3);
        // Group "1" is complete-group and lost its second test.
        assert_eq!(report.tests[0].points, None);
        assert_eq!(report.tests[2].points, Some(3.0));
        assert_eq!(report.points, Some(3.0));
    }

    #[tokio::test]
    async fn test_memory_limit_exceeded() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(simple_package).await;
        let solution = fixture
            .solution(&problem, &format!("echo 999999999 > .memory\n{}", SUM))
            .await;

        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::MemoryLimitExceeded);
        assert_eq!(report.tests.len(), 1);
        assert_eq!(report.usage.memory, 999999999);
    }

    #[tokio::test]
    async fn test_memory_limit_exceeded_with_points() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(single_test_package).await;
        let solution = fixture
            .solution(&problem, &format!("echo 999999999 > .memory\n{}", SUM))
            .await;

        assert_eq!(judge(&fixture, &solution, true).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::PartiallyAccepted);
        assert_eq!(report.tests.len(), 1);
        assert_eq!(report.tests[0].verdict, Verdict::MemoryLimitExceeded);
        assert_eq!(report.tests[0].points, None);
        assert_eq!(report.points, Some(0.0));
    }

    #[tokio::test]
    async fn test_single_test_accepted_with_points() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(single_test_package).await;
        let solution = fixture.solution(&problem, SUM).await;

        assert_eq!(judge(&fixture, &solution, true).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::Accepted);
        assert_eq!(report.tests.len(), 1);
        assert_eq!(report.points, Some(1.0));
    }

    #[tokio::test]
    async fn test_runtime_error() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(simple_package).await;
        let solution = fixture.solution(&problem, "exit 3\n").await;

        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::RuntimeError);
        assert!(report.tests[0].checker.is_none());
    }

    #[tokio::test]
    async fn test_compilation_error() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(simple_package).await;
        let mut config = crate::compilers::testing::shell_config();
        config.compile = Some(CompilerCommandConfig {
            command: "sh source.sh".to_string(),
            workdir: "/build".to_string(),
            source: Some("source.sh".to_string()),
            binary: Some("binary.sh".to_string()),
            ..Default::default()
        });
        let compiler_id = fixture.create_compiler("strict-sh", config).await;
        let mut solution = fixture
            .solution(&problem, "echo 'syntax error' >&2; exit 1\n")
            .await;
        solution.compiler_id = compiler_id;
        fixture.core.solutions.update(&solution).await.unwrap();

        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Succeeded);
        let report = report(&fixture, &solution).await;
        assert_eq!(report.verdict, Verdict::CompilationError);
        assert_eq!(report.compiler.unwrap().log, "syntax error\n");
        assert!(report.tests.is_empty());
    }

    #[tokio::test]
    async fn test_solution_from_file() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(simple_package).await;
        let source = fixture.dir.path().join("main.sh");
        std::fs::write(&source, SUM).unwrap();
        let file = fixture.files.upload_file("main.sh", &source).await.unwrap();
        let mut solution = fixture.solution(&problem, "").await;
        solution.content_id = Some(file.id);
        fixture.core.solutions.update(&solution).await.unwrap();

        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Succeeded);
        assert_eq!(report(&fixture, &solution).await.verdict, Verdict::Accepted);
    }

    #[tokio::test]
    async fn test_interactive() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(interactive_package).await;

        let solution = fixture.solution(&problem, "read n; echo $((n * 2))\n").await;
        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Succeeded);
        let accepted = report(&fixture, &solution).await;
        assert_eq!(accepted.verdict, Verdict::Accepted);
        assert!(accepted.tests[0].interactor.is_some());

        let solution = fixture.solution(&problem, "read n; echo 0\n").await;
        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Succeeded);
        let rejected = report(&fixture, &solution).await;
        assert_eq!(rejected.verdict, Verdict::WrongAnswer);
        assert!(rejected.tests[0].checker.is_none());
    }

    #[tokio::test]
    async fn test_problem_without_package_fails() {
        let fixture = Fixture::new().await;
        let problem = fixture.polygon_problem(simple_package).await;
        let solution = fixture.solution(&problem, SUM).await;

        assert_eq!(judge(&fixture, &solution, false).await, TaskStatus::Failed);
        let solution = fixture.core.solutions.get(solution.id).await.unwrap();
        assert!(solution.report.is_none());
    }

    #[tokio::test]
    async fn test_cancel_interactive_run() {
        let fixture = Fixture::new().await;
        let problem = fixture.compiled_problem(interactive_package).await;
        let solution = fixture.solution(&problem, "sleep 30\n").await;
        let config = JudgeSolutionTaskConfig {
            solution_id: solution.id,
            enable_points: false,
        };
        let task_id = fixture.queue(TaskKind::JudgeSolution, &config).await;
        let shutdown = CancellationToken::new();
        let canceler = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                shutdown.cancel();
            })
        };

        let ran = tokio::time::timeout(Duration::from_secs(15), fixture.invoker.run_tick(&shutdown))
            .await;
        assert!(assert_ok!(ran));
        canceler.await.unwrap();
        let task = fixture.core.tasks.get(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let solution = fixture.core.solutions.get(solution.id).await.unwrap();
        assert!(solution.report.is_none());
    }

    fn test_report(verdict: Verdict, points: f64) -> TestReport {
        let mut report = TestReport::new(verdict, UsageReport::default());
        if verdict == Verdict::Accepted {
            report.points = Some(points);
        }
        report
    }

    #[test]
    fn test_group_policies() {
        let groups = vec![
            ProblemTestGroup {
                name: "complete".to_string(),
                points_policy: PointsPolicy::CompleteGroup,
            },
            ProblemTestGroup {
                name: "each".to_string(),
                points_policy: PointsPolicy::EachTest,
            },
        ];
        let mut report = SolutionReport::new(Verdict::PartiallyAccepted);
        report.points = Some(0.0);
        report.tests = vec![
            test_report(Verdict::Accepted, 3.0),
            test_report(Verdict::WrongAnswer, 2.0),
            test_report(Verdict::Accepted, 3.0),
            test_report(Verdict::WrongAnswer, 2.0),
            test_report(Verdict::Accepted, 1.0),
        ];
        let group_tests = BTreeMap::from([
            ("complete".to_string(), vec![0, 1]),
            ("each".to_string(), vec![2, 3]),
            (String::new(), vec![4]),
        ]);

        score_test_set(&mut report, &groups, &group_tests);
        assert_eq!(report.points, Some(4.0));
        assert_eq!(report.tests[0].points, None);
        assert_eq!(report.tests[2].points, Some(3.0));
        assert_eq!(report.tests[4].points, Some(1.0));
    }

    #[test]
    fn test_limits_verdict_precedence() {
        let test_set = ProblemTestSet {
            name: "tests".to_string(),
            time_limit: 1000,
            memory_limit: 1024,
            tests: Vec::new(),
            groups: Vec::new(),
        };
        let report = |time: u64, memory: i64, exit_code: i32| Report {
            exit_code,
            time: Duration::from_millis(time),
            real_time: Duration::from_millis(time),
            memory,
        };
        assert_eq!(
            limits_verdict(&report(1001, 2048, 1), &test_set),
            Some(Verdict::TimeLimitExceeded)
        );
        assert_eq!(
            limits_verdict(&report(1000, 2048, 1), &test_set),
            Some(Verdict::MemoryLimitExceeded)
        );
        assert_eq!(
            limits_verdict(&report(10, 1024, 1), &test_set),
            Some(Verdict::RuntimeError)
        );
        assert_eq!(limits_verdict(&report(10, 1024, 0), &test_set), None);
    }
}
