use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use crate::compilers::{Executable, ExecuteOptions};
use crate::core::testlib::exit_code_to_verdict;
use crate::core::utils::copy_file_rec;
use crate::core::TruncateBuffer;
use crate::models::{ExecuteReport, UsageReport, Verdict};
use crate::safeexec::Redirect;

const CHECKER_TIME_LIMIT: Duration = Duration::from_secs(20);
const CHECKER_MEMORY_LIMIT: i64 = 256 * 1024 * 1024;

/// Positional arguments of testlib checkers and interactors
pub const TESTLIB_ARGS: [&str; 3] = ["input.in", "output.out", "answer.ans"];

#[derive(Debug, Clone, PartialEq)]
pub struct CheckerReport {
    pub verdict: Verdict,
    pub checker: ExecuteReport,
}

/// Run a testlib checker over one test
pub async fn run_testlib_checker(
    checker: &Executable,
    input: &Path,
    output: &Path,
    answer: &Path,
    cancel: &CancellationToken,
) -> Result<CheckerReport> {
    let log = Arc::new(TruncateBuffer::default());
    let mut process = checker
        .create_process(
            ExecuteOptions {
                args: TESTLIB_ARGS.iter().map(|arg| arg.to_string()).collect(),
                stderr: Redirect::Buffer(log.clone()),
                time_limit: CHECKER_TIME_LIMIT,
                memory_limit: CHECKER_MEMORY_LIMIT,
                ..Default::default()
            },
            cancel,
        )
        .await
        .context("Cannot create checker process")?;
    for (source, name) in [input, output, answer].into_iter().zip(TESTLIB_ARGS) {
        copy_file_rec(source, &process.upper_path(name))
            .await
            .with_context(|| format!("Cannot write checker file {}", name))?;
    }
    process.start().context("Cannot start checker")?;
    let report = process.wait().await.context("Cannot wait checker")?;
    if cancel.is_cancelled() {
        bail!("Checker was canceled");
    }
    let verdict = exit_code_to_verdict(report.exit_code).context("Checker returned error")?;
    process.release()?;
    Ok(CheckerReport {
        verdict,
        checker: ExecuteReport {
            usage: UsageReport {
                time: report.time.as_millis() as i64,
                memory: report.memory,
            },
            log: log.text(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilers::testing::shell_compiler;
    use crate::problems::testing::CHECKER;
    use crate::safeexec::testing::fake_manager;
    use tokio_test::{assert_err, assert_ok};

    async fn checker(dir: &Path, script: &str) -> Executable {
        let layer = dir.join("image");
        std::fs::create_dir_all(&layer).unwrap();
        let compiler = shell_compiler(layer, Arc::new(fake_manager(dir)));
        let binary = dir.join("checker");
        std::fs::write(&binary, script).unwrap();
        compiler.create_executable(&binary).await.unwrap()
    }

    fn write_test(dir: &Path, output: &str) {
        std::fs::write(dir.join("test.in"), "1 2\n").unwrap();
        std::fs::write(dir.join("test.out"), output).unwrap();
        std::fs::write(dir.join("test.ans"), "3\n").unwrap();
    }

    async fn check(dir: &Path, executable: &Executable) -> Result<CheckerReport> {
        run_testlib_checker(
            executable,
            &dir.join("test.in"),
            &dir.join("test.out"),
            &dir.join("test.ans"),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_checker_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let executable = checker(dir.path(), CHECKER).await;

        write_test(dir.path(), "3\n");
        let report = assert_ok!(check(dir.path(), &executable).await);
        assert_eq!(report.verdict, Verdict::Accepted);
        assert!(report.checker.log.is_empty());

        write_test(dir.path(), "4\n");
        let report = assert_ok!(check(dir.path(), &executable).await);
        assert_eq!(report.verdict, Verdict::WrongAnswer);
        assert_eq!(report.checker.log, "wrong answer\n");
    }

    #[tokio::test]
    async fn test_unknown_exit_code_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let executable = checker(dir.path(), "exit 6\n").await;
        write_test(dir.path(), "3\n");
        let err = assert_err!(check(dir.path(), &executable).await);
        assert_eq!(format!("{:#}", err), "Checker returned error: unknown testlib exit code: 6");
    }
}
