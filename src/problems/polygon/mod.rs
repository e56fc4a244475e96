//! Polygon source packages

pub mod config;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    CompileContext, PointsPolicy, ProblemExecutable, ProblemExecutableKind, ProblemStatement,
    ProblemStatementResource, ProblemTest, ProblemTestGroup, ProblemTestSet,
};
use crate::compilers::interaction::{wait_pair, InteractionPipes};
use crate::compilers::{CompileOptions, ExecuteOptions, Executable, MountFile};
use crate::core::testlib::exit_code_to_verdict;
use crate::core::utils::{copy_file_rec, extract_zip_file};
use crate::models::{ProblemStatementConfig, ProblemStatementSample, Verdict};
use crate::safeexec::Redirect;

const EXECUTABLE_TIME_LIMIT: Duration = Duration::from_secs(20);
const EXECUTABLE_MEMORY_LIMIT: i64 = 512 * 1024 * 1024;
const SOLUTION_MEMORY_LIMIT: i64 = 256 * 1024 * 1024;
const GENERATOR_MEMORY_LIMIT: i64 = 256 * 1024 * 1024;
const INTERACTOR_MEMORY_LIMIT: i64 = 256 * 1024 * 1024;

/// Only TeX statements in these languages are published
fn polygon_locale(language: &str) -> Option<&'static str> {
    match language {
        "russian" => Some("ru"),
        "english" => Some("en"),
        _ => None,
    }
}

fn points_policy(policy: &str) -> PointsPolicy {
    match policy {
        "complete-group" => PointsPolicy::CompleteGroup,
        _ => PointsPolicy::EachTest,
    }
}

/// Source path without its extension
fn target_path(source: &str) -> String {
    let path = Path::new(source);
    match path.extension() {
        Some(_) => path.with_extension("").to_string_lossy().into_owned(),
        None => source.to_string(),
    }
}

pub struct PolygonProblem {
    path: PathBuf,
    config: config::Problem,
}

impl PolygonProblem {
    /// Extract a package archive into `target` and read its `problem.xml`
    pub fn extract(source: &Path, target: &Path) -> Result<Self> {
        extract_zip_file(source, target).context("Cannot extract problem")?;
        match config::read_problem(&target.join("problem.xml")) {
            Ok(config) => Ok(Self {
                path: target.to_path_buf(),
                config,
            }),
            Err(err) => {
                let _ = std::fs::remove_dir_all(target);
                Err(err.context("Cannot read problem config"))
            }
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn executables(&self) -> Vec<ProblemExecutable> {
        let mut executables = Vec::new();
        let Some(assets) = &self.config.assets else {
            return executables;
        };
        if let Some(checker) = &assets.checker {
            executables.push(ProblemExecutable {
                name: "checker".to_string(),
                kind: ProblemExecutableKind::TestlibChecker,
                binary_path: self.path.join(target_path(&checker.source.path)),
                compiler: checker.source.kind.clone(),
            });
        }
        if let Some(interactor) = &assets.interactor {
            executables.push(ProblemExecutable {
                name: "interactor".to_string(),
                kind: ProblemExecutableKind::TestlibInteractor,
                binary_path: self.path.join(target_path(&interactor.source.path)),
                compiler: interactor.source.kind.clone(),
            });
        }
        executables
    }

    pub fn test_sets(&self) -> Result<Vec<ProblemTestSet>> {
        self.config
            .judging
            .test_sets
            .iter()
            .map(|test_set| {
                let tests = test_set
                    .tests
                    .items
                    .iter()
                    .enumerate()
                    .map(|(i, test)| {
                        Ok(ProblemTest {
                            input_path: self
                                .path
                                .join(config::format_pattern(&test_set.input_path_pattern, i + 1)?),
                            answer_path: self
                                .path
                                .join(config::format_pattern(&test_set.answer_path_pattern, i + 1)?),
                            points: test.points,
                            group: test.group.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let groups = test_set
                    .groups
                    .items
                    .iter()
                    .map(|group| ProblemTestGroup {
                        name: group.name.clone(),
                        points_policy: points_policy(&group.points_policy),
                    })
                    .collect();
                Ok(ProblemTestSet {
                    name: test_set.name.clone(),
                    time_limit: test_set.time_limit,
                    memory_limit: test_set.memory_limit,
                    tests,
                    groups,
                })
            })
            .collect()
    }

    pub fn statements(&self) -> Result<Vec<ProblemStatement>> {
        let mut statements = Vec::new();
        for statement in &self.config.statements.items {
            if statement.kind != "application/x-tex" {
                continue;
            }
            let Some(locale) = polygon_locale(&statement.language) else {
                continue;
            };
            let dir = self.path.join("statements").join(&statement.language);
            let properties = config::read_problem_properties(&dir.join("problem-properties.json"))?;
            let config = ProblemStatementConfig {
                locale: locale.to_string(),
                title: properties.name,
                legend: properties.legend,
                input: properties.input,
                output: properties.output,
                notes: properties.notes,
                scoring: properties.scoring,
                interaction: properties.interaction,
                samples: properties
                    .sample_tests
                    .into_iter()
                    .map(|sample| ProblemStatementSample {
                        input: sample.input,
                        output: sample.output,
                    })
                    .collect(),
            };
            let resources = statement_resources(&dir, &config)?;
            statements.push(ProblemStatement { config, resources });
        }
        Ok(statements)
    }

    /// Compile all executables and the main solution, then generate inputs
    /// and answers for every test
    pub async fn compile(&self, ctx: &dyn CompileContext, cancel: &CancellationToken) -> Result<()> {
        let mut executables: HashMap<String, Executable> = HashMap::new();
        let result = self.compile_with(ctx, &mut executables, cancel).await;
        for (_, executable) in executables.drain() {
            let _ = executable.release();
        }
        result
    }

    async fn compile_with(
        &self,
        ctx: &dyn CompileContext,
        executables: &mut HashMap<String, Executable>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let resources: Vec<MountFile> = self
            .config
            .files
            .resources
            .items
            .iter()
            .filter(|file| file.kind == "h.g++")
            .map(|file| MountFile {
                source: self.path.join(&file.path),
                target: Path::new(&file.path)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&file.path)),
            })
            .collect();
        for executable in &self.config.files.executables.items {
            let Some(source) = &executable.source else {
                continue;
            };
            self.compile_executable(ctx, executables, &source.kind, &source.path, &resources, cancel)
                .await?;
        }
        let mut interactor = None;
        if let Some(assets) = &self.config.assets {
            if let Some(checker) = &assets.checker {
                self.compile_executable(
                    ctx,
                    executables,
                    &checker.source.kind,
                    &checker.source.path,
                    &resources,
                    cancel,
                )
                .await?;
            }
            if let Some(source) = assets.interactor.as_ref().map(|i| &i.source) {
                let target = self
                    .compile_executable(ctx, executables, &source.kind, &source.path, &resources, cancel)
                    .await?;
                interactor = Some(target);
            }
        }
        let main = self
            .config
            .assets
            .iter()
            .flat_map(|assets| assets.solutions.items.iter())
            .filter(|solution| solution.tag == "main")
            .find_map(|solution| solution.source.as_ref())
            .ok_or_else(|| anyhow!("Cannot find main solution"))?;
        let solution = self.compile_solution(ctx, &main.kind, &main.path, cancel).await?;
        let result = self
            .generate_tests(executables, interactor.as_deref(), &solution, cancel)
            .await;
        let _ = solution.release();
        result
    }

    async fn compile_executable(
        &self,
        ctx: &dyn CompileContext,
        executables: &mut HashMap<String, Executable>,
        polygon_type: &str,
        source: &str,
        resources: &[MountFile],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let target = target_path(source);
        if executables.contains_key(&target) {
            return Ok(target);
        }
        let compiler = ctx.get_compiler(polygon_type, cancel).await?;
        let binary_path = self.path.join(&target);
        let report = compiler
            .compile(
                CompileOptions {
                    source: self.path.join(source),
                    target: binary_path.clone(),
                    input_files: resources.to_vec(),
                    time_limit: EXECUTABLE_TIME_LIMIT,
                    memory_limit: EXECUTABLE_MEMORY_LIMIT,
                },
                cancel,
            )
            .await?;
        if !report.success() {
            bail!(
                "Cannot compile {:?} with compiler {:?}: {:?}",
                source,
                compiler.name(),
                report.log
            );
        }
        debug!("Compiled executable {}", source);
        let executable = compiler.create_executable(&binary_path).await?;
        executables.insert(target.clone(), executable);
        Ok(target)
    }

    async fn compile_solution(
        &self,
        ctx: &dyn CompileContext,
        polygon_type: &str,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Executable> {
        let compiler = ctx.get_compiler(polygon_type, cancel).await?;
        let binary_path = self.path.join(target_path(source));
        let report = compiler
            .compile(
                CompileOptions {
                    source: self.path.join(source),
                    target: binary_path.clone(),
                    input_files: Vec::new(),
                    time_limit: EXECUTABLE_TIME_LIMIT,
                    memory_limit: SOLUTION_MEMORY_LIMIT,
                },
                cancel,
            )
            .await?;
        if !report.success() {
            bail!(
                "Cannot compile {:?} with compiler {:?}: {:?}",
                source,
                compiler.name(),
                report.log
            );
        }
        debug!("Compiled solution {}", source);
        compiler.create_executable(&binary_path).await
    }

    async fn generate_tests(
        &self,
        executables: &HashMap<String, Executable>,
        interactor: Option<&str>,
        solution: &Executable,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let interactor = match interactor {
            Some(target) => Some(
                executables
                    .get(target)
                    .ok_or_else(|| anyhow!("Cannot find interactor {:?}", target))?,
            ),
            None => None,
        };
        for test_set in &self.config.judging.test_sets {
            let time_limit = Duration::from_millis(test_set.time_limit.max(0) as u64);
            for (i, test) in test_set.tests.items.iter().enumerate() {
                let input = self
                    .path
                    .join(config::format_pattern(&test_set.input_path_pattern, i + 1)?);
                let answer = self
                    .path
                    .join(config::format_pattern(&test_set.answer_path_pattern, i + 1)?);
                if !test.cmd.is_empty() {
                    let args: Vec<String> =
                        test.cmd.split_whitespace().map(str::to_string).collect();
                    self.generate_input(executables, &args, &input, cancel).await?;
                }
                match interactor {
                    Some(interactor) => {
                        generate_interactive_answer(
                            interactor,
                            solution,
                            &input,
                            &answer,
                            time_limit,
                            test_set.memory_limit,
                            cancel,
                        )
                        .await?
                    }
                    None => {
                        generate_answer(solution, &input, &answer, time_limit, test_set.memory_limit, cancel)
                            .await?
                    }
                }
                debug!("Generated test {:?} {:?}", input, answer);
            }
        }
        Ok(())
    }

    async fn generate_input(
        &self,
        executables: &HashMap<String, Executable>,
        args: &[String],
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some((name, args)) = args.split_first() else {
            bail!("Cannot find executable");
        };
        let executable = executables
            .get(&format!("files/{}", name))
            .ok_or_else(|| anyhow!("Cannot find executable: {:?}", name))?;
        if let Some(parent) = input.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let output = std::fs::File::create(input)
            .with_context(|| format!("Cannot create input file {:?}", input))?;
        let mut process = executable
            .create_process(
                ExecuteOptions {
                    args: args.to_vec(),
                    stdout: Redirect::File(output),
                    time_limit: EXECUTABLE_TIME_LIMIT,
                    memory_limit: GENERATOR_MEMORY_LIMIT,
                    ..Default::default()
                },
                cancel,
            )
            .await
            .with_context(|| format!("Cannot create executable {:?}", name))?;
        process
            .start()
            .with_context(|| format!("Cannot start executable {:?}", name))?;
        let report = process
            .wait()
            .await
            .with_context(|| format!("Cannot wait executable {:?}", name))?;
        if report.exit_code != 0 {
            bail!("Generator exited with code: {}", report.exit_code);
        }
        Ok(())
    }
}

async fn generate_answer(
    solution: &Executable,
    input: &Path,
    answer: &Path,
    time_limit: Duration,
    memory_limit: i64,
    cancel: &CancellationToken,
) -> Result<()> {
    let stdin = std::fs::File::open(input).context("Cannot open input file")?;
    if let Some(parent) = answer.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let stdout = std::fs::File::create(answer).context("Cannot create output file")?;
    let mut process = solution
        .create_process(
            ExecuteOptions {
                stdin: Redirect::File(stdin),
                stdout: Redirect::File(stdout),
                time_limit,
                memory_limit,
                ..Default::default()
            },
            cancel,
        )
        .await
        .context("Cannot prepare solution")?;
    process.start().context("Cannot execute solution")?;
    let report = process.wait().await.context("Cannot wait solution")?;
    if report.exit_code != 0 {
        bail!("Solution exited with code: {}", report.exit_code);
    }
    Ok(())
}

async fn generate_interactive_answer(
    interactor: &Executable,
    solution: &Executable,
    input: &Path,
    answer: &Path,
    time_limit: Duration,
    memory_limit: i64,
    cancel: &CancellationToken,
) -> Result<()> {
    let ((solution_stdin, solution_stdout), (interactor_stdin, interactor_stdout)) =
        InteractionPipes::new()?.into_redirects();
    let mut interactor_process = interactor
        .create_process(
            ExecuteOptions {
                args: vec!["input.in".to_string(), "output.out".to_string()],
                stdin: interactor_stdin,
                stdout: interactor_stdout,
                time_limit: time_limit * 2,
                memory_limit: INTERACTOR_MEMORY_LIMIT,
                ..Default::default()
            },
            cancel,
        )
        .await
        .context("Cannot prepare interactor")?;
    copy_file_rec(input, &interactor_process.upper_path("input.in")).await?;
    let mut solution_process = solution
        .create_process(
            ExecuteOptions {
                stdin: solution_stdin,
                stdout: solution_stdout,
                time_limit,
                memory_limit,
                ..Default::default()
            },
            cancel,
        )
        .await
        .context("Cannot prepare solution")?;
    interactor_process.start().context("Cannot execute interactor")?;
    solution_process.start().context("Cannot execute solution")?;
    let (solution_report, interactor_report) =
        wait_pair(&mut solution_process, &mut interactor_process).await;
    let interactor_report = interactor_report.context("Cannot wait interactor")?;
    let solution_report = solution_report.context("Cannot wait solution")?;
    copy_file_rec(&interactor_process.upper_path("output.out"), answer).await?;
    if solution_report.exit_code != 0 {
        bail!("Solution exited with code: {}", solution_report.exit_code);
    }
    let verdict = exit_code_to_verdict(interactor_report.exit_code)?;
    if verdict != Verdict::Accepted {
        bail!("Interactor exited with verdict: {}", verdict);
    }
    Ok(())
}

/// Files of the statement directory mentioned in the statement text
fn statement_resources(
    dir: &Path,
    config: &ProblemStatementConfig,
) -> Result<Vec<ProblemStatementResource>> {
    let mut resources = Vec::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("Cannot read {:?}", dir))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let mentioned = [
            &config.title,
            &config.legend,
            &config.input,
            &config.output,
            &config.notes,
        ]
        .iter()
        .any(|text| text.contains(&name));
        if mentioned {
            resources.push(ProblemStatementResource {
                path: entry.path(),
                name,
            });
        }
    }
    resources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(resources)
}
