//! Compiled packages: tests and executable binaries described by `problem.json`

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{
    CompileContext, PointsPolicy, Problem, ProblemExecutable, ProblemExecutableKind, ProblemTest,
    ProblemTestGroup, ProblemTestSet,
};
use crate::core::utils::extract_zip_file;

const CONFIG_VERSION: &str = "0.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestConfig {
    input: String,
    answer: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    points: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestGroupConfig {
    name: String,
    points_policy: PointsPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestSetConfig {
    name: String,
    dir: String,
    #[serde(default)]
    tests: Vec<TestConfig>,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    time_limit: i64,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    memory_limit: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    groups: Vec<TestGroupConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ExecutableConfig {
    name: String,
    kind: ProblemExecutableKind,
    binary: String,
    compiler: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ProblemConfig {
    version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    executables: Vec<ExecutableConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    test_sets: Vec<TestSetConfig>,
    /// Older packages list test sets here
    #[serde(default, skip_serializing)]
    test_groups: Vec<TestSetConfig>,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

pub struct CompiledProblem {
    path: PathBuf,
    config: ProblemConfig,
}

impl CompiledProblem {
    /// Extract a package archive into `target` and read its `problem.json`
    pub fn extract(source: &Path, target: &Path) -> Result<Self> {
        extract_zip_file(source, target).context("Cannot extract problem")?;
        match read_config(&target.join("problem.json")) {
            Ok(config) => Ok(Self {
                path: target.to_path_buf(),
                config,
            }),
            Err(err) => {
                let _ = std::fs::remove_dir_all(target);
                Err(err)
            }
        }
    }

    pub fn executables(&self) -> Vec<ProblemExecutable> {
        self.config
            .executables
            .iter()
            .map(|executable| ProblemExecutable {
                name: executable.name.clone(),
                kind: executable.kind,
                binary_path: self.path.join(&executable.binary),
                compiler: executable.compiler.clone(),
            })
            .collect()
    }

    pub fn test_sets(&self) -> Vec<ProblemTestSet> {
        self.config
            .test_sets
            .iter()
            .map(|test_set| {
                let dir = self.path.join(&test_set.dir);
                ProblemTestSet {
                    name: test_set.name.clone(),
                    time_limit: test_set.time_limit,
                    memory_limit: test_set.memory_limit,
                    tests: test_set
                        .tests
                        .iter()
                        .map(|test| ProblemTest {
                            input_path: dir.join(&test.input),
                            answer_path: dir.join(&test.answer),
                            points: test.points,
                            group: test.group.clone(),
                        })
                        .collect(),
                    groups: test_set
                        .groups
                        .iter()
                        .map(|group| ProblemTestGroup {
                            name: group.name.clone(),
                            points_policy: group.points_policy,
                        })
                        .collect(),
                }
            })
            .collect()
    }
}

fn read_config(path: &Path) -> Result<ProblemConfig> {
    let data = std::fs::read(path).context("Cannot read problem config")?;
    let mut config: ProblemConfig =
        serde_json::from_slice(&data).context("Cannot parse problem config")?;
    let deprecated = std::mem::take(&mut config.test_groups);
    config.test_sets.extend(deprecated);
    Ok(config)
}

fn test_name_width(count: usize) -> usize {
    if count >= 100 {
        3
    } else if count >= 10 {
        2
    } else {
        0
    }
}

/// Package `problem` as a compiled zip archive at `target`.
///
/// Compilers of executables are resolved through `ctx`, so the recorded
/// names are the ones a judge can look up directly.
pub async fn build_compiled_problem(
    ctx: &dyn CompileContext,
    problem: &Problem,
    target: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut executables = Vec::new();
    for executable in problem.executables()? {
        let compiler = executable.compiler(ctx, cancel).await?;
        executables.push((executable, compiler.name().to_string()));
    }
    let test_sets = problem.test_sets()?;
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || write_package(&target, &executables, &test_sets))
        .await
        .context("Package writer panicked")?
}

fn write_package(
    target: &Path,
    executables: &[(ProblemExecutable, String)],
    test_sets: &[ProblemTestSet],
) -> Result<()> {
    let file = std::fs::File::create(target)
        .with_context(|| format!("Cannot create package {:?}", target))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o777);
    let mut config = ProblemConfig {
        version: CONFIG_VERSION.to_string(),
        ..Default::default()
    };
    writer.add_directory("executables", options)?;
    for (executable, compiler) in executables {
        let base = Path::new(&executable.name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| executable.name.clone());
        let binary = format!("executables/{}", base);
        writer.start_file(binary.as_str(), options)?;
        let mut source = std::fs::File::open(&executable.binary_path)
            .with_context(|| format!("Cannot open binary {:?}", executable.binary_path))?;
        std::io::copy(&mut source, &mut writer)?;
        config.executables.push(ExecutableConfig {
            name: executable.name.clone(),
            kind: executable.kind,
            binary,
            compiler: compiler.clone(),
        });
    }
    writer.add_directory("tests", options)?;
    for (i, test_set) in test_sets.iter().enumerate() {
        let name = if test_set.name.is_empty() {
            format!("tests{}", i + 1)
        } else {
            test_set.name.clone()
        };
        let dir = format!("tests/{}", name);
        writer.add_directory(dir.as_str(), options)?;
        let width = test_name_width(test_set.tests.len());
        let mut tests = Vec::with_capacity(test_set.tests.len());
        for (j, test) in test_set.tests.iter().enumerate() {
            let test_name = format!("{:0width$}", j + 1, width = width);
            let test_config = TestConfig {
                input: format!("{}.in", test_name),
                answer: format!("{}.ans", test_name),
                points: test.points,
                group: test.group.clone(),
            };
            for (source, entry) in [
                (&test.input_path, &test_config.input),
                (&test.answer_path, &test_config.answer),
            ] {
                writer.start_file(format!("{}/{}", dir, entry), options)?;
                let mut file = std::fs::File::open(source)
                    .with_context(|| format!("Cannot open test file {:?}", source))?;
                std::io::copy(&mut file, &mut writer)?;
            }
            tests.push(test_config);
        }
        config.test_sets.push(TestSetConfig {
            name,
            dir,
            tests,
            time_limit: test_set.time_limit,
            memory_limit: test_set.memory_limit,
            groups: test_set
                .groups
                .iter()
                .map(|group| TestGroupConfig {
                    name: group.name.clone(),
                    points_policy: group.points_policy,
                })
                .collect(),
        });
    }
    writer.start_file("problem.json", options)?;
    writer.write_all(&serde_json::to_vec_pretty(&config)?)?;
    let file = writer.finish()?;
    file.sync_all()?;
    Ok(())
}
