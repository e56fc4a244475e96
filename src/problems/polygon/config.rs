//! `problem.xml` and `problem-properties.json` of polygon packages

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Problem {
    #[serde(default)]
    pub statements: Statements,
    #[serde(default)]
    pub judging: Judging,
    #[serde(default)]
    pub files: Files,
    #[serde(default)]
    pub assets: Option<Assets>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Statements {
    #[serde(rename = "statement", default)]
    pub items: Vec<Statement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Statement {
    pub language: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Judging {
    #[serde(rename = "testset", default)]
    pub test_sets: Vec<TestSet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestSet {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "time-limit", default)]
    pub time_limit: i64,
    #[serde(rename = "memory-limit", default)]
    pub memory_limit: i64,
    #[serde(rename = "input-path-pattern")]
    pub input_path_pattern: String,
    #[serde(rename = "answer-path-pattern")]
    pub answer_path_pattern: String,
    #[serde(default)]
    pub tests: Tests,
    #[serde(default)]
    pub groups: Groups,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tests {
    #[serde(rename = "test", default)]
    pub items: Vec<Test>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Test {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub group: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Groups {
    #[serde(rename = "group", default)]
    pub items: Vec<Group>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(rename = "points-policy", default)]
    pub points_policy: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Files {
    #[serde(default)]
    pub resources: FileList,
    #[serde(default)]
    pub executables: ExecutableList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileList {
    #[serde(rename = "file", default)]
    pub items: Vec<File>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutableList {
    #[serde(rename = "executable", default)]
    pub items: Vec<Executable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Executable {
    #[serde(default)]
    pub source: Option<Source>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Source {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Assets {
    #[serde(default)]
    pub checker: Option<Checker>,
    #[serde(default)]
    pub interactor: Option<Interactor>,
    #[serde(default)]
    pub solutions: Solutions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Checker {
    pub source: Source,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interactor {
    pub source: Source,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Solutions {
    #[serde(rename = "solution", default)]
    pub items: Vec<Solution>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub source: Option<Source>,
}

pub fn read_problem(path: &Path) -> Result<Problem> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {:?}", path))?;
    parse_problem(&data)
}

pub fn parse_problem(data: &str) -> Result<Problem> {
    serde_xml_rs::from_str(data).context("Invalid problem.xml")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleTest {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemProperties {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub legend: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub scoring: String,
    #[serde(default)]
    pub interaction: String,
    #[serde(default)]
    pub sample_tests: Vec<SampleTest>,
}

pub fn read_problem_properties(path: &Path) -> Result<ProblemProperties> {
    let data = std::fs::read(path).with_context(|| format!("Cannot read {:?}", path))?;
    serde_json::from_slice(&data).with_context(|| format!("Invalid {:?}", path))
}

/// Expand a printf-style path pattern (`%d`, `%0Nd`, `%Nd`, `%%`) with `index`
pub fn format_pattern(pattern: &str, index: usize) -> Result<String> {
    let mut result = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            result.push('%');
            continue;
        }
        let zero = chars.peek() == Some(&'0');
        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + digit as usize;
            chars.next();
        }
        match chars.next() {
            Some('d') if zero => result.push_str(&format!("{:0width$}", index, width = width)),
            Some('d') => result.push_str(&format!("{:width$}", index, width = width)),
            _ => bail!("Unsupported path pattern {:?}", pattern),
        }
    }
    Ok(result)
}
