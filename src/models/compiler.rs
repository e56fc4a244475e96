use serde::{Deserialize, Serialize};

/// How to run one step (compile or execute) inside the compiler image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerCommandConfig {
    /// Whitespace separated command line
    pub command: String,
    #[serde(default)]
    pub environ: Vec<String>,
    #[serde(default)]
    pub workdir: String,
    /// Where the source is staged, relative to `workdir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Where the binary is produced or expected, relative to `workdir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compiler: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<CompilerCommandConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<CompilerCommandConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compiler {
    pub id: i64,
    pub name: String,
    /// File with the compiler rootfs image (`tar.gz`)
    pub image_id: i64,
    #[serde(default)]
    pub config: CompilerConfig,
}
