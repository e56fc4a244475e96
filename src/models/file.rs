use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Uploaded but not yet referenced
    Pending,
    Available,
}

/// Metadata of a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    pub status: FileStatus,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    /// Hex encoded SHA-256 of the content
    #[serde(default)]
    pub hash: String,
}
