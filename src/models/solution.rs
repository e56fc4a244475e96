use serde::{Deserialize, Serialize};

use super::SolutionReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub id: i64,
    pub problem_id: i64,
    pub compiler_id: i64,
    /// Inline source code, used when `content_id` is absent
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    /// Stored file with the source code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<SolutionReport>,
}
