use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Problem-wide limits shown to users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// Milliseconds
    #[serde(default, skip_serializing_if = "is_zero")]
    pub time_limit: i64,
    /// Bytes
    #[serde(default, skip_serializing_if = "is_zero")]
    pub memory_limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    /// Source package (polygon format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<i64>,
    /// Package produced by compiling the source package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_id: Option<i64>,
    #[serde(default)]
    pub config: ProblemConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemResourceKind {
    Statement,
    StatementResource,
}

/// Typed config stored in [`ProblemResource::config`]
pub trait ProblemResourceConfig: Serialize + DeserializeOwned {
    const KIND: ProblemResourceKind;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemStatementSample {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemStatementConfig {
    pub locale: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub legend: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scoring: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interaction: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<ProblemStatementSample>,
}

impl ProblemResourceConfig for ProblemStatementConfig {
    const KIND: ProblemResourceKind = ProblemResourceKind::Statement;
}

/// File referenced from a statement (image, attachment)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemStatementResourceConfig {
    pub locale: String,
    pub name: String,
}

impl ProblemResourceConfig for ProblemStatementResourceConfig {
    const KIND: ProblemResourceKind = ProblemResourceKind::StatementResource;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemResource {
    pub id: i64,
    pub problem_id: i64,
    pub kind: ProblemResourceKind,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<i64>,
}

impl ProblemResource {
    pub fn new(problem_id: i64, kind: ProblemResourceKind) -> Self {
        Self {
            id: 0,
            problem_id,
            kind,
            config: serde_json::Value::Null,
            file_id: None,
        }
    }

    pub fn scan_config<C: ProblemResourceConfig>(&self) -> Result<C> {
        if self.kind != C::KIND {
            anyhow::bail!("Resource {} has kind {:?}, not {:?}", self.id, self.kind, C::KIND);
        }
        serde_json::from_value(self.config.clone())
            .with_context(|| format!("Invalid config of resource {}", self.id))
    }

    /// Replace config, updating kind to match
    pub fn set_config<C: ProblemResourceConfig>(&mut self, config: &C) -> Result<()> {
        self.config = serde_json::to_value(config)?;
        self.kind = C::KIND;
        Ok(())
    }
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_config() {
        let mut resource = ProblemResource::new(1, ProblemResourceKind::StatementResource);
        let config = ProblemStatementConfig {
            locale: "en".to_string(),
            title: "A + B".to_string(),
            ..Default::default()
        };
        resource.set_config(&config).unwrap();
        assert_eq!(resource.kind, ProblemResourceKind::Statement);
        assert_eq!(resource.scan_config::<ProblemStatementConfig>().unwrap(), config);
        assert!(resource.scan_config::<ProblemStatementResourceConfig>().is_err());
        assert_eq!(
            resource.config,
            serde_json::json!({"locale": "en", "title": "A + B"})
        );
    }
}
