//! Skill capability
//!
//! A skill is a named operation an agent can invoke, either as a startup call
//! declared in configuration or as a tool call requested by the provider during
//! the tool loop. Results are JSON objects so they can be cached, summarized
//! and replayed to the provider verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Result payload of a skill call
pub type SkillResult = Map<String, Value>;

/// Input to a skill call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillExecution {
    pub agent_name: String,
    pub input: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl SkillExecution {
    pub fn new(agent_name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            input: input.into(),
            args: Map::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Get a string argument
    pub fn arg_str(&self, key: &str) -> Result<&str, SkillError> {
        self.args
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| SkillError::MissingParameter(key.to_string()))
    }

    /// Get an optional string argument
    pub fn arg_str_opt(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional i64 argument
    pub fn arg_i64_opt(&self, key: &str) -> Option<i64> {
        self.args.get(key).and_then(|v| v.as_i64())
    }

    /// Get an optional bool argument
    pub fn arg_bool_opt(&self, key: &str) -> Option<bool> {
        self.args.get(key).and_then(|v| v.as_bool())
    }
}

/// Skill-specific errors
///
/// `Clone` so a single failed execution can be handed to every caller that
/// coalesced onto it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkillError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("skill {0:?} not registered")]
    NotRegistered(String),

    #[error("context deadline exceeded")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

impl SkillError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// The skill capability consumed by the engine
#[async_trait]
pub trait Skill: Send + Sync {
    /// Registered name, as referenced from agent configuration
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the call arguments advertised to tool-capable providers
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "additionalProperties": true,
        })
    }

    async fn execute(&self, exec: SkillExecution) -> Result<SkillResult, SkillError>;
}

/// Trace record of one skill invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillCallResult {
    pub skill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SkillResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub cacheable: bool,
}

impl SkillCallResult {
    pub fn new(skill: impl Into<String>) -> Self {
        Self {
            skill: skill.into(),
            ..Default::default()
        }
    }

    /// Failed call record with no duration
    pub fn failure(skill: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            skill: skill.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Skill for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercases args.text"
        }

        async fn execute(&self, exec: SkillExecution) -> Result<SkillResult, SkillError> {
            let text = exec.arg_str("text")?;
            let mut out = SkillResult::new();
            out.insert("text".into(), Value::String(text.to_uppercase()));
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_skill_execute_and_missing_param() {
        let exec = SkillExecution::new("a", "goal").with_arg("text", Value::from("hi"));
        let out = Upper.execute(exec).await.unwrap();
        assert_eq!(out.get("text"), Some(&Value::from("HI")));

        let err = Upper.execute(SkillExecution::new("a", "goal")).await.unwrap_err();
        assert_eq!(err, SkillError::MissingParameter("text".into()));
    }

    #[test]
    fn test_default_parameters_schema() {
        let schema = Upper.parameters();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], true);
    }

    #[test]
    fn test_failure_record() {
        let rec = SkillCallResult::failure("x", "boom");
        assert!(rec.is_error());
        assert_eq!(rec.duration, Duration::ZERO);
    }
}
