//! Error types and handling
//!
//! This module provides the fatal error taxonomy of the relay engine. These
//! errors abort planning or run setup before any task is dispatched. Failures
//! that happen inside a single task never surface here; they are recorded on
//! that task's result instead.
//!
//! All errors implement the `RelayErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.

use thiserror::Error;

/// Trait for relay error extensions
///
/// Provides a short hint that can be shown next to the error and tells the
/// caller whether editing the run spec or project is enough to recover.
pub trait RelayErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are fixed by changing the run spec or the project
    /// configuration and trying again.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: invalid project, unknown agent/provider/skill
/// - **Spec**: malformed `a+b>c` stage expressions
/// - **Dependency**: missing, forward, cyclic or deadlocked dependencies
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, RelayErrorExt};
///
/// let error = EngineError::EmptySpec;
/// assert_eq!(error.to_string(), "empty agent spec");
/// assert!(error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unknown agent {name:?} (available: {})", .available.join(", "))]
    UnknownAgent { name: String, available: Vec<String> },

    #[error("agent {agent:?} references unknown provider {provider:?}")]
    UnknownProvider { agent: String, provider: String },

    #[error("agent references unknown skill {0:?}")]
    UnknownSkill(String),

    // Spec errors
    #[error("empty agent spec")]
    EmptySpec,

    #[error("invalid agent spec {spec:?}: empty stage near '>'")]
    EmptyStage { spec: String },

    #[error("invalid agent spec {spec:?}: empty agent near '+'")]
    EmptyAgent { spec: String },

    #[error("invalid agent name {name:?} in spec {spec:?}")]
    InvalidAgentName { name: String, spec: String },

    #[error("duplicate agent {name:?} in spec {spec:?}")]
    DuplicateAgent { name: String, spec: String },

    // Dependency errors
    #[error(
        "agent {agent:?} {via} {dependency:?} but it is not included in the current run spec {spec:?}"
    )]
    DependencyOutOfRun {
        agent: String,
        dependency: String,
        via: &'static str,
        spec: String,
    },

    #[error(
        "agent {agent:?} {via} {dependency:?} but {dependency:?} appears in a later spec stage (reorder the run spec or agent stages)"
    )]
    ForwardDependency {
        agent: String,
        dependency: String,
        via: &'static str,
    },

    #[error("dependency cycle detected in selected agents for spec {spec:?} (unresolved: {})", .agents.join(", "))]
    DependencyCycle { spec: String, agents: Vec<String> },

    #[error("no runnable tasks for spec {spec:?} (dependency deadlock)")]
    DependencyDeadlock { spec: String },

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check the project manifest for errors",
            Self::UnknownAgent { .. } => "Use one of the agents declared in the project",
            Self::UnknownProvider { .. } => "Declare the provider or fix the agent's provider name",
            Self::UnknownSkill(_) => "Declare the skill or remove it from the agent",

            // Spec errors
            Self::EmptySpec => "Name at least one agent, e.g. 'planner>coder'",
            Self::EmptyStage { .. } => "Remove the stray '>' from the run spec",
            Self::EmptyAgent { .. } => "Remove the stray '+' from the run spec",
            Self::InvalidAgentName { .. } => "Agent names cannot contain spaces, '+' or '>'",
            Self::DuplicateAgent { .. } => "List each agent only once per run spec",

            // Dependency errors
            Self::DependencyOutOfRun { .. } => "Add the dependency to the run spec",
            Self::ForwardDependency { .. } => "Move the dependency to an earlier stage",
            Self::DependencyCycle { .. } => "Break the cycle in depends_on or depends_on_ports",
            Self::DependencyDeadlock { .. } => "At least one agent must have no dependencies",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_expected_text() {
        let err = EngineError::DuplicateAgent {
            name: "a".into(),
            spec: "a+a".into(),
        };
        assert_eq!(err.to_string(), r#"duplicate agent "a" in spec "a+a""#);

        let err = EngineError::UnknownAgent {
            name: "ghost".into(),
            available: vec!["coder".into(), "planner".into()],
        };
        assert_eq!(
            err.to_string(),
            r#"unknown agent "ghost" (available: coder, planner)"#
        );

        let err = EngineError::ForwardDependency {
            agent: "a".into(),
            dependency: "b".into(),
            via: "depends_on",
        };
        assert!(err.to_string().contains("appears in a later spec stage"));
    }

    #[test]
    fn test_io_is_not_recoverable() {
        let err = EngineError::from(std::io::Error::other("disk"));
        assert!(!err.is_recoverable());
        assert!(EngineError::EmptySpec.is_recoverable());
    }
}
