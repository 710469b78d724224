//! Project configuration
//!
//! This module holds the validated project model the engine plans and runs
//! against: providers, agents and skills. A project is normally built in code
//! or parsed from a single TOML manifest.
//!
//! # Manifest Sections
//!
//! - **root**: manifest version, default provider, provider declarations
//! - **agents**: agent declarations with typed IO ports and dependencies
//! - **skills**: skill declarations referenced by agents
//!
//! # Examples
//!
//! ```
//! use relay_engine::config::Project;
//!
//! let project = Project::from_toml_str(r#"
//!     [root]
//!     version = 1
//!     default_provider = "local"
//!
//!     [[root.providers]]
//!     name = "local"
//!     type = "mock"
//!
//!     [[agents]]
//!     name = "planner"
//! "#).unwrap();
//! assert_eq!(project.agents[0].name, "planner");
//! ```

pub mod metadata;

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Complete project model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub root: RootConfig,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub skills: Vec<SkillConfig>,

    /// Source file per agent name, reported in plans when known
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_files: BTreeMap<String, String>,
}

/// Root manifest settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Provider used by agents that do not name one
    #[serde(default)]
    pub default_provider: String,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            default_provider: String::new(),
            providers: Vec::new(),
        }
    }
}

/// LLM provider declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// Adapter type (mock, http, openai, ...)
    #[serde(rename = "type", default)]
    pub provider_type: String,

    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub api_key_env: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout_ms: u64,

    /// Provider accepts tool definitions and returns tool calls
    #[serde(default)]
    pub tools: bool,
}

/// Agent declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Provider name; empty means the root default provider
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default)]
    pub skills: Vec<String>,

    /// Upstream agents this agent waits for, regardless of stage adjacency
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Input port name -> `agent` or `agent.port` selectors
    #[serde(default)]
    pub depends_on_ports: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub io: AgentIOConfig,

    #[serde(default)]
    pub startup_calls: Vec<SkillCall>,

    #[serde(default)]
    pub timeout_ms: u64,

    /// Free-form tuning knobs, see [`metadata::AgentTuning`]
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Model override, falling back to the provider's model
    pub fn effective_model(&self, provider: &ProviderConfig) -> String {
        if self.model.trim().is_empty() {
            provider.model.clone()
        } else {
            self.model.clone()
        }
    }
}

/// Typed input/output ports of an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentIOConfig {
    #[serde(default)]
    pub inputs: Vec<IOPortConfig>,

    #[serde(default)]
    pub outputs: Vec<IOPortConfig>,
}

/// A single typed port
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IOPortConfig {
    pub name: String,

    /// Kinds an input port accepts
    #[serde(default)]
    pub accepts: Vec<String>,

    /// Kinds an output port produces
    #[serde(default)]
    pub produces: Vec<String>,

    /// auto, latest, append, append2, append3, append4
    #[serde(default)]
    pub merge_policy: String,

    /// Biases publish and compile selection toward this port
    #[serde(default)]
    pub channel_priority: f64,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub max_tokens: usize,

    #[serde(default)]
    pub description: String,
}

impl IOPortConfig {
    pub fn input(name: impl Into<String>, accepts: &[&str]) -> Self {
        Self {
            name: name.into(),
            accepts: accepts.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn output(name: impl Into<String>, produces: &[&str]) -> Self {
        Self {
            name: name.into(),
            produces: produces.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Skill invocation run before the agent's first generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillCall {
    pub skill: String,

    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Skill declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillConfig {
    pub name: String,

    /// echo, file_read, file_read_range, file_write_safe, http, command_doc
    #[serde(rename = "type", default)]
    pub skill_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub timeout_ms: u64,

    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Named configuration record
pub trait NamedEntity {
    fn entity_name(&self) -> &str;
}

impl NamedEntity for ProviderConfig {
    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl NamedEntity for AgentConfig {
    fn entity_name(&self) -> &str {
        &self.name
    }
}

impl NamedEntity for SkillConfig {
    fn entity_name(&self) -> &str {
        &self.name
    }
}

fn default_version() -> u32 {
    1
}

impl Project {
    /// Parse and validate a TOML manifest
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        let project: Project = toml::from_str(raw)
            .map_err(|e| EngineError::Config(format!("Failed to parse project: {}", e)))?;
        project.validate()?;
        Ok(project)
    }

    /// Load and validate a TOML manifest from disk
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read project file: {}", e)))?;
        Self::from_toml_str(&raw)
    }

    /// Reject projects the planner cannot resolve names against
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.root.version == 0 {
            return Err(EngineError::Config("root.version must be >= 1".to_string()));
        }
        check_unique("provider", &self.root.providers)?;
        check_unique("agent", &self.agents)?;
        check_unique("skill", &self.skills)?;

        let default = self.root.default_provider.trim();
        if !default.is_empty() && self.provider(default).is_none() {
            return Err(EngineError::Config(format!(
                "root.default_provider references unknown provider {:?}",
                default
            )));
        }
        for agent in &self.agents {
            for port in agent.io.inputs.iter().chain(agent.io.outputs.iter()) {
                if port.channel_priority.is_nan() {
                    return Err(EngineError::Config(format!(
                        "agent {:?} port {:?} has an invalid channel_priority",
                        agent.name, port.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.root.providers.iter().find(|p| p.name == name)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn skill(&self, name: &str) -> Option<&SkillConfig> {
        self.skills.iter().find(|s| s.name == name)
    }
}

fn check_unique<T: NamedEntity>(what: &str, items: &[T]) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for item in items {
        let name = item.entity_name().trim();
        if name.is_empty() {
            return Err(EngineError::Config(format!("{} name is required", what)));
        }
        if !seen.insert(name) {
            return Err(EngineError::Config(format!(
                "duplicate {} name {:?}",
                what, name
            )));
        }
    }
    Ok(())
}
