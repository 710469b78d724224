//! Run spec parsing
//!
//! A run spec names the agents of a run and their nominal stages:
//! `planner>coder+tester>reviewer`. `>` separates stages, `+` separates
//! agents running side by side within a stage.

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpecGraph {
    /// Trimmed spec text
    pub raw: String,
    pub stages: Vec<Vec<String>>,
}

impl AgentSpecGraph {
    /// Parse `spec`, rejecting empty stages, empty names, names containing
    /// spaces or separators, and duplicates
    pub fn parse(spec: &str) -> Result<Self, EngineError> {
        let raw = spec.trim();
        if raw.is_empty() {
            return Err(EngineError::EmptySpec);
        }

        let mut seen = HashSet::new();
        let mut stages = Vec::new();
        for part in raw.split('>') {
            let part = part.trim();
            if part.is_empty() {
                return Err(EngineError::EmptyStage {
                    spec: spec.to_string(),
                });
            }
            let mut stage = Vec::new();
            for name in part.split('+').map(str::trim) {
                if name.is_empty() {
                    return Err(EngineError::EmptyAgent {
                        spec: spec.to_string(),
                    });
                }
                if name.contains([' ', '>', '+']) {
                    return Err(EngineError::InvalidAgentName {
                        name: name.to_string(),
                        spec: spec.to_string(),
                    });
                }
                if !seen.insert(name) {
                    return Err(EngineError::DuplicateAgent {
                        name: name.to_string(),
                        spec: spec.to_string(),
                    });
                }
                stage.push(name.to_string());
            }
            stages.push(stage);
        }
        Ok(Self {
            raw: raw.to_string(),
            stages,
        })
    }

    /// One parallel stage holding every name, in order
    ///
    /// Names are trimmed; empty and duplicate names are rejected the same way
    /// `parse` rejects them. An empty list gives an empty run.
    pub fn single_stage(names: &[String]) -> Result<Self, EngineError> {
        let raw = names.join("+");
        let mut seen = HashSet::new();
        let mut stage = Vec::with_capacity(names.len());
        for name in names.iter().map(|n| n.trim()) {
            if name.is_empty() {
                return Err(EngineError::EmptyAgent { spec: raw });
            }
            if !seen.insert(name) {
                return Err(EngineError::DuplicateAgent {
                    name: name.to_string(),
                    spec: raw,
                });
            }
            stage.push(name.to_string());
        }
        Ok(Self {
            raw,
            stages: vec![stage],
        })
    }

    /// All agent names in stage order
    pub fn flatten(&self) -> Vec<String> {
        self.stages.iter().flatten().cloned().collect()
    }
}
