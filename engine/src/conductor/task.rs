//! Task model and per-task defaults

use super::handoff::TypedHandoffLink;
use crate::config::metadata::AgentTuning;
use crate::config::{AgentConfig, ProviderConfig};
use crate::context::{ContextBudget, ContextMoment};

/// One agent's unit of execution inside a run
#[derive(Debug, Clone)]
pub struct Task {
    pub agent: AgentConfig,
    pub agent_file: String,
    pub provider: ProviderConfig,
    pub skills: Vec<String>,
    /// Leveled stage index
    pub stage: usize,
    /// Sorted names of the agents this task waits for
    pub depends_on: Vec<String>,
    pub incoming: Vec<TypedHandoffLink>,
    pub outgoing: Vec<TypedHandoffLink>,
    /// Provider runs the iterative tool loop
    pub tool_capable: bool,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.agent.name
    }

    pub fn model(&self) -> String {
        self.agent.effective_model(&self.provider)
    }

    pub fn tuning(&self) -> AgentTuning {
        AgentTuning::from_metadata(&self.agent.metadata)
    }

    pub fn context_budget(&self) -> ContextBudget {
        context_budget_for(&self.agent, &self.provider, self.tool_capable)
    }

    pub fn context_moment(&self) -> ContextMoment {
        context_moment_for(&self.agent, self.tool_capable)
    }
}

/// Input window of an agent: 900 tokens, 1100 when its provider runs tools,
/// 200 more for reasoning models, then the `context_max_*` overrides
pub fn context_budget_for(agent: &AgentConfig, provider: &ProviderConfig, tool_capable: bool) -> ContextBudget {
    let tuning = AgentTuning::from_metadata(&agent.metadata);
    let mut budget = ContextBudget {
        max_input_tokens: if tool_capable { 1100 } else { 900 },
        ..Default::default()
    };
    if agent.effective_model(provider).to_lowercase().contains("reasoner") {
        budget.max_input_tokens += 200;
    }
    if let Some(v) = tuning.context_max_input_tokens {
        budget.max_input_tokens = v;
    }
    if let Some(v) = tuning.context_max_recent_events {
        budget.max_recent_events = v;
    }
    if let Some(v) = tuning.context_max_artifacts {
        budget.max_artifacts = v;
    }
    if let Some(v) = tuning.context_max_facts {
        budget.max_facts = v;
    }
    budget
}

/// Explicit `context_moment`, else a guess from the agent's shape
pub fn context_moment_for(agent: &AgentConfig, tool_capable: bool) -> ContextMoment {
    if let Some(moment) = agent
        .metadata
        .get("context_moment")
        .and_then(|v| ContextMoment::parse(v))
    {
        return moment;
    }
    let has_skills = !agent.skills.is_empty();
    let name = agent.name.to_lowercase();
    if tool_capable && has_skills {
        ContextMoment::ToolLoop
    } else if name.contains("review") || name.contains("lint") {
        ContextMoment::Validate
    } else if has_skills {
        ContextMoment::Discovery
    } else {
        ContextMoment::Synthesis
    }
}
