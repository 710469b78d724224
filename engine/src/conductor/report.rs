//! Plan and run reports

use super::handoff::TypedHandoffLink;
use crate::context::{ContextMoment, MergePolicy};
use chrono::{DateTime, Utc};
use sdk::kinds::Kind;
use sdk::skill::SkillCallResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handoffs are reported in the same shape they are planned in
pub type TypedHandoffPlan = TypedHandoffLink;

/// What a run will do, before anything executes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub created_at: DateTime<Utc>,
    /// Some task may start before its whole nominal previous stage finished
    pub parallel: bool,
    pub input: String,
    pub spec: String,
    pub tasks: Vec<TaskPlan>,
    pub stages: Vec<PlanStage>,
    pub handoffs: Vec<TypedHandoffPlan>,
}

impl ExecutionPlan {
    pub fn task(&self, agent: &str) -> Option<&TaskPlan> {
        self.tasks.iter().find(|t| t.agent == agent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_file: String,
    pub provider: String,
    pub provider_type: String,
    pub model: String,
    pub skills: Vec<String>,
    pub timeout_ms: u64,
    pub startup_calls: usize,
    /// Token limit of the compiled context window
    pub context_budget: usize,
    pub context_moment: ContextMoment,
    pub stage: usize,
    pub depends_on: Vec<String>,
    pub io: TaskIOPlan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskIOPlan {
    pub inputs: Vec<TypedPortPlan>,
    pub outputs: Vec<TypedPortPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedPortPlan {
    pub name: String,
    /// Declared kinds that exist in the registry; empty when none were declared
    pub kinds: Vec<Kind>,
    pub merge_policy: MergePolicy,
    pub channel_priority: f64,
    pub required: bool,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStage {
    pub index: usize,
    pub agents: Vec<String>,
}

/// Outcome of one task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub agent: String,
    pub provider: String,
    pub provider_type: String,
    pub model: String,
    pub skills: Vec<String>,
    pub output: String,
    pub startup_calls: Vec<SkillCallResult>,
    pub tool_calls: Vec<SkillCallResult>,
    pub tool_cache_hits: usize,
    pub tool_cache_misses: usize,
    pub tool_budget_calls_used: usize,
    pub tool_budget_calls_limit: usize,
    pub tool_budget_exec_ms_used: usize,
    pub tool_budget_exec_ms_limit: usize,
    pub stage_tool_budget_calls_used: usize,
    pub stage_tool_budget_calls_limit: usize,
    pub stage_tool_budget_exec_ms_used: usize,
    pub stage_tool_budget_exec_ms_limit: usize,
    pub context_tokens: usize,
    pub context_budget: usize,
    pub context_version: u64,
    pub context_dropped: usize,
    pub context_channels_total: usize,
    pub context_channels_used: usize,
    pub context_channels_dropped: usize,
    pub context_moment: ContextMoment,
    pub stage: usize,
    pub depends_on: Vec<String>,
    pub sent_handoffs: usize,
    pub dropped_handoffs: usize,
    pub handoff_tokens: usize,
    pub skipped_output_publish: bool,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentRunResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Results of a whole run, one per task in plan order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub parallel: bool,
    pub input: String,
    pub results: Vec<AgentRunResult>,
}

impl ExecutionReport {
    pub fn result(&self, agent: &str) -> Option<&AgentRunResult> {
        self.results.iter().find(|r| r.agent == agent)
    }

    pub fn failed(&self) -> impl Iterator<Item = &AgentRunResult> {
        self.results.iter().filter(|r| r.is_error())
    }
}
