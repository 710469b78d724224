//! Shared run context
//!
//! Every run owns one [`ContextBus`]: a versioned blackboard of goal,
//! constraints, facts, open questions, recent events and artifacts that all
//! agents of the run read from and write to. Before each generation the bus
//! is compiled into a bounded text window for one agent by [`compile`].
//!
//! # Submodules
//!
//! - [`bus`]: the concurrent store and its recording operations
//! - [`merge`]: handoff fact merge policies
//! - [`compile`]: per-agent visibility filter and budgeted selection
//! - [`weights`]: kind/moment scoring profile
//! - [`summarize`]: kind-aware payload summaries

pub mod bus;
pub mod compile;
pub mod merge;
pub mod summarize;
pub mod weights;

pub use bus::ContextBus;
pub use compile::{compile_snapshot, CompileSpec, CompiledContext};
pub use merge::MergePolicy;
pub use weights::WeightProfile;

use chrono::{DateTime, Utc};
use sdk::kinds::Kind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Collapse newlines, trim, and cut to at most `max` bytes plus `...`
///
/// The cut lands on a char boundary at or below `max`. `max == 0` disables
/// the cut.
pub fn trim(s: &str, max: usize) -> String {
    let s = s.replace('\n', " ");
    let s = s.trim();
    if max == 0 || s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}

/// Rough token count: a quarter of the trimmed byte length, rounded up
pub fn estimate_tokens(s: &str) -> usize {
    let chars = s.trim().len();
    if chars == 0 {
        return 0;
    }
    chars.div_ceil(4)
}

/// Phase of work an agent is in; biases which context items are selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMoment {
    #[default]
    General,
    Plan,
    Discovery,
    ToolLoop,
    Synthesis,
    Validate,
}

impl ContextMoment {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMoment::General => "general",
            ContextMoment::Plan => "plan",
            ContextMoment::Discovery => "discovery",
            ContextMoment::ToolLoop => "tool_loop",
            ContextMoment::Synthesis => "synthesis",
            ContextMoment::Validate => "validate",
        }
    }

    /// Parse a `context_moment` metadata value, accepting the common aliases
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "plan" => Some(ContextMoment::Plan),
            "discovery" => Some(ContextMoment::Discovery),
            "tool_loop" | "tools" => Some(ContextMoment::ToolLoop),
            "synthesis" | "answer" => Some(ContextMoment::Synthesis),
            "validate" | "validation" => Some(ContextMoment::Validate),
            _ => None,
        }
    }
}

impl fmt::Display for ContextMoment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which parts of the bus changed since it was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirtyFlags(pub u64);

impl DirtyFlags {
    pub const GOAL: DirtyFlags = DirtyFlags(1);
    pub const CONSTRAINTS: DirtyFlags = DirtyFlags(1 << 1);
    pub const FACTS: DirtyFlags = DirtyFlags(1 << 2);
    pub const QUESTIONS: DirtyFlags = DirtyFlags(1 << 3);
    pub const EVENTS: DirtyFlags = DirtyFlags(1 << 4);
    pub const ARTIFACTS: DirtyFlags = DirtyFlags(1 << 5);

    pub fn contains(&self, other: DirtyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DirtyFlags {
    type Output = DirtyFlags;

    fn bitor(self, rhs: DirtyFlags) -> DirtyFlags {
        DirtyFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyFlags {
    fn bitor_assign(&mut self, rhs: DirtyFlags) {
        self.0 |= rhs.0;
    }
}

/// Token and item caps for one compiled context window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub max_input_tokens: usize,
    pub safety_margin_tokens: usize,
    pub max_constraints: usize,
    pub max_facts: usize,
    pub max_open_questions: usize,
    pub max_recent_events: usize,
    pub max_artifacts: usize,
    pub max_artifact_summary: usize,
    pub max_event_summary: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_input_tokens: 1200,
            safety_margin_tokens: 80,
            max_constraints: 8,
            max_facts: 16,
            max_open_questions: 8,
            max_recent_events: 12,
            max_artifacts: 8,
            max_artifact_summary: 180,
            max_event_summary: 160,
        }
    }
}

impl ContextBudget {
    /// Replace zero caps with the defaults
    pub fn normalized(mut self) -> Self {
        let d = Self::default();
        let fill = |v: &mut usize, fallback: usize| {
            if *v == 0 {
                *v = fallback;
            }
        };
        fill(&mut self.max_input_tokens, d.max_input_tokens);
        fill(&mut self.max_constraints, d.max_constraints);
        fill(&mut self.max_facts, d.max_facts);
        fill(&mut self.max_open_questions, d.max_open_questions);
        fill(&mut self.max_recent_events, d.max_recent_events);
        fill(&mut self.max_artifacts, d.max_artifacts);
        fill(&mut self.max_artifact_summary, d.max_artifact_summary);
        fill(&mut self.max_event_summary, d.max_event_summary);
        self
    }

    /// Tokens available to the compiled text
    ///
    /// The safety margin is ignored when it would leave fewer than 128
    /// tokens, and the result never drops below 64.
    pub fn limit_tokens(&self) -> usize {
        let b = self.normalized();
        let mut limit = b.max_input_tokens.saturating_sub(b.safety_margin_tokens);
        if limit < 128 {
            limit = b.max_input_tokens;
        }
        limit.max(64)
    }
}

/// Keyed fact on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFact {
    pub key: String,
    pub value: String,
    pub kind: Kind,
    pub moment: ContextMoment,
    pub confidence: f64,
    pub source: String,
    /// Only this agent sees the fact when set
    pub target_agent: String,
    pub channel: String,
    pub updated_at: DateTime<Utc>,
}

/// Content-addressed payload stored on the bus and referenced by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextArtifact {
    pub id: String,
    pub kind: Kind,
    pub moment: ContextMoment,
    pub source: String,
    pub target_agent: String,
    pub channel: String,
    /// Full hex digest of the raw payload
    pub hash: String,
    pub bytes: usize,
    pub summary: String,
    pub updated_at: DateTime<Utc>,
    /// Insertion sequence, newest is highest
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEvent {
    /// skill_call, agent_output or agent_handoff
    pub event_type: String,
    pub agent: String,
    pub skill: String,
    pub kind: Kind,
    pub moment: ContextMoment,
    pub summary: String,
    pub artifact_id: String,
    pub target_agent: String,
    pub channel: String,
    pub has_error: bool,
    pub updated_at: DateTime<Utc>,
}

/// Owned, consistent copy of the bus state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub goal: String,
    pub constraints: Vec<String>,
    /// Sorted by key
    pub facts: Vec<ContextFact>,
    pub open_questions: Vec<String>,
    /// Oldest first
    pub recent_events: Vec<ContextEvent>,
    /// Newest first
    pub artifacts: Vec<ContextArtifact>,
    pub version: u64,
    pub dirty_flags: DirtyFlags,
}
