//! Per-agent context compilation
//!
//! A snapshot is filtered down to what the requesting agent may see, every
//! remaining item becomes a scored line, and a greedy pass by score per token
//! fills the budget. Selected lines are rendered grouped by section in their
//! original order, so the output does not depend on the scores beyond
//! membership.

use super::bus::ContextBus;
use super::summarize::{is_code_kind, is_json_kind, is_summary_kind, short_hash};
use super::weights::WeightProfile;
use super::{
    estimate_tokens, trim, ContextArtifact, ContextBudget, ContextEvent, ContextFact,
    ContextMoment, ContextSnapshot, DirtyFlags,
};
use sdk::kinds::Kind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const INSTRUCTION: &str =
    "instruction: use the shared context below, prefer tools only when needed, avoid repeating large content.";

/// Who is asking and under which limits
#[derive(Debug, Clone, Default)]
pub struct CompileSpec {
    pub agent_name: String,
    /// Channels feeding this agent; empty means no channel restriction
    pub channels: Vec<String>,
    pub skills: Vec<String>,
    pub budget: ContextBudget,
    pub moment: ContextMoment,
    /// Falls back to [`WeightProfile::shared`]
    pub weights: Option<WeightProfile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledContext {
    pub text: String,
    pub estimated_tokens: usize,
    pub budget_limit_tokens: usize,
    pub version: u64,
    pub dirty_flags: DirtyFlags,
    pub moment: ContextMoment,
    pub selected_facts: usize,
    pub selected_events: usize,
    pub selected_artifacts: usize,
    pub selected_questions: usize,
    pub dropped_items: usize,
}

impl ContextBus {
    /// Snapshot the bus and compile it for `spec`
    pub fn compile(&self, spec: &CompileSpec) -> CompiledContext {
        compile_snapshot(self.snapshot(), spec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Group {
    Constraints,
    Facts,
    Questions,
    Events,
    Artifacts,
}

impl Group {
    const ALL: [Group; 5] = [
        Group::Constraints,
        Group::Facts,
        Group::Questions,
        Group::Events,
        Group::Artifacts,
    ];

    fn header(&self) -> &'static str {
        match self {
            Group::Constraints => "constraints:",
            Group::Facts => "shared_facts:",
            Group::Questions => "open_questions:",
            Group::Events => "recent_events:",
            Group::Artifacts => "artifacts:",
        }
    }

    fn cap(&self, budget: &ContextBudget) -> usize {
        match self {
            Group::Constraints => budget.max_constraints,
            Group::Facts => budget.max_facts,
            Group::Questions => budget.max_open_questions,
            Group::Events => budget.max_recent_events,
            Group::Artifacts => budget.max_artifacts,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    group: Group,
    kind: Kind,
    moment: ContextMoment,
    text: String,
    tokens: usize,
    score: f64,
    order: usize,
}

impl Candidate {
    fn density(&self) -> f64 {
        self.score / self.tokens.max(1) as f64
    }
}

/// Compile an owned snapshot; pure and deterministic for a given input
pub fn compile_snapshot(snap: ContextSnapshot, spec: &CompileSpec) -> CompiledContext {
    let agent = spec.agent_name.trim();
    let snap = filter_snapshot_for_agent(snap, agent, &spec.channels);
    let budget = spec.budget.normalized();
    let limit = budget.limit_tokens();
    let moment = spec.moment;
    let weights = spec.weights.as_ref().unwrap_or_else(|| WeightProfile::shared());

    let mut lines = vec!["[context]".to_string()];
    if !snap.goal.trim().is_empty() {
        lines.push(format!("goal: {}", snap.goal));
    }
    if !agent.is_empty() {
        lines.push(format!("agent: {}", spec.agent_name));
    }
    lines.push(format!("context_moment: {}", moment));
    if !spec.skills.is_empty() {
        let mut skills = spec.skills.clone();
        skills.sort();
        lines.push(format!("available_skills: {}", skills.join(", ")));
    }
    lines.push(INSTRUCTION.to_string());

    // Counted in rendered characters so headers, bullets and line breaks
    // stay inside the limit
    let mut used_chars = lines.join("\n").len();
    let mut candidates = build_candidates(&snap, &budget);
    for c in &mut candidates {
        c.score += weights.score(c.kind, c.moment, moment);
    }
    // stable: equal keys keep insertion order
    candidates.sort_by(|a, b| {
        let (da, db) = (a.density(), b.density());
        if (da - db).abs() > 1e-9 {
            return db.total_cmp(&da);
        }
        if (a.score - b.score).abs() > 1e-9 {
            return b.score.total_cmp(&a.score);
        }
        a.order.cmp(&b.order)
    });

    let mut selected: Vec<Candidate> = Vec::new();
    let mut dropped = 0;
    for c in candidates {
        let count = selected.iter().filter(|s| s.group == c.group).count();
        let mut extra = c.text.len() + 3;
        if count == 0 {
            extra += c.group.header().len() + 1;
        }
        if count >= c.group.cap(&budget) || (used_chars + extra).div_ceil(4) > limit {
            dropped += 1;
            continue;
        }
        used_chars += extra;
        selected.push(c);
    }
    selected.sort_by_key(|c| c.order);

    let count = |g: Group| selected.iter().filter(|c| c.group == g).count();
    for group in Group::ALL {
        let mut items = selected.iter().filter(|c| c.group == group).peekable();
        if items.peek().is_none() {
            continue;
        }
        lines.push(group.header().to_string());
        lines.extend(items.map(|c| format!("- {}", c.text)));
    }

    let text = lines.join("\n");
    CompiledContext {
        estimated_tokens: estimate_tokens(&text),
        text,
        budget_limit_tokens: limit,
        version: snap.version,
        dirty_flags: snap.dirty_flags,
        moment,
        selected_facts: count(Group::Facts),
        selected_events: count(Group::Events),
        selected_artifacts: count(Group::Artifacts),
        selected_questions: count(Group::Questions),
        dropped_items: dropped,
    }
}

fn channel_allowed(channel: &str, allowed: &HashSet<&str>) -> bool {
    let channel = channel.trim();
    allowed.is_empty() || channel.is_empty() || allowed.contains(channel)
}

fn fact_visible(f: &ContextFact, agent: &str, allowed: &HashSet<&str>) -> bool {
    if !channel_allowed(&f.channel, allowed) {
        return false;
    }
    let target = f.target_agent.trim();
    if !target.is_empty() {
        return target == agent;
    }
    // unscoped handoff facts still name their target in the key
    if let Some(rest) = f.key.strip_prefix("handoff.") {
        let parts: Vec<&str> = rest.split('.').collect();
        if parts.len() >= 2 && !parts[0].trim().is_empty() {
            return parts[0] == agent;
        }
    }
    true
}

fn event_visible(ev: &ContextEvent, agent: &str, allowed: &HashSet<&str>) -> bool {
    if !channel_allowed(&ev.channel, allowed) {
        return false;
    }
    let target = ev.target_agent.trim();
    if !target.is_empty() {
        return target == agent;
    }
    if ev.event_type == "agent_handoff" {
        if let Some(to) = parse_kv_field(&ev.summary, "to") {
            return to == agent;
        }
    }
    true
}

fn artifact_visible(a: &ContextArtifact, agent: &str, allowed: &HashSet<&str>) -> bool {
    if !channel_allowed(&a.channel, allowed) {
        return false;
    }
    let target = a.target_agent.trim();
    target.is_empty() || target == agent
}

/// Value of the first whitespace-separated `key=value` token
pub fn parse_kv_field<'a>(s: &'a str, key: &str) -> Option<&'a str> {
    if key.is_empty() {
        return None;
    }
    let prefix = format!("{key}=");
    s.split_whitespace()
        .find_map(|part| part.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Artifact ids named by `artifact=` or `ref=` tokens in a fact value
pub fn referenced_artifact_ids(value: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    value
        .split_whitespace()
        .filter_map(|tok| tok.strip_prefix("artifact=").or_else(|| tok.strip_prefix("ref=")))
        .map(|id| id.trim().trim_matches(|c: char| c == ',' || c == ';'))
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Drop what `agent` must not see
///
/// Items scoped to another agent or to a channel outside `channels` are
/// removed. Artifacts referenced by a remaining fact or event stay.
pub fn filter_snapshot_for_agent(snap: ContextSnapshot, agent: &str, channels: &[String]) -> ContextSnapshot {
    let agent = agent.trim();
    let allowed: HashSet<&str> = channels
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if agent.is_empty() && allowed.is_empty() {
        return snap;
    }

    let ContextSnapshot {
        goal,
        constraints,
        facts,
        open_questions,
        recent_events,
        artifacts,
        version,
        dirty_flags,
    } = snap;

    let facts: Vec<ContextFact> = facts
        .into_iter()
        .filter(|f| fact_visible(f, agent, &allowed))
        .collect();
    let recent_events: Vec<ContextEvent> = recent_events
        .into_iter()
        .filter(|ev| event_visible(ev, agent, &allowed))
        .collect();

    let mut referenced: HashSet<String> = recent_events
        .iter()
        .map(|ev| ev.artifact_id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    referenced.extend(facts.iter().flat_map(|f| referenced_artifact_ids(&f.value)));

    let artifacts = artifacts
        .into_iter()
        .filter(|a| artifact_visible(a, agent, &allowed) || referenced.contains(&a.id))
        .collect();

    ContextSnapshot {
        goal,
        constraints,
        facts,
        open_questions,
        recent_events,
        artifacts,
        version,
        dirty_flags,
    }
}

fn recency_score(index_from_newest: usize) -> f64 {
    2.0 / (index_from_newest + 1) as f64
}

fn build_candidates(snap: &ContextSnapshot, budget: &ContextBudget) -> Vec<Candidate> {
    let mut out = Vec::with_capacity(64);
    let mut push = |group: Group, kind: Kind, moment: ContextMoment, text: String, score: f64| {
        let order = out.len();
        out.push(Candidate {
            group,
            kind,
            moment,
            tokens: estimate_tokens(&format!("- {text}")),
            text,
            score,
            order,
        });
    };

    for (i, c) in snap.constraints.iter().enumerate() {
        if c.trim().is_empty() {
            continue;
        }
        push(
            Group::Constraints,
            Kind::MessageSystem,
            ContextMoment::Plan,
            trim(c, 180),
            9.0 - i as f64 * 0.1,
        );
    }

    for f in &snap.facts {
        push(
            Group::Facts,
            f.kind,
            f.moment,
            render_fact_line(f),
            8.0 + 3.0 * f.confidence.clamp(0.0, 1.0),
        );
    }

    for (i, q) in snap.open_questions.iter().enumerate() {
        if q.trim().is_empty() {
            continue;
        }
        push(
            Group::Questions,
            Kind::MemoryQuestion,
            ContextMoment::General,
            trim(q, 180),
            8.5 - i as f64 * 0.1,
        );
    }

    for (idx, ev) in snap.recent_events.iter().rev().enumerate() {
        let mut score = 6.0 + recency_score(idx);
        if ev.has_error {
            score += 2.0;
        }
        push(Group::Events, ev.kind, ev.moment, render_event_line(ev, budget), score);
    }

    for (i, a) in snap.artifacts.iter().enumerate() {
        push(
            Group::Artifacts,
            a.kind,
            a.moment,
            render_artifact_line(a, budget),
            5.0 + recency_score(i),
        );
    }

    out
}

/// Smaller of two caps where 0 means no cap
fn min_cap(a: usize, b: usize) -> usize {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

pub fn render_fact_line(f: &ContextFact) -> String {
    let limit = if is_summary_kind(f.kind) {
        220
    } else if is_code_kind(f.kind) {
        96
    } else {
        180
    };
    let value = trim(&f.value, limit);
    let conf = f.confidence.clamp(0.0, 1.0);
    let mut line = match f.kind {
        Kind::MemoryFact => format!("{}={} (conf={:.2})", f.key, value, conf),
        Kind::MemoryQuestion => format!("question={}", value),
        kind => format!("{}={} kind={} conf={:.2}", f.key, value, kind, conf),
    };
    let src = f.source.trim();
    if !src.is_empty() {
        line.push_str(" src=");
        line.push_str(src);
    }
    line
}

pub fn render_event_line(ev: &ContextEvent, budget: &ContextBudget) -> String {
    let kind = ev.kind;
    let base = if budget.max_event_summary == 0 { 160 } else { budget.max_event_summary };
    let limit = match kind {
        Kind::ToolError | Kind::ToolResult => min_cap(base, 140),
        k if is_summary_kind(k) => min_cap(base, 180),
        k if is_code_kind(k) => min_cap(base, 100),
        _ => base,
    };

    let mut parts = vec![match kind {
        Kind::ToolError => "tool_error".to_string(),
        Kind::ToolResult => "tool_result".to_string(),
        Kind::MessageAgent => "agent_msg".to_string(),
        _ => ev.event_type.clone(),
    }];
    if !ev.agent.is_empty() {
        parts.push(format!("agent={}", ev.agent));
    }
    if !ev.skill.is_empty() {
        parts.push(format!("skill={}", ev.skill));
    }
    if !matches!(kind, Kind::ToolResult | Kind::ToolError | Kind::MessageAgent) {
        parts.push(format!("kind={}", kind));
    }
    if !ev.artifact_id.is_empty() {
        parts.push(format!("artifact={}", ev.artifact_id));
    }
    let summary = trim(&ev.summary, limit);
    if !summary.is_empty() {
        parts.push(format!("summary={}", summary));
    }
    parts.join(" ")
}

pub fn render_artifact_line(a: &ContextArtifact, budget: &ContextBudget) -> String {
    let kind = a.kind;
    let base = if budget.max_artifact_summary == 0 { 180 } else { budget.max_artifact_summary };
    let (label, limit) = match kind {
        k if is_code_kind(k) => ("code_ref", min_cap(base, 120)),
        k if is_json_kind(k) => ("json_ref", min_cap(base, 120)),
        k if is_summary_kind(k) => ("summary_ref", min_cap(base, 200)),
        Kind::ArtifactRef => ("artifact_ref", min_cap(base, 140)),
        _ => ("artifact_ref", base),
    };

    let mut parts = vec![
        label.to_string(),
        format!("id={}", a.id),
        format!("kind={}", kind),
    ];
    if !a.source.is_empty() {
        parts.push(format!("src={}", a.source));
    }
    parts.push(format!("bytes={}", a.bytes));
    parts.push(format!("hash={}", short_hash(&a.hash)));
    if a.moment != ContextMoment::General {
        parts.push(format!("moment={}", a.moment));
    }
    let summary = trim(&a.summary, limit);
    if !summary.is_empty() {
        parts.push(format!("summary={}", summary));
    }
    parts.join(" ")
}
