//! The shared, versioned blackboard of one run
//!
//! Writers take the lock only for the mutation itself. Readers take a
//! [`ContextSnapshot`] and work on the owned copy, so compilation never holds
//! the lock.

use super::merge::merge_handoff_fact;
use super::summarize::{infer_skill_result_kind, summarize_artifact_payload};
use super::{
    trim, ContextArtifact, ContextEvent, ContextFact, ContextMoment, ContextSnapshot, DirtyFlags,
};
use crate::conductor::handoff::{channel_id, TypedHandoffLink, DEFAULT_INPUT_PORT, DEFAULT_OUTPUT_PORT};
use chrono::Utc;
use sdk::kinds::{Kind, TypedValue};
use sdk::skill::SkillCallResult;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

const EVENT_CAP: usize = 64;
const HANDOFF_EVENT_CAP: usize = 96;

#[derive(Debug, Default)]
struct BusState {
    goal: String,
    constraints: Vec<String>,
    facts: HashMap<String, ContextFact>,
    open_questions: Vec<String>,
    events: Vec<ContextEvent>,
    artifacts: HashMap<String, ContextArtifact>,
    version: u64,
    dirty: DirtyFlags,
    next_seq: u64,
}

impl BusState {
    fn touch(&mut self, flag: DirtyFlags) {
        self.version += 1;
        self.dirty |= flag;
    }

    /// Append an event, keeping the newest `cap`
    fn push_event(&mut self, event: ContextEvent, cap: usize) {
        self.events.push(event);
        if self.events.len() > cap {
            let excess = self.events.len() - cap;
            self.events.drain(..excess);
        }
    }

    fn put_artifact(&mut self, item: ArtifactInput<'_>) -> String {
        let digest = hex::encode(Sha256::digest(item.raw.as_bytes()));
        let target = item.target_agent.trim();
        let channel = item.channel.trim();
        let mut id = format!("{}:{}", item.kind, &digest[..12]);
        if !target.is_empty() {
            id.push(':');
            id.push_str(target);
            if !channel.is_empty() {
                id.push(':');
                id.push_str(&short_hash_string(channel));
            }
        }
        self.next_seq += 1;
        let artifact = ContextArtifact {
            id: id.clone(),
            kind: item.kind,
            moment: item.moment,
            source: item.source.trim().to_string(),
            target_agent: target.to_string(),
            channel: channel.to_string(),
            hash: digest,
            bytes: item.raw.len(),
            summary: item.summary.trim().to_string(),
            updated_at: Utc::now(),
            seq: self.next_seq,
        };
        self.artifacts.insert(id.clone(), artifact);
        self.touch(DirtyFlags::ARTIFACTS);
        id
    }

    fn summarize_skill_result(&mut self, call: &SkillCallResult, moment: ContextMoment) -> (String, String) {
        let skill = call.skill.as_str();
        let result = match &call.result {
            Some(r) if !r.is_empty() => r,
            _ => return (format!("skill={skill} ok (empty result)"), String::new()),
        };
        let value_kind = infer_skill_result_kind(Some(result));

        for key in ["text", "body"] {
            let Some(text) = result.get(key).and_then(|v| v.as_str()) else {
                continue;
            };
            let text = text.trim();
            if text.len() > 240 {
                let summary = summarize_artifact_payload(value_kind, result, text);
                let id = self.put_artifact(ArtifactInput::unscoped(value_kind, moment, skill, text, &summary));
                return (
                    format!(
                        "skill={skill} ok ({key} stored as artifact={id} type={value_kind}, {} chars)",
                        text.len()
                    ),
                    id,
                );
            }
        }

        let compact = match serde_json::to_string(result) {
            Ok(s) => s,
            Err(e) => return (format!("skill={skill} ok (result json error: {e})"), String::new()),
        };
        if compact.len() > 320 {
            let summary = summarize_artifact_payload(value_kind, result, &compact);
            let id = self.put_artifact(ArtifactInput::unscoped(value_kind, moment, skill, &compact, &summary));
            return (
                format!(
                    "skill={skill} ok (json stored as artifact={id} type={value_kind}, {} chars)",
                    compact.len()
                ),
                id,
            );
        }
        (format!("skill={skill} ok result={}", trim(&compact, 220)), String::new())
    }
}

struct ArtifactInput<'a> {
    kind: Kind,
    moment: ContextMoment,
    source: &'a str,
    raw: &'a str,
    summary: &'a str,
    target_agent: &'a str,
    channel: &'a str,
}

impl<'a> ArtifactInput<'a> {
    fn unscoped(kind: Kind, moment: ContextMoment, source: &'a str, raw: &'a str, summary: &'a str) -> Self {
        Self {
            kind,
            moment,
            source,
            raw,
            summary,
            target_agent: "",
            channel: "",
        }
    }
}

/// `s` itself when short, else the first 12 hex chars of its digest
pub fn short_hash_string(s: &str) -> String {
    let s = s.trim();
    if s.len() <= 12 {
        return s.to_string();
    }
    hex::encode(Sha256::digest(s.as_bytes()))[..12].to_string()
}

fn event(event_type: &str, agent: &str, kind: Kind, moment: ContextMoment) -> ContextEvent {
    ContextEvent {
        event_type: event_type.to_string(),
        agent: agent.to_string(),
        skill: String::new(),
        kind,
        moment,
        summary: String::new(),
        artifact_id: String::new(),
        target_agent: String::new(),
        channel: String::new(),
        has_error: false,
        updated_at: Utc::now(),
    }
}

/// Shared context store for one run
#[derive(Debug, Default)]
pub struct ContextBus {
    state: RwLock<BusState>,
}

impl ContextBus {
    pub fn new(goal: &str) -> Self {
        let bus = Self::default();
        bus.set_goal(goal);
        bus
    }

    fn read(&self) -> RwLockReadGuard<'_, BusState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BusState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn set_goal(&self, goal: &str) {
        let goal = goal.trim();
        let mut state = self.write();
        if state.goal == goal {
            return;
        }
        state.goal = goal.to_string();
        state.touch(DirtyFlags::GOAL);
    }

    pub fn add_constraint(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut state = self.write();
        if state.constraints.iter().any(|c| c == text) {
            return;
        }
        state.constraints.push(text.to_string());
        state.touch(DirtyFlags::CONSTRAINTS);
    }

    pub fn add_open_question(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut state = self.write();
        if state.open_questions.iter().any(|q| q == text) {
            return;
        }
        state.open_questions.push(text.to_string());
        state.touch(DirtyFlags::QUESTIONS);
    }

    /// Plain `memory/fact` at the general moment
    pub fn put_fact(&self, key: &str, value: &str, confidence: f64, source: &str) {
        self.put_typed_fact(key, value, Kind::MemoryFact, ContextMoment::General, confidence, source);
    }

    /// Insert or replace a global fact
    ///
    /// A write that changes neither value, source nor confidence (beyond
    /// 1e-4) is ignored and does not bump the version.
    pub fn put_typed_fact(
        &self,
        key: &str,
        value: &str,
        kind: Kind,
        moment: ContextMoment,
        confidence: f64,
        source: &str,
    ) {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return;
        }
        let confidence = confidence.clamp(0.0, 1.0);
        let source = source.trim();

        let mut state = self.write();
        if let Some(prev) = state.facts.get(key) {
            if prev.value == value
                && (prev.confidence - confidence).abs() < 1e-4
                && prev.source == source
            {
                return;
            }
        }
        state.facts.insert(
            key.to_string(),
            ContextFact {
                key: key.to_string(),
                value: value.to_string(),
                kind,
                moment,
                confidence,
                source: source.to_string(),
                target_agent: String::new(),
                channel: String::new(),
                updated_at: Utc::now(),
            },
        );
        state.touch(DirtyFlags::FACTS);
    }

    /// Record a skill call as a `skill_call` event, spilling large results into artifacts
    pub fn record_skill_call(&self, agent: &str, call: &SkillCallResult, moment: ContextMoment) {
        let mut ev = event("skill_call", agent.trim(), Kind::ToolResult, moment);
        ev.skill = call.skill.clone();

        let mut state = self.write();
        if let Some(err) = &call.error {
            ev.kind = Kind::ToolError;
            ev.has_error = true;
            ev.summary = format!("skill={} failed: {}", call.skill, trim(err, 160));
        } else {
            let (summary, artifact_id) = state.summarize_skill_result(call, moment);
            ev.summary = summary;
            ev.artifact_id = artifact_id;
        }
        state.push_event(ev, EVENT_CAP);
        state.touch(DirtyFlags::EVENTS);
    }

    /// Record a final output nobody consumes through a channel
    pub fn record_agent_output(&self, agent: &str, output: &str) {
        let output = output.trim();
        if output.is_empty() {
            return;
        }
        let mut ev = event("agent_output", agent, Kind::MessageAgent, ContextMoment::Synthesis);
        ev.summary = trim(output, 180);

        let mut state = self.write();
        if output.len() > 220 {
            let id = state.put_artifact(ArtifactInput::unscoped(
                Kind::ArtifactRef,
                ContextMoment::Synthesis,
                agent,
                output,
                &ev.summary,
            ));
            ev.summary = format!("final output stored as artifact={id} ({} chars)", output.len());
            ev.artifact_id = id;
        }
        state.push_event(ev, EVENT_CAP);
        state.touch(DirtyFlags::EVENTS);
    }

    /// Store a globally visible artifact; `None` for a blank payload
    pub fn put_artifact(
        &self,
        kind: Kind,
        moment: ContextMoment,
        source: &str,
        raw: &str,
        summary: &str,
    ) -> Option<ContextArtifact> {
        self.put_scoped_artifact(kind, moment, source, raw, summary, "", "")
    }

    /// Store an artifact visible only to `target_agent` (and `channel`, when set)
    #[allow(clippy::too_many_arguments)]
    pub fn put_scoped_artifact(
        &self,
        kind: Kind,
        moment: ContextMoment,
        source: &str,
        raw: &str,
        summary: &str,
        target_agent: &str,
        channel: &str,
    ) -> Option<ContextArtifact> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let mut state = self.write();
        let id = state.put_artifact(ArtifactInput {
            kind,
            moment,
            source,
            raw,
            summary,
            target_agent,
            channel,
        });
        state.artifacts.get(&id).cloned()
    }

    /// Deliver `value` over `link`: merge it into the target port's fact and
    /// log an `agent_handoff` event scoped to the target
    pub fn record_agent_handoff(&self, link: &TypedHandoffLink, value: &TypedValue) {
        let from = link.from_agent.trim();
        let to = link.to_agent.trim();
        if from.is_empty() || to.is_empty() {
            return;
        }
        let kind = value.kind.unwrap_or(link.kind);
        let from_port = match link.from_port.trim() {
            "" => DEFAULT_OUTPUT_PORT,
            p => p,
        };
        let to_port = match link.to_port.trim() {
            "" => DEFAULT_INPUT_PORT,
            p => p,
        };
        let channel = match link.channel.trim() {
            "" => channel_id(from, from_port, to, to_port, kind),
            c => c.to_string(),
        };

        let value_summary = if !value.ref_id.is_empty() {
            format!("ref={}", value.ref_id)
        } else if !value.inline_text.trim().is_empty() {
            format!("text={}", trim(&value.inline_text, 140))
        } else {
            format!("kind={kind}")
        };
        let summary = format!(
            "ch={channel} to={to} from_port={from_port} to_port={to_port} kind={kind} {value_summary}"
        );

        let fact_key = format!("handoff.{to}.{to_port}");
        let fact_value = trim(&format!("from={from} {summary}"), 220);

        let mut state = self.write();
        let prev = state.facts.get(&fact_key);
        let merged = merge_handoff_fact(
            prev,
            &fact_value,
            kind,
            from,
            link.merge_policy,
            link.target_max_tokens,
        );
        let Some(merged) = merged else {
            debug!(key = %fact_key, "handoff fact unchanged");
            return;
        };

        let now = Utc::now();
        state.facts.insert(
            fact_key.clone(),
            ContextFact {
                key: fact_key,
                value: merged.value,
                kind,
                moment: ContextMoment::Synthesis,
                confidence: 0.95,
                source: merged.source,
                target_agent: to.to_string(),
                channel: link.channel.trim().to_string(),
                updated_at: now,
            },
        );

        let mut ev = event("agent_handoff", from, Kind::MessageAgent, ContextMoment::Synthesis);
        ev.summary = summary;
        ev.artifact_id = value.ref_id.clone();
        ev.target_agent = to.to_string();
        ev.channel = link.channel.trim().to_string();
        ev.updated_at = now;
        state.push_event(ev, HANDOFF_EVENT_CAP);
        state.touch(DirtyFlags::FACTS | DirtyFlags::EVENTS);
    }

    /// Owned copy of the state: facts sorted by key, artifacts newest first
    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.read();
        let mut facts: Vec<ContextFact> = state.facts.values().cloned().collect();
        facts.sort_by(|a, b| a.key.cmp(&b.key));
        let mut artifacts: Vec<ContextArtifact> = state.artifacts.values().cloned().collect();
        artifacts.sort_by(|a, b| b.seq.cmp(&a.seq).then_with(|| a.id.cmp(&b.id)));

        ContextSnapshot {
            goal: state.goal.clone(),
            constraints: state.constraints.clone(),
            facts,
            open_questions: state.open_questions.clone(),
            recent_events: state.events.clone(),
            artifacts,
            version: state.version,
            dirty_flags: state.dirty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MergePolicy;
    use serde_json::{json, Value};

    fn result(v: Value) -> Option<sdk::skill::SkillResult> {
        v.as_object().cloned()
    }

    #[test]
    fn test_goal_constraints_and_version() {
        let bus = ContextBus::new("  ship it ");
        assert_eq!(bus.version(), 1);
        bus.set_goal("ship it");
        assert_eq!(bus.version(), 1);

        bus.add_constraint("be brief");
        bus.add_constraint(" be brief ");
        bus.add_constraint("");
        bus.add_open_question("which db?");
        let snap = bus.snapshot();
        assert_eq!(snap.goal, "ship it");
        assert_eq!(snap.constraints, vec!["be brief"]);
        assert_eq!(snap.open_questions, vec!["which db?"]);
        assert_eq!(snap.version, 3);
        assert!(snap.dirty_flags.contains(DirtyFlags::GOAL | DirtyFlags::CONSTRAINTS | DirtyFlags::QUESTIONS));
        assert!(!snap.dirty_flags.contains(DirtyFlags::FACTS));
    }

    #[test]
    fn test_fact_unchanged_write_is_ignored() {
        let bus = ContextBus::default();
        bus.put_fact("k", "v", 1.5, "runtime");
        let v = bus.version();
        bus.put_fact("k", " v ", 1.0, "runtime");
        assert_eq!(bus.version(), v);
        bus.put_fact("k", "v", 0.5, "runtime");
        assert_eq!(bus.version(), v + 1);
        bus.put_fact("", "v", 1.0, "x");
        bus.put_fact("k2", " ", 1.0, "x");
        let snap = bus.snapshot();
        assert_eq!(snap.facts.len(), 1);
        assert!((snap.facts[0].confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_skill_call_events() {
        let bus = ContextBus::default();
        bus.record_skill_call("a", &SkillCallResult::failure("echo", "boom"), ContextMoment::ToolLoop);

        let mut ok = SkillCallResult::new("echo");
        ok.result = result(json!({"echo": "hi"}));
        bus.record_skill_call("a", &ok, ContextMoment::ToolLoop);

        let mut big = SkillCallResult::new("read");
        big.result = result(json!({"path": "src/lib.rs", "text": "fn main() {}\n".repeat(30)}));
        bus.record_skill_call("a", &big, ContextMoment::Discovery);

        let mut empty = SkillCallResult::new("noop");
        empty.result = result(json!({}));
        bus.record_skill_call("a", &empty, ContextMoment::ToolLoop);

        let snap = bus.snapshot();
        let ev = &snap.recent_events;
        assert_eq!(ev.len(), 4);
        assert_eq!(ev[0].kind, Kind::ToolError);
        assert!(ev[0].has_error);
        assert_eq!(ev[0].summary, "skill=echo failed: boom");
        assert_eq!(ev[1].summary, r#"skill=echo ok result={"echo":"hi"}"#);
        assert!(ev[2].summary.starts_with("skill=read ok (text stored as artifact=code/rust:"));
        assert_eq!(ev[2].moment, ContextMoment::Discovery);
        assert_eq!(snap.artifacts.len(), 1);
        assert_eq!(snap.artifacts[0].id, ev[2].artifact_id);
        assert_eq!(ev[3].summary, "skill=noop ok (empty result)");
    }

    #[test]
    fn test_events_are_capped() {
        let bus = ContextBus::default();
        for i in 0..70 {
            bus.record_agent_output("a", &format!("out {i}"));
        }
        let snap = bus.snapshot();
        assert_eq!(snap.recent_events.len(), 64);
        assert_eq!(snap.recent_events[0].summary, "out 6");
    }

    #[test]
    fn test_agent_output_spills_to_artifact() {
        let bus = ContextBus::default();
        bus.record_agent_output("a", &"x".repeat(300));
        let snap = bus.snapshot();
        let ev = &snap.recent_events[0];
        assert!(ev.summary.contains("(300 chars)"));
        assert_eq!(snap.artifacts[0].kind, Kind::ArtifactRef);
        assert_eq!(snap.artifacts[0].source, "a");
    }

    #[test]
    fn test_scoped_artifact_ids() {
        let bus = ContextBus::default();
        assert!(bus.put_artifact(Kind::TextPlain, ContextMoment::General, "a", "  ", "").is_none());
        let global = bus
            .put_artifact(Kind::TextPlain, ContextMoment::General, "a", "payload", "p")
            .unwrap();
        assert_eq!(global.id.len(), "text/plain:".len() + 12);
        assert_eq!(global.hash.len(), 64);

        let scoped = bus
            .put_scoped_artifact(Kind::TextPlain, ContextMoment::General, "a", "payload", "p", "b", "short")
            .unwrap();
        assert_eq!(scoped.id, format!("{}:b:short", global.id));

        let long_channel = "a.output->b.input#text/plain";
        let scoped = bus
            .put_scoped_artifact(Kind::TextPlain, ContextMoment::General, "a", "payload", "p", "b", long_channel)
            .unwrap();
        assert_eq!(scoped.id, format!("{}:b:{}", global.id, short_hash_string(long_channel)));
        assert_eq!(scoped.target_agent, "b");

        // newest first
        let snap = bus.snapshot();
        assert_eq!(snap.artifacts[0].id, scoped.id);
    }

    #[test]
    fn test_handoff_writes_scoped_fact_and_event() {
        let bus = ContextBus::default();
        let link = TypedHandoffLink::generic("a", "output", "b");
        bus.record_agent_handoff(&link, &TypedValue::inline(Kind::MessageAgent, "hello"));

        let snap = bus.snapshot();
        let fact = &snap.facts[0];
        assert_eq!(fact.key, "handoff.b.input");
        assert_eq!(
            fact.value,
            "from=a ch=a.output->b.input#message/agent to=b from_port=output to_port=input kind=message/agent text=hello"
        );
        assert_eq!(fact.target_agent, "b");
        assert_eq!(fact.source, "a");
        let ev = &snap.recent_events[0];
        assert_eq!(ev.event_type, "agent_handoff");
        assert_eq!(ev.agent, "a");
        assert_eq!(ev.target_agent, "b");

        // same payload again leaves the bus untouched
        let v = bus.version();
        bus.record_agent_handoff(&link, &TypedValue::inline(Kind::MessageAgent, "hello"));
        assert_eq!(bus.version(), v);
    }

    #[test]
    fn test_fan_in_appends_segments() {
        let bus = ContextBus::default();
        let mut l1 = TypedHandoffLink::generic("a", "out", "c");
        l1.kind = Kind::SummaryCode;
        l1.to_port = "src".into();
        l1.merge_policy = MergePolicy::Auto;
        let mut l2 = l1.clone();
        l2.from_agent = "b".into();

        bus.record_agent_handoff(&l1, &TypedValue::inline(Kind::SummaryCode, "one"));
        bus.record_agent_handoff(&l2, &TypedValue::inline(Kind::SummaryCode, "two"));
        let snap = bus.snapshot();
        let fact = snap.facts.iter().find(|f| f.key == "handoff.c.src").unwrap();
        assert!(fact.value.contains("from=a"));
        assert!(fact.value.contains(" || from=b"));
        assert_eq!(fact.source, "merge");
    }
}
