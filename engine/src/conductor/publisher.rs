//! Output publishing
//!
//! After a task succeeds, its output is pushed down its outgoing handoff
//! links into the shared bus. Short and summary-kind outputs travel inline;
//! anything else is stored as an artifact scoped to the receiving agent and
//! referenced by id. `publish_max_channels` and `publish_max_channel_tokens`
//! cap how many links receive a value.

use super::handoff::{TypedHandoffLink, DEFAULT_OUTPUT_PORT};
use super::task::Task;
use crate::context::summarize::summarize_raw_by_kind;
use crate::context::{estimate_tokens, trim, ContextBus, ContextMoment, WeightProfile};
use sdk::kinds::{Category, Kind, TypedValue};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

const INLINE_MAX_CHARS: usize = 320;
const SUMMARY_MAX_CHARS: usize = 220;

/// What one publish pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub sent: usize,
    pub dropped: usize,
    pub tokens: usize,
    /// Output had no consumer and the agent did not opt into publishing it
    pub skipped_unconsumed: bool,
}

struct PublishCandidate<'a> {
    link: &'a TypedHandoffLink,
    tokens: usize,
    priority: f64,
}

impl PublishCandidate<'_> {
    fn density(&self) -> f64 {
        self.priority / self.tokens.max(1) as f64
    }

    fn rank(&self, other: &Self) -> Ordering {
        other
            .density()
            .total_cmp(&self.density())
            .then_with(|| other.priority.total_cmp(&self.priority))
            .then_with(|| other.link.required.cmp(&self.link.required))
            .then_with(|| self.link.channel.cmp(&other.link.channel))
    }
}

/// Summary kinds always travel inline; message-like text only while short
pub fn should_inline(kind: Kind, raw: &str) -> bool {
    if raw.is_empty() || kind.category() == Category::Summary {
        return true;
    }
    match kind {
        Kind::MessageAgent | Kind::TextPlain | Kind::TextMarkdown | Kind::TextPrompt => {
            raw.len() <= INLINE_MAX_CHARS
        }
        _ => false,
    }
}

/// Preference for delivering over `link`
pub fn publish_priority(link: &TypedHandoffLink, value: &TypedValue) -> f64 {
    let kind = value.kind.unwrap_or(link.kind);
    let mut score = WeightProfile::shared().score(kind, ContextMoment::Synthesis, ContextMoment::Synthesis);
    if link.required {
        score += 5.0;
    }
    if link.target_max_tokens > 0 {
        score += 0.4;
    }
    if link.channel_priority > 0.0 {
        score += link.channel_priority;
    }
    if !link.channel.trim().is_empty() {
        score += 0.1;
    }
    if score <= 0.0 {
        score = 0.5;
    }
    score
}

fn from_port(link: &TypedHandoffLink) -> &str {
    match link.from_port.trim() {
        "" => DEFAULT_OUTPUT_PORT,
        p => p,
    }
}

fn value_key(link: &TypedHandoffLink) -> String {
    format!("{}|{}|{}", link.from_port, link.kind, link.channel.trim())
}

/// Value `output` would travel as over `link`
///
/// With a bus, large outputs are stored as a scoped artifact and the value
/// references it; without one (planning the publish) only the summary is
/// produced.
fn output_value(agent: &str, output: &str, link: &TypedHandoffLink, bus: Option<&ContextBus>) -> TypedValue {
    let kind = link.kind;
    let mut summary = trim(&summarize_raw_by_kind(kind, output), SUMMARY_MAX_CHARS);
    if summary.is_empty() {
        summary = trim(output, SUMMARY_MAX_CHARS);
    }
    let port = from_port(link);

    if should_inline(kind, output) {
        let inline = if kind.category() == Category::Summary {
            summary.clone()
        } else {
            trim(output, INLINE_MAX_CHARS)
        };
        let mut value = TypedValue::inline(kind, inline);
        value.bytes = output.len();
        value.tokens_hint = estimate_tokens(&value.inline_text);
        if bus.is_some() {
            value = value
                .with_meta("from_agent", agent)
                .with_meta("from_port", port)
                .with_meta("summary", summary);
        }
        return value;
    }

    let stored = bus.and_then(|bus| {
        bus.put_scoped_artifact(
            kind,
            ContextMoment::Synthesis,
            &format!("{agent}.{port}"),
            output,
            &summary,
            link.to_agent.trim(),
            link.channel.trim(),
        )
    });
    let tokens_hint = estimate_tokens(&summary);
    match stored {
        Some(art) => {
            let mut value = TypedValue::reference(kind, art.id)
                .with_meta("from_agent", agent)
                .with_meta("from_port", port)
                .with_meta("hash", art.hash);
            if !summary.is_empty() {
                value = value.with_meta("summary", summary);
            }
            value.bytes = art.bytes;
            value.tokens_hint = tokens_hint;
            value
        }
        None => {
            let mut value = TypedValue::inline(kind, summary);
            value.bytes = output.len();
            value.tokens_hint = tokens_hint;
            value
        }
    }
}

fn is_empty_value(v: &TypedValue) -> bool {
    v.kind.is_none() && v.ref_id.is_empty() && v.inline_text.trim().is_empty()
}

fn token_cost(link: &TypedHandoffLink, value: &TypedValue) -> usize {
    let mut cost = value.tokens_hint;
    if cost == 0 {
        cost = estimate_tokens(&value.inline_text);
    }
    if cost == 0 {
        let meta: Vec<String> = value.meta.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        cost = estimate_tokens(&meta.join(" "));
    }
    if link.target_max_tokens > 0 {
        cost = cost.min(link.target_max_tokens);
    }
    cost.max(1)
}

/// Push a finished task's output over its outgoing links
pub fn publish_task_outputs(bus: &ContextBus, task: &Task, output: &str) -> PublishOutcome {
    let mut out = PublishOutcome::default();
    let output = output.trim();
    if output.is_empty() {
        return out;
    }
    let tuning = task.tuning();
    if task.outgoing.is_empty() {
        if tuning.publish_unconsumed_output {
            bus.record_agent_output(task.name(), output);
        } else {
            out.skipped_unconsumed = true;
        }
        return out;
    }
    let max_channels = tuning.publish_max_channels.unwrap_or(0);
    let max_tokens = tuning.publish_max_channel_tokens.unwrap_or(0);

    let mut previews: HashMap<String, TypedValue> = HashMap::new();
    let mut cands = Vec::with_capacity(task.outgoing.len());
    for link in &task.outgoing {
        let value = previews
            .entry(value_key(link))
            .or_insert_with(|| output_value(task.name(), output, link, None));
        if is_empty_value(value) {
            continue;
        }
        cands.push(PublishCandidate {
            link,
            tokens: token_cost(link, value),
            priority: publish_priority(link, value),
        });
    }
    cands.sort_by(PublishCandidate::rank);

    let mut built: HashMap<String, TypedValue> = HashMap::new();
    for c in cands {
        if max_channels > 0 && out.sent >= max_channels {
            out.dropped += 1;
            continue;
        }
        // A required link is let through over the token cap while nothing was sent
        if max_tokens > 0 && out.tokens + c.tokens > max_tokens && !(c.link.required && out.sent == 0) {
            out.dropped += 1;
            continue;
        }
        let value = built
            .entry(value_key(c.link))
            .or_insert_with(|| output_value(task.name(), output, c.link, Some(bus)));
        if is_empty_value(value) {
            out.dropped += 1;
            continue;
        }
        bus.record_agent_handoff(c.link, value);
        out.sent += 1;
        out.tokens += c.tokens;
    }
    debug!(
        agent = %task.name(),
        sent = out.sent,
        dropped = out.dropped,
        tokens = out.tokens,
        "published outputs"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, ProviderConfig};
    use crate::context::MergePolicy;

    fn link(to: &str, kind: Kind, required: bool) -> TypedHandoffLink {
        TypedHandoffLink {
            channel: super::super::handoff::channel_id("src", "output", to, "input", kind),
            from_agent: "src".into(),
            to_agent: to.into(),
            from_port: "output".into(),
            to_port: "input".into(),
            kind,
            merge_policy: MergePolicy::Auto,
            channel_priority: 0.0,
            target_max_tokens: 0,
            required,
        }
    }

    fn task(meta: &[(&str, &str)], outgoing: Vec<TypedHandoffLink>) -> Task {
        let mut agent = AgentConfig::new("src");
        for (k, v) in meta {
            agent.metadata.insert(k.to_string(), v.to_string());
        }
        Task {
            agent,
            agent_file: String::new(),
            provider: ProviderConfig::default(),
            skills: Vec::new(),
            stage: 0,
            depends_on: Vec::new(),
            incoming: Vec::new(),
            outgoing,
            tool_capable: false,
        }
    }

    #[test]
    fn test_inline_rules() {
        assert!(should_inline(Kind::SummaryCode, &"x".repeat(1000)));
        assert!(should_inline(Kind::MessageAgent, "short"));
        assert!(!should_inline(Kind::MessageAgent, &"x".repeat(321)));
        assert!(!should_inline(Kind::CodeRust, "fn main() {}"));
        assert!(should_inline(Kind::CodeRust, ""));
    }

    #[test]
    fn test_unconsumed_output() {
        let bus = ContextBus::new("g");
        let out = publish_task_outputs(&bus, &task(&[], Vec::new()), "done");
        assert!(out.skipped_unconsumed);
        assert!(bus.snapshot().recent_events.is_empty());

        let out = publish_task_outputs(&bus, &task(&[("publish_unconsumed_output", "yes")], Vec::new()), "done");
        assert!(!out.skipped_unconsumed);
        assert_eq!(bus.snapshot().recent_events[0].event_type, "agent_output");

        let out = publish_task_outputs(&bus, &task(&[], vec![link("b", Kind::MessageAgent, false)]), "   ");
        assert_eq!(out, PublishOutcome::default());
    }

    #[test]
    fn test_large_code_output_becomes_scoped_artifact() {
        let bus = ContextBus::new("g");
        let code = "pub fn alpha() {}\n".repeat(40);
        let out = publish_task_outputs(&bus, &task(&[], vec![link("b", Kind::CodeRust, false)]), &code);
        assert_eq!(out.sent, 1);
        let snap = bus.snapshot();
        assert_eq!(snap.artifacts.len(), 1);
        assert_eq!(snap.artifacts[0].target_agent, "b");
        assert_eq!(snap.artifacts[0].source, "src.output");
        let fact = snap.facts.iter().find(|f| f.key == "handoff.b.input").unwrap();
        assert!(fact.value.contains(&format!("ref={}", snap.artifacts[0].id)));
    }

    #[test]
    fn test_channel_cap_keeps_required_link() {
        let bus = ContextBus::new("g");
        let mut dense = link("fast", Kind::SummaryText, false);
        dense.channel_priority = 3.0;
        let t = task(
            &[("publish_max_channels", "1")],
            vec![dense, link("needs", Kind::MessageAgent, true)],
        );
        let out = publish_task_outputs(&bus, &t, "final answer");
        assert_eq!(out.sent, 1);
        assert_eq!(out.dropped, 1);
        let snap = bus.snapshot();
        assert!(snap.facts.iter().any(|f| f.key == "handoff.needs.input"));
        assert!(!snap.facts.iter().any(|f| f.key == "handoff.fast.input"));
    }

    #[test]
    fn test_channel_priority_picks_between_optional_links() {
        let bus = ContextBus::new("g");
        let mut preferred = link("reviewer_b", Kind::MessageAgent, false);
        preferred.channel_priority = 5.0;
        let t = task(
            &[("publish_max_channels", "1")],
            vec![link("reviewer_a", Kind::MessageAgent, false), preferred],
        );
        let out = publish_task_outputs(&bus, &t, "Shared output that can go to one consumer under budget.");
        assert_eq!(out.sent, 1);
        assert_eq!(out.dropped, 1);
        let snap = bus.snapshot();
        assert!(snap.facts.iter().any(|f| f.key == "handoff.reviewer_b.input"));
        assert!(!snap.facts.iter().any(|f| f.key == "handoff.reviewer_a.input"));
    }

    #[test]
    fn test_token_cap_admits_first_required_link() {
        let bus = ContextBus::new("g");
        let t = task(
            &[("publish_max_channel_tokens", "1")],
            vec![link("a", Kind::MessageAgent, false), link("b", Kind::MessageAgent, true)],
        );
        let out = publish_task_outputs(&bus, &t, "a reasonably long answer that costs tokens");
        assert_eq!(out.sent, 1);
        assert_eq!(out.dropped, 1);
        assert!(bus.snapshot().facts.iter().any(|f| f.key == "handoff.b.input"));
    }
}
