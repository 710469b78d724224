//! Typed handoff inference
//!
//! Given an upstream and a downstream agent, work out which output port of
//! the upstream feeds which input port of the downstream, with what kind.
//! Port selectors from `depends_on_ports` restrict which upstream agents and
//! ports an input port will accept.

use crate::config::{AgentConfig, IOPortConfig};
use crate::context::MergePolicy;
use sdk::kinds::{kinds_compatible, Kind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const DEFAULT_OUTPUT_PORT: &str = "output";
pub const DEFAULT_INPUT_PORT: &str = "input";

/// One typed edge between an output port and an input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedHandoffLink {
    pub channel: String,
    pub from_agent: String,
    pub to_agent: String,
    pub from_port: String,
    pub to_port: String,
    pub kind: Kind,
    pub merge_policy: MergePolicy,
    pub channel_priority: f64,
    /// Token cap of the receiving port, 0 for none
    pub target_max_tokens: usize,
    pub required: bool,
}

impl TypedHandoffLink {
    /// Untyped agent-to-agent message link
    pub fn generic(from_agent: &str, from_port: &str, to_agent: &str) -> Self {
        Self {
            channel: channel_id(from_agent, from_port, to_agent, DEFAULT_INPUT_PORT, Kind::MessageAgent),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            from_port: from_port.to_string(),
            to_port: DEFAULT_INPUT_PORT.to_string(),
            kind: Kind::MessageAgent,
            merge_policy: MergePolicy::Auto,
            channel_priority: 0.0,
            target_max_tokens: 0,
            required: false,
        }
    }

    fn to_input(from_agent: &str, from_port: &str, to_agent: &str, input: &NormalizedPort, kind: Kind) -> Self {
        Self {
            channel: channel_id(from_agent, from_port, to_agent, &input.name, kind),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            from_port: from_port.to_string(),
            to_port: input.name.clone(),
            kind,
            merge_policy: input.merge_policy,
            channel_priority: input.channel_priority,
            target_max_tokens: input.max_tokens,
            required: input.required,
        }
    }

    fn dedupe_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{:.6}|{}",
            self.channel,
            self.from_agent,
            self.to_agent,
            self.from_port,
            self.to_port,
            self.kind,
            self.merge_policy.as_str(),
            self.channel_priority,
            self.target_max_tokens
        )
    }

    fn cmp_by_target(&self, other: &Self) -> Ordering {
        self.to_agent
            .cmp(&other.to_agent)
            .then_with(|| self.to_port.cmp(&other.to_port))
            .then_with(|| self.from_agent.cmp(&other.from_agent))
            .then_with(|| self.from_port.cmp(&other.from_port))
            .then_with(|| self.cmp_tail(other))
    }

    fn cmp_by_source(&self, other: &Self) -> Ordering {
        self.from_agent
            .cmp(&other.from_agent)
            .then_with(|| self.to_agent.cmp(&other.to_agent))
            .then_with(|| self.to_port.cmp(&other.to_port))
            .then_with(|| self.from_port.cmp(&other.from_port))
            .then_with(|| self.cmp_tail(other))
            .then_with(|| other.required.cmp(&self.required))
    }

    fn cmp_tail(&self, other: &Self) -> Ordering {
        self.channel
            .cmp(&other.channel)
            .then_with(|| self.kind.as_str().cmp(other.kind.as_str()))
            .then_with(|| self.merge_policy.as_str().cmp(other.merge_policy.as_str()))
            .then_with(|| other.channel_priority.total_cmp(&self.channel_priority))
            .then_with(|| self.target_max_tokens.cmp(&other.target_max_tokens))
    }
}

/// `from.port->to.port#kind`, with default port names filled in
pub fn channel_id(from_agent: &str, from_port: &str, to_agent: &str, to_port: &str, kind: Kind) -> String {
    let from_port = match from_port.trim() {
        "" => DEFAULT_OUTPUT_PORT,
        p => p,
    };
    let to_port = match to_port.trim() {
        "" => DEFAULT_INPUT_PORT,
        p => p,
    };
    format!(
        "{}.{}->{}.{}#{}",
        from_agent.trim(),
        from_port,
        to_agent.trim(),
        to_port,
        kind
    )
}

/// Port with its kinds normalized against the registry
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPort {
    pub name: String,
    pub kinds: Vec<Kind>,
    pub merge_policy: MergePolicy,
    pub channel_priority: f64,
    pub required: bool,
    pub max_tokens: usize,
}

/// Registry kinds named by `raw`, deduplicated in order; unknown names dropped
pub fn normalize_kinds(raw: &[String]) -> Vec<Kind> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|r| Kind::normalize(r))
        .filter(|k| seen.insert(*k))
        .collect()
}

fn normalize_ports(ports: &[IOPortConfig], kinds_of: fn(&IOPortConfig) -> &[String]) -> Vec<NormalizedPort> {
    ports
        .iter()
        .filter(|p| !p.name.trim().is_empty())
        .map(|p| {
            let mut kinds = normalize_kinds(kinds_of(p));
            if kinds.is_empty() {
                kinds.push(Kind::MessageAgent);
            }
            NormalizedPort {
                name: p.name.trim().to_string(),
                kinds,
                merge_policy: MergePolicy::parse(&p.merge_policy),
                channel_priority: p.channel_priority,
                required: p.required,
                max_tokens: p.max_tokens,
            }
        })
        .collect()
}

pub fn normalize_input_ports(agent: &AgentConfig) -> Vec<NormalizedPort> {
    normalize_ports(&agent.io.inputs, |p| &p.accepts)
}

pub fn normalize_output_ports(agent: &AgentConfig) -> Vec<NormalizedPort> {
    normalize_ports(&agent.io.outputs, |p| &p.produces)
}

/// `agent` or `agent.port` reference from `depends_on_ports`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSelector {
    pub agent: String,
    /// Empty means any port of `agent`
    pub port: String,
}

impl PortSelector {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.contains(' ') {
            return None;
        }
        let parts: Vec<&str> = raw.split('.').collect();
        match parts.as_slice() {
            [agent] if !agent.is_empty() => Some(Self {
                agent: agent.to_string(),
                port: String::new(),
            }),
            [agent, port] if !agent.is_empty() && !port.is_empty() => Some(Self {
                agent: agent.to_string(),
                port: port.to_string(),
            }),
            _ => None,
        }
    }

    fn matches(&self, from_agent: &str, from_port: &str) -> bool {
        self.agent == from_agent && (self.port.is_empty() || self.port == from_port)
    }
}

/// Valid selectors per input port; ports without any valid selector are omitted
pub type PortSelectors = BTreeMap<String, Vec<PortSelector>>;

pub fn parse_port_selectors(raw: &BTreeMap<String, Vec<String>>) -> PortSelectors {
    raw.iter()
        .filter_map(|(port, refs)| {
            let port = port.trim();
            if port.is_empty() {
                return None;
            }
            let selectors: Vec<PortSelector> = refs.iter().filter_map(|r| PortSelector::parse(r)).collect();
            (!selectors.is_empty()).then(|| (port.to_string(), selectors))
        })
        .collect()
}

fn slice_allows(selectors: &[PortSelector], from_agent: &str, from_port: &str) -> bool {
    selectors.is_empty() || selectors.iter().any(|s| s.matches(from_agent, from_port))
}

/// Whether `to_port` accepts data from `from_agent.from_port`; unconstrained
/// ports accept anything
pub fn selector_allows(selectors: &PortSelectors, to_port: &str, from_agent: &str, from_port: &str) -> bool {
    match selectors.get(to_port) {
        Some(sels) => slice_allows(sels, from_agent, from_port),
        None => true,
    }
}

/// Sorted unique agents referenced by `depends_on_ports`
pub fn port_dependency_agents(raw: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    raw.values()
        .flatten()
        .filter_map(|r| PortSelector::parse(r))
        .map(|s| s.agent)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn accepts_message_like(kinds: &[Kind]) -> bool {
    kinds.iter().any(Kind::is_message_like)
}

/// Links from `from` to `to`, deduplicated and sorted by target
pub fn infer_handoff_links(from: &AgentConfig, to: &AgentConfig) -> Vec<TypedHandoffLink> {
    let from_name = from.name.as_str();
    let to_name = to.name.as_str();
    let out_ports = normalize_output_ports(from);
    let in_ports = normalize_input_ports(to);
    let selectors = parse_port_selectors(&to.depends_on_ports);

    if out_ports.is_empty() && in_ports.is_empty() {
        if !selectors.is_empty()
            && !selector_allows(&selectors, DEFAULT_INPUT_PORT, from_name, DEFAULT_OUTPUT_PORT)
        {
            return Vec::new();
        }
        return vec![TypedHandoffLink::generic(from_name, DEFAULT_OUTPUT_PORT, to_name)];
    }

    let mut links = Vec::new();
    let mut used = HashSet::new();

    for input in &in_ports {
        let constraint = selectors.get(&input.name);
        let allowed = |port: &str| constraint.map_or(true, |sels| slice_allows(sels, from_name, port));

        let matched = input.kinds.iter().find_map(|&want| {
            out_ports.iter().find_map(|out| {
                out.kinds.iter().find_map(|&have| {
                    if !kinds_compatible(have, want) || !allowed(&out.name) {
                        return None;
                    }
                    used.insert(format!("{}|{}|{}", out.name, input.name, have))
                        .then(|| TypedHandoffLink::to_input(from_name, &out.name, to_name, input, have))
                })
            })
        });
        if let Some(link) = matched {
            links.push(link);
            continue;
        }

        if accepts_message_like(&input.kinds) {
            let mut port = out_ports
                .first()
                .map_or(DEFAULT_OUTPUT_PORT, |p| p.name.as_str());
            if let Some(sels) = constraint {
                if let Some(selected) = sels.iter().find_map(|s| {
                    (s.agent == from_name && !s.port.is_empty())
                        .then(|| out_ports.iter().find(|o| o.name == s.port))
                        .flatten()
                }) {
                    port = selected.name.as_str();
                }
                if !slice_allows(sels, from_name, port) {
                    continue;
                }
            }
            links.push(TypedHandoffLink::to_input(from_name, port, to_name, input, Kind::MessageAgent));
        }
    }

    if in_ports.is_empty() && links.is_empty() {
        if let Some(first) = out_ports.first() {
            if !selectors.is_empty()
                && !selector_allows(&selectors, DEFAULT_INPUT_PORT, from_name, &first.name)
            {
                return Vec::new();
            }
            links.push(TypedHandoffLink::generic(from_name, &first.name, to_name));
        }
    }

    dedupe_links(links)
}

/// Drop duplicate links and sort by target agent and port
pub fn dedupe_links(links: Vec<TypedHandoffLink>) -> Vec<TypedHandoffLink> {
    let mut seen = HashSet::new();
    let mut out: Vec<TypedHandoffLink> = links
        .into_iter()
        .filter(|l| seen.insert(l.dedupe_key()))
        .collect();
    out.sort_by(TypedHandoffLink::cmp_by_target);
    out
}

/// Drop duplicate links and sort by source agent, the order plans report them in
pub fn dedupe_plan_handoffs(links: Vec<TypedHandoffLink>) -> Vec<TypedHandoffLink> {
    let mut seen = HashSet::new();
    let mut out: Vec<TypedHandoffLink> = links
        .into_iter()
        .filter(|l| seen.insert(l.dedupe_key()))
        .collect();
    out.sort_by(TypedHandoffLink::cmp_by_source);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentConfig {
        AgentConfig::new(name)
    }

    #[test]
    fn test_channel_id_defaults() {
        assert_eq!(channel_id("a", "", "b", " ", Kind::MessageAgent), "a.output->b.input#message/agent");
        assert_eq!(channel_id("a", "plan", "b", "brief", Kind::PlanSummary), "a.plan->b.brief#plan/summary");
    }

    #[test]
    fn test_untyped_agents_get_generic_link() {
        let links = infer_handoff_links(&agent("a"), &agent("b"));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].channel, "a.output->b.input#message/agent");
        assert_eq!(links[0].merge_policy, MergePolicy::Auto);
    }

    #[test]
    fn test_untyped_link_respects_selectors() {
        let mut b = agent("b");
        b.depends_on_ports.insert("input".into(), vec!["c".into()]);
        assert!(infer_handoff_links(&agent("a"), &b).is_empty());
        b.depends_on_ports.insert("input".into(), vec!["a.output".into()]);
        assert_eq!(infer_handoff_links(&agent("a"), &b).len(), 1);
    }

    #[test]
    fn test_typed_match_carries_input_settings() {
        let mut a = agent("a");
        a.io.outputs.push(IOPortConfig::output("plan", &["plan/summary", "text/plain"]));
        let mut b = agent("b");
        let mut brief = IOPortConfig::input("brief", &["plan", "bogus"]);
        brief.required = true;
        brief.max_tokens = 50;
        brief.merge_policy = "append".into();
        b.io.inputs.push(brief);

        let links = infer_handoff_links(&a, &b);
        assert_eq!(links.len(), 1);
        let l = &links[0];
        assert_eq!(l.kind, Kind::PlanSummary);
        assert_eq!(l.from_port, "plan");
        assert_eq!(l.to_port, "brief");
        assert!(l.required);
        assert_eq!(l.target_max_tokens, 50);
        assert_eq!(l.merge_policy, MergePolicy::Append3);
    }

    #[test]
    fn test_message_like_fallback() {
        let mut a = agent("a");
        a.io.outputs.push(IOPortConfig::output("code", &["code/rust"]));
        a.io.outputs.push(IOPortConfig::output("notes", &["text/markdown"]));
        let mut b = agent("b");
        b.io.inputs.push(IOPortConfig::input("notes_in", &["message/agent"]));
        b.io.inputs.push(IOPortConfig::input("diag", &["diagnostic/test"]));

        let links = infer_handoff_links(&a, &b);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].from_port, "code");
        assert_eq!(links[0].to_port, "notes_in");
        assert_eq!(links[0].kind, Kind::MessageAgent);

        // a selector naming a specific port redirects the fallback to it
        b.depends_on_ports.insert("notes_in".into(), vec!["a.notes".into()]);
        let links = infer_handoff_links(&a, &b);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].from_port, "notes");
    }

    #[test]
    fn test_selector_blocks_other_agents() {
        let mut a = agent("a");
        a.io.outputs.push(IOPortConfig::output("out", &["text/plain"]));
        let mut b = agent("b");
        b.io.inputs.push(IOPortConfig::input("in", &["text/plain"]));
        b.depends_on_ports.insert("in".into(), vec!["z".into()]);
        assert!(infer_handoff_links(&a, &b).is_empty());
    }

    #[test]
    fn test_outputs_only_exposes_first_port() {
        let mut a = agent("a");
        a.io.outputs.push(IOPortConfig::output("summary", &["summary/text"]));
        a.io.outputs.push(IOPortConfig::output("extra", &["json"]));
        let links = infer_handoff_links(&a, &agent("b"));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].from_port, "summary");
        assert_eq!(links[0].to_port, "input");
        assert_eq!(links[0].kind, Kind::MessageAgent);
    }

    #[test]
    fn test_artifact_ref_satisfies_artifact_inputs() {
        let mut a = agent("a");
        a.io.outputs.push(IOPortConfig::output("blob", &["artifact/ref"]));
        let mut b = agent("b");
        b.io.inputs.push(IOPortConfig::input("sum", &["artifact/summary"]));
        let links = infer_handoff_links(&a, &b);
        assert_eq!(links[0].kind, Kind::ArtifactRef);
        assert_eq!(links[0].channel, "a.blob->b.sum#artifact/ref");
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(
            PortSelector::parse(" a.p "),
            Some(PortSelector { agent: "a".into(), port: "p".into() })
        );
        assert!(PortSelector::parse("a b").is_none());
        assert!(PortSelector::parse("a.b.c").is_none());
        assert!(PortSelector::parse(".p").is_none());
        assert!(PortSelector::parse("").is_none());

        let mut raw = BTreeMap::new();
        raw.insert("x".to_string(), vec!["b.p".to_string(), "a".to_string(), "bad ref".to_string()]);
        raw.insert("y".to_string(), vec!["a.q".to_string()]);
        raw.insert(" ".to_string(), vec!["c".to_string()]);
        assert_eq!(port_dependency_agents(&raw), vec!["a", "b", "c"]);
        let sels = parse_port_selectors(&raw);
        assert_eq!(sels.len(), 2);
        assert_eq!(sels["x"].len(), 2);
    }

    #[test]
    fn test_dedupe_and_sort() {
        let l1 = TypedHandoffLink::generic("b", "output", "z");
        let l2 = TypedHandoffLink::generic("a", "output", "z");
        let l3 = TypedHandoffLink::generic("a", "output", "y");
        let out = dedupe_links(vec![l1.clone(), l2.clone(), l1.clone(), l3.clone()]);
        assert_eq!(out, vec![l3.clone(), l2.clone(), l1.clone()]);
        let out = dedupe_plan_handoffs(vec![l1.clone(), l2.clone(), l3.clone()]);
        assert_eq!(out, vec![l3, l2, l1]);
    }
}
