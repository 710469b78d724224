//! Incoming channel selection
//!
//! A task sees every incoming handoff channel unless it caps them with
//! `context_max_channels` or `context_max_channel_tokens`. Under a cap,
//! channels are ranked by priority per estimated token and admitted greedily,
//! after first guaranteeing one channel to every required input port.

use super::handoff::TypedHandoffLink;
use super::task::Task;
use crate::context::{ContextMoment, WeightProfile};
use sdk::kinds::{Category, Kind};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub total: usize,
    pub selected: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
struct ChannelCandidate {
    channel: String,
    to_port: String,
    required: bool,
    priority: f64,
    tokens: usize,
}

impl ChannelCandidate {
    fn density(&self) -> f64 {
        self.priority / self.tokens.max(1) as f64
    }

    fn rank(&self, other: &Self) -> Ordering {
        other
            .density()
            .total_cmp(&self.density())
            .then_with(|| other.priority.total_cmp(&self.priority))
            .then_with(|| other.required.cmp(&self.required))
            .then_with(|| self.channel.cmp(&other.channel))
    }
}

/// Sorted distinct channel ids of the task's incoming links
pub fn incoming_channels(task: &Task) -> Vec<String> {
    task.incoming
        .iter()
        .map(|l| l.channel.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Preference for reading a channel while in `moment`
pub fn channel_priority(link: &TypedHandoffLink, moment: ContextMoment, weights: &WeightProfile) -> f64 {
    let mut score = weights.score(link.kind, ContextMoment::Synthesis, moment);
    if link.required {
        score += 4.0;
    }
    if link.channel_priority > 0.0 {
        score += link.channel_priority;
    }
    if link.target_max_tokens > 0 {
        score += 0.2;
    }
    if score <= 0.0 {
        score = 0.5;
    }
    score
}

/// Estimated tokens a channel adds to the compiled context
pub fn channel_token_cost(link: &TypedHandoffLink) -> usize {
    if link.target_max_tokens > 0 {
        return link.target_max_tokens;
    }
    kind_token_cost(link.kind)
}

fn kind_token_cost(kind: Kind) -> usize {
    match kind.category() {
        Category::Summary | Category::Memory | Category::Diagnostic => 48,
        Category::Artifact | Category::Code | Category::Json | Category::Data => 80,
        Category::Tool => 64,
        _ => 56,
    }
}

/// Channels the task compiles its context with, sorted, plus selection counts
pub fn select_compile_channels(task: &Task, moment: ContextMoment) -> (Vec<String>, ChannelStats) {
    let all = incoming_channels(task);
    let mut stats = ChannelStats {
        total: all.len(),
        selected: all.len(),
        dropped: 0,
    };
    if all.is_empty() {
        return (all, stats);
    }

    let tuning = task.tuning();
    let max_channels = tuning.context_max_channels.unwrap_or(0);
    let max_tokens = tuning.context_max_channel_tokens.unwrap_or(0);
    if max_channels == 0 && max_tokens == 0 {
        return (all, stats);
    }

    let weights = WeightProfile::shared();
    let mut by_channel: BTreeMap<String, ChannelCandidate> = BTreeMap::new();
    for link in &task.incoming {
        let channel = link.channel.trim();
        if channel.is_empty() {
            continue;
        }
        let next = ChannelCandidate {
            channel: channel.to_string(),
            to_port: link.to_port.trim().to_string(),
            required: link.required,
            priority: channel_priority(link, moment, weights),
            tokens: channel_token_cost(link),
        };
        match by_channel.get_mut(channel) {
            Some(prev) => {
                prev.priority = prev.priority.max(next.priority);
                prev.required |= next.required;
                if prev.to_port.is_empty() {
                    prev.to_port = next.to_port;
                }
                if prev.tokens == 0 || (next.tokens > 0 && next.tokens < prev.tokens) {
                    prev.tokens = next.tokens;
                }
            }
            None => {
                by_channel.insert(channel.to_string(), next);
            }
        }
    }

    let mut cands: Vec<ChannelCandidate> = by_channel
        .into_values()
        .map(|mut c| {
            c.tokens = c.tokens.max(1);
            c
        })
        .collect();
    cands.sort_by(ChannelCandidate::rank);

    let mut picker = Picker {
        max_channels,
        max_tokens,
        ..Default::default()
    };

    let mut best_required: BTreeMap<&str, &ChannelCandidate> = BTreeMap::new();
    for c in cands.iter().filter(|c| c.required && !c.to_port.is_empty()) {
        match best_required.get(c.to_port.as_str()) {
            Some(prev) if prev.priority >= c.priority => {}
            _ => {
                best_required.insert(c.to_port.as_str(), c);
            }
        }
    }
    for (port, c) in best_required {
        if !picker.add(c) {
            // Caps leave the port starved; force one channel through
            debug!(agent = %task.name(), port, channel = %c.channel, "admitting required channel over cap");
            picker.force(c);
        }
    }
    for c in &cands {
        picker.add(c);
    }

    let mut selected = picker.selected;
    selected.sort();
    stats.selected = selected.len();
    stats.dropped = stats.total.saturating_sub(stats.selected);
    if stats.dropped > 0 {
        debug!(agent = %task.name(), dropped = stats.dropped, "incoming channels dropped");
    }
    (selected, stats)
}

#[derive(Default)]
struct Picker {
    max_channels: usize,
    max_tokens: usize,
    seen: HashSet<String>,
    selected: Vec<String>,
    tokens: usize,
}

impl Picker {
    fn add(&mut self, c: &ChannelCandidate) -> bool {
        if self.seen.contains(&c.channel) {
            return true;
        }
        if self.max_channels > 0 && self.selected.len() >= self.max_channels {
            return false;
        }
        if self.max_tokens > 0 && self.tokens + c.tokens > self.max_tokens {
            return false;
        }
        self.force(c);
        true
    }

    fn force(&mut self, c: &ChannelCandidate) {
        if self.seen.insert(c.channel.clone()) {
            self.selected.push(c.channel.clone());
            self.tokens += c.tokens;
        }
    }
}
