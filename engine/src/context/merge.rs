//! Handoff fact merging
//!
//! Each target input port owns one `handoff.<agent>.<port>` fact. When a new
//! handoff lands on a port that already has a value, the port's merge policy
//! decides whether the new summary replaces the old one or is appended as a
//! `" || "`-separated segment, keeping the most recent N segments under a
//! character cap.

use super::{trim, ContextFact};
use sdk::kinds::{Category, Kind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const SEGMENT_SEPARATOR: &str = " || ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Chosen from the value's kind at merge time
    #[default]
    Auto,
    Latest,
    Append2,
    Append3,
    Append4,
}

impl MergePolicy {
    /// Parse a configured policy; `append` means `append3`, anything unknown is `auto`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "latest" => MergePolicy::Latest,
            "append" | "append3" => MergePolicy::Append3,
            "append2" => MergePolicy::Append2,
            "append4" => MergePolicy::Append4,
            _ => MergePolicy::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergePolicy::Auto => "auto",
            MergePolicy::Latest => "latest",
            MergePolicy::Append2 => "append2",
            MergePolicy::Append3 => "append3",
            MergePolicy::Append4 => "append4",
        }
    }

    /// Default policy for a value kind
    pub fn for_kind(kind: Kind) -> Self {
        match kind.category() {
            _ if kind == Kind::ToolError => MergePolicy::Append4,
            Category::Diagnostic => MergePolicy::Append4,
            Category::Summary
            | Category::Memory
            | Category::Tool
            | Category::Artifact
            | Category::Code
            | Category::Json
            | Category::Data => MergePolicy::Append3,
            Category::Message | Category::Text => MergePolicy::Append2,
            _ => MergePolicy::Latest,
        }
    }

    /// Concrete policy: `Auto` resolves through the kind
    pub fn resolve(self, kind: Kind) -> Self {
        match self {
            MergePolicy::Auto => Self::for_kind(kind),
            other => other,
        }
    }

    /// Segment count and default character cap of an append policy
    fn segments(&self) -> Option<(usize, usize)> {
        match self {
            MergePolicy::Append4 => Some((4, 320)),
            MergePolicy::Append3 => Some((3, 300)),
            MergePolicy::Append2 => Some((2, 260)),
            _ => None,
        }
    }
}

/// Character cap derived from the target port's token budget (4 chars per
/// token, clamped to 96..=1200); `None` without a budget
pub fn handoff_fact_char_limit(target_max_tokens: usize) -> Option<usize> {
    if target_max_tokens == 0 {
        return None;
    }
    Some((target_max_tokens * 4).clamp(96, 1200))
}

fn split_segments(s: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    s.split("||")
        .map(str::trim)
        .filter(|p| !p.is_empty() && seen.insert(*p))
        .map(str::to_string)
        .collect()
}

/// Append `next` to the segments of `prev` unless already present, keep the
/// last `max_segments`, then drop oldest segments while over `max_chars`
pub fn merge_fact_segments(prev: &str, next: &str, max_segments: usize, max_chars: usize) -> String {
    let mut segments = split_segments(prev);
    let max_segments = if max_segments == 0 { 2 } else { max_segments };
    let add = next.trim();
    if !add.is_empty() && !segments.iter().any(|s| s == add) {
        segments.push(add.to_string());
    }
    if segments.len() > max_segments {
        segments.drain(..segments.len() - max_segments);
    }
    let mut joined = segments.join(SEGMENT_SEPARATOR);
    while max_chars > 0 && segments.len() > 1 && joined.len() > max_chars {
        segments.remove(0);
        joined = segments.join(SEGMENT_SEPARATOR);
    }
    if max_chars > 0 {
        joined = trim(&joined, max_chars);
    }
    joined
}

/// Result of merging a new handoff summary into a port fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedFact {
    pub value: String,
    pub source: String,
}

/// Merge `next` into the port fact `prev`
///
/// Returns `None` when the fact would not change.
pub fn merge_handoff_fact(
    prev: Option<&ContextFact>,
    next: &str,
    kind: Kind,
    source: &str,
    policy: MergePolicy,
    target_max_tokens: usize,
) -> Option<MergedFact> {
    let next = next.trim();
    let source = source.trim();
    let policy = policy.resolve(kind);
    let max_chars = handoff_fact_char_limit(target_max_tokens);

    let apply = |prev_value: &str, value: &str| match policy.segments() {
        Some((n, default_cap)) => {
            merge_fact_segments(prev_value, value, n, max_chars.unwrap_or(default_cap))
        }
        None => trim(value, max_chars.unwrap_or(220)),
    };

    if next.is_empty() {
        return None;
    }
    let prev = match prev {
        Some(p) if !p.value.trim().is_empty() => p,
        _ => {
            return Some(MergedFact {
                value: apply("", next),
                source: source.to_string(),
            })
        }
    };
    let prev_value = prev.value.trim();
    if prev_value == next {
        return None;
    }
    let merged = apply(&prev.value, next);
    if merged == prev_value {
        return None;
    }

    let prev_source = prev.source.trim();
    let merged_source = if !prev_source.is_empty() && prev_source != source {
        "merge".to_string()
    } else if source.is_empty() {
        prev.source.clone()
    } else {
        source.to_string()
    };
    Some(MergedFact {
        value: merged,
        source: merged_source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextMoment;
    use chrono::Utc;

    fn fact(value: &str, source: &str) -> ContextFact {
        ContextFact {
            key: "handoff.b.input".into(),
            value: value.into(),
            kind: Kind::MessageAgent,
            moment: ContextMoment::Synthesis,
            confidence: 0.95,
            source: source.into(),
            target_agent: "b".into(),
            channel: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_policy_parse_and_resolve() {
        assert_eq!(MergePolicy::parse("APPEND"), MergePolicy::Append3);
        assert_eq!(MergePolicy::parse("weird"), MergePolicy::Auto);
        assert_eq!(MergePolicy::Auto.resolve(Kind::ToolError), MergePolicy::Append4);
        assert_eq!(MergePolicy::Auto.resolve(Kind::DiagnosticLint), MergePolicy::Append4);
        assert_eq!(MergePolicy::Auto.resolve(Kind::ToolResult), MergePolicy::Append3);
        assert_eq!(MergePolicy::Auto.resolve(Kind::CodeRust), MergePolicy::Append3);
        assert_eq!(MergePolicy::Auto.resolve(Kind::TextPlain), MergePolicy::Append2);
        assert_eq!(MergePolicy::Auto.resolve(Kind::PlanSummary), MergePolicy::Latest);
        assert_eq!(MergePolicy::Latest.resolve(Kind::ToolError), MergePolicy::Latest);
    }

    #[test]
    fn test_char_limit() {
        assert_eq!(handoff_fact_char_limit(0), None);
        assert_eq!(handoff_fact_char_limit(10), Some(96));
        assert_eq!(handoff_fact_char_limit(100), Some(400));
        assert_eq!(handoff_fact_char_limit(1000), Some(1200));
    }

    #[test]
    fn test_segments_keep_latest_and_dedupe() {
        let v = merge_fact_segments("a || b", "c", 2, 0);
        assert_eq!(v, "b || c");
        let v = merge_fact_segments("a || b", "b", 3, 0);
        assert_eq!(v, "a || b");
        let v = merge_fact_segments("aaaa || bbbb", "cccc", 3, 12);
        assert_eq!(v, "bbbb || cccc");
        // a lone oversized segment is cut rather than dropped
        let v = merge_fact_segments("", "abcdefghij", 3, 4);
        assert_eq!(v, "abcd...");
    }

    #[test]
    fn test_merge_append_and_latest() {
        let prev = fact("from=a one", "a");
        let merged =
            merge_handoff_fact(Some(&prev), "from=c two", Kind::MessageAgent, "c", MergePolicy::Auto, 0)
                .unwrap();
        assert_eq!(merged.value, "from=a one || from=c two");
        assert_eq!(merged.source, "merge");

        let merged =
            merge_handoff_fact(Some(&prev), "from=a three", Kind::MessageAgent, "a", MergePolicy::Latest, 0)
                .unwrap();
        assert_eq!(merged.value, "from=a three");
        assert_eq!(merged.source, "a");
    }

    #[test]
    fn test_merge_unchanged() {
        let prev = fact("same", "a");
        assert!(merge_handoff_fact(Some(&prev), " same ", Kind::TextPlain, "a", MergePolicy::Auto, 0).is_none());
        assert!(merge_handoff_fact(Some(&prev), "", Kind::TextPlain, "a", MergePolicy::Auto, 0).is_none());
        // appending a segment already present leaves the value untouched
        let prev = fact("x || y", "a");
        assert!(merge_handoff_fact(Some(&prev), "y", Kind::TextPlain, "a", MergePolicy::Append3, 0).is_none());
    }

    #[test]
    fn test_first_value_is_capped() {
        let long = "x".repeat(500);
        let merged =
            merge_handoff_fact(None, &long, Kind::PlanSummary, "a", MergePolicy::Auto, 0).unwrap();
        assert_eq!(merged.value.len(), 223);
        let merged =
            merge_handoff_fact(None, &long, Kind::PlanSummary, "a", MergePolicy::Auto, 30).unwrap();
        assert_eq!(merged.value.len(), 123);
    }
}
