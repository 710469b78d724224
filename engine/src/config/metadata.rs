//! Typed view over agent metadata
//!
//! Agent metadata is a flat string map. The engine reads a fixed set of keys
//! from it; this module parses them once per task so the executor, budgets
//! and selection code work with typed values.

use std::collections::BTreeMap;

/// Integer value of `key`, if present and parseable after trimming
pub fn metadata_int(meta: &BTreeMap<String, String>, key: &str) -> Option<i64> {
    meta.get(key).and_then(|raw| raw.trim().parse::<i64>().ok())
}

/// Positive integer value of `key`; zero and negatives count as unset
pub fn metadata_positive(meta: &BTreeMap<String, String>, key: &str) -> Option<usize> {
    metadata_int(meta, key)
        .filter(|v| *v > 0)
        .and_then(|v| usize::try_from(v).ok())
}

/// Boolean value of `key`, or `fallback` when missing or unrecognized
pub fn metadata_bool(meta: &BTreeMap<String, String>, key: &str, fallback: bool) -> bool {
    let Some(raw) = meta.get(key) else {
        return fallback;
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => fallback,
    }
}

/// Every metadata knob the engine understands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentTuning {
    pub max_tool_rounds: Option<usize>,
    pub max_repeated_tool_calls: Option<usize>,
    pub tool_max_calls: Option<usize>,
    pub tool_max_exec_ms: Option<usize>,
    pub stage_tool_max_calls: Option<usize>,
    pub stage_tool_max_exec_ms: Option<usize>,
    pub context_max_input_tokens: Option<usize>,
    pub context_max_recent_events: Option<usize>,
    pub context_max_artifacts: Option<usize>,
    pub context_max_facts: Option<usize>,
    pub context_max_channels: Option<usize>,
    pub context_max_channel_tokens: Option<usize>,
    pub context_moment: Option<String>,
    pub publish_max_channels: Option<usize>,
    pub publish_max_channel_tokens: Option<usize>,
    pub publish_unconsumed_output: bool,
    pub cache_echo_tools: bool,
    pub cache_http_get_tools: bool,
    pub lock_file_tools: bool,
    pub lock_http_host_tools: bool,
}

impl AgentTuning {
    pub fn from_metadata(meta: &BTreeMap<String, String>) -> Self {
        Self {
            max_tool_rounds: metadata_positive(meta, "max_tool_rounds"),
            max_repeated_tool_calls: metadata_positive(meta, "max_repeated_tool_calls"),
            tool_max_calls: metadata_positive(meta, "tool_max_calls"),
            tool_max_exec_ms: metadata_positive(meta, "tool_max_exec_ms"),
            stage_tool_max_calls: metadata_positive(meta, "stage_tool_max_calls"),
            stage_tool_max_exec_ms: metadata_positive(meta, "stage_tool_max_exec_ms"),
            context_max_input_tokens: metadata_positive(meta, "context_max_input_tokens"),
            context_max_recent_events: metadata_positive(meta, "context_max_recent_events"),
            context_max_artifacts: metadata_positive(meta, "context_max_artifacts"),
            context_max_facts: metadata_positive(meta, "context_max_facts"),
            context_max_channels: metadata_positive(meta, "context_max_channels"),
            context_max_channel_tokens: metadata_positive(meta, "context_max_channel_tokens"),
            context_moment: meta
                .get("context_moment")
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty()),
            publish_max_channels: metadata_positive(meta, "publish_max_channels"),
            publish_max_channel_tokens: metadata_positive(meta, "publish_max_channel_tokens"),
            publish_unconsumed_output: metadata_bool(meta, "publish_unconsumed_output", false),
            cache_echo_tools: metadata_bool(meta, "cache_echo_tools", false),
            cache_http_get_tools: metadata_bool(meta, "cache_http_get_tools", false),
            lock_file_tools: metadata_bool(meta, "lock_file_tools", true),
            lock_http_host_tools: metadata_bool(meta, "lock_http_host_tools", false),
        }
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.max_tool_rounds.unwrap_or(8)
    }

    pub fn max_repeated_tool_calls(&self) -> usize {
        self.max_repeated_tool_calls.unwrap_or(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_int_parsing_trims_and_rejects_garbage() {
        let m = meta(&[("a", " 42 "), ("b", "x"), ("c", "-3"), ("d", "0")]);
        assert_eq!(metadata_int(&m, "a"), Some(42));
        assert_eq!(metadata_int(&m, "b"), None);
        assert_eq!(metadata_positive(&m, "c"), None);
        assert_eq!(metadata_positive(&m, "d"), None);
        assert_eq!(metadata_positive(&m, "missing"), None);
    }

    #[test]
    fn test_bool_parsing_with_fallback() {
        let m = meta(&[("on", "YES"), ("off", "off"), ("junk", "maybe")]);
        assert!(metadata_bool(&m, "on", false));
        assert!(!metadata_bool(&m, "off", true));
        assert!(metadata_bool(&m, "junk", true));
        assert!(!metadata_bool(&m, "junk", false));
    }

    #[test]
    fn test_defaults() {
        let t = AgentTuning::from_metadata(&BTreeMap::new());
        assert!(t.lock_file_tools);
        assert!(!t.lock_http_host_tools);
        assert_eq!(t.max_tool_rounds(), 8);
        assert_eq!(t.max_repeated_tool_calls(), 2);
        assert_eq!(t.context_moment, None);
    }

    #[test]
    fn test_overrides() {
        let t = AgentTuning::from_metadata(&meta(&[
            ("tool_max_calls", "1"),
            ("lock_file_tools", "false"),
            ("context_moment", " Validate "),
            ("max_tool_rounds", "3"),
        ]));
        assert_eq!(t.tool_max_calls, Some(1));
        assert!(!t.lock_file_tools);
        assert_eq!(t.context_moment.as_deref(), Some("validate"));
        assert_eq!(t.max_tool_rounds(), 3);
    }
}
