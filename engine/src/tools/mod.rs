//! Built-in skills and tool argument schemas
//!
//! Only the echo skill ships in-process. File and HTTP skills are provided by
//! the embedding application through [`crate::Engine::register_skill`]; the
//! schemas below describe the arguments those skill types are expected to
//! take so tool-capable providers see a precise contract.

pub mod echo;

pub use echo::EchoSkill;

use crate::config::SkillConfig;
use sdk::skill::Skill;
use serde_json::{json, Value};
use std::sync::Arc;

/// Skill instance for a config entry whose type has a built-in implementation
pub fn builtin_skill(cfg: &SkillConfig) -> Option<Arc<dyn Skill>> {
    match cfg.skill_type.trim() {
        "echo" => Some(Arc::new(EchoSkill::new(&cfg.name, &cfg.description))),
        _ => None,
    }
}

fn path_property() -> Value {
    json!({
        "type": "string",
        "description": "Path inside the workspace (relative path only)",
    })
}

/// Argument schema implied by a skill type, if the type is a known one
pub fn parameters_for_type(skill_type: &str) -> Option<Value> {
    let schema = match skill_type.trim() {
        "file_read" => json!({
            "type": "object",
            "properties": { "path": path_property() },
            "required": ["path"],
            "additionalProperties": false,
        }),
        "file_read_range" => json!({
            "type": "object",
            "properties": {
                "path": path_property(),
                "start_line": { "type": "integer", "description": "1-based start line (inclusive)" },
                "end_line": { "type": "integer", "description": "1-based end line (inclusive)" },
                "max_bytes": { "type": "integer", "description": "Optional override to reduce returned bytes" },
            },
            "required": ["path"],
            "additionalProperties": false,
        }),
        "file_write_safe" => json!({
            "type": "object",
            "properties": {
                "path": path_property(),
                "content": { "type": "string", "description": "Full text content to write" },
                "overwrite": { "type": "boolean", "description": "Replace an existing file (default false)" },
                "create_dirs": { "type": "boolean", "description": "Create parent directories if missing (default true)" },
                "expected_existing_sha1": { "type": "string", "description": "Fail if the current file hash differs" },
            },
            "required": ["path", "content"],
            "additionalProperties": false,
        }),
        "http" => json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "Target URL" },
                "method": { "type": "string", "description": "HTTP method (GET, POST, ...)" },
                "body": { "type": "string", "description": "Optional request body" },
            },
            "required": ["url"],
        }),
        "command_doc" => json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Exact command path when known" },
                "query": { "type": "string", "description": "Fallback free-text query" },
            },
        }),
        _ => return None,
    };
    Some(schema)
}
