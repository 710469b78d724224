//! Kind-aware one-line summaries of large payloads
//!
//! Summaries stand in for raw tool output and agent output in the compiled
//! context. They are deterministic and cheap: a single pass over the lines,
//! no parsing beyond what `serde_json` gives for free.

use super::trim;
use sdk::kinds::{Category, Kind};
use sdk::skill::SkillResult;
use serde_json::Value;

pub(crate) fn is_code_kind(kind: Kind) -> bool {
    kind.category() == Category::Code
}

pub(crate) fn is_json_kind(kind: Kind) -> bool {
    kind.category() == Category::Json
}

pub(crate) fn is_summary_kind(kind: Kind) -> bool {
    kind.category() == Category::Summary || kind == Kind::ArtifactSummary
}

/// Newline count plus one; zero for empty input
pub fn count_lines(raw: &str) -> usize {
    if raw.is_empty() {
        return 0;
    }
    raw.matches('\n').count() + 1
}

fn push_unique_limited(dst: &mut Vec<String>, value: &str, limit: usize) {
    let value = value.trim();
    if value.is_empty() || dst.iter().any(|v| v == value) || dst.len() >= limit {
        return;
    }
    dst.push(value.to_string());
}

/// Keep the leading identifier characters (alphanumerics, `_`, `.`, `*`)
fn trim_identifier(s: &str) -> String {
    let s = s.trim().trim_matches(|c: char| ",{[(:".contains(c)).trim();
    s.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '*'))
        .collect()
}

fn ident_before_one_of<'a>(s: &'a str, seps: &[char]) -> &'a str {
    match s.find(|c| seps.contains(&c)) {
        Some(idx) => &s[..idx],
        None => s,
    }
}

fn ident_after_prefix(line: &str, prefix: &str) -> String {
    let rest = line.strip_prefix(prefix).unwrap_or(line).trim();
    trim_identifier(ident_before_one_of(rest, &['(', '{', '=', ':', '<', ' ', ';']))
}

fn quoted_token(line: &str) -> Option<&str> {
    let start = line.find('"')?;
    let rest = &line[start + 1..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn second_field(line: &str) -> String {
    line.split_whitespace()
        .nth(1)
        .map(trim_identifier)
        .unwrap_or_default()
}

fn go_func_name(line: &str) -> String {
    let mut rest = line.strip_prefix("func ").unwrap_or(line).trim();
    if rest.starts_with('(') {
        match rest.find(')') {
            Some(idx) if idx + 1 < rest.len() => rest = rest[idx + 1..].trim(),
            _ => return String::new(),
        }
    }
    trim_identifier(ident_before_one_of(rest, &['(', '[', ' ']))
}

fn compact_code_summary(pkg: &str, imports: &[String], symbols: &[String], raw: &str) -> String {
    let mut parts = vec![format!("lines={}", count_lines(raw))];
    if !pkg.is_empty() {
        parts.push(format!("pkg={}", pkg));
    }
    if !imports.is_empty() {
        parts.push(format!("imports={}", imports.join(",")));
    }
    if !symbols.is_empty() {
        parts.push(format!("symbols={}", symbols.join(",")));
    }
    parts.join(" ")
}

fn summarize_rust_code(raw: &str) -> String {
    const ITEMS: &[(&str, &str)] = &[
        ("fn ", "fn"),
        ("async fn ", "fn"),
        ("struct ", "struct"),
        ("enum ", "enum"),
        ("trait ", "trait"),
        ("mod ", "mod"),
        ("type ", "type"),
        ("const ", "const"),
        ("static ", "static"),
    ];
    let mut imports = Vec::new();
    let mut symbols = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") || line.starts_with("#[") {
            continue;
        }
        let line = line
            .strip_prefix("pub(crate) ")
            .or_else(|| line.strip_prefix("pub "))
            .unwrap_or(line);
        if let Some(path) = line.strip_prefix("use ") {
            push_unique_limited(&mut imports, &trim(path.trim_end_matches(';'), 70), 5);
            continue;
        }
        if let Some(rest) = line
            .strip_prefix("impl")
            .filter(|r| r.starts_with([' ', '<']))
        {
            let target = rest.trim_start_matches(|c: char| c != ' ').trim();
            let name: String = target
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':'))
                .collect();
            if !name.is_empty() {
                push_unique_limited(&mut symbols, &format!("impl:{}", name), 8);
            }
            continue;
        }
        for (prefix, label) in ITEMS {
            if line.starts_with(prefix) {
                let name = ident_after_prefix(line, prefix);
                if !name.is_empty() {
                    push_unique_limited(&mut symbols, &format!("{}:{}", label, name), 8);
                }
                break;
            }
        }
    }
    compact_code_summary("", &imports, &symbols, raw)
}

fn summarize_go_code(raw: &str) -> String {
    let mut pkg = String::new();
    let mut imports = Vec::new();
    let mut symbols = Vec::new();
    let mut in_import = false;
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if pkg.is_empty() {
            if let Some(name) = line.strip_prefix("package ") {
                pkg = name.trim().to_string();
                continue;
            }
        }
        if line.starts_with("import (") {
            in_import = true;
            continue;
        }
        if in_import {
            if line.starts_with(')') {
                in_import = false;
            } else if let Some(imp) = quoted_token(line) {
                push_unique_limited(&mut imports, imp, 5);
            }
            continue;
        }
        if line.starts_with("import ") {
            if let Some(imp) = quoted_token(line) {
                push_unique_limited(&mut imports, imp, 5);
            }
            continue;
        }
        let symbol = if line.starts_with("func ") {
            Some(("func", go_func_name(line)))
        } else {
            ["type ", "var ", "const "]
                .iter()
                .find(|p| line.starts_with(*p))
                .map(|p| (p.trim_end(), second_field(line)))
        };
        if let Some((label, name)) = symbol {
            if !name.is_empty() {
                push_unique_limited(&mut symbols, &format!("{}:{}", label, name), 8);
            }
        }
    }
    compact_code_summary(&pkg, &imports, &symbols, raw)
}

fn summarize_ts_js_code(raw: &str) -> String {
    const PREFIXES: &[&str] = &[
        "export async function ",
        "export function ",
        "function ",
        "export class ",
        "class ",
        "export interface ",
        "interface ",
        "export type ",
        "type ",
        "export const ",
        "const ",
    ];
    let mut imports = Vec::new();
    let mut symbols = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if line.starts_with("import ") {
            push_unique_limited(&mut imports, &trim(line, 70), 5);
            continue;
        }
        if let Some(prefix) = PREFIXES.iter().find(|p| line.starts_with(*p)) {
            let name = ident_after_prefix(line, prefix);
            if !name.is_empty() {
                push_unique_limited(&mut symbols, &name, 8);
            }
        }
    }
    compact_code_summary("", &imports, &symbols, raw)
}

fn summarize_python_code(raw: &str) -> String {
    let mut imports = Vec::new();
    let mut symbols = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("import ") || line.starts_with("from ") {
            push_unique_limited(&mut imports, &trim(line, 70), 5);
            continue;
        }
        for (prefix, label) in [("def ", "def"), ("class ", "class")] {
            if line.starts_with(prefix) {
                let name = ident_after_prefix(line, prefix);
                if !name.is_empty() {
                    push_unique_limited(&mut symbols, &format!("{}:{}", label, name), 8);
                }
            }
        }
    }
    compact_code_summary("", &imports, &symbols, raw)
}

fn summarize_generic_code(raw: &str) -> String {
    let sample: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(3)
        .map(|l| trim(l, 60))
        .collect();
    if sample.is_empty() {
        return format!("lines={}", count_lines(raw));
    }
    format!("lines={} sample={}", count_lines(raw), sample.join(" | "))
}

/// Outline of a code payload: imports and top-level symbols where the
/// language is recognized, otherwise the first few lines
pub fn summarize_code(kind: Kind, raw: &str) -> String {
    match kind {
        Kind::CodeRust => summarize_rust_code(raw),
        Kind::CodeGo => summarize_go_code(raw),
        Kind::CodeTs | Kind::CodeTsx | Kind::CodeJs | Kind::CodeJsx => summarize_ts_js_code(raw),
        Kind::CodePython => summarize_python_code(raw),
        _ => summarize_generic_code(raw),
    }
}

pub fn summarize_json(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys.truncate(6);
            format!("json_object keys={}", keys.join(","))
        }
        Ok(Value::Array(items)) => format!("json_array len={}", items.len()),
        Ok(_) => "json_value".to_string(),
        Err(_) => "json(unparsed)".to_string(),
    }
}

pub fn summarize_markdown(raw: &str) -> String {
    let headings: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('#'))
        .take(4)
        .map(|l| trim(l, 50))
        .collect();
    if headings.is_empty() {
        return summarize_plain_text(raw);
    }
    format!("headings={}", headings.join(" | "))
}

pub fn summarize_plain_text(raw: &str) -> String {
    match raw.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(first) => format!("lines={} first={}", count_lines(raw), trim(first, 80)),
        None => format!("lines={}", count_lines(raw)),
    }
}

/// Summary of a raw payload by its kind; empty for blank input
pub fn summarize_raw_by_kind(kind: Kind, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match kind {
        k if is_code_kind(k) => summarize_code(k, raw),
        k if is_json_kind(k) => summarize_json(raw),
        Kind::TextMarkdown => summarize_markdown(raw),
        Kind::SummaryCode => summarize_code(Kind::CodeGo, raw),
        _ => summarize_plain_text(raw),
    }
}

fn result_str<'a>(result: &'a SkillResult, key: &str) -> Option<&'a str> {
    result.get(key).and_then(Value::as_str)
}

fn result_int(result: &SkillResult, key: &str) -> Option<i64> {
    result
        .get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

fn range_label(result: &SkillResult) -> Option<String> {
    let start = result_int(result, "start_line")?;
    let end = result_int(result, "actual_end").or_else(|| result_int(result, "end_line"))?;
    (start > 0 && end >= start).then(|| format!("{}-{}", start, end))
}

pub(crate) fn short_hash(h: &str) -> &str {
    match h.char_indices().nth(12) {
        Some((idx, _)) => &h[..idx],
        None => h,
    }
}

/// Summary for a skill result stored as an artifact: file metadata fields
/// (path, line range, content hash, size, truncation) followed by a
/// kind-specific outline of `raw`
pub fn summarize_artifact_payload(kind: Kind, result: &SkillResult, raw: &str) -> String {
    let mut parts = Vec::new();
    if let Some(path) = result_str(result, "path").filter(|p| !p.trim().is_empty()) {
        parts.push(format!("path={}", path));
    }
    if let Some(range) = range_label(result) {
        parts.push(format!("range={}", range));
    }
    if let Some(sha) = result_str(result, "content_sha1").filter(|s| !s.is_empty()) {
        parts.push(format!("sha1={}", short_hash(sha)));
    }
    if let Some(bytes) = result_int(result, "bytes").filter(|b| *b > 0) {
        parts.push(format!("bytes={}", bytes));
    }
    if result.get("truncated").and_then(Value::as_bool) == Some(true) {
        parts.push("truncated=true".to_string());
    }

    let outline = match kind {
        k if is_code_kind(k) => summarize_code(k, raw),
        k if is_json_kind(k) => summarize_json(raw),
        Kind::TextMarkdown => summarize_markdown(raw),
        Kind::TextPlain => summarize_plain_text(raw),
        _ => String::new(),
    };
    if !outline.is_empty() {
        parts.push(outline);
    }

    if parts.is_empty() {
        return trim(raw, 180);
    }
    trim(&parts.join(" "), 220)
}

/// Kind of a skill result, from its explicit `detected_kind`, a file path,
/// an HTTP content type or the presence of text fields
pub fn infer_skill_result_kind(result: Option<&SkillResult>) -> Kind {
    let Some(result) = result else {
        return Kind::ToolResult;
    };
    if let Some(kind) = result_str(result, "detected_kind").and_then(Kind::normalize) {
        return kind;
    }
    if let Some(path) = result_str(result, "path").filter(|p| !p.is_empty()) {
        return Kind::infer_from_path(path);
    }
    if result.contains_key("status") {
        return match result_str(result, "content_type").map(str::to_lowercase) {
            Some(ct) if ct.contains("json") => Kind::JsonObject,
            Some(ct) if ct.contains("markdown") => Kind::TextMarkdown,
            Some(_) => Kind::TextPlain,
            None => Kind::ToolResult,
        };
    }
    if result.contains_key("text") || result.contains_key("body") {
        return Kind::TextPlain;
    }
    Kind::ToolResult
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(v: Value) -> SkillResult {
        match v {
            Value::Object(m) => m,
            _ => SkillResult::new(),
        }
    }

    #[test]
    fn test_count_lines() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("a"), 1);
        assert_eq!(count_lines("a\nb\n"), 3);
    }

    #[test]
    fn test_go_outline() {
        let src = "package runtime\n\nimport (\n\t\"fmt\"\n\t\"strings\"\n)\n\n// doc\nfunc (e *Engine) Run() {}\nfunc helper(x int) {}\ntype Bus struct{}\nvar cache = 1\n";
        assert_eq!(
            summarize_code(Kind::CodeGo, src),
            "lines=13 pkg=runtime imports=fmt,strings symbols=func:Run,func:helper,type:Bus,var:cache"
        );
    }

    #[test]
    fn test_rust_outline() {
        let src = "use std::fmt;\n\n#[derive(Debug)]\npub struct Bus;\nimpl fmt::Display for Bus {}\npub(crate) async fn run() {}\nenum Mode { A }\n";
        let out = summarize_code(Kind::CodeRust, src);
        assert!(out.starts_with("lines=8 imports=std::fmt symbols="), "{out}");
        assert!(out.contains("struct:Bus"));
        assert!(out.contains("impl:fmt::Display"));
        assert!(out.contains("fn:run"));
        assert!(out.contains("enum:Mode"));
    }

    #[test]
    fn test_ts_and_python_outline() {
        let ts = "import { x } from './x'\nexport function render(props) {}\nconst LIMIT = 3\n";
        assert_eq!(
            summarize_code(Kind::CodeTs, ts),
            "lines=4 imports=import { x } from './x' symbols=render,LIMIT"
        );
        let py = "import os\n# comment\ndef main():\n    pass\nclass Runner:\n";
        assert_eq!(
            summarize_code(Kind::CodePython, py),
            "lines=6 imports=import os symbols=def:main,class:Runner"
        );
    }

    #[test]
    fn test_generic_code_sample() {
        assert_eq!(
            summarize_code(Kind::CodeSql, "select 1;\n\nselect 2;"),
            "lines=3 sample=select 1; | select 2;"
        );
    }

    #[test]
    fn test_json_and_markdown() {
        assert_eq!(summarize_json(r#"{"b":1,"a":2}"#), "json_object keys=a,b");
        assert_eq!(summarize_json("[1,2,3]"), "json_array len=3");
        assert_eq!(summarize_json("42"), "json_value");
        assert_eq!(summarize_json("{oops"), "json(unparsed)");
        assert_eq!(
            summarize_markdown("# Title\ntext\n## Part"),
            "headings=# Title | ## Part"
        );
        assert_eq!(summarize_markdown("no headings"), "lines=1 first=no headings");
    }

    #[test]
    fn test_raw_by_kind_blank() {
        assert_eq!(summarize_raw_by_kind(Kind::TextPlain, "  \n "), "");
        assert_eq!(
            summarize_raw_by_kind(Kind::MessageAgent, "\nhello\nworld"),
            "lines=2 first=hello"
        );
    }

    #[test]
    fn test_artifact_payload_with_file_fields() {
        let r = result(json!({
            "path": "src/lib.rs",
            "start_line": 10,
            "actual_end": 20,
            "content_sha1": "0123456789abcdef",
            "bytes": 512,
            "truncated": true,
        }));
        let out = summarize_artifact_payload(Kind::TextPlain, &r, "first line\nsecond");
        assert_eq!(
            out,
            "path=src/lib.rs range=10-20 sha1=0123456789ab bytes=512 truncated=true lines=2 first=first line"
        );
    }

    #[test]
    fn test_infer_skill_result_kind() {
        assert_eq!(infer_skill_result_kind(None), Kind::ToolResult);
        let r = result(json!({"detected_kind": "md"}));
        assert_eq!(infer_skill_result_kind(Some(&r)), Kind::TextMarkdown);
        let r = result(json!({"path": "main.go"}));
        assert_eq!(infer_skill_result_kind(Some(&r)), Kind::CodeGo);
        let r = result(json!({"status": 200, "content_type": "application/json"}));
        assert_eq!(infer_skill_result_kind(Some(&r)), Kind::JsonObject);
        let r = result(json!({"status": 200}));
        assert_eq!(infer_skill_result_kind(Some(&r)), Kind::ToolResult);
        let r = result(json!({"body": "x"}));
        assert_eq!(infer_skill_result_kind(Some(&r)), Kind::TextPlain);
    }
}
