//! Type kind taxonomy
//!
//! Every value that moves between agents carries a [`Kind`], a canonical
//! `category/name` tag such as `text/plain`, `code/rust` or `artifact/ref`.
//! Kinds are a closed set; free-form strings from configuration are mapped
//! onto it with [`Kind::normalize`], which understands the aliases listed in
//! the registry below (`md`, `diff`, `agent_message`, `ref`, ...).
//!
//! # Categories
//!
//! - **primitive**, **text**, **code**, **json**, **data**: payload shapes
//! - **contract**, **db**, **backend**, **frontend**: application layers
//! - **artifact**, **tool**, **capability**: runtime storage and tool traffic
//! - **plan**, **diagnostic**, **memory**, **message**, **summary**, **test**, **context**

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

/// Top-level grouping of kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Primitive,
    Text,
    Code,
    Json,
    Data,
    Contract,
    Db,
    Backend,
    Frontend,
    Artifact,
    Tool,
    Capability,
    Plan,
    Diagnostic,
    Memory,
    Message,
    Summary,
    Test,
    Context,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Primitive => "primitive",
            Category::Text => "text",
            Category::Code => "code",
            Category::Json => "json",
            Category::Data => "data",
            Category::Contract => "contract",
            Category::Db => "db",
            Category::Backend => "backend",
            Category::Frontend => "frontend",
            Category::Artifact => "artifact",
            Category::Tool => "tool",
            Category::Capability => "capability",
            Category::Plan => "plan",
            Category::Diagnostic => "diagnostic",
            Category::Memory => "memory",
            Category::Message => "message",
            Category::Summary => "summary",
            Category::Test => "test",
            Category::Context => "context",
        }
    }

    /// Every category that has at least one registered kind, sorted by name
    pub fn all() -> Vec<Category> {
        let mut out: Vec<Category> = REGISTRY.iter().map(|d| d.kind.category()).collect();
        out.sort_by_key(|c| c.as_str());
        out.dedup();
        out
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical type kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    PrimitiveString,
    PrimitiveInt,
    PrimitiveFloat,
    PrimitiveNumber,
    PrimitiveBool,
    PrimitiveNull,

    TextPlain,
    TextMarkdown,
    TextPath,
    TextPrompt,
    TextDiff,

    CodeGo,
    CodeTs,
    CodeJs,
    CodeTsx,
    CodeJsx,
    CodePython,
    CodeRust,
    CodeJava,
    CodeC,
    CodeCpp,
    CodeBash,
    CodeSql,
    CodeYaml,
    CodeToml,

    JsonValue,
    JsonObject,
    JsonArray,

    DataCsv,
    DataTable,

    ContractOpenApi,
    ContractJsonSchema,

    DbSchema,
    DbMigration,

    BackendRoute,
    BackendController,
    BackendService,
    BackendRepository,

    FrontendPage,
    FrontendComponent,
    FrontendForm,
    FrontendClientApi,

    ArtifactRef,
    ArtifactBlob,
    ArtifactSummary,

    ToolResult,
    ToolError,
    CapabilityTools,

    PlanTask,
    PlanSummary,

    DiagnosticLint,
    DiagnosticTest,
    DiagnosticBuild,

    MemoryFact,
    MemoryQuestion,
    MemorySummary,

    MessageUser,
    MessageAgent,
    MessageAssistant,
    MessageSystem,
    MessageTool,

    SummaryCode,
    SummaryText,
    SummaryApi,

    TestUnit,
    TestIntegration,
    TestE2e,

    ContextCompiled,
}

/// Registry entry for a kind
#[derive(Debug, Clone, Copy)]
pub struct KindDef {
    pub kind: Kind,
    pub description: &'static str,
    pub aliases: &'static [&'static str],
}

const fn def(kind: Kind, description: &'static str, aliases: &'static [&'static str]) -> KindDef {
    KindDef {
        kind,
        description,
        aliases,
    }
}

static REGISTRY: &[KindDef] = &[
    def(Kind::PrimitiveString, "String scalar value.", &["string", "str"]),
    def(Kind::PrimitiveInt, "Integer scalar value.", &["int", "integer"]),
    def(Kind::PrimitiveFloat, "Float scalar value.", &["float"]),
    def(Kind::PrimitiveNumber, "Generic numeric scalar.", &["number", "num"]),
    def(Kind::PrimitiveBool, "Boolean scalar value.", &["bool", "boolean"]),
    def(Kind::PrimitiveNull, "Null/empty scalar.", &["null", "nil"]),
    def(Kind::TextPlain, "Plain text content.", &["text", "plain", "string/text"]),
    def(Kind::TextMarkdown, "Markdown text.", &["md", "markdown"]),
    def(Kind::TextPath, "Filesystem path as text.", &["path", "filepath"]),
    def(Kind::TextPrompt, "Prompt/instruction text.", &["prompt"]),
    def(Kind::TextDiff, "Patch/diff text.", &["diff", "patch"]),
    def(Kind::CodeGo, "Go source code.", &["go", "code.go"]),
    def(Kind::CodeTs, "TypeScript source code.", &["ts", "typescript", "code.ts"]),
    def(Kind::CodeJs, "JavaScript source code.", &["js", "javascript", "code.js"]),
    def(Kind::CodeTsx, "TypeScript JSX source code.", &["tsx", "code.tsx"]),
    def(Kind::CodeJsx, "JavaScript JSX source code.", &["jsx", "code.jsx"]),
    def(Kind::CodePython, "Python source code.", &["py", "python", "code.py"]),
    def(Kind::CodeRust, "Rust source code.", &["rs", "rust", "code.rs"]),
    def(Kind::CodeJava, "Java source code.", &["java", "code.java"]),
    def(Kind::CodeC, "C source/header code.", &["c", "code.c"]),
    def(
        Kind::CodeCpp,
        "C++ source/header code.",
        &["cpp", "cc", "cxx", "hpp", "code.cpp"],
    ),
    def(
        Kind::CodeBash,
        "Shell script code.",
        &["sh", "bash", "zsh", "shell", "code.sh"],
    ),
    def(Kind::CodeSql, "SQL code/query.", &["sql", "code.sql"]),
    def(Kind::CodeYaml, "YAML document/config.", &["yaml", "yml", "code.yaml"]),
    def(Kind::CodeToml, "TOML document/config.", &["toml", "code.toml"]),
    def(Kind::JsonValue, "Generic JSON value.", &["json", "code.json"]),
    def(Kind::JsonObject, "JSON object.", &["json.object", "json_object"]),
    def(Kind::JsonArray, "JSON array.", &["json.array", "json_array"]),
    def(Kind::DataCsv, "CSV tabular data.", &["csv", "data.csv"]),
    def(Kind::DataTable, "Logical tabular data (rows/cols).", &["table", "tabular"]),
    def(
        Kind::ContractOpenApi,
        "OpenAPI contract.",
        &["openapi", "contract.openapi", "api_contract"],
    ),
    def(
        Kind::ContractJsonSchema,
        "JSON Schema contract for API/domain payloads.",
        &["json-schema", "jsonschema", "contract.jsonschema"],
    ),
    def(
        Kind::DbSchema,
        "Database schema/model definition.",
        &["schema", "db.schema", "database.schema"],
    ),
    def(
        Kind::DbMigration,
        "Database migration script/change.",
        &["migration", "db.migration", "database.migration"],
    ),
    def(
        Kind::BackendRoute,
        "Backend route/handler registration layer.",
        &["route", "routes"],
    ),
    def(
        Kind::BackendController,
        "Backend controller layer.",
        &["controller", "controllers"],
    ),
    def(
        Kind::BackendService,
        "Backend service/use-case layer.",
        &["service", "services"],
    ),
    def(
        Kind::BackendRepository,
        "Backend repository/data-access layer.",
        &["repository", "repo"],
    ),
    def(Kind::FrontendPage, "Frontend page/screen entrypoint.", &["page"]),
    def(
        Kind::FrontendComponent,
        "Frontend UI component.",
        &["component", "components"],
    ),
    def(Kind::FrontendForm, "Frontend form component/flow.", &["form"]),
    def(
        Kind::FrontendClientApi,
        "Frontend API client integration layer.",
        &["client-api", "client_api"],
    ),
    def(
        Kind::ArtifactRef,
        "Reference to a stored artifact.",
        &["artifact", "ref", "artifact.ref"],
    ),
    def(Kind::ArtifactBlob, "Opaque binary/blob artifact.", &["blob"]),
    def(Kind::ArtifactSummary, "Summary of artifact content.", &[]),
    def(Kind::ToolResult, "Structured tool execution result.", &["tool_result"]),
    def(Kind::ToolError, "Structured tool execution error.", &["tool_error"]),
    def(
        Kind::CapabilityTools,
        "Tool capability descriptor.",
        &["tools", "toolset"],
    ),
    def(Kind::PlanTask, "Task spec/step description.", &["task"]),
    def(Kind::PlanSummary, "Plan summary.", &["plan"]),
    def(Kind::DiagnosticLint, "Lint diagnostics.", &["lint"]),
    def(Kind::DiagnosticTest, "Test diagnostics/results.", &["test_result"]),
    def(Kind::DiagnosticBuild, "Build/compile diagnostics.", &["build_result"]),
    def(Kind::MemoryFact, "Persisted fact item.", &["fact"]),
    def(Kind::MemoryQuestion, "Open question tracked in memory.", &["question"]),
    def(Kind::MemorySummary, "Persisted summary memory.", &[]),
    def(Kind::MessageUser, "User message payload.", &["msg.user", "user_message"]),
    def(
        Kind::MessageAgent,
        "Agent-to-agent message payload.",
        &["msg.agent", "agent_message"],
    ),
    def(
        Kind::MessageAssistant,
        "Assistant/model message payload.",
        &["assistant_message", "msg.assistant"],
    ),
    def(
        Kind::MessageSystem,
        "System message payload.",
        &["system_message", "msg.system"],
    ),
    def(Kind::MessageTool, "Tool message payload.", &["tool_message", "msg.tool"]),
    def(Kind::SummaryCode, "Compressed summary of code content.", &["code_summary"]),
    def(Kind::SummaryText, "Compressed summary of plain text.", &["text_summary"]),
    def(
        Kind::SummaryApi,
        "Compressed summary of API contract/endpoints.",
        &["api_summary"],
    ),
    def(Kind::TestUnit, "Unit test code or plan.", &["unit_test"]),
    def(
        Kind::TestIntegration,
        "Integration test code or plan.",
        &["integration_test"],
    ),
    def(Kind::TestE2e, "End-to-end test code or plan.", &["e2e_test"]),
    def(
        Kind::ContextCompiled,
        "Compiled context window emitted by the context compiler.",
        &["compiled_context"],
    ),
];

fn alias_table() -> &'static HashMap<String, Kind> {
    static TABLE: OnceLock<HashMap<String, Kind>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::new();
        for d in REGISTRY {
            table.insert(normalize_key(d.kind.as_str()), d.kind);
            for alias in d.aliases {
                table.insert(normalize_key(alias), d.kind);
            }
        }
        table
    })
}

/// Lowercase, trim, and fold `_` / `.` separators to `/`
fn normalize_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['_', '.'], "/")
        .replace(' ', "")
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::PrimitiveString => "primitive/string",
            Kind::PrimitiveInt => "primitive/int",
            Kind::PrimitiveFloat => "primitive/float",
            Kind::PrimitiveNumber => "primitive/number",
            Kind::PrimitiveBool => "primitive/bool",
            Kind::PrimitiveNull => "primitive/null",
            Kind::TextPlain => "text/plain",
            Kind::TextMarkdown => "text/markdown",
            Kind::TextPath => "text/path",
            Kind::TextPrompt => "text/prompt",
            Kind::TextDiff => "text/diff",
            Kind::CodeGo => "code/go",
            Kind::CodeTs => "code/ts",
            Kind::CodeJs => "code/js",
            Kind::CodeTsx => "code/tsx",
            Kind::CodeJsx => "code/jsx",
            Kind::CodePython => "code/python",
            Kind::CodeRust => "code/rust",
            Kind::CodeJava => "code/java",
            Kind::CodeC => "code/c",
            Kind::CodeCpp => "code/cpp",
            Kind::CodeBash => "code/bash",
            Kind::CodeSql => "code/sql",
            Kind::CodeYaml => "code/yaml",
            Kind::CodeToml => "code/toml",
            Kind::JsonValue => "json/value",
            Kind::JsonObject => "json/object",
            Kind::JsonArray => "json/array",
            Kind::DataCsv => "data/csv",
            Kind::DataTable => "data/table",
            Kind::ContractOpenApi => "contract/openapi",
            Kind::ContractJsonSchema => "contract/json-schema",
            Kind::DbSchema => "db/schema",
            Kind::DbMigration => "db/migration",
            Kind::BackendRoute => "backend/route",
            Kind::BackendController => "backend/controller",
            Kind::BackendService => "backend/service",
            Kind::BackendRepository => "backend/repository",
            Kind::FrontendPage => "frontend/page",
            Kind::FrontendComponent => "frontend/component",
            Kind::FrontendForm => "frontend/form",
            Kind::FrontendClientApi => "frontend/client-api",
            Kind::ArtifactRef => "artifact/ref",
            Kind::ArtifactBlob => "artifact/blob",
            Kind::ArtifactSummary => "artifact/summary",
            Kind::ToolResult => "tool/result",
            Kind::ToolError => "tool/error",
            Kind::CapabilityTools => "capability/tools",
            Kind::PlanTask => "plan/task",
            Kind::PlanSummary => "plan/summary",
            Kind::DiagnosticLint => "diagnostic/lint",
            Kind::DiagnosticTest => "diagnostic/test",
            Kind::DiagnosticBuild => "diagnostic/build",
            Kind::MemoryFact => "memory/fact",
            Kind::MemoryQuestion => "memory/question",
            Kind::MemorySummary => "memory/summary",
            Kind::MessageUser => "message/user",
            Kind::MessageAgent => "message/agent",
            Kind::MessageAssistant => "message/assistant",
            Kind::MessageSystem => "message/system",
            Kind::MessageTool => "message/tool",
            Kind::SummaryCode => "summary/code",
            Kind::SummaryText => "summary/text",
            Kind::SummaryApi => "summary/api",
            Kind::TestUnit => "test/unit",
            Kind::TestIntegration => "test/integration",
            Kind::TestE2e => "test/e2e",
            Kind::ContextCompiled => "context/compiled",
        }
    }

    pub fn category(&self) -> Category {
        use Kind::*;
        match self {
            PrimitiveString | PrimitiveInt | PrimitiveFloat | PrimitiveNumber | PrimitiveBool
            | PrimitiveNull => Category::Primitive,
            TextPlain | TextMarkdown | TextPath | TextPrompt | TextDiff => Category::Text,
            CodeGo | CodeTs | CodeJs | CodeTsx | CodeJsx | CodePython | CodeRust | CodeJava
            | CodeC | CodeCpp | CodeBash | CodeSql | CodeYaml | CodeToml => Category::Code,
            JsonValue | JsonObject | JsonArray => Category::Json,
            DataCsv | DataTable => Category::Data,
            ContractOpenApi | ContractJsonSchema => Category::Contract,
            DbSchema | DbMigration => Category::Db,
            BackendRoute | BackendController | BackendService | BackendRepository => {
                Category::Backend
            }
            FrontendPage | FrontendComponent | FrontendForm | FrontendClientApi => {
                Category::Frontend
            }
            ArtifactRef | ArtifactBlob | ArtifactSummary => Category::Artifact,
            ToolResult | ToolError => Category::Tool,
            CapabilityTools => Category::Capability,
            PlanTask | PlanSummary => Category::Plan,
            DiagnosticLint | DiagnosticTest | DiagnosticBuild => Category::Diagnostic,
            MemoryFact | MemoryQuestion | MemorySummary => Category::Memory,
            MessageUser | MessageAgent | MessageAssistant | MessageSystem | MessageTool => {
                Category::Message
            }
            SummaryCode | SummaryText | SummaryApi => Category::Summary,
            TestUnit | TestIntegration | TestE2e => Category::Test,
            ContextCompiled => Category::Context,
        }
    }

    /// Map a free-form kind string (canonical name or alias) onto the registry
    pub fn normalize(raw: &str) -> Option<Kind> {
        let key = normalize_key(raw);
        if key.is_empty() {
            return None;
        }
        alias_table().get(&key).copied()
    }

    pub fn is_known(raw: &str) -> bool {
        Self::normalize(raw).is_some()
    }

    /// Registry definition for this kind
    pub fn definition(&self) -> KindDef {
        REGISTRY
            .iter()
            .find(|d| d.kind == *self)
            .copied()
            .unwrap_or(KindDef {
                kind: *self,
                description: "",
                aliases: &[],
            })
    }

    /// All registered kinds, sorted by canonical name
    pub fn all() -> Vec<KindDef> {
        let mut out: Vec<KindDef> = REGISTRY.to_vec();
        out.sort_by_key(|d| d.kind.as_str());
        out
    }

    /// Kind implied by a file extension; unknown extensions are plain text
    pub fn infer_from_path(path: &str) -> Kind {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "go" => Kind::CodeGo,
            "ts" => Kind::CodeTs,
            "js" => Kind::CodeJs,
            "tsx" => Kind::CodeTsx,
            "jsx" => Kind::CodeJsx,
            "py" => Kind::CodePython,
            "rs" => Kind::CodeRust,
            "java" => Kind::CodeJava,
            "c" | "h" => Kind::CodeC,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" => Kind::CodeCpp,
            "sh" | "bash" | "zsh" => Kind::CodeBash,
            "sql" => Kind::CodeSql,
            "yaml" | "yml" => Kind::CodeYaml,
            "toml" => Kind::CodeToml,
            "json" => Kind::JsonValue,
            "csv" => Kind::DataCsv,
            "md" | "markdown" => Kind::TextMarkdown,
            "diff" | "patch" => Kind::TextDiff,
            _ => Kind::TextPlain,
        }
    }

    /// Text-shaped kinds that an agent can read as a plain message
    pub fn is_message_like(&self) -> bool {
        matches!(
            self,
            Kind::MessageAgent | Kind::TextPlain | Kind::TextMarkdown
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Kind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Kind::normalize(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown type kind {raw:?}")))
    }
}

/// Whether a producer of `have` can feed a consumer that wants `want`
pub fn kinds_compatible(have: Kind, want: Kind) -> bool {
    if have == want {
        return true;
    }
    match (have, want) {
        (Kind::MessageAgent, Kind::TextPlain) | (Kind::TextPlain, Kind::MessageAgent) => true,
        (Kind::ArtifactRef, w) => w.category() == Category::Artifact,
        _ => false,
    }
}

/// A value travelling on a channel: either inline text or a reference to a
/// stored artifact, plus free-form metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    pub kind: Option<Kind>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub inline_text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub bytes: usize,
    #[serde(default)]
    pub tokens_hint: usize,
}

impl TypedValue {
    pub fn inline(kind: Kind, text: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            inline_text: text.into(),
            ..Default::default()
        }
    }

    pub fn reference(kind: Kind, ref_id: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            ref_id: ref_id.into(),
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn is_reference(&self) -> bool {
        !self.ref_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_aliases() {
        assert_eq!(Kind::normalize("md"), Some(Kind::TextMarkdown));
        assert_eq!(Kind::normalize(" Agent_Message "), Some(Kind::MessageAgent));
        assert_eq!(Kind::normalize("CODE.GO"), Some(Kind::CodeGo));
        assert_eq!(Kind::normalize("tool_error"), Some(Kind::ToolError));
        assert_eq!(Kind::normalize("artifact"), Some(Kind::ArtifactRef));
        assert_eq!(Kind::normalize("contract/json-schema"), Some(Kind::ContractJsonSchema));
        assert_eq!(Kind::normalize(""), None);
        assert_eq!(Kind::normalize("bogus/kind"), None);
    }

    #[test]
    fn test_canonical_names_round_trip_through_registry() {
        for d in Kind::all() {
            assert_eq!(Kind::normalize(d.kind.as_str()), Some(d.kind));
            assert_eq!(d.kind.definition().kind, d.kind);
        }
    }

    #[test]
    fn test_categories_are_sorted_and_unique() {
        let cats = Category::all();
        assert_eq!(cats.len(), 19);
        let names: Vec<_> = cats.iter().map(|c| c.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_infer_from_path() {
        assert_eq!(Kind::infer_from_path("src/lib.rs"), Kind::CodeRust);
        assert_eq!(Kind::infer_from_path("README.MD"), Kind::TextMarkdown);
        assert_eq!(Kind::infer_from_path("include/x.h"), Kind::CodeC);
        assert_eq!(Kind::infer_from_path("data.json"), Kind::JsonValue);
        assert_eq!(Kind::infer_from_path("Makefile"), Kind::TextPlain);
        assert_eq!(Kind::infer_from_path("a.unknown"), Kind::TextPlain);
    }

    #[test]
    fn test_kinds_compatible() {
        assert!(kinds_compatible(Kind::CodeGo, Kind::CodeGo));
        assert!(kinds_compatible(Kind::MessageAgent, Kind::TextPlain));
        assert!(kinds_compatible(Kind::TextPlain, Kind::MessageAgent));
        assert!(kinds_compatible(Kind::ArtifactRef, Kind::ArtifactSummary));
        assert!(!kinds_compatible(Kind::ArtifactSummary, Kind::ArtifactRef));
        assert!(!kinds_compatible(Kind::TextMarkdown, Kind::TextPlain));
        assert!(!kinds_compatible(Kind::SummaryCode, Kind::CodeGo));
    }

    #[test]
    fn test_kind_serde_uses_canonical_string() {
        let json = serde_json::to_string(&Kind::SummaryCode).unwrap();
        assert_eq!(json, "\"summary/code\"");
        let back: Kind = serde_json::from_str("\"code_summary\"").unwrap();
        assert_eq!(back, Kind::SummaryCode);
        assert!(serde_json::from_str::<Kind>("\"nope\"").is_err());
    }
}
