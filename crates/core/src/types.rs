use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use crate::error::CoreError;

/// Wall-clock limit applied to every execution unless policy overrides it.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Arguments passed to a tool, keyed by parameter name.
pub type Arguments = Map<String, Value>;

pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Tool names are identifiers: `[A-Za-z_][A-Za-z0-9_]*`, at most 64 chars.
/// They double as file names in the registry store.
pub fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_TOOL_NAME_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Draft,
    Validated,
    Rejected,
    Tested,
    Registered,
    Deprecated,
}

impl ToolState {
    /// Forward-only transition table.
    ///
    /// `Registered -> Rejected` exists only for quarantining a tool that
    /// tripped a runtime violation.
    pub fn can_transition_to(self, next: ToolState) -> bool {
        use ToolState::*;
        matches!(
            (self, next),
            (Draft, Validated)
                | (Draft, Rejected)
                | (Validated, Tested)
                | (Validated, Rejected)
                | (Tested, Registered)
                | (Registered, Deprecated)
                | (Registered, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ToolState::Rejected | ToolState::Deprecated)
    }
}

impl fmt::Display for ToolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolState::Draft => "draft",
            ToolState::Validated => "validated",
            ToolState::Rejected => "rejected",
            ToolState::Tested => "tested",
            ToolState::Registered => "registered",
            ToolState::Deprecated => "deprecated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    /// Strict type check; integers are numbers but floats are never integers.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }

    pub fn json_schema_name(self) -> Option<&'static str> {
        match self {
            ParamType::String => Some("string"),
            ParamType::Integer => Some("integer"),
            ParamType::Number => Some("number"),
            ParamType::Boolean => Some("boolean"),
            ParamType::Array => Some("array"),
            ParamType::Object => Some("object"),
            ParamType::Any => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_schema_name().unwrap_or("any"))
    }
}

fn default_required() -> bool {
    true
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: None,
        }
    }
}

/// Author-supplied example used to gate promotion past `Validated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfTestCase {
    #[serde(default)]
    pub arguments: Arguments,
    pub expected: Value,
}

impl SelfTestCase {
    pub fn new(arguments: Value, expected: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { arguments, expected }
    }
}

/// Position inside tool source. Line and column are 1-based, the character
/// offset is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Location {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// Resolve a byte index into `source` to a full location.
    pub fn from_byte_index(source: &str, byte_index: usize) -> Self {
        let mut line = 1;
        let mut column = 1;
        let mut offset = 0;
        for (idx, ch) in source.char_indices() {
            if idx >= byte_index {
                break;
            }
            offset += 1;
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub location: Location,
    pub message: String,
}

impl Violation {
    pub fn new(rule_id: impl Into<String>, location: Location, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            location,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}", self.rule_id, self.message, self.location)
    }
}

/// Outcome of one validation attempt. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    accepted: bool,
    violations: Vec<Violation>,
    policy_version: u32,
}

impl ValidationVerdict {
    pub fn from_violations(policy_version: u32, violations: Vec<Violation>) -> Self {
        Self {
            accepted: violations.is_empty(),
            violations,
            policy_version,
        }
    }

    pub fn accepted(&self) -> bool {
        self.accepted
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn policy_version(&self) -> u32 {
        self.policy_version
    }

    pub fn has_rule(&self, rule_id: &str) -> bool {
        self.violations.iter().any(|v| v.rule_id == rule_id)
    }

    pub fn summary(&self) -> String {
        if self.accepted {
            return "accepted".to_string();
        }
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub tool_name: String,
    pub tool_version: u32,
    pub arguments: Arguments,
    pub deadline: Duration,
}

impl ExecutionRequest {
    pub fn new(tool_name: impl Into<String>, tool_version: u32, arguments: Arguments) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_version,
            arguments,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Ok,
    ValidationRejected,
    RuntimeViolation,
    Timeout,
    RaisedError,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Ok => "ok",
            ExecutionStatus::ValidationRejected => "validation_rejected",
            ExecutionStatus::RuntimeViolation => "runtime_violation",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::RaisedError => "raised_error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl Diagnostic {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            violations: Vec::new(),
        }
    }
}

/// Outcome of one execution, owned by whoever issued the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub captured_output: String,
    #[serde(default)]
    pub output_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn ok(value: Value, captured_output: String, output_truncated: bool) -> Self {
        Self {
            status: ExecutionStatus::Ok,
            value: Some(value),
            captured_output,
            output_truncated,
            diagnostic: None,
            elapsed_ms: 0,
        }
    }

    pub fn failure(status: ExecutionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            value: None,
            captured_output: String::new(),
            output_truncated: false,
            diagnostic: Some(Diagnostic::message(message)),
            elapsed_ms: 0,
        }
    }

    pub fn rejected(verdict: &ValidationVerdict) -> Self {
        Self {
            status: ExecutionStatus::ValidationRejected,
            value: None,
            captured_output: String::new(),
            output_truncated: false,
            diagnostic: Some(Diagnostic {
                message: verdict.summary(),
                violations: verdict.violations().to_vec(),
            }),
            elapsed_ms: 0,
        }
    }

    pub fn with_output(mut self, captured_output: String, output_truncated: bool) -> Self {
        self.captured_output = captured_output;
        self.output_truncated = output_truncated;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ExecutionStatus::Ok
    }

    pub fn diagnostic_message(&self) -> Option<&str> {
        self.diagnostic.as_ref().map(|d| d.message.as_str())
    }
}

/// Identity and content of one tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub version: u32,
    pub source: String,
    pub parameter_schema: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ParamType>,
    pub description: String,
    #[serde(default)]
    pub self_tests: Vec<SelfTestCase>,
    pub state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidationVerdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl ToolDefinition {
    pub fn draft(
        name: impl Into<String>,
        version: u32,
        source: impl Into<String>,
        parameter_schema: Vec<ParamSpec>,
        description: impl Into<String>,
        self_tests: Vec<SelfTestCase>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            source: source.into(),
            parameter_schema,
            return_type: None,
            description: description.into(),
            self_tests,
            state: ToolState::Draft,
            verdict: None,
            diagnostic: None,
            created_at: Utc::now(),
            validated_at: None,
            tested_at: None,
            registered_at: None,
            deprecated_at: None,
        }
    }

    pub fn with_return_type(mut self, return_type: ParamType) -> Self {
        self.return_type = Some(return_type);
        self
    }

    /// Move to `next`, stamping the matching timestamp the first time only.
    pub fn transition(mut self, next: ToolState, at: DateTime<Utc>) -> Result<Self, CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                name: self.name,
                version: self.version,
                from: self.state,
                to: next,
            });
        }

        let stamp = match next {
            ToolState::Validated => Some(&mut self.validated_at),
            ToolState::Tested => Some(&mut self.tested_at),
            ToolState::Registered => Some(&mut self.registered_at),
            ToolState::Deprecated => Some(&mut self.deprecated_at),
            ToolState::Draft | ToolState::Rejected => None,
        };
        if let Some(slot) = stamp {
            slot.get_or_insert(at);
        }

        self.state = next;
        Ok(self)
    }

    /// Move to `Rejected`, recording why.
    pub fn reject(self, diagnostic: impl Into<String>, at: DateTime<Utc>) -> Result<Self, CoreError> {
        let mut rejected = self.transition(ToolState::Rejected, at)?;
        rejected.diagnostic = Some(diagnostic.into());
        Ok(rejected)
    }

    /// Function-calling schema in the shape LLM providers expect.
    pub fn function_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameter_schema {
            let mut prop = Map::new();
            if let Some(ty) = param.param_type.json_schema_name() {
                prop.insert("type".into(), Value::String(ty.into()));
            }
            if let Some(desc) = &param.description {
                prop.insert("description".into(), Value::String(desc.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// Every known version of one tool name, with the registered one flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_version: Option<u32>,
}

impl ToolRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
            registered_version: None,
        }
    }

    pub fn latest_version(&self) -> u32 {
        self.versions.iter().map(|d| d.version).max().unwrap_or(0)
    }

    pub fn get(&self, version: u32) -> Option<&ToolDefinition> {
        self.versions.iter().find(|d| d.version == version)
    }

    pub fn registered(&self) -> Option<&ToolDefinition> {
        self.registered_version.and_then(|v| self.get(v))
    }

    /// Replace the stored copy of `definition.version`, or append it.
    pub fn upsert(&mut self, definition: ToolDefinition) {
        match self
            .versions
            .iter_mut()
            .find(|d| d.version == definition.version)
        {
            Some(slot) => *slot = definition,
            None => {
                self.versions.push(definition);
                self.versions.sort_by_key(|d| d.version);
            }
        }
    }

    /// Repair a record read back from storage so that at most one version is
    /// `Registered`, and only the one `registered_version` points at.
    pub fn normalize(&mut self) {
        if let Some(v) = self.registered_version {
            let valid = self
                .get(v)
                .map(|d| d.state == ToolState::Registered)
                .unwrap_or(false);
            if !valid {
                self.registered_version = None;
            }
        }

        let keep = self.registered_version;
        for def in &mut self.versions {
            if def.state == ToolState::Registered && Some(def.version) != keep {
                def.state = ToolState::Deprecated;
                if def.deprecated_at.is_none() {
                    def.deprecated_at = def.registered_at;
                }
            }
        }
        self.versions.sort_by_key(|d| d.version);
    }
}
