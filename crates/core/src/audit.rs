use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Submitted,
    Validated,
    Rejected,
    Tested,
    Registered,
    Deprecated,
    Invoked,
    SecurityViolation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub kind: AuditKind,
    pub tool: String,
    pub version: u32,
    #[serde(default)]
    pub detail: Value,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, tool: impl Into<String>, version: u32, detail: Value) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
            tool: tool.into(),
            version,
            detail,
        }
    }
}

/// Audit sink. Recording must never fail the operation being audited.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Sink that drops everything.
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _event: AuditEvent) {}
}
