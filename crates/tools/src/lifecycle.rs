use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use toolsmith_core::{
    is_valid_tool_name, Arguments, AuditEvent, AuditKind, AuditSink, CoreError, ExecutionRequest,
    ExecutionResult, ExecutionStatus, ParamSpec, ParamType, SelfTestCase, ToolDefinition,
    ToolRecord, ToolState,
};
use toolsmith_executor::SandboxExecutor;
use tracing::{error, info, warn};

use crate::error::LifecycleError;
use crate::metrics;
use crate::registry::ToolRegistry;
use crate::traits::NameLocks;

/// Everything an author supplies for a new tool version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: String,
    #[serde(default, rename = "parameters")]
    pub parameter_schema: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ParamType>,
    #[serde(default)]
    pub self_tests: Vec<SelfTestCase>,
}

/// Drives tool versions through `Draft -> Validated -> Tested -> Registered`
/// and serves invocations of registered tools.
pub struct LifecycleManager {
    registry: Arc<ToolRegistry>,
    executor: Arc<SandboxExecutor>,
    locks: Arc<dyn NameLocks>,
    audit: Arc<dyn AuditSink>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executor: Arc<SandboxExecutor>,
        locks: Arc<dyn NameLocks>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            executor,
            locks,
            audit,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<SandboxExecutor> {
        &self.executor
    }

    /// Record a new `Draft` under the next free version for its name.
    pub async fn submit_draft(&self, draft: ToolDraft) -> Result<ToolDefinition, LifecycleError> {
        if !is_valid_tool_name(&draft.name) {
            return Err(LifecycleError::InvalidName(draft.name));
        }
        let _guard = self.locks.acquire(&draft.name).await?;

        let mut record = self.current_record(&draft.name);
        let version = record.latest_version() + 1;
        let mut definition = ToolDefinition::draft(
            draft.name,
            version,
            draft.source,
            draft.parameter_schema,
            draft.description,
            draft.self_tests,
        );
        definition.return_type = draft.return_type;

        record.upsert(definition.clone());
        self.registry.commit(record).await?;

        info!("Draft submitted: {} v{}", definition.name, version);
        self.audit(AuditKind::Submitted, &definition, json!({})).await;
        Ok(definition)
    }

    /// Run `definition` through every remaining transition, stopping at the
    /// first rejection.
    pub async fn advance(&self, definition: &ToolDefinition) -> Result<ToolDefinition, LifecycleError> {
        let (name, version) = (definition.name.as_str(), definition.version);
        let mut current = self.load(name, version)?;
        loop {
            current = match current.state {
                ToolState::Draft => self.validate(name, version).await?,
                ToolState::Validated => self.self_test(name, version).await?,
                ToolState::Tested => self.register(name, version).await?,
                ToolState::Registered | ToolState::Rejected | ToolState::Deprecated => {
                    return Ok(current)
                }
            };
        }
    }

    /// `Draft -> Validated | Rejected`.
    pub async fn validate(&self, name: &str, version: u32) -> Result<ToolDefinition, LifecycleError> {
        let _guard = self.locks.acquire(name).await?;
        let definition = self.load(name, version)?;
        expect_state(&definition, ToolState::Draft, ToolState::Validated)?;

        let verdict = self.executor.validator().validate_tool(
            &definition.source,
            &definition.name,
            &definition.parameter_schema,
        );
        let now = Utc::now();
        let accepted = verdict.accepted();
        let summary = verdict.summary();

        let mut next = if accepted {
            definition.transition(ToolState::Validated, now)?
        } else {
            definition.reject(format!("validation rejected: {summary}"), now)?
        };
        next.verdict = Some(verdict);
        self.save(next.clone()).await?;

        if accepted {
            info!("Validated {} v{}", name, version);
            self.audit(AuditKind::Validated, &next, json!({})).await;
        } else {
            info!("Rejected {} v{} at validation: {}", name, version, summary);
            self.audit(
                AuditKind::Rejected,
                &next,
                json!({"stage": "validate", "violations": next.verdict.as_ref().map(|v| v.violations())}),
            )
            .await;
        }
        Ok(next)
    }

    /// `Validated -> Tested | Rejected`. All cases must pass.
    pub async fn self_test(&self, name: &str, version: u32) -> Result<ToolDefinition, LifecycleError> {
        let snapshot = {
            let _guard = self.locks.acquire(name).await?;
            let definition = self.load(name, version)?;
            expect_state(&definition, ToolState::Validated, ToolState::Tested)?;
            definition
        };

        let failure = self.run_self_tests(&snapshot).await?;

        let _guard = self.locks.acquire(name).await?;
        let definition = self.load(name, version)?;
        expect_state(&definition, ToolState::Validated, ToolState::Tested)?;

        let now = Utc::now();
        let next = match &failure {
            None => definition.transition(ToolState::Tested, now)?,
            Some((diagnostic, _)) => definition.reject(diagnostic.clone(), now)?,
        };
        self.save(next.clone()).await?;

        match failure {
            None => {
                info!("Self-test passed: {} v{}", name, version);
                self.audit(AuditKind::Tested, &next, json!({"cases": next.self_tests.len()}))
                    .await;
            }
            Some((diagnostic, status)) => {
                info!("Rejected {} v{} at self-test: {}", name, version, diagnostic);
                if status == Some(ExecutionStatus::RuntimeViolation) {
                    self.security_event(&next, &diagnostic).await;
                }
                self.audit(
                    AuditKind::Rejected,
                    &next,
                    json!({"stage": "self_test", "diagnostic": diagnostic}),
                )
                .await;
            }
        }
        Ok(next)
    }

    /// `Tested -> Registered`, deprecating the previously registered version
    /// in the same store write.
    pub async fn register(&self, name: &str, version: u32) -> Result<ToolDefinition, LifecycleError> {
        let _guard = self.locks.acquire(name).await?;
        let mut record = self.current_record(name);
        let definition = record
            .get(version)
            .cloned()
            .ok_or_else(|| not_found(name, version))?;
        expect_state(&definition, ToolState::Tested, ToolState::Registered)?;

        let prior = record.registered().cloned();
        if let Some(prior) = &prior {
            if prior.version > version {
                return Err(LifecycleError::Superseded {
                    name: name.to_string(),
                    version,
                    registered: prior.version,
                });
            }
        }

        let now = Utc::now();
        let deprecated = match prior {
            Some(prior) => Some(prior.transition(ToolState::Deprecated, now)?),
            None => None,
        };
        let registered = definition.transition(ToolState::Registered, now)?;

        if let Some(old) = &deprecated {
            record.upsert(old.clone());
        }
        record.upsert(registered.clone());
        record.registered_version = Some(version);
        self.registry.commit(record).await?;

        metrics::increment_registration();
        info!("Registered {} v{}", name, version);
        if let Some(old) = &deprecated {
            info!("Deprecated {} v{}", name, old.version);
            self.audit(AuditKind::Deprecated, old, json!({"replaced_by": version}))
                .await;
        }
        self.audit(AuditKind::Registered, &registered, json!({})).await;
        Ok(registered)
    }

    /// Run the registered version of `name` with the default deadline.
    pub async fn invoke(&self, name: &str, arguments: Arguments) -> Result<ExecutionResult, LifecycleError> {
        let definition = self
            .registry
            .registered(name)
            .ok_or_else(|| LifecycleError::ToolNotFound(name.to_string()))?;
        let request = ExecutionRequest::new(name, definition.version, arguments)
            .with_deadline(self.executor.config().default_deadline);
        self.dispatch(definition, request).await
    }

    /// Run a request pinned to a version; it must still be the registered one.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, LifecycleError> {
        let definition = self
            .registry
            .registered(&request.tool_name)
            .filter(|d| d.version == request.tool_version)
            .ok_or_else(|| {
                LifecycleError::ToolNotFound(format!("{} v{}", request.tool_name, request.tool_version))
            })?;
        self.dispatch(definition, request).await
    }

    async fn dispatch(
        &self,
        definition: ToolDefinition,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, LifecycleError> {
        let result = self
            .executor
            .execute_tool(&definition, &request.arguments, request.deadline)
            .await?;
        metrics::record_execution(result.status, result.elapsed_ms);

        if result.status == ExecutionStatus::RuntimeViolation {
            let reason = result.diagnostic_message().unwrap_or("runtime violation").to_string();
            if let Err(e) = self.quarantine(&definition, &reason).await {
                error!("Failed to quarantine {} v{}: {}", definition.name, definition.version, e);
            }
        }

        self.audit(
            AuditKind::Invoked,
            &definition,
            json!({"status": result.status, "elapsed_ms": result.elapsed_ms}),
        )
        .await;
        Ok(result)
    }

    /// Pull a version that tripped a runtime violation out of service.
    async fn quarantine(&self, definition: &ToolDefinition, reason: &str) -> Result<(), LifecycleError> {
        let _guard = self.locks.acquire(&definition.name).await?;
        let mut record = self.current_record(&definition.name);
        let Some(current) = record.get(definition.version).cloned() else {
            return Err(not_found(&definition.name, definition.version));
        };

        if !current.state.is_terminal() {
            let rejected = current.reject(format!("quarantined: {reason}"), Utc::now())?;
            if record.registered_version == Some(definition.version) {
                record.registered_version = None;
            }
            record.upsert(rejected.clone());
            self.registry.commit(record).await?;
            self.security_event(&rejected, reason).await;
        }
        Ok(())
    }

    async fn security_event(&self, definition: &ToolDefinition, reason: &str) {
        warn!(
            target: "security",
            tool = %definition.name,
            version = definition.version,
            "Runtime violation, tool quarantined: {}",
            reason
        );
        metrics::increment_security_violation();
        self.audit(AuditKind::SecurityViolation, definition, json!({"reason": reason}))
            .await;
    }

    /// First failing case as (diagnostic, status of the run if it ran).
    async fn run_self_tests(
        &self,
        definition: &ToolDefinition,
    ) -> Result<Option<(String, Option<ExecutionStatus>)>, LifecycleError> {
        if definition.self_tests.is_empty() {
            return Ok(Some(("self-test failed: no cases supplied".to_string(), None)));
        }

        let deadline = self.executor.config().default_deadline;
        for (index, case) in definition.self_tests.iter().enumerate() {
            let result = self
                .executor
                .execute_tool(definition, &case.arguments, deadline)
                .await?;
            metrics::record_execution(result.status, result.elapsed_ms);

            let args = Value::Object(case.arguments.clone());
            if !result.is_ok() {
                let diagnostic = format!(
                    "self-test case {} {} failed with {}: {}",
                    index + 1,
                    args,
                    result.status,
                    result.diagnostic_message().unwrap_or("no diagnostic")
                );
                return Ok(Some((diagnostic, Some(result.status))));
            }

            let actual = result.value.unwrap_or(Value::Null);
            if !values_match(&actual, &case.expected) {
                let diagnostic = format!(
                    "self-test case {} {} expected {} but got {}",
                    index + 1,
                    args,
                    case.expected,
                    actual
                );
                return Ok(Some((diagnostic, Some(ExecutionStatus::Ok))));
            }
        }
        Ok(None)
    }

    fn current_record(&self, name: &str) -> ToolRecord {
        self.registry
            .record(name)
            .map(|r| r.as_ref().clone())
            .unwrap_or_else(|| ToolRecord::new(name))
    }

    fn load(&self, name: &str, version: u32) -> Result<ToolDefinition, LifecycleError> {
        self.registry
            .get(name, version)
            .ok_or_else(|| not_found(name, version))
    }

    async fn save(&self, definition: ToolDefinition) -> Result<(), LifecycleError> {
        let mut record = self.current_record(&definition.name);
        record.upsert(definition);
        self.registry.commit(record).await?;
        Ok(())
    }

    async fn audit(&self, kind: AuditKind, definition: &ToolDefinition, detail: Value) {
        self.audit
            .record(AuditEvent::new(kind, &definition.name, definition.version, detail))
            .await;
    }
}

fn not_found(name: &str, version: u32) -> LifecycleError {
    LifecycleError::VersionNotFound {
        name: name.to_string(),
        version,
    }
}

fn expect_state(definition: &ToolDefinition, required: ToolState, to: ToolState) -> Result<(), CoreError> {
    if definition.state == required {
        return Ok(());
    }
    Err(CoreError::InvalidTransition {
        name: definition.name.clone(),
        version: definition.version,
        from: definition.state,
        to,
    })
}

/// Structural equality where integers and floats compare by value, so an
/// expected `3` accepts a returned `3.0`.
pub fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map(|w| values_match(v, w)).unwrap_or(false))
        }
        _ => actual == expected,
    }
}
