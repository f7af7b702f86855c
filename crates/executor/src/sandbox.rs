use std::sync::Arc;
use std::time::{Duration, Instant};
use toolsmith_core::{
    Arguments, Diagnostic, ExecutionResult, ExecutionStatus, ParamSpec, ParamType, ToolDefinition,
    ValidationVerdict,
};
use toolsmith_policy::ValidatorPolicy;
use toolsmith_validator::Validator;
use tracing::{debug, info, warn};

use crate::backend::{IsolationBackend, ProcessBackend, ThreadBackend};
use crate::config::{ExecutorConfig, Isolation};
use crate::error::ExecutorError;
use crate::protocol::WorkerRequest;
use crate::sanitize::sanitize;
use crate::schema;

/// Declared shape a call is checked against.
struct Contract<'a> {
    parameters: &'a [ParamSpec],
    returns: Option<ParamType>,
}

/// Runs tool source in an isolated unit under a hard deadline.
///
/// Every call re-validates its source first; callers are not trusted to have
/// done so.
pub struct SandboxExecutor {
    config: ExecutorConfig,
    validator: Validator,
    backend: Arc<dyn IsolationBackend>,
}

impl SandboxExecutor {
    pub fn new(policy: Arc<ValidatorPolicy>, config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let backend: Arc<dyn IsolationBackend> = match &config.isolation {
            Isolation::Process { program, args } => Arc::new(ProcessBackend::new(
                program.clone(),
                args.clone(),
                config.memory_limit_bytes,
                config.kill_grace,
            )),
            Isolation::Thread => {
                warn!("Thread isolation does not bound memory; use it for trusted sources only");
                Arc::new(ThreadBackend)
            }
        };
        Self::with_backend(policy, config, backend)
    }

    pub fn with_backend(
        policy: Arc<ValidatorPolicy>,
        config: ExecutorConfig,
        backend: Arc<dyn IsolationBackend>,
    ) -> Result<Self, ExecutorError> {
        let validator = Validator::new(policy)?;
        info!(
            "Sandbox executor ready (isolation: {}, deadline: {}ms)",
            backend.name(),
            config.default_deadline.as_millis()
        );
        Ok(Self {
            config,
            validator,
            backend,
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn policy(&self) -> &Arc<ValidatorPolicy> {
        self.validator.policy()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run `function_name` from `source` with `arguments`.
    pub async fn execute(
        &self,
        source: &str,
        function_name: &str,
        arguments: &Arguments,
        deadline: Duration,
    ) -> Result<ExecutionResult, ExecutorError> {
        let started = Instant::now();
        let verdict = self.validator.validate(source);
        self.run(started, &verdict, source, function_name, arguments, deadline, None)
            .await
    }

    /// Run a stored definition, checking arguments and return value against
    /// its declared schema.
    pub async fn execute_tool(
        &self,
        definition: &ToolDefinition,
        arguments: &Arguments,
        deadline: Duration,
    ) -> Result<ExecutionResult, ExecutorError> {
        let started = Instant::now();
        let verdict = self.validator.validate_tool(
            &definition.source,
            &definition.name,
            &definition.parameter_schema,
        );
        let contract = Contract {
            parameters: &definition.parameter_schema,
            returns: definition.return_type,
        };
        self.run(
            started,
            &verdict,
            &definition.source,
            &definition.name,
            arguments,
            deadline,
            Some(contract),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        started: Instant,
        verdict: &ValidationVerdict,
        source: &str,
        entry_point: &str,
        arguments: &Arguments,
        deadline: Duration,
        contract: Option<Contract<'_>>,
    ) -> Result<ExecutionResult, ExecutorError> {
        if !verdict.accepted() {
            debug!(
                "Refusing to execute {}: {} violation(s)",
                entry_point,
                verdict.violations().len()
            );
            return Ok(ExecutionResult::rejected(verdict).with_elapsed(started.elapsed()));
        }

        if let Some(contract) = &contract {
            if let Err(message) = schema::check_arguments(contract.parameters, arguments) {
                return Ok(ExecutionResult::failure(ExecutionStatus::RaisedError, message)
                    .with_elapsed(started.elapsed()));
            }
        }

        let request = WorkerRequest {
            source: source.to_string(),
            entry_point: entry_point.to_string(),
            arguments: arguments.clone(),
            policy: self.policy().as_ref().clone(),
            output_cap: self.config.output_cap,
            max_call_depth: self.config.max_call_depth,
        };
        let mut result = self.backend.run(request, deadline).await?.into_result();

        if let (Some(contract), Some(value)) = (&contract, &result.value) {
            if let Err(message) = schema::check_return(contract.returns, value) {
                result = ExecutionResult::failure(ExecutionStatus::RaisedError, message)
                    .with_output(result.captured_output, result.output_truncated);
            }
        }

        if let Some(diagnostic) = result.diagnostic.take() {
            result.diagnostic = Some(Diagnostic {
                message: sanitize(&diagnostic.message),
                violations: diagnostic.violations,
            });
        }

        let result = result.with_elapsed(started.elapsed());
        debug!(
            "Executed {} via {}: {} in {}ms",
            entry_point,
            self.backend.name(),
            result.status,
            result.elapsed_ms
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(Arc::new(ValidatorPolicy::default()), ExecutorConfig::thread())
            .unwrap()
    }

    fn args(value: serde_json::Value) -> Arguments {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    #[tokio::test]
    async fn test_rejected_source_never_runs() {
        let src = "def f():\n    print('ran')\n    return open('/etc/passwd', 'w')\n";
        let result = executor()
            .execute(src, "f", &Arguments::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::ValidationRejected);
        assert!(result.captured_output.is_empty());
        let diagnostic = result.diagnostic.unwrap();
        assert!(diagnostic.violations.iter().any(|v| v.rule_id == "file_io"));
    }

    #[tokio::test]
    async fn test_schema_is_enforced() {
        let def = ToolDefinition::draft(
            "half",
            1,
            "def half(n):\n    return n / 2\n",
            vec![ParamSpec::required("n", ParamType::Integer)],
            "halves",
            vec![],
        )
        .with_return_type(ParamType::Integer);
        let exec = executor();
        let deadline = Duration::from_secs(1);

        let result = exec.execute_tool(&def, &args(json!({"n": "4"})), deadline).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::RaisedError);

        // 4 / 2 is a float, not an integer
        let result = exec.execute_tool(&def, &args(json!({"n": 4})), deadline).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::RaisedError);
        assert!(result.diagnostic_message().unwrap().contains("return value"));
    }

    #[tokio::test]
    async fn test_elapsed_is_reported() {
        let result = executor()
            .execute("def f():\n    return 1\n", "f", &Arguments::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.is_ok());
        assert!(result.elapsed_ms < 1000);
    }
}
