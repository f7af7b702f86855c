//! Metrics instrumentation for tool execution and registration.

use toolsmith_core::ExecutionStatus;

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Ok => "ok",
        ExecutionStatus::ValidationRejected => "validation_rejected",
        ExecutionStatus::RuntimeViolation => "runtime_violation",
        ExecutionStatus::Timeout => "timeout",
        ExecutionStatus::RaisedError => "raised_error",
    }
}

/// Record one finished execution.
pub fn record_execution(status: ExecutionStatus, elapsed_ms: u64) {
    metrics::histogram!("tool_execution_latency", elapsed_ms as f64);
    metrics::counter!("tool_execution_total", 1, "status" => status_label(status));
}

pub fn increment_security_violation() {
    metrics::counter!("tool_security_violation_total", 1);
}

pub fn increment_registration() {
    metrics::counter!("tool_registration_total", 1);
}
