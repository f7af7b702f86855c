use anyhow::Result;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use toolsmith_infra::{AuditLogger, AuditLoggerError};

use super::{print_json, Outcome};

/// Re-verify the audit trail's hash chain.
pub fn run<W: Write>(log_path: &Path, out: &mut W) -> Result<Outcome> {
    match AuditLogger::new(log_path).and_then(|logger| logger.verify_integrity()) {
        Ok(entries) => {
            print_json(out, &json!({"entries": entries, "intact": true}))?;
            Ok(Outcome::Success)
        }
        Err(AuditLoggerError::IntegrityViolation(reason)) => {
            print_json(out, &json!({"intact": false, "reason": reason}))?;
            Ok(Outcome::Failure)
        }
        Err(e) => Err(e.into()),
    }
}
