use async_trait::async_trait;
use toolsmith_core::{AuditEvent, AuditSink};
use tracing::error;

use crate::infra::audit_logger::AuditLogger;

/// Appends run on the blocking pool; each one ends in an fsync.
#[async_trait]
impl AuditSink for AuditLogger {
    async fn record(&self, event: AuditEvent) {
        let logger = self.clone();
        let (kind, tool) = (event.kind, event.tool.clone());

        match tokio::task::spawn_blocking(move || logger.log(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to write audit event {:?} for {}: {}", kind, tool, e),
            Err(e) => error!("Audit write for {} did not complete: {}", tool, e),
        }
    }
}
