use serde_json::json;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;
use toolsmith_core::{AuditEvent, AuditKind, AuditSink};
use toolsmith_infra::{AuditLogger, AuditLoggerError};

fn event(tool: &str, version: u32) -> AuditEvent {
    AuditEvent::new(AuditKind::Registered, tool, version, json!({"note": "test"}))
}

#[test]
fn test_valid_chain_verification() {
    let dir = tempdir().unwrap();
    let logger = AuditLogger::new(dir.path().join("audit.log")).unwrap();

    for i in 0..5 {
        logger.log(&event(&format!("tool_{}", i), 1)).unwrap();
    }

    assert_eq!(logger.verify_integrity().unwrap(), 5);
    let events = logger.events().unwrap();
    assert_eq!(events.len(), 5);
    assert_eq!(events[2].tool, "tool_2");
}

#[test]
fn test_tampered_entry_detection() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("audit.log");
    let logger = AuditLogger::new(&log_path).unwrap();

    for i in 0..3 {
        logger.log(&event(&format!("tool_{}", i), 1)).unwrap();
    }

    let content = std::fs::read_to_string(&log_path).unwrap();
    std::fs::write(&log_path, content.replace("tool_1", "tool_X")).unwrap();

    let result = logger.verify_integrity();
    assert!(matches!(result, Err(AuditLoggerError::IntegrityViolation(_))));
}

#[test]
fn test_deleted_entry_detection() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("audit.log");
    let logger = AuditLogger::new(&log_path).unwrap();

    for i in 0..3 {
        logger.log(&event(&format!("tool_{}", i), 1)).unwrap();
    }

    let content = std::fs::read_to_string(&log_path).unwrap();
    let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
    std::fs::write(&log_path, kept.join("\n") + "\n").unwrap();

    assert!(matches!(
        logger.verify_integrity(),
        Err(AuditLoggerError::IntegrityViolation(_))
    ));
}

#[test]
fn test_chain_continues_after_reopen() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("audit.log");

    {
        let logger = AuditLogger::new(&log_path).unwrap();
        logger.log(&event("add", 1)).unwrap();
    }

    let logger = AuditLogger::new(&log_path).unwrap();
    logger.log(&event("add", 2)).unwrap();
    assert_eq!(logger.verify_integrity().unwrap(), 2);
}

#[test]
fn test_reopen_refuses_broken_chain() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("audit.log");
    {
        let logger = AuditLogger::new(&log_path).unwrap();
        logger.log(&event("add", 1)).unwrap();
    }
    std::fs::write(&log_path, "not json\n").unwrap();

    assert!(matches!(
        AuditLogger::new(&log_path),
        Err(AuditLoggerError::IntegrityViolation(_))
    ));
}

#[test]
fn test_concurrent_logging_keeps_chain() {
    let dir = tempdir().unwrap();
    let logger = Arc::new(AuditLogger::new(dir.path().join("audit.log")).unwrap());

    let mut handles = vec![];
    for i in 0..4 {
        let logger = Arc::clone(&logger);
        handles.push(thread::spawn(move || {
            for v in 0..10 {
                logger.log(&event(&format!("tool_{}", i), v)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(logger.verify_integrity().unwrap(), 40);
}

#[tokio::test]
async fn test_sink_adapter_records() {
    let dir = tempdir().unwrap();
    let logger = AuditLogger::new(dir.path().join("nested").join("audit.log")).unwrap();

    logger
        .record(AuditEvent::new(AuditKind::SecurityViolation, "repeat", 1, json!({"reason": "size"})))
        .await;

    let events = logger.events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditKind::SecurityViolation);
    assert_eq!(events[0].detail["reason"], "size");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sink_writes_from_many_tasks() {
    let dir = tempdir().unwrap();
    let logger = Arc::new(AuditLogger::new(dir.path().join("audit.log")).unwrap());

    let mut handles = vec![];
    for v in 0..16 {
        let logger = Arc::clone(&logger);
        handles.push(tokio::spawn(async move {
            logger.record(event("sum", v)).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(logger.verify_integrity().unwrap(), 16);
}

#[test]
fn test_clones_share_one_chain() {
    let dir = tempdir().unwrap();
    let logger = AuditLogger::new(dir.path().join("audit.log")).unwrap();
    let clone = logger.clone();

    logger.log(&event("a", 1)).unwrap();
    clone.log(&event("b", 1)).unwrap();
    logger.log(&event("c", 1)).unwrap();

    assert_eq!(clone.verify_integrity().unwrap(), 3);
    let tools: Vec<String> = logger.events().unwrap().into_iter().map(|e| e.tool).collect();
    assert_eq!(tools, vec!["a", "b", "c"]);
}
