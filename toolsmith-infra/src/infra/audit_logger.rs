use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use toolsmith_core::AuditEvent;

const GENESIS: &str = "genesis";

#[derive(Error, Debug)]
pub enum AuditLoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Chain integrity violation: {0}")]
    IntegrityViolation(String),
}

#[derive(Serialize, Deserialize, Clone)]
struct ChainedAuditEvent {
    entry_hash: String,
    prev_hash: String,
    #[serde(flatten)]
    event: AuditEvent,
}

/// Append-only JSONL audit trail. Each line carries the hash of the one
/// before it, so edits and deletions are detectable. Clones append to the
/// same chain.
#[derive(Clone)]
pub struct AuditLogger {
    log_path: PathBuf,
    file: Arc<Mutex<File>>,
    last_hash: Arc<Mutex<String>>,
}

impl AuditLogger {
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self, AuditLoggerError> {
        let log_path = log_path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let last_hash = Self::verify_and_get_last_hash(&log_path)?;

        Ok(Self {
            log_path,
            file: Arc::new(Mutex::new(file)),
            last_hash: Arc::new(Mutex::new(last_hash)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    pub fn log(&self, event: &AuditEvent) -> Result<(), AuditLoggerError> {
        let mut last_hash = self.last_hash.lock();
        let entry_hash = chain_hash(&last_hash, event)?;

        let chained = ChainedAuditEvent {
            entry_hash: entry_hash.clone(),
            prev_hash: last_hash.clone(),
            event: event.clone(),
        };

        let json = serde_json::to_string(&chained)?;
        let mut file = self.file.lock();
        writeln!(file, "{}", json)?;
        file.sync_all()?;

        *last_hash = entry_hash;
        Ok(())
    }

    /// Re-walk the chain from the start of the file.
    pub fn verify_integrity(&self) -> Result<usize, AuditLoggerError> {
        let _appending = self.last_hash.lock();
        Self::read_chain(&self.log_path).map(|(count, _)| count)
    }

    /// Every event in the log, oldest first, after checking the chain.
    pub fn events(&self) -> Result<Vec<AuditEvent>, AuditLoggerError> {
        let _appending = self.last_hash.lock();
        let file = File::open(&self.log_path)?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chained: ChainedAuditEvent = serde_json::from_str(&line)?;
            events.push(chained.event);
        }
        Self::read_chain(&self.log_path)?;
        Ok(events)
    }

    fn verify_and_get_last_hash(log_path: &Path) -> Result<String, AuditLoggerError> {
        if !log_path.exists() {
            return Ok(GENESIS.to_string());
        }
        Self::read_chain(log_path).map(|(_, last)| last)
    }

    fn read_chain(log_path: &Path) -> Result<(usize, String), AuditLoggerError> {
        let reader = BufReader::new(File::open(log_path)?);

        let mut prev_hash = GENESIS.to_string();
        let mut count = 0;

        for (index, line) in reader.lines().enumerate() {
            let line_num = index + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let chained: ChainedAuditEvent = serde_json::from_str(&line).map_err(|e| {
                AuditLoggerError::IntegrityViolation(format!("Line {}: Invalid JSON: {}", line_num, e))
            })?;

            if chained.prev_hash != prev_hash {
                return Err(AuditLoggerError::IntegrityViolation(format!(
                    "Line {}: Hash chain broken. Expected prev_hash '{}', got '{}'",
                    line_num, prev_hash, chained.prev_hash
                )));
            }

            let computed = chain_hash(&prev_hash, &chained.event)?;
            if computed != chained.entry_hash {
                return Err(AuditLoggerError::IntegrityViolation(format!(
                    "Line {}: Hash mismatch. Expected '{}', got '{}'",
                    line_num, computed, chained.entry_hash
                )));
            }

            prev_hash = chained.entry_hash;
            count += 1;
        }

        Ok((count, prev_hash))
    }
}

fn chain_hash(prev_hash: &str, event: &AuditEvent) -> Result<String, AuditLoggerError> {
    let event_json = serde_json::to_string(event)?;
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(event_json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
