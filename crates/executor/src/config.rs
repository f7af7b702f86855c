use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use toolsmith_core::DEFAULT_DEADLINE;
use toolsmith_script::MAX_CALL_DEPTH;

pub const DEFAULT_OUTPUT_CAP: usize = 4096;
pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);
/// Worker binary built from this crate.
pub const WORKER_BINARY: &str = "toolsmith-worker";

/// Where a tool runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Isolation {
    /// A fresh rlimit-restricted worker process per execution.
    Process {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// A dedicated OS thread inside this process. Memory is not bounded and a
    /// timed-out run keeps its thread until it next checks the interrupt
    /// flag, so this is for trusted sources and tests only.
    Thread,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub isolation: Isolation,
    #[serde(rename = "deadline_ms", with = "millis")]
    pub default_deadline: Duration,
    pub output_cap: usize,
    pub memory_limit_bytes: u64,
    #[serde(rename = "kill_grace_ms", with = "millis")]
    pub kill_grace: Duration,
    pub max_call_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::Process {
                program: PathBuf::from(WORKER_BINARY),
                args: Vec::new(),
            },
            default_deadline: DEFAULT_DEADLINE,
            output_cap: DEFAULT_OUTPUT_CAP,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT,
            kill_grace: DEFAULT_KILL_GRACE,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

impl ExecutorConfig {
    pub fn process(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            isolation: Isolation::Process {
                program: program.into(),
                args,
            },
            ..Self::default()
        }
    }

    /// In-process isolation; see [`Isolation::Thread`] for what it does not
    /// contain.
    pub fn thread() -> Self {
        Self {
            isolation: Isolation::Thread,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.default_deadline, Duration::from_secs(5));
        assert_eq!(config.output_cap, 4096);
        assert_eq!(
            config.isolation,
            Isolation::Process {
                program: PathBuf::from("toolsmith-worker"),
                args: vec![],
            }
        );
        assert_eq!(ExecutorConfig::thread().isolation, Isolation::Thread);
        assert_eq!(ExecutorConfig::thread().memory_limit_bytes, config.memory_limit_bytes);
    }

    #[test]
    fn test_json_shape() {
        let config = ExecutorConfig::process("/usr/bin/toolsmith-worker", vec![]);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["deadline_ms"], 5000);
        assert_eq!(value["isolation"]["kind"], "process");

        let back: ExecutorConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }
}
