use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use toolsmith_executor::ExecutorConfig;

pub const CONFIG_ENV: &str = "TOOLSMITH_CONFIG";
pub const REGISTRY_DIR_ENV: &str = "TOOLSMITH_REGISTRY_DIR";
pub const DEADLINE_ENV: &str = "TOOLSMITH_DEADLINE_MS";
pub const DEFAULT_CONFIG_PATH: &str = "./toolsmith.toml";

/// Subcommand the process backend re-executes this binary with.
pub const WORKER_COMMAND: &str = "worker";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry_dir: PathBuf,
    pub audit_log: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
    pub lock_timeout_ms: u64,
    pub executor: ExecutorSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationKind {
    Process,
    Thread,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub isolation: IsolationKind,
    pub deadline_ms: u64,
    pub output_cap: usize,
    pub memory_limit_mb: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_dir: PathBuf::from("./data/registry"),
            audit_log: PathBuf::from("./data/audit.log"),
            policy_file: None,
            lock_timeout_ms: 5000,
            executor: ExecutorSection::default(),
        }
    }
}

impl Default for ExecutorSection {
    fn default() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            isolation: IsolationKind::Process,
            deadline_ms: defaults.default_deadline.as_millis() as u64,
            output_cap: defaults.output_cap,
            memory_limit_mb: defaults.memory_limit_bytes / (1024 * 1024),
        }
    }
}

impl Config {
    /// Read the file named by `TOOLSMITH_CONFIG` (or `./toolsmith.toml`),
    /// falling back to defaults when it does not exist, then apply env
    /// overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(REGISTRY_DIR_ENV) {
            self.registry_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(DEADLINE_ENV) {
            self.executor.deadline_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("{DEADLINE_ENV} must be a number of milliseconds, got {ms:?}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.deadline_ms == 0 {
            anyhow::bail!("executor.deadline_ms must be positive");
        }
        if self.executor.output_cap == 0 {
            anyhow::bail!("executor.output_cap must be positive");
        }
        if self.executor.memory_limit_mb == 0 {
            anyhow::bail!("executor.memory_limit_mb must be positive");
        }
        if self.lock_timeout_ms == 0 {
            anyhow::bail!("lock_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Executor settings; process isolation re-executes the running binary.
    pub fn executor_config(&self) -> Result<ExecutorConfig> {
        let base = match self.executor.isolation {
            IsolationKind::Process => {
                let program = std::env::current_exe().context("Failed to locate the toolsmith binary")?;
                ExecutorConfig::process(program, vec![WORKER_COMMAND.to_string()])
            }
            IsolationKind::Thread => ExecutorConfig::thread(),
        };
        Ok(ExecutorConfig {
            default_deadline: Duration::from_millis(self.executor.deadline_ms),
            output_cap: self.executor.output_cap,
            memory_limit_bytes: self.executor.memory_limit_mb * 1024 * 1024,
            ..base
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolsmith_executor::Isolation;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse("registry_dir = \"/var/lib/toolsmith\"\n").unwrap();
        assert_eq!(config.registry_dir, PathBuf::from("/var/lib/toolsmith"));
        assert_eq!(config.executor, ExecutorSection::default());
        assert_eq!(config.lock_timeout_ms, 5000);
    }

    #[test]
    fn test_thread_executor_config() {
        let mut config = Config::default();
        config.executor.isolation = IsolationKind::Thread;
        config.executor.deadline_ms = 750;
        config.executor.memory_limit_mb = 64;

        let exec = config.executor_config().unwrap();
        assert_eq!(exec.isolation, Isolation::Thread);
        assert_eq!(exec.default_deadline, Duration::from_millis(750));
        assert_eq!(exec.memory_limit_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_process_executor_runs_worker_subcommand() {
        let exec = Config::default().executor_config().unwrap();
        match exec.isolation {
            Isolation::Process { args, .. } => assert_eq!(args, vec!["worker".to_string()]),
            Isolation::Thread => panic!("expected process isolation"),
        }
    }
}
