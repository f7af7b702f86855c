use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use toolsmith_app::config::{Config, IsolationKind};

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.registry_dir, PathBuf::from("./data/registry"));
    assert_eq!(config.executor.isolation, IsolationKind::Process);
    assert_eq!(config.executor.deadline_ms, 5000);
    assert_eq!(config.executor.output_cap, 4096);
    assert_eq!(config.executor.memory_limit_mb, 256);
    assert!(config.policy_file.is_none());
    config.validate().unwrap();
}

#[test]
fn test_parse_full_file() {
    let config = Config::parse(
        r#"
registry_dir = "/srv/toolsmith/registry"
audit_log = "/srv/toolsmith/audit.log"
policy_file = "/etc/toolsmith/policy.yaml"
lock_timeout_ms = 2000

[executor]
isolation = "thread"
deadline_ms = 1500
output_cap = 1024
memory_limit_mb = 128
"#,
    )
    .unwrap();

    assert_eq!(config.audit_log, PathBuf::from("/srv/toolsmith/audit.log"));
    assert_eq!(config.policy_file, Some(PathBuf::from("/etc/toolsmith/policy.yaml")));
    assert_eq!(config.lock_timeout(), Duration::from_secs(2));
    assert_eq!(config.executor.isolation, IsolationKind::Thread);

    let exec = config.executor_config().unwrap();
    assert_eq!(exec.default_deadline, Duration::from_millis(1500));
    assert_eq!(exec.output_cap, 1024);
    assert_eq!(exec.memory_limit_bytes, 128 * 1024 * 1024);
}

#[test]
fn test_unknown_isolation_is_rejected() {
    assert!(Config::parse("[executor]\nisolation = \"container\"\n").is_err());
}

#[test]
fn test_env_overrides() {
    let mut config = Config::default();
    config
        .apply_overrides(env(&[
            ("TOOLSMITH_REGISTRY_DIR", "/tmp/registry"),
            ("TOOLSMITH_DEADLINE_MS", "250"),
        ]))
        .unwrap();
    assert_eq!(config.registry_dir, PathBuf::from("/tmp/registry"));
    assert_eq!(config.executor.deadline_ms, 250);
}

#[test]
fn test_bad_deadline_override() {
    let mut config = Config::default();
    assert!(config
        .apply_overrides(env(&[("TOOLSMITH_DEADLINE_MS", "soon")]))
        .is_err());

    config.apply_overrides(env(&[("TOOLSMITH_DEADLINE_MS", "0")])).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_load_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("toolsmith.toml");
    std::fs::write(&path, "lock_timeout_ms = 100\n").unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.lock_timeout_ms, 100);
    assert!(Config::load_from(&temp.path().join("missing.toml")).is_err());
}
