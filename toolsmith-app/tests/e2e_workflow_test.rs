use serde_json::{json, Value};
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;
use toolsmith_app::bootstrap;
use toolsmith_app::commands::{self, Outcome};
use toolsmith_app::config::{Config, IsolationKind};

const ADD_MANIFEST: &str = r#"
name: add
description: adds two integers
source: |
  def add(a, b):
      return a + b
parameters:
  - name: a
    type: integer
  - name: b
    type: integer
return_type: integer
self_tests:
  - arguments: {a: 1, b: 2}
    expected: 3
  - arguments: {a: -4, b: 4}
    expected: 0
"#;

const WRITER_MANIFEST: &str = r#"
name: writer
source: |
  def writer(text):
      open('out.txt', 'w').write(text)
      return len(text)
parameters:
  - name: text
    type: string
self_tests:
  - arguments: {text: "hi"}
    expected: 2
"#;

fn thread_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.registry_dir = dir.join("registry");
    config.audit_log = dir.join("audit.log");
    config.executor.isolation = IsolationKind::Thread;
    config
}

fn output(buf: Vec<u8>) -> Value {
    serde_json::from_slice(&buf).unwrap()
}

#[tokio::test]
async fn test_author_invoke_list_history() {
    let temp = TempDir::new().unwrap();
    let config = thread_config(temp.path());
    let manifest = temp.path().join("add.yaml");
    std::fs::write(&manifest, ADD_MANIFEST).unwrap();

    let services = bootstrap::build(&config).await.unwrap();

    let mut buf = Vec::new();
    let outcome = commands::author::run(&services, &manifest, &mut buf).await.unwrap();
    assert_eq!(outcome, Outcome::Success);
    let authored = output(buf);
    assert_eq!(authored["state"], "registered");
    assert_eq!(authored["version"], 1);

    let mut buf = Vec::new();
    let outcome = commands::invoke::run(&services, "add", r#"{"a": 2, "b": 5}"#, &mut buf)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Success);
    let result = output(buf);
    assert_eq!(result["status"], "ok");
    assert_eq!(result["value"], 7);

    let mut buf = Vec::new();
    let outcome = commands::invoke::run(&services, "add", r#"{"a": "2", "b": 5}"#, &mut buf)
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Failure);
    assert_eq!(output(buf)["status"], "raised_error");

    let mut buf = Vec::new();
    commands::registry::list(&services, &mut buf).unwrap();
    assert_eq!(
        output(buf),
        json!([{"name": "add", "registered_version": 1, "latest_version": 1}])
    );

    let mut buf = Vec::new();
    commands::registry::history(&services, "add", &mut buf).unwrap();
    let history = output(buf);
    assert_eq!(history[0]["state"], "registered");
    assert_eq!(history[0]["policy_version"], 1);
    assert!(commands::registry::history(&services, "missing", &mut Vec::new()).is_err());

    let mut buf = Vec::new();
    assert_eq!(
        commands::audit::run(&config.audit_log, &mut buf).unwrap(),
        Outcome::Success
    );
    assert_eq!(output(buf)["entries"], 6);
}

#[tokio::test]
async fn test_hostile_manifest_is_rejected() {
    let temp = TempDir::new().unwrap();
    let config = thread_config(temp.path());
    let manifest = temp.path().join("writer.yaml");
    std::fs::write(&manifest, WRITER_MANIFEST).unwrap();

    let services = bootstrap::build(&config).await.unwrap();
    let mut buf = Vec::new();
    let outcome = commands::author::run(&services, &manifest, &mut buf).await.unwrap();
    assert_eq!(outcome, Outcome::Failure);

    let authored = output(buf);
    assert_eq!(authored["state"], "rejected");
    assert_eq!(authored["violations"][0]["rule_id"], "file_io");
    assert!(!temp.path().join("out.txt").exists());

    let err = commands::invoke::run(&services, "writer", "{}", &mut Vec::new()).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn test_validate_and_policy_commands() {
    let temp = TempDir::new().unwrap();
    let config = thread_config(temp.path());
    let policy = bootstrap::load_policy(&config).await.unwrap();

    let good = temp.path().join("good.py");
    std::fs::write(&good, "import math\n\ndef area(r):\n    return math.pi * r * r\n").unwrap();
    let bad = temp.path().join("bad.py");
    std::fs::write(&bad, "def f():\n    return eval('1')\n").unwrap();

    let mut buf = Vec::new();
    let outcome = commands::validate::run(policy.clone().into(), &good, &mut buf).unwrap();
    assert_eq!(outcome, Outcome::Success);

    let mut buf = Vec::new();
    let outcome = commands::validate::run(policy.clone().into(), &bad, &mut buf).unwrap();
    assert_eq!(outcome, Outcome::Failure);
    assert_eq!(output(buf)["violations"][0]["rule_id"], "dynamic_exec");

    let saved = temp.path().join("policy.yaml");
    let mut buf = Vec::new();
    commands::policy::run(&policy, Some(saved.as_path()), &mut buf).await.unwrap();
    assert!(String::from_utf8(buf).unwrap().contains("version: 1"));

    let mut with_file = config.clone();
    with_file.policy_file = Some(saved);
    assert_eq!(bootstrap::load_policy(&with_file).await.unwrap(), policy);
}

#[test]
fn test_invoke_arguments_must_be_an_object() {
    assert!(commands::invoke::parse_arguments("[1, 2]").is_err());
    assert!(commands::invoke::parse_arguments("not json").is_err());
    assert_eq!(
        commands::invoke::parse_arguments(r#"{"a": 1}"#).unwrap()["a"],
        json!(1)
    );
}

// The binary re-executes itself as the worker under process isolation.
#[test]
fn test_binary_with_process_isolation() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("toolsmith.toml");
    std::fs::write(
        &config_path,
        format!(
            "registry_dir = {:?}\naudit_log = {:?}\n\n[executor]\nisolation = \"process\"\n",
            temp.path().join("registry"),
            temp.path().join("audit.log"),
        ),
    )
    .unwrap();
    let manifest = temp.path().join("add.yaml");
    std::fs::write(&manifest, ADD_MANIFEST).unwrap();

    let toolsmith = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_toolsmith"))
            .args(args)
            .env("TOOLSMITH_CONFIG", &config_path)
            .env("RUST_LOG", "warn")
            .output()
            .unwrap()
    };

    let authored = toolsmith(&["author", manifest.to_str().unwrap()]);
    assert!(authored.status.success(), "{}", String::from_utf8_lossy(&authored.stderr));

    let invoked = toolsmith(&["invoke", "add", r#"{"a": 20, "b": 22}"#]);
    assert!(invoked.status.success());
    let result: Value = serde_json::from_slice(&invoked.stdout).unwrap();
    assert_eq!(result["value"], 42);

    let missing = toolsmith(&["invoke", "nope", "{}"]);
    assert!(!missing.status.success());
}
