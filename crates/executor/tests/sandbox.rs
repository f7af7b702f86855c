#[cfg(test)]
mod sandbox_tests {
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use toolsmith_core::{Arguments, ExecutionStatus, ParamSpec, ParamType, ToolDefinition};
    use toolsmith_executor::{ExecutorConfig, Isolation, SandboxExecutor};
    use toolsmith_policy::ValidatorPolicy;

    const WORKER: &str = env!("CARGO_BIN_EXE_toolsmith-worker");

    fn thread_executor() -> SandboxExecutor {
        SandboxExecutor::new(Arc::new(ValidatorPolicy::default()), ExecutorConfig::thread())
            .unwrap()
    }

    fn process_executor(config: ExecutorConfig) -> SandboxExecutor {
        SandboxExecutor::new(Arc::new(ValidatorPolicy::default()), config).unwrap()
    }

    fn args(value: serde_json::Value) -> Arguments {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    fn add_tool() -> ToolDefinition {
        ToolDefinition::draft(
            "add",
            1,
            "def add(a, b): return a + b",
            vec![
                ParamSpec::required("a", ParamType::Integer),
                ParamSpec::required("b", ParamType::Integer),
            ],
            "adds two integers",
            vec![],
        )
    }

    // Thread isolation

    #[tokio::test]
    async fn test_thread_add() {
        let result = thread_executor()
            .execute_tool(&add_tool(), &args(json!({"a": 2, "b": 5})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Ok);
        assert_eq!(result.value, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_thread_timeout_is_bounded() {
        let src = "def spin():\n    n = 0\n    while True:\n        n += 1\n";
        let started = Instant::now();
        let result = thread_executor()
            .execute(src, "spin", &Arguments::new(), Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_raised_error_keeps_output() {
        let src = "def f(x):\n    print('checking', x)\n    if x < 0:\n        raise ValueError('negative input')\n    return x\n";
        let result = thread_executor()
            .execute(src, "f", &args(json!({"x": -1})), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::RaisedError);
        assert_eq!(result.captured_output, "checking -1\n");
        assert!(result
            .diagnostic_message()
            .unwrap()
            .starts_with("ValueError: negative input"));
    }

    #[tokio::test]
    async fn test_size_bound_is_a_raised_error() {
        let src = "def f(n):\n    return len('x' * n)\n";
        let result = thread_executor()
            .execute(src, "f", &args(json!({"n": 1000001})), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::RaisedError);
        assert!(result.diagnostic_message().unwrap().starts_with("MemoryError"));
    }

    const DEEP_NESTING: &str =
        "def f(n):\n    a = []\n    for i in range(n):\n        a = [a]\n    return len(a)\n";

    #[tokio::test]
    async fn test_thread_deeply_nested_value_is_freed() {
        let result = thread_executor()
            .execute(DEEP_NESTING, "f", &args(json!({"n": 900000})), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Ok, "{:?}", result.diagnostic);
        assert_eq!(result.value, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_output_is_truncated_not_failed() {
        let src = "def f():\n    for i in range(2000):\n        print('line', i)\n    return 'done'\n";
        let result = thread_executor()
            .execute(src, "f", &Arguments::new(), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(result.is_ok());
        assert!(result.output_truncated);
        assert!(result.captured_output.len() <= 4096);
    }

    #[tokio::test]
    async fn test_concurrent_executions_do_not_share_state() {
        let exec = Arc::new(thread_executor());
        let src = "seen = []\ndef f(x):\n    seen.append(x)\n    return len(seen)\n";
        let mut handles = Vec::new();
        for i in 0..8 {
            let exec = exec.clone();
            handles.push(tokio::spawn(async move {
                exec.execute(src, "f", &args(json!({"x": i})), Duration::from_secs(2))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().value, Some(json!(1)));
        }
    }

    // Process isolation

    #[tokio::test]
    async fn test_process_add() {
        let exec = process_executor(ExecutorConfig::process(WORKER, vec![]));
        let result = exec
            .execute_tool(&add_tool(), &args(json!({"a": 2, "b": 5})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Ok, "{:?}", result.diagnostic);
        assert_eq!(result.value, Some(json!(7)));
    }

    #[tokio::test]
    async fn test_process_deep_recursion_uses_large_stack() {
        let src = "def f(n):\n    return 0 if n == 0 else 1 + f(n - 1)\n";
        let exec = process_executor(ExecutorConfig::process(WORKER, vec![]));
        let result = exec
            .execute(src, "f", &args(json!({"n": 190})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.value, Some(json!(190)));
    }

    #[tokio::test]
    async fn test_process_infinite_loop_is_killed() {
        let exec = process_executor(ExecutorConfig::process(WORKER, vec![]));
        let started = Instant::now();
        let result = exec
            .execute(
                "def f():\n    while True:\n        pass\n",
                "f",
                &Arguments::new(),
                Duration::from_millis(500),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_process_memory_exhaustion_is_contained() {
        let mut config = ExecutorConfig::process(WORKER, vec![]);
        config.memory_limit_bytes = 96 * 1024 * 1024;
        let src = "def f():\n    keep = []\n    for i in range(1000):\n        keep.append([i] * 900000)\n    return len(keep)\n";
        let result = process_executor(config)
            .execute(src, "f", &Arguments::new(), Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::RuntimeViolation);
        assert!(!result.diagnostic_message().unwrap().contains('/'));
    }

    #[tokio::test]
    async fn test_process_deeply_nested_value_is_freed() {
        let exec = process_executor(ExecutorConfig::process(WORKER, vec![]));
        let result = exec
            .execute(DEEP_NESTING, "f", &args(json!({"n": 900000})), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Ok, "{:?}", result.diagnostic);
        assert_eq!(result.value, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_default_config_bounds_memory() {
        let mut config = ExecutorConfig::default();
        match &mut config.isolation {
            Isolation::Process { program, .. } => *program = WORKER.into(),
            Isolation::Thread => panic!("default isolation must be a separate process"),
        }
        let exec = process_executor(config);
        assert_eq!(exec.backend_name(), "process");

        // 16 lists of 900k values each, well past the default 256 MiB.
        let src = "def f():\n    keep = []\n    for i in range(16):\n        keep.append([i] * 900000)\n    return len(keep)\n";
        let result = exec
            .execute(src, "f", &Arguments::new(), Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::RuntimeViolation);
    }

    #[tokio::test]
    async fn test_process_missing_worker_is_host_error() {
        let exec = process_executor(ExecutorConfig::process("/nonexistent/toolsmith-worker", vec![]));
        let err = exec
            .execute("def f():\n    return 1\n", "f", &Arguments::new(), Duration::from_secs(1))
            .await;
        assert!(err.is_err());
    }

    // Adversarial sources never produce Ok

    fn hostile_line() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("open('out.txt', 'w').write('x')"),
            Just("__import__('os').system('id')"),
            Just("eval('1 + 1')"),
            Just("exec('x = 1')"),
            Just("getattr(len, '__self__')"),
            Just("(1).__class__.__bases__[0].__subclasses__()"),
            Just("import subprocess"),
            Just("import os"),
            Just("globals()"),
            Just("'{0.__class__}'.format(1)"),
            Just("json.load(x)"),
            Just("vars()"),
            Just("__builtins__ = {}"),
            Just("import socket"),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_hostile_source_never_ok(lines in proptest::collection::vec(hostile_line(), 1..4)) {
            let body: String = lines.iter().map(|l| format!("    {l}\n")).collect();
            let src = format!("import json\n\ndef f(x):\n{body}    return x\n");

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let result = runtime
                .block_on(thread_executor().execute(
                    &src,
                    "f",
                    &args(json!({"x": 1})),
                    Duration::from_secs(1),
                ))
                .unwrap();
            prop_assert_eq!(result.status, ExecutionStatus::ValidationRejected);
            prop_assert!(result.value.is_none());
        }
    }
}
