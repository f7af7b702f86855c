#[cfg(test)]
mod lifecycle_tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use toolsmith_core::{
        Arguments, AuditEvent, AuditKind, AuditSink, ExecutionRequest, ExecutionStatus,
        NullAuditSink, ParamSpec, ParamType, RegistryStore, SelfTestCase, StoreError, ToolRecord,
        ToolState,
    };
    use toolsmith_executor::{
        ExecutorConfig, ExecutorError, IsolationBackend, SandboxExecutor, ThreadBackend,
        WorkerRequest, WorkerResponse,
    };
    use toolsmith_policy::ValidatorPolicy;
    use toolsmith_tools::{LifecycleError, LifecycleManager, LocalNameLocks, ToolDraft, ToolRegistry};

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<String, ToolRecord>>,
    }

    impl RegistryStore for MemoryStore {
        fn load_all(&self) -> Result<Vec<ToolRecord>, StoreError> {
            Ok(self.records.lock().values().cloned().collect())
        }

        fn save(&self, record: &ToolRecord) -> Result<(), StoreError> {
            self.records
                .lock()
                .insert(record.name.clone(), record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingSink {
        fn kinds(&self) -> Vec<AuditKind> {
            self.events.lock().iter().map(|e| e.kind).collect()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: AuditEvent) {
            self.events.lock().push(event);
        }
    }

    struct Harness {
        manager: Arc<LifecycleManager>,
        store: Arc<MemoryStore>,
        audit: Arc<RecordingSink>,
    }

    /// Runs in-thread, except that a negative argument gets the worker killed
    /// by the OS the way an rlimit breach would.
    struct KilledOnNegative;

    #[async_trait]
    impl IsolationBackend for KilledOnNegative {
        async fn run(
            &self,
            request: WorkerRequest,
            deadline: Duration,
        ) -> Result<WorkerResponse, ExecutorError> {
            if request.arguments.values().any(|v| v.as_i64().is_some_and(|n| n < 0)) {
                return Ok(WorkerResponse::failure(
                    ExecutionStatus::RuntimeViolation,
                    "execution unit terminated by signal 9",
                ));
            }
            ThreadBackend.run(request, deadline).await
        }

        fn name(&self) -> &'static str {
            "killed-on-negative"
        }
    }

    fn harness() -> Harness {
        harness_on(Arc::new(ThreadBackend))
    }

    fn harness_on(backend: Arc<dyn IsolationBackend>) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let audit = Arc::new(RecordingSink::default());
        let registry = Arc::new(ToolRegistry::open(store.clone()).unwrap());
        let executor = Arc::new(
            SandboxExecutor::with_backend(
                Arc::new(ValidatorPolicy::default()),
                ExecutorConfig::thread(),
                backend,
            )
            .unwrap(),
        );
        let manager = Arc::new(LifecycleManager::new(
            registry,
            executor,
            Arc::new(LocalNameLocks::new()),
            audit.clone(),
        ));
        Harness {
            manager,
            store,
            audit,
        }
    }

    fn args(value: serde_json::Value) -> Arguments {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        }
    }

    fn add_draft(source: &str, expected: serde_json::Value) -> ToolDraft {
        ToolDraft {
            name: "add".to_string(),
            description: "adds two integers".to_string(),
            source: source.to_string(),
            parameter_schema: vec![
                ParamSpec::required("a", ParamType::Integer),
                ParamSpec::required("b", ParamType::Integer),
            ],
            return_type: Some(ParamType::Integer),
            self_tests: vec![SelfTestCase::new(json!({"a": 1, "b": 2}), expected)],
        }
    }

    // Authoring pipeline

    #[tokio::test]
    async fn test_add_is_registered_and_invocable() {
        let h = harness();
        let draft = h
            .manager
            .submit_draft(add_draft("def add(a, b): return a + b", json!(3)))
            .await
            .unwrap();
        assert_eq!(draft.version, 1);
        assert_eq!(draft.state, ToolState::Draft);

        let validated = h.manager.validate("add", 1).await.unwrap();
        assert_eq!(validated.state, ToolState::Validated);
        let tested = h.manager.self_test("add", 1).await.unwrap();
        assert_eq!(tested.state, ToolState::Tested);
        let registered = h.manager.register("add", 1).await.unwrap();
        assert_eq!(registered.state, ToolState::Registered);
        assert!(registered.registered_at.is_some());

        let result = h.manager.invoke("add", args(json!({"a": 2, "b": 5}))).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Ok);
        assert_eq!(result.value, Some(json!(7)));

        assert_eq!(
            h.audit.kinds(),
            vec![
                AuditKind::Submitted,
                AuditKind::Validated,
                AuditKind::Tested,
                AuditKind::Registered,
                AuditKind::Invoked,
            ]
        );
    }

    #[tokio::test]
    async fn test_file_write_is_rejected_at_validation() {
        let h = harness();
        let source = "def add(a, b):\n    open('out.txt', 'w').write(str(a))\n    return a + b\n";
        let draft = h.manager.submit_draft(add_draft(source, json!(3))).await.unwrap();

        let done = h.manager.advance(&draft).await.unwrap();
        assert_eq!(done.state, ToolState::Rejected);
        let verdict = done.verdict.as_ref().unwrap();
        assert!(!verdict.accepted());
        assert!(verdict.has_rule("file_io"));
        assert!(done.validated_at.is_none());
        assert!(done.tested_at.is_none());
        assert!(h.manager.registry().registered("add").is_none());
    }

    #[tokio::test]
    async fn test_self_test_mismatch_rejects_with_case() {
        let h = harness();
        let draft = h
            .manager
            .submit_draft(add_draft("def add(a, b): return a + b + 2", json!(4)))
            .await
            .unwrap();

        let done = h.manager.advance(&draft).await.unwrap();
        assert_eq!(done.state, ToolState::Rejected);
        let diagnostic = done.diagnostic.unwrap();
        assert!(diagnostic.contains("case 1"), "{diagnostic}");
        assert!(diagnostic.contains("expected 4 but got 5"), "{diagnostic}");

        let err = h.manager.invoke("add", args(json!({"a": 1, "b": 2}))).await;
        assert!(matches!(err, Err(LifecycleError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_no_self_tests_is_rejected() {
        let h = harness();
        let mut draft = add_draft("def add(a, b): return a + b", json!(3));
        draft.self_tests.clear();
        let draft = h.manager.submit_draft(draft).await.unwrap();

        let done = h.manager.advance(&draft).await.unwrap();
        assert_eq!(done.state, ToolState::Rejected);
        assert!(done.diagnostic.unwrap().contains("no cases"));
    }

    #[tokio::test]
    async fn test_float_result_matches_integer_expectation() {
        let h = harness();
        let mut draft = add_draft("def add(a, b): return (a + b) / 1", json!(3));
        draft.return_type = Some(ParamType::Number);
        let draft = h.manager.submit_draft(draft).await.unwrap();

        let done = h.manager.advance(&draft).await.unwrap();
        assert_eq!(done.state, ToolState::Registered, "{:?}", done.diagnostic);
    }

    #[tokio::test]
    async fn test_integer_result_matches_float_expectation() {
        let h = harness();
        let draft = h
            .manager
            .submit_draft(add_draft("def add(a, b): return a + b", json!(3.0)))
            .await
            .unwrap();
        let done = h.manager.advance(&draft).await.unwrap();
        assert_eq!(done.state, ToolState::Registered, "{:?}", done.diagnostic);

        let draft = h
            .manager
            .submit_draft(add_draft("def add(a, b): return a + b", json!(3.5)))
            .await
            .unwrap();
        let done = h.manager.advance(&draft).await.unwrap();
        assert_eq!(done.state, ToolState::Rejected);
        assert!(done.diagnostic.unwrap().contains("expected 3.5 but got 3"));
    }

    // Transition rules

    #[tokio::test]
    async fn test_out_of_order_transition_fails() {
        let h = harness();
        h.manager
            .submit_draft(add_draft("def add(a, b): return a + b", json!(3)))
            .await
            .unwrap();

        let err = h.manager.register("add", 1).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
        let err = h.manager.self_test("add", 1).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
        assert_eq!(
            h.manager.registry().get("add", 1).unwrap().state,
            ToolState::Draft
        );
    }

    #[tokio::test]
    async fn test_rejected_is_terminal() {
        let h = harness();
        let draft = h
            .manager
            .submit_draft(add_draft("def add(a, b): return eval('a')", json!(3)))
            .await
            .unwrap();
        h.manager.advance(&draft).await.unwrap();

        let err = h.manager.validate("add", 1).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_invalid_name_and_unknown_tool() {
        let h = harness();
        let mut draft = add_draft("def add(a, b): return a + b", json!(3));
        draft.name = "../add".to_string();
        assert!(matches!(
            h.manager.submit_draft(draft).await,
            Err(LifecycleError::InvalidName(_))
        ));

        assert!(matches!(
            h.manager.invoke("missing", Arguments::new()).await,
            Err(LifecycleError::ToolNotFound(_))
        ));
        assert!(matches!(
            h.manager.validate("missing", 1).await,
            Err(LifecycleError::VersionNotFound { .. })
        ));
    }

    // Versioning

    #[tokio::test]
    async fn test_new_version_deprecates_previous() {
        let h = harness();
        let v1 = h
            .manager
            .submit_draft(add_draft("def add(a, b): return a + b", json!(3)))
            .await
            .unwrap();
        h.manager.advance(&v1).await.unwrap();

        let v2 = h
            .manager
            .submit_draft(add_draft("def add(a, b):\n    total = a + b\n    return total\n", json!(3)))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        h.manager.advance(&v2).await.unwrap();

        let history = h.manager.registry().history("add");
        assert_eq!(history[0].state, ToolState::Deprecated);
        assert!(history[0].deprecated_at.is_some());
        assert_eq!(history[1].state, ToolState::Registered);
        assert_eq!(h.manager.registry().registered("add").unwrap().version, 2);

        let stored = h.store.records.lock().get("add").cloned().unwrap();
        assert_eq!(stored.registered_version, Some(2));
        assert_eq!(
            stored
                .versions
                .iter()
                .filter(|d| d.state == ToolState::Registered)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_older_version_cannot_replace_newer() {
        let h = harness();
        let v1 = h
            .manager
            .submit_draft(add_draft("def add(a, b): return a + b", json!(3)))
            .await
            .unwrap();
        let v2 = h
            .manager
            .submit_draft(add_draft("def add(a, b): return b + a", json!(3)))
            .await
            .unwrap();

        h.manager.validate("add", v1.version).await.unwrap();
        h.manager.self_test("add", v1.version).await.unwrap();
        h.manager.advance(&v2).await.unwrap();

        let err = h.manager.register("add", v1.version).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Superseded {
                version: 1,
                registered: 2,
                ..
            }
        ));
        assert_eq!(h.manager.registry().registered("add").unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_concurrent_registration_leaves_one_registered() {
        let h = harness();
        let mut versions = Vec::new();
        for body in ["a + b", "b + a", "(a + b) * 1", "a - -b"] {
            let source = format!("def add(a, b): return {body}");
            let draft = h.manager.submit_draft(add_draft(&source, json!(3))).await.unwrap();
            h.manager.validate("add", draft.version).await.unwrap();
            h.manager.self_test("add", draft.version).await.unwrap();
            versions.push(draft.version);
        }

        let mut handles = Vec::new();
        for version in versions {
            let manager = h.manager.clone();
            handles.push(tokio::spawn(async move { manager.register("add", version).await }));
        }
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) | Err(LifecycleError::Superseded { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let history = h.manager.registry().history("add");
        let registered: Vec<u32> = history
            .iter()
            .filter(|d| d.state == ToolState::Registered)
            .map(|d| d.version)
            .collect();
        assert_eq!(registered, vec![4]);
        assert_eq!(h.manager.registry().registered("add").unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_registry_reopens_from_store() {
        let h = harness();
        let draft = h
            .manager
            .submit_draft(add_draft("def add(a, b): return a + b", json!(3)))
            .await
            .unwrap();
        h.manager.advance(&draft).await.unwrap();

        let reopened = ToolRegistry::open(h.store.clone()).unwrap();
        assert_eq!(reopened.registered("add").unwrap().version, 1);
        let listing = reopened.list();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].registered_version, Some(1));
        assert_eq!(reopened.schemas()[0]["name"], json!("add"));
    }

    // Runtime violations

    fn repeat_draft() -> ToolDraft {
        ToolDraft {
            name: "repeat".to_string(),
            description: "repeats a character".to_string(),
            source: "def repeat(n):\n    return 'x' * n\n".to_string(),
            parameter_schema: vec![ParamSpec::required("n", ParamType::Integer)],
            return_type: Some(ParamType::String),
            self_tests: vec![SelfTestCase::new(json!({"n": 3}), json!("xxx"))],
        }
    }

    #[tokio::test]
    async fn test_runtime_violation_quarantines_tool() {
        let h = harness_on(Arc::new(KilledOnNegative));
        let draft = h.manager.submit_draft(repeat_draft()).await.unwrap();
        assert_eq!(
            h.manager.advance(&draft).await.unwrap().state,
            ToolState::Registered
        );

        let result = h
            .manager
            .invoke("repeat", args(json!({"n": -1})))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::RuntimeViolation);

        assert!(h.manager.registry().registered("repeat").is_none());
        let quarantined = h.manager.registry().get("repeat", 1).unwrap();
        assert_eq!(quarantined.state, ToolState::Rejected);
        assert!(quarantined.diagnostic.unwrap().starts_with("quarantined"));
        assert!(h.audit.kinds().contains(&AuditKind::SecurityViolation));

        assert!(matches!(
            h.manager.invoke("repeat", args(json!({"n": 1}))).await,
            Err(LifecycleError::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_size_bound_does_not_quarantine() {
        let h = harness();
        let draft = h.manager.submit_draft(repeat_draft()).await.unwrap();
        h.manager.advance(&draft).await.unwrap();

        let result = h
            .manager
            .invoke("repeat", args(json!({"n": 5000000})))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::RaisedError);
        assert!(result.diagnostic_message().unwrap().starts_with("MemoryError"));

        assert_eq!(h.manager.registry().registered("repeat").unwrap().version, 1);
        assert!(!h.audit.kinds().contains(&AuditKind::SecurityViolation));
        let result = h.manager.invoke("repeat", args(json!({"n": 2}))).await.unwrap();
        assert_eq!(result.value, Some(json!("xx")));
    }

    // Pinned-version execution

    #[tokio::test]
    async fn test_execute_uses_request_deadline() {
        let registry = Arc::new(ToolRegistry::open(Arc::new(MemoryStore::default())).unwrap());
        let executor = Arc::new(
            SandboxExecutor::new(Arc::new(ValidatorPolicy::default()), ExecutorConfig::thread())
                .unwrap(),
        );
        let manager = LifecycleManager::new(
            registry,
            executor,
            Arc::new(LocalNameLocks::new()),
            Arc::new(NullAuditSink),
        );
        let draft = ToolDraft {
            name: "spin".to_string(),
            description: "sums 0..n, forever when n is negative".to_string(),
            source: "def spin(n):\n    total = 0\n    i = 0\n    while n < 0 or i < n:\n        total += i\n        i += 1\n    return total\n".to_string(),
            parameter_schema: vec![ParamSpec::required("n", ParamType::Integer)],
            return_type: Some(ParamType::Integer),
            self_tests: vec![SelfTestCase::new(json!({"n": 3}), json!(3))],
        };
        let draft = manager.submit_draft(draft).await.unwrap();
        assert_eq!(manager.advance(&draft).await.unwrap().state, ToolState::Registered);

        let started = Instant::now();
        let request = ExecutionRequest::new("spin", 1, args(json!({"n": -1})))
            .with_deadline(Duration::from_millis(200));
        let result = manager.execute(request).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(manager.registry().registered("spin").unwrap().version, 1);

        let request = ExecutionRequest::new("spin", 1, args(json!({"n": 4})))
            .with_deadline(Duration::from_secs(2));
        assert_eq!(manager.execute(request).await.unwrap().value, Some(json!(6)));

        let stale = ExecutionRequest::new("spin", 2, Arguments::new());
        assert!(matches!(
            manager.execute(stale).await,
            Err(LifecycleError::ToolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_raised_error_keeps_tool_registered() {
        let h = harness();
        let draft = ToolDraft {
            name: "half".to_string(),
            description: String::new(),
            source: "def half(n):\n    if n % 2:\n        raise ValueError('odd')\n    return n // 2\n"
                .to_string(),
            parameter_schema: vec![ParamSpec::required("n", ParamType::Integer)],
            return_type: None,
            self_tests: vec![SelfTestCase::new(json!({"n": 4}), json!(2))],
        };
        let draft = h.manager.submit_draft(draft).await.unwrap();
        h.manager.advance(&draft).await.unwrap();

        let result = h.manager.invoke("half", args(json!({"n": 3}))).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::RaisedError);
        assert!(h.manager.registry().registered("half").is_some());
    }
}
