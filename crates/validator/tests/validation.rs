#[cfg(test)]
mod validation_tests {
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use toolsmith_core::{Arguments, ParamSpec, ParamType};
    use toolsmith_policy::{rules, Capability, DenyPattern, PolicyChange, ValidatorPolicy};
    use toolsmith_script::{run_tool, ErrorKind, Limits};
    use toolsmith_validator::{LexicalScanner, Validator};

    fn validator() -> Validator {
        Validator::new(Arc::new(ValidatorPolicy::default())).unwrap()
    }

    // Capability coverage

    #[test]
    fn test_every_capability_is_caught() {
        let cases = [
            (Capability::FileIo, "def f(p):\n    return open(p).read()\n"),
            (Capability::Process, "import subprocess\n"),
            (Capability::DynamicExec, "def f(s):\n    return eval(s)\n"),
            (Capability::DynamicImport, "def f():\n    return __import__('os')\n"),
            (Capability::Network, "import socket\n"),
            (Capability::Environment, "def f():\n    return os.environ\n"),
            (Capability::BuiltinsTamper, "x = __builtins__\n"),
            (Capability::Reflection, "def f(x):\n    return getattr(x, 'y')\n"),
        ];
        for (cap, src) in cases {
            let verdict = validator().validate(src);
            assert!(!verdict.accepted(), "{src}");
            assert!(verdict.has_rule(cap.rule_id()), "{cap} not reported for {src}");
        }
    }

    #[test]
    fn test_indirection_through_aliases() {
        for src in [
            "o = open\n",
            "from json import dump\n",
            "import json as j\ndef f(x):\n    return j.load(x)\n",
            "def f(x):\n    return x.__class__.__mro__\n",
            "def f():\n    return '{0.__globals__}'.format(f)\n",
        ] {
            assert!(!validator().validate(src).accepted(), "{src}");
        }
    }

    #[test]
    fn test_typical_tools_are_accepted() {
        for src in [
            "import math\n\ndef area(r):\n    return math.pi * r ** 2\n",
            "import json\n\ndef pretty(s):\n    return json.dumps(json.loads(s), indent=2)\n",
            "from collections import Counter\n\ndef top(words, n=3):\n    return Counter(words).most_common(n)\n",
            "import datetime\n\ndef later(d):\n    return datetime.add_days(d, 7)\n",
            "def clamp(x, lo, hi):\n    return max(lo, min(x, hi))\n",
        ] {
            let verdict = validator().validate(src);
            assert!(verdict.accepted(), "{src}: {}", verdict.summary());
        }
    }

    // Policy versions

    #[test]
    fn test_verdict_records_policy_version() {
        let v1 = ValidatorPolicy::default();
        let v2 = v1
            .bump(PolicyChange::DenyPattern {
                pattern: DenyPattern::new(Capability::Network, r"\bsleep\b", "blocking sleep"),
            })
            .unwrap();

        let src = "def sleep(n):\n    return n\n";
        let old = Validator::new(Arc::new(v1)).unwrap().validate(src);
        let new = Validator::new(Arc::new(v2)).unwrap().validate(src);

        assert!(old.accepted());
        assert_eq!(old.policy_version(), 1);
        assert!(!new.accepted());
        assert_eq!(new.policy_version(), 2);
    }

    #[test]
    fn test_allowing_a_module_accepts_its_import() {
        let src = "import statistics\n";
        assert!(validator().validate(src).has_rule(rules::IMPORT_NOT_ALLOWED));

        let policy = ValidatorPolicy::default()
            .bump(PolicyChange::AllowModule {
                module: "statistics".into(),
            })
            .unwrap();
        assert!(Validator::new(Arc::new(policy)).unwrap().validate(src).accepted());
    }

    // Agreement with the runtime

    #[test]
    fn test_accepted_tool_runs_without_violation() {
        let src = "import math\n\ndef hyp(a, b):\n    return math.hypot(a, b)\n";
        let schema = vec![
            ParamSpec::required("a", ParamType::Number),
            ParamSpec::required("b", ParamType::Number),
        ];
        assert!(validator().validate_tool(src, "hyp", &schema).accepted());

        let mut args = Arguments::new();
        args.insert("a".into(), 3.into());
        args.insert("b".into(), 4.into());
        let outcome = run_tool(
            src,
            "hyp",
            &args,
            Arc::new(ValidatorPolicy::default()),
            Limits::default(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.value, json!(5.0));
    }

    #[test]
    fn test_rejected_tool_is_also_refused_at_runtime() {
        let src = "def f():\n    return getattr\n";
        assert!(!validator().validate(src).accepted());

        let failure = run_tool(
            src,
            "f",
            &Arguments::new(),
            Arc::new(ValidatorPolicy::default()),
            Limits::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(failure.error.kind, ErrorKind::Violation);
    }

    // Determinism

    proptest! {
        #[test]
        fn prop_validation_is_deterministic(src in "[a-z_():.=' \n0-9]{0,120}") {
            let v = validator();
            let first = v.validate(&src);
            let second = v.validate(&src);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_lexical_matches_are_ordered(
            parts in proptest::collection::vec(
                prop_oneof![
                    Just("open(x)"),
                    Just("eval(y)"),
                    Just("x = 1"),
                    Just("os.system"),
                    Just("getattr(a)"),
                    Just("# __class__"),
                ],
                0..12,
            )
        ) {
            let src = parts.join("\n");
            let scanner = LexicalScanner::new(&ValidatorPolicy::default()).unwrap();
            let found = scanner.scan(&src);
            for pair in found.windows(2) {
                prop_assert!(
                    (pair[0].location.offset, &pair[0].rule_id)
                        <= (pair[1].location.offset, &pair[1].rule_id)
                );
            }
            let verdict = validator().validate(&src);
            prop_assert_eq!(&verdict.violations()[..found.len()], &found[..]);
        }
    }
}
