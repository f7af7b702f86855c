#[cfg(test)]
mod language_tests {
    use serde_json::json;
    use std::sync::Arc;
    use toolsmith_core::Arguments;
    use toolsmith_policy::ValidatorPolicy;
    use toolsmith_script::*;

    fn call(source: &str, entry: &str, args: serde_json::Value) -> Result<RunOutcome, RunFailure> {
        let arguments: Arguments = match args {
            serde_json::Value::Object(map) => map,
            _ => Arguments::new(),
        };
        run_tool(
            source,
            entry,
            &arguments,
            Arc::new(ValidatorPolicy::default()),
            Limits::default(),
            None,
        )
    }

    fn ok(source: &str, entry: &str, args: serde_json::Value) -> serde_json::Value {
        match call(source, entry, args) {
            Ok(outcome) => outcome.value,
            Err(failure) => panic!("tool failed: {}", failure.error),
        }
    }

    // Typical generated tools

    #[test]
    fn test_word_frequency_tool() {
        let src = r#"
from collections import Counter

def word_frequency(text, top=3):
    words = [w.strip(".,!?").lower() for w in text.split()]
    counts = Counter(w for w in words if w)
    return [{"word": w, "count": c} for w, c in counts.most_common(top)]
"#;
        let result = ok(
            src,
            "word_frequency",
            json!({"text": "the cat and the hat. The end!", "top": 2}),
        );
        assert_eq!(
            result,
            json!([{"word": "the", "count": 3}, {"word": "cat", "count": 1}])
        );
    }

    #[test]
    fn test_statistics_tool() {
        let src = r#"
import math

def stats(values):
    n = len(values)
    if n == 0:
        raise ValueError("values must not be empty")
    mean = sum(values) / n
    var = sum((v - mean) ** 2 for v in values) / n
    ordered = sorted(values)
    mid = n // 2
    median = ordered[mid] if n % 2 else (ordered[mid - 1] + ordered[mid]) / 2
    return {"mean": round(mean, 2), "stdev": round(math.sqrt(var), 2), "median": median}
"#;
        assert_eq!(
            ok(src, "stats", json!({"values": [2, 4, 4, 4, 5, 5, 7, 9]})),
            json!({"mean": 5.0, "stdev": 2.0, "median": 4.5})
        );

        let failure = call(src, "stats", json!({"values": []})).unwrap_err();
        assert_eq!(failure.error.kind, ErrorKind::Raised);
        assert_eq!(failure.error.message, "ValueError: values must not be empty");
    }

    #[test]
    fn test_json_roundtrip_tool() {
        let src = r#"
import json

def reshape(payload):
    data = json.loads(payload)
    data["total"] = sum(item["qty"] for item in data["items"])
    return json.dumps(data, sort_keys=True)
"#;
        let result = ok(
            src,
            "reshape",
            json!({"payload": "{\"items\": [{\"qty\": 2}, {\"qty\": 5}]}"}),
        );
        assert_eq!(
            result,
            json!("{\"items\": [{\"qty\": 2}, {\"qty\": 5}], \"total\": 7}")
        );
    }

    #[test]
    fn test_string_formatting_tool() {
        let src = r#"
import string

def report(name, score):
    header = "{:<8}|{:>6.1f}".format(name, score)
    pct = "%s scored %d%%" % (name.title(), score)
    return [header, pct, string.capwords("hello big world"), f"{name}" if False else name.upper()]
"#;
        // f-strings are not part of the language
        let failure = call(src, "report", json!({"name": "ada", "score": 93.5})).unwrap_err();
        assert!(failure.error.message.starts_with("SyntaxError"));

        let src = src.replace("f\"{name}\" if False else ", "");
        assert_eq!(
            ok(&src, "report", json!({"name": "ada", "score": 93.5})),
            json!(["ada     |  93.5", "Ada scored 93%", "Hello Big World", "ADA"])
        );
    }

    #[test]
    fn test_datetime_tool() {
        let src = r#"
import datetime

def schedule(start, days):
    end = datetime.add_days(start, days)
    return {
        "end": end,
        "weekday": datetime.weekday(end),
        "span": datetime.days_between(start, end),
        "parsed": datetime.parse("03/15/2024", "%m/%d/%Y"),
    }
"#;
        assert_eq!(
            ok(src, "schedule", json!({"start": "2024-02-27", "days": 3})),
            json!({
                "end": "2024-03-01",
                "weekday": 4,
                "span": 3,
                "parsed": "2024-03-15T00:00:00"
            })
        );
    }

    #[test]
    fn test_nested_closures_and_recursion() {
        let src = r#"
def fib(n):
    memo = {}
    def go(k):
        if k < 2:
            return k
        if k not in memo:
            memo[k] = go(k - 1) + go(k - 2)
        return memo[k]
    return go(n)
"#;
        assert_eq!(ok(src, "fib", json!({"n": 80})), json!(23416728348467685_i64));
    }

    #[test]
    fn test_while_loop_with_break_continue() {
        let src = r#"
def collatz(n):
    steps = 0
    while True:
        if n == 1:
            break
        steps += 1
        if n % 2 == 0:
            n //= 2
            continue
        n = 3 * n + 1
    return steps
"#;
        assert_eq!(ok(src, "collatz", json!({"n": 27})), json!(111));
    }

    // Failure classification

    #[test]
    fn test_type_errors_are_raised() {
        for src in [
            "def f():\n    return 1 + 'a'\n",
            "def f():\n    return len(5)\n",
            "def f():\n    return [1][5]\n",
            "def f():\n    return {}['missing']\n",
            "def f():\n    return undefined_name\n",
            "def f():\n    return 1 / 0\n",
        ] {
            let failure = call(src, "f", json!({})).unwrap_err();
            assert_eq!(failure.error.kind, ErrorKind::Raised, "{src}");
        }
    }

    #[test]
    fn test_denied_capabilities_are_violations_at_runtime() {
        for src in [
            "def f():\n    return open\n",
            "def f():\n    return getattr\n",
            "def f():\n    import subprocess\n",
            "def f():\n    import json\n    return json.__dict__\n",
            "def f():\n    return (1).__class__.__bases__\n",
            "def f():\n    return '{0.__class__}'.format(1)\n",
            "def f():\n    from json import __loader__\n",
        ] {
            let failure = call(src, "f", json!({})).unwrap_err();
            assert_eq!(failure.error.kind, ErrorKind::Violation, "{src}");
        }
    }

    #[test]
    fn test_output_kept_on_failure() {
        let src = "def f():\n    print('before')\n    raise RuntimeError('boom')\n";
        let failure = call(src, "f", json!({})).unwrap_err();
        assert_eq!(failure.output, "before\n");
        assert_eq!(failure.error.message, "RuntimeError: boom");
    }

    #[test]
    fn test_deep_recursion_is_bounded() {
        let src = "def f(n):\n    return 0 if n == 0 else 1 + f(n - 1)\n";
        assert_eq!(ok(src, "f", json!({"n": 150})), json!(150));
        let failure = call(src, "f", json!({"n": 5000})).unwrap_err();
        assert!(failure.error.message.starts_with("RecursionError"));
    }

    #[test]
    fn test_deeply_nested_values_are_freed() {
        let src = r#"
def f(n):
    a = []
    t = ()
    d = {}
    for i in range(n):
        a = [a]
        t = (t,)
        d = {"next": d}
    return len(a) + len(t) + len(d)
"#;
        assert_eq!(ok(src, "f", json!({"n": 300000})), json!(3));
    }

    #[test]
    fn test_deeply_nested_values_are_bounded_elsewhere() {
        let build = "def f(n):\n    a = []\n    t = ()\n    for i in range(n):\n        a = [a]\n        t = (t,)\n";

        let src = format!("{build}    text = str(a)\n    return [isinstance(a == [a], bool), text.endswith(']'), len(text) < 1000]\n");
        assert_eq!(ok(&src, "f", json!({"n": 100000})), json!([true, true, true]));

        let src = format!("{build}    return {{t: 1}}\n");
        let failure = call(&src, "f", json!({"n": 100000})).unwrap_err();
        assert_eq!(failure.error.kind, ErrorKind::Raised);
        assert!(failure.error.message.starts_with("RecursionError"), "{}", failure.error);

        let src = format!("{build}    return sorted([a, [a]])\n");
        let failure = call(&src, "f", json!({"n": 100000})).unwrap_err();
        assert!(failure.error.message.starts_with("RecursionError"), "{}", failure.error);
    }

    #[test]
    fn test_integer_and_float_edges() {
        let src = "def f():\n    return len(range(-9223372036854775807 - 1, 9223372036854775807))\n";
        let failure = call(src, "f", json!({})).unwrap_err();
        assert_eq!(failure.error.kind, ErrorKind::Raised);
        assert!(failure.error.message.starts_with("OverflowError"));
        assert_eq!(
            ok("def f():\n    return len(range(0, 9223372036854775807))\n", "f", json!({})),
            json!(i64::MAX)
        );

        let src = "def f():\n    return [round(1e308, -400), round(123.456, -1000), round(float('inf'), -400)]\n";
        let failure = call(src, "f", json!({})).unwrap_err();
        assert!(failure.error.message.contains("not JSON compliant"));
        let src = "def f():\n    return [round(1e308, -400), round(-123.456, -1000)]\n";
        assert_eq!(ok(src, "f", json!({})), json!([0.0, 0.0]));
    }

    #[test]
    fn test_non_json_result_is_an_error() {
        let failure = call("def f():\n    return len\n", "f", json!({})).unwrap_err();
        assert!(failure.error.message.contains("not JSON serializable"));
        let failure = call("def f():\n    return float('nan')\n", "f", json!({})).unwrap_err();
        assert!(failure.error.message.contains("not JSON compliant"));
    }

    #[test]
    fn test_fresh_state_per_run() {
        let src = "cache = []\ndef f(x):\n    cache.append(x)\n    return len(cache)\n";
        assert_eq!(ok(src, "f", json!({"x": 1})), json!(1));
        assert_eq!(ok(src, "f", json!({"x": 2})), json!(1));
    }
}
