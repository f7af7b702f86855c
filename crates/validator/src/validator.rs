use std::collections::HashSet;
use std::sync::Arc;
use toolsmith_core::{Location, ParamSpec, ValidationVerdict, Violation};
use toolsmith_policy::{rules, PolicyError, ValidatorPolicy};
use toolsmith_script::ast::Module;
use tracing::debug;

use crate::lexical::LexicalScanner;
use crate::structural;

/// Static gate every piece of tool source passes before it may run.
///
/// Validation is pure: the same source under the same policy version always
/// yields the same verdict, violations included.
pub struct Validator {
    policy: Arc<ValidatorPolicy>,
    lexical: LexicalScanner,
}

impl Validator {
    pub fn new(policy: Arc<ValidatorPolicy>) -> Result<Self, PolicyError> {
        let lexical = LexicalScanner::new(&policy)?;
        Ok(Self { policy, lexical })
    }

    pub fn policy(&self) -> &Arc<ValidatorPolicy> {
        &self.policy
    }

    /// Lexical matches first, then structural findings in walk order.
    pub fn validate(&self, source: &str) -> ValidationVerdict {
        self.run(source, |_, _| {})
    }

    /// As [`validate`](Self::validate), and additionally require a
    /// top-level `def entry_point` whose signature can take the schema.
    pub fn validate_tool(
        &self,
        source: &str,
        entry_point: &str,
        parameter_schema: &[ParamSpec],
    ) -> ValidationVerdict {
        self.run(source, |module, out| {
            check_entry_point(module, entry_point, parameter_schema, out)
        })
    }

    fn run(&self, source: &str, extra: impl FnOnce(&Module, &mut Vec<Violation>)) -> ValidationVerdict {
        let version = self.policy.version;
        if source.len() > self.policy.max_source_bytes {
            debug!(
                bytes = source.len(),
                limit = self.policy.max_source_bytes,
                "Source rejected before scanning"
            );
            return ValidationVerdict::from_violations(
                version,
                vec![Violation::new(
                    rules::SOURCE_TOO_LARGE,
                    Location::default(),
                    format!(
                        "source is {} bytes, limit is {}",
                        source.len(),
                        self.policy.max_source_bytes
                    ),
                )],
            );
        }

        let mut violations = self.lexical.scan(source);
        match toolsmith_script::parse(source) {
            Ok(module) => {
                structural::check(&self.policy, &module, &mut violations);
                extra(&module, &mut violations);
            }
            Err(e) => violations.push(Violation::new(
                rules::MALFORMED_SOURCE,
                e.location,
                e.message,
            )),
        }

        let verdict = ValidationVerdict::from_violations(version, violations);
        debug!(
            accepted = verdict.accepted(),
            violations = verdict.violations().len(),
            policy_version = version,
            "Validated source"
        );
        verdict
    }
}

fn check_entry_point(
    module: &Module,
    entry_point: &str,
    schema: &[ParamSpec],
    out: &mut Vec<Violation>,
) {
    let Some(def) = module.function(entry_point) else {
        out.push(Violation::new(
            rules::ENTRY_POINT,
            Location::default(),
            format!("no top-level function named `{entry_point}`"),
        ));
        return;
    };

    let signature: HashSet<&str> = def.params.iter().map(|p| p.name.as_str()).collect();
    for param in schema.iter().filter(|p| p.required) {
        if !signature.contains(param.name.as_str()) {
            out.push(Violation::new(
                rules::ENTRY_POINT,
                def.loc,
                format!(
                    "required parameter `{}` is missing from `{entry_point}`",
                    param.name
                ),
            ));
        }
    }

    let declared: HashSet<&str> = schema.iter().map(|p| p.name.as_str()).collect();
    for param in def.params.iter().filter(|p| p.default.is_none()) {
        if !declared.contains(param.name.as_str()) {
            out.push(Violation::new(
                rules::ENTRY_POINT,
                param.loc,
                format!(
                    "parameter `{}` has no default and is not in the schema",
                    param.name
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolsmith_core::ParamType;

    fn validator() -> Validator {
        Validator::new(Arc::new(ValidatorPolicy::default())).unwrap()
    }

    #[test]
    fn test_accepts_clean_source() {
        let verdict = validator().validate("def add(a, b):\n    return a + b\n");
        assert!(verdict.accepted());
        assert_eq!(verdict.policy_version(), 1);
    }

    #[test]
    fn test_malformed_source_still_scanned() {
        let verdict = validator().validate("def f(:\n    open('x')\n");
        assert!(verdict.has_rule("file_io"));
        assert!(verdict.has_rule(rules::MALFORMED_SOURCE));
        assert_eq!(verdict.violations().last().unwrap().rule_id, rules::MALFORMED_SOURCE);
    }

    #[test]
    fn test_source_too_large_short_circuits() {
        let policy = ValidatorPolicy {
            max_source_bytes: 16,
            ..ValidatorPolicy::default()
        };
        let validator = Validator::new(Arc::new(policy)).unwrap();
        let verdict = validator.validate("def f():\n    return open('x')\n");
        assert_eq!(verdict.violations().len(), 1);
        assert!(verdict.has_rule(rules::SOURCE_TOO_LARGE));
    }

    #[test]
    fn test_entry_point_checks() {
        let v = validator();
        let schema = vec![
            ParamSpec::required("a", ParamType::Integer),
            ParamSpec::optional("b", ParamType::Integer),
        ];

        assert!(v.validate_tool("def f(a, b=1):\n    return a\n", "f", &schema).accepted());

        let missing = v.validate_tool("def g(a):\n    return a\n", "f", &schema);
        assert!(missing.has_rule(rules::ENTRY_POINT));

        let nested = v.validate_tool("def outer():\n    def f(a):\n        return a\n", "f", &schema);
        assert!(nested.has_rule(rules::ENTRY_POINT));

        let lacks_param = v.validate_tool("def f(b=2):\n    return b\n", "f", &schema);
        assert_eq!(lacks_param.violations().len(), 1);

        let extra_required = v.validate_tool("def f(a, c):\n    return a\n", "f", &schema);
        assert!(extra_required.violations()[0].message.contains("`c`"));
    }

    #[test]
    fn test_lexical_before_structural() {
        let verdict = validator().validate("import os\nx = eval('1')\n");
        let ids: Vec<_> = verdict.violations().iter().map(|v| v.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["dynamic_exec", "import_not_allowed", "dynamic_exec"]);
    }
}
