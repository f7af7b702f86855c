//! Syntax-tree walk for checks the raw-text scan cannot express: imports,
//! aliasing, rebinding and closures.

use std::collections::HashSet;
use toolsmith_core::{Location, Violation};
use toolsmith_policy::{rules, ValidatorPolicy};
use toolsmith_script::ast::{
    Alias, Comprehension, Expr, ExprKind, FunctionDef, Module, Stmt, StmtKind, Target,
};

/// Walk `module` in source order and append every finding to `out`.
pub fn check(policy: &ValidatorPolicy, module: &Module, out: &mut Vec<Violation>) {
    let mut walker = Walker {
        policy,
        out,
        modules: HashSet::new(),
        frames: Vec::new(),
    };
    walker.block(&module.body);
}

/// Names bound inside one function body.
struct Frame {
    locals: HashSet<String>,
}

struct Walker<'a> {
    policy: &'a ValidatorPolicy,
    out: &'a mut Vec<Violation>,
    /// Names bound by `import`; rebinding them is refused.
    modules: HashSet<String>,
    frames: Vec<Frame>,
}

impl Walker<'_> {
    fn report(&mut self, rule_id: &str, loc: Location, message: String) {
        self.out.push(Violation::new(rule_id, loc, message));
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                self.bind(&def.name, def.loc);
                self.function(def);
            }
            StmtKind::Return(value) | StmtKind::Raise(value) => {
                if let Some(expr) = value {
                    self.expr(expr);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::While { test, body } => {
                self.expr(test);
                self.block(body);
            }
            StmtKind::For { target, iter, body } => {
                self.expr(iter);
                self.store(target);
                self.block(body);
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
            StmtKind::Assert { test, msg } => {
                self.expr(test);
                if let Some(msg) = msg {
                    self.expr(msg);
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.store(target);
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.import(alias, stmt.loc);
                }
            }
            StmtKind::ImportFrom { module, names } => self.import_from(module, names, stmt.loc),
            StmtKind::Assign { targets, value } => {
                self.expr(value);
                for target in targets {
                    self.store(target);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(value);
                self.store(target);
            }
            StmtKind::Expr(expr) => self.expr(expr),
        }
    }

    fn import(&mut self, alias: &Alias, stmt_loc: Location) {
        let loc = located(alias.loc, stmt_loc);
        if !self.policy.is_module_allowed(&alias.name) {
            self.report(
                rules::IMPORT_NOT_ALLOWED,
                loc,
                format!("import of module `{}` is not allowed", alias.name),
            );
            return;
        }
        let bound = alias.bound_name().to_string();
        if self.policy.is_reserved(&bound) {
            self.report(
                rules::RESERVED_REBIND,
                loc,
                format!("import may not bind reserved name `{bound}`"),
            );
            return;
        }
        self.declare(&bound);
        self.modules.insert(bound);
    }

    fn import_from(&mut self, module: &str, names: &[Alias], stmt_loc: Location) {
        if !self.policy.is_module_allowed(module) {
            self.report(
                rules::IMPORT_NOT_ALLOWED,
                stmt_loc,
                format!("import from module `{module}` is not allowed"),
            );
            return;
        }
        for alias in names {
            let loc = located(alias.loc, stmt_loc);
            if let Some(cap) = self.policy.denied_attribute(&alias.name) {
                self.report(
                    cap.rule_id(),
                    loc,
                    format!(
                        "import of `{module}.{}` is not permitted ({})",
                        alias.name,
                        cap.describe()
                    ),
                );
                continue;
            }
            let bound = alias.bound_name().to_string();
            self.bind(&bound, loc);
        }
    }

    fn function(&mut self, def: &FunctionDef) {
        for param in &def.params {
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }
        for param in &def.params {
            self.bind(&param.name, param.loc);
        }

        let mut locals: HashSet<String> = def.params.iter().map(|p| p.name.clone()).collect();
        collect_locals(&def.body, &mut locals);
        self.frames.push(Frame { locals });
        self.block(&def.body);
        self.frames.pop();
    }

    /// A name being bound by assignment, `def`, `for`, parameters or imports.
    fn bind(&mut self, name: &str, loc: Location) {
        if self.policy.is_reserved(name) {
            self.report(
                rules::RESERVED_REBIND,
                loc,
                format!("reserved name `{name}` may not be rebound"),
            );
        } else if self.modules.contains(name) {
            self.report(
                rules::RESERVED_REBIND,
                loc,
                format!("module `{name}` may not be rebound"),
            );
        }
        self.declare(name);
    }

    fn declare(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.locals.insert(name.to_string());
        }
    }

    fn store(&mut self, target: &Target) {
        match target {
            Target::Name(name, loc) => self.bind(name, *loc),
            Target::Tuple(items, _) => {
                for item in items {
                    self.store(item);
                }
            }
            Target::Subscript { value, index, .. } => {
                self.expr(value);
                self.expr(index);
            }
            Target::Attribute { value, attr, loc } => {
                self.expr(value);
                if let ExprKind::Name(name) = &value.kind {
                    if self.modules.contains(name) {
                        self.report(
                            rules::RESERVED_REBIND,
                            *loc,
                            format!("module `{name}` may not be modified"),
                        );
                    }
                }
                self.attribute(attr, *loc);
            }
        }
    }

    fn attribute(&mut self, attr: &str, loc: Location) {
        if let Some(cap) = self.policy.denied_attribute(attr) {
            self.report(
                cap.rule_id(),
                loc,
                format!("access to attribute `{attr}` is not permitted ({})", cap.describe()),
            );
        }
    }

    fn name(&mut self, name: &str, loc: Location) {
        let denied = self.policy.denied_name(name);
        if let Some(cap) = denied {
            self.report(
                cap.rule_id(),
                loc,
                format!("use of `{name}` is not permitted ({})", cap.describe()),
            );
        }

        let nested = self.frames.len() >= 2;
        let local = self
            .frames
            .last()
            .map(|f| f.locals.contains(name))
            .unwrap_or(false);
        if nested && !local && (denied.is_some() || self.policy.is_reserved(name)) {
            self.report(
                rules::CLOSURE_CAPTURE,
                loc,
                format!("nested function closes over disallowed name `{name}`"),
            );
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Name(name) => self.name(name, expr.loc),
            ExprKind::Attribute { value, attr } => {
                self.expr(value);
                self.attribute(attr, expr.loc);
            }
            ExprKind::Lambda(def) => self.function(def),
            ExprKind::ListComp { elt, generators } => {
                self.generators(generators);
                self.expr(elt);
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.generators(generators);
                self.expr(key);
                self.expr(value);
            }
            _ => {
                for child in expr.children() {
                    self.expr(child);
                }
            }
        }
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for gen in generators {
            self.expr(&gen.iter);
            self.store(&gen.target);
            for cond in &gen.ifs {
                self.expr(cond);
            }
        }
    }
}

fn located(alias: Location, stmt: Location) -> Location {
    if alias == Location::default() {
        stmt
    } else {
        alias
    }
}

/// Names a function body binds, not descending into nested functions.
fn collect_locals(body: &[Stmt], into: &mut HashSet<String>) {
    let mut names = Vec::new();
    for stmt in body {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => {
                into.insert(def.name.clone());
            }
            StmtKind::For { target, body, .. } => {
                target.bound_names(&mut names);
                collect_locals(body, into);
            }
            StmtKind::If { body, orelse, .. } => {
                collect_locals(body, into);
                collect_locals(orelse, into);
            }
            StmtKind::While { body, .. } => collect_locals(body, into),
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    target.bound_names(&mut names);
                }
            }
            StmtKind::AugAssign { target, .. } => target.bound_names(&mut names),
            StmtKind::Import(aliases) | StmtKind::ImportFrom { names: aliases, .. } => {
                into.extend(aliases.iter().map(|a| a.bound_name().to_string()));
            }
            _ => {}
        }
    }
    into.extend(names.into_iter().map(|(name, _)| name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolsmith_script::parse;

    fn rules_for(source: &str) -> Vec<String> {
        let module = parse(source).unwrap();
        let mut out = Vec::new();
        check(&ValidatorPolicy::default(), &module, &mut out);
        out.into_iter().map(|v| v.rule_id).collect()
    }

    #[test]
    fn test_clean_tool_has_no_findings() {
        let src = "import math\nfrom collections import Counter\n\ndef f(xs):\n    c = Counter(xs)\n    return [math.sqrt(v) for v in c.values()]\n";
        assert!(rules_for(src).is_empty());
    }

    #[test]
    fn test_disallowed_import() {
        assert_eq!(rules_for("import os\n"), vec!["import_not_allowed"]);
        assert_eq!(rules_for("from os import path\n"), vec!["import_not_allowed"]);
        assert_eq!(rules_for("import os.path as p\n"), vec!["import_not_allowed"]);
    }

    #[test]
    fn test_denied_name_through_alias() {
        assert_eq!(rules_for("f = open\n"), vec!["file_io"]);
        assert_eq!(rules_for("from json import load as l\n"), vec!["file_io"]);
        assert_eq!(rules_for("import json as j\nx = j.dump\n"), vec!["file_io"]);
    }

    #[test]
    fn test_dunder_attribute_is_reflection() {
        assert_eq!(rules_for("x = (1).__class__\n"), vec!["reflection"]);
    }

    #[test]
    fn test_reserved_and_module_rebinding() {
        assert_eq!(rules_for("__name__ = 'x'\n"), vec!["reserved_rebind"]);
        assert_eq!(rules_for("import json\njson = 3\n"), vec!["reserved_rebind"]);
        assert_eq!(rules_for("import math\nmath.pi = 3\n"), vec!["reserved_rebind"]);
        assert_eq!(
            rules_for("import math\ndef f(math):\n    return math\n"),
            vec!["reserved_rebind"]
        );
    }

    #[test]
    fn test_nested_function_capturing_denied_name() {
        let src = "def outer():\n    def inner():\n        return eval\n    return inner\n";
        assert_eq!(rules_for(src), vec!["dynamic_exec", "closure_capture"]);

        let lambda = "def outer():\n    return lambda: open\n";
        assert_eq!(rules_for(lambda), vec!["file_io", "closure_capture"]);
    }

    #[test]
    fn test_top_level_function_is_not_a_capture() {
        assert_eq!(rules_for("def f():\n    return eval\n"), vec!["dynamic_exec"]);
    }
}
