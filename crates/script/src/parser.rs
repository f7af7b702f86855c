//! Recursive-descent parser producing [`Module`] trees.
//!
//! Anything outside the supported subset (classes, exception handlers,
//! context managers, generators, decorators) is reported as a parse error so
//! that callers never see a partial tree.

use std::rc::Rc;
use toolsmith_core::Location;

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, Token, TokenKind};

/// Maximum height of any expression tree.
pub const MAX_EXPR_DEPTH: u32 = 100;
/// Maximum recursion through parenthesised or prefixed sub-expressions.
pub const MAX_NESTING: usize = 50;
/// Maximum nesting of indented blocks.
pub const MAX_BLOCK_DEPTH: usize = 20;

type PResult<T> = Result<T, ParseError>;

pub fn parse(source: &str) -> PResult<Module> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).module()
}

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "class", "try", "except", "finally", "with", "global", "nonlocal", "yield", "async",
    "await",
];

const AUG_OPS: &[(&str, BinOp)] = &[
    ("+=", BinOp::Add),
    ("-=", BinOp::Sub),
    ("*=", BinOp::Mul),
    ("/=", BinOp::Div),
    ("//=", BinOp::FloorDiv),
    ("%=", BinOp::Mod),
    ("**=", BinOp::Pow),
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    blocks: usize,
    loops: usize,
    functions: usize,
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Name(name) => format!("name '{name}'"),
        TokenKind::Keyword(kw) => format!("'{kw}'"),
        TokenKind::Int(_) | TokenKind::Float(_) => "number".to_string(),
        TokenKind::Str(_) => "string".to_string(),
        TokenKind::Op(op) => format!("'{op}'"),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Indent => "indent".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}

fn to_target(expr: Expr) -> PResult<Target> {
    let loc = expr.loc;
    match expr.kind {
        ExprKind::Name(name) => Ok(Target::Name(name, loc)),
        ExprKind::Subscript { value, index } => Ok(Target::Subscript {
            value: *value,
            index: *index,
            loc,
        }),
        ExprKind::Attribute { value, attr } => Ok(Target::Attribute {
            value: *value,
            attr,
            loc,
        }),
        ExprKind::Tuple(items) | ExprKind::List(items) => items
            .into_iter()
            .map(to_target)
            .collect::<PResult<Vec<_>>>()
            .map(|targets| Target::Tuple(targets, loc)),
        _ => Err(ParseError::new("cannot assign to expression", loc)),
    }
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            blocks: 0,
            loops: 0,
            functions: 0,
        }
    }

    // The lexer always terminates the stream with `Eof`, and `advance` never
    // moves past it.
    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + ahead).map(|t| &t.kind)
    }

    fn loc(&self) -> Location {
        self.current().loc
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), TokenKind::Op(o) if *o == op)
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let hit = self.is_op(op);
        if hit {
            self.advance();
        }
        hit
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        let hit = self.is_kw(kw);
        if hit {
            self.advance();
        }
        hit
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.loc())
    }

    fn unexpected(&self) -> ParseError {
        self.error_here(format!("unexpected {}", describe(self.peek())))
    }

    fn expect_op(&mut self, op: &str) -> PResult<Location> {
        if self.is_op(op) {
            Ok(self.advance().loc)
        } else {
            Err(self.error_here(format!(
                "expected '{op}', found {}",
                describe(self.peek())
            )))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<Location> {
        if self.is_kw(kw) {
            Ok(self.advance().loc)
        } else {
            Err(self.error_here(format!(
                "expected '{kw}', found {}",
                describe(self.peek())
            )))
        }
    }

    fn expect_name(&mut self) -> PResult<(String, Location)> {
        match self.peek() {
            TokenKind::Name(name) => {
                let name = name.clone();
                let loc = self.advance().loc;
                Ok((name, loc))
            }
            other => Err(self.error_here(format!("expected a name, found {}", describe(other)))),
        }
    }

    fn expect_newline(&mut self) -> PResult<()> {
        match self.peek() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) || self.is_op(";")
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            TokenKind::Name(_) | TokenKind::Int(_) | TokenKind::Float(_) | TokenKind::Str(_) => {
                true
            }
            TokenKind::Keyword(kw) => matches!(*kw, "None" | "True" | "False" | "not" | "lambda"),
            TokenKind::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    fn make(&self, kind: ExprKind, loc: Location) -> PResult<Expr> {
        let expr = Expr::new(kind, loc);
        if expr.depth > MAX_EXPR_DEPTH {
            return Err(ParseError::new("expression nested too deeply", loc));
        }
        Ok(expr)
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error_here("expression nested too deeply"));
        }
        let out = parse(self);
        self.nesting -= 1;
        out
    }

    // ---- statements -------------------------------------------------------

    fn module(mut self) -> PResult<Module> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        Ok(Module { body })
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        match self.peek() {
            TokenKind::Keyword("def") => Ok(vec![self.function_def()?]),
            TokenKind::Keyword("if") => Ok(vec![self.if_statement()?]),
            TokenKind::Keyword("while") => Ok(vec![self.while_statement()?]),
            TokenKind::Keyword("for") => Ok(vec![self.for_statement()?]),
            TokenKind::Keyword(kw) if UNSUPPORTED_KEYWORDS.contains(kw) => {
                Err(self.error_here(format!("'{kw}' statements are not supported")))
            }
            TokenKind::Op("@") => Err(self.error_here("decorators are not supported")),
            TokenKind::Indent => Err(self.error_here("unexpected indent")),
            _ => self.simple_statements(),
        }
    }

    fn simple_statements(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn small_statement(&mut self) -> PResult<Stmt> {
        let loc = self.loc();
        let kind = match self.peek() {
            TokenKind::Keyword("return") => {
                if self.functions == 0 {
                    return Err(self.error_here("'return' outside function"));
                }
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.testlist()?)
                };
                StmtKind::Return(value)
            }
            TokenKind::Keyword("pass") => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Keyword("break") => {
                if self.loops == 0 {
                    return Err(self.error_here("'break' outside loop"));
                }
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword("continue") => {
                if self.loops == 0 {
                    return Err(self.error_here("'continue' not properly in loop"));
                }
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword("raise") => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expression()?)
                };
                if self.is_kw("from") {
                    return Err(self.error_here("'raise ... from' is not supported"));
                }
                StmtKind::Raise(value)
            }
            TokenKind::Keyword("assert") => {
                self.advance();
                let test = self.expression()?;
                let msg = if self.eat_op(",") {
                    Some(self.expression()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Keyword("del") => {
                self.advance();
                let targets = match to_target(self.testlist()?)? {
                    Target::Tuple(items, _) => items,
                    target => vec![target],
                };
                StmtKind::Delete(targets)
            }
            TokenKind::Keyword("import") => self.import()?,
            TokenKind::Keyword("from") => self.import_from()?,
            _ => self.expression_statement()?,
        };
        Ok(Stmt { kind, loc })
    }

    fn expression_statement(&mut self) -> PResult<StmtKind> {
        let first = self.testlist()?;

        if self.is_op("=") {
            let mut targets = Vec::new();
            let mut value = first;
            while self.eat_op("=") {
                targets.push(to_target(value)?);
                value = self.testlist()?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        let aug = AUG_OPS.iter().find(|(sym, _)| self.is_op(sym)).map(|(_, op)| *op);
        if let Some(op) = aug {
            self.advance();
            let target = to_target(first)?;
            if matches!(target, Target::Tuple(..)) {
                return Err(ParseError::new(
                    "illegal expression for augmented assignment",
                    target.loc(),
                ));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.is_op(":") {
            return Err(self.error_here("variable annotations are not supported"));
        }
        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> PResult<(String, Location)> {
        let (mut name, loc) = self.expect_name()?;
        while self.eat_op(".") {
            let (part, _) = self.expect_name()?;
            name.push('.');
            name.push_str(&part);
        }
        Ok((name, loc))
    }

    fn alias_suffix(&mut self) -> PResult<Option<String>> {
        if self.eat_kw("as") {
            Ok(Some(self.expect_name()?.0))
        } else {
            Ok(None)
        }
    }

    fn import(&mut self) -> PResult<StmtKind> {
        self.expect_kw("import")?;
        let mut names = Vec::new();
        loop {
            let (name, loc) = self.dotted_name()?;
            let asname = self.alias_suffix()?;
            names.push(Alias { name, asname, loc });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn import_from(&mut self) -> PResult<StmtKind> {
        self.expect_kw("from")?;
        if self.is_op(".") {
            return Err(self.error_here("relative imports are not supported"));
        }
        let (module, _) = self.dotted_name()?;
        self.expect_kw("import")?;
        if self.is_op("*") {
            return Err(self.error_here("wildcard imports are not supported"));
        }

        let parenthesized = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            let (name, loc) = self.expect_name()?;
            let asname = self.alias_suffix()?;
            names.push(Alias { name, asname, loc });
            if !self.eat_op(",") || (parenthesized && self.is_op(")")) {
                break;
            }
        }
        if parenthesized {
            self.expect_op(")")?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parameters(&mut self, close: &str, annotations: bool) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.is_op(close) {
            if self.is_op("*") || self.is_op("**") || self.is_op("/") {
                return Err(self.error_here("variadic parameters are not supported"));
            }
            let (name, loc) = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(ParseError::new(
                    format!("duplicate argument '{name}' in function definition"),
                    loc,
                ));
            }
            if annotations && self.eat_op(":") {
                self.expression()?;
            }
            let default = if self.eat_op("=") {
                Some(self.expression()?)
            } else {
                None
            };
            if default.is_none() && params.last().is_some_and(|p| p.default.is_some()) {
                return Err(ParseError::new(
                    "non-default argument follows default argument",
                    loc,
                ));
            }
            params.push(Param { name, default, loc });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn function_body<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let saved_loops = std::mem::replace(&mut self.loops, 0);
        self.functions += 1;
        let body = parse(self)?;
        self.functions -= 1;
        self.loops = saved_loops;
        Ok(body)
    }

    fn function_def(&mut self) -> PResult<Stmt> {
        let loc = self.expect_kw("def")?;
        let (name, _) = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parameters(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expression()?;
        }
        self.expect_op(":")?;
        let body = self.function_body(|p| p.suite())?;

        let def = FunctionDef {
            name,
            params,
            body,
            loc,
        };
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(def)),
            loc,
        })
    }

    fn suite(&mut self) -> PResult<Vec<Stmt>> {
        if !matches!(self.peek(), TokenKind::Newline) {
            return self.simple_statements();
        }
        self.advance();
        if !matches!(self.peek(), TokenKind::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        self.advance();

        self.blocks += 1;
        if self.blocks > MAX_BLOCK_DEPTH {
            return Err(self.error_here("too many statically nested blocks"));
        }

        let mut body = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => body.extend(self.statement()?),
            }
        }
        self.blocks -= 1;
        Ok(body)
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        // Entered on either `if` or `elif`.
        let loc = self.advance().loc;
        let test = self.expression()?;
        self.expect_op(":")?;
        let body = self.suite()?;

        let orelse = if self.is_kw("elif") {
            vec![self.if_statement()?]
        } else if self.eat_kw("else") {
            self.expect_op(":")?;
            self.suite()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            loc,
        })
    }

    fn loop_body(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        self.loops += 1;
        let body = self.suite()?;
        self.loops -= 1;
        if self.is_kw("else") {
            return Err(self.error_here("loop 'else' clauses are not supported"));
        }
        Ok(body)
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        let loc = self.expect_kw("while")?;
        let test = self.expression()?;
        let body = self.loop_body()?;
        Ok(Stmt {
            kind: StmtKind::While { test, body },
            loc,
        })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        let loc = self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.loop_body()?;
        Ok(Stmt {
            kind: StmtKind::For { target, iter, body },
            loc,
        })
    }

    /// Loop and comprehension targets stop short of comparisons so that the
    /// following `in` is left for the caller.
    fn target_list(&mut self) -> PResult<Target> {
        let loc = self.loc();
        let first = self.postfix()?;
        if !self.is_op(",") {
            return to_target(first);
        }
        let mut items = vec![to_target(first)?];
        while self.eat_op(",") {
            if self.is_kw("in") {
                break;
            }
            items.push(to_target(self.postfix()?)?);
        }
        Ok(Target::Tuple(items, loc))
    }

    // ---- expressions ------------------------------------------------------

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// forms a tuple.
    fn testlist(&mut self) -> PResult<Expr> {
        let loc = self.loc();
        let first = self.expression()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            items.push(self.expression()?);
        }
        self.make(ExprKind::Tuple(items), loc)
    }

    fn expression(&mut self) -> PResult<Expr> {
        self.nested(|p| p.conditional())
    }

    fn conditional(&mut self) -> PResult<Expr> {
        if self.is_kw("lambda") {
            return self.lambda();
        }
        let loc = self.loc();
        let body = self.or_test()?;
        if !self.eat_kw("if") {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.expect_kw("else")?;
        let orelse = self.expression()?;
        self.make(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            loc,
        )
    }

    fn lambda(&mut self) -> PResult<Expr> {
        let loc = self.expect_kw("lambda")?;
        let params = self.parameters(":", false)?;
        self.expect_op(":")?;
        let body = self.function_body(|p| p.expression())?;
        let def = FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt {
                kind: StmtKind::Return(Some(body)),
                loc,
            }],
            loc,
        };
        self.make(ExprKind::Lambda(Rc::new(def)), loc)
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let loc = self.loc();
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = self.make(ExprKind::Or(Box::new(left), Box::new(right)), loc)?;
        }
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let loc = self.loc();
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = self.make(ExprKind::And(Box::new(left), Box::new(right)), loc)?;
        }
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if !self.is_kw("not") {
            return self.comparison();
        }
        let loc = self.advance().loc;
        let operand = self.nested(|p| p.not_test())?;
        self.make(
            ExprKind::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
            loc,
        )
    }

    /// Comparison operator at the cursor and how many tokens it spans.
    fn comparison_op(&self) -> Option<(CmpOp, usize)> {
        let next_is = |kw: &str| matches!(self.peek_at(1), Some(TokenKind::Keyword(k)) if *k == kw);
        match self.peek() {
            TokenKind::Op("==") => Some((CmpOp::Eq, 1)),
            TokenKind::Op("!=") => Some((CmpOp::NotEq, 1)),
            TokenKind::Op("<") => Some((CmpOp::Lt, 1)),
            TokenKind::Op("<=") => Some((CmpOp::LtE, 1)),
            TokenKind::Op(">") => Some((CmpOp::Gt, 1)),
            TokenKind::Op(">=") => Some((CmpOp::GtE, 1)),
            TokenKind::Keyword("in") => Some((CmpOp::In, 1)),
            TokenKind::Keyword("not") if next_is("in") => Some((CmpOp::NotIn, 2)),
            TokenKind::Keyword("is") if next_is("not") => Some((CmpOp::IsNot, 2)),
            TokenKind::Keyword("is") => Some((CmpOp::Is, 1)),
            _ => None,
        }
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let loc = self.loc();
        let left = self.arith()?;
        let mut ops = Vec::new();
        while let Some((op, width)) = self.comparison_op() {
            for _ in 0..width {
                self.advance();
            }
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        self.make(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            loc,
        )
    }

    fn binary_op(&self, table: &[(&str, BinOp)]) -> Option<BinOp> {
        table
            .iter()
            .find(|(sym, _)| self.is_op(sym))
            .map(|(_, op)| *op)
    }

    fn arith(&mut self) -> PResult<Expr> {
        const OPS: &[(&str, BinOp)] = &[("+", BinOp::Add), ("-", BinOp::Sub)];
        let loc = self.loc();
        let mut left = self.term()?;
        while let Some(op) = self.binary_op(OPS) {
            self.advance();
            let right = self.term()?;
            left = self.make(
                ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc,
            )?;
        }
        Ok(left)
    }

    fn term(&mut self) -> PResult<Expr> {
        const OPS: &[(&str, BinOp)] = &[
            ("*", BinOp::Mul),
            ("/", BinOp::Div),
            ("//", BinOp::FloorDiv),
            ("%", BinOp::Mod),
        ];
        let loc = self.loc();
        let mut left = self.factor()?;
        while let Some(op) = self.binary_op(OPS) {
            self.advance();
            let right = self.factor()?;
            left = self.make(
                ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                loc,
            )?;
        }
        if self.is_op("@") {
            return Err(self.error_here("matrix multiplication is not supported"));
        }
        Ok(left)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            TokenKind::Op("-") => UnaryOp::Neg,
            TokenKind::Op("+") => UnaryOp::Pos,
            TokenKind::Op("~") => return Err(self.error_here("bitwise operators are not supported")),
            _ => return self.power(),
        };
        let loc = self.advance().loc;
        let operand = self.nested(|p| p.factor())?;
        self.make(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            loc,
        )
    }

    fn power(&mut self) -> PResult<Expr> {
        let loc = self.loc();
        let base = self.postfix()?;
        if !self.eat_op("**") {
            return Ok(base);
        }
        let exponent = self.nested(|p| p.factor())?;
        self.make(
            ExprKind::BinOp {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            },
            loc,
        )
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            let loc = expr.loc;
            if self.eat_op("(") {
                expr = self.call(expr)?;
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = self.make(
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    },
                    loc,
                )?;
            } else if self.eat_op(".") {
                let (attr, _) = self.expect_name()?;
                expr = self.make(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    loc,
                )?;
            } else {
                break;
            }
        }
        if matches!(self.peek(), TokenKind::Op("&" | "|" | "^" | "<<" | ">>")) {
            return Err(self.error_here("bitwise operators are not supported"));
        }
        Ok(expr)
    }

    /// `NAME =` at the cursor inside a call's argument list.
    fn keyword_argument(&self) -> Option<String> {
        match (self.peek(), self.peek_at(1)) {
            (TokenKind::Name(name), Some(TokenKind::Op("="))) => Some(name.clone()),
            _ => None,
        }
    }

    fn call(&mut self, func: Expr) -> PResult<Expr> {
        let loc = func.loc;
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        while !self.is_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error_here("argument unpacking is not supported"));
            }
            if let Some(name) = self.keyword_argument() {
                let kw_loc = self.loc();
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(ParseError::new(
                        format!("keyword argument repeated: {name}"),
                        kw_loc,
                    ));
                }
                let value = self.expression()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error_here("positional argument follows keyword argument"));
                }
                let arg_loc = self.loc();
                let arg = self.expression()?;
                if self.is_kw("for") {
                    let generator = self.comprehension(arg, arg_loc)?;
                    if !args.is_empty() || !self.is_op(")") {
                        return Err(ParseError::new(
                            "generator expression must be parenthesized",
                            arg_loc,
                        ));
                    }
                    args.push(generator);
                    break;
                }
                args.push(arg);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        self.make(
            ExprKind::Call {
                func: Box::new(func),
                args,
                kwargs,
            },
            loc,
        )
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let loc = self.loc();
        let lower = if self.is_op(":") {
            None
        } else {
            let index = self.expression()?;
            if !self.is_op(":") {
                if !self.is_op(",") {
                    return Ok(index);
                }
                let mut items = vec![index];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                return self.make(ExprKind::Tuple(items), loc);
            }
            Some(Box::new(index))
        };

        self.expect_op(":")?;
        let upper = if self.is_op(":") || self.is_op("]") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        let step = if self.eat_op(":") && !self.is_op("]") {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        self.make(ExprKind::Slice { lower, upper, step }, loc)
    }

    fn generators(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn comprehension(&mut self, elt: Expr, loc: Location) -> PResult<Expr> {
        let generators = self.generators()?;
        self.make(
            ExprKind::ListComp {
                elt: Box::new(elt),
                generators,
            },
            loc,
        )
    }

    fn atom(&mut self) -> PResult<Expr> {
        let tok = self.advance();
        let loc = tok.loc;
        let kind = match tok.kind {
            TokenKind::Name(name) => ExprKind::Name(name),
            TokenKind::Int(value) => ExprKind::Int(value),
            TokenKind::Float(value) => ExprKind::Float(value),
            TokenKind::Str(mut text) => {
                while let TokenKind::Str(next) = self.peek() {
                    let next = next.clone();
                    self.advance();
                    text.push_str(&next);
                }
                ExprKind::Str(text)
            }
            TokenKind::Keyword("None") => ExprKind::None,
            TokenKind::Keyword("True") => ExprKind::Bool(true),
            TokenKind::Keyword("False") => ExprKind::Bool(false),
            TokenKind::Op("(") => return self.parenthesized(loc),
            TokenKind::Op("[") => return self.list_display(loc),
            TokenKind::Op("{") => return self.dict_display(loc),
            TokenKind::Keyword(kw) if UNSUPPORTED_KEYWORDS.contains(&kw) => {
                return Err(ParseError::new(format!("'{kw}' is not supported"), loc));
            }
            other => {
                return Err(ParseError::new(
                    format!("unexpected {}", describe(&other)),
                    loc,
                ))
            }
        };
        self.make(kind, loc)
    }

    fn parenthesized(&mut self, loc: Location) -> PResult<Expr> {
        if self.eat_op(")") {
            return self.make(ExprKind::Tuple(Vec::new()), loc);
        }
        let first = self.expression()?;
        if self.is_kw("for") {
            let generator = self.comprehension(first, loc)?;
            self.expect_op(")")?;
            return Ok(generator);
        }
        if self.eat_op(")") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op(")") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op(")")?;
        self.make(ExprKind::Tuple(items), loc)
    }

    fn list_display(&mut self, loc: Location) -> PResult<Expr> {
        if self.eat_op("]") {
            return self.make(ExprKind::List(Vec::new()), loc);
        }
        let first = self.expression()?;
        if self.is_kw("for") {
            let comp = self.comprehension(first, loc)?;
            self.expect_op("]")?;
            return Ok(comp);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op("]")?;
        self.make(ExprKind::List(items), loc)
    }

    fn dict_display(&mut self, loc: Location) -> PResult<Expr> {
        if self.eat_op("}") {
            return self.make(ExprKind::Dict(Vec::new()), loc);
        }
        let key = self.expression()?;
        if !self.is_op(":") {
            return Err(self.error_here("set literals are not supported"));
        }
        self.advance();
        let value = self.expression()?;

        if self.is_kw("for") {
            let generators = self.generators()?;
            self.expect_op("}")?;
            return self.make(
                ExprKind::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators,
                },
                loc,
            );
        }

        let mut pairs = vec![(key, value)];
        while self.eat_op(",") {
            if self.is_op("}") {
                break;
            }
            let key = self.expression()?;
            self.expect_op(":")?;
            let value = self.expression()?;
            pairs.push((key, value));
        }
        self.expect_op("}")?;
        self.make(ExprKind::Dict(pairs), loc)
    }
}
