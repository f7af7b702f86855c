//! Syntax tree for tool source.

use std::rc::Rc;
use toolsmith_core::Location;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

impl Module {
    /// Top-level `def` with the given name.
    pub fn function(&self, name: &str) -> Option<&Rc<FunctionDef>> {
        self.body.iter().find_map(|stmt| match &stmt.kind {
            StmtKind::FunctionDef(def) if def.name == name => Some(def),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
    pub loc: Location,
}

impl Alias {
    /// Name the import binds in scope.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(alias) => alias,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FunctionDef(Rc<FunctionDef>),
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Pass,
    Raise(Option<Expr>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Delete(Vec<Target>),
    Import(Vec<Alias>),
    ImportFrom {
        module: String,
        names: Vec<Alias>,
    },
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String, Location),
    Subscript {
        value: Expr,
        index: Expr,
        loc: Location,
    },
    Attribute {
        value: Expr,
        attr: String,
        loc: Location,
    },
    Tuple(Vec<Target>, Location),
}

impl Target {
    pub fn loc(&self) -> Location {
        match self {
            Target::Name(_, loc)
            | Target::Subscript { loc, .. }
            | Target::Attribute { loc, .. }
            | Target::Tuple(_, loc) => *loc,
        }
    }

    /// Plain names this target binds.
    pub fn bound_names(&self, into: &mut Vec<(String, Location)>) {
        match self {
            Target::Name(name, loc) => into.push((name.clone(), *loc)),
            Target::Tuple(items, _) => items.iter().for_each(|t| t.bound_names(into)),
            Target::Subscript { .. } | Target::Attribute { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Location,
    /// Height of this subtree; bounded by the parser.
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Location) -> Self {
        let mut expr = Self {
            kind,
            loc,
            depth: 1,
        };
        expr.depth = 1 + expr.children().iter().map(|c| c.depth).max().unwrap_or(0);
        expr
    }

    /// Direct sub-expressions, excluding lambda bodies which are walked as
    /// function definitions.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::None
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Name(_) => Vec::new(),
            ExprKind::List(items) | ExprKind::Tuple(items) => items.iter().collect(),
            ExprKind::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
            ExprKind::Attribute { value, .. } => vec![value.as_ref()],
            ExprKind::Subscript { value, index } => vec![value.as_ref(), index.as_ref()],
            ExprKind::Slice { lower, upper, step } => [lower, upper, step]
                .into_iter()
                .flatten()
                .map(|b| b.as_ref())
                .collect(),
            ExprKind::Call { func, args, kwargs } => std::iter::once(func.as_ref())
                .chain(args.iter())
                .chain(kwargs.iter().map(|(_, v)| v))
                .collect(),
            ExprKind::BinOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ExprKind::UnaryOp { operand, .. } => vec![operand.as_ref()],
            ExprKind::And(a, b) | ExprKind::Or(a, b) => vec![a.as_ref(), b.as_ref()],
            ExprKind::Compare { left, ops } => std::iter::once(left.as_ref())
                .chain(ops.iter().map(|(_, e)| e))
                .collect(),
            ExprKind::IfExp { test, body, orelse } => {
                vec![test.as_ref(), body.as_ref(), orelse.as_ref()]
            }
            ExprKind::Lambda(def) => def
                .params
                .iter()
                .filter_map(|p| p.default.as_ref())
                .collect(),
            ExprKind::ListComp { elt, generators } => {
                let mut out: Vec<&Expr> = vec![elt.as_ref()];
                for gen in generators {
                    out.push(&gen.iter);
                    out.extend(gen.ifs.iter());
                }
                out
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                let mut out: Vec<&Expr> = vec![key.as_ref(), value.as_ref()];
                for gen in generators {
                    out.push(&gen.iter);
                    out.extend(gen.ifs.iter());
                }
                out
            }
        }
    }
}
