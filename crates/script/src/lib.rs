//! The restricted tool language: lexer, parser and a tree-walking
//! interpreter whose only reachable capabilities are the ones it builds per
//! run.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod methods;
pub mod modules;
pub mod output;
pub mod parser;
pub mod value;

pub use error::{ErrorKind, ParseError, ScriptError, ScriptResult};
pub use interpreter::{
    run_tool, run_tool_inline, Interpreter, Limits, RunFailure, RunOutcome, INTERPRETER_STACK,
    MAX_CALL_DEPTH,
};
pub use parser::parse;
