//! Static validation of tool source: a raw-text scan against deny patterns
//! followed by a structural walk of the parsed module.

pub mod lexical;
pub mod structural;
pub mod validator;

pub use lexical::LexicalScanner;
pub use validator::Validator;
