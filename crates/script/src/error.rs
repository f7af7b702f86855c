use std::fmt;
use thiserror::Error;
use toolsmith_core::Location;

/// Source text that could not be turned into a syntax tree.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at {location}")]
pub struct ParseError {
    pub message: String,
    pub location: Location,
}

impl ParseError {
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The tool's own logic failed (`raise`, type errors, missing keys...).
    Raised,
    /// The tool attempted an operation outside its capability table.
    Violation,
    /// The host could not give the interpreter the resources it needs
    /// (its thread failed to start or died).
    Exhausted,
    /// The run was stopped from outside because its deadline expired.
    Interrupted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Raised => "raised",
            ErrorKind::Violation => "violation",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
}

impl ScriptError {
    pub fn raised(exception: &str, message: impl fmt::Display) -> Self {
        let message = message.to_string();
        let message = if message.is_empty() {
            exception.to_string()
        } else {
            format!("{exception}: {message}")
        };
        Self {
            kind: ErrorKind::Raised,
            message,
            location: None,
        }
    }

    pub fn type_error(message: impl fmt::Display) -> Self {
        Self::raised("TypeError", message)
    }

    pub fn value_error(message: impl fmt::Display) -> Self {
        Self::raised("ValueError", message)
    }

    /// A size bound was exceeded. This is the tool's own failure, not the host's.
    pub fn memory_error(message: impl fmt::Display) -> Self {
        Self::raised("MemoryError", message)
    }

    pub fn violation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Violation,
            message: message.into(),
            location: None,
        }
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Exhausted,
            message: message.into(),
            location: None,
        }
    }

    pub fn interrupted() -> Self {
        Self {
            kind: ErrorKind::Interrupted,
            message: "execution interrupted".to_string(),
            location: None,
        }
    }

    /// Attach `loc` unless a more precise location is already known.
    pub fn at(mut self, loc: Location) -> Self {
        if self.location.is_none() {
            self.location = Some(loc);
        }
        self
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "{} (line {})", self.message, loc.line),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ScriptError {}

pub type ScriptResult<T> = Result<T, ScriptError>;
