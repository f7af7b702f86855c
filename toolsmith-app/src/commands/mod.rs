use anyhow::Result;
use serde::Serialize;
use std::io::Write;
use std::process::ExitCode;

pub mod audit;
pub mod author;
pub mod invoke;
pub mod policy;
pub mod registry;
pub mod validate;

/// Whether the command's subject succeeded. A rejected tool or a failed
/// invocation is a `Failure` even though the command itself ran fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Failure => ExitCode::FAILURE,
        }
    }
}

pub(crate) fn print_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
