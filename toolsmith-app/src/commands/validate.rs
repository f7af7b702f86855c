use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use toolsmith_policy::ValidatorPolicy;
use toolsmith_validator::Validator;

use super::{print_json, Outcome};

/// Validate a source file without registering anything.
pub fn run<W: Write>(policy: Arc<ValidatorPolicy>, path: &Path, out: &mut W) -> Result<Outcome> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let validator = Validator::new(policy)?;

    let verdict = validator.validate(&source);
    print_json(out, &verdict)?;
    Ok(Outcome::from_bool(verdict.accepted()))
}
