use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use toolsmith_policy::ValidatorPolicy;

use super::Outcome;

/// Print the active policy as YAML, optionally saving a copy to edit.
pub async fn run<W: Write>(policy: &ValidatorPolicy, write_to: Option<&Path>, out: &mut W) -> Result<Outcome> {
    if let Some(path) = write_to {
        policy
            .save(path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    out.write_all(serde_yaml::to_string(policy)?.as_bytes())?;
    Ok(Outcome::Success)
}
