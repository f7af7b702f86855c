use anyhow::{Context, Result};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use toolsmith_core::ToolState;
use toolsmith_tools::ToolDraft;

use super::{print_json, Outcome};
use crate::bootstrap::Services;

pub fn load_manifest(path: &Path) -> Result<ToolDraft> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Invalid tool manifest {}", path.display()))
}

/// Submit a manifest and drive the new version as far as it will go.
pub async fn run<W: Write>(services: &Services, manifest: &Path, out: &mut W) -> Result<Outcome> {
    let draft = load_manifest(manifest)?;
    let submitted = services.manager.submit_draft(draft).await?;
    let done = services.manager.advance(&submitted).await?;

    print_json(
        out,
        &json!({
            "name": done.name,
            "version": done.version,
            "state": done.state,
            "diagnostic": done.diagnostic,
            "violations": done.verdict.as_ref().map(|v| v.violations()).unwrap_or_default(),
        }),
    )?;
    Ok(Outcome::from_bool(done.state == ToolState::Registered))
}
