use anyhow::Result;
use serde_json::json;
use std::io::Write;

use super::{print_json, Outcome};
use crate::bootstrap::Services;

pub fn list<W: Write>(services: &Services, out: &mut W) -> Result<Outcome> {
    print_json(out, &services.manager.registry().list())?;
    Ok(Outcome::Success)
}

/// Every version of one tool with its lifecycle timestamps.
pub fn history<W: Write>(services: &Services, name: &str, out: &mut W) -> Result<Outcome> {
    let history = services.manager.registry().history(name);
    if history.is_empty() {
        anyhow::bail!("Tool not found: {}", name);
    }

    let rows: Vec<_> = history
        .iter()
        .map(|d| {
            json!({
                "version": d.version,
                "state": d.state,
                "created_at": d.created_at,
                "validated_at": d.validated_at,
                "tested_at": d.tested_at,
                "registered_at": d.registered_at,
                "deprecated_at": d.deprecated_at,
                "policy_version": d.verdict.as_ref().map(|v| v.policy_version()),
                "diagnostic": d.diagnostic,
            })
        })
        .collect();
    print_json(out, &rows)?;
    Ok(Outcome::Success)
}
