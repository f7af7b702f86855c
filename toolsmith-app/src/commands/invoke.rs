use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;
use toolsmith_core::Arguments;

use super::{print_json, Outcome};
use crate::bootstrap::Services;

pub fn parse_arguments(raw: &str) -> Result<Arguments> {
    match serde_json::from_str(raw).context("Arguments must be JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Arguments must be a JSON object, got {}", other),
    }
}

pub async fn run<W: Write>(services: &Services, name: &str, raw_arguments: &str, out: &mut W) -> Result<Outcome> {
    let arguments = parse_arguments(raw_arguments)?;
    let result = services.manager.invoke(name, arguments).await?;
    print_json(out, &result)?;
    Ok(Outcome::from_bool(result.is_ok()))
}
