//! Inspect command implementation

use anyhow::{Context, Result};

use super::{Globals, parse_id};

pub fn execute(globals: &Globals, id: &str) -> Result<()> {
    let container_id = parse_id(id)?;

    let state = globals
        .store
        .load(&container_id)
        .context("Failed to read network state")?
        .with_context(|| format!("No network state for container '{id}'"))?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
