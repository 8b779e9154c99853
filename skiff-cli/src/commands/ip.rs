//! IP command implementation

use anyhow::{Context, Result};

use super::{Globals, parse_id, require_root};
use crate::cli::CniArgs;

pub async fn execute(globals: &Globals, id: &str, cni: &CniArgs) -> Result<()> {
    let container_id = parse_id(id)?;

    let state = globals
        .store
        .load(&container_id)?
        .with_context(|| format!("No network state for container '{id}'"))?;

    require_root("ip")?;
    let manager = globals.manager(cni)?;
    let ctr = manager
        .restore(state)
        .await
        .context("Failed to restore container network")?;

    let ip = manager
        .container_ip(&ctr)
        .await
        .context("Failed to get container IP")?;

    println!("{ip}");
    Ok(())
}
