//! Create command implementation

use anyhow::{Context, Result};
use skiff_core::PortMapping;
use skiff_netns::Container;

use super::{Globals, parse_id, require_root};
use crate::cli::CniArgs;

pub async fn execute(
    globals: &Globals,
    id: &str,
    name: String,
    publish: Vec<PortMapping>,
    cni: &CniArgs,
) -> Result<()> {
    let container_id = parse_id(id)?;

    if let Some(state) = globals.store.load(&container_id)? {
        if let Some(path) = state.netns_path {
            anyhow::bail!("Container '{id}' already has a network namespace at {path}");
        }
    }

    require_root("create")?;
    let manager = globals.manager(cni)?;

    tracing::info!(
        container_id = id,
        name = %name,
        ports = publish.len(),
        plugin = manager.plugin_name(),
        "Creating container network"
    );

    let mut ctr = Container::new(container_id, name).with_port_mappings(publish);
    manager
        .create_netns(&mut ctr)
        .await
        .context("Failed to create container network")?;

    if let Err(e) = globals.store.save(&ctr.network_state()) {
        tracing::error!(container_id = id, error = %e, "Failed to save network state, tearing down");
        if let Err(teardown_err) = manager.teardown_netns(&mut ctr).await {
            tracing::warn!(container_id = id, error = %teardown_err, "Cleanup after failed save failed");
        }
        return Err(e).context("Failed to save network state");
    }

    println!(
        "✅ Network namespace for '{}' created at {}",
        id,
        ctr.netns_path().unwrap_or_default()
    );
    for mapping in ctr.port_mappings() {
        println!("   {mapping}");
    }

    Ok(())
}
