//! Teardown command implementation

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::Path;
use skiff_netns::{Container, ContainerNetworkState};

use super::{Globals, parse_id, require_root};
use crate::cli::CniArgs;

pub async fn execute(globals: &Globals, id: &str, cni: &CniArgs) -> Result<()> {
    let container_id = parse_id(id)?;

    let Some(state) = globals.store.load(&container_id)? else {
        println!("Container '{id}' has no network to tear down");
        return Ok(());
    };

    require_root("teardown")?;
    let manager = globals.manager(cni)?;

    let mut ctr = match manager.restore(state.clone()).await {
        Ok(ctr) => ctr,
        Err(e) if namespace_vanished(&state) => {
            tracing::warn!(
                container_id = id,
                error = %e,
                "Network namespace missing, tearing down plugin state only"
            );
            manager.teardown_stale(&state).await;
            Container::new(state.id, state.name)
        }
        Err(e) => return Err(e).context("Failed to restore container network"),
    };

    manager
        .teardown_netns(&mut ctr)
        .await
        .context("Failed to tear down container network")?;

    globals
        .store
        .remove(ctr.id())
        .context("Failed to remove network state")?;

    println!("✅ Network for '{id}' torn down");
    Ok(())
}

/// Whether the recorded namespace path no longer exists at all
fn namespace_vanished(state: &ContainerNetworkState) -> bool {
    state.netns_path.as_deref().is_some_and(|path| {
        matches!(
            std::fs::symlink_metadata(Path::new(path)),
            Err(e) if e.kind() == ErrorKind::NotFound
        )
    })
}
