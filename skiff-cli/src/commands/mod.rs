use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use skiff_cni::{CniConfig, CniPlugin, NetworkConf};
use skiff_core::ContainerId;
use skiff_netns::{NetworkConfig, NetworkManager, OsNamespaces, StateStore};

use crate::cli::{Cli, CniArgs, Commands};

pub mod create;
pub mod inspect;
pub mod ip;
pub mod teardown;

/// Options shared by every command
pub struct Globals {
    pub store: StateStore,
    pub network: NetworkConfig,
}

impl Globals {
    fn new(state_dir: PathBuf, netns_dir: PathBuf, plugin_timeout: u64) -> Result<Self> {
        let network = NetworkConfig::new()
            .with_netns_dir(netns_dir)
            .with_plugin_timeout(Duration::from_secs(plugin_timeout));
        network.validate().context("Invalid network configuration")?;

        Ok(Self {
            store: StateStore::new(state_dir),
            network,
        })
    }

    /// Build a manager backed by the kernel and the configured CNI network
    pub fn manager(&self, cni: &CniArgs) -> Result<NetworkManager> {
        let conf = NetworkConf::load(&cni.cni_config).with_context(|| {
            format!("Failed to load CNI config {}", cni.cni_config.display())
        })?;
        let cni_config = CniConfig::new(conf)
            .with_plugin_dirs(cni.cni_path.clone())
            .with_ifname(&cni.ifname);

        Ok(NetworkManager::new(
            Arc::new(CniPlugin::new(cni_config)),
            Arc::new(OsNamespaces::new(self.network.clone())),
            self.network.clone(),
        ))
    }
}

fn parse_id(id: &str) -> Result<ContainerId> {
    ContainerId::new(id).context("Invalid container ID")
}

fn require_root(command: &str) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!("Must run as root. Try: sudo skiff {command} ...");
    }
    Ok(())
}

/// Dispatch command to appropriate handler
pub async fn dispatch(cli: Cli) -> Result<()> {
    let globals = Globals::new(cli.state_dir, cli.netns_dir, cli.plugin_timeout)?;

    match cli.command {
        Commands::Create {
            id,
            name,
            publish,
            cni,
        } => create::execute(&globals, &id, name, publish, &cni).await,

        Commands::Ip { id, cni } => ip::execute(&globals, &id, &cni).await,

        Commands::Teardown { id, cni } => teardown::execute(&globals, &id, &cni).await,

        Commands::Inspect { id } => inspect::execute(&globals, &id),
    }
}
