//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use skiff_core::PortMapping;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Container network namespace lifecycle", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding per-container network state
    #[arg(long, global = true, env = "SKIFF_STATE_DIR", default_value = "/run/skiff")]
    pub state_dir: PathBuf,

    /// Directory where network namespaces are mounted
    #[arg(long, global = true, env = "SKIFF_NETNS_DIR", default_value = "/run/netns")]
    pub netns_dir: PathBuf,

    /// Time budget for each network plugin call, in seconds
    #[arg(long, global = true, default_value = "30")]
    pub plugin_timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

/// Network plugin selection
#[derive(Args, Debug)]
pub struct CniArgs {
    /// CNI network configuration file
    #[arg(long, env = "SKIFF_CNI_CONFIG")]
    pub cni_config: PathBuf,

    /// Directory to search for CNI plugins (repeatable)
    #[arg(long)]
    pub cni_path: Vec<PathBuf>,

    /// Interface name inside the container
    #[arg(long, default_value = "eth0")]
    pub ifname: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and configure a container's network namespace
    Create {
        /// Container ID
        #[arg(short, long)]
        id: String,

        /// Container name
        #[arg(short, long)]
        name: String,

        /// Publish a port: [HOST_IP:]HOST_PORT:CONTAINER_PORT[/PROTO]
        #[arg(short = 'p', long = "publish")]
        publish: Vec<PortMapping>,

        #[command(flatten)]
        cni: CniArgs,
    },

    /// Print a container's IP address
    Ip {
        /// Container ID
        #[arg(short, long)]
        id: String,

        #[command(flatten)]
        cni: CniArgs,
    },

    /// Tear down a container's network and release its namespace
    Teardown {
        /// Container ID
        #[arg(short, long)]
        id: String,

        #[command(flatten)]
        cni: CniArgs,
    },

    /// Show a container's saved network state
    Inspect {
        /// Container ID
        #[arg(short, long)]
        id: String,
    },
}
