//! Container network state

use skiff_core::{ContainerId, PortMapping};

use crate::handle::NetNamespace;
use crate::state::ContainerNetworkState;

/// The network-facing view of a container
///
/// Identity and port mappings are fixed at construction. The namespace slot
/// is the only mutable state; it holds at most one open handle and is
/// written only by the lifecycle manager. Callers serialize access per
/// container.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    name: String,
    port_mappings: Vec<PortMapping>,
    netns: Option<Box<dyn NetNamespace>>,
}

impl Container {
    /// Create a container with no port mappings and no namespace
    #[must_use]
    pub fn new(id: ContainerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            port_mappings: Vec::new(),
            netns: None,
        }
    }

    /// Set the port mappings
    #[must_use]
    pub fn with_port_mappings(mut self, port_mappings: Vec<PortMapping>) -> Self {
        self.port_mappings = port_mappings;
        self
    }

    /// Container ID
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port mappings
    #[must_use]
    pub fn port_mappings(&self) -> &[PortMapping] {
        &self.port_mappings
    }

    /// The container's network namespace, if configured
    #[must_use]
    pub fn netns(&self) -> Option<&dyn NetNamespace> {
        self.netns.as_deref()
    }

    pub(crate) fn netns_mut(&mut self) -> Option<&mut (dyn NetNamespace + 'static)> {
        self.netns.as_deref_mut()
    }

    /// Path of the container's network namespace, if configured
    #[must_use]
    pub fn netns_path(&self) -> Option<&str> {
        self.netns().map(NetNamespace::path)
    }

    /// Whether a network namespace is assigned
    #[must_use]
    pub const fn has_netns(&self) -> bool {
        self.netns.is_some()
    }

    /// Assign a namespace handle, returning the one it replaces
    pub fn set_netns(&mut self, netns: Box<dyn NetNamespace>) -> Option<Box<dyn NetNamespace>> {
        self.netns.replace(netns)
    }

    /// Remove the namespace handle from the container
    pub fn take_netns(&mut self) -> Option<Box<dyn NetNamespace>> {
        self.netns.take()
    }

    /// Snapshot of the state needed to rebuild this container later
    #[must_use]
    pub fn network_state(&self) -> ContainerNetworkState {
        ContainerNetworkState {
            id: self.id.clone(),
            name: self.name.clone(),
            port_mappings: self.port_mappings.clone(),
            netns_path: self.netns_path().map(str::to_string),
        }
    }
}
