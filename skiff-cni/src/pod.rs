//! Pod network descriptor handed to network plugins

use serde::{Deserialize, Serialize};
use skiff_core::{ContainerId, PortMapping};

/// Parameters a network plugin needs to configure one container
///
/// Rebuilt from container state for every plugin call and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodNetwork {
    /// Container ID
    pub id: String,
    /// Network name (the container's display name)
    pub name: String,
    /// Namespace label passed through to the plugin
    ///
    /// Carries the container's display name; plugins should treat it as an
    /// opaque string.
    pub namespace_label: String,
    /// Filesystem path of the container's network namespace
    pub namespace_path: String,
    /// Port forwarding rules, passed through unmodified
    pub port_mappings: Vec<PortMapping>,
}

/// Build the descriptor for a container's network namespace
#[must_use]
pub fn pod_network(
    id: &ContainerId,
    name: &str,
    namespace_path: &str,
    port_mappings: &[PortMapping],
) -> PodNetwork {
    PodNetwork {
        id: id.as_str().to_string(),
        name: name.to_string(),
        namespace_label: name.to_string(),
        namespace_path: namespace_path.to_string(),
        port_mappings: port_mappings.to_vec(),
    }
}
