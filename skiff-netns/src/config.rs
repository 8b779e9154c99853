//! Network lifecycle configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use skiff_core::{ContainerId, Error, Result};

/// Default directory holding persistent network namespaces
pub const DEFAULT_NETNS_DIR: &str = "/run/netns";

/// Default prefix for namespace names
pub const DEFAULT_NAME_PREFIX: &str = "skiff";

/// Default time budget for a single network plugin call
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Network lifecycle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Directory where created namespaces are bind-mounted
    pub netns_dir: PathBuf,

    /// Prefix for namespace names (`<prefix>-<container id>`)
    pub name_prefix: String,

    /// Time budget for each network plugin call
    #[serde(with = "duration_secs")]
    pub plugin_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            netns_dir: PathBuf::from(DEFAULT_NETNS_DIR),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            plugin_timeout: DEFAULT_PLUGIN_TIMEOUT,
        }
    }
}

impl NetworkConfig {
    /// Create a new network configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace directory
    #[must_use]
    pub fn with_netns_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.netns_dir = dir.into();
        self
    }

    /// Set the namespace name prefix
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the plugin call timeout
    #[must_use]
    pub const fn with_plugin_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_timeout = timeout;
        self
    }

    /// Check the configuration for values the lifecycle cannot work with
    ///
    /// # Errors
    /// Returns error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if !self.netns_dir.is_absolute() {
            return Err(Error::invalid_config(format!(
                "Namespace directory must be absolute: {}",
                self.netns_dir.display()
            )));
        }

        if self.name_prefix.is_empty() || self.name_prefix.contains('/') {
            return Err(Error::invalid_config(format!(
                "Invalid namespace name prefix: {:?}",
                self.name_prefix
            )));
        }

        if self.plugin_timeout.is_zero() {
            return Err(Error::invalid_config("Plugin timeout must be positive"));
        }

        Ok(())
    }

    /// Name of the namespace created for a container
    #[must_use]
    pub fn namespace_name(&self, id: &ContainerId) -> String {
        format!("{}-{}", self.name_prefix, id)
    }

    /// Path of the namespace created for a container
    #[must_use]
    pub fn namespace_path(&self, id: &ContainerId) -> PathBuf {
        self.netns_dir.join(self.namespace_name(id))
    }

    /// Whether a namespace path lives in the managed directory
    #[must_use]
    pub fn is_managed_path(&self, path: &Path) -> bool {
        path.parent() == Some(self.netns_dir.as_path())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
