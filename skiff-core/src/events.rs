//! Network lifecycle events with structured tracing
//!
//! Events form the reporting channel for the namespace lifecycle. Failures
//! that are deliberately not propagated (a plugin teardown that fails, a
//! rollback that cannot release its namespace) surface here with
//! [`Severity::Advisory`] instead of being returned to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::ContainerId;

/// How much attention an event deserves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Normal progress
    Info,
    /// A failure that was reported but did not fail the operation
    Advisory,
}

/// Events emitted during the network namespace lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// A network namespace was allocated for the container
    NamespaceCreated {
        /// Container ID
        id: ContainerId,
        /// Namespace path
        path: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// The network plugin configured the container's namespace
    NetworkConfigured {
        /// Container ID
        id: ContainerId,
        /// Namespace path
        path: String,
        /// Plugin that did the work
        plugin: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// A namespace could not be released while rolling back a failed create
    RollbackFailed {
        /// Container ID
        id: ContainerId,
        /// Namespace path
        path: String,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// The plugin failed to tear down its configuration
    TeardownFailed {
        /// Container ID
        id: ContainerId,
        /// Namespace path
        path: String,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// The container's namespace was released
    NamespaceReleased {
        /// Container ID
        id: ContainerId,
        /// Namespace path
        path: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl NetworkEvent {
    /// Get the container ID from any event
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        match self {
            Self::NamespaceCreated { id, .. }
            | Self::NetworkConfigured { id, .. }
            | Self::RollbackFailed { id, .. }
            | Self::TeardownFailed { id, .. }
            | Self::NamespaceReleased { id, .. } => id,
        }
    }

    /// Get the namespace path from any event
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::NamespaceCreated { path, .. }
            | Self::NetworkConfigured { path, .. }
            | Self::RollbackFailed { path, .. }
            | Self::TeardownFailed { path, .. }
            | Self::NamespaceReleased { path, .. } => path,
        }
    }

    /// Get the timestamp from any event
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::NamespaceCreated { timestamp, .. }
            | Self::NetworkConfigured { timestamp, .. }
            | Self::RollbackFailed { timestamp, .. }
            | Self::TeardownFailed { timestamp, .. }
            | Self::NamespaceReleased { timestamp, .. } => *timestamp,
        }
    }

    /// Severity of this event
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::RollbackFailed { .. } | Self::TeardownFailed { .. } => Severity::Advisory,
            _ => Severity::Info,
        }
    }

    /// Check if this event reports a swallowed failure
    #[must_use]
    pub const fn is_advisory(&self) -> bool {
        matches!(self.severity(), Severity::Advisory)
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::NamespaceCreated { id, path, .. } => {
                tracing::debug!(
                    container_id = %id,
                    path = %path,
                    event = "namespace_created",
                    "Made network namespace"
                );
            }
            Self::NetworkConfigured {
                id, path, plugin, ..
            } => {
                tracing::info!(
                    container_id = %id,
                    path = %path,
                    plugin = %plugin,
                    event = "network_configured",
                    "Network namespace configured"
                );
            }
            Self::RollbackFailed {
                id, path, message, ..
            } => {
                tracing::error!(
                    container_id = %id,
                    path = %path,
                    error = %message,
                    event = "rollback_failed",
                    "Error closing partially created network namespace"
                );
            }
            Self::TeardownFailed {
                id, path, message, ..
            } => {
                tracing::error!(
                    container_id = %id,
                    path = %path,
                    error = %message,
                    event = "teardown_failed",
                    "Failed to tear down network for container"
                );
            }
            Self::NamespaceReleased { id, path, .. } => {
                tracing::debug!(
                    container_id = %id,
                    path = %path,
                    event = "namespace_released",
                    "Network namespace released"
                );
            }
        }
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamespaceCreated { id, path, .. } => {
                write!(f, "Container {id} network namespace created at {path}")
            }
            Self::NetworkConfigured { id, plugin, .. } => {
                write!(f, "Container {id} network configured by {plugin}")
            }
            Self::RollbackFailed { id, message, .. } => {
                write!(f, "Container {id} rollback could not release namespace: {message}")
            }
            Self::TeardownFailed { id, message, .. } => {
                write!(f, "Container {id} network teardown failed: {message}")
            }
            Self::NamespaceReleased { id, path, .. } => {
                write!(f, "Container {id} network namespace {path} released")
            }
        }
    }
}

// Custom SystemTime serialization
mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ContainerId {
        ContainerId::new("abc123").unwrap()
    }

    #[test]
    fn test_event_accessors() {
        let event = NetworkEvent::NamespaceCreated {
            id: id(),
            path: "/run/netns/skiff-abc123".to_string(),
            timestamp: SystemTime::now(),
        };

        assert_eq!(event.container_id(), &id());
        assert_eq!(event.path(), "/run/netns/skiff-abc123");
        assert_eq!(event.severity(), Severity::Info);
    }

    #[test]
    fn test_swallowed_failures_are_advisory() {
        let event = NetworkEvent::TeardownFailed {
            id: id(),
            path: "/run/netns/x".to_string(),
            message: "timeout".to_string(),
            timestamp: SystemTime::now(),
        };
        assert!(event.is_advisory());

        let event = NetworkEvent::RollbackFailed {
            id: id(),
            path: "/run/netns/x".to_string(),
            message: "busy".to_string(),
            timestamp: SystemTime::now(),
        };
        assert!(event.is_advisory());

        let event = NetworkEvent::NamespaceReleased {
            id: id(),
            path: "/run/netns/x".to_string(),
            timestamp: SystemTime::now(),
        };
        assert!(!event.is_advisory());
    }

    #[test]
    fn test_event_serde() {
        let event = NetworkEvent::TeardownFailed {
            id: id(),
            path: "/run/netns/x".to_string(),
            message: "timeout".to_string(),
            timestamp: SystemTime::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "teardown_failed");
        assert_eq!(json["id"], "abc123");

        let deserialized: NetworkEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.container_id(), deserialized.container_id());
        assert!(deserialized.is_advisory());
    }
}
