//! Error types for Skiff

use std::time::Duration;

use thiserror::Error;

use crate::ContainerId;

/// Skiff error types
///
/// Lifecycle failures wrap the underlying cause and carry the ID of the
/// container they belong to. The underlying cause is reachable through
/// [`std::error::Error::source`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Namespace operation failed
    #[error("Namespace error: {message}")]
    Namespace {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking task failed to complete
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Network plugin reported a failure
    #[error("Network plugin error: {message}")]
    Plugin {
        /// Error message
        message: String,
    },

    /// CNI plugin returned an error object
    #[error("CNI plugin error {code}: {message}")]
    Cni {
        /// CNI error code
        code: u32,
        /// Short error message
        message: String,
        /// Extended details, may be empty
        details: String,
    },

    /// Network plugin call exceeded its time budget
    #[error("Network plugin {operation} timed out after {timeout:?}")]
    PluginTimeout {
        /// Plugin operation that timed out
        operation: &'static str,
        /// Configured timeout
        timeout: Duration,
    },

    /// Network namespace could not be allocated
    #[error("error creating network namespace for container {id}")]
    NamespaceCreate {
        /// Owning container
        id: ContainerId,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Network plugin failed to configure the namespace
    #[error("error configuring network namespace for container {id}")]
    PluginSetup {
        /// Owning container
        id: ContainerId,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Operation requires network state the container does not have
    #[error("container {id} has no network namespace, cannot {operation}")]
    InvalidState {
        /// Owning container
        id: ContainerId,
        /// Operation that was refused
        operation: &'static str,
    },

    /// Network plugin failed to report the container's status
    #[error("error retrieving network status of container {id}")]
    PluginStatus {
        /// Owning container
        id: ContainerId,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Network plugin returned text that is not an IP address
    #[error("error parsing IP address {address:?} for container {id}")]
    AddressParse {
        /// Owning container
        id: ContainerId,
        /// Text returned by the plugin
        address: String,
    },

    /// Network plugin failed to release its configuration
    ///
    /// Teardown never returns this; it is only reported as an advisory.
    #[error("failed to tear down network for container {id}")]
    PluginTeardown {
        /// Owning container
        id: ContainerId,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Network namespace could not be released
    #[error("error closing network namespace for container {id}")]
    NamespaceRelease {
        /// Owning container
        id: ContainerId,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Existing network namespace could not be opened
    #[error("error retrieving network namespace at {path}")]
    NamespaceRetrieve {
        /// Container the namespace was being rejoined for, if any
        id: Option<ContainerId>,
        /// Namespace path that was requested
        path: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Shorthand for [`Error::Namespace`]
    pub fn namespace(message: impl Into<String>) -> Self {
        Self::Namespace {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Plugin`]
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::InvalidConfig`]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Container this error is attributed to, if any
    #[must_use]
    pub const fn container_id(&self) -> Option<&ContainerId> {
        match self {
            Self::NamespaceCreate { id, .. }
            | Self::PluginSetup { id, .. }
            | Self::InvalidState { id, .. }
            | Self::PluginStatus { id, .. }
            | Self::AddressParse { id, .. }
            | Self::PluginTeardown { id, .. }
            | Self::NamespaceRelease { id, .. } => Some(id),
            Self::NamespaceRetrieve { id, .. } => id.as_ref(),
            _ => None,
        }
    }

    /// Whether this failure is downgraded to a report instead of failing the
    /// operation that hit it
    #[must_use]
    pub const fn is_advisory(&self) -> bool {
        matches!(self, Self::PluginTeardown { .. })
    }

    /// Whether the failure was a plugin call running out of time,
    /// looking through lifecycle wrappers
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::PluginTimeout { .. } => true,
            Self::PluginSetup { source, .. }
            | Self::PluginStatus { source, .. }
            | Self::PluginTeardown { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Result type alias for Skiff operations
pub type Result<T> = std::result::Result<T, Error>;
