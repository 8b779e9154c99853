//! Network namespace lifecycle for containers
//!
//! This crate owns the network namespace of each container:
//! - Allocating a namespace and having the network plugin configure it
//! - Joining an existing namespace by path
//! - Resolving the container's IP address through the plugin
//! - Tearing the configuration down and releasing the namespace
//!
//! OS access goes through [`NamespaceProvider`] and the plugin through
//! [`skiff_cni::NetworkPlugin`], so the lifecycle runs against mocks in tests.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod container;
pub mod handle;
pub mod manager;
pub mod mock;
pub mod state;

pub use config::NetworkConfig;
pub use container::Container;
pub use handle::{NamespaceProvider, NetNamespace, OsNamespaces, OsNetNs};
pub use manager::NetworkManager;
pub use mock::MockNamespaces;
pub use state::{ContainerNetworkState, StateStore};
