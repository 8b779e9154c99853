//! Network plugin adapters with pluggable backends
//!
//! This crate provides the trait-based abstraction the namespace lifecycle
//! uses to configure container networking, the pod network descriptor handed
//! to it, and two implementations: a CNI exec-protocol adapter and a mock.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod cni;
pub mod pod;

pub use backend::{MockPlugin, NetworkPlugin, PluginCall, SetupResult};
pub use cni::{CniCommand, CniConfig, CniPlugin, NetworkConf};
pub use pod::{PodNetwork, pod_network};
