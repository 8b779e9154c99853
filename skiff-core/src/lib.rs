//! Skiff Core - Foundation types, errors, and network events
//!
//! This crate provides the core abstractions shared by the Skiff crates.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::{NetworkEvent, Severity};
pub use types::{ContainerId, PortMapping, Protocol};
