//! Network plugin trait for pluggable implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use skiff_core::{Error, Result};
use tokio::sync::Mutex;

use crate::pod::PodNetwork;

/// Outcome of a successful network setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupResult {
    /// Addresses assigned to the container
    pub ips: Vec<IpAddr>,
}

/// Trait for network configuration backends
///
/// This allows for different implementations:
/// - [`CniPlugin`](crate::CniPlugin) - CNI exec protocol
/// - [`MockPlugin`] - Testing without touching the host network
///
/// # Thread Safety
/// Implementations are shared across containers and must be `Send + Sync`.
#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    /// Short name used in logs and events
    fn name(&self) -> &str;

    /// Configure networking for the pod
    ///
    /// # Errors
    /// Returns error if the backend fails to configure the namespace
    async fn setup_pod(&self, network: &PodNetwork) -> Result<SetupResult>;

    /// Report the address currently assigned to the pod, as text
    ///
    /// # Errors
    /// Returns error if the status cannot be read
    async fn pod_network_status(&self, network: &PodNetwork) -> Result<String>;

    /// Release any configuration associated with the pod
    ///
    /// Must accept pods that are already unconfigured.
    ///
    /// # Errors
    /// Returns error if the backend fails to release its configuration
    async fn teardown_pod(&self, network: &PodNetwork) -> Result<()>;
}

/// A call recorded by [`MockPlugin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginCall {
    /// `setup_pod`
    Setup(PodNetwork),
    /// `pod_network_status`
    Status(PodNetwork),
    /// `teardown_pod`
    Teardown(PodNetwork),
}

impl PluginCall {
    /// Descriptor the call was made with
    #[must_use]
    pub const fn network(&self) -> &PodNetwork {
        match self {
            Self::Setup(network) | Self::Status(network) | Self::Teardown(network) => network,
        }
    }
}

/// Mock plugin for testing (doesn't touch the host network)
///
/// Records every call, answers status queries with a configurable address,
/// and can be told to fail or stall any operation.
#[derive(Clone)]
pub struct MockPlugin {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    address: String,
    configured: Vec<String>,
    calls: Vec<PluginCall>,
    setup_error: Option<String>,
    status_error: Option<String>,
    teardown_error: Option<String>,
    delay: Option<Duration>,
}

impl MockPlugin {
    /// Address reported by a fresh mock
    pub const DEFAULT_ADDRESS: &'static str = "10.88.0.2";

    /// Create a new mock plugin
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                address: Self::DEFAULT_ADDRESS.to_string(),
                ..MockState::default()
            })),
        }
    }

    /// Set the text returned by status queries
    pub async fn set_address(&self, address: impl Into<String>) {
        self.state.lock().await.address = address.into();
    }

    /// Make setup fail with the given message
    pub async fn fail_setup(&self, message: impl Into<String>) {
        self.state.lock().await.setup_error = Some(message.into());
    }

    /// Make status queries fail with the given message
    pub async fn fail_status(&self, message: impl Into<String>) {
        self.state.lock().await.status_error = Some(message.into());
    }

    /// Make teardown fail with the given message
    pub async fn fail_teardown(&self, message: impl Into<String>) {
        self.state.lock().await.teardown_error = Some(message.into());
    }

    /// Stall every call for the given duration before answering
    pub async fn set_delay(&self, delay: Duration) {
        self.state.lock().await.delay = Some(delay);
    }

    /// Number of plugin calls made (for testing)
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.calls.len()
    }

    /// All recorded calls, oldest first
    pub async fn calls(&self) -> Vec<PluginCall> {
        self.state.lock().await.calls.clone()
    }

    /// Check whether a container is currently configured
    pub async fn is_configured(&self, id: &str) -> bool {
        self.state
            .lock()
            .await
            .configured
            .iter()
            .any(|c| c == id)
    }

    async fn record(&self, call: PluginCall) {
        let delay = {
            let mut state = self.state.lock().await;
            state.calls.push(call);
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPlugin").finish_non_exhaustive()
    }
}

#[async_trait]
impl NetworkPlugin for MockPlugin {
    fn name(&self) -> &str {
        "mock"
    }

    async fn setup_pod(&self, network: &PodNetwork) -> Result<SetupResult> {
        self.record(PluginCall::Setup(network.clone())).await;
        let mut state = self.state.lock().await;

        if let Some(ref message) = state.setup_error {
            return Err(Error::plugin(message.clone()));
        }

        if !state.configured.contains(&network.id) {
            state.configured.push(network.id.clone());
        }

        tracing::debug!(
            container_id = %network.id,
            path = %network.namespace_path,
            "Mock: Set up pod network"
        );

        Ok(SetupResult {
            ips: state.address.parse::<IpAddr>().ok().into_iter().collect(),
        })
    }

    async fn pod_network_status(&self, network: &PodNetwork) -> Result<String> {
        self.record(PluginCall::Status(network.clone())).await;
        let state = self.state.lock().await;

        if let Some(ref message) = state.status_error {
            return Err(Error::plugin(message.clone()));
        }

        tracing::trace!(container_id = %network.id, "Mock: Read pod network status");

        Ok(state.address.clone())
    }

    async fn teardown_pod(&self, network: &PodNetwork) -> Result<()> {
        self.record(PluginCall::Teardown(network.clone())).await;
        let mut state = self.state.lock().await;

        if let Some(ref message) = state.teardown_error {
            return Err(Error::plugin(message.clone()));
        }

        state.configured.retain(|id| id != &network.id);

        tracing::debug!(container_id = %network.id, "Mock: Tore down pod network");

        Ok(())
    }
}
