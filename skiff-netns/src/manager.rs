//! Network namespace lifecycle management

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use skiff_cni::{NetworkPlugin, PodNetwork, pod_network};
use skiff_core::{ContainerId, Error, NetworkEvent, Result};

use crate::config::NetworkConfig;
use crate::container::Container;
use crate::handle::{NamespaceProvider, NetNamespace};
use crate::state::ContainerNetworkState;

/// Drives a container's network namespace through create, query and teardown
///
/// The manager holds no per-container state. Everything it mutates lives in
/// the [`Container`] passed to it, and `&mut Container` keeps operations on
/// one container serialized.
pub struct NetworkManager {
    plugin: Arc<dyn NetworkPlugin>,
    namespaces: Arc<dyn NamespaceProvider>,
    config: NetworkConfig,
    event_tx: Option<mpsc::UnboundedSender<NetworkEvent>>,
}

impl NetworkManager {
    /// Create a new manager
    #[must_use]
    pub fn new(
        plugin: Arc<dyn NetworkPlugin>,
        namespaces: Arc<dyn NamespaceProvider>,
        config: NetworkConfig,
    ) -> Self {
        Self {
            plugin,
            namespaces,
            config,
            event_tx: None,
        }
    }

    /// Also send lifecycle events on `tx`
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<NetworkEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Name of the network plugin in use
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Create a network namespace for the container and configure it
    ///
    /// The container's namespace is only assigned once the plugin has
    /// configured it. If setup fails the new namespace is released again and
    /// the container is left untouched.
    ///
    /// # Errors
    /// Returns [`Error::NamespaceCreate`] if no namespace could be allocated,
    /// or [`Error::PluginSetup`] if the plugin failed to configure it
    ///
    /// # Panics
    /// In debug builds, if the container already has a namespace
    pub async fn create_netns(&self, ctr: &mut Container) -> Result<()> {
        debug_assert!(
            !ctr.has_netns(),
            "container {} already has a network namespace",
            ctr.id()
        );
        let id = ctr.id().clone();

        let mut netns = self
            .namespaces
            .create(&id)
            .await
            .map_err(|e| Error::NamespaceCreate {
                id: id.clone(),
                source: Box::new(e),
            })?;
        let path = netns.path().to_string();

        self.emit(NetworkEvent::NamespaceCreated {
            id: id.clone(),
            path: path.clone(),
            timestamp: SystemTime::now(),
        });

        let network = self.pod_network(ctr, &path);
        let setup = self
            .call_plugin("setup", self.plugin.setup_pod(&network))
            .await;

        match setup {
            Ok(result) => {
                tracing::debug!(
                    container_id = %id,
                    path = %path,
                    ips = ?result.ips,
                    "Plugin configured network namespace"
                );
                self.emit(NetworkEvent::NetworkConfigured {
                    id,
                    path,
                    plugin: self.plugin.name().to_string(),
                    timestamp: SystemTime::now(),
                });
                ctr.set_netns(netns);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    container_id = %id,
                    path = %path,
                    error = %e,
                    "Failed to configure network namespace, releasing it"
                );
                if let Err(close_err) = netns.close().await {
                    self.emit(NetworkEvent::RollbackFailed {
                        id: id.clone(),
                        path,
                        message: error_chain(&close_err),
                        timestamp: SystemTime::now(),
                    });
                }
                Err(Error::PluginSetup {
                    id,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Open an existing network namespace by path
    ///
    /// The plugin is not involved; the caller assigns the handle.
    ///
    /// # Errors
    /// Returns [`Error::NamespaceRetrieve`] if `path` is not a live network
    /// namespace
    pub async fn join_netns(&self, path: &str) -> Result<Box<dyn NetNamespace>> {
        self.retrieve(path, None).await
    }

    async fn retrieve(
        &self,
        path: &str,
        id: Option<&ContainerId>,
    ) -> Result<Box<dyn NetNamespace>> {
        let netns = self
            .namespaces
            .join(path)
            .await
            .map_err(|e| Error::NamespaceRetrieve {
                id: id.cloned(),
                path: path.to_string(),
                source: Box::new(e),
            })?;

        tracing::debug!(path = %path, "Joined network namespace");
        Ok(netns)
    }

    /// Ask the plugin for the container's IP address
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if the container has no namespace,
    /// [`Error::PluginStatus`] if the plugin query fails, or
    /// [`Error::AddressParse`] if the plugin answers with something that is
    /// not an IP address
    pub async fn container_ip(&self, ctr: &Container) -> Result<IpAddr> {
        let Some(path) = ctr.netns_path() else {
            return Err(Error::InvalidState {
                id: ctr.id().clone(),
                operation: "get IP",
            });
        };

        let network = self.pod_network(ctr, path);
        let address = self
            .call_plugin("status", self.plugin.pod_network_status(&network))
            .await
            .map_err(|e| Error::PluginStatus {
                id: ctr.id().clone(),
                source: Box::new(e),
            })?;

        address.parse().map_err(|_| Error::AddressParse {
            id: ctr.id().clone(),
            address,
        })
    }

    /// Tear down the container's network and release its namespace
    ///
    /// A container without a namespace is left alone. Plugin teardown
    /// failures are reported as [`NetworkEvent::TeardownFailed`] and do not
    /// stop the release. If the release fails the handle stays on the
    /// container so teardown can be retried.
    ///
    /// # Errors
    /// Returns [`Error::NamespaceRelease`] if the namespace cannot be released
    pub async fn teardown_netns(&self, ctr: &mut Container) -> Result<()> {
        let Some(path) = ctr.netns_path().map(str::to_string) else {
            tracing::debug!(container_id = %ctr.id(), "No network namespace to tear down");
            return Ok(());
        };
        let id = ctr.id().clone();

        let network = self.pod_network(ctr, &path);
        self.teardown_plugin(&network, &id).await;

        if let Some(netns) = ctr.netns_mut() {
            netns.close().await.map_err(|e| Error::NamespaceRelease {
                id: id.clone(),
                source: Box::new(e),
            })?;
        }
        ctr.take_netns();

        self.emit(NetworkEvent::NamespaceReleased {
            id,
            path,
            timestamp: SystemTime::now(),
        });
        Ok(())
    }

    /// Rebuild a container from saved state, rejoining its namespace
    ///
    /// # Errors
    /// Returns [`Error::NamespaceRetrieve`] carrying the container ID if the
    /// recorded namespace cannot be opened
    pub async fn restore(&self, state: ContainerNetworkState) -> Result<Container> {
        let mut ctr = Container::new(state.id, state.name).with_port_mappings(state.port_mappings);

        if let Some(path) = state.netns_path {
            let netns = self.retrieve(&path, Some(ctr.id())).await?;
            ctr.set_netns(netns);
        }

        Ok(ctr)
    }

    /// Tear down the plugin configuration recorded in `state` when its
    /// namespace no longer exists
    ///
    /// There is no namespace to release, but the plugin still holds the
    /// addresses and port forwards it set up for the container. Failures are
    /// reported as [`NetworkEvent::TeardownFailed`], the same as in
    /// [`teardown_netns`](Self::teardown_netns).
    pub async fn teardown_stale(&self, state: &ContainerNetworkState) {
        let Some(ref path) = state.netns_path else {
            return;
        };

        let network = pod_network(&state.id, &state.name, path, &state.port_mappings);
        self.teardown_plugin(&network, &state.id).await;
    }

    async fn teardown_plugin(&self, network: &PodNetwork, id: &ContainerId) {
        if let Err(e) = self
            .call_plugin("teardown", self.plugin.teardown_pod(network))
            .await
        {
            let err = Error::PluginTeardown {
                id: id.clone(),
                source: Box::new(e),
            };
            self.emit(NetworkEvent::TeardownFailed {
                id: id.clone(),
                path: network.namespace_path.clone(),
                message: error_chain(&err),
                timestamp: SystemTime::now(),
            });
        }
    }

    fn pod_network(&self, ctr: &Container, path: &str) -> PodNetwork {
        pod_network(ctr.id(), ctr.name(), path, ctr.port_mappings())
    }

    async fn call_plugin<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        let timeout = self.config.plugin_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| Error::PluginTimeout { operation, timeout })?
    }

    fn emit(&self, event: NetworkEvent) {
        event.emit_trace();
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("plugin", &self.plugin.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Render an error with all of its causes, outermost first
fn error_chain(err: &Error) -> String {
    use std::error::Error as _;

    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
