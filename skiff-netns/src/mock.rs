//! In-memory namespace provider for tests

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use skiff_core::{ContainerId, Error, Result};

use crate::handle::{NamespaceProvider, NetNamespace};

/// Namespace provider that never touches the kernel
///
/// Created namespaces get `/proc/<pid>/ns/net` style paths with made-up
/// PIDs. The provider tracks which of them are live so tests can check for
/// leaks, and can be told to fail creation or release.
#[derive(Clone)]
pub struct MockNamespaces {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    next_pid: u32,
    live: Vec<String>,
    created: usize,
    released: usize,
    create_error: Option<String>,
    close_error: Option<String>,
}

impl MockNamespaces {
    /// First PID handed out
    pub const FIRST_PID: u32 = 4821;

    /// Create an empty provider
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_pid: Self::FIRST_PID,
                live: Vec::new(),
                created: 0,
                released: 0,
                create_error: None,
                close_error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make namespace creation fail
    pub fn fail_create(&self, message: impl Into<String>) {
        self.lock().create_error = Some(message.into());
    }

    /// Make namespace release fail
    pub fn fail_close(&self, message: impl Into<String>) {
        self.lock().close_error = Some(message.into());
    }

    /// Clear injected failures
    pub fn heal(&self) {
        let mut state = self.lock();
        state.create_error = None;
        state.close_error = None;
    }

    /// Register a namespace that exists outside this provider
    pub fn insert_existing(&self, path: impl Into<String>) {
        self.lock().live.push(path.into());
    }

    /// Paths of namespaces that have not been released
    #[must_use]
    pub fn live(&self) -> Vec<String> {
        self.lock().live.clone()
    }

    /// Whether a namespace at `path` is live
    #[must_use]
    pub fn is_live(&self, path: &str) -> bool {
        self.lock().live.iter().any(|p| p == path)
    }

    /// Number of namespaces created
    #[must_use]
    pub fn created(&self) -> usize {
        self.lock().created
    }

    /// Number of namespaces released
    #[must_use]
    pub fn released(&self) -> usize {
        self.lock().released
    }
}

impl Default for MockNamespaces {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockNamespaces {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNamespaces").finish_non_exhaustive()
    }
}

#[async_trait]
impl NamespaceProvider for MockNamespaces {
    async fn create(&self, id: &ContainerId) -> Result<Box<dyn NetNamespace>> {
        let mut state = self.lock();

        if let Some(ref message) = state.create_error {
            return Err(Error::namespace(message.clone()));
        }

        let path = format!("/proc/{}/ns/net", state.next_pid);
        state.next_pid += 1;
        state.created += 1;
        state.live.push(path.clone());

        tracing::debug!(container_id = %id, path = %path, "Mock: Created namespace");

        Ok(Box::new(MockNetNs {
            path,
            closed: false,
            state: Arc::clone(&self.state),
        }))
    }

    async fn join(&self, path: &str) -> Result<Box<dyn NetNamespace>> {
        if !self.is_live(path) {
            return Err(Error::namespace(format!("{path} is not a network namespace")));
        }

        Ok(Box::new(MockNetNs {
            path: path.to_string(),
            closed: false,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Handle produced by [`MockNamespaces`]
pub struct MockNetNs {
    path: String,
    closed: bool,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl NetNamespace for MockNetNs {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::namespace(format!(
                "namespace {} is already closed",
                self.path
            )));
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref message) = state.close_error {
            return Err(Error::namespace(message.clone()));
        }

        state.live.retain(|p| p != &self.path);
        state.released += 1;
        self.closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for MockNetNs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNetNs")
            .field("path", &self.path)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
