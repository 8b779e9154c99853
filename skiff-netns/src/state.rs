//! Persisted container network state
//!
//! The lifecycle itself keeps no state outside the [`Container`](crate::Container).
//! A runtime that outlives a single process saves a [`ContainerNetworkState`]
//! after `create` and rebuilds the container from it later, rejoining the
//! recorded namespace.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use skiff_core::{ContainerId, PortMapping, Result};

/// Serializable snapshot of a container's network state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerNetworkState {
    /// Container ID
    pub id: ContainerId,
    /// Display name
    pub name: String,
    /// Port mappings
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
    /// Namespace path while networking is configured
    #[serde(default)]
    pub netns_path: Option<String>,
}

/// Directory of `<id>.json` state files
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Use `dir` for state files
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// State directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, id: &ContainerId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write the state for a container, replacing any previous state
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be written
    pub fn save(&self, state: &ContainerNetworkState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let path = self.file_for(&state.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!(container_id = %state.id, path = %path.display(), "Saved network state");
        Ok(())
    }

    /// Read the state for a container, `None` if there is none
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self, id: &ContainerId) -> Result<Option<ContainerNetworkState>> {
        match std::fs::read(self.file_for(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the state for a container; missing state is not an error
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed
    pub fn remove(&self, id: &ContainerId) -> Result<()> {
        match std::fs::remove_file(self.file_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ContainerNetworkState {
        ContainerNetworkState {
            id: ContainerId::new("abc123").unwrap(),
            name: "web".to_string(),
            port_mappings: vec![PortMapping::tcp(8080, 80)],
            netns_path: Some("/run/netns/skiff-abc123".to_string()),
        }
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        let state = state();

        assert_eq!(store.load(&state.id).unwrap(), None);

        store.save(&state).unwrap();
        assert_eq!(store.load(&state.id).unwrap(), Some(state.clone()));

        store.remove(&state.id).unwrap();
        assert_eq!(store.load(&state.id).unwrap(), None);

        // Removing twice is fine
        store.remove(&state.id).unwrap();
    }

    #[test]
    fn test_load_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        std::fs::write(dir.path().join("abc123.json"), b"{not json").unwrap();

        let id = ContainerId::new("abc123").unwrap();
        assert!(store.load(&id).is_err());
    }

    #[test]
    fn test_missing_optional_fields() {
        let state: ContainerNetworkState =
            serde_json::from_str(r#"{"id": "abc123", "name": "web"}"#).unwrap();
        assert!(state.port_mappings.is_empty());
        assert!(state.netns_path.is_none());
    }
}
