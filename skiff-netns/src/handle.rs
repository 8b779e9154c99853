//! Network namespace handles
//!
//! A handle owns one OS network namespace and is released exactly once with
//! [`NetNamespace::close`]. Handles come from a [`NamespaceProvider`], which
//! either allocates a fresh namespace or opens an existing one by path.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sched::{CloneFlags, unshare};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use skiff_core::{ContainerId, Error, Result};

use crate::config::NetworkConfig;

/// An open network namespace
#[async_trait]
pub trait NetNamespace: Send + Sync + fmt::Debug {
    /// Filesystem path of the namespace
    fn path(&self) -> &str;

    /// Whether the handle has been released
    fn is_closed(&self) -> bool;

    /// Release the namespace
    ///
    /// On failure the handle stays open so the release can be retried.
    ///
    /// # Errors
    /// Returns error if the handle is already closed or the OS resource
    /// cannot be released
    async fn close(&mut self) -> Result<()>;
}

/// Source of network namespace handles
#[async_trait]
pub trait NamespaceProvider: Send + Sync {
    /// Allocate a new network namespace for a container
    ///
    /// # Errors
    /// Returns error if the namespace cannot be created
    async fn create(&self, id: &ContainerId) -> Result<Box<dyn NetNamespace>>;

    /// Open the existing network namespace at `path`
    ///
    /// # Errors
    /// Returns error if `path` is not a live network namespace
    async fn join(&self, path: &str) -> Result<Box<dyn NetNamespace>>;
}

const PROC_SUPER_MAGIC: i64 = 0x9fa0;
const NSFS_MAGIC: i64 = 0x6e73_6673;

/// Namespaces backed by the Linux kernel
///
/// New namespaces are made persistent by bind-mounting them under the
/// configured directory, the same layout `ip netns` uses.
#[derive(Debug, Clone)]
pub struct OsNamespaces {
    config: NetworkConfig,
}

impl OsNamespaces {
    /// Create a provider using the given configuration
    #[must_use]
    pub const fn new(config: NetworkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NamespaceProvider for OsNamespaces {
    async fn create(&self, id: &ContainerId) -> Result<Box<dyn NetNamespace>> {
        let path = self.config.namespace_path(id);
        let netns = tokio::task::spawn_blocking(move || OsNetNs::create_at(path)).await??;
        Ok(Box::new(netns))
    }

    async fn join(&self, path: &str) -> Result<Box<dyn NetNamespace>> {
        let mounted = self.config.is_managed_path(Path::new(path));
        let path = path.to_string();
        let netns = tokio::task::spawn_blocking(move || OsNetNs::open(path, mounted)).await??;
        Ok(Box::new(netns))
    }
}

/// Handle to a kernel network namespace
pub struct OsNetNs {
    path: String,
    file: Option<File>,
    mounted: bool,
}

impl OsNetNs {
    /// Create a new namespace and bind-mount it at `path`
    ///
    /// The namespace is created from a short-lived thread so the calling
    /// thread stays in its original namespace.
    ///
    /// # Errors
    /// Returns error if the mount point exists or any syscall fails. Nothing
    /// is left behind on failure.
    pub fn create_at(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::namespace(format!("failed to create {}: {e}", path.display())))?;

        let target = path.clone();
        let mounted = std::thread::spawn(move || -> Result<()> {
            unshare(CloneFlags::CLONE_NEWNET)?;
            let source = format!("/proc/self/task/{}/ns/net", nix::unistd::gettid());
            mount(
                Some(source.as_str()),
                &target,
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )?;
            Ok(())
        })
        .join()
        .map_err(|_| Error::namespace("namespace creation thread panicked"))?;

        if let Err(e) = mounted {
            remove_mount_point(&path);
            return Err(e);
        }

        let path = path.to_string_lossy().into_owned();
        match File::open(&path) {
            Ok(file) => {
                debug!(path = %path, "Created network namespace");
                Ok(Self {
                    path,
                    file: Some(file),
                    mounted: true,
                })
            }
            Err(e) => {
                if let Err(umount_err) = umount2(path.as_str(), MntFlags::MNT_DETACH) {
                    warn!(path = %path, error = %umount_err, "Failed to unmount namespace");
                }
                remove_mount_point(Path::new(&path));
                Err(e.into())
            }
        }
    }

    /// Open an existing namespace
    ///
    /// When `mounted` is set the handle takes over the bind mount and removes
    /// it on close.
    ///
    /// # Errors
    /// Returns error if `path` cannot be opened or is not a namespace file
    pub fn open(path: String, mounted: bool) -> Result<Self> {
        let stat = nix::sys::statfs::statfs(path.as_str())?;
        if !is_namespace_fs(stat.filesystem_type()) {
            return Err(Error::namespace(format!(
                "unknown FS magic on {path:?}: {:x}",
                stat.filesystem_type().0
            )));
        }

        let file = File::open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
            mounted,
        })
    }
}

#[allow(clippy::unnecessary_cast, clippy::cast_possible_wrap)]
fn is_namespace_fs(fs_type: nix::sys::statfs::FsType) -> bool {
    let magic = fs_type.0 as i64;
    magic == NSFS_MAGIC || magic == PROC_SUPER_MAGIC
}

fn remove_mount_point(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove namespace mount point");
        }
    }
}

#[async_trait]
impl NetNamespace for OsNetNs {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    async fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::namespace(format!(
                "namespace {} is already closed",
                self.path
            )));
        }

        if self.mounted {
            let path = self.path.clone();
            tokio::task::spawn_blocking(move || unmount_and_remove(&path)).await??;
        }

        self.file = None;
        debug!(path = %self.path, "Closed network namespace");
        Ok(())
    }
}

fn unmount_and_remove(path: &str) -> Result<()> {
    match umount2(path, MntFlags::MNT_DETACH) {
        // EINVAL: no longer a mount point, an earlier attempt got this far
        Ok(()) | Err(Errno::EINVAL) => {}
        Err(e) => {
            return Err(Error::namespace(format!(
                "failed to unmount namespace {path}: {e}"
            )));
        }
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::namespace(format!(
            "failed to remove namespace {path}: {e}"
        ))),
    }
}

impl fmt::Debug for OsNetNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsNetNs")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .field("mounted", &self.mounted)
            .finish()
    }
}

impl Drop for OsNetNs {
    fn drop(&mut self) {
        if self.file.is_some() && self.mounted {
            debug!(path = %self.path, "Network namespace handle dropped, mount left in place");
        }
    }
}
