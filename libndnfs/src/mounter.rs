//! Local mount executor.
//!
//! The driver performs every local filesystem effect through
//! [`MountExecutor`]:
//!
//! 1. **EnsureDir**: create the local mount directory.
//! 2. **IsMounted**: exact mount-table lookup for a path.
//! 3. **Mount**: NFS-mount `address:share` at the local path.
//! 4. **Unmount**: detach the NFS mount.
//! 5. **RemoveDir**: remove the (now empty) mount directory.
//!
//! [`SystemMounter`] is the production implementation.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::error::NdnfsError;

/// Mount table consulted by [`SystemMounter::is_mounted`].
const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Local mount / unmount primitives.
#[async_trait]
pub trait MountExecutor: Send + Sync {
    /// Create `path` and any missing parents.
    async fn ensure_dir(&self, path: &Path) -> Result<(), NdnfsError>;

    /// `true` when `path` is itself a mount point.
    async fn is_mounted(&self, path: &Path) -> Result<bool, NdnfsError>;

    /// Mount the NFS export `endpoint` (`address:/share`) at `path`.
    async fn mount(&self, endpoint: &str, path: &Path) -> Result<(), NdnfsError>;

    async fn unmount(&self, path: &Path) -> Result<(), NdnfsError>;

    /// Remove the empty directory at `path`.
    async fn remove_dir(&self, path: &Path) -> Result<(), NdnfsError>;
}

/// [`MountExecutor`] backed by the host: `mount(8)` for NFS mounts,
/// `umount(2)` for unmounts and `/proc/self/mounts` for lookups.
#[derive(Debug, Clone, Default)]
pub struct SystemMounter {
    /// Extra `-o` options passed to `mount -t nfs`.
    mount_options: Option<String>,
}

impl SystemMounter {
    pub fn new(mount_options: Option<String>) -> Self {
        Self { mount_options }
    }
}

/// Return `true` if `path` appears in the mount-point column of a
/// `/proc/self/mounts`-formatted table.
///
/// The comparison is exact: `/mnt/vol` does not match `/mnt/vol2`. Mount
/// tables escape whitespace as octal (`\040`), so paths containing spaces
/// are escaped the same way before comparing.
pub fn mount_table_contains(table: &str, path: &str) -> bool {
    let escaped = path
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
        .replace('\n', "\\012");
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    table
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(escaped.as_str()))
}

#[async_trait]
impl MountExecutor for SystemMounter {
    async fn ensure_dir(&self, path: &Path) -> Result<(), NdnfsError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| NdnfsError::exec("mkdir", path.to_string_lossy(), e))
    }

    async fn is_mounted(&self, path: &Path) -> Result<bool, NdnfsError> {
        let table = tokio::fs::read_to_string(PROC_MOUNTS)
            .await
            .map_err(|e| NdnfsError::exec("read mount table", PROC_MOUNTS, e))?;
        Ok(mount_table_contains(&table, &path.to_string_lossy()))
    }

    #[instrument(skip(self))]
    async fn mount(&self, endpoint: &str, path: &Path) -> Result<(), NdnfsError> {
        let mut cmd = tokio::process::Command::new("mount");
        cmd.args(["-t", "nfs"]);
        if let Some(opts) = &self.mount_options {
            cmd.args(["-o", opts]);
        }
        cmd.arg(endpoint).arg(path);
        debug!(?cmd, "running mount");

        let output = cmd
            .output()
            .await
            .map_err(|e| NdnfsError::exec("mount", path.to_string_lossy(), e))?;
        if !output.status.success() {
            return Err(NdnfsError::exec(
                "mount",
                path.to_string_lossy(),
                format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        info!(%endpoint, path = %path.display(), "nfs export mounted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unmount(&self, path: &Path) -> Result<(), NdnfsError> {
        nix::mount::umount(path)
            .map_err(|e| NdnfsError::exec("umount", path.to_string_lossy(), e))?;
        info!(path = %path.display(), "nfs export unmounted");
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), NdnfsError> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|e| NdnfsError::exec("rmdir", path.to_string_lossy(), e))
    }
}
