//! # libndnfs: NexentaEdge NFS volumes for container engines
//!
//! `libndnfs` maps a container volume name onto an NFS export of a bucket on
//! a NexentaEdge cluster. It picks the service that serves the bucket,
//! provisions or tears down the bucket and its export, and drives the local
//! NFS mount lifecycle. It follows the usual conventions of this workspace
//! (Tokio async runtime, `tracing` for observability, `thiserror` for
//! structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`identifier`] | `[service@]cluster/tenant/bucket` name grammar. |
//! | [`types`] | Services, exports, volume views and create options. |
//! | [`error`] | [`NdnfsError`] enum covering all failure modes. |
//! | [`cluster`] | [`ClusterApi`] trait consumed by the driver. |
//! | [`topology`] | Per-request [`ClusterSnapshot`] of eligible services. |
//! | [`selector`] | Least-loaded service selection. |
//! | [`lookup`] | Identifier to export resolution. |
//! | [`mounter`] | [`MountExecutor`] trait and the host implementation. |
//! | [`driver`] | [`VolumeDriver`] lifecycle state machine. |
//! | [`backend`] | NexentaEdge REST implementation of [`ClusterApi`]. |
//! | [`message`] | Volume-plugin protocol messages. |
//! | [`transport`] | Unix-socket plugin server built on `axum`. |
//! | [`config`] | JSON configuration file. |

pub mod backend;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod error;
pub mod identifier;
pub mod lookup;
pub mod message;
pub mod mounter;
pub mod selector;
pub mod topology;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export the most commonly used items at crate root for convenience.
pub use cluster::ClusterApi;
pub use config::NdnfsConfig;
pub use driver::{DriverConfig, VolumeDriver};
pub use error::NdnfsError;
pub use identifier::{VolumeDefaults, VolumeId};
pub use mounter::{MountExecutor, SystemMounter};
pub use topology::ClusterSnapshot;
pub use types::*;
