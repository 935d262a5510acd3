//! Core data types: NFS services, their exports, and the volume views
//! returned to plugin callers.
//!
//! Service and export values are immutable snapshots of remote cluster state.
//! They are never mutated locally; changes are pushed through a
//! [`ClusterApi`](crate::cluster::ClusterApi) and re-observed on the next
//! snapshot.

use std::collections::HashMap;
use std::str::FromStr;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::error::NdnfsError;

/// Service type string of NFS gateways.
pub const SERVICE_KIND_NFS: &str = "nfs";
/// Status string of a running service.
pub const SERVICE_STATUS_ENABLED: &str = "enabled";

/// Smallest accepted bucket chunk size in bytes.
pub const MIN_CHUNK_SIZE: u64 = 4096;
/// Largest accepted bucket chunk size in bytes.
pub const MAX_CHUNK_SIZE: u64 = 1_048_576;
/// Chunk size used when neither the request nor the configuration sets one.
pub const DEFAULT_CHUNK_SIZE: u64 = MAX_CHUNK_SIZE;

/// Prefix of cluster-side bucket option names.
pub const BUCKET_OPTION_PREFIX: &str = "ccow-";
/// Bucket option carrying the chunk size; set from `chunksize` only.
pub const CHUNK_SIZE_BUCKET_OPTION: &str = "ccow-chunkmap-chunk-size";

// ---------------------------------------------------------------------------
// Cluster-side objects
// ---------------------------------------------------------------------------

/// One NFS export served by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NedgeNfsVolume {
    /// Full path of the identifier this export serves,
    /// `service@cluster/tenant/bucket`.
    pub volume_id: String,
    /// `cluster/tenant/bucket` of the backing bucket.
    pub backend_path: String,
    /// NFS share path on the service, e.g. `/tenant/bucket`.
    pub share_path: String,
}

/// A backend service instance as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NedgeService {
    pub name: String,
    /// Service type, `"nfs"` for NFS gateways.
    pub kind: String,
    /// `"enabled"` when the service is running.
    pub status: String,
    /// Client-facing addresses, in the order the cluster reports them.
    #[serde(default)]
    pub network_addresses: Vec<String>,
    /// Exports; empty when obtained from `list_services`.
    #[serde(default)]
    pub exports: Vec<NedgeNfsVolume>,
}

impl NedgeService {
    /// A service can host volumes when it is an enabled NFS service with at
    /// least one reachable address.
    pub fn is_eligible(&self) -> bool {
        self.kind == SERVICE_KIND_NFS
            && self.status == SERVICE_STATUS_ENABLED
            && !self.network_addresses.is_empty()
    }

    /// `address:share` for an export of this service, using the first
    /// network address.
    pub fn endpoint_for(&self, export: &NedgeNfsVolume) -> Option<String> {
        self.network_addresses
            .first()
            .map(|addr| format!("{addr}:{}", export.share_path))
    }
}

// ---------------------------------------------------------------------------
// Plugin-facing views
// ---------------------------------------------------------------------------

/// Scope advertised to the container engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    #[serde(rename = "Scope")]
    pub scope: String,
}

impl Default for Capability {
    fn default() -> Self {
        Self {
            scope: "local".to_owned(),
        }
    }
}

/// A volume as reported by `Get` / `List`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeInfo {
    #[serde(rename = "Name")]
    pub name: String,
    /// Local mount path of the volume.
    #[serde(rename = "Mountpoint")]
    pub mountpoint: String,
    /// `endpoint` (NFS `address:share`) and `service`.
    #[serde(rename = "Status", default, skip_serializing_if = "HashMap::is_empty")]
    pub status: HashMap<String, String>,
}

impl VolumeInfo {
    pub fn endpoint(&self) -> Option<&str> {
        self.status.get("endpoint").map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Create options
// ---------------------------------------------------------------------------

/// Options recognized by `Create`, decoded from the string map supplied by
/// the container engine. Unknown keys other than `ccow-*` bucket options
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Bucket quota in bytes.
    pub size: Option<u64>,
    /// NFS ACL string applied on the serving service.
    pub acl: Option<String>,
    /// Explicit target service, bypassing auto-selection.
    pub service: Option<String>,
    /// Bucket chunk size in bytes.
    pub chunk_size: Option<u64>,
    /// `ccow-*` keys forwarded verbatim as bucket options.
    pub bucket_options: HashMap<String, String>,
}

impl CreateOptions {
    pub fn from_map(opts: &HashMap<String, String>) -> Result<Self, NdnfsError> {
        let get = |key: &str| {
            opts.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let size = get("size")
            .map(|v| {
                ByteSize::from_str(v)
                    .map(|b| b.as_u64())
                    .map_err(|e| NdnfsError::InvalidArgument(format!("size {v:?}: {e}")))
            })
            .transpose()?;

        let chunk_size = get("chunksize")
            .map(|v| {
                v.parse::<u64>().map_err(|e| {
                    NdnfsError::InvalidArgument(format!("chunksize {v:?}: {e}"))
                })
            })
            .transpose()?;
        if let Some(chunk) = chunk_size {
            validate_chunk_size(chunk)?;
        }

        let bucket_options = opts
            .iter()
            .filter(|(k, _)| {
                k.starts_with(BUCKET_OPTION_PREFIX) && k.as_str() != CHUNK_SIZE_BUCKET_OPTION
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            size,
            acl: get("acl").map(str::to_owned),
            service: get("service").map(str::to_owned),
            chunk_size,
            bucket_options,
        })
    }
}

/// Chunk sizes must be a power of two in
/// [`MIN_CHUNK_SIZE`]`..=`[`MAX_CHUNK_SIZE`].
pub fn validate_chunk_size(chunk: u64) -> Result<(), NdnfsError> {
    if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk) || !chunk.is_power_of_two() {
        return Err(NdnfsError::InvalidArgument(format!(
            "chunksize {chunk} must be a power of two in {MIN_CHUNK_SIZE}..={MAX_CHUNK_SIZE}"
        )));
    }
    Ok(())
}
