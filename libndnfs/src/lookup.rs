//! Resolution of volume identifiers against a [`ClusterSnapshot`].
//!
//! Matching is exact; a lookup either finds one export or fails with
//! [`NdnfsError::NotFound`]. Snapshots hold tens of services, so both
//! lookups are plain linear scans.

use crate::error::NdnfsError;
use crate::identifier::VolumeId;
use crate::topology::{ClusterSnapshot, ServiceExports};
use crate::types::{NedgeNfsVolume, NedgeService};

/// A served volume: the service, its export, and the NFS endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExport {
    pub service: NedgeService,
    pub export: NedgeNfsVolume,
    /// `address:share`, reachable by NFS clients.
    pub endpoint: String,
}

impl ResolvedExport {
    fn new(entry: &ServiceExports, export: &NedgeNfsVolume) -> Result<Self, NdnfsError> {
        let endpoint = entry.service.endpoint_for(export).ok_or_else(|| {
            NdnfsError::Backend(format!("service {} has no network address", entry.service.name))
        })?;
        Ok(Self {
            service: entry.service.clone(),
            export: export.clone(),
            endpoint,
        })
    }

    /// Identifier of the export with its serving service filled in.
    pub fn volume_id(&self, id: &VolumeId) -> VolumeId {
        id.clone().with_service(self.service.name.clone())
    }
}

/// Find the export whose volume id equals `id.format_full()`.
pub fn find_by_identifier(
    snapshot: &ClusterSnapshot,
    id: &VolumeId,
) -> Result<ResolvedExport, NdnfsError> {
    let full = id.format_full();
    for entry in snapshot.iter() {
        if let Some(export) = entry.exports.iter().find(|e| e.volume_id == full) {
            return ResolvedExport::new(entry, export);
        }
    }
    Err(NdnfsError::NotFound(format!("volume {full}")))
}

/// First service (in snapshot order) serving `cluster/tenant/bucket`.
pub fn find_service_by_backend_path<'a>(
    snapshot: &'a ClusterSnapshot,
    cluster: &str,
    tenant: &str,
    bucket: &str,
) -> Result<&'a ServiceExports, NdnfsError> {
    let path = format!("{cluster}/{tenant}/{bucket}");
    snapshot
        .iter()
        .find(|entry| entry.exports.iter().any(|e| e.backend_path == path))
        .ok_or_else(|| NdnfsError::NotFound(format!("export of {path}")))
}

/// Resolve `id` to its export: by full identifier when the service is
/// known, otherwise by backend path.
pub fn resolve(snapshot: &ClusterSnapshot, id: &VolumeId) -> Result<ResolvedExport, NdnfsError> {
    if id.service.is_some() {
        return find_by_identifier(snapshot, id);
    }
    let entry = find_service_by_backend_path(snapshot, &id.cluster, &id.tenant, &id.bucket)?;
    let path = id.backend_path();
    let export = entry
        .exports
        .iter()
        .find(|e| e.backend_path == path)
        .ok_or_else(|| NdnfsError::NotFound(format!("export of {path}")))?;
    ResolvedExport::new(entry, export)
}
