//! Per-request view of the cluster's NFS services.
//!
//! A [`ClusterSnapshot`] is built fresh for every resolution and dropped when
//! the operation finishes. Nothing is cached between calls, so the staleness
//! window is a single operation.

use tracing::{debug, warn};

use crate::cluster::ClusterApi;
use crate::error::NdnfsError;
use crate::types::{NedgeNfsVolume, NedgeService};

/// An eligible service together with the exports it served when the
/// snapshot was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceExports {
    pub service: NedgeService,
    pub exports: Vec<NedgeNfsVolume>,
}

/// Ordered list of eligible services and their exports, in the order the
/// cluster reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    entries: Vec<ServiceExports>,
}

impl ClusterSnapshot {
    /// Build a snapshot from the cluster.
    ///
    /// With `service` set only that service is fetched; otherwise every
    /// service is listed. Services outside a non-empty `allow_list` and
    /// services failing [`NedgeService::is_eligible`] are dropped. A failure
    /// to fetch one service's exports excludes that service; a failure to
    /// fetch the service list fails the build.
    pub async fn build(
        client: &dyn ClusterApi,
        service: Option<&str>,
        allow_list: &[String],
    ) -> Result<Self, NdnfsError> {
        let services = match service {
            Some(name) => vec![client.get_service(name).await?],
            None => client.list_services().await?,
        };

        let mut entries = Vec::with_capacity(services.len());
        for svc in services {
            if !allow_list.is_empty() && !allow_list.iter().any(|a| *a == svc.name) {
                debug!(service = %svc.name, "service not in allow-list, skipping");
                continue;
            }
            if !svc.is_eligible() {
                debug!(
                    service = %svc.name,
                    kind = %svc.kind,
                    status = %svc.status,
                    "service not eligible, skipping"
                );
                continue;
            }
            match client.list_nfs_volumes(&svc.name).await {
                Ok(exports) => entries.push(ServiceExports {
                    service: svc,
                    exports,
                }),
                Err(e) => {
                    warn!(service = %svc.name, error = %e, "failed to list exports, excluding service");
                }
            }
        }

        debug!(services = entries.len(), "cluster snapshot built");
        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<ServiceExports>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceExports> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find_service(&self, name: &str) -> Option<&ServiceExports> {
        self.entries.iter().find(|e| e.service.name == name)
    }
}
