//! Cluster management API contract.
//!
//! [`ClusterApi`] is what the driver consumes to read topology and to
//! provision buckets and exports. Authentication, wire format and retries
//! belong to the implementation (see [`crate::backend::nedge`]); the driver
//! only sees typed results and [`NdnfsError`] classifications.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::NdnfsError;
use crate::types::{NedgeNfsVolume, NedgeService};

/// Storage-cluster management operations.
///
/// Implementations must classify failures: an already existing bucket or
/// serve entry is [`NdnfsError::Conflict`], a missing object is
/// [`NdnfsError::NotFound`], and every other failure is
/// [`NdnfsError::Backend`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_clusters(&self) -> Result<Vec<String>, NdnfsError>;

    async fn list_tenants(&self, cluster: &str) -> Result<Vec<String>, NdnfsError>;

    /// All services, with network addresses but without exports populated.
    async fn list_services(&self) -> Result<Vec<NedgeService>, NdnfsError>;

    /// One service with network addresses and exports populated.
    async fn get_service(&self, name: &str) -> Result<NedgeService, NdnfsError>;

    /// Exports currently served by `service`.
    async fn list_nfs_volumes(&self, service: &str) -> Result<Vec<NedgeNfsVolume>, NdnfsError>;

    async fn is_bucket_exist(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<bool, NdnfsError>;

    async fn create_bucket(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        chunk_size: u64,
        options: &HashMap<String, String>,
    ) -> Result<(), NdnfsError>;

    async fn delete_bucket(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        force: bool,
    ) -> Result<(), NdnfsError>;

    async fn set_bucket_quota(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        quota: u64,
    ) -> Result<(), NdnfsError>;

    async fn serve_bucket(
        &self,
        service: &str,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<(), NdnfsError>;

    async fn unserve_bucket(
        &self,
        service: &str,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<(), NdnfsError>;

    /// Set the NFS ACL of `tenant/bucket` on `service`; an empty `acl`
    /// clears it.
    async fn set_service_acl(
        &self,
        service: &str,
        tenant: &str,
        bucket: &str,
        acl: &str,
    ) -> Result<(), NdnfsError>;

    /// Liveness of the management API.
    async fn check_health(&self) -> Result<(), NdnfsError>;
}
