//! Volume lifecycle orchestration.
//!
//! [`VolumeDriver`] implements the volume-plugin operations on top of a
//! [`ClusterApi`] and a [`MountExecutor`]. A volume moves through
//!
//! ```text
//! Unprovisioned -> BucketExists -> Served -> Mounted <-> Unmounted -> Unserved -> Deleted
//! ```
//!
//! and every transition is idempotent: an existing bucket or serve entry is
//! not an error on `create`, an existing mount is not remounted, and an
//! absent bucket is not an error on `remove`.
//!
//! # Locking
//!
//! One instance-wide mutex serializes the mutating operations (`create`,
//! `mount`, `unmount`, `remove`). Read operations (`get`, `list`, `path`,
//! `capabilities`) do not take it. There is no per-volume reservation: once
//! an `unmount` releases the lock, a `remove` may run before another
//! caller's `mount`.
//!
//! Cluster state is never cached. Every operation builds its own
//! [`ClusterSnapshot`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cluster::ClusterApi;
use crate::error::NdnfsError;
use crate::identifier::{VolumeDefaults, VolumeId};
use crate::lookup::{self, ResolvedExport};
use crate::mounter::MountExecutor;
use crate::selector::select_least_loaded;
use crate::topology::ClusterSnapshot;
use crate::types::{Capability, CreateOptions, DEFAULT_CHUNK_SIZE, VolumeInfo};

/// Default local mount root.
pub const DEFAULT_MOUNT_ROOT: &str = "/var/lib/ndnfs";

/// Driver settings derived from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Fallbacks for fields a volume name leaves out.
    pub defaults: VolumeDefaults,
    /// Services the driver may use; empty allows all.
    pub service_filter: Vec<String>,
    /// Bucket chunk size when `chunksize` is not given.
    pub chunk_size: u64,
    /// Volumes are mounted at `<mount_root>/<cluster>/<tenant>/<bucket>`.
    pub mount_root: PathBuf,
    /// Pass `force` to the cluster when deleting buckets.
    pub force_bucket_deletion: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            defaults: VolumeDefaults::default(),
            service_filter: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            force_bucket_deletion: false,
        }
    }
}

/// Volume lifecycle driver.
pub struct VolumeDriver {
    cluster: Arc<dyn ClusterApi>,
    mounter: Arc<dyn MountExecutor>,
    config: DriverConfig,
    /// Serializes mutating operations.
    lock: Mutex<()>,
}

/// Swallow errors matching `tolerated`, logging them at debug level.
fn tolerate(
    result: Result<(), NdnfsError>,
    tolerated: fn(&NdnfsError) -> bool,
    what: &str,
) -> Result<(), NdnfsError> {
    match result {
        Err(e) if tolerated(&e) => {
            debug!(error = %e, "{what}: tolerated");
            Ok(())
        }
        other => other,
    }
}

/// The service prefix the caller wrote in `name`, if any.
fn explicit_service(name: &str) -> Option<&str> {
    name.split_once('@')
        .map(|(service, _)| service)
        .filter(|s| !s.is_empty())
}

impl VolumeDriver {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        mounter: Arc<dyn MountExecutor>,
        config: DriverConfig,
    ) -> Self {
        Self {
            cluster,
            mounter,
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capability {
        Capability::default()
    }

    /// Parse `name`, requiring cluster, tenant and bucket.
    fn resolve_path(&self, name: &str) -> Result<VolumeId, NdnfsError> {
        VolumeId::parse(name, &self.config.defaults)?.require_path(name)
    }

    fn mount_path(&self, id: &VolumeId) -> PathBuf {
        self.config
            .mount_root
            .join(&id.cluster)
            .join(&id.tenant)
            .join(&id.bucket)
    }

    async fn snapshot(&self, service: Option<&str>) -> Result<ClusterSnapshot, NdnfsError> {
        ClusterSnapshot::build(self.cluster.as_ref(), service, &self.config.service_filter).await
    }

    fn volume_info(&self, name: String, id: &VolumeId, export: &ResolvedExport) -> VolumeInfo {
        VolumeInfo {
            name,
            mountpoint: self.mount_path(id).to_string_lossy().into_owned(),
            status: HashMap::from([
                ("endpoint".to_owned(), export.endpoint.clone()),
                ("service".to_owned(), export.service.name.clone()),
            ]),
        }
    }

    /// Choose the service that will serve `id`.
    ///
    /// A named service must be present in its own filtered snapshot. Without
    /// one, a service already serving the bucket is reused, and only then
    /// is the least-loaded service picked.
    async fn choose_service(&self, id: &VolumeId) -> Result<(String, bool), NdnfsError> {
        match &id.service {
            Some(service) => {
                let snapshot = self.snapshot(Some(service)).await?;
                let entry = snapshot.find_service(service).ok_or_else(|| {
                    NdnfsError::NotFound(format!("eligible NFS service {service}"))
                })?;
                let path = id.backend_path();
                let served = entry.exports.iter().any(|e| e.backend_path == path);
                Ok((service.clone(), served))
            }
            None => {
                let snapshot = self.snapshot(None).await?;
                if let Ok(entry) = lookup::find_service_by_backend_path(
                    &snapshot,
                    &id.cluster,
                    &id.tenant,
                    &id.bucket,
                ) {
                    debug!(service = %entry.service.name, "bucket already served, reusing service");
                    return Ok((entry.service.name.clone(), true));
                }
                let entry = select_least_loaded(&snapshot)?;
                info!(
                    service = %entry.service.name,
                    exports = entry.exports.len(),
                    "auto-selected least loaded service"
                );
                Ok((entry.service.name.clone(), false))
            }
        }
    }

    /// Provision the bucket behind `name` and serve it over NFS.
    ///
    /// Returns the identifier with its serving service filled in.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn create(
        &self,
        name: &str,
        opts: &HashMap<String, String>,
    ) -> Result<VolumeId, NdnfsError> {
        let opts = CreateOptions::from_map(opts)?;
        let mut id = self.resolve_path(name)?;

        match (&opts.service, explicit_service(name)) {
            (Some(option), Some(named)) if option != named => {
                return Err(NdnfsError::InvalidArgument(format!(
                    "service option {option:?} conflicts with service {named:?} in volume name"
                )));
            }
            (Some(option), _) => id.service = Some(option.clone()),
            _ => {}
        }

        let _guard = self.lock.lock().await;

        let (service, already_served) = self.choose_service(&id).await?;
        let id = id.with_service(service.clone());
        let (cluster, tenant, bucket) = (&id.cluster, &id.tenant, &id.bucket);

        if self.cluster.is_bucket_exist(cluster, tenant, bucket).await? {
            debug!("bucket already exists");
        } else {
            let chunk_size = opts.chunk_size.unwrap_or(self.config.chunk_size);
            tolerate(
                self.cluster
                    .create_bucket(cluster, tenant, bucket, chunk_size, &opts.bucket_options)
                    .await,
                NdnfsError::is_conflict,
                "create bucket",
            )?;
        }

        if let Some(size) = opts.size {
            self.cluster
                .set_bucket_quota(cluster, tenant, bucket, size)
                .await?;
        }
        if let Some(acl) = &opts.acl {
            self.cluster
                .set_service_acl(&service, tenant, bucket, acl)
                .await?;
        }

        if already_served {
            debug!(%service, "bucket already served");
        } else {
            tolerate(
                self.cluster
                    .serve_bucket(&service, cluster, tenant, bucket)
                    .await,
                NdnfsError::is_conflict,
                "serve bucket",
            )?;
        }

        info!(volume_id = %id, "volume created");
        Ok(id)
    }

    /// Resolve one volume against a fresh snapshot.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn get(&self, name: &str) -> Result<VolumeInfo, NdnfsError> {
        let id = self.resolve_path(name)?;
        let snapshot = self.snapshot(id.service.as_deref()).await?;
        let export = lookup::resolve(&snapshot, &id)?;
        Ok(self.volume_info(name.to_owned(), &id, &export))
    }

    /// Every export of every eligible service, named in minimal form when
    /// the volume lives in the default cluster.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<VolumeInfo>, NdnfsError> {
        let snapshot = self
            .snapshot(self.config.defaults.service.as_deref())
            .await?;
        let default_cluster = self.config.defaults.cluster.as_deref();

        let mut volumes = Vec::new();
        for entry in snapshot.iter() {
            for export in &entry.exports {
                let id = match VolumeId::parse(&export.volume_id, &VolumeDefaults::default())
                    .and_then(|parsed| parsed.complete(&export.volume_id))
                {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(volume_id = %export.volume_id, error = %e, "skipping unparsable export");
                        continue;
                    }
                };
                let Some(endpoint) = entry.service.endpoint_for(export) else {
                    continue;
                };
                let resolved = ResolvedExport {
                    service: entry.service.clone(),
                    export: export.clone(),
                    endpoint,
                };
                volumes.push(self.volume_info(id.format_minimal(default_cluster), &id, &resolved));
            }
        }
        debug!(count = volumes.len(), "volumes listed");
        Ok(volumes)
    }

    /// Mount the volume's export at its local path and return the path.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn mount(&self, name: &str) -> Result<PathBuf, NdnfsError> {
        let id = self.resolve_path(name)?;
        let _guard = self.lock.lock().await;

        let snapshot = self.snapshot(id.service.as_deref()).await?;
        let export = lookup::resolve(&snapshot, &id)?;
        let path = self.mount_path(&id);

        if let Err(e) = self.mounter.ensure_dir(&path).await {
            warn!(path = %path.display(), error = %e, "failed to create mount directory");
        }
        if self.mounter.is_mounted(&path).await? {
            debug!(path = %path.display(), "already mounted");
            return Ok(path);
        }

        self.mounter.mount(&export.endpoint, &path).await?;
        info!(endpoint = %export.endpoint, path = %path.display(), "volume mounted");
        Ok(path)
    }

    /// Local mount path of the volume. Never touches the cluster.
    pub fn path(&self, name: &str) -> Result<PathBuf, NdnfsError> {
        Ok(self.mount_path(&self.resolve_path(name)?))
    }

    /// Unmount the volume if it is mounted and remove its mount directory.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn unmount(&self, name: &str) -> Result<(), NdnfsError> {
        let id = self.resolve_path(name)?;
        let _guard = self.lock.lock().await;

        let path = self.mount_path(&id);
        if self.mounter.is_mounted(&path).await? {
            self.mounter.unmount(&path).await?;
            info!(path = %path.display(), "volume unmounted");
        } else {
            debug!(path = %path.display(), "not mounted");
        }

        if let Err(e) = self.mounter.remove_dir(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove mount directory");
        }
        Ok(())
    }

    /// Clear the ACL, unserve the bucket and delete it if it still exists.
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn remove(&self, name: &str) -> Result<(), NdnfsError> {
        let id = self.resolve_path(name)?;
        let _guard = self.lock.lock().await;
        let (cluster, tenant, bucket) = (&id.cluster, &id.tenant, &id.bucket);

        // Only a service whose snapshot lists the bucket is unserved, so a
        // repeated remove never asks the cluster to unserve an absent entry.
        let snapshot = self.snapshot(id.service.as_deref()).await?;
        let serving = match &id.service {
            Some(service) => snapshot.find_service(service).filter(|entry| {
                let path = id.backend_path();
                entry.exports.iter().any(|e| e.backend_path == path)
            }),
            None => {
                lookup::find_service_by_backend_path(&snapshot, cluster, tenant, bucket).ok()
            }
        };
        let service = serving.map(|entry| entry.service.name.clone());

        match &service {
            Some(service) => {
                tolerate(
                    self.cluster.set_service_acl(service, tenant, bucket, "").await,
                    NdnfsError::is_not_found,
                    "clear acl",
                )?;
                tolerate(
                    self.cluster
                        .unserve_bucket(service, cluster, tenant, bucket)
                        .await,
                    NdnfsError::is_not_found,
                    "unserve bucket",
                )?;
            }
            None => debug!("bucket not served, skipping unserve"),
        }

        if self.cluster.is_bucket_exist(cluster, tenant, bucket).await? {
            tolerate(
                self.cluster
                    .delete_bucket(cluster, tenant, bucket, self.config.force_bucket_deletion)
                    .await,
                NdnfsError::is_not_found,
                "delete bucket",
            )?;
        } else {
            debug!("bucket already absent");
        }

        info!(volume_id = %id, "volume removed");
        Ok(())
    }

    /// Liveness of the cluster management API.
    pub async fn probe(&self) -> Result<(), NdnfsError> {
        self.cluster.check_health().await
    }
}
