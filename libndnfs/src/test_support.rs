//! In-memory doubles for [`ClusterApi`] and [`MountExecutor`] used by unit
//! tests. Every call is recorded so tests can assert on call counts and
//! ordering.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::cluster::ClusterApi;
use crate::error::NdnfsError;
use crate::mounter::MountExecutor;
use crate::types::{NedgeNfsVolume, NedgeService};

#[derive(Default)]
struct ClusterState {
    services: Vec<NedgeService>,
    exports: HashMap<String, Vec<NedgeNfsVolume>>,
    buckets: BTreeSet<String>,
    quotas: HashMap<String, u64>,
    acls: HashMap<String, String>,
    chunk_sizes: HashMap<String, u64>,
    broken_exports: HashSet<String>,
    fail_list_services: bool,
    fail_serve: bool,
    reject_unknown_unserve: bool,
    calls: Vec<String>,
}

/// Fake cluster that keeps buckets, services and exports in memory.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub fn export(service: &str, cluster: &str, tenant: &str, bucket: &str) -> NedgeNfsVolume {
    NedgeNfsVolume {
        volume_id: format!("{service}@{cluster}/{tenant}/{bucket}"),
        backend_path: format!("{cluster}/{tenant}/{bucket}"),
        share_path: format!("/{tenant}/{bucket}"),
    }
}

pub fn nfs_service(name: &str, addr: &str) -> NedgeService {
    NedgeService {
        name: name.to_owned(),
        kind: "nfs".to_owned(),
        status: "enabled".to_owned(),
        network_addresses: vec![addr.to_owned()],
        exports: Vec::new(),
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, service: NedgeService) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            st.exports.entry(service.name.clone()).or_default();
            st.services.push(service);
        }
        self
    }

    /// Add an export of an existing bucket (the bucket is created too).
    pub fn with_export(self, service: &str, cluster: &str, tenant: &str, bucket: &str) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            st.buckets.insert(format!("{cluster}/{tenant}/{bucket}"));
            st.exports
                .entry(service.to_owned())
                .or_default()
                .push(export(service, cluster, tenant, bucket));
        }
        self
    }

    pub fn with_bucket(self, cluster: &str, tenant: &str, bucket: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .buckets
            .insert(format!("{cluster}/{tenant}/{bucket}"));
        self
    }

    /// Make `list_nfs_volumes` fail for `service`.
    pub fn with_broken_exports(self, service: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .broken_exports
            .insert(service.to_owned());
        self
    }

    pub fn fail_list_services(&self) {
        self.state.lock().unwrap().fail_list_services = true;
    }

    pub fn fail_serve(&self) {
        self.state.lock().unwrap().fail_serve = true;
    }

    /// Answer an unserve of an absent entry with a backend error, as some
    /// cluster versions do.
    pub fn reject_unknown_unserve(&self) {
        self.state.lock().unwrap().reject_unknown_unserve = true;
    }

    pub fn has_bucket(&self, path: &str) -> bool {
        self.state.lock().unwrap().buckets.contains(path)
    }

    pub fn exports_of(&self, service: &str) -> Vec<NedgeNfsVolume> {
        self.state
            .lock()
            .unwrap()
            .exports
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn quota(&self, path: &str) -> Option<u64> {
        self.state.lock().unwrap().quotas.get(path).copied()
    }

    pub fn chunk_size(&self, path: &str) -> Option<u64> {
        self.state.lock().unwrap().chunk_sizes.get(path).copied()
    }

    pub fn acl(&self, service: &str, tenant: &str, bucket: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .acls
            .get(&format!("{service}:{tenant}/{bucket}"))
            .cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    /// Track overlapping mutating calls; yields so that a missing lock in
    /// the caller would let another task interleave here.
    async fn mutation<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let out = f(&mut self.state.lock().unwrap());
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_clusters(&self) -> Result<Vec<String>, NdnfsError> {
        self.record("list_clusters".into());
        let st = self.state.lock().unwrap();
        let clusters: BTreeSet<String> = st
            .buckets
            .iter()
            .filter_map(|b| b.split('/').next().map(str::to_owned))
            .collect();
        Ok(clusters.into_iter().collect())
    }

    async fn list_tenants(&self, cluster: &str) -> Result<Vec<String>, NdnfsError> {
        self.record(format!("list_tenants {cluster}"));
        let st = self.state.lock().unwrap();
        let tenants: BTreeSet<String> = st
            .buckets
            .iter()
            .filter_map(|b| {
                let mut parts = b.split('/');
                (parts.next() == Some(cluster)).then(|| parts.next().map(str::to_owned))?
            })
            .collect();
        Ok(tenants.into_iter().collect())
    }

    async fn list_services(&self) -> Result<Vec<NedgeService>, NdnfsError> {
        self.record("list_services".into());
        let st = self.state.lock().unwrap();
        if st.fail_list_services {
            return Err(NdnfsError::Backend("service listing unavailable".into()));
        }
        Ok(st.services.clone())
    }

    async fn get_service(&self, name: &str) -> Result<NedgeService, NdnfsError> {
        self.record(format!("get_service {name}"));
        let st = self.state.lock().unwrap();
        let mut service = st
            .services
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| NdnfsError::NotFound(format!("service {name}")))?;
        service.exports = st.exports.get(name).cloned().unwrap_or_default();
        Ok(service)
    }

    async fn list_nfs_volumes(&self, service: &str) -> Result<Vec<NedgeNfsVolume>, NdnfsError> {
        self.record(format!("list_nfs_volumes {service}"));
        let st = self.state.lock().unwrap();
        if st.broken_exports.contains(service) {
            return Err(NdnfsError::Backend(format!("exports of {service} unavailable")));
        }
        Ok(st.exports.get(service).cloned().unwrap_or_default())
    }

    async fn is_bucket_exist(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<bool, NdnfsError> {
        let path = format!("{cluster}/{tenant}/{bucket}");
        self.record(format!("is_bucket_exist {path}"));
        Ok(self.state.lock().unwrap().buckets.contains(&path))
    }

    async fn create_bucket(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        chunk_size: u64,
        _options: &HashMap<String, String>,
    ) -> Result<(), NdnfsError> {
        let path = format!("{cluster}/{tenant}/{bucket}");
        self.record(format!("create_bucket {path}"));
        self.mutation(|st| {
            if !st.buckets.insert(path.clone()) {
                return Err(NdnfsError::Conflict(format!("bucket {path}")));
            }
            st.chunk_sizes.insert(path, chunk_size);
            Ok(())
        })
        .await
    }

    async fn delete_bucket(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        force: bool,
    ) -> Result<(), NdnfsError> {
        let path = format!("{cluster}/{tenant}/{bucket}");
        self.record(format!("delete_bucket {path} force={force}"));
        self.mutation(|st| {
            if st.buckets.remove(&path) {
                Ok(())
            } else {
                Err(NdnfsError::NotFound(format!("bucket {path}")))
            }
        })
        .await
    }

    async fn set_bucket_quota(
        &self,
        cluster: &str,
        tenant: &str,
        bucket: &str,
        quota: u64,
    ) -> Result<(), NdnfsError> {
        let path = format!("{cluster}/{tenant}/{bucket}");
        self.record(format!("set_bucket_quota {path} {quota}"));
        self.mutation(|st| {
            st.quotas.insert(path, quota);
        })
        .await;
        Ok(())
    }

    async fn serve_bucket(
        &self,
        service: &str,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<(), NdnfsError> {
        let path = format!("{cluster}/{tenant}/{bucket}");
        self.record(format!("serve_bucket {service} {path}"));
        self.mutation(|st| {
            if st.fail_serve {
                return Err(NdnfsError::Backend("serve rejected".into()));
            }
            if !st.buckets.contains(&path) {
                return Err(NdnfsError::NotFound(format!("bucket {path}")));
            }
            let exports = st.exports.entry(service.to_owned()).or_default();
            if exports.iter().any(|e| e.backend_path == path) {
                return Err(NdnfsError::Conflict(format!("serve entry {service}@{path}")));
            }
            exports.push(export(service, cluster, tenant, bucket));
            Ok(())
        })
        .await
    }

    async fn unserve_bucket(
        &self,
        service: &str,
        cluster: &str,
        tenant: &str,
        bucket: &str,
    ) -> Result<(), NdnfsError> {
        let path = format!("{cluster}/{tenant}/{bucket}");
        self.record(format!("unserve_bucket {service} {path}"));
        self.mutation(|st| {
            let exports = st.exports.entry(service.to_owned()).or_default();
            let before = exports.len();
            exports.retain(|e| e.backend_path != path);
            let removed = exports.len() != before;
            if !removed && st.reject_unknown_unserve {
                Err(NdnfsError::Backend(format!("EINVAL: {service}@{path} is not served")))
            } else if !removed {
                Err(NdnfsError::NotFound(format!("serve entry {service}@{path}")))
            } else {
                Ok(())
            }
        })
        .await
    }

    async fn set_service_acl(
        &self,
        service: &str,
        tenant: &str,
        bucket: &str,
        acl: &str,
    ) -> Result<(), NdnfsError> {
        let key = format!("{service}:{tenant}/{bucket}");
        self.record(format!("set_service_acl {key} {acl:?}"));
        self.mutation(|st| {
            if acl.is_empty() {
                st.acls.remove(&key);
            } else {
                st.acls.insert(key, acl.to_owned());
            }
        })
        .await;
        Ok(())
    }

    async fn check_health(&self) -> Result<(), NdnfsError> {
        self.record("check_health".into());
        Ok(())
    }
}

#[derive(Default)]
struct MounterState {
    dirs: HashSet<PathBuf>,
    mounted: HashMap<PathBuf, String>,
    mount_calls: usize,
    unmount_calls: usize,
    fail_mount: bool,
    fail_mkdir: bool,
}

/// Fake mount executor that tracks directories and mounts in memory.
#[derive(Default)]
pub struct FakeMounter {
    state: Mutex<MounterState>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_mount(&self) {
        self.state.lock().unwrap().fail_mount = true;
    }

    pub fn fail_mkdir(&self) {
        self.state.lock().unwrap().fail_mkdir = true;
    }

    pub fn mount_calls(&self) -> usize {
        self.state.lock().unwrap().mount_calls
    }

    pub fn unmount_calls(&self) -> usize {
        self.state.lock().unwrap().unmount_calls
    }

    pub fn mounted_endpoint(&self, path: &Path) -> Option<String> {
        self.state.lock().unwrap().mounted.get(path).cloned()
    }

    pub fn has_dir(&self, path: &Path) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }
}

#[async_trait]
impl MountExecutor for FakeMounter {
    async fn ensure_dir(&self, path: &Path) -> Result<(), NdnfsError> {
        let mut st = self.state.lock().unwrap();
        if st.fail_mkdir {
            return Err(NdnfsError::exec("mkdir", path.to_string_lossy(), "read-only fs"));
        }
        st.dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn is_mounted(&self, path: &Path) -> Result<bool, NdnfsError> {
        Ok(self.state.lock().unwrap().mounted.contains_key(path))
    }

    async fn mount(&self, endpoint: &str, path: &Path) -> Result<(), NdnfsError> {
        let mut st = self.state.lock().unwrap();
        st.mount_calls += 1;
        if st.fail_mount {
            return Err(NdnfsError::exec("mount", path.to_string_lossy(), "exit status: 32"));
        }
        st.mounted.insert(path.to_path_buf(), endpoint.to_owned());
        Ok(())
    }

    async fn unmount(&self, path: &Path) -> Result<(), NdnfsError> {
        let mut st = self.state.lock().unwrap();
        st.unmount_calls += 1;
        st.mounted.remove(path);
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), NdnfsError> {
        let mut st = self.state.lock().unwrap();
        if !st.dirs.remove(path) {
            return Err(NdnfsError::exec("rmdir", path.to_string_lossy(), "no such directory"));
        }
        Ok(())
    }
}
