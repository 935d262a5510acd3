//! Driver configuration file.
//!
//! The file is JSON with the keys used by existing NexentaEdge deployments:
//!
//! ```json
//! {
//!     "nedgerest": "10.3.30.75",
//!     "nedgeport": 8080,
//!     "username": "admin",
//!     "password": "nexenta",
//!     "clustername": "clu1",
//!     "tenantname": "ten1",
//!     "servicename": "nfs01",
//!     "serviceFilter": "nfs01,nfs02",
//!     "chunksize": 1048576,
//!     "mountpoint": "/var/lib/ndnfs",
//!     "forceBucketDeletion": false,
//!     "mountOptions": "vers=3,tcp"
//! }
//! ```
//!
//! Environment variables:
//! - `CCOW_SVCNAME`: when set and non-empty, replaces `servicename`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::NedgeClientConfig;
use crate::driver::{DEFAULT_MOUNT_ROOT, DriverConfig};
use crate::error::NdnfsError;
use crate::identifier::VolumeDefaults;
use crate::types::{DEFAULT_CHUNK_SIZE, validate_chunk_size};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/opt/nedge/etc/ccow/ndnfs.json";

/// Environment variable overriding the default service.
pub const SERVICE_NAME_ENV: &str = "CCOW_SVCNAME";

fn default_port() -> u16 {
    NedgeClientConfig::DEFAULT_PORT
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_mount_root() -> PathBuf {
    PathBuf::from(DEFAULT_MOUNT_ROOT)
}

/// Contents of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdnfsConfig {
    #[serde(rename = "nedgerest", alias = "Nedgerest")]
    pub rest_address: String,
    #[serde(rename = "nedgeport", alias = "Nedgeport", default = "default_port")]
    pub rest_port: u16,
    #[serde(alias = "Username", default)]
    pub username: String,
    #[serde(alias = "Password", default)]
    pub password: String,
    #[serde(rename = "clustername", alias = "Clustername", default)]
    pub cluster_name: Option<String>,
    #[serde(rename = "tenantname", alias = "Tenantname", default)]
    pub tenant_name: Option<String>,
    #[serde(rename = "servicename", alias = "Servicename", default)]
    pub service_name: Option<String>,
    /// Comma-separated allow-list of service names.
    #[serde(rename = "serviceFilter", alias = "ServiceFilter", default)]
    pub service_filter: Option<String>,
    #[serde(rename = "chunksize", alias = "Chunksize", default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(rename = "mountpoint", alias = "Mountpoint", default = "default_mount_root")]
    pub mount_root: PathBuf,
    #[serde(rename = "forceBucketDeletion", default)]
    pub force_bucket_deletion: bool,
    #[serde(rename = "mountOptions", default)]
    pub mount_options: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

impl NdnfsConfig {
    /// Read and validate the configuration at `path`, then apply
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NdnfsError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NdnfsError::InvalidArgument(format!("reading config {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&content)
            .map_err(|e| NdnfsError::InvalidArgument(format!("config {}: {e}", path.display())))?
            .with_service_override(std::env::var(SERVICE_NAME_ENV).ok());
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate configuration JSON.
    pub fn from_json(content: &str) -> Result<Self, NdnfsError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| NdnfsError::InvalidArgument(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), NdnfsError> {
        if self.rest_address.trim().is_empty() {
            return Err(NdnfsError::InvalidArgument("nedgerest must not be empty".into()));
        }
        validate_chunk_size(self.chunk_size)
    }

    /// Replace the default service with `service` when it is non-empty.
    pub fn with_service_override(mut self, service: Option<String>) -> Self {
        if let Some(service) = service.filter(|s| !s.trim().is_empty()) {
            debug!(%service, "default service overridden from environment");
            self.service_name = Some(service);
        }
        self
    }

    /// Parsed `serviceFilter`.
    pub fn service_allow_list(&self) -> Vec<String> {
        self.service_filter
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            defaults: VolumeDefaults {
                service: non_empty(&self.service_name),
                cluster: non_empty(&self.cluster_name),
                tenant: non_empty(&self.tenant_name),
            },
            service_filter: self.service_allow_list(),
            chunk_size: self.chunk_size,
            mount_root: self.mount_root.clone(),
            force_bucket_deletion: self.force_bucket_deletion,
        }
    }

    pub fn client_config(&self) -> NedgeClientConfig {
        NedgeClientConfig {
            address: self.rest_address.trim().to_owned(),
            port: self.rest_port,
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: NedgeClientConfig::DEFAULT_TIMEOUT,
        }
    }

    pub fn mount_options(&self) -> Option<String> {
        non_empty(&self.mount_options)
    }
}
