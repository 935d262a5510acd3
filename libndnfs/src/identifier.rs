//! Volume identity: the `[service@]cluster/tenant/bucket` name grammar.
//!
//! A Docker volume name maps onto a bucket on a NexentaEdge cluster, plus the
//! NFS service that exports it. Two canonical textual forms exist:
//!
//! ```text
//! service@cluster/tenant/bucket   # full path
//! cluster/tenant/bucket           # minimal path (service omitted)
//! ```
//!
//! Parsing never guesses fields from position: the path part must always
//! have exactly three `/`-separated segments. A segment left empty (or an
//! absent / empty `service@` prefix) is *structurally missing* and is filled
//! from [`VolumeDefaults`] when possible. Whatever remains undetermined is
//! reported through [`MissingFields`].

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NdnfsError;

/// One structural field of a volume identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdField {
    Service,
    Cluster,
    Tenant,
    Bucket,
}

impl fmt::Display for IdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Service => "service",
            Self::Cluster => "cluster",
            Self::Tenant => "tenant",
            Self::Bucket => "bucket",
        })
    }
}

/// The set of identifier fields that could not be determined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingFields(BTreeSet<IdField>);

impl MissingFields {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: IdField) -> bool {
        self.0.contains(&field)
    }

    pub fn insert(&mut self, field: IdField) {
        self.0.insert(field);
    }

    /// `true` when the service is the only missing field: the one case
    /// that callers may recover from by selecting a service.
    pub fn is_service_only(&self) -> bool {
        self.0.len() == 1 && self.contains(IdField::Service)
    }

    pub fn iter(&self) -> impl Iterator<Item = IdField> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<IdField> for MissingFields {
    fn from_iter<I: IntoIterator<Item = IdField>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for MissingFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for field in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
            first = false;
        }
        Ok(())
    }
}

/// Configured fallbacks for fields a volume name leaves out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeDefaults {
    pub service: Option<String>,
    pub cluster: Option<String>,
    pub tenant: Option<String>,
}

/// Structured volume identifier.
///
/// `cluster`, `tenant` and `bucket` are non-empty for every identifier that
/// resolved successfully; `service` may be `None` until a service has been
/// chosen for the volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId {
    pub service: Option<String>,
    pub cluster: String,
    pub tenant: String,
    pub bucket: String,
}

/// Result of [`VolumeId::parse`]: the best-effort identifier plus the fields
/// that are still missing. Missing string fields are left empty in `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub id: VolumeId,
    pub missing: MissingFields,
}

impl VolumeId {
    pub fn new(
        service: Option<&str>,
        cluster: impl Into<String>,
        tenant: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            service: service.map(str::to_owned),
            cluster: cluster.into(),
            tenant: tenant.into(),
            bucket: bucket.into(),
        }
    }

    /// Parse `name` against the `[service@]cluster/tenant/bucket` grammar.
    ///
    /// Returns [`NdnfsError::InvalidName`] only when the grammar itself is
    /// violated (more than one `@`, or a path that is not exactly three
    /// segments). Missing fields are not an error at this level; they are
    /// reported in [`ParsedName::missing`].
    pub fn parse(name: &str, defaults: &VolumeDefaults) -> Result<ParsedName, NdnfsError> {
        let invalid = |reason: &str| NdnfsError::InvalidName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }

        let (service, path) = match name.split_once('@') {
            Some((_, rest)) if rest.contains('@') => {
                return Err(invalid("more than one '@' separator"));
            }
            Some((service, path)) => (Some(service), path),
            None => (None, name),
        };

        let segments: Vec<&str> = path.split('/').collect();
        let [cluster, tenant, bucket] = segments.as_slice() else {
            return Err(invalid(
                "path must have exactly three segments: cluster/tenant/bucket",
            ));
        };

        let mut given = service.into_iter().chain([*cluster, *tenant, *bucket]);
        if let Some(segment) = given.find(|s| !is_safe_segment(s)) {
            return Err(invalid(&format!("segment {segment:?} is not allowed")));
        }

        let mut missing = MissingFields::default();
        let mut pick = |given: Option<&str>, fallback: Option<&String>, field: IdField| {
            match given.filter(|s| !s.is_empty()) {
                Some(value) => Some(value.to_owned()),
                None => {
                    let value = fallback.filter(|s| !s.is_empty()).cloned();
                    if value.is_none() {
                        missing.insert(field);
                    }
                    value
                }
            }
        };

        let service = pick(service, defaults.service.as_ref(), IdField::Service);
        let cluster = pick(Some(*cluster), defaults.cluster.as_ref(), IdField::Cluster);
        let tenant = pick(Some(*tenant), defaults.tenant.as_ref(), IdField::Tenant);
        let bucket = pick(Some(*bucket), None, IdField::Bucket);

        Ok(ParsedName {
            id: VolumeId {
                service,
                cluster: cluster.unwrap_or_default(),
                tenant: tenant.unwrap_or_default(),
                bucket: bucket.unwrap_or_default(),
            },
            missing,
        })
    }

    /// `cluster/tenant/bucket`, the bucket's path on the cluster.
    pub fn backend_path(&self) -> String {
        format!("{}/{}/{}", self.cluster, self.tenant, self.bucket)
    }

    /// `service@cluster/tenant/bucket`; falls back to the backend path while
    /// no service has been chosen.
    pub fn format_full(&self) -> String {
        match &self.service {
            Some(service) => format!("{service}@{}", self.backend_path()),
            None => self.backend_path(),
        }
    }

    /// Minimal form when `default_cluster` matches this identifier's
    /// cluster, full form otherwise.
    pub fn format_minimal(&self, default_cluster: Option<&str>) -> String {
        match default_cluster {
            Some(cluster) if cluster == self.cluster => self.backend_path(),
            _ => self.format_full(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

/// Segments become directory names under the mount root.
fn is_safe_segment(segment: &str) -> bool {
    segment != "." && segment != ".." && !segment.contains('\0')
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_full())
    }
}

impl ParsedName {
    /// Require every field, including the service.
    pub fn complete(self, name: &str) -> Result<VolumeId, NdnfsError> {
        if self.missing.is_empty() {
            Ok(self.id)
        } else {
            Err(NdnfsError::Parse {
                name: name.to_owned(),
                missing: self.missing,
            })
        }
    }

    /// Require cluster, tenant and bucket; the service may still be absent.
    pub fn require_path(self, name: &str) -> Result<VolumeId, NdnfsError> {
        if self.missing.is_empty() || self.missing.is_service_only() {
            Ok(self.id)
        } else {
            Err(NdnfsError::Parse {
                name: name.to_owned(),
                missing: self.missing,
            })
        }
    }
}
