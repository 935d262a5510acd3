//! Driver error types.
//!
//! All errors in the `libndnfs` crate are represented by the [`NdnfsError`]
//! enum, which derives [`thiserror::Error`] for ergonomic error handling and
//! also implements [`Serialize`]/[`Deserialize`] so errors can be reported in
//! a volume-plugin response.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::MissingFields;

/// Unified error type for volume operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum NdnfsError {
    /// A volume name is missing one or more structural fields.
    ///
    /// When `missing` contains only the service, callers may recover by
    /// selecting a service; any other missing field is terminal.
    #[error("cannot resolve volume name {name:?}: missing {missing}")]
    Parse {
        /// The volume name as supplied by the caller.
        name: String,
        /// Fields that could not be determined, even after defaults.
        missing: MissingFields,
    },

    /// A volume name does not follow the `[service@]cluster/tenant/bucket`
    /// grammar at all.
    #[error("invalid volume name {name:?}: {reason}")]
    InvalidName {
        /// The volume name as supplied by the caller.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    /// No NFS service passed the eligibility predicate.
    #[error("no eligible NFS service available on the cluster")]
    NoEligibleService,

    /// A referenced service, bucket, or export does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A bucket or serve entry already exists.
    #[error("{0} already exists")]
    Conflict(String),

    /// The cluster management API returned a failure or a malformed payload.
    #[error("backend error: {0}")]
    Backend(String),

    /// A local mount / unmount / directory command failed.
    #[error("{op} failed at {path}: {reason}")]
    Exec {
        /// The failing operation (`mount`, `umount`, `mkdir`, `rmdir`).
        op: String,
        /// Filesystem path the operation targeted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The caller supplied an invalid option value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NdnfsError {
    /// Create a [`NdnfsError::Backend`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::Backend(e.to_string())
    }

    /// Create a [`NdnfsError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`NdnfsError::Exec`] for `op` on `path`.
    pub fn exec<E: std::fmt::Display>(op: &str, path: impl AsRef<str>, e: E) -> Self {
        Self::Exec {
            op: op.to_owned(),
            path: path.as_ref().to_owned(),
            reason: e.to_string(),
        }
    }

    /// `true` for [`NdnfsError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// `true` for [`NdnfsError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
