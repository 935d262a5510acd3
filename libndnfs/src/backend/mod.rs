//! Cluster management backends.
//!
//! Each backend module provides a concrete type implementing
//! [`ClusterApi`](crate::cluster::ClusterApi).

pub mod nedge;

pub use nedge::{NedgeClient, NedgeClientConfig};
