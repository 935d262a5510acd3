//! Service selection for volumes created without an explicit service.

use crate::error::NdnfsError;
use crate::topology::{ClusterSnapshot, ServiceExports};

/// Pick the service currently serving the fewest exports.
///
/// Ties go to the service that appears first in the snapshot, so the result
/// is deterministic for a given cluster listing.
///
/// This is a greedy heuristic: it counts exports only and ignores export
/// size, client load and network capacity.
pub fn select_least_loaded(snapshot: &ClusterSnapshot) -> Result<&ServiceExports, NdnfsError> {
    // min_by_key keeps the first of equal minima.
    snapshot
        .iter()
        .min_by_key(|entry| entry.exports.len())
        .ok_or(NdnfsError::NoEligibleService)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{export, nfs_service};

    fn entry(name: &str, exports: usize) -> ServiceExports {
        ServiceExports {
            service: nfs_service(name, "10.0.0.1"),
            exports: (0..exports)
                .map(|i| export(name, "clu1", "ten1", &format!("b{i}")))
                .collect(),
        }
    }

    #[test]
    fn first_least_loaded_wins() {
        let snapshot =
            ClusterSnapshot::from_entries(vec![entry("A", 3), entry("B", 1), entry("C", 1)]);
        assert_eq!(select_least_loaded(&snapshot).unwrap().service.name, "B");
    }

    #[test]
    fn single_service() {
        let snapshot = ClusterSnapshot::from_entries(vec![entry("A", 7)]);
        assert_eq!(select_least_loaded(&snapshot).unwrap().service.name, "A");
    }

    #[test]
    fn empty_snapshot_has_no_eligible_service() {
        let snapshot = ClusterSnapshot::default();
        assert_eq!(
            select_least_loaded(&snapshot).unwrap_err(),
            NdnfsError::NoEligibleService
        );
    }
}
