//! Decides, per user, whether the expensive re-clustering pass runs at all.
//!
//! Clustering is O(n²) per batch, so it must not run on every upload. The
//! policy bounds staleness instead: a backlog of unassigned faces, an aging
//! unassigned face, or an invalidated person each force a pass eventually.
//! When the inputs cannot be assembled the default is to skip; a speculative
//! recompute is worse than a stale cluster.

use crate::config::StalenessConfig;
use crate::db::ClusterStats;

/// Why a re-clustering pass is due. Logged when a user is picked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeReason {
    /// Admin or test override.
    Forced,
    /// No persons exist yet and enough material has accumulated.
    Bootstrap,
    /// The per-user force-recreate flag is set.
    RecreateRequested,
    /// Too many faces without a person.
    UnassignedBacklog,
    /// Some face has waited unassigned for too long.
    UnassignedAge,
    /// At least one person was invalidated by upstream changes.
    InvalidPersons,
}

/// Evaluate the policy for one user. `None` means skip.
///
/// `stats` is `None` when the counters could not be assembled; that always
/// skips unless `force` is set.
pub fn evaluate(
    stats: Option<&ClusterStats>,
    config: &StalenessConfig,
    force: bool,
) -> Option<RecomputeReason> {
    if force {
        return Some(RecomputeReason::Forced);
    }

    let stats = stats?;

    if stats.person_count == 0 {
        // First clustering for this user: wait until there is enough
        // material for the result to be meaningful.
        if stats.total_face_count > config.bootstrap_face_count {
            return Some(RecomputeReason::Bootstrap);
        }
        if stats.total_image_count > 0 {
            let ratio = stats.processed_image_count as f64 / stats.total_image_count as f64;
            if ratio > config.bootstrap_processed_ratio {
                return Some(RecomputeReason::Bootstrap);
            }
        }
        return None;
    }

    if stats.force_recreate {
        return Some(RecomputeReason::RecreateRequested);
    }
    if stats.unassigned_face_count >= config.unassigned_face_count {
        return Some(RecomputeReason::UnassignedBacklog);
    }
    if stats.unassigned_face_count > 0 {
        if let Some(age) = stats.oldest_unassigned_age_minutes {
            if age > config.unassigned_age_minutes {
                return Some(RecomputeReason::UnassignedAge);
            }
        }
    }
    if stats.invalid_person_count > 0 {
        return Some(RecomputeReason::InvalidPersons);
    }

    None
}
