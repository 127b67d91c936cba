//! The concrete pipeline tasks.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::clustering::{BatchScheduler, CandidateClusters};
use crate::config::Config;
use crate::db::Database;
use crate::reconcile::{self, Partition};
use crate::staleness;

use super::{RunContext, Task, TaskOutcome};

/// Re-clusters every eligible user: staleness gate, batched graph
/// clustering, reconciliation against the persisted partition, one
/// transaction per user.
pub struct CreateClustersTask {
    /// Bypass the staleness gate for every user (admin/test override).
    pub force: bool,
}

impl Task for CreateClustersTask {
    fn name(&self) -> &'static str {
        "create_clusters"
    }

    fn run(&self, db: &Database, config: &Config, ctx: &mut RunContext) -> Result<TaskOutcome> {
        let model = config.clustering.model;
        let scheduler = BatchScheduler::new(&config.clustering);

        for user in db.list_users()? {
            ctx.current_user = Some(user.clone());

            // Suspension point: once per user. current_user stays set so
            // the pipeline reports where the budget ran out.
            if ctx.out_of_time() {
                return Ok(TaskOutcome::Suspended);
            }

            // A stats failure means the staleness policy cannot decide;
            // that defaults to skip, never to a speculative recompute.
            let stats = match db.cluster_stats(&user, model) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(user, error = %e, "could not assemble staleness counters, skipping");
                    continue;
                }
            };

            let reason = match staleness::evaluate(Some(&stats), &config.staleness, self.force) {
                Some(reason) => reason,
                None => {
                    debug!(user, "clusters up to date");
                    continue;
                }
            };
            info!(user, ?reason, "re-clustering");

            let groupable =
                db.get_groupable_faces(&user, model, config.clustering.minimum_confidence)?;
            let non_groupable =
                db.get_non_groupable_face_ids(&user, model, config.clustering.minimum_confidence)?;

            let mut clusters = CandidateClusters::new();
            let mut next_label = 0u64;
            for slice in scheduler.plan(&groupable) {
                // Suspension point: once per batch. Nothing computed so
                // far for this user has been committed, so stopping here
                // loses no persisted state.
                if ctx.out_of_time() {
                    info!(user, "time budget spent mid-user, suspending");
                    return Ok(TaskOutcome::Suspended);
                }
                scheduler.cluster_batch(slice, &mut next_label, &mut clusters)?;
            }
            BatchScheduler::add_singletons(&non_groupable, &mut next_label, &mut clusters);

            // A recreate request drops identity continuity on purpose:
            // every cluster is treated as fresh and the old person rows
            // are swept as orphans after the commit.
            let previous = if stats.force_recreate {
                Partition::new()
            } else {
                db.current_partition(&user, model)?
            };

            let plan = reconcile::plan(&previous, &clusters, db.max_person_id()? + 1);
            let summary = db.apply_plan(&user, model, &plan)?;

            if stats.force_recreate {
                db.set_force_recreate(&user, false)?;
            }

            info!(
                user,
                persons_created = summary.persons_created,
                persons_retained = summary.persons_retained,
                persons_deleted = summary.persons_deleted,
                faces_moved = summary.faces_moved,
                faces_detached = summary.faces_detached,
                "reconciliation committed"
            );
            ctx.add_count("users_clustered", 1);
            ctx.add_count("persons_created", summary.persons_created as u64);
            ctx.add_count("persons_deleted", summary.persons_deleted as u64);
            ctx.add_count("faces_moved", summary.faces_moved as u64);
        }

        ctx.current_user = None;
        Ok(TaskOutcome::Completed)
    }
}

/// Sweeps persons that own no faces. `apply_plan` already sweeps after
/// every commit; this catches persons orphaned by out-of-band deletions
/// (image removal cascading into faces, for example).
pub struct PurgeStalePersonsTask;

impl Task for PurgeStalePersonsTask {
    fn name(&self) -> &'static str {
        "purge_stale_persons"
    }

    fn run(&self, db: &Database, config: &Config, ctx: &mut RunContext) -> Result<TaskOutcome> {
        let model = config.clustering.model;

        for user in db.list_users()? {
            if ctx.out_of_time() {
                return Ok(TaskOutcome::Suspended);
            }
            let purged = db.delete_orphaned_persons(&user, model)?;
            if purged > 0 {
                info!(user, purged, "removed orphaned persons");
                ctx.add_count("persons_purged", purged as u64);
            }
        }

        Ok(TaskOutcome::Completed)
    }
}
