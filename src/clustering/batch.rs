//! Batch scheduling for bounded-cost clustering.

use std::collections::BTreeMap;

use crate::config::ClusteringConfig;
use crate::db::ClusterFace;
use crate::error::VisageError;

use super::graph::build_edges;
use super::whispers::propagate_labels;

/// Candidate clusters from one run: batch-local label -> member face ids.
/// Labels are arbitrary integers, not person ids.
pub type CandidateClusters = BTreeMap<u64, Vec<i64>>;

/// Smallest permitted batch size. Configured values below this are clamped
/// up so the O(n²) slicing never degenerates into tiny graphs.
pub const MIN_BATCH_SIZE: usize = 2000;

/// Slices a large face set into bounded batches and clusters each batch
/// independently.
///
/// Clusters computed in different slices are always disjoint identities,
/// even when they describe the same person. That identity loss is a known
/// limitation of slicing; the reconciler works per label and must not merge
/// across slices.
pub struct BatchScheduler {
    batch_size: usize,
    sensitivity: f32,
    seed: u64,
}

impl BatchScheduler {
    pub fn new(config: &ClusteringConfig) -> Self {
        let batch_size = match config.batch_size {
            0 => 0,
            n if n < MIN_BATCH_SIZE => MIN_BATCH_SIZE,
            n => n,
        };
        Self {
            batch_size,
            sensitivity: config.sensitivity,
            seed: config.shuffle_seed,
        }
    }

    /// Split the groupable faces into equal-ish slices, each at most the
    /// batch size. With an unbounded batch size everything is one slice.
    pub fn plan<'a>(&self, groupable: &'a [ClusterFace]) -> Vec<&'a [ClusterFace]> {
        if groupable.is_empty() {
            return Vec::new();
        }
        if self.batch_size == 0 || groupable.len() <= self.batch_size {
            return vec![groupable];
        }

        let slice_count = groupable.len().div_ceil(self.batch_size);
        let slice_len = groupable.len().div_ceil(slice_count);
        groupable.chunks(slice_len).collect()
    }

    /// Cluster one slice and merge its clusters into `out` under labels
    /// starting at `*next_label`, keeping slices disjoint.
    pub fn cluster_batch(
        &self,
        slice: &[ClusterFace],
        next_label: &mut u64,
        out: &mut CandidateClusters,
    ) -> Result<(), VisageError> {
        let descriptors: Vec<&[f32]> = slice.iter().map(|f| f.descriptor.as_slice()).collect();
        let edges = build_edges(&descriptors, self.sensitivity)?;
        let labels = propagate_labels(slice.len(), &edges, self.seed);

        // Batch-local labels are node indexes; remap to globally unique ids
        let base = *next_label;
        let mut used_max = 0u64;
        for (index, face) in slice.iter().enumerate() {
            let label = base + labels[index] as u64;
            used_max = used_max.max(label);
            out.entry(label).or_default().push(face.id);
        }
        *next_label = used_max + 1;

        Ok(())
    }

    /// Every non-groupable face becomes its own singleton cluster so it is
    /// still reported to the reconciler.
    pub fn add_singletons(face_ids: &[i64], next_label: &mut u64, out: &mut CandidateClusters) {
        for &face_id in face_ids {
            out.insert(*next_label, vec![face_id]);
            *next_label += 1;
        }
    }

    /// Convenience wrapper clustering everything in one call. Callers that
    /// need a suspension point between batches drive `plan` themselves.
    pub fn cluster_all(
        &self,
        groupable: &[ClusterFace],
        non_groupable: &[i64],
    ) -> Result<CandidateClusters, VisageError> {
        let mut clusters = CandidateClusters::new();
        let mut next_label = 0u64;

        for slice in self.plan(groupable) {
            self.cluster_batch(slice, &mut next_label, &mut clusters)?;
        }
        Self::add_singletons(non_groupable, &mut next_label, &mut clusters);

        Ok(clusters)
    }
}
