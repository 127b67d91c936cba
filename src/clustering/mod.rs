//! Graph-based grouping of face descriptors into candidate clusters.
//!
//! A batch of descriptors becomes an undirected similarity graph (edges
//! between faces closer than the configured sensitivity), which is then
//! partitioned by Chinese Whispers label propagation. Large face sets are
//! sliced into bounded batches first to cap the O(n²) edge construction.

pub mod batch;
pub mod distance;
pub mod graph;
pub mod whispers;

pub use batch::{BatchScheduler, CandidateClusters, MIN_BATCH_SIZE};
pub use distance::euclidean_distance;
pub use graph::build_edges;
pub use whispers::propagate_labels;
