//! Similarity graph construction.

use crate::error::VisageError;

use super::distance::euclidean_distance;

/// Build the undirected similarity graph for one batch of descriptors.
///
/// An edge `(i, j)` exists iff the distance between descriptors `i` and `j`
/// is strictly below `sensitivity`. Every unordered pair is evaluated, so
/// this is the O(n²) hot spot that motivates batching upstream.
pub fn build_edges(descriptors: &[&[f32]], sensitivity: f32) -> Result<Vec<(usize, usize)>, VisageError> {
    let mut edges = Vec::new();

    for i in 0..descriptors.len() {
        for j in (i + 1)..descriptors.len() {
            let distance = euclidean_distance(descriptors[i], descriptors[j])?;
            if distance < sensitivity {
                edges.push((i, j));
            }
        }
    }

    Ok(edges)
}
