//! Chinese Whispers label propagation.

use std::collections::HashMap;

/// Maximum propagation passes before giving up on convergence. Most batches
/// stabilize within a handful of passes; this only bounds pathological graphs.
const MAX_PASSES: usize = 100;

/// Partition a graph by iterative label propagation.
///
/// Every node starts with a unique label equal to its index. In randomized
/// node order, each node adopts the label carried by the plurality of its
/// neighbors; ties go to the lowest label id. Stops early once a full pass
/// changes nothing. For a fixed `seed` and edge set the result is
/// deterministic.
pub fn propagate_labels(node_count: usize, edges: &[(usize, usize)], seed: u64) -> Vec<usize> {
    let mut labels: Vec<usize> = (0..node_count).collect();
    if node_count == 0 || edges.is_empty() {
        return labels;
    }

    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for &(i, j) in edges {
        neighbors[i].push(j);
        neighbors[j].push(i);
    }

    let mut rng = fastrand::Rng::with_seed(seed);
    let mut order: Vec<usize> = (0..node_count).collect();

    for _ in 0..MAX_PASSES {
        rng.shuffle(&mut order);
        let mut changed = false;

        for &node in &order {
            if neighbors[node].is_empty() {
                continue;
            }

            // Weight of each label = how many neighbors currently hold it
            let mut weights: HashMap<usize, usize> = HashMap::new();
            for &neighbor in &neighbors[node] {
                *weights.entry(labels[neighbor]).or_insert(0) += 1;
            }

            let mut best_label = labels[node];
            let mut best_weight = 0;
            for (&label, &weight) in &weights {
                if weight > best_weight || (weight == best_weight && label < best_label) {
                    best_label = label;
                    best_weight = weight;
                }
            }

            if best_label != labels[node] {
                labels[node] = best_label;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_edges_keeps_unique_labels() {
        let labels = propagate_labels(4, &[], 7);
        assert_eq!(labels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_connected_component_converges_to_one_label() {
        // 0-1-2 chain and an isolated pair 3-4
        let edges = vec![(0, 1), (1, 2), (3, 4)];
        let labels = propagate_labels(5, &edges, 42);

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_dense_cliques_stay_separate() {
        // Two triangles joined by nothing
        let edges = vec![(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5)];
        let labels = propagate_labels(6, &edges, 1);

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[3], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let edges = vec![(0, 1), (1, 2), (2, 3), (4, 5), (5, 6), (1, 3)];
        let first = propagate_labels(7, &edges, 99);
        let second = propagate_labels(7, &edges, 99);
        assert_eq!(first, second);
    }
}
