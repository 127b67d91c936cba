//! Maps a freshly computed partition onto the persisted one.
//!
//! Reconciliation keeps person identity stable across independent clustering
//! runs: each new cluster inherits the old person that contributed the
//! plurality of its faces, no old person is inherited twice, and a person
//! whose face set is unchanged is left alone apart from the validity flag.
//! The whole outcome is computed as a [`MutationPlan`] value before any
//! database write, so a pass either commits entirely or not at all.
//!
//! A label can only inherit the old person holding the plurality of its own
//! votes; faces with no previous owner vote for "fresh", so a cluster
//! dominated by brand-new faces becomes a new person even when it absorbed
//! part of an old one. Tie-breaking is deterministic:
//! - a tie between an owner and the no-owner bucket keeps the owner
//!   (continuity over churn);
//! - among old persons tied for one label's plurality, the lowest person id
//!   wins (a merge keeps the older identity's name);
//! - when several labels share one plurality owner, the strongest claim
//!   inherits and the rest become fresh persons; an exact tie between the
//!   strongest claims means the person is not inherited at all (an even
//!   split has no plurality half, and moving a user-visible name onto an
//!   arbitrary half would be a guess).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::clustering::CandidateClusters;

/// The persisted grouping: person id -> owned face ids. Only persons with at
/// least one face appear here.
pub type Partition = BTreeMap<i64, BTreeSet<i64>>;

/// Where a new cluster label resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    /// The label inherits an existing person.
    Existing(i64),
    /// The label becomes a brand-new person.
    Fresh,
}

/// A person that survives the pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedPerson {
    pub person_id: i64,
    /// `None` when the face set is identical to the persisted one: the row
    /// only gets `is_valid = true`, no face writes. Otherwise the complete
    /// new face set.
    pub faces: Option<BTreeSet<i64>>,
}

/// A person created by the pass, with a pre-allocated id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPerson {
    pub person_id: i64,
    pub faces: BTreeSet<i64>,
}

/// Everything one reconciliation pass will do to the store, computed up
/// front. Applied inside a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    pub retained: Vec<RetainedPerson>,
    pub created: Vec<CreatedPerson>,
    pub deleted: Vec<i64>,
    /// Faces whose person reference is cleared and not reassigned this pass.
    pub detached: BTreeSet<i64>,
}

impl MutationPlan {
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
            && self.created.is_empty()
            && self.deleted.is_empty()
            && self.detached.is_empty()
    }

    /// Faces assigned to some person once the plan is applied.
    pub fn assigned_face_count(&self, previous: &Partition) -> usize {
        let retained: usize = self
            .retained
            .iter()
            .map(|r| match &r.faces {
                Some(faces) => faces.len(),
                None => previous.get(&r.person_id).map_or(0, |f| f.len()),
            })
            .sum();
        retained + self.created.iter().map(|c| c.faces.len()).sum::<usize>()
    }
}

/// Resolve every new cluster label to an old person or to "fresh".
///
/// Step 1, transition voting: every face in a new cluster votes for the pair
/// (its previous owner or no-owner, the cluster's label). Step 2, plurality
/// assignment: each label's plurality voter is computed; a no-owner
/// plurality means the label stays fresh. Labels sharing a plurality owner
/// compete on vote count — the unique strongest claim inherits the person,
/// every other label stays fresh, and a tie at the top means nobody
/// inherits. A label never falls back to a runner-up owner.
fn assign_labels(previous: &Partition, candidates: &CandidateClusters) -> BTreeMap<u64, Assignment> {
    let mut owner_of: HashMap<i64, i64> = HashMap::new();
    for (&person_id, faces) in previous {
        for &face_id in faces {
            owner_of.insert(face_id, person_id);
        }
    }

    // Step 1: tally votes per label; `None` is the no-previous-owner bucket
    let mut votes: BTreeMap<u64, BTreeMap<Option<i64>, usize>> = BTreeMap::new();
    for (&label, faces) in candidates {
        for face_id in faces {
            let owner = owner_of.get(face_id).copied();
            *votes.entry(label).or_default().entry(owner).or_insert(0) += 1;
        }
    }

    // Step 2a: plurality voter per label. Iteration is None first, then
    // ascending person ids, so on equal counts an owner displaces the
    // no-owner bucket and the lowest owner id sticks.
    let mut claims: BTreeMap<i64, Vec<(usize, u64)>> = BTreeMap::new();
    for (&label, tally) in &votes {
        let mut best: Option<(usize, Option<i64>)> = None;
        for (&owner, &count) in tally {
            let replace = match best {
                None => true,
                Some((best_count, best_owner)) => {
                    count > best_count
                        || (count == best_count && best_owner.is_none() && owner.is_some())
                }
            };
            if replace {
                best = Some((count, owner));
            }
        }
        if let Some((count, Some(owner))) = best {
            claims.entry(owner).or_default().push((count, label));
        }
    }

    // Step 2b: per owner, the unique strongest claimant inherits
    let mut assignments: BTreeMap<u64, Assignment> = BTreeMap::new();
    for (&owner, claimants) in &claims {
        let top = claimants.iter().map(|&(count, _)| count).max().unwrap_or(0);
        let mut winners = claimants.iter().filter(|&&(count, _)| count == top);
        if let (Some(&(_, label)), None) = (winners.next(), winners.next()) {
            assignments.insert(label, Assignment::Existing(owner));
        }
    }

    for &label in candidates.keys() {
        assignments.entry(label).or_insert(Assignment::Fresh);
    }

    assignments
}

/// Compute the mutation plan for one pass.
///
/// `next_person_id` is the first free person id; each fresh label consumes
/// one id, in ascending label order. Empty inputs produce an empty plan.
pub fn plan(previous: &Partition, candidates: &CandidateClusters, next_person_id: i64) -> MutationPlan {
    let assignments = assign_labels(previous, candidates);

    let mut plan = MutationPlan::default();
    let mut next_id = next_person_id;

    // Faces that end up owned by someone after this pass
    let mut covered: BTreeSet<i64> = BTreeSet::new();

    for (&label, assignment) in &assignments {
        let faces: BTreeSet<i64> = candidates[&label].iter().copied().collect();
        covered.extend(faces.iter().copied());

        match *assignment {
            Assignment::Existing(person_id) => {
                let unchanged = previous.get(&person_id) == Some(&faces);
                plan.retained.push(RetainedPerson {
                    person_id,
                    faces: if unchanged { None } else { Some(faces) },
                });
            }
            Assignment::Fresh => {
                plan.created.push(CreatedPerson {
                    person_id: next_id,
                    faces,
                });
                next_id += 1;
            }
        }
    }

    // Persons nothing inherited from are dropped; their leftover faces, and
    // faces that fell out of a retained person's set, lose their reference
    // unless another cluster claims them in the same pass.
    let inherited: HashSet<i64> = plan.retained.iter().map(|r| r.person_id).collect();
    for (&person_id, faces) in previous {
        if !inherited.contains(&person_id) {
            plan.deleted.push(person_id);
        }
        for &face_id in faces {
            if !covered.contains(&face_id) {
                plan.detached.insert(face_id);
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(entries: &[(i64, &[i64])]) -> Partition {
        entries
            .iter()
            .map(|(person, faces)| (*person, faces.iter().copied().collect()))
            .collect()
    }

    fn clusters(entries: &[(u64, &[i64])]) -> CandidateClusters {
        entries
            .iter()
            .map(|(label, faces)| (*label, faces.to_vec()))
            .collect()
    }

    fn retained(plan: &MutationPlan, person_id: i64) -> &RetainedPerson {
        plan.retained
            .iter()
            .find(|r| r.person_id == person_id)
            .expect("person not retained")
    }

    #[test]
    fn test_both_empty_is_a_no_op() {
        let result = plan(&Partition::new(), &CandidateClusters::new(), 1);
        assert!(result.is_empty());
    }

    #[test]
    fn test_identical_partition_only_revalidates() {
        let previous = partition(&[(1, &[10, 11]), (2, &[20])]);
        let new = clusters(&[(0, &[10, 11]), (1, &[20])]);

        let result = plan(&previous, &new, 3);

        assert_eq!(result.retained.len(), 2);
        assert!(result.retained.iter().all(|r| r.faces.is_none()));
        assert!(result.created.is_empty());
        assert!(result.deleted.is_empty());
        assert!(result.detached.is_empty());
    }

    #[test]
    fn test_first_run_creates_everything() {
        let new = clusters(&[(0, &[1, 2]), (1, &[3])]);
        let result = plan(&Partition::new(), &new, 1);

        assert!(result.retained.is_empty());
        assert_eq!(result.created.len(), 2);
        assert_eq!(result.created[0].person_id, 1);
        assert_eq!(result.created[1].person_id, 2);
    }

    #[test]
    fn test_even_split_replaces_the_person() {
        // Neither half holds a plurality of person 1's faces, so the
        // identity is not inherited: two fresh persons, person 1 gone.
        let previous = partition(&[(1, &[10, 11])]);
        let new = clusters(&[(0, &[10]), (1, &[11])]);

        let result = plan(&previous, &new, 2);

        assert!(result.retained.is_empty());
        assert_eq!(result.deleted, vec![1]);
        assert_eq!(result.created.len(), 2);
        assert_eq!(result.created[0].person_id, 2);
        assert_eq!(result.created[0].faces, [10].into_iter().collect());
        assert_eq!(result.created[1].person_id, 3);
        assert_eq!(result.created[1].faces, [11].into_iter().collect());
    }

    #[test]
    fn test_uneven_split_keeps_the_person_on_the_bigger_half() {
        let previous = partition(&[(1, &[10, 11, 12])]);
        let new = clusters(&[(0, &[10]), (1, &[11, 12])]);

        let result = plan(&previous, &new, 2);

        assert_eq!(result.retained.len(), 1);
        assert_eq!(result.retained[0].person_id, 1);
        assert_eq!(
            retained(&result, 1).faces,
            Some([11, 12].into_iter().collect())
        );
        assert_eq!(result.created.len(), 1);
        assert_eq!(result.created[0].person_id, 2);
        assert!(result.deleted.is_empty());
    }

    #[test]
    fn test_merge_keeps_lowest_person_and_deletes_other() {
        let previous = partition(&[(1, &[10]), (2, &[20])]);
        let new = clusters(&[(0, &[10, 20])]);

        let result = plan(&previous, &new, 3);

        assert_eq!(result.retained.len(), 1);
        assert_eq!(result.retained[0].person_id, 1);
        assert_eq!(
            result.retained[0].faces,
            Some([10, 20].into_iter().collect())
        );
        assert_eq!(result.deleted, vec![2]);
        assert!(result.created.is_empty());
        assert!(result.detached.is_empty());
    }

    #[test]
    fn test_orphan_removal_detaches_faces() {
        let previous = partition(&[(1, &[10])]);
        let result = plan(&previous, &CandidateClusters::new(), 2);

        assert_eq!(result.deleted, vec![1]);
        assert!(result.retained.is_empty());
        assert_eq!(result.detached, [10].into_iter().collect());
    }

    #[test]
    fn test_permuted_labels_retain_both_persons() {
        // The clusterer handed out labels in the opposite order this run;
        // each cluster still resolves to its own best-matching old owner,
        // so neither person is deleted and recreated.
        let previous = partition(&[(1, &[10]), (2, &[20])]);
        let new = clusters(&[(0, &[20]), (1, &[10])]);

        let result = plan(&previous, &new, 3);

        assert_eq!(result.retained.len(), 2);
        assert!(result.deleted.is_empty());
        assert!(result.created.is_empty());

        // Face sets are unchanged per person, so no face writes either
        assert!(retained(&result, 1).faces.is_none());
        assert!(retained(&result, 2).faces.is_none());
    }

    #[test]
    fn test_two_person_face_exchange() {
        // Persons keep their plurality core while trading one face each
        let previous = partition(&[(1, &[10, 11]), (2, &[20, 21])]);
        let new = clusters(&[(0, &[10, 11, 21]), (1, &[20])]);

        let result = plan(&previous, &new, 3);

        assert_eq!(result.retained.len(), 2);
        assert!(result.deleted.is_empty());
        assert_eq!(
            retained(&result, 1).faces,
            Some([10, 11, 21].into_iter().collect())
        );
        assert_eq!(retained(&result, 2).faces, Some([20].into_iter().collect()));
        assert!(result.detached.is_empty());
    }

    #[test]
    fn test_no_old_person_claimed_twice() {
        // Both new labels overlap person 1; only the plurality holder
        // inherits it
        let previous = partition(&[(1, &[10, 11, 12])]);
        let new = clusters(&[(0, &[10]), (1, &[11, 12])]);

        let result = plan(&previous, &new, 2);

        let inherited: Vec<i64> = result.retained.iter().map(|r| r.person_id).collect();
        assert_eq!(inherited, vec![1]);
    }

    #[test]
    fn test_outvoted_person_survives_via_its_own_plurality() {
        // Label 0's plurality is person 1 (3 votes beat person 2's 2);
        // person 2 survives through label 1, where it holds the plurality.
        let previous = partition(&[(1, &[10, 11, 12]), (2, &[20, 21, 22])]);
        let new = clusters(&[(0, &[10, 11, 12, 20, 21]), (1, &[22])]);

        let result = plan(&previous, &new, 3);

        assert_eq!(retained(&result, 1).person_id, 1);
        assert_eq!(retained(&result, 2).faces, Some([22].into_iter().collect()));
        assert!(result.deleted.is_empty());
        assert!(result.created.is_empty());
    }

    #[test]
    fn test_claimed_plurality_owner_means_fresh_not_runner_up() {
        // Both labels' plurality is person 1; label 0's claim is stronger.
        // Label 1 does not fall back to person 2 (its runner-up) — it
        // becomes a fresh person and person 2 is deleted.
        let previous = partition(&[(1, &[10, 11, 12, 13, 14]), (2, &[20])]);
        let new = clusters(&[(0, &[10, 11, 12]), (1, &[13, 14, 20])]);

        let result = plan(&previous, &new, 3);

        assert_eq!(result.retained.len(), 1);
        assert_eq!(result.retained[0].person_id, 1);
        assert_eq!(
            result.retained[0].faces,
            Some([10, 11, 12].into_iter().collect())
        );
        assert_eq!(result.created.len(), 1);
        assert_eq!(
            result.created[0].faces,
            [13, 14, 20].into_iter().collect()
        );
        assert_eq!(result.deleted, vec![2]);
    }

    #[test]
    fn test_unowned_majority_makes_the_cluster_fresh() {
        // Five new faces outvote person 1's two: the cluster is a new
        // discovery, not a grown person 1.
        let previous = partition(&[(1, &[10, 11])]);
        let new = clusters(&[(0, &[10, 11, 100, 101, 102, 103, 104])]);

        let result = plan(&previous, &new, 2);

        assert!(result.retained.is_empty());
        assert_eq!(result.deleted, vec![1]);
        assert_eq!(result.created.len(), 1);
        assert_eq!(result.created[0].person_id, 2);
        assert_eq!(
            result.created[0].faces,
            [10, 11, 100, 101, 102, 103, 104].into_iter().collect()
        );
        assert!(result.detached.is_empty());
    }

    #[test]
    fn test_tied_owner_and_unowned_votes_keep_the_person() {
        // One old face, one new face: continuity wins the tie
        let previous = partition(&[(1, &[10])]);
        let new = clusters(&[(0, &[10, 99])]);

        let result = plan(&previous, &new, 2);

        assert_eq!(retained(&result, 1).faces, Some([10, 99].into_iter().collect()));
        assert!(result.created.is_empty());
        assert!(result.deleted.is_empty());
    }

    #[test]
    fn test_moved_face_is_not_detached() {
        // Face 11 leaves person 1 for person 2's cluster; it must be
        // reassigned, not nulled
        let previous = partition(&[(1, &[10, 11]), (2, &[20, 21])]);
        let new = clusters(&[(0, &[10]), (1, &[11, 20, 21])]);

        let result = plan(&previous, &new, 3);

        assert!(result.detached.is_empty());
        assert_eq!(
            retained(&result, 2).faces,
            Some([11, 20, 21].into_iter().collect())
        );
        assert_eq!(retained(&result, 1).faces, Some([10].into_iter().collect()));
    }

    #[test]
    fn test_conservation_across_mixed_shapes() {
        let previous = partition(&[(1, &[1, 2, 3]), (2, &[4, 5]), (3, &[6])]);
        let new = clusters(&[(0, &[1, 2]), (1, &[3, 4]), (2, &[7, 8])]);

        let result = plan(&previous, &new, 4);

        // Every input face is either assigned or detached, never both
        let mut seen: BTreeSet<i64> = BTreeSet::new();
        for r in &result.retained {
            let faces = r
                .faces
                .clone()
                .unwrap_or_else(|| previous[&r.person_id].clone());
            for f in faces {
                assert!(seen.insert(f), "face {f} assigned twice");
            }
        }
        for c in &result.created {
            for &f in &c.faces {
                assert!(seen.insert(f), "face {f} assigned twice");
            }
        }
        for &f in &result.detached {
            assert!(seen.insert(f), "face {f} both assigned and detached");
        }

        // previous faces 1..=6 plus new faces 7, 8 all accounted for
        assert_eq!(seen, (1..=8).collect());
    }

    #[test]
    fn test_fresh_ids_increment_within_pass() {
        let new = clusters(&[(0, &[1]), (1, &[2]), (2, &[3])]);
        let result = plan(&Partition::new(), &new, 7);

        let ids: Vec<i64> = result.created.iter().map(|c| c.person_id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[test]
    fn test_label_tie_goes_to_lowest_old_person() {
        // Both persons contribute equally to label 0; the lower id wins the
        // claim and the other survives only if another label wants it.
        let previous = partition(&[(5, &[50]), (9, &[90])]);
        let new = clusters(&[(0, &[50, 90])]);

        for _ in 0..10 {
            let result = plan(&previous, &new, 10);
            assert_eq!(result.retained.len(), 1);
            assert_eq!(result.retained[0].person_id, 5);
            assert_eq!(result.deleted, vec![9]);
        }
    }
}
