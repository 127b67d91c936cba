//! Transactional application of a reconciliation plan.

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;

use crate::reconcile::MutationPlan;

use super::Database;

/// What one applied pass changed, for logging and run summaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplySummary {
    pub persons_created: usize,
    pub persons_retained: usize,
    pub persons_deleted: usize,
    pub faces_moved: usize,
    pub faces_detached: usize,
}

impl Database {
    /// Apply a mutation plan for one (user, model) inside a single
    /// transaction. Any failure rolls the whole pass back; no partial
    /// identity reassignment is ever visible to other readers.
    pub fn apply_plan(&self, user: &str, model: i64, plan: &MutationPlan) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();
        let now = Utc::now().to_rfc3339();

        let tx = self.conn().unchecked_transaction()?;

        for &person_id in &plan.deleted {
            tx.execute("DELETE FROM persons WHERE id = ?", params![person_id])?;
            summary.persons_deleted += 1;
        }

        for &face_id in &plan.detached {
            tx.execute(
                "UPDATE faces SET person = NULL WHERE id = ?",
                params![face_id],
            )?;
            summary.faces_detached += 1;
        }

        for retained in &plan.retained {
            match &retained.faces {
                // Unchanged face set: the row keeps id and name, only the
                // validity flag flips. No face writes.
                None => {
                    tx.execute(
                        "UPDATE persons SET is_valid = 1 WHERE id = ?",
                        params![retained.person_id],
                    )?;
                }
                Some(faces) => {
                    for &face_id in faces {
                        summary.faces_moved += tx.execute(
                            "UPDATE faces SET person = ?2 WHERE id = ?1 AND (person IS NULL OR person != ?2)",
                            params![face_id, retained.person_id],
                        )?;
                    }
                    tx.execute(
                        "UPDATE persons SET is_valid = 1, last_generation_time = ? WHERE id = ?",
                        params![now, retained.person_id],
                    )?;
                }
            }
            summary.persons_retained += 1;
        }

        for created in &plan.created {
            tx.execute(
                r#"
                INSERT INTO persons (id, user, model, name, is_valid, last_generation_time)
                VALUES (?, ?, ?, NULL, 1, ?)
                "#,
                params![created.person_id, user, model, now],
            )?;
            for &face_id in &created.faces {
                summary.faces_moved += tx.execute(
                    "UPDATE faces SET person = ?2 WHERE id = ?1 AND (person IS NULL OR person != ?2)",
                    params![face_id, created.person_id],
                )?;
            }
            summary.persons_created += 1;
        }

        tx.commit()?;

        // Post-commit sweep: a person that surprisingly ended with no faces
        // must not persist.
        self.delete_orphaned_persons(user, model)?;

        Ok(summary)
    }

    /// Remove persons that own no faces for this (user, model).
    pub fn delete_orphaned_persons(&self, user: &str, model: i64) -> Result<usize> {
        let deleted = self.conn().execute(
            r#"
            DELETE FROM persons
            WHERE user = ? AND model = ?
              AND id NOT IN (SELECT person FROM faces WHERE person IS NOT NULL)
            "#,
            params![user, model],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{self, Partition};
    use std::collections::BTreeMap;

    /// Seed a user with `face_count` faces, returning their ids.
    fn seed_faces(db: &Database, user: &str, face_count: usize) -> Vec<i64> {
        let image = db
            .insert_image(user, &format!("/{user}/img.jpg"), true)
            .unwrap();
        (0..face_count)
            .map(|i| {
                db.insert_face(image, 1, Some(&[i as f32]), 1.0, true)
                    .unwrap()
            })
            .collect()
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    /// Reconcile the given candidate clusters against the persisted state.
    fn run_pass(db: &Database, user: &str, candidates: &[(u64, Vec<i64>)]) -> ApplySummary {
        let previous = db.current_partition(user, 1).unwrap();
        let new: BTreeMap<u64, Vec<i64>> = candidates.iter().cloned().collect();
        let plan = reconcile::plan(&previous, &new, db.max_person_id().unwrap() + 1);
        db.apply_plan(user, 1, &plan).unwrap()
    }

    #[test]
    fn test_first_pass_creates_persons() {
        let db = test_db();
        let faces = seed_faces(&db, "alice", 3);

        let summary = run_pass(
            &db,
            "alice",
            &[(0, vec![faces[0], faces[1]]), (1, vec![faces[2]])],
        );

        assert_eq!(summary.persons_created, 2);
        assert_eq!(summary.faces_moved, 3);

        let partition = db.current_partition("alice", 1).unwrap();
        assert_eq!(partition.len(), 2);
    }

    #[test]
    fn test_identical_pass_touches_no_faces() {
        let db = test_db();
        let faces = seed_faces(&db, "alice", 2);
        run_pass(&db, "alice", &[(0, vec![faces[0], faces[1]])]);

        let person_id = *db.current_partition("alice", 1).unwrap().keys().next().unwrap();
        db.set_person_name(person_id, "Grandma").unwrap();
        db.conn()
            .execute("UPDATE persons SET is_valid = 0 WHERE id = ?", params![person_id])
            .unwrap();
        let before = db.get_person(person_id).unwrap().unwrap();

        let summary = run_pass(&db, "alice", &[(0, vec![faces[0], faces[1]])]);

        assert_eq!(summary.faces_moved, 0);
        assert_eq!(summary.persons_retained, 1);

        let after = db.get_person(person_id).unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.name.as_deref(), Some("Grandma"));
        assert!(after.is_valid);
        assert_eq!(after.last_generation_time, before.last_generation_time);
    }

    #[test]
    fn test_merge_preserves_name_of_surviving_person() {
        let db = test_db();
        let faces = seed_faces(&db, "alice", 2);
        run_pass(&db, "alice", &[(0, vec![faces[0]]), (1, vec![faces[1]])]);

        let persons = db.list_persons("alice", 1).unwrap();
        assert_eq!(persons.len(), 2);
        db.set_person_name(persons[0].id, "Ada").unwrap();

        let summary = run_pass(&db, "alice", &[(0, vec![faces[0], faces[1]])]);
        assert_eq!(summary.persons_deleted, 1);

        let persons = db.list_persons("alice", 1).unwrap();
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].name.as_deref(), Some("Ada"));
        assert_eq!(db.face_person(faces[0]).unwrap(), Some(persons[0].id));
        assert_eq!(db.face_person(faces[1]).unwrap(), Some(persons[0].id));
    }

    #[test]
    fn test_disappearing_cluster_detaches_faces() {
        let db = test_db();
        let faces = seed_faces(&db, "alice", 1);
        run_pass(&db, "alice", &[(0, vec![faces[0]])]);
        assert_eq!(db.list_persons("alice", 1).unwrap().len(), 1);

        let summary = run_pass(&db, "alice", &[]);
        assert_eq!(summary.persons_deleted, 1);
        assert_eq!(summary.faces_detached, 1);
        assert!(db.list_persons("alice", 1).unwrap().is_empty());
        assert_eq!(db.face_person(faces[0]).unwrap(), None);
    }

    #[test]
    fn test_permuted_labels_keep_both_rows() {
        let db = test_db();
        let faces = seed_faces(&db, "alice", 2);
        run_pass(&db, "alice", &[(0, vec![faces[0]]), (1, vec![faces[1]])]);

        let before = db.list_persons("alice", 1).unwrap();
        db.set_person_name(before[0].id, "Left").unwrap();
        db.set_person_name(before[1].id, "Right").unwrap();

        // Same clusters, labels handed out in the opposite order: each
        // resolves back to its own owner, nothing is deleted or recreated
        run_pass(&db, "alice", &[(0, vec![faces[1]]), (1, vec![faces[0]])]);

        let after = db.list_persons("alice", 1).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id, before[0].id);
        assert_eq!(after[1].id, before[1].id);
        assert_eq!(after[0].name.as_deref(), Some("Left"));
        assert_eq!(after[1].name.as_deref(), Some("Right"));
        assert_eq!(db.face_person(faces[0]).unwrap(), Some(before[0].id));
        assert_eq!(db.face_person(faces[1]).unwrap(), Some(before[1].id));
    }

    #[test]
    fn test_conservation_after_apply() {
        let db = test_db();
        let faces = seed_faces(&db, "alice", 5);
        run_pass(
            &db,
            "alice",
            &[(0, vec![faces[0], faces[1], faces[2]]), (1, vec![faces[3], faces[4]])],
        );

        // Re-cluster into a different shape, dropping face 4 entirely
        run_pass(
            &db,
            "alice",
            &[(0, vec![faces[0], faces[1]]), (1, vec![faces[2], faces[3]])],
        );

        let partition = db.current_partition("alice", 1).unwrap();
        let assigned: usize = partition.values().map(|f| f.len()).sum();
        let unassigned: u64 = db.cluster_stats("alice", 1).unwrap().unassigned_face_count;
        assert_eq!(assigned as u64 + unassigned, 5);
    }

    #[test]
    fn test_orphan_sweep_removes_empty_persons() {
        let db = test_db();
        seed_faces(&db, "alice", 1);
        db.conn()
            .execute_batch("INSERT INTO persons (id, user, model) VALUES (42, 'alice', 1);")
            .unwrap();

        assert_eq!(db.delete_orphaned_persons("alice", 1).unwrap(), 1);
        assert!(db.get_person(42).unwrap().is_none());
    }

    #[test]
    fn test_plan_over_empty_store_is_noop() {
        let db = test_db();
        let plan = reconcile::plan(&Partition::new(), &BTreeMap::new(), 1);
        let summary = db.apply_plan("alice", 1, &plan).unwrap();
        assert_eq!(summary.persons_created, 0);
        assert_eq!(summary.faces_moved, 0);
    }
}
