//! Database functions for faces, persons and the counters consumed by the
//! staleness policy.

use anyhow::Result;
use rusqlite::params;

use crate::reconcile::Partition;

use super::{bytes_to_descriptor, descriptor_to_bytes, Database};

/// A face eligible for graph clustering: it has a descriptor and passed the
/// confidence bar.
#[derive(Debug, Clone)]
pub struct ClusterFace {
    pub id: i64,
    pub descriptor: Vec<f32>,
    pub confidence: f32,
    pub person_id: Option<i64>,
}

/// A persisted person row.
#[derive(Debug, Clone)]
pub struct PersonRow {
    pub id: i64,
    pub user: String,
    pub model: i64,
    pub name: Option<String>,
    pub is_valid: bool,
    pub last_generation_time: String,
}

/// Counter snapshot for one (user, model), input to the staleness policy.
#[derive(Debug, Clone, Default)]
pub struct ClusterStats {
    pub person_count: u64,
    pub invalid_person_count: u64,
    pub total_face_count: u64,
    pub unassigned_face_count: u64,
    pub oldest_unassigned_age_minutes: Option<i64>,
    pub total_image_count: u64,
    pub processed_image_count: u64,
    pub force_recreate: bool,
}

impl Database {
    // ========================================================================
    // Images and faces (populated by the out-of-scope detection pipeline)
    // ========================================================================

    /// Register an image for a user.
    pub fn insert_image(&self, user: &str, path: &str, is_processed: bool) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO images (user, path, is_processed) VALUES (?, ?, ?)",
            params![user, path, is_processed],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn mark_image_processed(&self, image_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE images SET is_processed = 1 WHERE id = ?",
            params![image_id],
        )?;
        Ok(())
    }

    /// Store a detected face.
    pub fn insert_face(
        &self,
        image_id: i64,
        model: i64,
        descriptor: Option<&[f32]>,
        confidence: f32,
        is_groupable: bool,
    ) -> Result<i64> {
        let descriptor_bytes = descriptor.map(descriptor_to_bytes);
        let descriptor_dim = descriptor.map(|d| d.len() as i64);

        self.conn().execute(
            r#"
            INSERT INTO faces (image, model, descriptor, descriptor_dim, confidence, is_groupable)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![image_id, model, descriptor_bytes, descriptor_dim, confidence, is_groupable],
        )?;

        Ok(self.conn().last_insert_rowid())
    }

    /// Flag every person owning a face of this image as needing recompute.
    /// Called by the detection pipeline when an image changes upstream.
    pub fn invalidate_persons_for_image(&self, image_id: i64) -> Result<usize> {
        let updated = self.conn().execute(
            r#"
            UPDATE persons SET is_valid = 0
            WHERE id IN (SELECT person FROM faces WHERE image = ? AND person IS NOT NULL)
            "#,
            params![image_id],
        )?;
        Ok(updated)
    }

    // ========================================================================
    // Face source for clustering
    // ========================================================================

    /// Faces that take part in graph clustering: groupable, confident enough,
    /// and carrying a descriptor. Ordered by id so batches are stable.
    pub fn get_groupable_faces(
        &self,
        user: &str,
        model: i64,
        minimum_confidence: f32,
    ) -> Result<Vec<ClusterFace>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT f.id, f.descriptor, f.confidence, f.person
            FROM faces f
            JOIN images i ON f.image = i.id
            WHERE i.user = ? AND f.model = ?
              AND f.is_groupable = 1
              AND f.confidence >= ?
              AND f.descriptor IS NOT NULL
            ORDER BY f.id
            "#,
        )?;

        let faces = stmt
            .query_map(params![user, model, minimum_confidence], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok(ClusterFace {
                    id: row.get(0)?,
                    descriptor: bytes_to_descriptor(&bytes),
                    confidence: row.get(2)?,
                    person_id: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(faces)
    }

    /// Faces excluded from the graph (low confidence, flagged non-groupable
    /// or missing a descriptor). Each still becomes a singleton cluster.
    pub fn get_non_groupable_face_ids(
        &self,
        user: &str,
        model: i64,
        minimum_confidence: f32,
    ) -> Result<Vec<i64>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT f.id
            FROM faces f
            JOIN images i ON f.image = i.id
            WHERE i.user = ? AND f.model = ?
              AND (f.is_groupable = 0 OR f.confidence < ? OR f.descriptor IS NULL)
            ORDER BY f.id
            "#,
        )?;

        let ids = stmt
            .query_map(params![user, model, minimum_confidence], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(ids)
    }

    /// The currently persisted partition: person -> owned faces. Persons with
    /// no faces do not appear (they are swept after every pass anyway).
    pub fn current_partition(&self, user: &str, model: i64) -> Result<Partition> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT f.person, f.id
            FROM faces f
            JOIN persons p ON f.person = p.id
            WHERE p.user = ? AND p.model = ?
            "#,
        )?;

        let mut partition = Partition::new();
        let rows = stmt.query_map(params![user, model], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (person_id, face_id) = row?;
            partition.entry(person_id).or_default().insert(face_id);
        }

        Ok(partition)
    }

    // ========================================================================
    // Persons
    // ========================================================================

    pub fn get_person(&self, person_id: i64) -> Result<Option<PersonRow>> {
        let result = self.conn().query_row(
            "SELECT id, user, model, name, is_valid, last_generation_time FROM persons WHERE id = ?",
            params![person_id],
            |row| {
                Ok(PersonRow {
                    id: row.get(0)?,
                    user: row.get(1)?,
                    model: row.get(2)?,
                    name: row.get(3)?,
                    is_valid: row.get(4)?,
                    last_generation_time: row.get(5)?,
                })
            },
        );

        match result {
            Ok(person) => Ok(Some(person)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_persons(&self, user: &str, model: i64) -> Result<Vec<PersonRow>> {
        let mut stmt = self.conn().prepare(
            r#"
            SELECT id, user, model, name, is_valid, last_generation_time
            FROM persons
            WHERE user = ? AND model = ?
            ORDER BY id
            "#,
        )?;

        let persons = stmt
            .query_map(params![user, model], |row| {
                Ok(PersonRow {
                    id: row.get(0)?,
                    user: row.get(1)?,
                    model: row.get(2)?,
                    name: row.get(3)?,
                    is_valid: row.get(4)?,
                    last_generation_time: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(persons)
    }

    pub fn set_person_name(&self, person_id: i64, name: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE persons SET name = ? WHERE id = ?",
            params![name, person_id],
        )?;
        Ok(())
    }

    /// Highest person id across all users/models; new ids are allocated
    /// above this.
    pub fn max_person_id(&self) -> Result<i64> {
        let max: i64 = self
            .conn()
            .query_row("SELECT COALESCE(MAX(id), 0) FROM persons", [], |row| {
                row.get(0)
            })?;
        Ok(max)
    }

    /// Face owner lookup, mostly for tests and diagnostics.
    pub fn face_person(&self, face_id: i64) -> Result<Option<i64>> {
        let person: Option<i64> = self.conn().query_row(
            "SELECT person FROM faces WHERE id = ?",
            params![face_id],
            |row| row.get(0),
        )?;
        Ok(person)
    }

    // ========================================================================
    // Users and staleness counters
    // ========================================================================

    /// Users known to the system, in stable order.
    pub fn list_users(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT DISTINCT user FROM images ORDER BY user")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(users)
    }

    /// Assemble the counter snapshot the staleness policy decides on.
    pub fn cluster_stats(&self, user: &str, model: i64) -> Result<ClusterStats> {
        let conn = self.conn();

        let (person_count, invalid_person_count): (u64, u64) = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_valid = 0 THEN 1 ELSE 0 END), 0)
            FROM persons WHERE user = ? AND model = ?
            "#,
            params![user, model],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (total_face_count, unassigned_face_count): (u64, u64) = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN f.person IS NULL THEN 1 ELSE 0 END), 0)
            FROM faces f JOIN images i ON f.image = i.id
            WHERE i.user = ? AND f.model = ?
            "#,
            params![user, model],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let oldest_unassigned_age_minutes: Option<i64> = conn.query_row(
            r#"
            SELECT CAST((julianday('now') - julianday(MIN(f.creation_time))) * 24 * 60 AS INTEGER)
            FROM faces f JOIN images i ON f.image = i.id
            WHERE i.user = ? AND f.model = ? AND f.person IS NULL
            "#,
            params![user, model],
            |row| row.get(0),
        )?;

        let (total_image_count, processed_image_count): (u64, u64) = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(is_processed), 0)
            FROM images WHERE user = ?
            "#,
            params![user],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(ClusterStats {
            person_count,
            invalid_person_count,
            total_face_count,
            unassigned_face_count,
            oldest_unassigned_age_minutes,
            total_image_count,
            processed_image_count,
            force_recreate: self.force_recreate(user)?,
        })
    }

    // ========================================================================
    // Per-user settings
    // ========================================================================

    pub fn set_force_recreate(&self, user: &str, value: bool) -> Result<()> {
        if value {
            self.conn().execute(
                "INSERT OR REPLACE INTO user_settings (user, key, value) VALUES (?, 'force_recreate', '1')",
                params![user],
            )?;
        } else {
            self.conn().execute(
                "DELETE FROM user_settings WHERE user = ? AND key = 'force_recreate'",
                params![user],
            )?;
        }
        Ok(())
    }

    pub fn force_recreate(&self, user: &str) -> Result<bool> {
        let result = self.conn().query_row(
            "SELECT value FROM user_settings WHERE user = ? AND key = 'force_recreate'",
            params![user],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(value == "1"),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
