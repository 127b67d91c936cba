mod schema;
pub mod apply;
pub mod faces;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub use apply::ApplySummary;
pub use faces::{ClusterFace, ClusterStats, PersonRow};
pub use schema::SCHEMA;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).context("Failed to open database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// In-memory database, primarily for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Convert f32 slice to bytes for storage
pub(crate) fn descriptor_to_bytes(descriptor: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(descriptor.len() * 4);
    for &val in descriptor {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
pub(crate) fn bytes_to_descriptor(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
}
