//! SQLite-backed store for the artwork catalog, exhibitions, installation
//! photos and recorded appearances.
//!
//! The pipeline holds only transient in-memory views while a photo is being
//! processed; every persisted row is owned here. Relations are directed
//! foreign keys resolved by id lookup, never in-memory back-pointers.

mod schema;
pub mod appearances;
pub mod artworks;
pub mod exhibitions;
pub mod photos;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub use appearances::{
    AppearanceStatistics, ArtworkAppearance, ContextFlags, LightingQuality, OcclusionLevel,
    VerificationStatus,
};
pub use artworks::{Artwork, NewArtwork, StoredEmbedding};
pub use exhibitions::{Exhibition, ExhibitionType, NewExhibition};
pub use photos::{InstallationPhoto, NewPhoto, PhotoStatus};
pub use schema::{MIGRATIONS, SCHEMA};

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Open (or create) the database file at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (tests, throwaway runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }
}

// ============================================================================
// Embedding blob helpers
// ============================================================================

/// Convert f32 slice to bytes for storage
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_conversion() {
        let original = vec![1.5, -2.3, 0.0, 100.0];
        let bytes = embedding_to_bytes(&original);
        let recovered = bytes_to_embedding(&bytes);
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
    }
}
