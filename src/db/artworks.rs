//! Catalog artwork records and their reference embeddings.

use anyhow::{anyhow, Result};
use rusqlite::params;

use super::{bytes_to_embedding, embedding_to_bytes, Database};

/// An artwork in the reference catalog.
#[derive(Debug, Clone)]
pub struct Artwork {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub width_cm: Option<f64>,
    pub height_cm: Option<f64>,
    pub depth_cm: Option<f64>,
    pub medium: Option<String>,
    pub creation_date: Option<String>,
    pub description: Option<String>,
    pub catalog_number: String,
    pub accession_number: Option<String>,
    pub reference_image_path: Option<String>,
    /// Dominant colors, ordered, as [r,g,b] triples.
    pub palette: Vec<[u8; 3]>,
}

/// Fields for creating a catalog entry. The reference embedding is attached
/// separately once the feature extractor has seen the reference image.
#[derive(Debug, Clone, Default)]
pub struct NewArtwork {
    pub title: String,
    pub artist: String,
    pub width_cm: Option<f64>,
    pub height_cm: Option<f64>,
    pub depth_cm: Option<f64>,
    pub medium: Option<String>,
    pub creation_date: Option<String>,
    pub description: Option<String>,
    pub catalog_number: String,
    pub accession_number: Option<String>,
    pub reference_image_path: Option<String>,
}

/// A stored reference embedding with its provenance.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub artwork_id: i64,
    pub vector: Vec<f32>,
    pub extractor_version: String,
}

impl Database {
    /// Create a catalog entry. Fails when the catalog number is already
    /// taken; uniqueness is enforced by the store.
    pub fn create_artwork(&self, new: &NewArtwork) -> Result<i64> {
        self.conn
            .execute(
                r#"
                INSERT INTO artworks (title, artist, width_cm, height_cm, depth_cm,
                                      medium, creation_date, description,
                                      catalog_number, accession_number, reference_image_path)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    new.title,
                    new.artist,
                    new.width_cm,
                    new.height_cm,
                    new.depth_cm,
                    new.medium,
                    new.creation_date,
                    new.description,
                    new.catalog_number,
                    new.accession_number,
                    new.reference_image_path,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    anyhow!("catalog number '{}' already exists", new.catalog_number)
                }
                other => other.into(),
            })?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_artwork(&self, id: i64) -> Result<Option<Artwork>> {
        let result = self.conn.query_row(
            r#"
            SELECT id, title, artist, width_cm, height_cm, depth_cm, medium,
                   creation_date, description, catalog_number, accession_number,
                   reference_image_path, palette
            FROM artworks WHERE id = ?
            "#,
            [id],
            artwork_from_row,
        );

        match result {
            Ok(artwork) => Ok(Some(artwork)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_artwork_by_catalog_number(&self, catalog_number: &str) -> Result<Option<Artwork>> {
        let result = self.conn.query_row(
            r#"
            SELECT id, title, artist, width_cm, height_cm, depth_cm, medium,
                   creation_date, description, catalog_number, accession_number,
                   reference_image_path, palette
            FROM artworks WHERE catalog_number = ?
            "#,
            [catalog_number],
            artwork_from_row,
        );

        match result {
            Ok(artwork) => Ok(Some(artwork)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Substring search over titles.
    pub fn search_artworks_by_title(&self, title: &str) -> Result<Vec<Artwork>> {
        self.search_artworks("title", title)
    }

    /// Substring search over artist names.
    pub fn search_artworks_by_artist(&self, artist: &str) -> Result<Vec<Artwork>> {
        self.search_artworks("artist", artist)
    }

    fn search_artworks(&self, column: &str, term: &str) -> Result<Vec<Artwork>> {
        let sql = format!(
            r#"
            SELECT id, title, artist, width_cm, height_cm, depth_cm, medium,
                   creation_date, description, catalog_number, accession_number,
                   reference_image_path, palette
            FROM artworks WHERE {column} LIKE ? ORDER BY id
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let pattern = format!("%{}%", term);

        let artworks = stmt
            .query_map([pattern], artwork_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(artworks)
    }

    pub fn list_artworks(&self, limit: usize, offset: usize) -> Result<Vec<Artwork>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, title, artist, width_cm, height_cm, depth_cm, medium,
                   creation_date, description, catalog_number, accession_number,
                   reference_image_path, palette
            FROM artworks ORDER BY id LIMIT ? OFFSET ?
            "#,
        )?;

        let artworks = stmt
            .query_map(params![limit as i64, offset as i64], artwork_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(artworks)
    }

    pub fn delete_artwork(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM artworks WHERE id = ?", params![id])?;
        Ok(affected > 0)
    }

    pub fn count_artworks(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM artworks", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Store (or replace) an artwork's reference embedding and palette.
    /// Called at ingestion and again whenever the reference image changes.
    pub fn update_artwork_embedding(
        &self,
        artwork_id: i64,
        embedding: &[f32],
        extractor_version: &str,
        palette: &[[u8; 3]],
    ) -> Result<()> {
        let bytes = embedding_to_bytes(embedding);
        let palette_json = serde_json::to_string(palette)?;

        let affected = self.conn.execute(
            r#"
            UPDATE artworks
            SET embedding = ?, embedding_dim = ?, extractor_version = ?,
                palette = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![
                bytes,
                embedding.len() as i64,
                extractor_version,
                palette_json,
                artwork_id
            ],
        )?;

        if affected == 0 {
            return Err(anyhow!("artwork {} not found", artwork_id));
        }
        Ok(())
    }

    /// Point an artwork at a new reference image. The stored embedding is
    /// left untouched; callers reindex afterwards.
    pub fn set_reference_image_path(&self, artwork_id: i64, path: &str) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE artworks SET reference_image_path = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![path, artwork_id],
        )?;
        if affected == 0 {
            return Err(anyhow!("artwork {} not found", artwork_id));
        }
        Ok(())
    }

    pub fn get_artwork_embedding(&self, artwork_id: i64) -> Result<Option<StoredEmbedding>> {
        let result = self.conn.query_row(
            "SELECT id, embedding, extractor_version FROM artworks WHERE id = ? AND embedding IS NOT NULL",
            [artwork_id],
            |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok(StoredEmbedding {
                    artwork_id: row.get(0)?,
                    vector: bytes_to_embedding(&bytes),
                    extractor_version: row.get(2)?,
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All reference embeddings, for catalog index rebuilds.
    pub fn get_all_reference_embeddings(&self) -> Result<Vec<StoredEmbedding>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, embedding, extractor_version FROM artworks WHERE embedding IS NOT NULL",
        )?;

        let records = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok(StoredEmbedding {
                    artwork_id: row.get(0)?,
                    vector: bytes_to_embedding(&bytes),
                    extractor_version: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }
}

fn artwork_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artwork> {
    let palette_json: Option<String> = row.get(12)?;
    let palette = palette_json
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();

    Ok(Artwork {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        width_cm: row.get(3)?,
        height_cm: row.get(4)?,
        depth_cm: row.get(5)?,
        medium: row.get(6)?,
        creation_date: row.get(7)?,
        description: row.get(8)?,
        catalog_number: row.get(9)?,
        accession_number: row.get(10)?,
        reference_image_path: row.get(11)?,
        palette,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn sample_artwork(catalog_number: &str) -> NewArtwork {
        NewArtwork {
            title: "The Starry Night".to_string(),
            artist: "Vincent van Gogh".to_string(),
            width_cm: Some(92.1),
            height_cm: Some(73.7),
            medium: Some("Oil on canvas".to_string()),
            creation_date: Some("1889".to_string()),
            catalog_number: catalog_number.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let db = test_db();
        let id = db.create_artwork(&sample_artwork("MoMA-472.1941")).unwrap();

        let artwork = db.get_artwork(id).unwrap().unwrap();
        assert_eq!(artwork.title, "The Starry Night");
        assert_eq!(artwork.catalog_number, "MoMA-472.1941");
        assert!(artwork.palette.is_empty());

        let by_number = db
            .get_artwork_by_catalog_number("MoMA-472.1941")
            .unwrap()
            .unwrap();
        assert_eq!(by_number.id, id);
    }

    #[test]
    fn test_catalog_number_unique() {
        let db = test_db();
        db.create_artwork(&sample_artwork("K-001")).unwrap();
        let err = db.create_artwork(&sample_artwork("K-001")).unwrap_err();
        assert!(err.to_string().contains("K-001"));
    }

    #[test]
    fn test_embedding_round_trip() {
        let db = test_db();
        let id = db.create_artwork(&sample_artwork("K-002")).unwrap();

        assert!(db.get_artwork_embedding(id).unwrap().is_none());

        let vector = vec![0.6, 0.8, 0.0];
        let palette = [[12u8, 34, 56], [200, 180, 160]];
        db.update_artwork_embedding(id, &vector, "clip-vit-large-patch14/1", &palette)
            .unwrap();

        let stored = db.get_artwork_embedding(id).unwrap().unwrap();
        assert_eq!(stored.vector, vector);
        assert_eq!(stored.extractor_version, "clip-vit-large-patch14/1");

        let artwork = db.get_artwork(id).unwrap().unwrap();
        assert_eq!(artwork.palette, vec![[12u8, 34, 56], [200, 180, 160]]);

        // Re-upload replaces in place
        db.update_artwork_embedding(id, &[1.0, 0.0, 0.0], "clip-vit-large-patch14/2", &palette)
            .unwrap();
        let replaced = db.get_artwork_embedding(id).unwrap().unwrap();
        assert_eq!(replaced.vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(db.get_all_reference_embeddings().unwrap().len(), 1);
    }

    #[test]
    fn test_search() {
        let db = test_db();
        db.create_artwork(&sample_artwork("K-003")).unwrap();
        let mut other = sample_artwork("K-004");
        other.title = "Irises".to_string();
        db.create_artwork(&other).unwrap();

        assert_eq!(db.search_artworks_by_title("starry").unwrap().len(), 1);
        assert_eq!(db.search_artworks_by_artist("van Gogh").unwrap().len(), 2);
    }
}
