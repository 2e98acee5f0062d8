//! Exhibition records. Not touched by the matching pipeline itself;
//! immutable after creation apart from administrative edits.

use anyhow::{anyhow, Result};
use rusqlite::params;

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhibitionType {
    Permanent,
    Temporary,
    Traveling,
}

impl ExhibitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExhibitionType::Permanent => "permanent",
            ExhibitionType::Temporary => "temporary",
            ExhibitionType::Traveling => "traveling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permanent" => Some(ExhibitionType::Permanent),
            "temporary" => Some(ExhibitionType::Temporary),
            "traveling" => Some(ExhibitionType::Traveling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Exhibition {
    pub id: i64,
    pub name: String,
    pub museum: String,
    pub gallery: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    /// RFC 3339 date strings.
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub curator: Option<String>,
    pub description: Option<String>,
    pub exhibition_type: Option<ExhibitionType>,
}

#[derive(Debug, Clone, Default)]
pub struct NewExhibition {
    pub name: String,
    pub museum: String,
    pub gallery: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub curator: Option<String>,
    pub description: Option<String>,
    pub exhibition_type: Option<ExhibitionType>,
}

impl Database {
    pub fn create_exhibition(&self, new: &NewExhibition) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO exhibitions (name, museum, gallery, city, country,
                                     start_date, end_date, curator, description, exhibition_type)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                new.name,
                new.museum,
                new.gallery,
                new.city,
                new.country,
                new.start_date,
                new.end_date,
                new.curator,
                new.description,
                new.exhibition_type.map(|t| t.as_str()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_exhibition(&self, id: i64) -> Result<Option<Exhibition>> {
        let result = self.conn.query_row(
            &format!("{SELECT_EXHIBITION} WHERE id = ?"),
            [id],
            exhibition_from_row,
        );

        match result {
            Ok(exhibition) => Ok(Some(exhibition)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Administrative edits to an existing exhibition.
    pub fn update_exhibition(&self, id: i64, edit: &NewExhibition) -> Result<()> {
        let affected = self.conn.execute(
            r#"
            UPDATE exhibitions
            SET name = ?, museum = ?, gallery = ?, city = ?, country = ?,
                start_date = ?, end_date = ?, curator = ?, description = ?,
                exhibition_type = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![
                edit.name,
                edit.museum,
                edit.gallery,
                edit.city,
                edit.country,
                edit.start_date,
                edit.end_date,
                edit.curator,
                edit.description,
                edit.exhibition_type.map(|t| t.as_str()),
                id,
            ],
        )?;

        if affected == 0 {
            return Err(anyhow!("exhibition {} not found", id));
        }
        Ok(())
    }

    pub fn search_exhibitions_by_name(&self, name: &str) -> Result<Vec<Exhibition>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_EXHIBITION} WHERE name LIKE ? ORDER BY id"))?;

        let exhibitions = stmt
            .query_map([format!("%{}%", name)], exhibition_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(exhibitions)
    }

    pub fn search_exhibitions_by_museum(&self, museum: &str) -> Result<Vec<Exhibition>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_EXHIBITION} WHERE museum LIKE ? ORDER BY id"))?;

        let exhibitions = stmt
            .query_map([format!("%{}%", museum)], exhibition_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(exhibitions)
    }

    /// Exhibitions overlapping the given date range (RFC 3339 strings).
    pub fn exhibitions_in_date_range(&self, start: &str, end: &str) -> Result<Vec<Exhibition>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_EXHIBITION} WHERE end_date >= ? AND start_date <= ? ORDER BY start_date"
        ))?;

        let exhibitions = stmt
            .query_map(params![start, end], exhibition_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(exhibitions)
    }

    /// Exhibitions running right now.
    pub fn current_exhibitions(&self) -> Result<Vec<Exhibition>> {
        let now = chrono::Utc::now().to_rfc3339();
        self.exhibitions_in_date_range(&now, &now)
    }
}

const SELECT_EXHIBITION: &str = r#"
    SELECT id, name, museum, gallery, city, country, start_date, end_date,
           curator, description, exhibition_type
    FROM exhibitions
"#;

fn exhibition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Exhibition> {
    let type_str: Option<String> = row.get(10)?;
    Ok(Exhibition {
        id: row.get(0)?,
        name: row.get(1)?,
        museum: row.get(2)?,
        gallery: row.get(3)?,
        city: row.get(4)?,
        country: row.get(5)?,
        start_date: row.get(6)?,
        end_date: row.get(7)?,
        curator: row.get(8)?,
        description: row.get(9)?,
        exhibition_type: type_str.as_deref().and_then(ExhibitionType::parse),
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

    fn sample_exhibition() -> NewExhibition {
        NewExhibition {
            name: "Van Gogh and the Colors of the Night".to_string(),
            museum: "Museum of Modern Art".to_string(),
            city: Some("New York".to_string()),
            start_date: Some("2023-10-01T00:00:00+00:00".to_string()),
            end_date: Some("2024-01-15T00:00:00+00:00".to_string()),
            curator: Some("Dr. Sarah Johnson".to_string()),
            exhibition_type: Some(ExhibitionType::Temporary),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let db = test_db();
        let id = db.create_exhibition(&sample_exhibition()).unwrap();

        let exhibition = db.get_exhibition(id).unwrap().unwrap();
        assert_eq!(exhibition.museum, "Museum of Modern Art");
        assert_eq!(exhibition.exhibition_type, Some(ExhibitionType::Temporary));
    }

    #[test]
    fn test_date_range_search() {
        let db = test_db();
        db.create_exhibition(&sample_exhibition()).unwrap();

        let hits = db
            .exhibitions_in_date_range("2023-11-01T00:00:00+00:00", "2023-12-01T00:00:00+00:00")
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = db
            .exhibitions_in_date_range("2025-01-01T00:00:00+00:00", "2025-02-01T00:00:00+00:00")
            .unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn test_update() {
        let db = test_db();
        let id = db.create_exhibition(&sample_exhibition()).unwrap();

        let mut edit = sample_exhibition();
        edit.curator = Some("Dr. Maria Chen".to_string());
        db.update_exhibition(id, &edit).unwrap();

        let exhibition = db.get_exhibition(id).unwrap().unwrap();
        assert_eq!(exhibition.curator.as_deref(), Some("Dr. Maria Chen"));
    }
}
