//! Installation photo records and their processing lifecycle.
//!
//! Status transitions are monotonic: pending -> processing -> done | failed.
//! Nothing moves backward except the explicit `reset_photo` operation, which
//! external batch tooling uses to requeue failed photos.

use anyhow::{anyhow, Result};
use rusqlite::params;
use std::path::Path;

use super::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Processing => "processing",
            PhotoStatus::Done => "done",
            PhotoStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PhotoStatus::Pending),
            "processing" => Some(PhotoStatus::Processing),
            "done" => Some(PhotoStatus::Done),
            "failed" => Some(PhotoStatus::Failed),
            _ => None,
        }
    }

    /// Legal forward transitions.
    pub fn can_transition_to(&self, next: PhotoStatus) -> bool {
        matches!(
            (self, next),
            (PhotoStatus::Pending, PhotoStatus::Processing)
                | (PhotoStatus::Processing, PhotoStatus::Done)
                | (PhotoStatus::Processing, PhotoStatus::Failed)
        )
    }
}

impl std::fmt::Display for PhotoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InstallationPhoto {
    pub id: i64,
    pub exhibition_id: i64,
    pub image_path: String,
    pub original_filename: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub capture_date: Option<String>,
    pub photographer: Option<String>,
    pub room: Option<String>,
    pub view_type: Option<String>,
    pub quality_score: f64,
    pub status: PhotoStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewPhoto {
    pub exhibition_id: i64,
    pub image_path: String,
    pub original_filename: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub capture_date: Option<String>,
    pub photographer: Option<String>,
    pub room: Option<String>,
    pub view_type: Option<String>,
    pub quality_score: Option<f64>,
}

impl Database {
    /// Insert a photo record (status starts at pending).
    pub fn create_photo(&self, new: &NewPhoto) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO installation_photos
                (exhibition_id, image_path, original_filename, width, height, format,
                 camera_make, camera_model, capture_date, photographer, room, view_type,
                 quality_score)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                new.exhibition_id,
                new.image_path,
                new.original_filename,
                new.width,
                new.height,
                new.format,
                new.camera_make,
                new.camera_model,
                new.capture_date,
                new.photographer,
                new.room,
                new.view_type,
                new.quality_score.unwrap_or(1.0),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Register an image file as an installation photo, pulling dimensions
    /// and capture metadata from the file itself.
    pub fn register_photo_file(&self, exhibition_id: i64, path: &Path) -> Result<i64> {
        let mut new = NewPhoto {
            exhibition_id,
            image_path: path.to_string_lossy().into_owned(),
            original_filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            format: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
            ..Default::default()
        };

        if let Ok((w, h)) = image::image_dimensions(path) {
            new.width = Some(w as i64);
            new.height = Some(h as i64);
        }

        if let Some(capture) = read_capture_metadata(path) {
            new.camera_make = capture.camera_make;
            new.camera_model = capture.camera_model;
            new.capture_date = capture.capture_date;
        }

        self.create_photo(&new)
    }

    pub fn get_photo(&self, id: i64) -> Result<Option<InstallationPhoto>> {
        let result = self.conn.query_row(
            &format!("{SELECT_PHOTO} WHERE id = ?"),
            [id],
            photo_from_row,
        );

        match result {
            Ok(photo) => Ok(Some(photo)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn photos_for_exhibition(&self, exhibition_id: i64) -> Result<Vec<InstallationPhoto>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_PHOTO} WHERE exhibition_id = ? ORDER BY id"))?;

        let photos = stmt
            .query_map([exhibition_id], photo_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(photos)
    }

    /// Photos awaiting processing, for batch jobs.
    pub fn pending_photos(&self, limit: usize) -> Result<Vec<InstallationPhoto>> {
        self.photos_with_status(PhotoStatus::Pending, limit)
    }

    /// Failed photos, for explicit retry tooling.
    pub fn failed_photos(&self, limit: usize) -> Result<Vec<InstallationPhoto>> {
        self.photos_with_status(PhotoStatus::Failed, limit)
    }

    fn photos_with_status(&self, status: PhotoStatus, limit: usize) -> Result<Vec<InstallationPhoto>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_PHOTO} WHERE status = ? ORDER BY id LIMIT ?"))?;

        let photos = stmt
            .query_map(params![status.as_str(), limit as i64], photo_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(photos)
    }

    /// Health/status query for a single photo.
    pub fn photo_status(&self, id: i64) -> Result<Option<PhotoStatus>> {
        let result = self.conn.query_row(
            "SELECT status FROM installation_photos WHERE id = ?",
            [id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(s) => Ok(PhotoStatus::parse(&s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance a photo's status. Rejects any non-monotonic transition.
    pub fn set_photo_status(
        &self,
        id: i64,
        next: PhotoStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let current = self
            .photo_status(id)?
            .ok_or_else(|| anyhow!("photo {} not found", id))?;

        if !current.can_transition_to(next) {
            return Err(anyhow!(
                "illegal status transition {} -> {} for photo {}",
                current,
                next,
                id
            ));
        }

        let processed_at = match next {
            PhotoStatus::Done | PhotoStatus::Failed => Some(chrono::Utc::now().to_rfc3339()),
            _ => None,
        };

        self.conn.execute(
            r#"
            UPDATE installation_photos
            SET status = ?, error_message = ?, processed_at = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![next.as_str(), error_message, processed_at, id],
        )?;
        Ok(())
    }

    /// Explicit external reset: requeue a failed photo as pending. The only
    /// sanctioned backward transition.
    pub fn reset_photo(&self, id: i64) -> Result<()> {
        let current = self
            .photo_status(id)?
            .ok_or_else(|| anyhow!("photo {} not found", id))?;

        if current != PhotoStatus::Failed {
            return Err(anyhow!(
                "photo {} is {}, only failed photos can be reset",
                id,
                current
            ));
        }

        self.conn.execute(
            r#"
            UPDATE installation_photos
            SET status = 'pending', error_message = NULL, processed_at = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![id],
        )?;
        Ok(())
    }

    pub fn set_photo_quality(&self, id: i64, quality_score: f64) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE installation_photos SET quality_score = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![quality_score.clamp(0.0, 1.0), id],
        )?;
        if affected == 0 {
            return Err(anyhow!("photo {} not found", id));
        }
        Ok(())
    }
}

const SELECT_PHOTO: &str = r#"
    SELECT id, exhibition_id, image_path, original_filename, width, height, format,
           camera_make, camera_model, capture_date, photographer, room, view_type,
           quality_score, status, error_message
    FROM installation_photos
"#;

fn photo_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstallationPhoto> {
    let status_str: String = row.get(14)?;
    Ok(InstallationPhoto {
        id: row.get(0)?,
        exhibition_id: row.get(1)?,
        image_path: row.get(2)?,
        original_filename: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        format: row.get(6)?,
        camera_make: row.get(7)?,
        camera_model: row.get(8)?,
        capture_date: row.get(9)?,
        photographer: row.get(10)?,
        room: row.get(11)?,
        view_type: row.get(12)?,
        quality_score: row.get(13)?,
        status: PhotoStatus::parse(&status_str).unwrap_or(PhotoStatus::Pending),
        error_message: row.get(15)?,
    })
}

struct CaptureMetadata {
    camera_make: Option<String>,
    camera_model: Option<String>,
    capture_date: Option<String>,
}

/// Best-effort EXIF read; missing or unreadable EXIF is not an error.
fn read_capture_metadata(path: &Path) -> Option<CaptureMetadata> {
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let field_string = |tag: exif::Tag| {
        exif.get_field(tag, exif::In::PRIMARY).map(|f| {
            f.display_value()
                .to_string()
                .trim_matches('"')
                .trim()
                .to_string()
        })
    };

    Some(CaptureMetadata {
        camera_make: field_string(exif::Tag::Make),
        camera_model: field_string(exif::Tag::Model),
        capture_date: field_string(exif::Tag::DateTimeOriginal),
    })
}
