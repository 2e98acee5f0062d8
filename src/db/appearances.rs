//! Recorded artwork appearances: where an artwork was spotted in which
//! installation photo, with full provenance.
//!
//! Rows are created only by the matcher once combined confidence clears the
//! acceptance threshold. Verification is mutated only through the
//! human-review operation, never by the pipeline.

use anyhow::{anyhow, Context, Result};
use rusqlite::params;

use super::Database;
use crate::geometry::NormalizedBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Unverified,
    Confirmed,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Confirmed => "confirmed",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unverified" => Some(VerificationStatus::Unverified),
            "confirmed" => Some(VerificationStatus::Confirmed),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OcclusionLevel {
    #[default]
    None,
    Partial,
    Heavy,
}

impl OcclusionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcclusionLevel::None => "none",
            OcclusionLevel::Partial => "partial",
            OcclusionLevel::Heavy => "heavy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(OcclusionLevel::None),
            "partial" => Some(OcclusionLevel::Partial),
            "heavy" => Some(OcclusionLevel::Heavy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightingQuality {
    #[default]
    Good,
    Moderate,
    Poor,
}

impl LightingQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            LightingQuality::Good => "good",
            LightingQuality::Moderate => "moderate",
            LightingQuality::Poor => "poor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" => Some(LightingQuality::Good),
            "moderate" => Some(LightingQuality::Moderate),
            "poor" => Some(LightingQuality::Poor),
            _ => None,
        }
    }
}

/// Auxiliary visual-context signals attached to an appearance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextFlags {
    pub occlusion: OcclusionLevel,
    pub lighting: LightingQuality,
    pub partial_visibility: bool,
}

/// One accepted sighting of an artwork in an installation photo.
///
/// `id` is None until the record has been committed by the recorder.
#[derive(Debug, Clone)]
pub struct ArtworkAppearance {
    pub id: Option<i64>,
    pub artwork_id: i64,
    pub photo_id: i64,
    pub bbox: NormalizedBox,
    pub detection_confidence: f32,
    pub matching_confidence: f32,
    pub verification: VerificationStatus,
    pub verified_by: Option<String>,
    pub verified_at: Option<String>,
    pub context: ContextFlags,
}

#[derive(Debug, Clone)]
pub struct AppearanceStatistics {
    pub total: i64,
    pub verified: i64,
    pub unverified: i64,
    pub verification_rate: f64,
    pub average_confidence: f64,
}

impl Database {
    /// Persist an appearance; returns the committed id. Single-row atomic
    /// write; foreign-key integrity enforced by the store.
    pub fn save_appearance(&self, appearance: &ArtworkAppearance) -> Result<i64> {
        self.conn
            .execute(
                INSERT_APPEARANCE,
                params![
                    appearance.artwork_id,
                    appearance.photo_id,
                    appearance.bbox.x,
                    appearance.bbox.y,
                    appearance.bbox.width,
                    appearance.bbox.height,
                    appearance.detection_confidence,
                    appearance.matching_confidence,
                    appearance.verification.as_str(),
                    appearance.verified_by,
                    appearance.verified_at,
                    appearance.context.occlusion.as_str(),
                    appearance.context.lighting.as_str(),
                    appearance.context.partial_visibility,
                ],
            )
            .context("store rejected appearance write")?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Atomically replace every appearance recorded for a photo: old rows
    /// deleted and new ones inserted in one transaction, so a rejected row
    /// rolls the whole batch back. Returns the committed ids in input order.
    pub fn replace_appearances_for_photo(
        &mut self,
        photo_id: i64,
        appearances: &[ArtworkAppearance],
    ) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM artwork_appearances WHERE photo_id = ?",
            params![photo_id],
        )?;

        let mut ids = Vec::with_capacity(appearances.len());
        for appearance in appearances {
            tx.execute(
                INSERT_APPEARANCE,
                params![
                    appearance.artwork_id,
                    appearance.photo_id,
                    appearance.bbox.x,
                    appearance.bbox.y,
                    appearance.bbox.width,
                    appearance.bbox.height,
                    appearance.detection_confidence,
                    appearance.matching_confidence,
                    appearance.verification.as_str(),
                    appearance.verified_by,
                    appearance.verified_at,
                    appearance.context.occlusion.as_str(),
                    appearance.context.lighting.as_str(),
                    appearance.context.partial_visibility,
                ],
            )
            .context("store rejected appearance write")?;
            ids.push(tx.last_insert_rowid());
        }

        tx.commit()?;
        Ok(ids)
    }

    /// All appearances recorded in one photo.
    pub fn appearances_for_photo(&self, photo_id: i64) -> Result<Vec<ArtworkAppearance>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_APPEARANCE} WHERE photo_id = ? ORDER BY id"))?;

        let appearances = stmt
            .query_map([photo_id], appearance_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(appearances)
    }

    /// Every photo an artwork has been spotted in.
    pub fn appearances_for_artwork(&self, artwork_id: i64) -> Result<Vec<ArtworkAppearance>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_APPEARANCE} WHERE artwork_id = ? ORDER BY id"))?;

        let appearances = stmt
            .query_map([artwork_id], appearance_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(appearances)
    }

    pub fn appearances_with_verification(
        &self,
        status: VerificationStatus,
    ) -> Result<Vec<ArtworkAppearance>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_APPEARANCE} WHERE verification = ? ORDER BY id"))?;

        let appearances = stmt
            .query_map([status.as_str()], appearance_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(appearances)
    }

    pub fn appearances_in_confidence_range(
        &self,
        min_confidence: f32,
        max_confidence: f32,
    ) -> Result<Vec<ArtworkAppearance>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_APPEARANCE} WHERE matching_confidence >= ? AND matching_confidence <= ? ORDER BY id"
        ))?;

        let appearances = stmt
            .query_map(params![min_confidence, max_confidence], appearance_from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(appearances)
    }

    /// Record a human reviewer's verdict. This is the external-review
    /// collaborator's entry point; the pipeline never calls it.
    pub fn verify_appearance(
        &self,
        id: i64,
        verdict: VerificationStatus,
        reviewer: &str,
    ) -> Result<()> {
        if verdict == VerificationStatus::Unverified {
            return Err(anyhow!("a review cannot set an appearance back to unverified"));
        }

        let affected = self.conn.execute(
            r#"
            UPDATE artwork_appearances
            SET verification = ?, verified_by = ?, verified_at = ?
            WHERE id = ?
            "#,
            params![
                verdict.as_str(),
                reviewer,
                chrono::Utc::now().to_rfc3339(),
                id
            ],
        )?;

        if affected == 0 {
            return Err(anyhow!("appearance {} not found", id));
        }
        Ok(())
    }

    /// Remove all appearances for a photo. Used before re-resolving a photo
    /// so repeated runs do not accumulate duplicates.
    pub fn clear_appearances_for_photo(&self, photo_id: i64) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM artwork_appearances WHERE photo_id = ?",
            params![photo_id],
        )?;
        Ok(affected)
    }

    pub fn appearance_statistics(&self) -> Result<AppearanceStatistics> {
        let (total, verified, average_confidence): (i64, i64, f64) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN verification = 'confirmed' THEN 1 ELSE 0 END), 0),
                   COALESCE(AVG(matching_confidence), 0.0)
            FROM artwork_appearances
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(AppearanceStatistics {
            total,
            verified,
            unverified: total - verified,
            verification_rate: if total > 0 {
                verified as f64 / total as f64
            } else {
                0.0
            },
            average_confidence,
        })
    }
}

const INSERT_APPEARANCE: &str = r#"
    INSERT INTO artwork_appearances
        (artwork_id, photo_id, bbox_x, bbox_y, bbox_w, bbox_h,
         detection_confidence, matching_confidence,
         verification, verified_by, verified_at,
         occlusion, lighting, partial_visibility)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const SELECT_APPEARANCE: &str = r#"
    SELECT id, artwork_id, photo_id, bbox_x, bbox_y, bbox_w, bbox_h,
           detection_confidence, matching_confidence,
           verification, verified_by, verified_at,
           occlusion, lighting, partial_visibility
    FROM artwork_appearances
"#;

fn appearance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtworkAppearance> {
    let verification: String = row.get(9)?;
    let occlusion: String = row.get(12)?;
    let lighting: String = row.get(13)?;

    Ok(ArtworkAppearance {
        id: Some(row.get(0)?),
        artwork_id: row.get(1)?,
        photo_id: row.get(2)?,
        bbox: NormalizedBox {
            x: row.get(3)?,
            y: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
        },
        detection_confidence: row.get(7)?,
        matching_confidence: row.get(8)?,
        verification: VerificationStatus::parse(&verification)
            .unwrap_or(VerificationStatus::Unverified),
        verified_by: row.get(10)?,
        verified_at: row.get(11)?,
        context: ContextFlags {
            occlusion: OcclusionLevel::parse(&occlusion).unwrap_or_default(),
            lighting: LightingQuality::parse(&lighting).unwrap_or_default(),
            partial_visibility: row.get(14)?,
        },
    })
}
