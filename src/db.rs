//! Unique-Detection Store — SQLite persistence.
//!
//! Flat records ready for downstream reporting and the review workflow:
//! insert at processing time, list without image payloads, fold the
//! reviewer's choice back in later.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detector::VehicleClass;
use crate::error::Result;
use crate::snapshot::UniqueDetection;

/// A stored record, without the image payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDetection {
    pub id: String,
    pub video: String,
    pub timestamp: String,
    pub frame_number: u64,
    pub label: String,
    pub confidence: f32,
    pub user_choice: Option<String>,
    pub is_manual_label: bool,
    pub is_manual_correction: bool,
    pub processed_at: DateTime<Utc>,
}

pub struct DetectionStore {
    conn: Connection,
}

impl DetectionStore {
    pub fn open(path: &str) -> Result<Self> {
        // Resolve relative paths to local app data
        let resolved = resolve_db_path(path);
        let conn = Connection::open(&resolved)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS unique_detections (
                id                   TEXT    PRIMARY KEY,
                video                TEXT    NOT NULL,
                timestamp            TEXT    NOT NULL,
                frame_number         INTEGER NOT NULL,
                label                TEXT    NOT NULL,
                confidence           REAL    NOT NULL,
                bbox_x               REAL    NOT NULL,
                bbox_y               REAL    NOT NULL,
                bbox_width           REAL    NOT NULL,
                bbox_height          REAL    NOT NULL,
                full_frame_image     TEXT    NOT NULL,
                crop_image           TEXT    NOT NULL,
                suggestions          TEXT    NOT NULL,
                user_choice          TEXT,
                is_manual_label      INTEGER NOT NULL DEFAULT 0,
                is_manual_correction INTEGER NOT NULL DEFAULT 0,
                processed_at         TEXT    NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_video ON unique_detections (video);
            CREATE INDEX IF NOT EXISTS idx_label ON unique_detections (label);
            CREATE INDEX IF NOT EXISTS idx_frame ON unique_detections (video, frame_number);
        ",
        )?;
        Ok(())
    }

    /// Insert one unique detection produced for `video`.
    pub fn insert(&self, video: &str, det: &UniqueDetection) -> Result<()> {
        let label = det
            .suggestions
            .first()
            .map(|s| s.label)
            .unwrap_or(VehicleClass::Unknown);
        let confidence = det.suggestions.first().map(|s| s.confidence).unwrap_or(0.0);
        let suggestions = serde_json::to_string(&det.suggestions)?;

        self.conn.execute(
            "INSERT INTO unique_detections
             (id, video, timestamp, frame_number, label, confidence,
              bbox_x, bbox_y, bbox_width, bbox_height,
              full_frame_image, crop_image, suggestions,
              user_choice, is_manual_label, is_manual_correction, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                det.id.to_string(),
                video,
                det.timestamp,
                det.frame_number as i64,
                label.as_str(),
                confidence,
                det.bbox.x,
                det.bbox.y,
                det.bbox.width,
                det.bbox.height,
                det.full_frame_image,
                det.crop_image,
                suggestions,
                det.user_choice.map(|c| c.as_str()),
                det.is_manual_label as i32,
                det.is_manual_correction as i32,
                det.processed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Record the reviewer's choice for one detection. A choice that differs
    /// from the model's label is flagged as a manual correction.
    pub fn update_user_choice(
        &self,
        id: &str,
        choice: VehicleClass,
        is_manual_label: bool,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE unique_detections
             SET user_choice = ?1,
                 is_manual_label = ?2,
                 is_manual_correction = CASE WHEN label != ?1 THEN 1 ELSE 0 END
             WHERE id = ?3",
            params![choice.as_str(), is_manual_label as i32, id],
        )?;
        Ok(())
    }

    /// Retrieve recent records (without image payloads for speed).
    pub fn get_recent(&self, video: Option<&str>, limit: u32) -> Result<Vec<StoredDetection>> {
        let sql = match video {
            Some(_) => {
                "SELECT id, video, timestamp, frame_number, label, confidence,
                        user_choice, is_manual_label, is_manual_correction, processed_at
                 FROM unique_detections
                 WHERE video = ?1 ORDER BY frame_number ASC LIMIT ?2"
            }
            None => {
                "SELECT id, video, timestamp, frame_number, label, confidence,
                        user_choice, is_manual_label, is_manual_correction, processed_at
                 FROM unique_detections
                 ORDER BY processed_at DESC LIMIT ?1"
            }
        };

        let mut stmt = self.conn.prepare(sql)?;

        let rows = if let Some(v) = video {
            stmt.query_map(params![v, limit], map_row)?
        } else {
            stmt.query_map(params![limit], map_row)?
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Retrieve the image payloads for one record.
    pub fn get_images(&self, id: &str) -> Result<(String, String)> {
        let pair = self.conn.query_row(
            "SELECT full_frame_image, crop_image FROM unique_detections WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(pair)
    }

    /// Per-class counts, optionally scoped to one video.
    pub fn count_by_class(&self, video: Option<&str>) -> Result<Vec<(String, u64)>> {
        let sql = match video {
            Some(_) => {
                "SELECT label, COUNT(*) as cnt FROM unique_detections
                 WHERE video = ?1 GROUP BY label ORDER BY cnt DESC"
            }
            None => {
                "SELECT label, COUNT(*) as cnt FROM unique_detections
                 GROUP BY label ORDER BY cnt DESC"
            }
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = if let Some(v) = video {
            stmt.query_map(params![v], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
        } else {
            stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredDetection> {
    let ts_str: String = row.get(9)?;
    let processed_at = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(StoredDetection {
        id: row.get(0)?,
        video: row.get(1)?,
        timestamp: row.get(2)?,
        frame_number: row.get(3)?,
        label: row.get(4)?,
        confidence: row.get(5)?,
        user_choice: row.get(6)?,
        is_manual_label: row.get::<_, i32>(7)? != 0,
        is_manual_correction: row.get::<_, i32>(8)? != 0,
        processed_at,
    })
}

/// Resolve bare DB filenames to the local app data directory.
fn resolve_db_path(db_path: &str) -> String {
    if Path::new(db_path).is_absolute() {
        return db_path.to_string();
    }
    if let Some(data_dir) = dirs::data_local_dir() {
        let full = data_dir.join("velotrack").join(db_path);
        if let Some(parent) = full.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return full.to_string_lossy().to_string();
    }
    db_path.to_string()
}
