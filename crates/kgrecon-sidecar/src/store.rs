//! SQLite storage engine behind the sidecar.
//!
//! One connection, guarded by a mutex so it can be shared across the
//! blocking pool. Conflicting writes to one `(dataset_id, row_index)` key are
//! resolved by SQLite's upsert, not by callers.

use crate::error::{Result, SidecarError};
use chrono::{DateTime, Utc};
use kgrecon_model::{Candidate, FeatureVector, Judgment, Recon};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS recon_evidence (
    dataset_id      TEXT    NOT NULL,
    row_index       INTEGER NOT NULL,
    judgment        TEXT    NOT NULL,
    consensus_score REAL    NOT NULL,
    heavy_payload   TEXT,
    processed_at    TEXT    NOT NULL,
    PRIMARY KEY (dataset_id, row_index)
);

CREATE INDEX IF NOT EXISTS idx_recon_evidence_judgment
    ON recon_evidence (dataset_id, judgment);

CREATE TABLE IF NOT EXISTS recon_corrections (
    id              TEXT PRIMARY KEY,
    dataset_id      TEXT NOT NULL,
    surface_form    TEXT NOT NULL,
    context_window  TEXT NOT NULL,
    rejected_id     TEXT,
    accepted_id     TEXT NOT NULL,
    consensus_score REAL,
    user_comment    TEXT,
    logged_at       TEXT NOT NULL
);
"#;

// ============================================================================
// Row types
// ============================================================================

/// Heavy evidence for one row, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeavyPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
}

impl HeavyPayload {
    /// The evidence currently attached to `recon`, if any.
    pub fn from_recon(recon: &Recon) -> Option<Self> {
        if !recon.has_evidence() {
            return None;
        }
        Some(Self {
            candidates: recon.candidates.clone(),
            features: recon.features.clone(),
        })
    }

    /// Attach a transient copy of this evidence to `recon`.
    pub fn apply_to(&self, recon: &mut Recon) {
        recon.candidates = self.candidates.clone();
        recon.features = self.features.clone();
    }
}

/// One row ready to be upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceWrite {
    pub row_index: u64,
    pub judgment: Judgment,
    pub consensus_score: f64,
    pub payload: Option<HeavyPayload>,
}

/// One row as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceRow {
    pub row_index: u64,
    pub judgment: Judgment,
    pub consensus_score: f64,
    pub payload: Option<HeavyPayload>,
}

/// A user override to append to the correction log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub surface_form: String,
    #[serde(default)]
    pub context_window: Vec<String>,
    pub rejected_id: Option<String>,
    pub accepted_id: String,
    /// Score the engine gave the rejected candidate.
    pub consensus_score: Option<f64>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub id: Uuid,
    pub dataset_id: String,
    #[serde(flatten)]
    pub entry: CorrectionEntry,
    pub logged_at: DateTime<Utc>,
}

// ============================================================================
// Store
// ============================================================================

pub struct SidecarStore {
    conn: Mutex<Option<Connection>>,
}

impl SidecarStore {
    /// Open (or create) a file-backed store in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.as_ref().display(), journal_mode = %mode, "opened sidecar store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(SidecarError::Closed)?;
        f(conn)
    }

    /// Upsert every row in one transaction. Last write wins on conflict.
    pub fn upsert_evidence(&self, dataset_id: &str, rows: &[EvidenceWrite]) -> Result<usize> {
        let processed_at = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO recon_evidence
                        (dataset_id, row_index, judgment, consensus_score, heavy_payload, processed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (dataset_id, row_index) DO UPDATE SET
                        judgment = excluded.judgment,
                        consensus_score = excluded.consensus_score,
                        heavy_payload = excluded.heavy_payload,
                        processed_at = excluded.processed_at",
                )?;
                for row in rows {
                    let payload = row
                        .payload
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?;
                    stmt.execute(params![
                        dataset_id,
                        to_sql_index(row.row_index)?,
                        row.judgment.as_str(),
                        row.consensus_score,
                        payload,
                        processed_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
    }

    /// Rows with `row_index` in `[start, start + limit)`, ascending.
    pub fn fetch_range(&self, dataset_id: &str, start: u64, limit: u64) -> Result<Vec<EvidenceRow>> {
        let lo = to_sql_index(start)?;
        let hi = to_sql_index(start.saturating_add(limit).min(i64::MAX as u64))?;
        let raw: Vec<(i64, String, f64, Option<String>)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT row_index, judgment, consensus_score, heavy_payload
                 FROM recon_evidence
                 WHERE dataset_id = ?1 AND row_index >= ?2 AND row_index < ?3
                 ORDER BY row_index ASC",
            )?;
            let rows = stmt.query_map(params![dataset_id, lo, hi], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;

        raw.into_iter()
            .map(|(row_index, judgment, consensus_score, payload)| {
                let row_index = row_index as u64;
                let judgment =
                    judgment
                        .parse()
                        .map_err(|source| SidecarError::CorruptJudgment {
                            dataset_id: dataset_id.to_string(),
                            row_index,
                            source,
                        })?;
                let payload = payload
                    .as_deref()
                    .map(serde_json::from_str::<HeavyPayload>)
                    .transpose()?;
                Ok(EvidenceRow {
                    row_index,
                    judgment,
                    consensus_score,
                    payload,
                })
            })
            .collect()
    }

    /// Count rows with `judgment`; never touches the payload column.
    pub fn count_by_judgment(&self, dataset_id: &str, judgment: Judgment) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM recon_evidence WHERE dataset_id = ?1 AND judgment = ?2",
                params![dataset_id, judgment.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Every judgment bucket for a dataset in one grouped query.
    pub fn judgment_counts(&self, dataset_id: &str) -> Result<Vec<(Judgment, u64)>> {
        let grouped: Vec<(String, i64)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT judgment, count(*) FROM recon_evidence
                 WHERE dataset_id = ?1 GROUP BY judgment",
            )?;
            let rows = stmt.query_map([dataset_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;

        let mut counts: Vec<(Judgment, u64)> = Judgment::ALL.iter().map(|j| (*j, 0)).collect();
        for (judgment, count) in grouped {
            match judgment.parse::<Judgment>() {
                Ok(j) => {
                    if let Some(slot) = counts.iter_mut().find(|(k, _)| *k == j) {
                        slot.1 = count as u64;
                    }
                }
                Err(_) => {
                    tracing::warn!(dataset_id, judgment = %judgment, "skipping unknown judgment bucket");
                }
            }
        }
        Ok(counts)
    }

    /// Append a correction. Returns the generated id.
    pub fn insert_correction(&self, dataset_id: &str, entry: &CorrectionEntry) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let context = serde_json::to_string(&entry.context_window)?;
        let logged_at = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO recon_corrections
                    (id, dataset_id, surface_form, context_window, rejected_id,
                     accepted_id, consensus_score, user_comment, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.to_string(),
                    dataset_id,
                    entry.surface_form,
                    context,
                    entry.rejected_id,
                    entry.accepted_id,
                    entry.consensus_score,
                    entry.comment,
                    logged_at,
                ],
            )?;
            Ok(id)
        })
    }

    /// Corrections for a dataset in insertion order.
    pub fn corrections(&self, dataset_id: &str) -> Result<Vec<Correction>> {
        type RawCorrection = (
            String,
            String,
            String,
            Option<String>,
            String,
            Option<f64>,
            Option<String>,
            String,
        );
        let raw: Vec<RawCorrection> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, surface_form, context_window, rejected_id, accepted_id,
                        consensus_score, user_comment, logged_at
                 FROM recon_corrections
                 WHERE dataset_id = ?1
                 ORDER BY rowid ASC",
            )?;
            let rows = stmt.query_map([dataset_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;

        raw.into_iter()
            .map(
                |(id, surface_form, context, rejected_id, accepted_id, score, comment, logged_at)| {
                    Ok(Correction {
                        id: Uuid::parse_str(&id)
                            .map_err(|e| SidecarError::Corrupt(format!("correction id {id}: {e}")))?,
                        dataset_id: dataset_id.to_string(),
                        entry: CorrectionEntry {
                            surface_form,
                            context_window: serde_json::from_str(&context)?,
                            rejected_id,
                            accepted_id,
                            consensus_score: score,
                            comment,
                        },
                        logged_at: parse_timestamp(&logged_at)?,
                    })
                },
            )
            .collect()
    }

    /// Release the connection. Later calls fail with [`SidecarError::Closed`].
    pub fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| SidecarError::Sqlite(e)),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().is_none()
    }
}

fn to_sql_index(row_index: u64) -> Result<i64> {
    i64::try_from(row_index).map_err(|_| SidecarError::RowIndexOverflow(row_index))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SidecarError::Corrupt(format!("timestamp {value}: {e}")))
}
