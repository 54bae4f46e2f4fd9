use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::storage::migrations::MIGRATIONS;
use crate::types::{ConvergenceStatus, DecisionNode, DecisionSimilarity, ParticipantStance};

/// SQLite-backed persistence for the decision graph.
///
/// Holds two connections behind independent mutexes so `Storage` is
/// `Send + Sync` without wrapping the whole struct in a lock: one writer
/// (the graph has a single logical writer per the concurrency model) and one
/// reader, both opened against the same file.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
}

fn configure_connection(conn: &Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -8000)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "mmap_size", 268_435_456i64)?;
    // Global invariant: no stance or edge may reference a missing decision.
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn apply_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
    )?;
    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
        .unwrap_or(0);
    for migration in MIGRATIONS {
        if migration.version > current {
            conn.execute_batch(migration.up).map_err(|e| {
                StorageError::Migration(format!(
                    "migration {} ({}) failed: {e}",
                    migration.version, migration.description
                ))
            })?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![migration.version],
            )?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn harden_permissions(dir: &Path, db_file: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if dir.exists() {
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    if db_file.exists() {
        std::fs::set_permissions(db_file, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn harden_permissions(_dir: &Path, _db_file: &Path) -> std::io::Result<()> {
    Ok(())
}

impl Storage {
    /// Opens (or creates) the database at `path`, creating its parent
    /// directory on first run.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let writer = Connection::open(&path)?;
        configure_connection(&writer)?;
        apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        configure_connection(&reader)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            let _ = harden_permissions(dir, &path);
        }

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path,
        })
    }

    /// Opens an in-memory database, used by tests. Both connections share
    /// the same named in-memory database via SQLite's shared-cache URI mode.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        use rusqlite::OpenFlags;
        let uri = format!("file:conclave-test-{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let writer = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&writer)?;
        apply_migrations(&writer)?;

        let reader = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save_node(&self, node: &DecisionNode) -> Result<String, StorageError> {
        let conn = self.writer.lock().unwrap();
        conn.execute(
            "INSERT INTO decisions (id, question, timestamp, consensus, winning_option, convergence_status, participants, transcript_path, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                node.id,
                node.question,
                node.timestamp.to_rfc3339(),
                node.consensus,
                node.winning_option,
                serde_json::to_string(&node.convergence_status)?,
                serde_json::to_string(&node.participants)?,
                node.transcript_path,
                serde_json::to_string(&node.metadata)?,
            ],
        )?;
        Ok(node.id.clone())
    }

    pub fn get_node(&self, id: &str) -> Result<Option<DecisionNode>, StorageError> {
        let conn = self.reader.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, question, timestamp, consensus, winning_option, convergence_status, participants, transcript_path, metadata
                 FROM decisions WHERE id = ?1",
                params![id],
                row_to_node,
            )
            .optional()?;
        row.transpose()
    }

    pub fn list_nodes(&self, limit: usize, offset: usize) -> Result<Vec<DecisionNode>, StorageError> {
        let conn = self.reader.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, question, timestamp, consensus, winning_option, convergence_status, participants, transcript_path, metadata
             FROM decisions ORDER BY timestamp DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_node)?;
        rows.collect::<Result<Vec<_>, _>>()?.into_iter().collect()
    }

    pub fn count_nodes(&self) -> Result<u64, StorageError> {
        let conn = self.reader.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM decisions", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn save_stance(&self, stance: &ParticipantStance) -> Result<i64, StorageError> {
        let conn = self.writer.lock().unwrap();
        conn.execute(
            "INSERT INTO participant_stances (decision_id, participant, vote_option, confidence, rationale, final_position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stance.decision_id,
                stance.participant,
                stance.vote_option,
                stance.confidence,
                stance.rationale,
                stance.final_position,
            ],
        ).map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref ffi, _) if ffi.code == rusqlite::ErrorCode::ConstraintViolation => {
                StorageError::IntegrityViolation(format!("stance references unknown decision {}", stance.decision_id))
            }
            other => StorageError::Sqlite(other),
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_stances(&self, decision_id: &str) -> Result<Vec<ParticipantStance>, StorageError> {
        let conn = self.reader.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT decision_id, participant, vote_option, confidence, rationale, final_position
             FROM participant_stances WHERE decision_id = ?1 ORDER BY participant",
        )?;
        let rows = stmt.query_map(params![decision_id], |r| {
            Ok(ParticipantStance {
                decision_id: r.get(0)?,
                participant: r.get(1)?,
                vote_option: r.get(2)?,
                confidence: r.get(3)?,
                rationale: r.get(4)?,
                final_position: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Upserts a similarity edge; a later write with the same
    /// `(source_id, target_id)` replaces the prior score.
    pub fn save_similarity(&self, edge: &DecisionSimilarity) -> Result<(), StorageError> {
        let conn = self.writer.lock().unwrap();
        conn.execute(
            "INSERT INTO decision_similarities (source_id, target_id, similarity_score, computed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source_id, target_id) DO UPDATE SET
                similarity_score = excluded.similarity_score,
                computed_at = excluded.computed_at",
            params![
                edge.source_id,
                edge.target_id,
                edge.similarity_score,
                edge.computed_at.to_rfc3339(),
            ],
        ).map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref ffi, _) if ffi.code == rusqlite::ErrorCode::ConstraintViolation => {
                StorageError::IntegrityViolation(format!(
                    "edge references unknown decision ({} -> {})",
                    edge.source_id, edge.target_id
                ))
            }
            other => StorageError::Sqlite(other),
        })?;
        Ok(())
    }

    pub fn list_similar(&self, id: &str, threshold: f64, limit: usize) -> Result<Vec<(DecisionNode, f64)>, StorageError> {
        let conn = self.reader.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT d.id, d.question, d.timestamp, d.consensus, d.winning_option, d.convergence_status, d.participants, d.transcript_path, d.metadata, s.similarity_score
             FROM decision_similarities s
             JOIN decisions d ON d.id = s.target_id
             WHERE s.source_id = ?1 AND s.similarity_score >= ?2
             ORDER BY s.similarity_score DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![id, threshold, limit as i64], |r| {
            let node = row_to_node_from(r, 0);
            let score: f64 = r.get(9)?;
            Ok(node.map(|node| (node, score)))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .collect()
    }

    /// Counts rows in `participant_stances` / `decision_similarities` whose
    /// referenced decision no longer exists. Used by `health_check`.
    pub fn count_orphans(&self) -> Result<(u64, u64), StorageError> {
        let conn = self.reader.lock().unwrap();
        let stances: i64 = conn.query_row(
            "SELECT COUNT(*) FROM participant_stances s LEFT JOIN decisions d ON d.id = s.decision_id WHERE d.id IS NULL",
            [],
            |r| r.get(0),
        )?;
        let edges: i64 = conn.query_row(
            "SELECT COUNT(*) FROM decision_similarities s
             LEFT JOIN decisions a ON a.id = s.source_id
             LEFT JOIN decisions b ON b.id = s.target_id
             WHERE a.id IS NULL OR b.id IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok((stances as u64, edges as u64))
    }

    pub fn count_future_timestamps(&self, tolerance: chrono::Duration) -> Result<u64, StorageError> {
        let conn = self.reader.lock().unwrap();
        let cutoff = (Utc::now() + tolerance).to_rfc3339();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM decisions WHERE timestamp > ?1",
            params![cutoff],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn count_out_of_range_scores(&self) -> Result<u64, StorageError> {
        let conn = self.reader.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM decision_similarities WHERE similarity_score < 0.0 OR similarity_score > 1.0",
            [],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }
}

fn row_to_node(r: &rusqlite::Row) -> rusqlite::Result<Result<DecisionNode, StorageError>> {
    Ok(row_to_node_from(r, 0))
}

fn row_to_node_from(r: &rusqlite::Row, offset: usize) -> Result<DecisionNode, StorageError> {
    let timestamp_raw: String = r.get(offset + 2)?;
    let status_raw: String = r.get(offset + 5)?;
    let participants_raw: String = r.get(offset + 6)?;
    let metadata_raw: String = r.get(offset + 8)?;

    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::IntegrityViolation(format!("bad timestamp: {e}")))?;
    let convergence_status: ConvergenceStatus = serde_json::from_str(&status_raw)?;
    let participants: Vec<String> = serde_json::from_str(&participants_raw)?;
    let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&metadata_raw)?;

    Ok(DecisionNode {
        id: r.get(offset)?,
        question: r.get(offset + 1)?,
        timestamp,
        consensus: r.get(offset + 3)?,
        winning_option: r.get(offset + 4)?,
        convergence_status,
        participants,
        transcript_path: r.get(offset + 7)?,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConvergenceStatus;

    fn storage() -> Storage {
        Storage::open_in_memory().expect("open storage")
    }

    #[test]
    fn save_and_get_node_roundtrips() {
        let s = storage();
        let node = DecisionNode::new("Should we ship?", ConvergenceStatus::Converged);
        let id = s.save_node(&node).unwrap();
        let fetched = s.get_node(&id).unwrap().unwrap();
        assert_eq!(fetched.question, "Should we ship?");
    }

    #[test]
    fn stance_on_missing_decision_fails_integrity() {
        let s = storage();
        let stance = ParticipantStance::new("does-not-exist", "a@x", "yes");
        let err = s.save_stance(&stance).unwrap_err();
        assert!(matches!(err, StorageError::IntegrityViolation(_)));
    }

    #[test]
    fn similarity_upsert_keeps_single_row_with_latest_score() {
        let s = storage();
        let a = DecisionNode::new("Q1", ConvergenceStatus::Converged);
        let b = DecisionNode::new("Q2", ConvergenceStatus::Converged);
        s.save_node(&a).unwrap();
        s.save_node(&b).unwrap();

        let edge = DecisionSimilarity {
            source_id: a.id.clone(),
            target_id: b.id.clone(),
            similarity_score: 0.5,
            computed_at: Utc::now(),
        };
        s.save_similarity(&edge).unwrap();
        let edge2 = DecisionSimilarity {
            similarity_score: 0.9,
            ..edge
        };
        s.save_similarity(&edge2).unwrap();

        let similar = s.list_similar(&a.id, 0.0, 10).unwrap();
        assert_eq!(similar.len(), 1);
        assert!((similar[0].1 - 0.9).abs() < 1e-9);
    }

    #[test]
    fn no_orphans_on_fresh_store() {
        let s = storage();
        let (stances, edges) = s.count_orphans().unwrap();
        assert_eq!((stances, edges), (0, 0));
    }
}
