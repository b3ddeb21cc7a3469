//! SQLite-backed object store for issues.
//!
//! One row per issue holding its encoded [`IssueRecord`], plus a small
//! key/value `meta` table for registry counters. Every batch of changes is
//! applied in one transaction: either all of it lands or none of it does.

use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::codec::{self, IssueRecord};
use crate::logging::{log_commit, log_storage_failure, ts_epoch_ms};
use crate::IssueId;

pub const META_NEXT_ISSUE_ID: &str = "next_issue_id";

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    PutIssue(IssueRecord),
    DeleteIssue(IssueId),
    SetMeta { key: String, value: String },
}

impl Change {
    fn issue(&self) -> Option<IssueId> {
        match self {
            Change::PutIssue(r) => Some(r.issue_id),
            Change::DeleteIssue(id) => Some(*id),
            Change::SetMeta { .. } => None,
        }
    }
}

pub struct IssueStore {
    conn: Connection,
}

impl IssueStore {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS issues (
                issue_id INTEGER PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn load(&self, issue: IssueId) -> Result<Option<IssueRecord>> {
        let text: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM issues WHERE issue_id = ?1",
                params![issue as i64],
                |row| row.get(0),
            )
            .optional()?;
        text.map(|t| codec::decode(&t)).transpose()
    }

    /// Every stored issue, ascending. A record that fails to decode is
    /// returned as an error next to its id so callers can skip it.
    pub fn load_all(&self) -> Result<Vec<(IssueId, Result<IssueRecord>)>> {
        let mut stmt = self.conn.prepare("SELECT issue_id, record FROM issues ORDER BY issue_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (id, text) = row?;
            out.push((id as IssueId, codec::decode(&text)));
        }
        Ok(out)
    }

    pub fn load_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// Apply `changes` atomically. Dropping the transaction on error rolls
    /// it back.
    pub fn commit(&mut self, changes: &[Change]) -> Result<()> {
        let now = ts_epoch_ms() as i64;
        let tx = self.conn.transaction()?;
        for change in changes {
            match change {
                Change::PutIssue(record) => {
                    tx.execute(
                        "INSERT INTO issues (issue_id, record, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(issue_id) DO UPDATE SET record = excluded.record,
                                                             updated_at = excluded.updated_at",
                        params![record.issue_id as i64, codec::encode(record)?, now],
                    )?;
                }
                Change::DeleteIssue(id) => {
                    tx.execute("DELETE FROM issues WHERE issue_id = ?1", params![*id as i64])?;
                }
                Change::SetMeta { key, value } => {
                    tx.execute(
                        "INSERT INTO meta (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key, value],
                    )?;
                }
            }
        }
        tx.commit()?;
        log_commit(changes.iter().find_map(Change::issue), changes.len());
        Ok(())
    }

    /// Commit, retrying once if the first attempt hit a conflicting writer.
    pub fn commit_retrying_once(&mut self, changes: &[Change]) -> Result<()> {
        match self.commit(changes) {
            Err(err) if is_conflict(&err) => {
                log_storage_failure(changes.iter().find_map(Change::issue), &err.to_string(), false);
                self.commit(changes)
            }
            other => other,
        }
    }
}

/// Whether `err` is SQLite reporting another writer holding the database.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(e, _)) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}
