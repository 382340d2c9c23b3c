use super::connection::Database;
use super::timestamps::utc_from_epoch_seconds_lossy;
use crate::domains::merge::types::{SyncHistoryEntry, SyncOutcome};
use anyhow::{Result, anyhow};
use rusqlite::{Row, params};

pub trait SyncHistoryMethods {
    fn append_sync_history(&self, entry: &SyncHistoryEntry) -> Result<()>;
    fn list_sync_history(&self, project: Option<&str>, limit: usize)
    -> Result<Vec<SyncHistoryEntry>>;
}

impl SyncHistoryMethods for Database {
    fn append_sync_history(&self, entry: &SyncHistoryEntry) -> Result<()> {
        self.ensure_writable()?;
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO sync_history (id, project, outcome, from_commit, to_commit, commits, detail, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.project,
                entry.outcome.as_str(),
                entry.from_commit,
                entry.to_commit,
                entry.commits,
                entry.detail,
                entry.recorded_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn list_sync_history(
        &self,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SyncHistoryEntry>> {
        let conn = self.get_conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, project, outcome, from_commit, to_commit, commits, detail, recorded_at
             FROM sync_history
             WHERE ?1 IS NULL OR project = ?1
             ORDER BY recorded_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project, limit], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row??);
        }
        Ok(entries)
    }
}

fn row_to_entry(row: &Row) -> rusqlite::Result<Result<SyncHistoryEntry>> {
    let outcome: String = row.get(2)?;
    let outcome = match outcome.parse::<SyncOutcome>() {
        Ok(outcome) => outcome,
        Err(e) => return Ok(Err(anyhow!("Unknown sync outcome in history: {e}"))),
    };

    Ok(Ok(SyncHistoryEntry {
        id: row.get(0)?,
        project: row.get(1)?,
        outcome,
        from_commit: row.get(3)?,
        to_commit: row.get(4)?,
        commits: row.get(5)?,
        detail: row.get(6)?,
        recorded_at: utc_from_epoch_seconds_lossy(row.get(7)?),
    }))
}
