use super::connection::Database;
use super::db_merge_points::is_valid_commit_id;
use super::timestamps::utc_from_epoch_seconds_lossy;
use crate::domains::divergence::CloneBaseline;
use crate::errors::EnclaveError;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

pub trait CloneBaselineMethods {
    fn get_clone_baseline(&self, project: &str) -> Result<Option<CloneBaseline>>;
    fn list_clone_baselines(&self) -> Result<Vec<CloneBaseline>>;
    fn record_clone_baseline(&self, baseline: &CloneBaseline) -> Result<()>;
}

impl CloneBaselineMethods for Database {
    fn get_clone_baseline(&self, project: &str) -> Result<Option<CloneBaseline>> {
        let conn = self.get_conn()?;
        if !has_table(&conn)? {
            return Ok(None);
        }
        let raw = conn
            .query_row(
                "SELECT project, commit_id, recorded_at FROM clone_baselines WHERE project = ?1",
                params![project],
                read_row,
            )
            .optional()?;
        raw.map(into_baseline).transpose()
    }

    fn list_clone_baselines(&self) -> Result<Vec<CloneBaseline>> {
        let conn = self.get_conn()?;
        if !has_table(&conn)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(
            "SELECT project, commit_id, recorded_at FROM clone_baselines ORDER BY project ASC",
        )?;
        let rows = stmt.query_map([], read_row)?;
        let mut baselines = Vec::new();
        for row in rows {
            baselines.push(into_baseline(row?)?);
        }
        Ok(baselines)
    }

    fn record_clone_baseline(&self, baseline: &CloneBaseline) -> Result<()> {
        self.ensure_writable()?;
        if let Some(commit_id) = &baseline.commit_id
            && !is_valid_commit_id(commit_id)
        {
            return Err(EnclaveError::validation(
                "commit_id",
                format!("'{commit_id}' is not a full commit id"),
            )
            .into());
        }

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO clone_baselines (project, commit_id, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(project) DO UPDATE SET
                commit_id = excluded.commit_id,
                recorded_at = excluded.recorded_at",
            params![
                baseline.project,
                baseline.commit_id,
                baseline.recorded_at.timestamp(),
            ],
        )?;
        Ok(())
    }
}

/// Older state files opened read-only never had the schema upgraded.
fn has_table(conn: &rusqlite::Connection) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'clone_baselines')",
        [],
        |row| row.get(0),
    )?)
}

type RawBaseline = (String, Option<String>, i64);

fn read_row(row: &Row) -> rusqlite::Result<RawBaseline> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_baseline(raw: RawBaseline) -> Result<CloneBaseline> {
    let (project, commit_id, recorded_at) = raw;
    if let Some(id) = &commit_id
        && !is_valid_commit_id(id)
    {
        return Err(EnclaveError::DatabaseError {
            message: format!("Clone baseline for '{project}' holds a malformed commit id '{id}'"),
        }
        .into());
    }
    Ok(CloneBaseline {
        project,
        commit_id,
        recorded_at: utc_from_epoch_seconds_lossy(recorded_at),
    })
}
