use super::connection::Database;
use super::timestamps::utc_from_epoch_seconds_lossy;
use crate::domains::merge::types::MergePoint;
use crate::errors::EnclaveError;
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

pub trait MergePointMethods {
    fn get_merge_point(&self, project: &str) -> Result<Option<MergePoint>>;
    fn list_merge_points(&self) -> Result<Vec<MergePoint>>;
    fn record_merge_point(&self, point: &MergePoint) -> Result<()>;
}

impl MergePointMethods for Database {
    fn get_merge_point(&self, project: &str) -> Result<Option<MergePoint>> {
        let conn = self.get_conn()?;
        let raw = conn
            .query_row(
                "SELECT project, commit_id, target_branch, commits_applied, updated_at
                 FROM merge_points
                 WHERE project = ?1",
                params![project],
                read_row,
            )
            .optional()?;
        raw.map(into_merge_point).transpose()
    }

    fn list_merge_points(&self) -> Result<Vec<MergePoint>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT project, commit_id, target_branch, commits_applied, updated_at
             FROM merge_points
             ORDER BY project ASC",
        )?;
        let rows = stmt.query_map([], read_row)?;
        let mut points = Vec::new();
        for row in rows {
            points.push(into_merge_point(row?)?);
        }
        Ok(points)
    }

    fn record_merge_point(&self, point: &MergePoint) -> Result<()> {
        self.ensure_writable()?;
        if !is_valid_commit_id(&point.commit_id) {
            return Err(EnclaveError::validation(
                "commit_id",
                format!("'{}' is not a full commit id", point.commit_id),
            )
            .into());
        }

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO merge_points (project, commit_id, target_branch, commits_applied, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project) DO UPDATE SET
                commit_id = excluded.commit_id,
                target_branch = excluded.target_branch,
                commits_applied = excluded.commits_applied,
                updated_at = excluded.updated_at",
            params![
                point.project,
                point.commit_id,
                point.target_branch,
                point.commits_applied,
                point.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }
}

type RawMergePoint = (String, String, Option<String>, u32, i64);

fn read_row(row: &Row) -> rusqlite::Result<RawMergePoint> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn into_merge_point(raw: RawMergePoint) -> Result<MergePoint> {
    let (project, commit_id, target_branch, commits_applied, updated_at) = raw;
    if !is_valid_commit_id(&commit_id) {
        return Err(EnclaveError::DatabaseError {
            message: format!("Merge point for '{project}' holds a malformed commit id '{commit_id}'"),
        }
        .into());
    }

    Ok(MergePoint {
        project,
        commit_id,
        target_branch,
        commits_applied,
        updated_at: utc_from_epoch_seconds_lossy(updated_at),
    })
}

/// Full SHA-1 or SHA-256 object id in lowercase hex.
pub fn is_valid_commit_id(value: &str) -> bool {
    matches!(value.len(), 40 | 64)
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    const COMMIT_A: &str = "1111111111111111111111111111111111111111";
    const COMMIT_B: &str = "2222222222222222222222222222222222222222";

    fn point(project: &str, commit: &str) -> MergePoint {
        MergePoint {
            project: project.to_string(),
            commit_id: commit.to_string(),
            target_branch: None,
            commits_applied: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn record_then_overwrite_keeps_single_row() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join("state.sqlite")).unwrap();

        assert!(db.get_merge_point("web").unwrap().is_none());

        db.record_merge_point(&point("web", COMMIT_A)).unwrap();
        let mut next = point("web", COMMIT_B);
        next.target_branch = Some("feature/x".to_string());
        next.commits_applied = 3;
        db.record_merge_point(&next).unwrap();

        let stored = db.get_merge_point("web").unwrap().unwrap();
        assert_eq!(stored.commit_id, COMMIT_B);
        assert_eq!(stored.target_branch.as_deref(), Some("feature/x"));
        assert_eq!(stored.commits_applied, 3);
        assert_eq!(db.list_merge_points().unwrap().len(), 1);
    }

    #[test]
    fn rejects_abbreviated_commit_ids_on_write() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join("state.sqlite")).unwrap();
        assert!(db.record_merge_point(&point("web", "abc123")).is_err());
    }

    #[test]
    fn corrupt_rows_surface_as_database_errors() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join("state.sqlite")).unwrap();
        db.get_conn()
            .unwrap()
            .execute(
                "INSERT INTO merge_points (project, commit_id, commits_applied, updated_at)
                 VALUES ('web', 'not-a-commit', 0, 0)",
                [],
            )
            .unwrap();

        let err = db.get_merge_point("web").unwrap_err();
        assert!(matches!(
            EnclaveError::from_internal(err),
            EnclaveError::DatabaseError { .. }
        ));
    }

    #[test]
    fn commit_id_shapes() {
        assert!(is_valid_commit_id(COMMIT_A));
        assert!(is_valid_commit_id(&"ab".repeat(32)));
        assert!(!is_valid_commit_id(&"AB".repeat(20)));
        assert!(!is_valid_commit_id("HEAD"));
    }
}
