use super::connection::Database;

pub fn initialize_schema(db: &Database) -> anyhow::Result<()> {
    let conn = db.get_conn()?;

    // One row per project: the last commit already replayed onto the host.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS merge_points (
            project TEXT PRIMARY KEY,
            commit_id TEXT NOT NULL,
            target_branch TEXT,
            commits_applied INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Clone HEAD per configured project at creation; NULL for empty sources.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS clone_baselines (
            project TEXT PRIMARY KEY,
            commit_id TEXT,
            recorded_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sync_history (
            id TEXT PRIMARY KEY,
            project TEXT NOT NULL,
            outcome TEXT NOT NULL,  -- 'no_changes', 'merged', 'conflict', 'error', 'planned', 'declined'
            from_commit TEXT,
            to_commit TEXT,
            commits INTEGER NOT NULL DEFAULT 0,
            detail TEXT,
            recorded_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sync_history_project ON sync_history(project, recorded_at DESC)",
        [],
    )?;

    apply_merge_point_migrations(&conn)?;

    Ok(())
}

fn apply_merge_point_migrations(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(merge_points)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    // Early state files predate remembered target branches.
    if !columns.iter().any(|c| c == "target_branch") {
        conn.execute("ALTER TABLE merge_points ADD COLUMN target_branch TEXT", [])?;
    }
    if !columns.iter().any(|c| c == "commits_applied") {
        conn.execute(
            "ALTER TABLE merge_points ADD COLUMN commits_applied INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn migrates_legacy_merge_point_table() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.sqlite");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute(
                "CREATE TABLE merge_points (project TEXT PRIMARY KEY, commit_id TEXT NOT NULL, updated_at INTEGER NOT NULL)",
                [],
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let conn = db.get_conn().unwrap();
        conn.execute(
            "INSERT INTO merge_points (project, commit_id, target_branch, commits_applied, updated_at)
             VALUES ('web', 'abc', 'main', 3, 0)",
            [],
        )
        .unwrap();

        // Running the schema twice is harmless.
        initialize_schema(&db).unwrap();
    }
}
