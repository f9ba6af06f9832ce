//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::ImportResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Baseline DDL: 4 CREATE TABLE + 2 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (4) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS entity_mapping (
        remote_id TEXT PRIMARY KEY,
        local_id TEXT NOT NULL,
        imported_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS entities (
        numeric_id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        revision INTEGER NOT NULL DEFAULT 1,
        payload_json TEXT NOT NULL,
        statement_count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (2) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_entity_mapping_local ON entity_mapping(local_id);",
    "CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure
/// rolls back only that single step.
pub fn migrate_schema(conn: &Connection) -> ImportResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT import_migrate_step;")?;

        let step_result = (|| -> ImportResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {} // future versions: no-op until migration is defined
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT import_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT import_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT import_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `repo_meta`.
/// Returns 0 when the key is absent or unparseable.
fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> ImportResult<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> ImportResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, no-op.
fn migrate_to_v1(_conn: &Connection) -> ImportResult<()> {
    Ok(())
}

/// v1 -> v2: create `import_diagnostics` table and indexes.
fn migrate_to_v2(conn: &Connection) -> ImportResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS import_diagnostics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            category TEXT NOT NULL,
            retryable INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_import_diag_run_created \
         ON import_diagnostics(run_id, created_at);",
    )?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_import_diag_remote \
         ON import_diagnostics(remote_id);",
    )?;
    Ok(())
}
