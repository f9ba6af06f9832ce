//! SQLite database handle for the import store.
//!
//! Each public method opens its own connection so that the handle can be
//! cloned freely into worker threads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection};

use crate::errors::{ImportError, ImportResult};
use crate::importer::batch::BatchReport;
use crate::store::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

/// One row of `import_diagnostics`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportDiagnostic {
    pub run_id: String,
    pub remote_id: String,
    pub stage: String,
    pub category: String,
    pub retryable: bool,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Create a new `Database`. The path is expanded and parent directories
    /// are created if they do not already exist.
    pub fn new(db_path: impl AsRef<Path>) -> ImportResult<Self> {
        let expanded = expand_tilde(&db_path.as_ref().to_string_lossy());
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new connection with foreign keys on and a busy timeout so that
    /// concurrent workers wait for each other instead of failing.
    pub fn connect(&self) -> ImportResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Initialise the schema: WAL mode, baseline tables and indexes, then
    /// pending migrations.
    pub fn init_schema(&self) -> ImportResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Write one diagnostics row per failed id of `report`. Returns the
    /// number of rows written.
    pub fn record_batch_report(&self, run_id: &str, report: &BatchReport) -> ImportResult<usize> {
        if run_id.trim().is_empty() {
            return Err(ImportError::Config("run_id must not be empty".to_string()));
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO import_diagnostics \
                     (run_id, remote_id, stage, category, retryable, message) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            )?;
            for failure in &report.failed {
                stmt.execute(params![
                    run_id,
                    failure.remote_id.to_string(),
                    failure.stage.as_str(),
                    failure.error.category(),
                    failure.error.is_retryable() as i64,
                    failure.error.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(report.failed.len())
    }

    pub fn list_import_diagnostics(&self, run_id: &str) -> ImportResult<Vec<ImportDiagnostic>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, remote_id, stage, category, retryable, message \
             FROM import_diagnostics \
             WHERE run_id = ?1 \
             ORDER BY id ASC;",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ImportDiagnostic {
                run_id: row.get(0)?,
                remote_id: row.get(1)?,
                stage: row.get(2)?,
                category: row.get(3)?,
                retryable: row.get::<_, i64>(4)? != 0,
                message: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
