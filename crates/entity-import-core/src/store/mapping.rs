//! Imported-entity mapping stores.
//!
//! `SqliteMappingStore` is the durable implementation: a single indexed read
//! for `resolve` and one IMMEDIATE transaction for the insert-or-compare in
//! `record`, so concurrent workers need no in-process locking.
//! `InMemoryMappingStore` has the same semantics behind a lock and backs
//! tests and benchmarks.

use std::collections::HashMap;

use parking_lot::RwLock;
use rusqlite::{params, OptionalExtension, TransactionBehavior};

use crate::errors::{ImportError, ImportResult};
use crate::models::{LocalEntityId, RemoteEntityId};
use crate::store::database::Database;
use crate::store::MappingStore;

fn parse_stored<T>(raw: &str, parse: fn(&str) -> ImportResult<T>) -> ImportResult<T> {
    parse(raw).map_err(|_| ImportError::Database(format!("corrupt id in entity_mapping: {raw}")))
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SqliteMappingStore {
    db: Database,
}

impl SqliteMappingStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl MappingStore for SqliteMappingStore {
    fn resolve(&self, remote_id: &RemoteEntityId) -> ImportResult<Option<LocalEntityId>> {
        let conn = self.db.connect()?;
        let local: Option<String> = conn
            .query_row(
                "SELECT local_id FROM entity_mapping WHERE remote_id = ?1;",
                params![remote_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        local
            .map(|raw| parse_stored(&raw, LocalEntityId::parse))
            .transpose()
    }

    fn record(&self, remote_id: &RemoteEntityId, local_id: &LocalEntityId) -> ImportResult<()> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO entity_mapping(remote_id, local_id) VALUES (?1, ?2) \
             ON CONFLICT(remote_id) DO NOTHING;",
            params![remote_id.to_string(), local_id.to_string()],
        )?;
        if inserted == 1 {
            tx.commit()?;
            return Ok(());
        }

        let existing_raw: String = tx.query_row(
            "SELECT local_id FROM entity_mapping WHERE remote_id = ?1;",
            params![remote_id.to_string()],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let existing = parse_stored(&existing_raw, LocalEntityId::parse)?;
        if existing == *local_id {
            Ok(())
        } else {
            Err(ImportError::DuplicateMapping {
                remote_id: *remote_id,
                existing,
                attempted: *local_id,
            })
        }
    }

    fn remote_for_local(&self, local_id: &LocalEntityId) -> ImportResult<Option<RemoteEntityId>> {
        let conn = self.db.connect()?;
        let remote: Option<String> = conn
            .query_row(
                "SELECT remote_id FROM entity_mapping WHERE local_id = ?1 LIMIT 1;",
                params![local_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        remote
            .map(|raw| parse_stored(&raw, RemoteEntityId::parse))
            .transpose()
    }

    fn count(&self) -> ImportResult<usize> {
        let conn = self.db.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM entity_mapping;", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    entries: RwLock<HashMap<RemoteEntityId, LocalEntityId>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingStore for InMemoryMappingStore {
    fn resolve(&self, remote_id: &RemoteEntityId) -> ImportResult<Option<LocalEntityId>> {
        Ok(self.entries.read().get(remote_id).copied())
    }

    fn record(&self, remote_id: &RemoteEntityId, local_id: &LocalEntityId) -> ImportResult<()> {
        let mut entries = self.entries.write();
        match entries.get(remote_id) {
            Some(existing) if existing == local_id => Ok(()),
            Some(existing) => Err(ImportError::DuplicateMapping {
                remote_id: *remote_id,
                existing: *existing,
                attempted: *local_id,
            }),
            None => {
                entries.insert(*remote_id, *local_id);
                Ok(())
            }
        }
    }

    fn remote_for_local(&self, local_id: &LocalEntityId) -> ImportResult<Option<RemoteEntityId>> {
        Ok(self
            .entries
            .read()
            .iter()
            .find(|(_, local)| *local == local_id)
            .map(|(remote, _)| *remote))
    }

    fn count(&self) -> ImportResult<usize> {
        Ok(self.entries.read().len())
    }
}
