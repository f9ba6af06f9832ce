//! Storage seams used by the importer, with SQLite implementations.
//!
//! The importer only talks to the three traits below; `Database` and the
//! `Sqlite*` types are one concrete backing for them.

pub mod database;
pub mod entities;
pub mod mapping;
pub mod schema;
pub mod statement_count;

use crate::errors::ImportResult;
use crate::models::{Entity, EntityKind, LocalEntityId, RemoteEntityId};

/// Durable remote-id to local-id correspondence.
///
/// Implementations must be safe to share between concurrent import workers.
pub trait MappingStore: Send + Sync {
    /// Look up the local counterpart of `remote_id`. Never writes.
    fn resolve(&self, remote_id: &RemoteEntityId) -> ImportResult<Option<LocalEntityId>>;

    /// Insert `remote_id -> local_id` atomically.
    ///
    /// # Errors
    /// `ImportError::DuplicateMapping` when `remote_id` is already mapped to a
    /// different local id. Recording an identical pair again succeeds.
    fn record(&self, remote_id: &RemoteEntityId, local_id: &LocalEntityId) -> ImportResult<()>;

    fn contains(&self, remote_id: &RemoteEntityId) -> ImportResult<bool> {
        Ok(self.resolve(remote_id)?.is_some())
    }

    /// Reverse lookup.
    fn remote_for_local(&self, local_id: &LocalEntityId) -> ImportResult<Option<RemoteEntityId>>;

    fn count(&self) -> ImportResult<usize>;
}

/// The local entity repository.
pub trait EntityStore: Send + Sync {
    /// A fresh, unsaved entity. Its id is assigned by the first
    /// [`EntityStore::save_entity`].
    fn new_entity(&self, kind: EntityKind) -> ImportResult<Entity>;

    fn load_entity(&self, id: &LocalEntityId) -> ImportResult<Option<Entity>>;

    /// Persist `entity`, assigning its id on first save and advancing its
    /// revision.
    ///
    /// # Errors
    /// `ImportError::PersistenceConflict` when the stored revision no longer
    /// matches `entity.revision`.
    fn save_entity(&self, entity: &mut Entity) -> ImportResult<LocalEntityId>;

    fn delete_entity(&self, id: &LocalEntityId) -> ImportResult<()>;
}

/// How many statements are materialized for a local entity.
pub trait StatementCountLookup: Send + Sync {
    fn statement_count(&self, id: &LocalEntityId) -> ImportResult<usize>;
}
