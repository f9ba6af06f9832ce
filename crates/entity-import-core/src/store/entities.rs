//! SQLite-backed local entity store.
//!
//! Entities are stored as JSON payloads keyed by an autoincrement numeric id;
//! the local id is the kind prefix plus that number. Saves use optimistic
//! concurrency on `revision`.

use rusqlite::{params, OptionalExtension};

use crate::errors::{ImportError, ImportResult};
use crate::models::{Entity, EntityId, EntityKind, LocalEntityId};
use crate::store::database::Database;
use crate::store::EntityStore;

#[derive(Clone, Debug)]
pub struct SqliteEntityStore {
    db: Database,
}

impl SqliteEntityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn numeric_key(id: &LocalEntityId) -> ImportResult<i64> {
        i64::try_from(id.entity_id().numeric)
            .map_err(|_| ImportError::InvalidId(id.to_string()))
    }
}

impl EntityStore for SqliteEntityStore {
    fn new_entity(&self, kind: EntityKind) -> ImportResult<Entity> {
        Ok(Entity::new(kind))
    }

    fn load_entity(&self, id: &LocalEntityId) -> ImportResult<Option<Entity>> {
        let conn = self.db.connect()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT revision, payload_json FROM entities \
                 WHERE numeric_id = ?1 AND entity_type = ?2;",
                params![Self::numeric_key(id)?, id.kind().as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((revision, payload)) = row else {
            return Ok(None);
        };
        let mut entity: Entity = serde_json::from_str(&payload)?;
        entity.id = Some(*id);
        entity.revision = Some(u64::try_from(revision).unwrap_or(0));
        Ok(Some(entity))
    }

    fn save_entity(&self, entity: &mut Entity) -> ImportResult<LocalEntityId> {
        let payload = serde_json::to_string(&*entity)?;
        let statement_count = i64::try_from(entity.statements.len()).unwrap_or(i64::MAX);
        let conn = self.db.connect()?;

        let Some(id) = entity.id else {
            conn.execute(
                "INSERT INTO entities (entity_type, revision, payload_json, statement_count) \
                 VALUES (?1, 1, ?2, ?3);",
                params![entity.kind.as_str(), payload, statement_count],
            )?;
            let numeric = u64::try_from(conn.last_insert_rowid())
                .map_err(|_| ImportError::Database("negative rowid for entity".to_string()))?;
            let id = LocalEntityId::from(EntityId::new(entity.kind, numeric));
            entity.id = Some(id);
            entity.revision = Some(1);
            return Ok(id);
        };

        if id.kind() != entity.kind {
            return Err(ImportError::Database(format!(
                "entity {id} carries kind {}",
                entity.kind.as_str()
            )));
        }
        let expected = entity.revision.ok_or_else(|| ImportError::PersistenceConflict {
            entity: id.to_string(),
            message: "entity has an id but no base revision".to_string(),
        })?;
        let expected_db = i64::try_from(expected).unwrap_or(i64::MAX);

        let updated = conn.execute(
            "UPDATE entities \
             SET payload_json = ?1, statement_count = ?2, \
                 revision = revision + 1, updated_at = CURRENT_TIMESTAMP \
             WHERE numeric_id = ?3 AND entity_type = ?4 AND revision = ?5;",
            params![
                payload,
                statement_count,
                Self::numeric_key(&id)?,
                id.kind().as_str(),
                expected_db
            ],
        )?;
        if updated == 0 {
            return Err(ImportError::PersistenceConflict {
                entity: id.to_string(),
                message: format!("revision {expected} is no longer current"),
            });
        }
        entity.revision = Some(expected + 1);
        Ok(id)
    }

    fn delete_entity(&self, id: &LocalEntityId) -> ImportResult<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "DELETE FROM entities WHERE numeric_id = ?1 AND entity_type = ?2;",
            params![Self::numeric_key(id)?, id.kind().as_str()],
        )?;
        Ok(())
    }
}
