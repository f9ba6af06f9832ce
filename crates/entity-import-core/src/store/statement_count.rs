//! Statement count lookup over the materialized `entities.statement_count`
//! column.

use rusqlite::{params, OptionalExtension};

use crate::errors::{ImportError, ImportResult};
use crate::models::LocalEntityId;
use crate::store::database::Database;
use crate::store::StatementCountLookup;

#[derive(Clone, Debug)]
pub struct SqliteStatementCountLookup {
    db: Database,
}

impl SqliteStatementCountLookup {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl StatementCountLookup for SqliteStatementCountLookup {
    /// Unknown entities count as zero.
    fn statement_count(&self, id: &LocalEntityId) -> ImportResult<usize> {
        let numeric = i64::try_from(id.entity_id().numeric)
            .map_err(|_| ImportError::InvalidId(id.to_string()))?;
        let conn = self.db.connect()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT statement_count FROM entities \
                 WHERE numeric_id = ?1 AND entity_type = ?2;",
                params![numeric, id.kind().as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.and_then(|n| usize::try_from(n).ok()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataValue, Entity, EntityId, EntityKind, Snak, Statement};
    use crate::store::entities::SqliteEntityStore;
    use crate::store::EntityStore;

    #[test]
    fn counts_follow_saves() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("import.db")).unwrap();
        db.init_schema().unwrap();
        let entities = SqliteEntityStore::new(db.clone());
        let lookup = SqliteStatementCountLookup::new(db);

        let mut entity = Entity::new(EntityKind::Item);
        let id = entities.save_entity(&mut entity).unwrap();
        assert_eq!(lookup.statement_count(&id).unwrap(), 0);

        let snak = Snak::value(
            EntityId::parse("P1").unwrap(),
            DataValue {
                value_type: "string".to_string(),
                value: serde_json::json!("abc"),
            },
        );
        entity.statements.push(Statement::new(snak.clone()));
        entity.statements.push(Statement::new(snak));
        entities.save_entity(&mut entity).unwrap();
        assert_eq!(lookup.statement_count(&id).unwrap(), 2);

        let unknown = LocalEntityId::parse("Q999").unwrap();
        assert_eq!(lookup.statement_count(&unknown).unwrap(), 0);
    }
}
