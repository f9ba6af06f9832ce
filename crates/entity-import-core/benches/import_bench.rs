//! Criterion benchmarks for entity-import-core.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init + migration on a fresh database.
//! 2. **translation**: Statement translation and merging against an
//!    in-memory mapping.
//! 3. **parsing**: `wbgetentities` response parsing.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/entity-import-core/Cargo.toml
//! # Run only the translation group:
//! cargo bench --manifest-path crates/entity-import-core/Cargo.toml -- translation
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;
use serde_json::json;

use entity_import_core::importer::lookup::parse_entity_response;
use entity_import_core::importer::statements::StatementsImporter;
use entity_import_core::models::{
    DataValue, Entity, EntityId, EntityKind, LocalEntityId, RemoteEntityId, Snak, Statement,
};
use entity_import_core::store::mapping::InMemoryMappingStore;
use entity_import_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};
use entity_import_core::store::{MappingStore, StatementCountLookup};
use entity_import_core::ImportResult;

const REMOTE_URI: &str = "http://www.wikidata.org/entity/";
const LOCAL_URI: &str = "http://localhost/entity/";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct NoCounts;

impl StatementCountLookup for NoCounts {
    fn statement_count(&self, _id: &LocalEntityId) -> ImportResult<usize> {
        Ok(0)
    }
}

/// Mapping with `n` items and `n` properties, remote `Qk`/`Pk` mapped to
/// local `Q(k+1000)`/`P(k+1000)`.
fn populated_mapping(n: u64) -> Arc<InMemoryMappingStore> {
    let mapping = Arc::new(InMemoryMappingStore::new());
    for k in 1..=n {
        for kind in [EntityKind::Item, EntityKind::Property] {
            let remote = RemoteEntityId::from(EntityId::new(kind, k));
            let local = LocalEntityId::from(EntityId::new(kind, k + 1000));
            mapping.record(&remote, &local).unwrap();
        }
    }
    mapping
}

/// `n` statements `P(k) -> Q(k+1)` with a quantity qualifier whose unit is a
/// concept URI. Every third target is left unmapped.
fn synthetic_statements(n: u64, mapped: u64) -> Vec<Statement> {
    (1..=n)
        .map(|k| {
            let target = if k % 3 == 0 { mapped + k } else { k % mapped + 1 };
            let mut statement = Statement::new(Snak::value(
                EntityId::new(EntityKind::Property, k % mapped + 1),
                DataValue {
                    value_type: "wikibase-entityid".to_string(),
                    value: json!({"entity-type": "item", "numeric-id": target, "id": format!("Q{target}")}),
                },
            ));
            statement.qualifiers.push(Snak::value(
                EntityId::new(EntityKind::Property, 1),
                DataValue {
                    value_type: "quantity".to_string(),
                    value: json!({"amount": format!("+{k}"), "unit": format!("{REMOTE_URI}Q2")}),
                },
            ));
            statement
        })
        .collect()
}

fn synthetic_response(claims: usize) -> String {
    let statements: Vec<_> = (1..=claims)
        .map(|k| {
            json!({
                "mainsnak": {
                    "snaktype": "value",
                    "property": "P31",
                    "datavalue": {
                        "value": {"entity-type": "item", "numeric-id": k, "id": format!("Q{k}")},
                        "type": "wikibase-entityid"
                    }
                },
                "type": "statement",
                "rank": "normal"
            })
        })
        .collect();
    json!({
        "entities": {
            "Q42": {
                "type": "item",
                "id": "Q42",
                "labels": {"en": {"language": "en", "value": "Douglas Adams"}},
                "claims": {"P31": statements},
                "sitelinks": {"enwiki": {"site": "enwiki", "title": "Douglas Adams", "badges": []}}
            }
        }
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema/init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            migrate_schema(&conn).unwrap();
            black_box(conn)
        });
    });
}

fn bench_translation(c: &mut Criterion) {
    let mut group = c.benchmark_group("translation");
    let mapping = populated_mapping(500);
    let importer = StatementsImporter::new(mapping, Arc::new(NoCounts), REMOTE_URI, LOCAL_URI);

    let single = synthetic_statements(1, 500).remove(0);
    group.bench_function("translate_statement", |b| {
        b.iter(|| importer.translate_statement(black_box(&single)).unwrap());
    });

    for scale in &[10u64, 100, 1000] {
        let statements = synthetic_statements(*scale, 500);
        group.bench_with_input(
            BenchmarkId::new("import_statements", scale),
            &statements,
            |b, statements| {
                b.iter(|| {
                    let mut entity = Entity::new(EntityKind::Item);
                    importer.import_statements(&mut entity, statements).unwrap()
                });
            },
        );
    }
    group.finish();
}

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    let id = RemoteEntityId::parse("Q42").unwrap();
    for claims in &[1usize, 50, 500] {
        let body = synthetic_response(*claims);
        group.bench_with_input(BenchmarkId::new("wbgetentities", claims), &body, |b, body| {
            b.iter(|| parse_entity_response(&id, black_box(body)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_schema_init, bench_translation, bench_parsing);
criterion_main!(benches);
