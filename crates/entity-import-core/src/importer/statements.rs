//! Translate remote statements into local ones and merge them into an entity.
//!
//! Every entity id embedded in a statement (snak properties, entity-valued
//! data values, concept URIs such as quantity units) is rewritten to its local
//! counterpart through the mapping store. Ids without a counterpart are left
//! as remote text and recorded in [`Statement::pending`], so a later import
//! can find and refresh the statement once the target exists.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{ImportError, ImportResult};
use crate::guards::{MAX_VALUE_DEPTH, MAX_VALUE_NODES};
use crate::models::{
    Entity, EntityId, EntityKind, LocalEntityId, RemoteEntityId, Snak, SnakValue, Statement,
};
use crate::store::{MappingStore, StatementCountLookup};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatementImportSummary {
    /// Statements appended to the entity.
    pub added: usize,
    /// Previously pending statements replaced by a better translation.
    pub refreshed: usize,
    /// Pending statements removed because their refreshed translation
    /// duplicated another statement on the entity.
    pub collapsed: usize,
    /// Statements already present.
    pub skipped: usize,
    /// Statements that could not be translated and were left out.
    pub failed: usize,
    /// The stored statement count matched and nothing was pending.
    pub short_circuited: bool,
    /// Remote ids still without a local counterpart after this pass.
    pub untranslated: BTreeSet<RemoteEntityId>,
}

pub struct StatementsImporter {
    mapping: Arc<dyn MappingStore>,
    count_lookup: Arc<dyn StatementCountLookup>,
    remote_concept_uri: String,
    local_concept_uri: String,
}

impl StatementsImporter {
    pub fn new(
        mapping: Arc<dyn MappingStore>,
        count_lookup: Arc<dyn StatementCountLookup>,
        remote_concept_uri: impl Into<String>,
        local_concept_uri: impl Into<String>,
    ) -> Self {
        Self {
            mapping,
            count_lookup,
            remote_concept_uri: remote_concept_uri.into(),
            local_concept_uri: local_concept_uri.into(),
        }
    }

    /// Translate one remote statement. The result carries the remote
    /// fingerprint and the set of ids left untranslated; the remote guid is
    /// dropped.
    pub fn translate_statement(&self, raw: &Statement) -> ImportResult<Statement> {
        let mut translator = Translator::new(self);
        translator.translate(raw)
    }

    /// Merge `raw_statements` into `entity`, returning what changed.
    ///
    /// A statement whose translation fails is skipped and logged; the rest
    /// are still merged. Store failures abort the merge.
    ///
    /// The merge is skipped when the stored statement count equals
    /// `raw_statements.len()` and nothing is pending, so remote edits that
    /// keep the count unchanged are not applied.
    pub fn import_statements(
        &self,
        entity: &mut Entity,
        raw_statements: &[Statement],
    ) -> ImportResult<StatementImportSummary> {
        let mut summary = StatementImportSummary::default();

        if let Some(local_id) = entity.id {
            let stored = self.count_lookup.statement_count(&local_id)?;
            if stored == raw_statements.len() && !entity.has_pending_statements() {
                debug!(
                    local_id = %local_id,
                    statement_count = stored,
                    "statements already complete, skipping merge"
                );
                summary.short_circuited = true;
                summary.skipped = raw_statements.len();
                return Ok(summary);
            }
        }

        let mut by_source: HashMap<String, usize> = HashMap::new();
        let mut local_fingerprints: HashSet<String> = HashSet::new();
        for (idx, existing) in entity.statements.iter().enumerate() {
            if let Some(source) = &existing.source_fingerprint {
                by_source.insert(source.clone(), idx);
            }
            if let Ok(fp) = existing.fingerprint() {
                local_fingerprints.insert(fp);
            }
        }
        // Pending statements whose completed translation already exists.
        let mut collapsed: BTreeSet<usize> = BTreeSet::new();

        let mut translator = Translator::new(self);
        for (position, raw) in raw_statements.iter().enumerate() {
            let translated = match translator.translate(raw) {
                Ok(statement) => statement,
                Err(err) if err.is_store_failure() => return Err(err),
                Err(err) => {
                    warn!(
                        position,
                        property = %raw.property(),
                        error = %err,
                        "skipping statement that could not be translated"
                    );
                    summary.failed += 1;
                    continue;
                }
            };
            let source = translated.source_fingerprint.clone().unwrap_or_default();

            if let Some(&idx) = by_source.get(&source) {
                if collapsed.contains(&idx) {
                    summary.skipped += 1;
                    continue;
                }
                let existing = &mut entity.statements[idx];
                if translated.pending.len() < existing.pending.len() {
                    let Ok(fp) = translated.fingerprint() else {
                        summary.failed += 1;
                        continue;
                    };
                    summary.untranslated.extend(translated.pending.iter().copied());
                    if local_fingerprints.contains(&fp) {
                        debug!(
                            position,
                            "refreshed statement already present, dropping pending copy"
                        );
                        collapsed.insert(idx);
                        summary.collapsed += 1;
                        continue;
                    }
                    let mut refreshed = translated;
                    refreshed.guid = existing.guid.take();
                    refreshed.rank = existing.rank;
                    *existing = refreshed;
                    local_fingerprints.insert(fp);
                    summary.refreshed += 1;
                } else {
                    summary.untranslated.extend(existing.pending.iter().copied());
                    summary.skipped += 1;
                }
                continue;
            }

            let fp = match translated.fingerprint() {
                Ok(fp) => fp,
                Err(err) => {
                    warn!(position, error = %err, "cannot fingerprint translated statement");
                    summary.failed += 1;
                    continue;
                }
            };
            if !local_fingerprints.insert(fp) {
                summary.skipped += 1;
                continue;
            }
            by_source.insert(source, entity.statements.len());
            summary.untranslated.extend(translated.pending.iter().copied());
            entity.statements.push(translated);
            summary.added += 1;
        }

        if !collapsed.is_empty() {
            let mut idx = 0;
            entity.statements.retain(|_| {
                let keep = !collapsed.contains(&idx);
                idx += 1;
                keep
            });
        }

        debug!(
            added = summary.added,
            refreshed = summary.refreshed,
            collapsed = summary.collapsed,
            skipped = summary.skipped,
            failed = summary.failed,
            untranslated = summary.untranslated.len(),
            "statements merged"
        );
        Ok(summary)
    }

    /// Resolve a remote id that appears inside a statement.
    ///
    /// # Errors
    /// `ImportError::TranslationGap` when the id has no local counterpart.
    pub fn resolve_reference(&self, remote_id: &RemoteEntityId) -> ImportResult<LocalEntityId> {
        self.mapping
            .resolve(remote_id)?
            .ok_or(ImportError::TranslationGap {
                remote_id: *remote_id,
            })
    }

    fn concept_suffix<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.remote_concept_uri.is_empty() {
            return None;
        }
        text.strip_prefix(self.remote_concept_uri.as_str())
    }
}

// ---------------------------------------------------------------------------
// Translation pass
// ---------------------------------------------------------------------------

/// Per-pass translation state. Resolutions are cached for the whole pass;
/// node budget and pending set are per statement.
struct Translator<'a> {
    importer: &'a StatementsImporter,
    resolved: HashMap<RemoteEntityId, Option<LocalEntityId>>,
    pending: BTreeSet<RemoteEntityId>,
    nodes: usize,
}

impl<'a> Translator<'a> {
    fn new(importer: &'a StatementsImporter) -> Self {
        Self {
            importer,
            resolved: HashMap::new(),
            pending: BTreeSet::new(),
            nodes: 0,
        }
    }

    fn translate(&mut self, raw: &Statement) -> ImportResult<Statement> {
        self.pending.clear();
        self.nodes = 0;

        let source_fingerprint = raw.fingerprint()?;
        let mut out = raw.clone();
        out.guid = None;

        self.translate_snak(&mut out.main_snak)?;
        for qualifier in &mut out.qualifiers {
            self.translate_snak(qualifier)?;
        }
        for reference in &mut out.references {
            for snak in &mut reference.snaks {
                self.translate_snak(snak)?;
            }
        }

        out.pending = std::mem::take(&mut self.pending);
        out.source_fingerprint = Some(source_fingerprint);
        Ok(out)
    }

    /// Local id for `remote`, or `remote` itself when it is still pending.
    fn translate_id(&mut self, remote: EntityId) -> ImportResult<EntityId> {
        let remote = RemoteEntityId::from(remote);
        let resolved = match self.resolved.get(&remote) {
            Some(cached) => *cached,
            None => {
                let lookup = match self.importer.resolve_reference(&remote) {
                    Ok(local) => Some(local),
                    Err(ImportError::TranslationGap { .. }) => None,
                    Err(err) => return Err(err),
                };
                self.resolved.insert(remote, lookup);
                lookup
            }
        };
        match resolved {
            Some(local) => Ok(local.entity_id()),
            None => {
                self.pending.insert(remote);
                Ok(remote.entity_id())
            }
        }
    }

    fn translate_snak(&mut self, snak: &mut Snak) -> ImportResult<()> {
        snak.property = self.translate_id(snak.property)?;
        if let SnakValue::Value { datavalue } = &mut snak.value {
            self.translate_value(&mut datavalue.value)?;
        }
        Ok(())
    }

    fn translate_value(&mut self, root: &mut Value) -> ImportResult<()> {
        let mut stack: Vec<(&mut Value, usize)> = vec![(root, 0)];
        while let Some((node, depth)) = stack.pop() {
            self.nodes += 1;
            if self.nodes > MAX_VALUE_NODES {
                return Err(ImportError::TraversalLimit(format!(
                    "data value has more than {MAX_VALUE_NODES} nodes"
                )));
            }
            if depth > MAX_VALUE_DEPTH {
                return Err(ImportError::TraversalLimit(format!(
                    "data value is nested deeper than {MAX_VALUE_DEPTH}"
                )));
            }
            match node {
                Value::Object(map) => {
                    if let Some(remote) = entity_ref(map) {
                        let local = self.translate_id(remote)?;
                        rewrite_entity_ref(map, local);
                        continue;
                    }
                    for child in map.values_mut() {
                        stack.push((child, depth + 1));
                    }
                }
                Value::Array(items) => {
                    for child in items.iter_mut() {
                        stack.push((child, depth + 1));
                    }
                }
                Value::String(text) => {
                    if let Some(rewritten) = self.translate_concept_uri(text)? {
                        *text = rewritten;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn translate_concept_uri(&mut self, text: &str) -> ImportResult<Option<String>> {
        let Some(suffix) = self.importer.concept_suffix(text) else {
            return Ok(None);
        };
        let Ok(remote) = EntityId::parse(suffix) else {
            return Ok(None);
        };
        let local = self.translate_id(remote)?;
        if self.pending.contains(&RemoteEntityId::from(remote)) {
            return Ok(None);
        }
        Ok(Some(format!("{}{}", self.importer.local_concept_uri, local)))
    }
}

/// The entity id carried by an entity-id data value, if `map` is one.
fn entity_ref(map: &Map<String, Value>) -> Option<EntityId> {
    let kind = EntityKind::from_type_str(map.get("entity-type")?.as_str()?)?;
    if let Some(id) = map.get("id").and_then(Value::as_str) {
        return EntityId::parse(id).ok().filter(|parsed| parsed.kind == kind);
    }
    let numeric = map.get("numeric-id")?.as_u64()?;
    (numeric > 0).then(|| EntityId::new(kind, numeric))
}

fn rewrite_entity_ref(map: &mut Map<String, Value>, id: EntityId) {
    if map.contains_key("id") {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
    if map.contains_key("numeric-id") {
        map.insert("numeric-id".to_string(), Value::from(id.numeric));
    }
}

// ---------------------------------------------------------------------------
// Reference discovery
// ---------------------------------------------------------------------------

/// Every remote entity id referenced by `statements`: snak properties,
/// entity-id values, and concept URIs under `remote_concept_uri`.
pub fn referenced_entity_ids(
    statements: &[Statement],
    remote_concept_uri: &str,
) -> BTreeSet<RemoteEntityId> {
    let mut found = BTreeSet::new();
    let snaks = statements.iter().flat_map(|s| {
        std::iter::once(&s.main_snak)
            .chain(s.qualifiers.iter())
            .chain(s.references.iter().flat_map(|r| r.snaks.iter()))
    });
    for snak in snaks {
        found.insert(RemoteEntityId::from(snak.property));
        let SnakValue::Value { datavalue } = &snak.value else {
            continue;
        };
        let mut stack: Vec<(&Value, usize)> = vec![(&datavalue.value, 0)];
        let mut nodes = 0usize;
        while let Some((node, depth)) = stack.pop() {
            nodes += 1;
            if nodes > MAX_VALUE_NODES || depth > MAX_VALUE_DEPTH {
                break;
            }
            match node {
                Value::Object(map) => match entity_ref(map) {
                    Some(id) => {
                        found.insert(RemoteEntityId::from(id));
                    }
                    None => stack.extend(map.values().map(|child| (child, depth + 1))),
                },
                Value::Array(items) => stack.extend(items.iter().map(|child| (child, depth + 1))),
                Value::String(text) if !remote_concept_uri.is_empty() => {
                    if let Some(id) = text
                        .strip_prefix(remote_concept_uri)
                        .and_then(|suffix| EntityId::parse(suffix).ok())
                    {
                        found.insert(RemoteEntityId::from(id));
                    }
                }
                _ => {}
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataValue, Reference};
    use crate::store::mapping::InMemoryMappingStore;
    use parking_lot::Mutex;
    use serde_json::json;

    const REMOTE_URI: &str = "http://www.wikidata.org/entity/";
    const LOCAL_URI: &str = "http://localhost/entity/";

    #[derive(Default)]
    struct FixedCounts(Mutex<HashMap<LocalEntityId, usize>>);

    impl StatementCountLookup for FixedCounts {
        fn statement_count(&self, id: &LocalEntityId) -> ImportResult<usize> {
            Ok(self.0.lock().get(id).copied().unwrap_or(0))
        }
    }

    fn eid(id: &str) -> EntityId {
        EntityId::parse(id).unwrap()
    }

    fn remote(id: &str) -> RemoteEntityId {
        RemoteEntityId::parse(id).unwrap()
    }

    fn local(id: &str) -> LocalEntityId {
        LocalEntityId::parse(id).unwrap()
    }

    fn item_value(id: &str) -> DataValue {
        DataValue {
            value_type: "wikibase-entityid".to_string(),
            value: json!({"entity-type": "item", "numeric-id": eid(id).numeric, "id": id}),
        }
    }

    fn string_value(text: &str) -> DataValue {
        DataValue {
            value_type: "string".to_string(),
            value: json!(text),
        }
    }

    fn statement(property: &str, value: DataValue) -> Statement {
        Statement::new(Snak::value(eid(property), value))
    }

    fn setup(pairs: &[(&str, &str)]) -> (Arc<InMemoryMappingStore>, Arc<FixedCounts>, StatementsImporter) {
        let mapping = Arc::new(InMemoryMappingStore::new());
        for (r, l) in pairs {
            mapping.record(&remote(r), &local(l)).unwrap();
        }
        let counts = Arc::new(FixedCounts::default());
        let importer = StatementsImporter::new(mapping.clone(), counts.clone(), REMOTE_URI, LOCAL_URI);
        (mapping, counts, importer)
    }

    #[test]
    fn translates_property_and_entity_value() {
        let (_, _, importer) = setup(&[("P31", "P7"), ("Q5", "Q100")]);
        let out = importer
            .translate_statement(&statement("P31", item_value("Q5")))
            .unwrap();
        assert_eq!(out.property(), eid("P7"));
        let SnakValue::Value { datavalue } = &out.main_snak.value else {
            panic!("expected a value snak");
        };
        assert_eq!(datavalue.value["id"], "Q100");
        assert_eq!(datavalue.value["numeric-id"], 100);
        assert!(out.pending.is_empty());
        assert!(out.source_fingerprint.is_some());
    }

    #[test]
    fn unmapped_reference_stays_remote_and_pending() {
        let (_, _, importer) = setup(&[("P31", "P7")]);
        let out = importer
            .translate_statement(&statement("P31", item_value("Q2")))
            .unwrap();
        let SnakValue::Value { datavalue } = &out.main_snak.value else {
            panic!("expected a value snak");
        };
        assert_eq!(datavalue.value["id"], "Q2");
        assert_eq!(out.pending, BTreeSet::from([remote("Q2")]));
    }

    #[test]
    fn qualifiers_references_and_units_are_translated() {
        let (_, _, importer) = setup(&[("P1", "P1"), ("P2", "P9"), ("P3", "P4"), ("Q11573", "Q50")]);
        let mut raw = statement(
            "P1",
            DataValue {
                value_type: "quantity".to_string(),
                value: json!({"amount": "+5", "unit": format!("{REMOTE_URI}Q11573")}),
            },
        );
        raw.qualifiers = vec![Snak::value(eid("P2"), string_value("x"))];
        raw.references = vec![Reference {
            snaks: vec![Snak::value(eid("P3"), item_value("Q404"))],
        }];

        let out = importer.translate_statement(&raw).unwrap();
        let SnakValue::Value { datavalue } = &out.main_snak.value else {
            panic!("expected a value snak");
        };
        assert_eq!(datavalue.value["unit"], format!("{LOCAL_URI}Q50"));
        assert_eq!(out.qualifiers[0].property, eid("P9"));
        assert_eq!(out.references[0].snaks[0].property, eid("P4"));
        assert_eq!(out.pending, BTreeSet::from([remote("Q404")]));
    }

    #[test]
    fn unmapped_unit_is_left_alone_and_pending() {
        let (_, _, importer) = setup(&[("P1", "P1")]);
        let raw = statement(
            "P1",
            DataValue {
                value_type: "quantity".to_string(),
                value: json!({"amount": "+5", "unit": format!("{REMOTE_URI}Q11573")}),
            },
        );
        let out = importer.translate_statement(&raw).unwrap();
        let SnakValue::Value { datavalue } = &out.main_snak.value else {
            panic!("expected a value snak");
        };
        assert_eq!(datavalue.value["unit"], format!("{REMOTE_URI}Q11573"));
        assert!(out.pending.contains(&remote("Q11573")));
    }

    #[test]
    fn deep_values_hit_the_traversal_limit() {
        let (_, _, importer) = setup(&[("P1", "P1")]);
        let mut value = json!("leaf");
        for _ in 0..(MAX_VALUE_DEPTH + 5) {
            value = json!({ "inner": value });
        }
        let raw = statement(
            "P1",
            DataValue {
                value_type: "monolingualtext".to_string(),
                value,
            },
        );
        let err = importer.translate_statement(&raw).unwrap_err();
        assert!(matches!(err, ImportError::TraversalLimit(_)));
    }

    #[test]
    fn failed_statement_does_not_block_the_rest() {
        let (_, _, importer) = setup(&[("P1", "P1")]);
        let mut value = json!(0);
        for _ in 0..(MAX_VALUE_DEPTH + 5) {
            value = json!([value]);
        }
        let bad = statement(
            "P1",
            DataValue {
                value_type: "string".to_string(),
                value,
            },
        );
        let good = statement("P1", string_value("fine"));

        let mut entity = Entity::new(EntityKind::Item);
        let summary = importer
            .import_statements(&mut entity, &[bad, good])
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.added, 1);
        assert_eq!(entity.statements.len(), 1);
    }

    #[test]
    fn reimport_adds_only_new_statements() {
        let (_, _, importer) = setup(&[("P1", "P1"), ("P2", "P2")]);
        let first = vec![statement("P1", string_value("a"))];
        let second = vec![
            statement("P1", string_value("a")),
            statement("P2", string_value("b")),
        ];

        let mut entity = Entity::new(EntityKind::Item);
        assert_eq!(importer.import_statements(&mut entity, &first).unwrap().added, 1);
        let summary = importer.import_statements(&mut entity, &second).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(entity.statements.len(), 2);
    }

    #[test]
    fn duplicate_raw_statements_are_added_once() {
        let (_, _, importer) = setup(&[("P1", "P1")]);
        let raw = vec![
            statement("P1", string_value("a")),
            statement("P1", string_value("a")),
        ];
        let mut entity = Entity::new(EntityKind::Item);
        let summary = importer.import_statements(&mut entity, &raw).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn pending_statement_is_refreshed_in_place() {
        let (mapping, _, importer) = setup(&[("P31", "P31")]);
        let raw = vec![statement("P31", item_value("Q2"))];
        let mut entity = Entity::new(EntityKind::Item);

        let first = importer.import_statements(&mut entity, &raw).unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(first.untranslated, BTreeSet::from([remote("Q2")]));
        entity.statements[0].guid = Some("Q1$abc".to_string());

        mapping.record(&remote("Q2"), &local("Q20")).unwrap();
        let second = importer.import_statements(&mut entity, &raw).unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.refreshed, 1);
        assert!(second.untranslated.is_empty());
        assert_eq!(entity.statements.len(), 1);
        assert!(!entity.has_pending_statements());
        assert_eq!(entity.statements[0].guid.as_deref(), Some("Q1$abc"));
        let SnakValue::Value { datavalue } = &entity.statements[0].main_snak.value else {
            panic!("expected a value snak");
        };
        assert_eq!(datavalue.value["id"], "Q20");
    }

    #[test]
    fn pending_reference_is_kept_next_to_a_local_id_with_the_same_text() {
        let (_, _, importer) = setup(&[("P31", "P31"), ("Q5", "Q2")]);
        let raw = vec![
            statement("P31", item_value("Q5")),
            statement("P31", item_value("Q2")),
        ];
        let mut entity = Entity::new(EntityKind::Item);

        let summary = importer.import_statements(&mut entity, &raw).unwrap();
        assert_eq!(summary.added, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.untranslated, BTreeSet::from([remote("Q2")]));
        assert_eq!(entity.statements.len(), 2);
        assert_eq!(entity.pending_references(), BTreeSet::from([remote("Q2")]));
    }

    #[test]
    fn refreshed_statement_equal_to_a_local_one_replaces_nothing() {
        let (mapping, _, importer) = setup(&[("P31", "P31")]);
        let raw = vec![statement("P31", item_value("Q2"))];
        let mut entity = Entity::new(EntityKind::Item);
        importer.import_statements(&mut entity, &raw).unwrap();
        entity.statements.push(statement("P31", item_value("Q20")));

        mapping.record(&remote("Q2"), &local("Q20")).unwrap();
        let summary = importer.import_statements(&mut entity, &raw).unwrap();
        assert_eq!(summary.collapsed, 1);
        assert_eq!(summary.refreshed, 0);
        assert_eq!(summary.added, 0);
        assert_eq!(entity.statements.len(), 1);
        assert!(!entity.has_pending_statements());

        let fingerprints: HashSet<_> = entity
            .statements
            .iter()
            .map(|s| s.fingerprint().unwrap())
            .collect();
        assert_eq!(fingerprints.len(), entity.statements.len());
    }

    struct BusyMapping;

    impl MappingStore for BusyMapping {
        fn resolve(&self, _remote_id: &RemoteEntityId) -> ImportResult<Option<LocalEntityId>> {
            Err(ImportError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                None,
            )))
        }

        fn record(&self, _remote_id: &RemoteEntityId, _local_id: &LocalEntityId) -> ImportResult<()> {
            Ok(())
        }

        fn remote_for_local(&self, _local_id: &LocalEntityId) -> ImportResult<Option<RemoteEntityId>> {
            Ok(None)
        }

        fn count(&self) -> ImportResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn busy_mapping_store_aborts_the_merge() {
        let importer = StatementsImporter::new(
            Arc::new(BusyMapping),
            Arc::new(FixedCounts::default()),
            REMOTE_URI,
            LOCAL_URI,
        );
        let mut entity = Entity::new(EntityKind::Item);

        let err = importer
            .import_statements(&mut entity, &[statement("P1", string_value("a"))])
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, ImportError::Sqlite(_)));
        assert!(entity.statements.is_empty());
    }

    #[test]
    fn matching_count_short_circuits() {
        let (_, counts, importer) = setup(&[("P1", "P1")]);
        let mut entity = Entity::new(EntityKind::Item);
        entity.id = Some(local("Q3"));
        entity.statements.push(statement("P1", string_value("a")));
        counts.0.lock().insert(local("Q3"), 1);

        let summary = importer
            .import_statements(&mut entity, &[statement("P1", string_value("z"))])
            .unwrap();
        assert!(summary.short_circuited);
        assert_eq!(summary.added, 0);
        assert_eq!(entity.statements.len(), 1);
        // Same count, different remote value: left as it is.
        let SnakValue::Value { datavalue } = &entity.statements[0].main_snak.value else {
            panic!("expected a value snak");
        };
        assert_eq!(datavalue.value, json!("a"));
    }

    #[test]
    fn pending_statements_disable_short_circuit() {
        let (mapping, counts, importer) = setup(&[("P31", "P31")]);
        let raw = vec![statement("P31", item_value("Q2"))];
        let mut entity = Entity::new(EntityKind::Item);
        importer.import_statements(&mut entity, &raw).unwrap();
        entity.id = Some(local("Q3"));
        counts.0.lock().insert(local("Q3"), 1);

        mapping.record(&remote("Q2"), &local("Q8")).unwrap();
        let summary = importer.import_statements(&mut entity, &raw).unwrap();
        assert!(!summary.short_circuited);
        assert_eq!(summary.refreshed, 1);
    }

    #[test]
    fn finds_referenced_ids() {
        let mut raw = statement("P31", item_value("Q5"));
        raw.qualifiers = vec![Snak::value(
            eid("P2"),
            DataValue {
                value_type: "globecoordinate".to_string(),
                value: json!({"latitude": 1.0, "longitude": 2.0, "globe": format!("{REMOTE_URI}Q2")}),
            },
        )];
        let ids = referenced_entity_ids(&[raw], REMOTE_URI);
        let expected: BTreeSet<RemoteEntityId> =
            ["P31", "Q5", "P2", "Q2"].iter().map(|id| remote(id)).collect();
        assert_eq!(ids, expected);
    }
}
