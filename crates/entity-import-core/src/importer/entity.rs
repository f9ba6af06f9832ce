//! Import one remote entity end to end: fetch, map, merge, persist.
//!
//! Stages run in a fixed order and each one emits a tracing event carrying
//! `stage`, `remote_id`, `local_id` and `outcome`. A new entity is saved
//! before its mapping is recorded, so a mapping never points at an entity
//! that was not persisted. When two workers race on the same remote id, the
//! loser deletes its freshly created entity and merges into the winner's.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ImporterConfig;
use crate::errors::{ImportError, ImportResult};
use crate::guards::MAX_REFERENCED_IMPORTS;
use crate::importer::badges::{BadgeItemUpdater, BadgeUpdateSummary};
use crate::importer::lookup::{ApiEntityLookup, EntityLookup};
use crate::importer::statements::{
    referenced_entity_ids, StatementImportSummary, StatementsImporter,
};
use crate::models::{Entity, LocalEntityId, RawEntity, RemoteEntityId, SiteLink};
use crate::store::database::Database;
use crate::store::entities::SqliteEntityStore;
use crate::store::mapping::SqliteMappingStore;
use crate::store::statement_count::SqliteStatementCountLookup;
use crate::store::{EntityStore, MappingStore, StatementCountLookup};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImportStage {
    Start,
    Fetched,
    Mapped,
    StatementsMerged,
    BadgesMerged,
    Persisted,
    Done,
}

impl ImportStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStage::Start => "start",
            ImportStage::Fetched => "fetched",
            ImportStage::Mapped => "mapped",
            ImportStage::StatementsMerged => "statements_merged",
            ImportStage::BadgesMerged => "badges_merged",
            ImportStage::Persisted => "persisted",
            ImportStage::Done => "done",
        }
    }
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation shared between a caller and running imports.
/// Checked between stages; a cancelled import never reaches persistence.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `Shallow` imports terms, site links and badges but no statements. Used
/// for referenced entities so they get a local id without recursing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportMode {
    Full,
    Shallow,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// A new local entity and mapping were created by this import.
    pub created: bool,
    /// Another worker recorded the mapping first; this import merged into
    /// its entity.
    pub recovered_from_race: bool,
    pub statements: StatementImportSummary,
    pub badges_added: usize,
    pub badges_omitted: BTreeSet<RemoteEntityId>,
    /// Referenced entities shallow-imported before statements were merged.
    pub referenced_imported: usize,
}

#[derive(Clone, Debug)]
pub struct ImportedEntity {
    pub remote_id: RemoteEntityId,
    pub local_id: LocalEntityId,
    pub entity: Entity,
    pub summary: ImportSummary,
}

/// An import failure together with the last stage the import completed.
#[derive(Debug, thiserror::Error)]
#[error("import of {remote_id} failed after stage {stage}: {error}")]
pub struct StageFailure {
    pub remote_id: RemoteEntityId,
    pub stage: ImportStage,
    #[source]
    pub error: ImportError,
}

impl From<StageFailure> for ImportError {
    fn from(failure: StageFailure) -> Self {
        failure.error
    }
}

// ---------------------------------------------------------------------------
// Stage tracking
// ---------------------------------------------------------------------------

struct Progress {
    remote_id: RemoteEntityId,
    mode: ImportMode,
    stage: ImportStage,
    local_id: Option<LocalEntityId>,
}

impl Progress {
    fn start(remote_id: RemoteEntityId, mode: ImportMode) -> Self {
        let progress = Self {
            remote_id,
            mode,
            stage: ImportStage::Start,
            local_id: None,
        };
        progress.emit();
        progress
    }

    fn local_label(&self) -> String {
        self.local_id.map(|id| id.to_string()).unwrap_or_default()
    }

    fn emit(&self) {
        if self.stage == ImportStage::Done {
            info!(
                stage = self.stage.as_str(),
                remote_id = %self.remote_id,
                local_id = %self.local_label(),
                mode = ?self.mode,
                outcome = "ok",
                "entity imported"
            );
        } else {
            debug!(
                stage = self.stage.as_str(),
                remote_id = %self.remote_id,
                local_id = %self.local_label(),
                mode = ?self.mode,
                outcome = "ok",
                "import stage reached"
            );
        }
    }

    fn advance(&mut self, stage: ImportStage) {
        self.stage = stage;
        self.emit();
    }

    fn fail(&self, error: ImportError) -> StageFailure {
        warn!(
            stage = self.stage.as_str(),
            remote_id = %self.remote_id,
            local_id = %self.local_label(),
            mode = ?self.mode,
            outcome = "failed",
            category = error.category(),
            retryable = error.is_retryable(),
            error = %error,
            "import failed"
        );
        StageFailure {
            remote_id: self.remote_id,
            stage: self.stage,
            error,
        }
    }

    fn check<T>(&self, result: ImportResult<T>) -> Result<T, StageFailure> {
        result.map_err(|err| self.fail(err))
    }

    fn ensure_active(&self, cancel: &CancellationToken) -> Result<(), StageFailure> {
        if cancel.is_cancelled() {
            return Err(self.fail(ImportError::Cancelled {
                remote_id: self.remote_id,
                stage: self.stage.as_str().to_string(),
            }));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Importer
// ---------------------------------------------------------------------------

pub struct EntityImporter {
    config: ImporterConfig,
    lookup: Arc<dyn EntityLookup>,
    entities: Arc<dyn EntityStore>,
    mapping: Arc<dyn MappingStore>,
    statements: StatementsImporter,
    badges: BadgeItemUpdater,
}

impl EntityImporter {
    pub fn new(
        config: ImporterConfig,
        lookup: Arc<dyn EntityLookup>,
        entities: Arc<dyn EntityStore>,
        mapping: Arc<dyn MappingStore>,
        count_lookup: Arc<dyn StatementCountLookup>,
    ) -> Self {
        let statements = StatementsImporter::new(
            mapping.clone(),
            count_lookup,
            config.remote_concept_uri.clone(),
            config.local_concept_uri.clone(),
        );
        let badges = BadgeItemUpdater::new(mapping.clone());
        Self {
            config,
            lookup,
            entities,
            mapping,
            statements,
            badges,
        }
    }

    /// Wire the HTTP lookup and the SQLite stores at `config.db_path`,
    /// initialising the schema.
    pub fn from_config(config: ImporterConfig) -> ImportResult<Self> {
        let db = Database::new(&config.db_path)?;
        db.init_schema()?;
        let lookup = Arc::new(ApiEntityLookup::new(&config)?);
        Ok(Self::new(
            config,
            lookup,
            Arc::new(SqliteEntityStore::new(db.clone())),
            Arc::new(SqliteMappingStore::new(db.clone())),
            Arc::new(SqliteStatementCountLookup::new(db)),
        ))
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    pub fn mapping(&self) -> &Arc<dyn MappingStore> {
        &self.mapping
    }

    /// Import `remote_id` and everything it needs, returning the local id.
    pub fn import_entity(&self, remote_id: &RemoteEntityId) -> ImportResult<ImportedEntity> {
        self.import_entity_with(remote_id, &CancellationToken::new())
            .map_err(ImportError::from)
    }

    /// Same as [`EntityImporter::import_entity`], observing `cancel` and
    /// reporting the stage a failure happened after.
    pub fn import_entity_with(
        &self,
        remote_id: &RemoteEntityId,
        cancel: &CancellationToken,
    ) -> Result<ImportedEntity, StageFailure> {
        self.run(remote_id, ImportMode::Full, cancel)
    }

    fn run(
        &self,
        remote_id: &RemoteEntityId,
        mode: ImportMode,
        cancel: &CancellationToken,
    ) -> Result<ImportedEntity, StageFailure> {
        let mut progress = Progress::start(*remote_id, mode);
        progress.ensure_active(cancel)?;

        let raw = progress.check(self.lookup.fetch(remote_id))?;
        progress.advance(ImportStage::Fetched);
        progress.ensure_active(cancel)?;

        let mut entity = match progress.check(self.mapping.resolve(remote_id))? {
            Some(local_id) => progress.check(self.load_mapped(remote_id, &local_id))?,
            None => progress.check(self.entities.new_entity(raw.kind))?,
        };
        let created = entity.id.is_none();
        progress.local_id = entity.id;
        merge_terms(&mut entity, &raw);
        progress.advance(ImportStage::Mapped);

        let mut summary = ImportSummary::default();
        if mode == ImportMode::Full && self.config.import_referenced_entities {
            summary.referenced_imported = self.import_referenced(&raw, cancel);
        }
        progress.ensure_active(cancel)?;

        if mode == ImportMode::Full {
            summary.statements =
                progress.check(self.statements.import_statements(&mut entity, &raw.statements))?;
        }
        progress.advance(ImportStage::StatementsMerged);

        let badges = progress.check(self.badges.update_badges(&mut entity, &raw.sitelinks))?;
        apply_badge_summary(&mut summary, badges);
        progress.advance(ImportStage::BadgesMerged);
        progress.ensure_active(cancel)?;

        let local_id =
            progress.check(self.persist(&raw, mode, &mut entity, created, &mut summary))?;
        progress.local_id = Some(local_id);
        progress.advance(ImportStage::Persisted);
        progress.advance(ImportStage::Done);

        Ok(ImportedEntity {
            remote_id: *remote_id,
            local_id,
            entity,
            summary,
        })
    }

    fn load_mapped(
        &self,
        remote_id: &RemoteEntityId,
        local_id: &LocalEntityId,
    ) -> ImportResult<Entity> {
        self.entities
            .load_entity(local_id)?
            .ok_or(ImportError::MissingLocalEntity {
                remote_id: *remote_id,
                local_id: *local_id,
            })
    }

    /// Save `entity` and, for a new entity, record its mapping.
    fn persist(
        &self,
        raw: &RawEntity,
        mode: ImportMode,
        entity: &mut Entity,
        created: bool,
        summary: &mut ImportSummary,
    ) -> ImportResult<LocalEntityId> {
        let local_id = self.entities.save_entity(entity)?;
        if !created {
            return Ok(local_id);
        }

        match self.mapping.record(&raw.id, &local_id) {
            Ok(()) => {
                summary.created = true;
                Ok(local_id)
            }
            Err(ImportError::DuplicateMapping { existing, .. }) => {
                warn!(
                    remote_id = %raw.id,
                    discarded = %local_id,
                    winner = %existing,
                    "mapping recorded concurrently, merging into existing entity"
                );
                self.entities.delete_entity(&local_id)?;

                let mut winner = self.load_mapped(&raw.id, &existing)?;
                merge_terms(&mut winner, raw);
                if mode == ImportMode::Full {
                    summary.statements =
                        self.statements.import_statements(&mut winner, &raw.statements)?;
                }
                let badges = self.badges.update_badges(&mut winner, &raw.sitelinks)?;
                apply_badge_summary(summary, badges);
                let saved = self.entities.save_entity(&mut winner)?;
                *entity = winner;
                summary.recovered_from_race = true;
                Ok(saved)
            }
            Err(err) => {
                if let Err(cleanup) = self.entities.delete_entity(&local_id) {
                    warn!(
                        remote_id = %raw.id,
                        local_id = %local_id,
                        error = %cleanup,
                        "could not remove unmapped entity"
                    );
                }
                Err(err)
            }
        }
    }

    /// Shallow-import unmapped entities referenced by `raw` so its statements
    /// and badges translate fully. Failures are logged and skipped.
    fn import_referenced(&self, raw: &RawEntity, cancel: &CancellationToken) -> usize {
        let mut candidates =
            referenced_entity_ids(&raw.statements, &self.config.remote_concept_uri);
        candidates.extend(
            raw.sitelinks
                .values()
                .flat_map(|link| link.badges.iter().copied()),
        );
        candidates.remove(&raw.id);

        let mut attempted = 0usize;
        let mut imported = 0usize;
        for candidate in candidates {
            if cancel.is_cancelled() {
                break;
            }
            match self.mapping.contains(&candidate) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(remote_id = %candidate, error = %err, "cannot check mapping");
                    continue;
                }
            }
            if attempted >= MAX_REFERENCED_IMPORTS {
                debug!(
                    remote_id = %raw.id,
                    limit = MAX_REFERENCED_IMPORTS,
                    "referenced import limit reached"
                );
                break;
            }
            attempted += 1;
            if self.run(&candidate, ImportMode::Shallow, cancel).is_ok() {
                imported += 1;
            }
        }
        imported
    }
}

fn apply_badge_summary(summary: &mut ImportSummary, badges: BadgeUpdateSummary) {
    summary.badges_added = badges.added;
    summary.badges_omitted = badges.omitted;
}

/// Copy remote terms and site links the local entity lacks. Local values
/// always win.
fn merge_terms(entity: &mut Entity, raw: &RawEntity) {
    if entity.datatype.is_none() {
        entity.datatype = raw.datatype.clone();
    }
    for (lang, label) in &raw.labels {
        entity
            .labels
            .entry(lang.clone())
            .or_insert_with(|| label.clone());
    }
    for (lang, description) in &raw.descriptions {
        entity
            .descriptions
            .entry(lang.clone())
            .or_insert_with(|| description.clone());
    }
    for (lang, aliases) in &raw.aliases {
        let local = entity.aliases.entry(lang.clone()).or_default();
        for alias in aliases {
            if !local.contains(alias) {
                local.push(alias.clone());
            }
        }
    }
    for (site, link) in &raw.sitelinks {
        entity
            .sitelinks
            .entry(site.clone())
            .or_insert_with(|| SiteLink {
                site: link.site.clone(),
                title: link.title.clone(),
                badges: BTreeSet::new(),
            });
    }
}
