//! Entity import core: copy entities from a remote Wikibase-style repository
//! into a local one.
//!
//! Remote ids are mapped to local ids through a durable mapping store. Every
//! entity id embedded in an imported statement is translated through that
//! mapping; ids that cannot be translated yet are kept and completed by a
//! later import. The SQLite store layer backs the mapping, the local entities
//! and the statement counts, and the HTTP lookup reads `wbgetentities`.

pub mod config;
pub mod errors;
pub mod guards;
pub mod importer;
pub mod models;
pub mod store;

pub use config::ImporterConfig;
pub use errors::{ImportError, ImportResult};
pub use importer::batch::{BatchFailure, BatchReport};
pub use importer::entity::{
    CancellationToken, EntityImporter, ImportStage, ImportSummary, ImportedEntity, StageFailure,
};
pub use models::{Entity, EntityId, EntityKind, LocalEntityId, RawEntity, RemoteEntityId, Statement};
