//! Error types for the entity import core.

use crate::models::{LocalEntityId, RemoteEntityId};

/// Top-level error enum for the entity import core.
///
/// The first block of variants is the import taxonomy surfaced to batch
/// callers; the rest are ambient failures from the store and configuration
/// layers.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Remote entity {remote_id} not found")]
    NotFound { remote_id: RemoteEntityId },

    #[error("Transient failure fetching {remote_id}: {message}")]
    TransientFetch {
        remote_id: RemoteEntityId,
        message: String,
    },

    #[error("Malformed response for {remote_id} (payload {payload_ref}): {message}")]
    MalformedResponse {
        remote_id: RemoteEntityId,
        payload_ref: String,
        message: String,
    },

    #[error("Remote entity {remote_id} is already mapped to {existing}, not {attempted}")]
    DuplicateMapping {
        remote_id: RemoteEntityId,
        existing: LocalEntityId,
        attempted: LocalEntityId,
    },

    #[error("No local counterpart for {remote_id}")]
    TranslationGap { remote_id: RemoteEntityId },

    #[error("Local store rejected save of {entity}: {message}")]
    PersistenceConflict { entity: String, message: String },

    #[error("Mapping for {remote_id} points at missing local entity {local_id}")]
    MissingLocalEntity {
        remote_id: RemoteEntityId,
        local_id: LocalEntityId,
    },

    #[error("Import of {remote_id} cancelled before stage {stage}")]
    Cancelled {
        remote_id: RemoteEntityId,
        stage: String,
    },

    #[error("Traversal limit exceeded: {0}")]
    TraversalLimit(String),

    #[error("Invalid entity id: {0}")]
    InvalidId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImportError {
    /// Whether retrying the whole import of the entity may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ImportError::TransientFetch { .. } | ImportError::PersistenceConflict { .. } => true,
            ImportError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Failures of the backing store rather than of the data being imported.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ImportError::Sqlite(_) | ImportError::Database(_) | ImportError::Io(_)
        )
    }

    /// Stable snake_case name used in log fields and diagnostics rows.
    pub fn category(&self) -> &'static str {
        match self {
            ImportError::NotFound { .. } => "not_found",
            ImportError::TransientFetch { .. } => "transient_fetch",
            ImportError::MalformedResponse { .. } => "malformed_response",
            ImportError::DuplicateMapping { .. } => "duplicate_mapping",
            ImportError::TranslationGap { .. } => "translation_gap",
            ImportError::PersistenceConflict { .. } => "persistence_conflict",
            ImportError::MissingLocalEntity { .. } => "missing_local_entity",
            ImportError::Cancelled { .. } => "cancelled",
            ImportError::TraversalLimit(_) => "traversal_limit",
            ImportError::InvalidId(_) => "invalid_id",
            ImportError::Config(_) => "config",
            ImportError::Database(_) | ImportError::Sqlite(_) => "database",
            ImportError::Io(_) => "io",
            ImportError::Json(_) => "json",
        }
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
