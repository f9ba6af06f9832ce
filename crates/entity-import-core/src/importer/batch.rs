//! Import many remote ids on a bounded worker pool.

use std::time::Instant;

use indexmap::IndexSet;
use rayon::prelude::*;
use tracing::info;

use crate::errors::ImportError;
use crate::importer::entity::{
    CancellationToken, EntityImporter, ImportStage, ImportedEntity, StageFailure,
};
use crate::models::RemoteEntityId;

#[derive(Debug)]
pub struct BatchFailure {
    pub remote_id: RemoteEntityId,
    /// Last stage the import completed before failing.
    pub stage: ImportStage,
    pub error: ImportError,
}

impl From<StageFailure> for BatchFailure {
    fn from(failure: StageFailure) -> Self {
        Self {
            remote_id: failure.remote_id,
            stage: failure.stage,
            error: failure.error,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub imported: Vec<ImportedEntity>,
    pub failed: Vec<BatchFailure>,
    /// Ids skipped or stopped because the batch was cancelled.
    pub cancelled: Vec<RemoteEntityId>,
    pub elapsed_ms: u128,
}

impl BatchReport {
    pub fn retryable(&self) -> impl Iterator<Item = &RemoteEntityId> {
        self.failed
            .iter()
            .filter(|f| f.error.is_retryable())
            .map(|f| &f.remote_id)
    }
}

enum Outcome {
    Imported(Box<ImportedEntity>),
    Failed(BatchFailure),
    Cancelled(RemoteEntityId),
}

impl EntityImporter {
    /// Import every id in `remote_ids` once, on `config.workers` threads.
    /// Results keep the order of first appearance. A failing id never stops
    /// the others; cancelling stops ids that have not persisted yet.
    pub fn import_batch(
        &self,
        remote_ids: &[RemoteEntityId],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let started = Instant::now();
        let unique: Vec<RemoteEntityId> = remote_ids
            .iter()
            .copied()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return BatchReport::default();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config().workers.max(1))
            .build();

        let outcomes: Vec<Outcome> = match pool {
            Ok(pool) => pool.install(|| {
                unique
                    .par_iter()
                    .map(|id| self.batch_worker(id, cancel))
                    .collect()
            }),
            Err(_) => {
                // Fallback to sequential
                unique
                    .iter()
                    .map(|id| self.batch_worker(id, cancel))
                    .collect()
            }
        };

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Imported(entity) => report.imported.push(*entity),
                Outcome::Failed(failure) => report.failed.push(failure),
                Outcome::Cancelled(id) => report.cancelled.push(id),
            }
        }
        report.elapsed_ms = started.elapsed().as_millis();

        info!(
            requested = remote_ids.len(),
            unique = unique.len(),
            imported = report.imported.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            elapsed_ms = report.elapsed_ms as u64,
            "batch import finished"
        );
        report
    }

    fn batch_worker(&self, remote_id: &RemoteEntityId, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled(*remote_id);
        }
        match self.import_entity_with(remote_id, cancel) {
            Ok(imported) => Outcome::Imported(Box::new(imported)),
            Err(failure) if matches!(failure.error, ImportError::Cancelled { .. }) => {
                Outcome::Cancelled(*remote_id)
            }
            Err(failure) => Outcome::Failed(failure.into()),
        }
    }
}
