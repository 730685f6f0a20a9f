use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::crawlers::ListingSource;
use crate::domain::listing::OperationType;
use crate::models::config::Settings;
use crate::processing::comparison::{ComparisonOutcome, RunComparator};
use crate::processing::deduplication::Deduplicator;
use crate::processing::embedding::{EmbeddingError, TextEmbedder};
use crate::processing::ingestion::{IngestRequest, IngestionCoordinator, IngestionPlan};
use crate::processing::prices::PriceNormalizer;
use crate::processing::reconcile::Reconciler;
use crate::processing::snapshot::import_snapshot;
use crate::repository::errors::RepositoryError;
use crate::repository::{ListingReader, ListingWriter, RunReader, RunWriter};
use crate::vector_store::{VectorStore, VectorStoreError};

pub mod comparison;
pub mod deduplication;
pub mod embedding;
pub mod ingestion;
pub mod prices;
pub mod reconcile;
pub mod snapshot;
pub mod text;

/// Job messages accepted on the queue or as a one-shot argument.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub enum ZMQMessage {
    Ingest(IngestRequest),
    Deduplicate,
    NormalizePrices,
    /// Deduplicate followed by NormalizePrices.
    Clean,
    Reconcile,
    Import(String),
}

/// Failure of a maintenance pass over the stores.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error("document store error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;

/// Everything a job needs, shared across spawned handlers.
pub struct JobContext<R> {
    pub settings: Settings,
    pub repo: R,
    pub source: Arc<dyn ListingSource>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub vectors: Arc<dyn VectorStore>,
}

/// Runs one job and reports whether it succeeded. Failures are logged here.
pub async fn process_message<R>(msg: ZMQMessage, ctx: &JobContext<R>) -> bool
where
    R: ListingReader + ListingWriter + RunReader + RunWriter + Clone,
{
    log::info!("Received job: {msg:?}");

    let ok = match msg {
        ZMQMessage::Ingest(request) => process_ingest_message(request, ctx).await,
        ZMQMessage::Deduplicate => process_deduplicate_message(ctx),
        ZMQMessage::NormalizePrices => process_normalize_prices_message(ctx).await,
        ZMQMessage::Clean => {
            process_deduplicate_message(ctx) && process_normalize_prices_message(ctx).await
        }
        ZMQMessage::Reconcile => process_reconcile_message(ctx).await,
        ZMQMessage::Import(path) => process_import_message(&path, ctx),
    };

    log::info!("Finished job (success={ok})");
    ok
}

/// Scrapes, commits and compares the run against its predecessor.
pub async fn process_ingest_message<R>(request: IngestRequest, ctx: &JobContext<R>) -> bool
where
    R: ListingWriter + RunReader + RunWriter + Clone,
{
    let plan = IngestionPlan::from_settings(&ctx.settings, request);
    let coordinator = IngestionCoordinator::new(
        Arc::clone(&ctx.source),
        Arc::clone(&ctx.embedder),
        Arc::clone(&ctx.vectors),
        ctx.repo.clone(),
    );

    let report = match coordinator.run(&plan).await {
        Ok(report) => report,
        Err(e) => {
            log::error!("Ingestion aborted: {e}");
            return false;
        }
    };
    if !report.is_consistent() {
        log::warn!(
            "Batch {} left {} batches outside one of the stores; run Reconcile to repair",
            report.batch_id,
            report.failed_batches.len()
        );
    }

    match RunComparator::new(ctx.repo.clone()).compare(&report.batch_id, &report.signatures) {
        Ok(ComparisonOutcome::NoBaseline) => true,
        Ok(ComparisonOutcome::Compared {
            baseline_batch_id, ..
        }) => {
            log::info!("Compared batch {} against {baseline_batch_id}", report.batch_id);
            true
        }
        Err(e) => {
            log::error!("Run comparison failed: {e}");
            false
        }
    }
}

pub fn process_deduplicate_message<R>(ctx: &JobContext<R>) -> bool
where
    R: ListingReader + ListingWriter + Clone,
{
    match Deduplicator::new(ctx.repo.clone()).run(&OperationType::ALL) {
        Ok(reports) => {
            let deleted: usize = reports.iter().map(|r| r.deleted).sum();
            log::info!("Deduplication removed {deleted} rows");
            true
        }
        Err(e) => {
            log::error!("Deduplication failed: {e}");
            false
        }
    }
}

pub async fn process_normalize_prices_message<R>(ctx: &JobContext<R>) -> bool
where
    R: ListingReader + ListingWriter + Clone,
{
    let normalizer = PriceNormalizer::new(ctx.repo.clone(), Arc::clone(&ctx.vectors));
    match normalizer.run(&OperationType::ALL).await {
        Ok(reports) => {
            log::info!("Normalized prices in {} categories", reports.len());
            true
        }
        Err(e) => {
            log::error!("Price normalization failed: {e}");
            false
        }
    }
}

pub async fn process_reconcile_message<R>(ctx: &JobContext<R>) -> bool
where
    R: ListingReader + Clone,
{
    let reconciler = Reconciler::new(
        ctx.repo.clone(),
        Arc::clone(&ctx.embedder),
        Arc::clone(&ctx.vectors),
        ctx.settings.ingestion.upsert_batch_size,
    );
    match reconciler.run(&OperationType::ALL).await {
        Ok(reports) => {
            let restored: usize = reports.iter().map(|r| r.restored).sum();
            log::info!("Reconciliation restored {restored} vector points");
            true
        }
        Err(e) => {
            log::error!("Reconciliation failed: {e}");
            false
        }
    }
}

pub fn process_import_message<R>(path: &str, ctx: &JobContext<R>) -> bool
where
    R: ListingWriter,
{
    match import_snapshot(Path::new(path), &ctx.repo) {
        Ok(report) => {
            log::info!(
                "Imported {path}: appended={} skipped={}",
                report.appended,
                report.skipped
            );
            true
        }
        Err(e) => {
            log::error!("Import of {path} failed: {e}");
            false
        }
    }
}
