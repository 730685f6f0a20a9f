//! Fetch, embed and commit one ingestion run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future;
use serde::Deserialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::crawlers::{CrawlerError, ListingSource, Location, PageOutcome, PageRequest, page_count};
use crate::domain::listing::{Listing, OperationType, PropertyType};
use crate::domain::signature::IngestionSignature;
use crate::models::config::Settings;
use crate::processing::embedding::{EmbeddingError, TextEmbedder};
use crate::processing::snapshot::write_snapshot;
use crate::processing::text::normalize_text;
use crate::repository::errors::RepositoryError;
use crate::repository::{ListingWriter, RunWriter};
use crate::vector_store::{EmbeddedListing, VectorStore, VectorStoreError};

/// Timestamp prefix of the identifier shared by every listing of one run.
pub const BATCH_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `<started_at>_<8 hex chars>`. The random suffix keeps runs started in the
/// same second apart in the run history.
pub fn new_batch_id(started_at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", started_at.format(BATCH_ID_FORMAT), &suffix[..8])
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("location lookup failed: {0}")]
    Location(#[source] CrawlerError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("run history write failed: {0}")]
    Repository(#[from] RepositoryError),
    #[error("vector store unavailable: {0}")]
    VectorStore(#[from] VectorStoreError),
}

pub type IngestionResult<T> = Result<T, IngestionError>;

/// Optional overrides carried by an `Ingest` job message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub operations: Option<Vec<OperationType>>,
    #[serde(default)]
    pub property_types: Option<Vec<PropertyType>>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Knobs of a single run after merging settings and request overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionPlan {
    pub location: String,
    pub operations: Vec<OperationType>,
    pub property_types: Vec<PropertyType>,
    pub page_size: u32,
    pub concurrency: usize,
    pub upsert_batch_size: usize,
    pub snapshot_dir: Option<PathBuf>,
}

impl IngestionPlan {
    pub fn from_settings(settings: &Settings, request: IngestRequest) -> Self {
        Self {
            location: request
                .location
                .unwrap_or_else(|| settings.source.location.clone()),
            operations: request
                .operations
                .unwrap_or_else(|| settings.ingestion.operations.clone()),
            property_types: request
                .property_types
                .unwrap_or_else(|| settings.ingestion.property_types.clone()),
            page_size: settings.source.page_size,
            concurrency: settings.source.concurrency,
            upsert_batch_size: settings.ingestion.upsert_batch_size,
            snapshot_dir: settings.ingestion.snapshot_dir.clone(),
        }
    }
}

/// Which store rejected a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Document,
    Vector,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Document => f.write_str("document store"),
            Self::Vector => f.write_str("vector store"),
        }
    }
}

/// An upsert batch that did not reach every store.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub operation: OperationType,
    pub batch_index: usize,
    pub store: StoreKind,
    pub size: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionReport {
    pub batch_id: String,
    pub signatures: Vec<IngestionSignature>,
    pub documents_written: usize,
    pub points_written: usize,
    pub failed_batches: Vec<BatchFailure>,
}

impl IngestionReport {
    fn new(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            signatures: Vec::new(),
            documents_written: 0,
            points_written: 0,
            failed_batches: Vec::new(),
        }
    }

    /// True when every batch reached both stores.
    pub fn is_consistent(&self) -> bool {
        self.failed_batches.is_empty()
    }
}

/// Drives a run: location, pages, embedding, dual-store commit, signatures.
pub struct IngestionCoordinator<R> {
    source: Arc<dyn ListingSource>,
    embedder: Arc<dyn TextEmbedder>,
    vectors: Arc<dyn VectorStore>,
    repo: R,
}

impl<R> IngestionCoordinator<R>
where
    R: ListingWriter + RunWriter,
{
    pub fn new(
        source: Arc<dyn ListingSource>,
        embedder: Arc<dyn TextEmbedder>,
        vectors: Arc<dyn VectorStore>,
        repo: R,
    ) -> Self {
        Self {
            source,
            embedder,
            vectors,
            repo,
        }
    }

    /// Runs one ingestion. Page failures degrade the signatures; only an
    /// unresolvable location, an unusable vector collection, the run history
    /// or the embedder abort the run.
    pub async fn run(&self, plan: &IngestionPlan) -> IngestionResult<IngestionReport> {
        let started_at = Utc::now();
        let batch_id = new_batch_id(started_at);

        let location = self
            .source
            .resolve_location(&plan.location)
            .await
            .map_err(IngestionError::Location)?;
        log::info!(
            "Starting ingestion batch_id={batch_id} location={} ({})",
            location.canonical_name,
            location.id
        );

        self.repo.start_run(&batch_id, started_at)?;

        let mut report = IngestionReport::new(&batch_id);
        let mut snapshot: Vec<(OperationType, Listing)> = Vec::new();

        for &operation in &plan.operations {
            self.vectors
                .ensure_collection(operation, self.embedder.dimensions())
                .await?;

            let mut fetched = Vec::new();
            for &property_type in &plan.property_types {
                let (listings, signature) = self
                    .ingest_slice(plan, operation, property_type, &location, &batch_id, started_at)
                    .await;
                report.signatures.push(signature);
                fetched.extend(listings);
            }

            let listings = unique_by_id(fetched);
            log::info!(
                "Fetched operation={operation} unique_listings={}",
                listings.len()
            );
            if plan.snapshot_dir.is_some() {
                snapshot.extend(listings.iter().cloned().map(|listing| (operation, listing)));
            }

            let embedded = self.embed(listings).await?;
            self.commit(operation, &embedded, plan.upsert_batch_size, &mut report)
                .await;
        }

        self.repo.complete_run(&batch_id, &report.signatures)?;

        if let Some(dir) = &plan.snapshot_dir {
            match write_snapshot(dir, &batch_id, &snapshot) {
                Ok(path) => log::info!("Wrote raw snapshot to {}", path.display()),
                Err(e) => log::warn!("Failed to write raw snapshot: {e}"),
            }
        }

        log::info!(
            "Finished ingestion batch_id={batch_id} documents={} points={} failed_batches={}",
            report.documents_written,
            report.points_written,
            report.failed_batches.len()
        );
        Ok(report)
    }

    async fn ingest_slice(
        &self,
        plan: &IngestionPlan,
        operation: OperationType,
        property_type: PropertyType,
        location: &Location,
        batch_id: &str,
        scraped_at: DateTime<Utc>,
    ) -> (Vec<Listing>, IngestionSignature) {
        let total_hits = match self
            .source
            .total_hits(property_type, operation, location)
            .await
        {
            Ok(total) => total,
            Err(e) => {
                log::error!("Failed to plan pages for {operation}/{property_type}: {e}");
                let signature =
                    IngestionSignature::from_counts(batch_id, operation, property_type, 0, 1, &[]);
                return (Vec::new(), signature);
            }
        };
        let pages = page_count(total_hits, plan.page_size);
        log::info!(
            "Operation={operation} property_type={property_type} total_hits={total_hits} pages={pages}"
        );

        let semaphore = Semaphore::new(plan.concurrency.max(1));
        let tasks = (1..=pages).map(|page_number| {
            let semaphore = &semaphore;
            let request = PageRequest {
                page_size: plan.page_size,
                page_number,
                property_type,
                operation,
            };
            async move {
                let _permit = semaphore.acquire().await;
                PageOutcome::from_result(
                    page_number,
                    self.source.fetch_page(request, location).await,
                )
            }
        });
        let outcomes = future::join_all(tasks).await;

        let mut listings = Vec::new();
        let mut pages_success = 0;
        let mut pages_failed = 0;
        for outcome in outcomes {
            match outcome {
                PageOutcome::Fetched { listings: page, .. } => {
                    pages_success += 1;
                    listings.extend(page);
                }
                PageOutcome::Failed { page, reason } => {
                    pages_failed += 1;
                    log::warn!("Page {page} of {operation}/{property_type} failed: {reason}");
                }
            }
        }

        for listing in listings.iter_mut() {
            listing.attach_batch(batch_id, scraped_at);
        }

        let prices: Vec<Option<f64>> = listings.iter().map(|listing| listing.price).collect();
        let signature = IngestionSignature::from_counts(
            batch_id,
            operation,
            property_type,
            pages_success,
            pages_failed,
            &prices,
        );
        log::info!(
            "Slice {operation}/{property_type}: pages_success={pages_success} pages_failed={pages_failed} rows={}",
            signature.row_count
        );

        (listings, signature)
    }

    async fn embed(&self, listings: Vec<Listing>) -> IngestionResult<Vec<EmbeddedListing>> {
        let texts: Vec<String> = listings
            .iter()
            .map(|listing| normalize_text(&listing.description))
            .collect();
        let vectors = self.embedder.embed(texts).await?;

        if vectors.len() != listings.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: listings.len(),
                actual: vectors.len(),
            }
            .into());
        }

        Ok(listings
            .into_iter()
            .zip(vectors)
            .map(|(listing, vector)| EmbeddedListing { listing, vector })
            .collect())
    }

    /// Writes batches to the document store, then the vector store. A batch
    /// the document store rejects never reaches the vector store.
    async fn commit(
        &self,
        operation: OperationType,
        embedded: &[EmbeddedListing],
        batch_size: usize,
        report: &mut IngestionReport,
    ) {
        for (batch_index, batch) in embedded.chunks(batch_size.max(1)).enumerate() {
            let listings: Vec<Listing> = batch.iter().map(|e| e.listing.clone()).collect();

            match self.repo.upsert_listings(operation, &listings) {
                Ok(written) => report.documents_written += written,
                Err(e) => {
                    log::error!(
                        "{} rejected {operation} batch {batch_index} ({} listings): {e}",
                        StoreKind::Document,
                        batch.len()
                    );
                    report.failed_batches.push(BatchFailure {
                        operation,
                        batch_index,
                        store: StoreKind::Document,
                        size: batch.len(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            }

            match self.vectors.upsert(operation, batch).await {
                Ok(written) => report.points_written += written,
                Err(e) => {
                    log::error!(
                        "{} rejected {operation} batch {batch_index} ({} listings): {e}",
                        StoreKind::Vector,
                        batch.len()
                    );
                    report.failed_batches.push(BatchFailure {
                        operation,
                        batch_index,
                        store: StoreKind::Vector,
                        size: batch.len(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Keeps one listing per id, the last one seen, in first-seen order.
fn unique_by_id(listings: Vec<Listing>) -> Vec<Listing> {
    let mut positions = HashMap::new();
    let mut unique: Vec<Listing> = Vec::with_capacity(listings.len());
    for listing in listings {
        match positions.get(&listing.id) {
            Some(&index) => unique[index] = listing,
            None => {
                positions.insert(listing.id, unique.len());
                unique.push(listing);
            }
        }
    }
    unique
}
