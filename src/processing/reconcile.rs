use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::listing::{Listing, OperationType};
use crate::processing::embedding::{EmbeddingError, TextEmbedder};
use crate::processing::text::normalize_text;
use crate::processing::MaintenanceResult;
use crate::repository::ListingReader;
use crate::vector_store::{EmbeddedListing, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub collection: OperationType,
    pub missing: usize,
    pub restored: usize,
}

/// Re-embeds documents whose vector point is missing, repairing batches a
/// previous run failed to write to the vector store.
pub struct Reconciler<R> {
    repo: R,
    embedder: Arc<dyn TextEmbedder>,
    vectors: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl<R> Reconciler<R>
where
    R: ListingReader,
{
    pub fn new(
        repo: R,
        embedder: Arc<dyn TextEmbedder>,
        vectors: Arc<dyn VectorStore>,
        batch_size: usize,
    ) -> Self {
        Self {
            repo,
            embedder,
            vectors,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(
        &self,
        collections: &[OperationType],
    ) -> MaintenanceResult<Vec<ReconcileReport>> {
        let mut reports = Vec::with_capacity(collections.len());
        for &collection in collections {
            reports.push(self.reconcile(collection).await?);
        }
        Ok(reports)
    }

    pub async fn reconcile(&self, collection: OperationType) -> MaintenanceResult<ReconcileReport> {
        self.vectors
            .ensure_collection(collection, self.embedder.dimensions())
            .await?;

        let present = self.vectors.list_ids(collection).await?;

        // Natural-key duplicates share an id; the newest row wins.
        let mut missing: HashMap<_, (i32, Listing)> = HashMap::new();
        for row in self.repo.list_listings(collection)? {
            if present.contains(&row.listing.id) {
                continue;
            }
            let keep = missing
                .get(&row.listing.id)
                .is_none_or(|(row_id, _)| *row_id < row.row_id);
            if keep {
                missing.insert(row.listing.id, (row.row_id, row.listing));
            }
        }
        let mut listings: Vec<(i32, Listing)> = missing.into_values().collect();
        listings.sort_by_key(|(row_id, _)| *row_id);
        let listings: Vec<Listing> = listings.into_iter().map(|(_, listing)| listing).collect();

        let mut report = ReconcileReport {
            collection,
            missing: listings.len(),
            restored: 0,
        };
        if listings.is_empty() {
            log::info!("Stores agree on {collection}, nothing to reconcile");
            return Ok(report);
        }
        log::warn!("{} documents in {collection} have no vector point", listings.len());

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

        let embedded: Vec<EmbeddedListing> = listings
            .into_iter()
            .zip(vectors)
            .map(|(listing, vector)| EmbeddedListing { listing, vector })
            .collect();
        for batch in embedded.chunks(self.batch_size) {
            report.restored += self.vectors.upsert(collection, batch).await?;
        }

        log::info!(
            "Reconciled {collection}: missing={} restored={}",
            report.missing,
            report.restored
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::listing::FINCA_RAIZ_SOURCE;
    use crate::processing::embedding::tests::FakeEmbedder;
    use crate::repository::ListingWriter;
    use crate::repository::tests::FakeRepository;
    use crate::vector_store::tests::FakeVectorStore;

    fn listing(code: &str, description: &str) -> Listing {
        let mut listing = Listing::new(FINCA_RAIZ_SOURCE, code);
        listing.description = description.to_string();
        listing
    }

    #[tokio::test]
    async fn missing_points_are_re_embedded() {
        let repo = FakeRepository::default();
        let stored = vec![
            listing("1", "uno"),
            listing("2", "dos\u{00A0}\n tres"),
            listing("3", ""),
        ];
        repo.upsert_listings(OperationType::Arriendo, &stored)
            .expect("seed documents");
        let vectors = Arc::new(FakeVectorStore::default());
        vectors
            .upsert(
                OperationType::Arriendo,
                &[EmbeddedListing {
                    listing: stored[0].clone(),
                    vector: vec![3.0, 1.0, 0.0],
                }],
            )
            .await
            .expect("seed vectors");
        let embedder = Arc::new(FakeEmbedder::default());
        let reconciler = Reconciler::new(repo, embedder.clone(), vectors.clone(), 200);

        let report = reconciler
            .reconcile(OperationType::Arriendo)
            .await
            .expect("reconcile runs");

        assert_eq!(report.missing, 2);
        assert_eq!(report.restored, 2);
        assert_eq!(vectors.len(), 3);
        assert_eq!(*embedder.calls.lock().unwrap(), vec![2]);
        let points = vectors.points.lock().unwrap();
        // "dos tres" after normalization.
        assert_eq!(points[&(OperationType::Arriendo, stored[1].id)].vector[0], 8.0);
    }

    #[tokio::test]
    async fn consistent_stores_need_no_embedding() {
        let repo = FakeRepository::default();
        let embedder = Arc::new(FakeEmbedder::default());
        let reconciler = Reconciler::new(
            repo,
            embedder.clone(),
            Arc::new(FakeVectorStore::default()),
            200,
        );

        let reports = reconciler.run(&OperationType::ALL).await.expect("reconcile runs");

        assert!(reports.iter().all(|report| report.missing == 0));
        assert!(embedder.calls.lock().unwrap().is_empty());
    }
}
