use crate::domain::listing::OperationType;
use crate::processing::MaintenanceResult;
use crate::repository::{DuplicateCandidate, ListingReader, ListingWriter};

/// Outcome of a deduplication pass over one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeduplicationReport {
    pub collection: OperationType,
    pub groups_processed: usize,
    pub deleted: usize,
}

/// Row that survives a duplicate group: the newest `scraped_at`, then the
/// highest row id. Rows without a timestamp lose to any timestamped row.
pub fn select_survivor(candidates: &[DuplicateCandidate]) -> Option<i32> {
    candidates
        .iter()
        .max_by_key(|candidate| (candidate.scraped_at, candidate.row_id))
        .map(|candidate| candidate.row_id)
}

/// Collapses natural-key duplicates in the document store. The vector store
/// is keyed by the derived id and cannot hold such duplicates.
pub struct Deduplicator<R> {
    repo: R,
}

impl<R> Deduplicator<R>
where
    R: ListingReader + ListingWriter,
{
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn run(
        &self,
        collections: &[OperationType],
    ) -> MaintenanceResult<Vec<DeduplicationReport>> {
        collections
            .iter()
            .map(|&collection| self.deduplicate(collection))
            .collect()
    }

    pub fn deduplicate(&self, collection: OperationType) -> MaintenanceResult<DeduplicationReport> {
        let keys = self.repo.find_duplicate_keys(collection)?;
        let mut report = DeduplicationReport {
            collection,
            groups_processed: 0,
            deleted: 0,
        };

        for key in keys {
            let candidates = self.repo.list_duplicate_candidates(collection, &key)?;
            let Some(survivor) = select_survivor(&candidates) else {
                continue;
            };
            let doomed: Vec<i32> = candidates
                .iter()
                .map(|candidate| candidate.row_id)
                .filter(|row_id| *row_id != survivor)
                .collect();

            report.deleted += self.repo.delete_listings(&doomed)?;
            report.groups_processed += 1;
            log::debug!(
                "Kept row {survivor} for {}:{} in {collection}, removed {}",
                key.source,
                key.web_property_code,
                doomed.len()
            );
        }

        log::info!(
            "Deduplicated {collection}: groups_processed={} deleted={}",
            report.groups_processed,
            report.deleted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::domain::listing::{FINCA_RAIZ_SOURCE, Listing};
    use crate::repository::tests::FakeRepository;

    fn candidate(row_id: i32, hours: Option<i64>) -> DuplicateCandidate {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        DuplicateCandidate {
            row_id,
            scraped_at: hours.map(|h| base + Duration::hours(h)),
        }
    }

    fn scraped(code: &str, hours: i64, price: f64) -> Listing {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut listing = Listing::new(FINCA_RAIZ_SOURCE, code);
        listing.price = Some(price);
        listing.attach_batch("batch", base + Duration::hours(hours));
        listing
    }

    #[test]
    fn newest_copy_survives() {
        let group = [candidate(1, Some(5)), candidate(2, Some(9)), candidate(3, Some(1))];

        assert_eq!(select_survivor(&group), Some(2));
    }

    #[test]
    fn ties_and_missing_timestamps_are_deterministic() {
        assert_eq!(select_survivor(&[candidate(4, Some(1)), candidate(7, Some(1))]), Some(7));
        assert_eq!(select_survivor(&[candidate(9, None), candidate(2, Some(0))]), Some(2));
        assert_eq!(select_survivor(&[]), None);
    }

    #[test]
    fn pass_keeps_one_row_per_natural_key() {
        let repo = FakeRepository::default();
        repo.append_listings(
            OperationType::Venta,
            &[
                scraped("100", 1, 10.0),
                scraped("100", 3, 30.0),
                scraped("200", 1, 5.0),
                scraped("100", 2, 20.0),
            ],
        )
        .expect("seed");
        // Same key in another collection is not a duplicate.
        repo.append_listings(OperationType::Arriendo, &[scraped("100", 0, 1.0)])
            .expect("seed");
        let deduplicator = Deduplicator::new(repo);

        let report = deduplicator
            .deduplicate(OperationType::Venta)
            .expect("pass runs");

        assert_eq!(report.groups_processed, 1);
        assert_eq!(report.deleted, 2);
        let venta: Vec<_> = deduplicator
            .repo
            .rows()
            .into_iter()
            .filter(|row| row.collection == OperationType::Venta)
            .collect();
        assert_eq!(venta.len(), 2);
        let kept = venta
            .iter()
            .find(|row| row.listing.web_property_code == "100")
            .expect("survivor");
        assert_eq!(kept.listing.price, Some(30.0));
        assert_eq!(deduplicator.repo.rows().len(), 3);
    }

    #[test]
    fn second_pass_deletes_nothing() {
        let repo = FakeRepository::default();
        repo.append_listings(
            OperationType::Arriendo,
            &[scraped("1", 1, 1.0), scraped("1", 2, 2.0)],
        )
        .expect("seed");
        let deduplicator = Deduplicator::new(repo);

        deduplicator.run(&OperationType::ALL).expect("first pass");
        let reports = deduplicator.run(&OperationType::ALL).expect("second pass");

        assert!(reports.iter().all(|report| report.deleted == 0));
        assert!(reports.iter().all(|report| report.groups_processed == 0));
    }
}
