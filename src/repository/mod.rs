use chrono::{DateTime, Utc};

use crate::db::{DbConnection, DbPool};
use crate::domain::listing::{Listing, OperationType, PropertyType};
use crate::domain::signature::IngestionSignature;
use crate::repository::errors::RepositoryResult;

pub mod errors;
pub mod listing;
pub mod models;
pub mod run;
pub mod schema;

/// A document-store row: the listing plus its storage coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredListing {
    pub row_id: i32,
    pub collection: OperationType,
    pub listing: Listing,
}

/// `(source, web_property_code)` pair identifying a listing at its origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub source: String,
    pub web_property_code: String,
}

/// Minimal projection used to pick the surviving copy of a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateCandidate {
    pub row_id: i32,
    pub scraped_at: Option<DateTime<Utc>>,
}

/// Row of the run history; `signatures` is kept raw so unreadable runs can
/// be told apart from missing ones.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionRun {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub signatures: Option<String>,
}

pub trait ListingReader {
    fn list_listings(&self, collection: OperationType) -> RepositoryResult<Vec<StoredListing>>;
    fn list_property_types(&self, collection: OperationType) -> RepositoryResult<Vec<PropertyType>>;
    /// Every non-missing price stored for a category.
    fn list_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
    ) -> RepositoryResult<Vec<f64>>;
    /// Natural keys held by more than one row of the collection.
    fn find_duplicate_keys(&self, collection: OperationType) -> RepositoryResult<Vec<NaturalKey>>;
    fn list_duplicate_candidates(
        &self,
        collection: OperationType,
        key: &NaturalKey,
    ) -> RepositoryResult<Vec<DuplicateCandidate>>;
}

pub trait ListingWriter {
    /// Writes listings keyed by their deterministic id; existing rows are
    /// overwritten. All-or-nothing per call.
    fn upsert_listings(&self, collection: OperationType, listings: &[Listing])
    -> RepositoryResult<usize>;
    /// Inserts listings as new rows without looking for existing copies.
    fn append_listings(&self, collection: OperationType, listings: &[Listing])
    -> RepositoryResult<usize>;
    fn delete_listings(&self, row_ids: &[i32]) -> RepositoryResult<usize>;
    /// Sets every negative price of the category to zero.
    fn zero_negative_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
    ) -> RepositoryResult<usize>;
    /// Rewrites every price above `ceiling` to `ceiling`.
    fn cap_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
        ceiling: f64,
    ) -> RepositoryResult<usize>;
}

pub trait RunReader {
    /// Completed runs other than `current_batch_id`, newest first.
    fn list_previous_runs(
        &self,
        current_batch_id: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<IngestionRun>>;
}

pub trait RunWriter {
    fn start_run(&self, batch_id: &str, started_at: DateTime<Utc>) -> RepositoryResult<usize>;
    fn complete_run(
        &self,
        batch_id: &str,
        signatures: &[IngestionSignature],
    ) -> RepositoryResult<usize>;
}

/// Diesel-backed repository over the SQLite document store.
#[derive(Clone)]
pub struct DieselRepository {
    pool: DbPool,
}

impl DieselRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> RepositoryResult<DbConnection> {
        Ok(self.pool.get()?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::repository::errors::RepositoryError;

    #[derive(Default)]
    pub(crate) struct FakeState {
        pub(crate) rows: Vec<StoredListing>,
        pub(crate) next_row_id: i32,
        pub(crate) runs: Vec<IngestionRun>,
        pub(crate) fail_upserts: bool,
    }

    /// In-memory document store mirroring the diesel repository semantics.
    #[derive(Default)]
    pub(crate) struct FakeRepository {
        pub(crate) state: Mutex<FakeState>,
    }

    impl FakeRepository {
        pub(crate) fn failing_upserts() -> Self {
            let repo = Self::default();
            repo.state.lock().expect("state mutex poisoned").fail_upserts = true;
            repo
        }

        pub(crate) fn rows(&self) -> Vec<StoredListing> {
            self.state.lock().expect("state mutex poisoned").rows.clone()
        }

        pub(crate) fn push_run(&self, run: IngestionRun) {
            self.state.lock().expect("state mutex poisoned").runs.push(run);
        }

        fn push_row(state: &mut FakeState, collection: OperationType, listing: &Listing) {
            state.next_row_id += 1;
            let row_id = state.next_row_id;
            state.rows.push(StoredListing {
                row_id,
                collection,
                listing: listing.clone(),
            });
        }
    }

    fn in_category(row: &StoredListing, collection: OperationType, kind: PropertyType) -> bool {
        row.collection == collection && row.listing.property_type == Some(kind)
    }

    impl ListingReader for FakeRepository {
        fn list_listings(&self, collection: OperationType) -> RepositoryResult<Vec<StoredListing>> {
            Ok(self
                .rows()
                .into_iter()
                .filter(|row| row.collection == collection)
                .collect())
        }

        fn list_property_types(
            &self,
            collection: OperationType,
        ) -> RepositoryResult<Vec<PropertyType>> {
            let mut kinds: Vec<PropertyType> = self
                .list_listings(collection)?
                .into_iter()
                .filter_map(|row| row.listing.property_type)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            kinds.sort();
            Ok(kinds)
        }

        fn list_prices(
            &self,
            collection: OperationType,
            property_type: PropertyType,
        ) -> RepositoryResult<Vec<f64>> {
            Ok(self
                .rows()
                .into_iter()
                .filter(|row| in_category(row, collection, property_type))
                .filter_map(|row| row.listing.price)
                .collect())
        }

        fn find_duplicate_keys(
            &self,
            collection: OperationType,
        ) -> RepositoryResult<Vec<NaturalKey>> {
            let mut counts: std::collections::BTreeMap<NaturalKey, usize> = Default::default();
            for row in self.list_listings(collection)? {
                let key = NaturalKey {
                    source: row.listing.source,
                    web_property_code: row.listing.web_property_code,
                };
                *counts.entry(key).or_default() += 1;
            }
            Ok(counts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(key, _)| key)
                .collect())
        }

        fn list_duplicate_candidates(
            &self,
            collection: OperationType,
            key: &NaturalKey,
        ) -> RepositoryResult<Vec<DuplicateCandidate>> {
            Ok(self
                .list_listings(collection)?
                .into_iter()
                .filter(|row| {
                    row.listing.source == key.source
                        && row.listing.web_property_code == key.web_property_code
                })
                .map(|row| DuplicateCandidate {
                    row_id: row.row_id,
                    scraped_at: row.listing.scraped_at,
                })
                .collect())
        }
    }

    impl ListingWriter for FakeRepository {
        fn upsert_listings(
            &self,
            collection: OperationType,
            listings: &[Listing],
        ) -> RepositoryResult<usize> {
            let mut state = self.state.lock().expect("state mutex poisoned");
            if state.fail_upserts {
                return Err(RepositoryError::Unexpected("injected upsert failure".to_string()));
            }
            for listing in listings {
                let mut found = false;
                for row in state
                    .rows
                    .iter_mut()
                    .filter(|row| row.collection == collection && row.listing.id == listing.id)
                {
                    row.listing = listing.clone();
                    found = true;
                }
                if !found {
                    Self::push_row(&mut state, collection, listing);
                }
            }
            Ok(listings.len())
        }

        fn append_listings(
            &self,
            collection: OperationType,
            listings: &[Listing],
        ) -> RepositoryResult<usize> {
            let mut state = self.state.lock().expect("state mutex poisoned");
            for listing in listings {
                Self::push_row(&mut state, collection, listing);
            }
            Ok(listings.len())
        }

        fn delete_listings(&self, row_ids: &[i32]) -> RepositoryResult<usize> {
            let mut state = self.state.lock().expect("state mutex poisoned");
            let before = state.rows.len();
            state.rows.retain(|row| !row_ids.contains(&row.row_id));
            Ok(before - state.rows.len())
        }

        fn zero_negative_prices(
            &self,
            collection: OperationType,
            property_type: PropertyType,
        ) -> RepositoryResult<usize> {
            let mut state = self.state.lock().expect("state mutex poisoned");
            let mut affected = 0;
            for row in state.rows.iter_mut() {
                if in_category(row, collection, property_type)
                    && row.listing.price.is_some_and(|price| price < 0.0)
                {
                    row.listing.price = Some(0.0);
                    affected += 1;
                }
            }
            Ok(affected)
        }

        fn cap_prices(
            &self,
            collection: OperationType,
            property_type: PropertyType,
            ceiling: f64,
        ) -> RepositoryResult<usize> {
            let mut state = self.state.lock().expect("state mutex poisoned");
            let mut affected = 0;
            for row in state.rows.iter_mut() {
                if in_category(row, collection, property_type)
                    && row.listing.price.is_some_and(|price| price > ceiling)
                {
                    row.listing.price = Some(ceiling);
                    affected += 1;
                }
            }
            Ok(affected)
        }
    }

    impl RunReader for FakeRepository {
        fn list_previous_runs(
            &self,
            current_batch_id: &str,
            limit: usize,
        ) -> RepositoryResult<Vec<IngestionRun>> {
            let state = self.state.lock().expect("state mutex poisoned");
            let mut runs: Vec<IngestionRun> = state
                .runs
                .iter()
                .filter(|run| run.completed_at.is_some() && run.batch_id != current_batch_id)
                .cloned()
                .collect();
            runs.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
            runs.truncate(limit);
            Ok(runs)
        }
    }

    impl RunWriter for FakeRepository {
        fn start_run(&self, batch_id: &str, started_at: DateTime<Utc>) -> RepositoryResult<usize> {
            let mut state = self.state.lock().expect("state mutex poisoned");
            if state.runs.iter().any(|run| run.batch_id == batch_id) {
                return Err(RepositoryError::Unexpected(format!(
                    "UNIQUE constraint failed: ingestion_runs.batch_id ({batch_id})"
                )));
            }
            state.runs.push(IngestionRun {
                batch_id: batch_id.to_string(),
                started_at,
                completed_at: None,
                signatures: None,
            });
            Ok(1)
        }

        fn complete_run(
            &self,
            batch_id: &str,
            signatures: &[IngestionSignature],
        ) -> RepositoryResult<usize> {
            let encoded = serde_json::to_string(signatures)?;
            let mut state = self.state.lock().expect("state mutex poisoned");
            let mut affected = 0;
            for run in state.runs.iter_mut().filter(|run| run.batch_id == batch_id) {
                run.completed_at = Some(Utc::now());
                run.signatures = Some(encoded.clone());
                affected += 1;
            }
            Ok(affected)
        }
    }
}
