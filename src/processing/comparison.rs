//! Run-over-run comparison of ingestion signatures.

use std::collections::BTreeMap;

use crate::domain::listing::{OperationType, PropertyType};
use crate::domain::signature::IngestionSignature;
use crate::repository::errors::RepositoryError;
use crate::repository::{IngestionRun, RunReader};

/// How many previous runs are tried before an unreadable history is fatal.
pub const MAX_BASELINE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ComparisonError {
    #[error("failed to load run history: {0}")]
    Repository(#[from] RepositoryError),
    #[error("no readable baseline among the last {attempts} runs (newest: {newest})")]
    UnreadableBaseline { attempts: usize, newest: String },
}

pub type ComparisonResult<T> = Result<T, ComparisonError>;

/// One `(operation, property_type)` row of the outer join.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureDelta {
    pub operation: OperationType,
    pub property_type: PropertyType,
    pub current: Option<IngestionSignature>,
    pub previous: Option<IngestionSignature>,
}

impl SignatureDelta {
    fn both(&self) -> Option<(&IngestionSignature, &IngestionSignature)> {
        self.current.as_ref().zip(self.previous.as_ref())
    }

    pub fn pages_success_delta(&self) -> Option<i64> {
        self.both()
            .map(|(cur, prev)| i64::from(cur.pages_success) - i64::from(prev.pages_success))
    }

    pub fn pages_failed_delta(&self) -> Option<i64> {
        self.both()
            .map(|(cur, prev)| i64::from(cur.pages_failed) - i64::from(prev.pages_failed))
    }

    pub fn row_count_delta(&self) -> Option<i64> {
        self.both().map(|(cur, prev)| {
            i64::try_from(cur.row_count).unwrap_or(i64::MAX)
                - i64::try_from(prev.row_count).unwrap_or(i64::MAX)
        })
    }

    pub fn mean_price_delta(&self) -> Option<f64> {
        self.both()
            .and_then(|(cur, prev)| Some(cur.mean_price? - prev.mean_price?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonOutcome {
    /// No earlier completed run exists.
    NoBaseline,
    Compared {
        baseline_batch_id: String,
        deltas: Vec<SignatureDelta>,
    },
}

/// Outer-joins two signature sets on `(operation, property_type)`.
pub fn diff(
    current: &[IngestionSignature],
    previous: &[IngestionSignature],
) -> Vec<SignatureDelta> {
    let mut rows: BTreeMap<(OperationType, PropertyType), SignatureDelta> = BTreeMap::new();
    for signature in current {
        rows.entry((signature.operation, signature.property_type))
            .or_insert_with(|| empty_delta(signature))
            .current = Some(signature.clone());
    }
    for signature in previous {
        rows.entry((signature.operation, signature.property_type))
            .or_insert_with(|| empty_delta(signature))
            .previous = Some(signature.clone());
    }

    rows.into_values().collect()
}

fn empty_delta(signature: &IngestionSignature) -> SignatureDelta {
    SignatureDelta {
        operation: signature.operation,
        property_type: signature.property_type,
        current: None,
        previous: None,
    }
}

fn decode(run: &IngestionRun) -> Option<Vec<IngestionSignature>> {
    let raw = run.signatures.as_deref()?;
    match serde_json::from_str(raw) {
        Ok(signatures) => Some(signatures),
        Err(e) => {
            log::warn!("Run {} has unreadable signatures: {e}", run.batch_id);
            None
        }
    }
}

pub struct RunComparator<R> {
    repo: R,
}

impl<R> RunComparator<R>
where
    R: RunReader,
{
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Compares `current` against the newest readable run before
    /// `batch_id`, walking back at most [`MAX_BASELINE_ATTEMPTS`] runs.
    pub fn compare(
        &self,
        batch_id: &str,
        current: &[IngestionSignature],
    ) -> ComparisonResult<ComparisonOutcome> {
        let runs = self.repo.list_previous_runs(batch_id, MAX_BASELINE_ATTEMPTS)?;
        let Some(newest) = runs.first() else {
            log::info!("No previous run to compare batch {batch_id} against");
            return Ok(ComparisonOutcome::NoBaseline);
        };

        let Some((baseline, previous)) = runs
            .iter()
            .find_map(|run| decode(run).map(|signatures| (run, signatures)))
        else {
            return Err(ComparisonError::UnreadableBaseline {
                attempts: runs.len(),
                newest: newest.batch_id.clone(),
            });
        };

        let deltas = diff(current, &previous);
        for delta in &deltas {
            log_delta(delta);
        }

        Ok(ComparisonOutcome::Compared {
            baseline_batch_id: baseline.batch_id.clone(),
            deltas,
        })
    }
}

fn log_delta(delta: &SignatureDelta) {
    let slice = format!("{}/{}", delta.operation, delta.property_type);
    match (&delta.current, &delta.previous) {
        (Some(current), Some(previous)) => {
            if current.success_rate < previous.success_rate {
                log::warn!(
                    "{slice}: success rate dropped from {:.1}% to {:.1}%",
                    previous.success_rate,
                    current.success_rate
                );
            }
            log::info!(
                "{slice}: pages_success {:+} pages_failed {:+} rows {:+} mean_price {}",
                delta.pages_success_delta().unwrap_or_default(),
                delta.pages_failed_delta().unwrap_or_default(),
                delta.row_count_delta().unwrap_or_default(),
                delta
                    .mean_price_delta()
                    .map_or_else(|| "n/a".to_string(), |d| format!("{d:+.2}"))
            );
        }
        (Some(_), None) => log::info!("{slice}: new in this run"),
        (None, Some(_)) => log::warn!("{slice}: missing from this run"),
        (None, None) => {}
    }
}
