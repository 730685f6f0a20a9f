//! Clamps stored prices per category to `[0, p99]` in both stores.

use std::sync::Arc;

use crate::domain::listing::{OperationType, PropertyType};
use crate::processing::MaintenanceResult;
use crate::repository::{ListingReader, ListingWriter};
use crate::vector_store::{PriceBound, VectorStore};

const PRICE_SCROLL_LIMIT: u32 = 256;

/// Nearest-rank 99th percentile of the finite values in `prices`.
///
/// Nearest-rank always returns one of the inputs, so clamping a category to
/// its own percentile leaves the percentile unchanged on the next pass.
pub fn percentile_99(prices: &[f64]) -> Option<f64> {
    let mut values: Vec<f64> = prices.iter().copied().filter(|p| p.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let rank = (values.len() * 99).div_ceil(100).max(1);
    Some(values[rank - 1])
}

/// What one category pass changed.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceReport {
    pub collection: OperationType,
    pub property_type: PropertyType,
    pub percentile: f64,
    pub negatives_fixed: usize,
    pub capped: usize,
    pub vector_negatives_fixed: usize,
    pub vector_capped: usize,
}

pub struct PriceNormalizer<R> {
    repo: R,
    vectors: Arc<dyn VectorStore>,
}

impl<R> PriceNormalizer<R>
where
    R: ListingReader + ListingWriter,
{
    pub fn new(repo: R, vectors: Arc<dyn VectorStore>) -> Self {
        Self { repo, vectors }
    }

    pub async fn run(&self, collections: &[OperationType]) -> MaintenanceResult<Vec<PriceReport>> {
        let mut reports = Vec::new();
        for &collection in collections {
            for property_type in self.repo.list_property_types(collection)? {
                if let Some(report) = self.normalize(collection, property_type).await? {
                    reports.push(report);
                }
            }
        }
        Ok(reports)
    }

    /// Returns `None` for a category without any stored price.
    pub async fn normalize(
        &self,
        collection: OperationType,
        property_type: PropertyType,
    ) -> MaintenanceResult<Option<PriceReport>> {
        let prices = self.repo.list_prices(collection, property_type)?;
        let Some(percentile) = percentile_99(&prices) else {
            return Ok(None);
        };
        // Negatives are zeroed first, so a negative percentile clamps to zero.
        let ceiling = percentile.max(0.0);

        let negatives_fixed = self.repo.zero_negative_prices(collection, property_type)?;
        let capped = self.repo.cap_prices(collection, property_type, ceiling)?;

        let vector_negatives_fixed = self
            .patch_vectors(collection, property_type, PriceBound::Below(0.0), 0.0)
            .await?;
        let vector_capped = self
            .patch_vectors(collection, property_type, PriceBound::Above(ceiling), ceiling)
            .await?;

        if negatives_fixed != vector_negatives_fixed || capped != vector_capped {
            log::warn!(
                "Stores disagreed on {collection}/{property_type}: documents fixed {negatives_fixed}/{capped}, vectors fixed {vector_negatives_fixed}/{vector_capped}"
            );
        }
        log::info!(
            "Normalized {collection}/{property_type}: p99={percentile} negatives_fixed={negatives_fixed} capped={capped}"
        );

        Ok(Some(PriceReport {
            collection,
            property_type,
            percentile,
            negatives_fixed,
            capped,
            vector_negatives_fixed,
            vector_capped,
        }))
    }

    /// Scrolls every point matching `bound` and rewrites its price.
    async fn patch_vectors(
        &self,
        collection: OperationType,
        property_type: PropertyType,
        bound: PriceBound,
        price: f64,
    ) -> MaintenanceResult<usize> {
        let mut patched = 0;
        let mut offset = None;

        loop {
            let page = self
                .vectors
                .scroll_prices(collection, property_type, bound, offset, PRICE_SCROLL_LIMIT)
                .await?;
            for id in &page.ids {
                self.vectors.set_price(collection, *id, price).await?;
                patched += 1;
            }
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(patched)
    }
}
