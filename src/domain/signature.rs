use serde::{Deserialize, Serialize};

use crate::domain::listing::{OperationType, PropertyType};

/// Summary of one `(operation, property_type)` slice of an ingestion run.
///
/// Written once when the run completes and only read back by the run
/// comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionSignature {
    pub batch_id: String,
    pub operation: OperationType,
    pub property_type: PropertyType,
    pub pages_success: u32,
    pub pages_failed: u32,
    pub success_rate: f64,
    pub row_count: u64,
    pub mean_price: Option<f64>,
}

impl IngestionSignature {
    /// Builds a signature from page counters and the prices seen in the slice.
    ///
    /// A slice with no scheduled pages reports a 100% success rate since
    /// nothing failed.
    pub fn from_counts(
        batch_id: &str,
        operation: OperationType,
        property_type: PropertyType,
        pages_success: u32,
        pages_failed: u32,
        prices: &[Option<f64>],
    ) -> Self {
        let attempted = pages_success + pages_failed;
        let success_rate = if attempted == 0 {
            100.0
        } else {
            f64::from(pages_success) / f64::from(attempted) * 100.0
        };

        let known: Vec<f64> = prices
            .iter()
            .flatten()
            .copied()
            .filter(|price| price.is_finite())
            .collect();
        let mean_price = if known.is_empty() {
            None
        } else {
            Some(known.iter().sum::<f64>() / known.len() as f64)
        };

        Self {
            batch_id: batch_id.to_string(),
            operation,
            property_type,
            pages_success,
            pages_failed,
            success_rate,
            row_count: prices.len() as u64,
            mean_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_and_mean_price() {
        let signature = IngestionSignature::from_counts(
            "b1",
            OperationType::Arriendo,
            PropertyType::Casa,
            8,
            2,
            &[Some(100.0), None, Some(300.0)],
        );

        assert_eq!(signature.success_rate, 80.0);
        assert_eq!(signature.row_count, 3);
        assert_eq!(signature.mean_price, Some(200.0));
    }

    #[test]
    fn empty_slice_has_no_mean_price() {
        let signature = IngestionSignature::from_counts(
            "b1",
            OperationType::Venta,
            PropertyType::Lote,
            0,
            0,
            &[],
        );

        assert_eq!(signature.success_rate, 100.0);
        assert_eq!(signature.mean_price, None);
        assert_eq!(signature.row_count, 0);
    }
}
