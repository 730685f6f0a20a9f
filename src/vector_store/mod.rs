//! Similarity store holding one embedding per listing id.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::listing::{Listing, OperationType, PropertyType};

pub mod qdrant;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("qdrant error: {0}")]
    Qdrant(#[from] qdrant_client::QdrantError),
    #[error("invalid vector store configuration: {0}")]
    Config(String),
    #[error("point id is not a uuid: {0}")]
    InvalidPointId(String),
}

pub type VectorStoreResult<T> = Result<T, VectorStoreError>;

/// A listing paired with its description embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedListing {
    pub listing: Listing,
    pub vector: Vec<f32>,
}

/// Price condition used when scanning a category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceBound {
    Below(f64),
    Above(f64),
}

impl PriceBound {
    pub fn matches(self, price: f64) -> bool {
        match self {
            Self::Below(bound) => price < bound,
            Self::Above(bound) => price > bound,
        }
    }
}

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub ids: Vec<Uuid>,
    pub next_offset: Option<Uuid>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the collection for `collection` when it does not exist yet.
    async fn ensure_collection(
        &self,
        collection: OperationType,
        dimensions: u64,
    ) -> VectorStoreResult<()>;

    /// Upserts points keyed by listing id. Points sharing an id overwrite.
    async fn upsert(
        &self,
        collection: OperationType,
        points: &[EmbeddedListing],
    ) -> VectorStoreResult<usize>;

    /// One page of ids in a category whose price matches `bound`.
    async fn scroll_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
        bound: PriceBound,
        offset: Option<Uuid>,
        limit: u32,
    ) -> VectorStoreResult<ScrollPage>;

    /// Rewrites the payload price of one point without touching its vector.
    async fn set_price(
        &self,
        collection: OperationType,
        id: Uuid,
        price: f64,
    ) -> VectorStoreResult<()>;

    /// Every point id in the collection.
    async fn list_ids(&self, collection: OperationType) -> VectorStoreResult<HashSet<Uuid>>;
}
