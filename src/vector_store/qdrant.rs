use std::collections::HashSet;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldType,
    Filter, PointId, PointStruct, PointsIdsList, Range, ScrollPointsBuilder,
    SetPayloadPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use uuid::Uuid;

use crate::domain::listing::{OperationType, PropertyType};
use crate::models::config::VectorStoreSettings;
use crate::vector_store::{
    EmbeddedListing, PriceBound, ScrollPage, VectorStore, VectorStoreError, VectorStoreResult,
};

const ID_SCROLL_LIMIT: u32 = 1_000;

/// Vector store backed by a Qdrant server, one collection per operation.
pub struct QdrantVectorStore {
    client: Qdrant,
}

impl QdrantVectorStore {
    /// Connects using the endpoint resolved for the configured mode.
    pub fn connect(settings: &VectorStoreSettings) -> VectorStoreResult<Self> {
        let endpoint = settings
            .endpoint()
            .map_err(|e| VectorStoreError::Config(e.to_string()))?;

        let mut builder = Qdrant::from_url(&endpoint);
        if let Some(api_key) = settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            builder = builder.api_key(api_key.trim().to_string());
        }

        log::info!("Connecting to vector store at {endpoint} ({:?} mode)", settings.mode);
        Ok(Self {
            client: builder.build()?,
        })
    }
}

fn point_uuid(id: Option<PointId>) -> VectorStoreResult<Uuid> {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(value)) => {
            Uuid::parse_str(&value).map_err(|_| VectorStoreError::InvalidPointId(value))
        }
        Some(PointIdOptions::Num(value)) => {
            Err(VectorStoreError::InvalidPointId(value.to_string()))
        }
        None => Err(VectorStoreError::InvalidPointId("<missing>".to_string())),
    }
}

fn price_range(bound: PriceBound) -> Range {
    match bound {
        PriceBound::Below(value) => Range {
            lt: Some(value),
            ..Default::default()
        },
        PriceBound::Above(value) => Range {
            gt: Some(value),
            ..Default::default()
        },
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(
        &self,
        collection: OperationType,
        dimensions: u64,
    ) -> VectorStoreResult<()> {
        let name = collection.as_str();
        if self.client.collection_exists(name).await? {
            return Ok(());
        }

        log::info!("Creating vector collection {name} with {dimensions} dimensions");
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dimensions, Distance::Cosine)),
            )
            .await?;

        // Filtered scans during price normalization hit these two fields.
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(name, "property_type", FieldType::Keyword)
                    .wait(true),
            )
            .await?;
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(name, "price", FieldType::Float).wait(true),
            )
            .await?;

        Ok(())
    }

    async fn upsert(
        &self,
        collection: OperationType,
        points: &[EmbeddedListing],
    ) -> VectorStoreResult<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let structs = points
            .iter()
            .map(|point| {
                let payload = Payload::try_from(point.listing.payload())?;
                Ok(PointStruct::new(
                    point.listing.id.to_string(),
                    point.vector.clone(),
                    payload,
                ))
            })
            .collect::<VectorStoreResult<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection.as_str(), structs).wait(true))
            .await?;

        Ok(points.len())
    }

    async fn scroll_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
        bound: PriceBound,
        offset: Option<Uuid>,
        limit: u32,
    ) -> VectorStoreResult<ScrollPage> {
        let filter = Filter::must([
            Condition::matches("property_type", property_type.as_str().to_string()),
            Condition::range("price", price_range(bound)),
        ]);

        let mut request = ScrollPointsBuilder::new(collection.as_str())
            .filter(filter)
            .limit(limit)
            .with_payload(false)
            .with_vectors(false);
        if let Some(offset) = offset {
            request = request.offset(PointId::from(offset.to_string()));
        }

        let response = self.client.scroll(request).await?;

        let ids = response
            .result
            .into_iter()
            .map(|point| point_uuid(point.id))
            .collect::<VectorStoreResult<Vec<_>>>()?;
        let next_offset = match response.next_page_offset {
            Some(id) => Some(point_uuid(Some(id))?),
            None => None,
        };

        Ok(ScrollPage { ids, next_offset })
    }

    async fn set_price(
        &self,
        collection: OperationType,
        id: Uuid,
        price: f64,
    ) -> VectorStoreResult<()> {
        let mut payload = Payload::new();
        payload.insert("price", price);

        self.client
            .set_payload(
                SetPayloadPointsBuilder::new(collection.as_str(), payload)
                    .points_selector(PointsIdsList {
                        ids: vec![PointId::from(id.to_string())],
                    })
                    .wait(true),
            )
            .await?;

        Ok(())
    }

    async fn list_ids(&self, collection: OperationType) -> VectorStoreResult<HashSet<Uuid>> {
        let mut ids = HashSet::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut request = ScrollPointsBuilder::new(collection.as_str())
                .limit(ID_SCROLL_LIMIT)
                .with_payload(false)
                .with_vectors(false);
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }

            let response = self.client.scroll(request).await?;
            for point in response.result {
                ids.insert(point_uuid(point.id)?);
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }
}
