use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::listing::{Listing, OperationType, PropertyType};

pub mod fincaraiz;

/// Errors raised while talking to a listings source.
#[derive(Debug, thiserror::Error)]
pub enum CrawlerError {
    #[error("failed to build crawler: {0}")]
    Build(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Schema(String),
    #[error("could not resolve location `{query}`: {reason}")]
    LocationResolution { query: String, reason: String },
}

pub type CrawlerResult<T> = Result<T, CrawlerError>;

/// Opaque place identifier understood by the search API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "name")]
    pub canonical_name: String,
    pub id: String,
}

/// One page request against the search API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: u32,
    pub page_number: u32,
    pub property_type: PropertyType,
    pub operation: OperationType,
}

/// Result of a single page fetch; failures never cross task boundaries.
#[derive(Debug)]
pub enum PageOutcome {
    Fetched { page: u32, listings: Vec<Listing> },
    Failed { page: u32, reason: String },
}

impl PageOutcome {
    pub fn from_result(page: u32, result: CrawlerResult<Vec<Listing>>) -> Self {
        match result {
            Ok(listings) => Self::Fetched { page, listings },
            Err(error) => Self::Failed {
                page,
                reason: error.to_string(),
            },
        }
    }
}

/// Number of pages needed to cover `total_hits` with `page_size` rows each.
pub fn page_count(total_hits: i64, page_size: u32) -> u32 {
    if total_hits <= 0 || page_size == 0 {
        return 0;
    }
    let size = i64::from(page_size);
    let pages = (total_hits + size - 1) / size;
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// An abstraction over paginated listing sources.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Resolves a free-text place name to a location the search accepts.
    async fn resolve_location(&self, query: &str) -> CrawlerResult<Location>;

    /// Total number of hits the search reports for a category.
    ///
    /// A response without a total yields `-1`, which plans zero pages.
    async fn total_hits(
        &self,
        property_type: PropertyType,
        operation: OperationType,
        location: &Location,
    ) -> CrawlerResult<i64>;

    /// Fetches a single page and normalizes every hit into a [`Listing`].
    async fn fetch_page(
        &self,
        request: PageRequest,
        location: &Location,
    ) -> CrawlerResult<Vec<Listing>>;
}

/// Builds the HTTP client shared by all requests of a source.
pub fn build_reqwest_client(timeout: Duration) -> CrawlerResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36",
        )
        .timeout(timeout)
        .build()
        .map_err(|e| CrawlerError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::page_count;

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0, 32), 0);
        assert_eq!(page_count(-1, 32), 0);
        assert_eq!(page_count(32, 32), 1);
        assert_eq!(page_count(33, 32), 2);
        assert_eq!(page_count(1, 32), 1);
        assert_eq!(page_count(640, 32), 20);
    }
}
