//! Helpers for integration tests.

use chrono::{DateTime, TimeZone, Utc};
use inmuebles_ingest::db::{DbPool, establish_connection_pool};
use inmuebles_ingest::domain::listing::{FINCA_RAIZ_SOURCE, Listing, PropertyType};
use tempfile::TempDir;

/// Temporary database used in integration tests, removed on drop.
pub struct TestDb {
    _dir: TempDir,
    pool: DbPool,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir.");
        let path = dir.path().join("test.db");
        let pool = establish_connection_pool(path.to_str().expect("utf-8 temp path"))
            .expect("Failed to establish SQLite connection.");
        TestDb { _dir: dir, pool }
    }

    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

pub fn listing(code: &str, property_type: PropertyType, price: Option<f64>) -> Listing {
    let mut listing = Listing::new(FINCA_RAIZ_SOURCE, code);
    listing.property_type = Some(property_type);
    listing.price = price;
    listing.description = format!("Inmueble {code}");
    listing
}
