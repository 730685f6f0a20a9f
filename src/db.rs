//! SQLite connection pool shared by the repository.

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use crate::repository::errors::{RepositoryError, RepositoryResult};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS listings (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    listing_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    source TEXT NOT NULL,
    web_property_code TEXT NOT NULL,
    price DOUBLE,
    price_admin_included DOUBLE,
    area DOUBLE,
    built_area DOUBLE,
    private_area DOUBLE,
    floor INTEGER,
    rooms INTEGER,
    bedrooms INTEGER,
    bathrooms INTEGER,
    garage_count INTEGER,
    stratum INTEGER,
    construction_year INTEGER,
    property_type TEXT,
    operation_type TEXT,
    antiquity TEXT,
    latitude DOUBLE,
    longitude DOUBLE,
    description TEXT NOT NULL DEFAULT '',
    link TEXT,
    scraped_at TIMESTAMP,
    batch_id TEXT
);
CREATE INDEX IF NOT EXISTS listings_collection_listing_id ON listings (collection, listing_id);
CREATE INDEX IF NOT EXISTS listings_natural_key ON listings (collection, source, web_property_code);
CREATE INDEX IF NOT EXISTS listings_category ON listings (collection, property_type);

CREATE TABLE IF NOT EXISTS ingestion_runs (
    batch_id TEXT PRIMARY KEY NOT NULL,
    started_at TIMESTAMP NOT NULL,
    completed_at TIMESTAMP,
    signatures TEXT
);
"#;

#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Opens a pool on `database_url` and creates the schema when missing.
pub fn establish_connection_pool(database_url: &str) -> RepositoryResult<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)?;

    let mut conn = pool.get()?;
    conn.batch_execute(SCHEMA)
        .map_err(|e| RepositoryError::Unexpected(format!("failed to create schema: {e}")))?;

    Ok(pool)
}
