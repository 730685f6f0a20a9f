//! Diesel row types for the document store.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::listing::{Listing, OperationType, listing_id};
use crate::repository::schema::{ingestion_runs, listings};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = listings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DbListing {
    pub row_id: i32,
    pub listing_id: String,
    pub collection: String,
    pub source: String,
    pub web_property_code: String,
    pub price: Option<f64>,
    pub price_admin_included: Option<f64>,
    pub area: Option<f64>,
    pub built_area: Option<f64>,
    pub private_area: Option<f64>,
    pub floor: Option<i32>,
    pub rooms: Option<i32>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub garage_count: Option<i32>,
    pub stratum: Option<i32>,
    pub construction_year: Option<i32>,
    pub property_type: Option<String>,
    pub operation_type: Option<String>,
    pub antiquity: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    pub link: Option<String>,
    pub scraped_at: Option<NaiveDateTime>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = listings)]
#[diesel(treat_none_as_null = true)]
pub struct NewDbListing {
    pub listing_id: String,
    pub collection: String,
    pub source: String,
    pub web_property_code: String,
    pub price: Option<f64>,
    pub price_admin_included: Option<f64>,
    pub area: Option<f64>,
    pub built_area: Option<f64>,
    pub private_area: Option<f64>,
    pub floor: Option<i32>,
    pub rooms: Option<i32>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub garage_count: Option<i32>,
    pub stratum: Option<i32>,
    pub construction_year: Option<i32>,
    pub property_type: Option<String>,
    pub operation_type: Option<String>,
    pub antiquity: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: String,
    pub link: Option<String>,
    pub scraped_at: Option<NaiveDateTime>,
    pub batch_id: Option<String>,
}

impl NewDbListing {
    pub fn from_listing(collection: OperationType, listing: &Listing) -> Self {
        Self {
            listing_id: listing.id.to_string(),
            collection: collection.as_str().to_string(),
            source: listing.source.clone(),
            web_property_code: listing.web_property_code.clone(),
            price: listing.price,
            price_admin_included: listing.price_admin_included,
            area: listing.area,
            built_area: listing.built_area,
            private_area: listing.private_area,
            floor: listing.floor,
            rooms: listing.rooms,
            bedrooms: listing.bedrooms,
            bathrooms: listing.bathrooms,
            garage_count: listing.garage_count,
            stratum: listing.stratum,
            construction_year: listing.construction_year,
            property_type: listing.property_type.map(|t| t.as_str().to_string()),
            operation_type: listing.operation_type.map(|t| t.as_str().to_string()),
            antiquity: listing.antiquity.map(|a| a.as_str().to_string()),
            latitude: listing.latitude,
            longitude: listing.longitude,
            description: listing.description.clone(),
            link: listing.link.clone(),
            scraped_at: listing.scraped_at.map(|at| at.naive_utc()),
            batch_id: listing.batch_id.clone(),
        }
    }
}

impl From<DbListing> for Listing {
    fn from(row: DbListing) -> Self {
        // Ids are always derivable from the natural key; a corrupted column
        // must not break reads.
        let id = Uuid::parse_str(&row.listing_id)
            .unwrap_or_else(|_| listing_id(&row.source, &row.web_property_code));

        Listing {
            id,
            source: row.source,
            web_property_code: row.web_property_code,
            price: row.price,
            price_admin_included: row.price_admin_included,
            area: row.area,
            built_area: row.built_area,
            private_area: row.private_area,
            floor: row.floor,
            rooms: row.rooms,
            bedrooms: row.bedrooms,
            bathrooms: row.bathrooms,
            garage_count: row.garage_count,
            stratum: row.stratum,
            construction_year: row.construction_year,
            property_type: row.property_type.and_then(|t| t.parse().ok()),
            operation_type: row.operation_type.and_then(|t| t.parse().ok()),
            antiquity: row.antiquity.and_then(|a| a.parse().ok()),
            latitude: row.latitude,
            longitude: row.longitude,
            description: row.description,
            link: row.link,
            scraped_at: row.scraped_at.map(|at| at.and_utc()),
            batch_id: row.batch_id,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ingestion_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DbIngestionRun {
    pub batch_id: String,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub signatures: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ingestion_runs)]
pub struct NewDbIngestionRun<'a> {
    pub batch_id: &'a str,
    pub started_at: NaiveDateTime,
}
