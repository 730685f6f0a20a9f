use diesel::dsl::count_star;
use diesel::prelude::*;

use crate::domain::listing::{Listing, OperationType, PropertyType};
use crate::repository::errors::{RepositoryError, RepositoryResult};
use crate::repository::models::{DbListing, NewDbListing};
use crate::repository::{
    DieselRepository, DuplicateCandidate, ListingReader, ListingWriter, NaturalKey, StoredListing,
};

impl ListingReader for DieselRepository {
    fn list_listings(&self, collection: OperationType) -> RepositoryResult<Vec<StoredListing>> {
        use crate::repository::schema::listings;

        let mut conn = self.conn()?;

        let rows = listings::table
            .filter(listings::collection.eq(collection.as_str()))
            .order(listings::row_id.asc())
            .select(DbListing::as_select())
            .load::<DbListing>(&mut conn)?;

        Ok(rows
            .into_iter()
            .map(|row| StoredListing {
                row_id: row.row_id,
                collection,
                listing: row.into(),
            })
            .collect())
    }

    fn list_property_types(
        &self,
        collection: OperationType,
    ) -> RepositoryResult<Vec<PropertyType>> {
        use crate::repository::schema::listings;

        let mut conn = self.conn()?;

        let labels: Vec<Option<String>> = listings::table
            .filter(listings::collection.eq(collection.as_str()))
            .filter(listings::property_type.is_not_null())
            .select(listings::property_type)
            .distinct()
            .load(&mut conn)?;

        let mut kinds: Vec<PropertyType> = labels
            .into_iter()
            .flatten()
            .filter_map(|label| match label.parse() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    log::warn!("Ignoring stored property type in {collection}: {e}");
                    None
                }
            })
            .collect();
        kinds.sort();
        Ok(kinds)
    }

    fn list_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
    ) -> RepositoryResult<Vec<f64>> {
        use crate::repository::schema::listings;

        let mut conn = self.conn()?;

        let prices: Vec<Option<f64>> = listings::table
            .filter(listings::collection.eq(collection.as_str()))
            .filter(listings::property_type.eq(property_type.as_str()))
            .filter(listings::price.is_not_null())
            .select(listings::price)
            .load(&mut conn)?;

        Ok(prices.into_iter().flatten().collect())
    }

    fn find_duplicate_keys(&self, collection: OperationType) -> RepositoryResult<Vec<NaturalKey>> {
        use crate::repository::schema::listings;

        let mut conn = self.conn()?;

        let keys: Vec<(String, String)> = listings::table
            .filter(listings::collection.eq(collection.as_str()))
            .group_by((listings::source, listings::web_property_code))
            .having(count_star().gt(1))
            .select((listings::source, listings::web_property_code))
            .load(&mut conn)?;

        Ok(keys
            .into_iter()
            .map(|(source, web_property_code)| NaturalKey {
                source,
                web_property_code,
            })
            .collect())
    }

    fn list_duplicate_candidates(
        &self,
        collection: OperationType,
        key: &NaturalKey,
    ) -> RepositoryResult<Vec<DuplicateCandidate>> {
        use crate::repository::schema::listings;

        let mut conn = self.conn()?;

        let rows: Vec<(i32, Option<chrono::NaiveDateTime>)> = listings::table
            .filter(listings::collection.eq(collection.as_str()))
            .filter(listings::source.eq(&key.source))
            .filter(listings::web_property_code.eq(&key.web_property_code))
            .order(listings::row_id.asc())
            .select((listings::row_id, listings::scraped_at))
            .load(&mut conn)?;

        Ok(rows
            .into_iter()
            .map(|(row_id, scraped_at)| DuplicateCandidate {
                row_id,
                scraped_at: scraped_at.map(|at| at.and_utc()),
            })
            .collect())
    }
}

impl ListingWriter for DieselRepository {
    fn upsert_listings(
        &self,
        collection: OperationType,
        listings: &[Listing],
    ) -> RepositoryResult<usize> {
        use crate::repository::schema::listings as table;

        if listings.is_empty() {
            return Ok(0);
        }

        let rows: Vec<NewDbListing> = listings
            .iter()
            .map(|listing| NewDbListing::from_listing(collection, listing))
            .collect();

        let mut conn = self.conn()?;
        let affected = conn.transaction(|conn| {
            let mut affected_rows = 0;
            for row in rows.iter() {
                let updated = diesel::update(
                    table::table
                        .filter(table::collection.eq(&row.collection))
                        .filter(table::listing_id.eq(&row.listing_id)),
                )
                .set(row)
                .execute(conn)?;
                if updated == 0 {
                    diesel::insert_into(table::table).values(row).execute(conn)?;
                }
                affected_rows += 1;
            }
            Ok::<usize, RepositoryError>(affected_rows)
        })?;

        Ok(affected)
    }

    fn append_listings(
        &self,
        collection: OperationType,
        listings: &[Listing],
    ) -> RepositoryResult<usize> {
        use crate::repository::schema::listings as table;

        if listings.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let inserted = conn.transaction(|conn| {
            let mut inserted_rows = 0;
            for listing in listings {
                let row = NewDbListing::from_listing(collection, listing);
                inserted_rows += diesel::insert_into(table::table).values(&row).execute(conn)?;
            }
            Ok::<usize, RepositoryError>(inserted_rows)
        })?;

        Ok(inserted)
    }

    fn delete_listings(&self, row_ids: &[i32]) -> RepositoryResult<usize> {
        use crate::repository::schema::listings;

        if row_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;

        let deleted = diesel::delete(listings::table.filter(listings::row_id.eq_any(row_ids)))
            .execute(&mut conn)?;

        Ok(deleted)
    }

    fn zero_negative_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
    ) -> RepositoryResult<usize> {
        use crate::repository::schema::listings;

        let mut conn = self.conn()?;

        let affected = diesel::update(
            listings::table
                .filter(listings::collection.eq(collection.as_str()))
                .filter(listings::property_type.eq(property_type.as_str()))
                .filter(listings::price.lt(0.0)),
        )
        .set(listings::price.eq(0.0))
        .execute(&mut conn)?;

        Ok(affected)
    }

    fn cap_prices(
        &self,
        collection: OperationType,
        property_type: PropertyType,
        ceiling: f64,
    ) -> RepositoryResult<usize> {
        use crate::repository::schema::listings;

        let mut conn = self.conn()?;

        let affected = diesel::update(
            listings::table
                .filter(listings::collection.eq(collection.as_str()))
                .filter(listings::property_type.eq(property_type.as_str()))
                .filter(listings::price.gt(ceiling)),
        )
        .set(listings::price.eq(ceiling))
        .execute(&mut conn)?;

        Ok(affected)
    }
}
