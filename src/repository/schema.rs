diesel::table! {
    listings (row_id) {
        row_id -> Integer,
        listing_id -> Text,
        collection -> Text,
        source -> Text,
        web_property_code -> Text,
        price -> Nullable<Double>,
        price_admin_included -> Nullable<Double>,
        area -> Nullable<Double>,
        built_area -> Nullable<Double>,
        private_area -> Nullable<Double>,
        floor -> Nullable<Integer>,
        rooms -> Nullable<Integer>,
        bedrooms -> Nullable<Integer>,
        bathrooms -> Nullable<Integer>,
        garage_count -> Nullable<Integer>,
        stratum -> Nullable<Integer>,
        construction_year -> Nullable<Integer>,
        property_type -> Nullable<Text>,
        operation_type -> Nullable<Text>,
        antiquity -> Nullable<Text>,
        latitude -> Nullable<Double>,
        longitude -> Nullable<Double>,
        description -> Text,
        link -> Nullable<Text>,
        scraped_at -> Nullable<Timestamp>,
        batch_id -> Nullable<Text>,
    }
}

diesel::table! {
    ingestion_runs (batch_id) {
        batch_id -> Text,
        started_at -> Timestamp,
        completed_at -> Nullable<Timestamp>,
        signatures -> Nullable<Text>,
    }
}
