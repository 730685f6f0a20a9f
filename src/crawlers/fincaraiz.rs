use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use crate::crawlers::{
    CrawlerError, CrawlerResult, ListingSource, Location, PageRequest, build_reqwest_client,
};
use crate::domain::listing::{
    AntiquityBucket, FINCA_RAIZ_SOURCE, Listing, OperationType, PropertyType,
};

const LOCATIONS_PATH: &str = "api/v1/locations/infofinca-autocomplete";
const SEARCH_PATH: &str = "api/v1/properties/search";

/// Client for the Finca Raiz search service.
pub struct FincaRaizCrawler {
    base_url: Url,
    site_url: String,
    client: reqwest::Client,
}

impl FincaRaizCrawler {
    /// Creates a client against `base_url` (the search service root).
    ///
    /// `site_url` is prepended to the relative links returned for each hit.
    pub fn new(base_url: &str, site_url: &str, timeout: Duration) -> CrawlerResult<Self> {
        Ok(Self {
            base_url: Url::parse(base_url).map_err(|e| CrawlerError::Build(e.to_string()))?,
            site_url: site_url.trim_end_matches('/').to_string(),
            client: build_reqwest_client(timeout)?,
        })
    }

    async fn post_json(&self, path: &str, referer: &str, body: &Value) -> CrawlerResult<Value> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CrawlerError::Build(e.to_string()))?;

        let res = self
            .client
            .post(url)
            .header("accept", "*/*")
            .header("accept-language", "en-US,en;q=0.9")
            .header("origin", self.site_url.as_str())
            .header("referer", referer)
            .header("x-origin", "www.fincaraiz.com.co")
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.json::<Value>().await?)
    }
}

#[async_trait]
impl ListingSource for FincaRaizCrawler {
    async fn resolve_location(&self, query: &str) -> CrawlerResult<Location> {
        let body = json!({
            "operationName": "Location",
            "variables": {"strSearch": query},
            "query": ""
        });
        let referer = format!("{}/venta/casas-y-apartamentos/bogota/bogota-dc", self.site_url);

        let response = self
            .post_json(LOCATIONS_PATH, &referer, &body)
            .await
            .map_err(|e| CrawlerError::LocationResolution {
                query: query.to_string(),
                reason: e.to_string(),
            })?;

        parse_location(&response).ok_or_else(|| CrawlerError::LocationResolution {
            query: query.to_string(),
            reason: "no matching location in response".to_string(),
        })
    }

    async fn total_hits(
        &self,
        property_type: PropertyType,
        operation: OperationType,
        location: &Location,
    ) -> CrawlerResult<i64> {
        let request = PageRequest {
            page_size: 1,
            page_number: 1,
            property_type,
            operation,
        };
        let body = search_payload(request, location)?;
        let response = self
            .post_json(SEARCH_PATH, &format!("{}/", self.site_url), &body)
            .await?;

        Ok(parse_total_hits(&response))
    }

    async fn fetch_page(
        &self,
        request: PageRequest,
        location: &Location,
    ) -> CrawlerResult<Vec<Listing>> {
        let body = search_payload(request, location)?;
        let response = self
            .post_json(SEARCH_PATH, &format!("{}/", self.site_url), &body)
            .await?;

        parse_page(&response, &self.site_url)
    }
}

fn search_payload(request: PageRequest, location: &Location) -> CrawlerResult<Value> {
    let property_code = request.property_type.code().ok_or_else(|| {
        CrawlerError::Build(format!(
            "property type {} has no search code",
            request.property_type
        ))
    })?;
    let location = serde_json::to_value(location).map_err(|e| CrawlerError::Build(e.to_string()))?;

    Ok(json!({
        "variables": {
            "rows": request.page_size,
            "params": {
                "page": request.page_number,
                "order": 2,
                "operation_type_id": request.operation.code(),
                "property_type_id": [property_code],
                "currencyID": 4,
                "m2Currency": 4,
                "locations": [location]
            },
            "page": request.page_number,
            "source": 10
        },
        "query": ""
    }))
}

fn parse_location(response: &Value) -> Option<Location> {
    let first = response.pointer("/data/searchLocation/0")?;
    Some(Location {
        kind: coerce_string(first.get("type")?)?,
        canonical_name: coerce_string(first.get("name")?)?,
        id: coerce_string(first.get("id")?)?,
    })
}

fn parse_total_hits(response: &Value) -> i64 {
    response
        .pointer("/hits/total/value")
        .and_then(coerce_i64)
        .unwrap_or(-1)
}

/// Normalizes every hit of a search page.
///
/// A page without a `hits.hits` array is a schema error; individual hits
/// without an id are skipped.
fn parse_page(response: &Value, site_url: &str) -> CrawlerResult<Vec<Listing>> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| CrawlerError::Schema("missing hits.hits".to_string()))?;

    let mut listings = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(raw) = hit.pointer("/_source/listing") else {
            log::warn!("Skipping hit without listing body");
            continue;
        };
        match parse_listing(raw, site_url) {
            Some(listing) => listings.push(listing),
            None => log::warn!("Skipping listing without id"),
        }
    }
    Ok(listings)
}

fn parse_listing(raw: &Value, site_url: &str) -> Option<Listing> {
    let code = raw.get("id").and_then(coerce_string)?;
    let field = |name: &str| raw.get(name).unwrap_or(&Value::Null);

    let mut listing =
        Listing::new(FINCA_RAIZ_SOURCE, code).with_stratum(coerce_i32(field("stratum")));
    listing.price = raw.pointer("/price/amount").and_then(coerce_f64);
    listing.price_admin_included = raw.pointer("/price/admin_included").and_then(coerce_f64);
    listing.area = coerce_f64(field("m2"));
    listing.built_area = coerce_f64(field("m2Built"));
    listing.private_area = coerce_f64(field("m2apto"));
    listing.latitude = coerce_f64(field("latitude"));
    listing.longitude = coerce_f64(field("longitude"));
    listing.floor = coerce_i32(field("floor"));
    listing.rooms = coerce_i32(field("rooms"));
    listing.bedrooms = coerce_i32(field("bedrooms"));
    listing.bathrooms = coerce_i32(field("bathrooms"));
    listing.garage_count = coerce_i32(field("garage"));
    listing.construction_year = coerce_i32(field("construction_year"));
    listing.property_type = coerce_i64(field("property_type_id"))
        .map(PropertyType::from_code)
        .and_then(PropertyType::known);
    listing.operation_type =
        coerce_i64(field("operation_type_id")).and_then(OperationType::from_code);
    listing.antiquity = coerce_i64(field("antiquity"))
        .map(AntiquityBucket::from_code)
        .and_then(AntiquityBucket::known);
    listing.description = field("description").as_str().unwrap_or_default().to_string();
    listing.link = field("link").as_str().map(|link| format!("{site_url}{link}"));

    Some(listing)
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn coerce_i32(value: &Value) -> Option<i32> {
    coerce_i64(value).and_then(|v| i32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://www.fincaraiz.com.co";

    fn hit(listing: Value) -> Value {
        json!({"_source": {"listing": listing}})
    }

    #[test]
    fn parses_complete_listing() {
        let response = json!({
            "hits": {
                "total": {"value": 2},
                "hits": [hit(json!({
                    "id": 191919,
                    "price": {"amount": 2_500_000, "admin_included": 0},
                    "m2": 54.5,
                    "m2Built": "50",
                    "m2apto": null,
                    "latitude": 4.65,
                    "longitude": -74.05,
                    "antiquity": 2,
                    "construction_year": 2015,
                    "garage": 1,
                    "bathrooms": 2,
                    "rooms": 3,
                    "floor": "7",
                    "property_type_id": 2,
                    "operation_type_id": 2,
                    "stratum": 4,
                    "bedrooms": 2,
                    "description": "Apartamento\ncon balcón",
                    "link": "/apartamento-en-arriendo/191919"
                }))]
            }
        });

        let listings = parse_page(&response, SITE).expect("valid page");

        assert_eq!(listings.len(), 1);
        let listing = &listings[0];
        assert_eq!(listing.web_property_code, "191919");
        assert_eq!(listing.source, FINCA_RAIZ_SOURCE);
        assert_eq!(listing.price, Some(2_500_000.0));
        assert_eq!(listing.built_area, Some(50.0));
        assert_eq!(listing.private_area, None);
        assert_eq!(listing.floor, Some(7));
        assert_eq!(listing.property_type, Some(PropertyType::Apartamento));
        assert_eq!(listing.operation_type, Some(OperationType::Arriendo));
        assert_eq!(listing.antiquity, Some(AntiquityBucket::OneToEightYears));
        assert_eq!(listing.stratum, Some(4));
        assert_eq!(
            listing.link.as_deref(),
            Some("https://www.fincaraiz.com.co/apartamento-en-arriendo/191919")
        );
        assert_eq!(parse_total_hits(&response), 2);
    }

    #[test]
    fn malformed_fields_become_absent() {
        let response = json!({
            "hits": {"hits": [
                hit(json!({
                    "id": "abc-1",
                    "price": {"amount": "consultar"},
                    "m2": {"nested": true},
                    "rooms": "3+",
                    "property_type_id": 7,
                    "operation_type_id": 9,
                    "antiquity": "old",
                    "stratum": 12
                })),
                hit(json!({"price": {"amount": 1}}))
            ]}
        });

        let listings = parse_page(&response, SITE).expect("valid page");

        assert_eq!(listings.len(), 1);
        let listing = &listings[0];
        assert_eq!(listing.price, None);
        assert_eq!(listing.area, None);
        assert_eq!(listing.rooms, None);
        assert_eq!(listing.property_type, None);
        assert_eq!(listing.operation_type, None);
        assert_eq!(listing.antiquity, None);
        assert_eq!(listing.stratum, None);
        assert_eq!(listing.description, "");
        assert_eq!(listing.link, None);
    }

    #[test]
    fn page_without_hits_is_a_schema_error() {
        let response = json!({"message": "rate limited"});

        assert!(matches!(
            parse_page(&response, SITE),
            Err(CrawlerError::Schema(_))
        ));
        assert_eq!(parse_total_hits(&response), -1);
    }

    #[test]
    fn parses_first_location() {
        let response = json!({"data": {"searchLocation": [
            {"type": "CITY", "name": "Bogotá, D.C.", "id": 11001},
            {"type": "CITY", "name": "Bogotá Norte", "id": "x"}
        ]}});

        let location = parse_location(&response).expect("location present");

        assert_eq!(location.kind, "CITY");
        assert_eq!(location.canonical_name, "Bogotá, D.C.");
        assert_eq!(location.id, "11001");
        assert_eq!(parse_location(&json!({"data": {"searchLocation": []}})), None);
    }

    #[test]
    fn search_payload_carries_codes_and_location() {
        let location = Location {
            kind: "CITY".to_string(),
            canonical_name: "Bogotá".to_string(),
            id: "11001".to_string(),
        };
        let request = PageRequest {
            page_size: 32,
            page_number: 3,
            property_type: PropertyType::Apartaestudio,
            operation: OperationType::Venta,
        };

        let payload = search_payload(request, &location).expect("known property type");

        assert_eq!(payload["variables"]["rows"], 32);
        assert_eq!(payload["variables"]["page"], 3);
        assert_eq!(payload["variables"]["params"]["property_type_id"][0], 14);
        assert_eq!(payload["variables"]["params"]["operation_type_id"], 1);
        assert_eq!(payload["variables"]["params"]["locations"][0]["name"], "Bogotá");

        let unknown = PageRequest {
            property_type: PropertyType::Unknown,
            ..request
        };
        assert!(search_payload(unknown, &location).is_err());
    }
}
