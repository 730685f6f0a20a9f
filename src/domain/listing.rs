use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag attached to every listing fetched from Finca Raiz.
pub const FINCA_RAIZ_SOURCE: &str = "Finca Raiz";

/// Derives the store identifier of a listing from its natural key.
///
/// The same `(source, web_property_code)` pair always yields the same id, so
/// re-scraping a listing overwrites its previous copy instead of adding one.
pub fn listing_id(source: &str, web_property_code: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_DNS,
        format!("{source}:{web_property_code}").as_bytes(),
    )
}

/// Error returned when a label does not name a known category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownCategory {
    kind: &'static str,
    value: String,
}

/// Top-level collection a listing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationType {
    Arriendo,
    Venta,
}

impl OperationType {
    pub const ALL: [OperationType; 2] = [OperationType::Arriendo, OperationType::Venta];

    /// Maps the search API's `operation_type_id`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Venta),
            2 => Some(Self::Arriendo),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Venta => 1,
            Self::Arriendo => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arriendo => "Arriendo",
            Self::Venta => "Venta",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownCategory {
                kind: "operation type",
                value: s.to_string(),
            })
    }
}

/// Property category as published by the search API.
///
/// `Unknown` stands for any external code missing from the lookup table; it
/// is never persisted, the listing field becomes absent instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyType {
    Casa,
    Apartamento,
    Lote,
    Local,
    Oficina,
    Finca,
    Parqueadero,
    Consultorio,
    Edificio,
    Apartaestudio,
    #[serde(rename = "Cabaña")]
    Cabana,
    #[serde(rename = "Casa Campestre")]
    CasaCampestre,
    #[serde(rename = "Casa Lote")]
    CasaLote,
    #[serde(rename = "Habitación")]
    Habitacion,
    Bodega,
    Unknown,
}

impl PropertyType {
    pub const KNOWN: [PropertyType; 15] = [
        PropertyType::Casa,
        PropertyType::Apartamento,
        PropertyType::Lote,
        PropertyType::Local,
        PropertyType::Oficina,
        PropertyType::Finca,
        PropertyType::Parqueadero,
        PropertyType::Consultorio,
        PropertyType::Edificio,
        PropertyType::Apartaestudio,
        PropertyType::Cabana,
        PropertyType::CasaCampestre,
        PropertyType::CasaLote,
        PropertyType::Habitacion,
        PropertyType::Bodega,
    ];

    /// Maps the search API's `property_type_id`.
    pub fn from_code(code: i64) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|kind| kind.code() == Some(code))
            .unwrap_or(Self::Unknown)
    }

    pub fn code(self) -> Option<i64> {
        let code = match self {
            Self::Casa => 1,
            Self::Apartamento => 2,
            Self::Lote => 3,
            Self::Local => 4,
            Self::Oficina => 5,
            Self::Finca => 6,
            Self::Parqueadero => 8,
            Self::Consultorio => 9,
            Self::Edificio => 10,
            Self::Apartaestudio => 14,
            Self::Cabana => 15,
            Self::CasaCampestre => 16,
            Self::CasaLote => 17,
            Self::Habitacion => 18,
            Self::Bodega => 19,
            Self::Unknown => return None,
        };
        Some(code)
    }

    /// `None` for the unknown sentinel.
    pub fn known(self) -> Option<Self> {
        (self != Self::Unknown).then_some(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Casa => "Casa",
            Self::Apartamento => "Apartamento",
            Self::Lote => "Lote",
            Self::Local => "Local",
            Self::Oficina => "Oficina",
            Self::Finca => "Finca",
            Self::Parqueadero => "Parqueadero",
            Self::Consultorio => "Consultorio",
            Self::Edificio => "Edificio",
            Self::Apartaestudio => "Apartaestudio",
            Self::Cabana => "Cabaña",
            Self::CasaCampestre => "Casa Campestre",
            Self::CasaLote => "Casa Lote",
            Self::Habitacion => "Habitación",
            Self::Bodega => "Bodega",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::KNOWN
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownCategory {
                kind: "property type",
                value: s.to_string(),
            })
    }
}

/// Age bucket of the building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AntiquityBucket {
    #[serde(rename = "Menor a 1 año")]
    LessThanOneYear,
    #[serde(rename = "De 1 a 8 años")]
    OneToEightYears,
    #[serde(rename = "De 9 a 15 años")]
    NineToFifteenYears,
    #[serde(rename = "De 16 a 30 años")]
    SixteenToThirtyYears,
    #[serde(rename = "Más de 30 años")]
    MoreThanThirtyYears,
    Unknown,
}

impl AntiquityBucket {
    const KNOWN: [AntiquityBucket; 5] = [
        AntiquityBucket::LessThanOneYear,
        AntiquityBucket::OneToEightYears,
        AntiquityBucket::NineToFifteenYears,
        AntiquityBucket::SixteenToThirtyYears,
        AntiquityBucket::MoreThanThirtyYears,
    ];

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::LessThanOneYear,
            2 => Self::OneToEightYears,
            3 => Self::NineToFifteenYears,
            4 => Self::SixteenToThirtyYears,
            5 => Self::MoreThanThirtyYears,
            _ => Self::Unknown,
        }
    }

    pub fn known(self) -> Option<Self> {
        (self != Self::Unknown).then_some(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LessThanOneYear => "Menor a 1 año",
            Self::OneToEightYears => "De 1 a 8 años",
            Self::NineToFifteenYears => "De 9 a 15 años",
            Self::SixteenToThirtyYears => "De 16 a 30 años",
            Self::MoreThanThirtyYears => "Más de 30 años",
            Self::Unknown => "Unknown",
        }
    }
}

impl FromStr for AntiquityBucket {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::KNOWN
            .into_iter()
            .find(|bucket| bucket.as_str() == s)
            .ok_or_else(|| UnknownCategory {
                kind: "antiquity bucket",
                value: s.to_string(),
            })
    }
}

/// One real-estate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
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
    pub property_type: Option<PropertyType>,
    pub operation_type: Option<OperationType>,
    pub antiquity: Option<AntiquityBucket>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub description: String,
    pub link: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub batch_id: Option<String>,
}

impl Listing {
    /// Creates a listing with every optional field absent.
    pub fn new(source: impl Into<String>, web_property_code: impl Into<String>) -> Self {
        let source = source.into();
        let web_property_code = web_property_code.into();
        Self {
            id: listing_id(&source, &web_property_code),
            source,
            web_property_code,
            price: None,
            price_admin_included: None,
            area: None,
            built_area: None,
            private_area: None,
            floor: None,
            rooms: None,
            bedrooms: None,
            bathrooms: None,
            garage_count: None,
            stratum: None,
            construction_year: None,
            property_type: None,
            operation_type: None,
            antiquity: None,
            latitude: None,
            longitude: None,
            description: String::new(),
            link: None,
            scraped_at: None,
            batch_id: None,
        }
    }

    /// Stratum is only meaningful on the 1 to 6 scale.
    pub fn with_stratum(mut self, stratum: Option<i32>) -> Self {
        self.stratum = stratum.filter(|value| (1..=6).contains(value));
        self
    }

    /// Stamps the run provenance.
    pub fn attach_batch(&mut self, batch_id: &str, scraped_at: DateTime<Utc>) {
        self.batch_id = Some(batch_id.to_string());
        self.scraped_at = Some(scraped_at);
    }

    /// Vector store payload: every field except the description.
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("description");
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_id_depends_only_on_natural_key() {
        let first = Listing::new(FINCA_RAIZ_SOURCE, "191919");
        let mut second = Listing::new(FINCA_RAIZ_SOURCE, "191919");
        second.price = Some(1_000.0);
        second.attach_batch("2026-01-01_00-00-00", Utc::now());

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, listing_id(FINCA_RAIZ_SOURCE, "191919"));
        assert_ne!(first.id, listing_id("Other", "191919"));
        assert_ne!(first.id, listing_id(FINCA_RAIZ_SOURCE, "191920"));
    }

    #[test]
    fn unknown_codes_map_to_sentinel() {
        assert_eq!(PropertyType::from_code(14), PropertyType::Apartaestudio);
        assert_eq!(PropertyType::from_code(7), PropertyType::Unknown);
        assert_eq!(PropertyType::from_code(7).known(), None);
        assert_eq!(AntiquityBucket::from_code(9).known(), None);
        assert_eq!(OperationType::from_code(3), None);
        assert_eq!(OperationType::from_code(2), Some(OperationType::Arriendo));
    }

    #[test]
    fn labels_round_trip_through_from_str() {
        for kind in PropertyType::KNOWN {
            assert_eq!(kind.as_str().parse::<PropertyType>(), Ok(kind));
        }
        assert!("Unknown".parse::<PropertyType>().is_err());
        assert_eq!("Venta".parse::<OperationType>(), Ok(OperationType::Venta));
    }

    #[test]
    fn stratum_outside_scale_is_dropped() {
        let listing = Listing::new(FINCA_RAIZ_SOURCE, "1").with_stratum(Some(9));
        assert_eq!(listing.stratum, None);
        let listing = Listing::new(FINCA_RAIZ_SOURCE, "1").with_stratum(Some(4));
        assert_eq!(listing.stratum, Some(4));
    }

    #[test]
    fn payload_omits_description() {
        let mut listing = Listing::new(FINCA_RAIZ_SOURCE, "42");
        listing.description = "Apartamento iluminado".to_string();
        listing.property_type = Some(PropertyType::Cabana);
        listing.price = Some(300.0);

        let payload = listing.payload();

        assert!(payload.get("description").is_none());
        assert_eq!(payload["property_type"], "Cabaña");
        assert_eq!(payload["price"], 300.0);
    }
}
