//! Core listing model shared by the normalizer, the store and the sync driver.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "estatefeed-core";

/// One feed object exactly as the upstream delivered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawListing(JsonValue);

impl RawListing {
    pub fn new(value: JsonValue) -> Self {
        Self(value)
    }

    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text).map(Self)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        self.0
    }

    /// Compact serialization, keys in their original order.
    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }

    /// Best-effort peek at the identifier, for diagnostics on records that fail to normalize.
    pub fn system_id_hint(&self) -> Option<String> {
        match self.0.get("ObjectSystemID")? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<JsonValue> for RawListing {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingType {
    Residential,
    Commercial,
    Other,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Residential => "residential",
            ListingType::Commercial => "commercial",
            ListingType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "residential" => Some(ListingType::Residential),
            "commercial" => Some(ListingType::Commercial),
            "other" => Some(ListingType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-specific subtype. `House`/`Apartment` only occur on residential listings,
/// `RetailSpace`/`BusinessSpace` only on commercial ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyType {
    House,
    Apartment,
    RetailSpace,
    BusinessSpace,
    Other,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::House => "house",
            PropertyType::Apartment => "apartment",
            PropertyType::RetailSpace => "retail-space",
            PropertyType::BusinessSpace => "business-space",
            PropertyType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "house" => Some(PropertyType::House),
            "apartment" => Some(PropertyType::Apartment),
            "retail-space" => Some(PropertyType::RetailSpace),
            "business-space" => Some(PropertyType::BusinessSpace),
            "other" => Some(PropertyType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat, normalized projection of a listing; one `property` row per `system_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalListing {
    pub system_id: String,
    pub object_code: Option<String>,
    pub listing_type: ListingType,
    pub property_type: Option<PropertyType>,
    pub street: Option<String>,
    pub number: Option<String>,
    pub number_addition: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub object_status: Option<String>,
    pub buy: bool,
    pub buy_price: Option<f64>,
    pub buy_prefix: Option<String>,
    pub buy_suffix: Option<String>,
    pub rent: bool,
    pub rent_price: Option<f64>,
    pub rent_prefix: Option<String>,
    pub rent_suffix: Option<String>,
    pub last_changed: Option<NaiveDate>,
    pub raw: String,
}

impl CanonicalListing {
    /// Sale/rent flags agree with the nullability of their derived fields.
    pub fn pricing_is_consistent(&self) -> bool {
        let sale_ok = self.buy
            || (self.buy_price.is_none() && self.buy_prefix.is_none() && self.buy_suffix.is_none());
        let rent_ok = self.rent
            || (self.rent_price.is_none()
                && self.rent_prefix.is_none()
                && self.rent_suffix.is_none());
        sale_ok && rent_ok
    }
}

/// Pending removal of a listing. Several entries may exist for one `system_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalQueueEntry {
    pub system_id: String,
    pub removal_date: NaiveDate,
}

impl RemovalQueueEntry {
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.removal_date <= today
    }
}

/// Image attached to a listing. `filename` is the feed-side name, `local_name` where the
/// media store keeps the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub system_id: String,
    pub filename: String,
    pub local_name: String,
    pub display_order: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_listing_keeps_key_order() {
        let raw = RawListing::from_json_str(r#"{"b":1,"a":{"z":true,"y":"x"}}"#).unwrap();
        assert_eq!(raw.to_json_string(), r#"{"b":1,"a":{"z":true,"y":"x"}}"#);
    }

    #[test]
    fn system_id_hint_accepts_numbers() {
        let raw = RawListing::new(json!({ "ObjectSystemID": 1234 }));
        assert_eq!(raw.system_id_hint().as_deref(), Some("1234"));
        assert_eq!(RawListing::new(json!({})).system_id_hint(), None);
    }

    #[test]
    fn enum_labels_round_trip() {
        for t in [ListingType::Residential, ListingType::Commercial, ListingType::Other] {
            assert_eq!(ListingType::parse(t.as_str()), Some(t));
        }
        for p in [
            PropertyType::House,
            PropertyType::Apartment,
            PropertyType::RetailSpace,
            PropertyType::BusinessSpace,
            PropertyType::Other,
        ] {
            assert_eq!(PropertyType::parse(p.as_str()), Some(p));
        }
        assert_eq!(ListingType::parse("wonen"), None);
    }

    #[test]
    fn removal_entry_due_on_its_date() {
        let entry = RemovalQueueEntry {
            system_id: "a".into(),
            removal_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        assert!(entry.is_due(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()));
        assert!(!entry.is_due(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
    }
}
