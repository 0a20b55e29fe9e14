//! Typed view of one feed object.
//!
//! The upstream JSON decides category, subtype and address form by the mere presence of
//! keys. That probing happens exactly once, in [`resolve`]; everything downstream works on
//! [`FeedListing`], whose variants only carry the fields valid for their shape.

use chrono::NaiveDate;
use estatefeed_core::{PropertyType, RawListing};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::NormalizeError;

const UNKNOWN_ID: &str = "<unknown>";

#[derive(Debug, Clone, PartialEq)]
pub struct FeedListing {
    pub system_id: String,
    pub object_code: Option<String>,
    pub last_changed: Option<NaiveDate>,
    pub category: FeedCategory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedCategory {
    Residential(ResidentialListing),
    Commercial(CommercialListing),
    /// Neither a residential nor a building marker: only pricing survives.
    Other {
        sale: Option<SaleTerms>,
        rental: Option<RentalTerms>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidentialListing {
    pub property_type: PropertyType,
    pub address: ResidentialAddress,
    pub status: Option<String>,
    pub sale: Option<SaleTerms>,
    pub rental: Option<RentalTerms>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResidentialAddress {
    Domestic(DomesticAddress),
    International(InternationalAddress),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DomesticAddress {
    pub street: Option<String>,
    pub number: Option<String>,
    pub number_addition: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InternationalAddress {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl InternationalAddress {
    /// First address line, with the second one appended after a space when present.
    pub fn street(&self) -> Option<String> {
        match (&self.line1, &self.line2) {
            (Some(first), Some(second)) => Some(format!("{first} {second}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(second)) => Some(second.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommercialListing {
    pub property_type: PropertyType,
    pub address: CommercialAddress,
    pub status: Option<String>,
    pub sale: Option<SaleTerms>,
    pub rental: Option<RentalTerms>,
}

/// Buildings never carry a country upstream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommercialAddress {
    pub street: Option<String>,
    pub number: Option<String>,
    pub number_addition: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleTerms {
    pub prefix: Option<String>,
    pub condition: SaleCondition,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RentalTerms {
    pub condition: RentalCondition,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleCondition {
    CostsToBuyer,
    FreeOfTransferTax,
    Unspecified,
}

impl SaleCondition {
    /// The feed's own Dutch literals are accepted next to their English renderings.
    pub fn from_feed(value: Option<&str>) -> Self {
        match value {
            Some("costs to buyer" | "kosten koper") => SaleCondition::CostsToBuyer,
            Some("free of transfer tax" | "vrij op naam") => SaleCondition::FreeOfTransferTax,
            _ => SaleCondition::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentalCondition {
    PerYear,
    PerSquareMeterPerYear,
    PerMonth,
}

impl RentalCondition {
    /// Anything unrecognised, including an absent condition, is a monthly rent.
    pub fn from_feed(value: Option<&str>) -> Self {
        match value {
            Some("per year" | "per jaar") => RentalCondition::PerYear,
            Some("per square meter per year" | "per vierkante meter per jaar") => {
                RentalCondition::PerSquareMeterPerYear
            }
            _ => RentalCondition::PerMonth,
        }
    }
}

/// Leaf value; the XML-to-JSON conversion upstream renders numbers either way.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
            Scalar::Flag(b) => b.to_string(),
        }
    }
}

fn text(value: Option<Scalar>) -> Option<String> {
    value.map(Scalar::into_text)
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "ObjectSystemID")]
    system_id: Scalar,
    #[serde(rename = "ObjectCode", default)]
    object_code: Option<Scalar>,
    #[serde(rename = "Wonen", default)]
    residential: Option<JsonValue>,
    #[serde(rename = "Gebouw", default)]
    building: Option<JsonValue>,
    #[serde(rename = "ObjectDetails")]
    details: JsonValue,
}

#[derive(Debug, Deserialize)]
struct WireCommon {
    #[serde(rename = "Koop", default)]
    sale: Option<JsonValue>,
    #[serde(rename = "Huur", default)]
    rental: Option<JsonValue>,
    #[serde(rename = "DatumWijziging", default)]
    last_changed: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct WireResidentialDetails {
    #[serde(rename = "Adres")]
    address: WireResidentialAddress,
    #[serde(rename = "StatusBeschikbaarheid")]
    status: WireResidentialStatus,
}

#[derive(Debug, Deserialize)]
struct WireResidentialAddress {
    #[serde(rename = "Nederlands", default)]
    domestic: Option<WireDomesticAddress>,
    #[serde(rename = "Internationaal", default)]
    international: Option<WireInternationalAddress>,
}

#[derive(Debug, Deserialize)]
struct WireDomesticAddress {
    #[serde(rename = "Straatnaam", default)]
    street: Option<Scalar>,
    #[serde(rename = "Huisnummer", default)]
    number: Option<Scalar>,
    #[serde(rename = "HuisnummerToevoeging", default)]
    number_addition: Option<Scalar>,
    #[serde(rename = "Postcode", default)]
    postcode: Option<Scalar>,
    #[serde(rename = "Woonplaats", default)]
    city: Option<Scalar>,
    #[serde(rename = "Land", default)]
    country: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct WireInternationalAddress {
    #[serde(rename = "Adresregel1", default)]
    line1: Option<Scalar>,
    #[serde(rename = "Adresregel2", default)]
    line2: Option<Scalar>,
    #[serde(rename = "Woonplaats", default)]
    city: Option<Scalar>,
    #[serde(rename = "Land", default)]
    country: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct WireResidentialStatus {
    #[serde(rename = "Status", default)]
    status: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct WireCommercialDetails {
    #[serde(rename = "Adres")]
    address: WireCommercialAddress,
    #[serde(rename = "Status")]
    status: WireCommercialStatus,
}

#[derive(Debug, Deserialize)]
struct WireCommercialAddress {
    #[serde(rename = "Straatnaam", default)]
    street: Option<Scalar>,
    #[serde(rename = "Huisnummer")]
    number: WireMainNumber,
    #[serde(rename = "HuisnummerToevoeging", default)]
    number_addition: Option<Scalar>,
    #[serde(rename = "Postcode", default)]
    postcode: Option<Scalar>,
    #[serde(rename = "Woonplaats", default)]
    city: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct WireMainNumber {
    #[serde(rename = "Hoofdnummer", default)]
    main: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct WireCommercialStatus {
    #[serde(rename = "StatusType", default)]
    status_type: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSale {
    #[serde(rename = "Prijsvoorvoegsel", default)]
    prefix: Option<Scalar>,
    #[serde(rename = "KoopConditie", default)]
    condition: Option<Scalar>,
    #[serde(rename = "Koopprijs", default)]
    price: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
struct WireCommercialSale {
    #[serde(rename = "Prijsvoorvoegsel", default)]
    prefix: Option<Scalar>,
    #[serde(rename = "KoopConditie", default)]
    condition: Option<Scalar>,
    #[serde(rename = "PrijsSpecificatie")]
    price_spec: WirePriceSpecification,
}

#[derive(Debug, Default, Deserialize)]
struct WireRental {
    #[serde(rename = "HuurConditie", default)]
    condition: Option<Scalar>,
    #[serde(rename = "Huurprijs", default)]
    price: Option<Scalar>,
}

#[derive(Debug, Default, Deserialize)]
struct WireCommercialRental {
    #[serde(rename = "HuurConditie", default)]
    condition: Option<Scalar>,
    #[serde(rename = "PrijsSpecificatie")]
    price_spec: WirePriceSpecification,
}

#[derive(Debug, Default, Deserialize)]
struct WirePriceSpecification {
    #[serde(rename = "Prijs", default)]
    price: Option<Scalar>,
}

fn decode<'a, T: Deserialize<'a>>(
    value: &'a JsonValue,
    system_id: &str,
    section: &'static str,
) -> Result<T, NormalizeError> {
    T::deserialize(value).map_err(|source| NormalizeError::Malformed {
        system_id: system_id.to_string(),
        section,
        source,
    })
}

/// Koop and Huur blocks. An empty element arrives as `""` rather than `{}`; any non-object
/// block reads as terms with nothing filled in.
fn decode_terms<'a, T: Deserialize<'a> + Default>(
    block: &'a JsonValue,
    system_id: &str,
    section: &'static str,
) -> Result<T, NormalizeError> {
    if block.is_object() {
        decode(block, system_id, section)
    } else {
        Ok(T::default())
    }
}

fn price(
    value: Option<Scalar>,
    system_id: &str,
    field: &'static str,
) -> Result<Option<f64>, NormalizeError> {
    match value {
        None => Ok(None),
        Some(Scalar::Number(n)) => Ok(n.as_f64()),
        Some(Scalar::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<f64>()
                .map(Some)
                .map_err(|_| NormalizeError::invalid(system_id, field, &s))
        }
        Some(Scalar::Flag(b)) => Err(NormalizeError::invalid(system_id, field, &b.to_string())),
    }
}

/// `YYYY-MM-DD`, any time-of-day suffix is ignored.
fn feed_date(value: Option<Scalar>, system_id: &str) -> Result<Option<NaiveDate>, NormalizeError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let raw = value.into_text();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
        .map(Some)
        .ok_or_else(|| NormalizeError::invalid(system_id, "ObjectDetails.DatumWijziging", &raw))
}

fn sale_terms(
    prefix: Option<Scalar>,
    condition: Option<Scalar>,
    price: Option<f64>,
) -> SaleTerms {
    let condition = text(condition);
    SaleTerms {
        prefix: text(prefix),
        condition: SaleCondition::from_feed(condition.as_deref()),
        price,
    }
}

fn rental_terms(condition: Option<Scalar>, price: Option<f64>) -> RentalTerms {
    let condition = text(condition);
    RentalTerms {
        condition: RentalCondition::from_feed(condition.as_deref()),
        price,
    }
}

/// Resolve the loosely-typed feed object into its tagged shape.
pub fn resolve(raw: &RawListing) -> Result<FeedListing, NormalizeError> {
    let hint = raw
        .system_id_hint()
        .unwrap_or_else(|| UNKNOWN_ID.to_string());
    let envelope: WireEnvelope = decode(raw.as_value(), &hint, "object")?;
    let system_id = envelope.system_id.into_text();
    let common: WireCommon = decode(&envelope.details, &system_id, "ObjectDetails")?;

    let category = if let Some(marker) = &envelope.residential {
        FeedCategory::Residential(resolve_residential(
            marker,
            &envelope.details,
            &common,
            &system_id,
        )?)
    } else if let Some(marker) = &envelope.building {
        FeedCategory::Commercial(resolve_commercial(
            marker,
            &envelope.details,
            &common,
            &system_id,
        )?)
    } else {
        let sale = match &common.sale {
            Some(block) => {
                let wire: WireSale = decode_terms(block, &system_id, "ObjectDetails.Koop")?;
                Some(sale_terms(wire.prefix, wire.condition, None))
            }
            None => None,
        };
        let rental = match &common.rental {
            Some(block) => {
                let wire: WireRental = decode_terms(block, &system_id, "ObjectDetails.Huur")?;
                Some(rental_terms(wire.condition, None))
            }
            None => None,
        };
        FeedCategory::Other { sale, rental }
    };

    let last_changed = feed_date(common.last_changed, &system_id)?;

    Ok(FeedListing {
        system_id,
        object_code: text(envelope.object_code),
        last_changed,
        category,
    })
}

fn resolve_residential(
    marker: &JsonValue,
    details: &JsonValue,
    common: &WireCommon,
    system_id: &str,
) -> Result<ResidentialListing, NormalizeError> {
    let property_type = if marker.get("Woonhuis").is_some() {
        PropertyType::House
    } else if marker.get("Appartement").is_some() {
        PropertyType::Apartment
    } else {
        PropertyType::Other
    };

    let wire: WireResidentialDetails = decode(details, system_id, "ObjectDetails")?;
    let address = match (wire.address.domestic, wire.address.international) {
        (Some(domestic), _) => ResidentialAddress::Domestic(DomesticAddress {
            street: text(domestic.street),
            number: text(domestic.number),
            number_addition: text(domestic.number_addition),
            postcode: text(domestic.postcode),
            city: text(domestic.city),
            country: text(domestic.country),
        }),
        (None, Some(international)) => ResidentialAddress::International(InternationalAddress {
            line1: text(international.line1),
            line2: text(international.line2),
            city: text(international.city),
            country: text(international.country),
        }),
        (None, None) => {
            return Err(NormalizeError::MissingField {
                system_id: system_id.to_string(),
                field: "ObjectDetails.Adres.Internationaal",
            })
        }
    };

    let sale = match &common.sale {
        Some(block) => {
            let wire: WireSale = decode_terms(block, system_id, "ObjectDetails.Koop")?;
            let amount = price(wire.price, system_id, "ObjectDetails.Koop.Koopprijs")?;
            Some(sale_terms(wire.prefix, wire.condition, amount))
        }
        None => None,
    };
    let rental = match &common.rental {
        Some(block) => {
            let wire: WireRental = decode_terms(block, system_id, "ObjectDetails.Huur")?;
            let amount = price(wire.price, system_id, "ObjectDetails.Huur.Huurprijs")?;
            Some(rental_terms(wire.condition, amount))
        }
        None => None,
    };

    Ok(ResidentialListing {
        property_type,
        address,
        status: text(wire.status.status),
        sale,
        rental,
    })
}

fn resolve_commercial(
    marker: &JsonValue,
    details: &JsonValue,
    common: &WireCommon,
    system_id: &str,
) -> Result<CommercialListing, NormalizeError> {
    let property_type = if marker.get("Winkelruimte").is_some() {
        PropertyType::RetailSpace
    } else if marker.get("Bedrijfsruimte").is_some() {
        PropertyType::BusinessSpace
    } else {
        PropertyType::Other
    };

    let wire: WireCommercialDetails = decode(details, system_id, "ObjectDetails")?;
    let address = CommercialAddress {
        street: text(wire.address.street),
        number: text(wire.address.number.main),
        number_addition: text(wire.address.number_addition),
        postcode: text(wire.address.postcode),
        city: text(wire.address.city),
    };

    let sale = match &common.sale {
        Some(block) => {
            let wire: WireCommercialSale = decode_terms(block, system_id, "ObjectDetails.Koop")?;
            let amount = price(
                wire.price_spec.price,
                system_id,
                "ObjectDetails.Koop.PrijsSpecificatie.Prijs",
            )?;
            Some(sale_terms(wire.prefix, wire.condition, amount))
        }
        None => None,
    };
    let rental = match &common.rental {
        Some(block) => {
            let wire: WireCommercialRental = decode_terms(block, system_id, "ObjectDetails.Huur")?;
            let amount = price(
                wire.price_spec.price,
                system_id,
                "ObjectDetails.Huur.PrijsSpecificatie.Prijs",
            )?;
            Some(rental_terms(wire.condition, amount))
        }
        None => None,
    };

    Ok(CommercialListing {
        property_type,
        address,
        status: text(wire.status.status_type),
        sale,
        rental,
    })
}
