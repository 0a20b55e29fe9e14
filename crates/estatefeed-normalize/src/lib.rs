//! Feed normalizer: one raw feed object in, one canonical listing out. No I/O.

use estatefeed_core::{CanonicalListing, ListingType, RawListing};
use thiserror::Error;

pub mod feed;

pub use feed::{
    resolve, CommercialAddress, CommercialListing, DomesticAddress, FeedCategory, FeedListing,
    InternationalAddress, RentalCondition, RentalTerms, ResidentialAddress, ResidentialListing,
    SaleCondition, SaleTerms,
};

pub const CRATE_NAME: &str = "estatefeed-normalize";

pub const ASKING_PRICE: &str = "Asking price";
pub const ON_REQUEST: &str = "on request";
pub const RENTAL_PRICE: &str = "Rental price";

/// Raised before any store interaction; a record that fails here is never written.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("listing {system_id}: malformed {section}: {source}")]
    Malformed {
        system_id: String,
        section: &'static str,
        source: serde_json::Error,
    },
    #[error("listing {system_id}: missing {field}")]
    MissingField {
        system_id: String,
        field: &'static str,
    },
    #[error("listing {system_id}: invalid {field} value {value:?}")]
    InvalidValue {
        system_id: String,
        field: &'static str,
        value: String,
    },
}

impl NormalizeError {
    pub(crate) fn invalid(system_id: &str, field: &'static str, value: &str) -> Self {
        Self::InvalidValue {
            system_id: system_id.to_string(),
            field,
            value: value.to_string(),
        }
    }

    pub fn system_id(&self) -> &str {
        match self {
            NormalizeError::Malformed { system_id, .. }
            | NormalizeError::MissingField { system_id, .. }
            | NormalizeError::InvalidValue { system_id, .. } => system_id,
        }
    }
}

/// Normalize one raw feed object.
pub fn normalize(raw: &RawListing) -> Result<CanonicalListing, NormalizeError> {
    let feed = resolve(raw)?;
    Ok(project(feed, raw.to_json_string()))
}

/// Flatten an already resolved feed object; `raw` is stored verbatim.
pub fn project(feed: FeedListing, raw: String) -> CanonicalListing {
    let mut listing = CanonicalListing {
        system_id: feed.system_id,
        object_code: feed.object_code,
        listing_type: ListingType::Other,
        property_type: None,
        street: None,
        number: None,
        number_addition: None,
        postcode: None,
        city: None,
        country: None,
        object_status: None,
        buy: false,
        buy_price: None,
        buy_prefix: None,
        buy_suffix: None,
        rent: false,
        rent_price: None,
        rent_prefix: None,
        rent_suffix: None,
        last_changed: feed.last_changed,
        raw,
    };

    let (sale, rental) = match feed.category {
        FeedCategory::Residential(residential) => {
            listing.listing_type = ListingType::Residential;
            listing.property_type = Some(residential.property_type);
            match residential.address {
                ResidentialAddress::Domestic(address) => {
                    listing.street = address.street;
                    listing.number = address.number;
                    listing.number_addition = address.number_addition;
                    listing.postcode = address.postcode;
                    listing.city = address.city;
                    listing.country = address.country;
                }
                ResidentialAddress::International(address) => {
                    listing.street = address.street();
                    listing.city = address.city;
                    listing.country = address.country;
                }
            }
            listing.object_status = residential.status;
            (residential.sale, residential.rental)
        }
        FeedCategory::Commercial(commercial) => {
            listing.listing_type = ListingType::Commercial;
            listing.property_type = Some(commercial.property_type);
            listing.street = commercial.address.street;
            listing.number = commercial.address.number;
            listing.number_addition = commercial.address.number_addition;
            listing.postcode = commercial.address.postcode;
            listing.city = commercial.address.city;
            listing.object_status = commercial.status;
            (commercial.sale, commercial.rental)
        }
        FeedCategory::Other { sale, rental } => (sale, rental),
    };

    if let Some(sale) = sale {
        let (prefix, suffix) = sale_labels(sale.prefix.as_deref(), sale.condition);
        listing.buy = true;
        listing.buy_price = sale.price;
        listing.buy_prefix = Some(prefix);
        listing.buy_suffix = Some(suffix);
    }

    if let Some(rental) = rental {
        listing.rent = true;
        listing.rent_price = rental.price;
        listing.rent_prefix = Some(RENTAL_PRICE.to_string());
        listing.rent_suffix = Some(rental_suffix(rental.condition).to_string());
    }

    listing
}

/// The "price on request" marker, in English or as the feed spells it.
pub fn is_price_on_request(prefix: &str) -> bool {
    matches!(prefix, "price on request" | "prijs op aanvraag")
}

/// Display prefix and suffix for a sale price.
///
/// A price-on-request marker wins over any sale condition. Otherwise a non-empty upstream
/// prefix is kept with its first character upper-cased, an absent or empty one falls back to
/// [`ASKING_PRICE`], and the suffix follows the sale condition.
pub fn sale_labels(prefix: Option<&str>, condition: SaleCondition) -> (String, String) {
    if prefix.is_some_and(is_price_on_request) {
        return (ASKING_PRICE.to_string(), ON_REQUEST.to_string());
    }

    let prefix = match prefix {
        Some(p) if !p.is_empty() => capitalize_first(p),
        _ => ASKING_PRICE.to_string(),
    };
    let suffix = match condition {
        SaleCondition::CostsToBuyer => "k.k.",
        SaleCondition::FreeOfTransferTax => "v.o.n.",
        SaleCondition::Unspecified => "",
    };
    (prefix, suffix.to_string())
}

pub fn rental_suffix(condition: RentalCondition) -> &'static str {
    match condition {
        RentalCondition::PerYear => "/ yr.",
        RentalCondition::PerSquareMeterPerYear => "/ m<sup>2</sup> / yr.",
        RentalCondition::PerMonth => "/ mo.",
    }
}

fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => {
            let mut s = String::with_capacity(value.len());
            s.extend(first.to_uppercase());
            s.push_str(chars.as_str());
            s
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use estatefeed_core::PropertyType;
    use serde_json::{json, Value as JsonValue};

    fn residential(details: JsonValue) -> RawListing {
        RawListing::new(json!({
            "ObjectSystemID": "RES-1",
            "ObjectCode": "W-001",
            "Wonen": { "Woonhuis": { "TypeWoning": "eengezinswoning" } },
            "ObjectDetails": details,
        }))
    }

    fn commercial(details: JsonValue) -> RawListing {
        RawListing::new(json!({
            "ObjectSystemID": "BOG-1",
            "ObjectCode": "B-001",
            "Gebouw": { "Winkelruimte": {} },
            "ObjectDetails": details,
        }))
    }

    fn domestic_details() -> JsonValue {
        json!({
            "Adres": {
                "Nederlands": {
                    "Straatnaam": "Keizersgracht",
                    "Huisnummer": 12,
                    "HuisnummerToevoeging": "A",
                    "Postcode": "1015CS",
                    "Woonplaats": "Amsterdam",
                    "Land": "NL"
                }
            },
            "StatusBeschikbaarheid": { "Status": "beschikbaar" },
            "DatumWijziging": "2026-03-14"
        })
    }

    fn commercial_details() -> JsonValue {
        json!({
            "Adres": {
                "Straatnaam": "Coolsingel",
                "Huisnummer": { "Hoofdnummer": "40" },
                "Postcode": "3011AD",
                "Woonplaats": "Rotterdam"
            },
            "Status": { "StatusType": "beschikbaar" },
            "DatumWijziging": "2026-01-02T09:30:00"
        })
    }

    fn with(mut details: JsonValue, key: &str, block: JsonValue) -> JsonValue {
        details
            .as_object_mut()
            .expect("details object")
            .insert(key.to_string(), block);
        details
    }

    #[test]
    fn residential_domestic_address_is_copied_field_by_field() {
        let listing = normalize(&residential(domestic_details())).unwrap();
        assert_eq!(listing.system_id, "RES-1");
        assert_eq!(listing.object_code.as_deref(), Some("W-001"));
        assert_eq!(listing.listing_type, ListingType::Residential);
        assert_eq!(listing.property_type, Some(PropertyType::House));
        assert_eq!(listing.street.as_deref(), Some("Keizersgracht"));
        assert_eq!(listing.number.as_deref(), Some("12"));
        assert_eq!(listing.number_addition.as_deref(), Some("A"));
        assert_eq!(listing.postcode.as_deref(), Some("1015CS"));
        assert_eq!(listing.city.as_deref(), Some("Amsterdam"));
        assert_eq!(listing.country.as_deref(), Some("NL"));
        assert_eq!(listing.object_status.as_deref(), Some("beschikbaar"));
        assert_eq!(listing.last_changed, NaiveDate::from_ymd_opt(2026, 3, 14));
        assert!(!listing.buy && !listing.rent);
        assert!(listing.pricing_is_consistent());
    }

    #[test]
    fn missing_addition_is_null() {
        let mut details = domestic_details();
        details["Adres"]["Nederlands"]
            .as_object_mut()
            .unwrap()
            .remove("HuisnummerToevoeging");
        let listing = normalize(&residential(details)).unwrap();
        assert_eq!(listing.number_addition, None);
    }

    #[test]
    fn international_address_joins_lines_and_nulls_number_fields() {
        let details = json!({
            "Adres": {
                "Internationaal": {
                    "Adresregel1": "Rue de la Loi 16",
                    "Adresregel2": "Bus 3",
                    "Woonplaats": "Brussel",
                    "Land": "BE"
                }
            },
            "StatusBeschikbaarheid": { "Status": "verkocht" }
        });
        let listing = normalize(&residential(details)).unwrap();
        assert_eq!(listing.street.as_deref(), Some("Rue de la Loi 16 Bus 3"));
        assert_eq!(listing.number, None);
        assert_eq!(listing.number_addition, None);
        assert_eq!(listing.postcode, None);
        assert_eq!(listing.city.as_deref(), Some("Brussel"));
        assert_eq!(listing.country.as_deref(), Some("BE"));
        assert_eq!(listing.last_changed, None);
    }

    #[test]
    fn international_address_without_second_line() {
        let details = json!({
            "Adres": { "Internationaal": { "Adresregel1": "Calle Mayor 1", "Woonplaats": "Madrid", "Land": "ES" } },
            "StatusBeschikbaarheid": { "Status": "beschikbaar" }
        });
        let listing = normalize(&residential(details)).unwrap();
        assert_eq!(listing.street.as_deref(), Some("Calle Mayor 1"));
    }

    #[test]
    fn domestic_form_wins_when_both_are_present() {
        let mut details = domestic_details();
        details["Adres"]["Internationaal"] = json!({ "Adresregel1": "ignored" });
        let listing = normalize(&residential(details)).unwrap();
        assert_eq!(listing.street.as_deref(), Some("Keizersgracht"));
    }

    #[test]
    fn residential_subtypes_resolve() {
        let mut raw = residential(domestic_details()).into_value();
        raw["Wonen"] = json!({ "Appartement": { "Soort": "bovenwoning" } });
        let listing = normalize(&RawListing::new(raw.clone())).unwrap();
        assert_eq!(listing.property_type, Some(PropertyType::Apartment));

        raw["Wonen"] = json!({ "Recreatiewoning": {} });
        let listing = normalize(&RawListing::new(raw)).unwrap();
        assert_eq!(listing.property_type, Some(PropertyType::Other));
    }

    #[test]
    fn commercial_address_has_no_country() {
        let listing = normalize(&commercial(commercial_details())).unwrap();
        assert_eq!(listing.listing_type, ListingType::Commercial);
        assert_eq!(listing.property_type, Some(PropertyType::RetailSpace));
        assert_eq!(listing.street.as_deref(), Some("Coolsingel"));
        assert_eq!(listing.number.as_deref(), Some("40"));
        assert_eq!(listing.number_addition, None);
        assert_eq!(listing.postcode.as_deref(), Some("3011AD"));
        assert_eq!(listing.city.as_deref(), Some("Rotterdam"));
        assert_eq!(listing.country, None);
        assert_eq!(listing.object_status.as_deref(), Some("beschikbaar"));
        assert_eq!(listing.last_changed, NaiveDate::from_ymd_opt(2026, 1, 2));
    }

    #[test]
    fn commercial_subtypes_resolve() {
        let mut raw = commercial(commercial_details()).into_value();
        raw["Gebouw"] = json!({ "Bedrijfsruimte": {} });
        assert_eq!(
            normalize(&RawListing::new(raw.clone())).unwrap().property_type,
            Some(PropertyType::BusinessSpace)
        );
        raw["Gebouw"] = json!({ "Kantoorruimte": {} });
        assert_eq!(
            normalize(&RawListing::new(raw)).unwrap().property_type,
            Some(PropertyType::Other)
        );
    }

    #[test]
    fn residential_marker_takes_precedence_over_building() {
        let mut raw = residential(domestic_details()).into_value();
        raw["Gebouw"] = json!({ "Winkelruimte": {} });
        let listing = normalize(&RawListing::new(raw)).unwrap();
        assert_eq!(listing.listing_type, ListingType::Residential);
    }

    #[test]
    fn other_category_only_carries_pricing() {
        let raw = RawListing::new(json!({
            "ObjectSystemID": 77,
            "ObjectDetails": {
                "Koop": { "Koopprijs": 100000, "KoopConditie": "kosten koper" },
                "Huur": { "Huurprijs": 900 },
                "Adres": { "Straatnaam": "ignored" },
                "DatumWijziging": "2025-12-31"
            }
        }));
        let listing = normalize(&raw).unwrap();
        assert_eq!(listing.system_id, "77");
        assert_eq!(listing.object_code, None);
        assert_eq!(listing.listing_type, ListingType::Other);
        assert_eq!(listing.property_type, None);
        assert_eq!(listing.street, None);
        assert_eq!(listing.object_status, None);
        assert!(listing.buy);
        assert_eq!(listing.buy_price, None);
        assert_eq!(listing.buy_prefix.as_deref(), Some(ASKING_PRICE));
        assert_eq!(listing.buy_suffix.as_deref(), Some("k.k."));
        assert!(listing.rent);
        assert_eq!(listing.rent_price, None);
        assert_eq!(listing.rent_suffix.as_deref(), Some("/ mo."));
    }

    #[test]
    fn price_on_request_ignores_condition() {
        for marker in ["price on request", "prijs op aanvraag"] {
            for condition in ["kosten koper", "vrij op naam", ""] {
                let details = with(
                    domestic_details(),
                    "Koop",
                    json!({ "Prijsvoorvoegsel": marker, "KoopConditie": condition, "Koopprijs": "0" }),
                );
                let listing = normalize(&residential(details)).unwrap();
                assert_eq!(listing.buy_prefix.as_deref(), Some("Asking price"));
                assert_eq!(listing.buy_suffix.as_deref(), Some("on request"));
            }
        }
    }

    #[test]
    fn price_on_request_is_case_sensitive() {
        let (prefix, suffix) = sale_labels(Some("Price on request"), SaleCondition::Unspecified);
        assert_eq!(prefix, "Price on request");
        assert_eq!(suffix, "");
    }

    #[test]
    fn sale_prefix_is_capitalized_and_suffix_follows_condition() {
        assert_eq!(
            sale_labels(Some("vanaf"), SaleCondition::CostsToBuyer),
            ("Vanaf".to_string(), "k.k.".to_string())
        );
        assert_eq!(
            sale_labels(Some("vraagprijs"), SaleCondition::FreeOfTransferTax),
            ("Vraagprijs".to_string(), "v.o.n.".to_string())
        );
        assert_eq!(
            sale_labels(None, SaleCondition::Unspecified),
            ("Asking price".to_string(), String::new())
        );
        assert_eq!(
            sale_labels(Some(""), SaleCondition::CostsToBuyer),
            ("Asking price".to_string(), "k.k.".to_string())
        );
    }

    #[test]
    fn sale_conditions_accept_both_spellings() {
        assert_eq!(SaleCondition::from_feed(Some("costs to buyer")), SaleCondition::CostsToBuyer);
        assert_eq!(SaleCondition::from_feed(Some("kosten koper")), SaleCondition::CostsToBuyer);
        assert_eq!(
            SaleCondition::from_feed(Some("free of transfer tax")),
            SaleCondition::FreeOfTransferTax
        );
        assert_eq!(SaleCondition::from_feed(Some("Kosten Koper")), SaleCondition::Unspecified);
        assert_eq!(SaleCondition::from_feed(None), SaleCondition::Unspecified);
    }

    #[test]
    fn residential_sale_reads_direct_price() {
        let details = with(
            domestic_details(),
            "Koop",
            json!({ "Koopprijs": "425000", "KoopConditie": "kosten koper" }),
        );
        let listing = normalize(&residential(details)).unwrap();
        assert!(listing.buy);
        assert_eq!(listing.buy_price, Some(425000.0));
        assert_eq!(listing.buy_prefix.as_deref(), Some("Asking price"));
        assert_eq!(listing.buy_suffix.as_deref(), Some("k.k."));
        assert!(!listing.rent);
        assert_eq!(listing.rent_prefix, None);
        assert!(listing.pricing_is_consistent());
    }

    #[test]
    fn commercial_prices_come_from_price_specification() {
        let details = with(
            with(
                commercial_details(),
                "Koop",
                json!({ "PrijsSpecificatie": { "Prijs": 1250000 }, "KoopConditie": "vrij op naam" }),
            ),
            "Huur",
            json!({ "PrijsSpecificatie": { "Prijs": "185.50" }, "HuurConditie": "per vierkante meter per jaar" }),
        );
        let listing = normalize(&commercial(details)).unwrap();
        assert_eq!(listing.buy_price, Some(1_250_000.0));
        assert_eq!(listing.buy_suffix.as_deref(), Some("v.o.n."));
        assert_eq!(listing.rent_price, Some(185.5));
        assert_eq!(listing.rent_prefix.as_deref(), Some("Rental price"));
        assert_eq!(listing.rent_suffix.as_deref(), Some("/ m<sup>2</sup> / yr."));
    }

    #[test]
    fn empty_price_blocks_read_as_unpriced_terms() {
        let details = with(with(domestic_details(), "Koop", json!("")), "Huur", json!(""));
        let listing = normalize(&residential(details)).unwrap();
        assert!(listing.buy && listing.rent);
        assert_eq!(listing.buy_price, None);
        assert_eq!(listing.buy_prefix.as_deref(), Some("Asking price"));
        assert_eq!(listing.buy_suffix.as_deref(), Some(""));
        assert_eq!(listing.rent_price, None);
        assert_eq!(listing.rent_prefix.as_deref(), Some("Rental price"));
        assert!(listing.pricing_is_consistent());

        let details = with(commercial_details(), "Koop", json!(""));
        let listing = normalize(&commercial(details)).unwrap();
        assert!(listing.buy);
        assert_eq!(listing.buy_price, None);
    }

    #[test]
    fn commercial_sale_without_price_specification_is_fatal() {
        let details = with(commercial_details(), "Koop", json!({ "KoopConditie": "kosten koper" }));
        let err = normalize(&commercial(details)).unwrap_err();
        assert!(matches!(err, NormalizeError::Malformed { section: "ObjectDetails.Koop", .. }));
        assert_eq!(err.system_id(), "BOG-1");
        assert!(err.to_string().contains("PrijsSpecificatie"));
    }

    #[test]
    fn rental_suffix_depends_only_on_condition() {
        let cases = [
            (Some("per jaar"), "/ yr."),
            (Some("per year"), "/ yr."),
            (Some("per square meter per year"), "/ m<sup>2</sup> / yr."),
            (Some("per maand"), "/ mo."),
            (Some("per week"), "/ mo."),
            (None, "/ mo."),
        ];
        for (condition, expected) in cases {
            let mut rental = json!({ "Huurprijs": 1500 });
            if let Some(condition) = condition {
                rental["HuurConditie"] = json!(condition);
            }
            let listing = normalize(&residential(with(domestic_details(), "Huur", rental))).unwrap();
            assert_eq!(listing.rent_prefix.as_deref(), Some(RENTAL_PRICE));
            assert_eq!(listing.rent_suffix.as_deref(), Some(expected), "{condition:?}");
            assert_eq!(listing.rent_price, Some(1500.0));
        }
    }

    #[test]
    fn missing_address_is_fatal() {
        let details = json!({ "StatusBeschikbaarheid": { "Status": "beschikbaar" } });
        let err = normalize(&residential(details)).unwrap_err();
        assert!(err.to_string().contains("Adres"), "{err}");
    }

    #[test]
    fn address_without_known_form_is_fatal() {
        let details = json!({
            "Adres": {},
            "StatusBeschikbaarheid": { "Status": "beschikbaar" }
        });
        let err = normalize(&residential(details)).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingField { .. }));
    }

    #[test]
    fn missing_status_block_is_fatal() {
        let mut details = commercial_details();
        details.as_object_mut().unwrap().remove("Status");
        assert!(normalize(&commercial(details)).is_err());
    }

    #[test]
    fn missing_identifier_or_details_is_fatal() {
        let err = normalize(&RawListing::new(json!({ "ObjectDetails": {} }))).unwrap_err();
        assert_eq!(err.system_id(), "<unknown>");
        assert!(normalize(&RawListing::new(json!({ "ObjectSystemID": "x" }))).is_err());
        assert!(normalize(&RawListing::new(json!([1, 2]))).is_err());
    }

    #[test]
    fn unparsable_values_are_rejected() {
        let details = with(domestic_details(), "Koop", json!({ "Koopprijs": "n.o.t.k." }));
        let err = normalize(&residential(details)).unwrap_err();
        assert!(matches!(err, NormalizeError::InvalidValue { field: "ObjectDetails.Koop.Koopprijs", .. }));

        let mut details = domestic_details();
        details["DatumWijziging"] = json!("14-03-2026");
        assert!(normalize(&residential(details)).is_err());
    }

    #[test]
    fn raw_is_a_verbatim_copy() {
        let raw = residential(with(domestic_details(), "Huur", json!({ "Huurprijs": 1200 })));
        let listing = normalize(&raw).unwrap();
        assert_eq!(RawListing::from_json_str(&listing.raw).unwrap(), raw);
    }
}
