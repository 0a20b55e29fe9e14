use estatefeed_core::{CanonicalListing, ListingType, PropertyType, RawListing};
use estatefeed_normalize::normalize;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::{ListingStore, LogLevel, StoreError};

const LISTING_COLUMNS: &str = r#"type, "propertyType", street, number, "numberAddition", postcode,
    city, country, rent, buy, "rentPrice", "buyPrice", "systemId", "objectCode", "lastChanged",
    raw, "objectStatus", "rentPrefix", "buyPrefix", "rentSuffix", "buySuffix""#;

impl ListingStore {
    /// Normalize and insert a new listing. Normalization errors surface before any SQL runs.
    pub async fn create(&self, raw: &RawListing) -> Result<(), StoreError> {
        let listing = normalize(raw)?;
        self.create_normalized(&listing).await
    }

    pub async fn create_normalized(&self, listing: &CanonicalListing) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO property (
              type, "propertyType", street, number, "numberAddition", postcode,
              city, country, rent, buy, "rentPrice", "buyPrice", "systemId", "objectCode",
              "lastChanged", raw, "objectStatus", "rentPrefix", "buyPrefix", "rentSuffix",
              "buySuffix"
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            "#,
        )
        .bind(listing.listing_type.as_str())
        .bind(listing.property_type.map(|p| p.as_str()))
        .bind(&listing.street)
        .bind(&listing.number)
        .bind(&listing.number_addition)
        .bind(&listing.postcode)
        .bind(&listing.city)
        .bind(&listing.country)
        .bind(listing.rent)
        .bind(listing.buy)
        .bind(listing.rent_price)
        .bind(listing.buy_price)
        .bind(&listing.system_id)
        .bind(&listing.object_code)
        .bind(listing.last_changed)
        .bind(&listing.raw)
        .bind(&listing.object_status)
        .bind(&listing.rent_prefix)
        .bind(&listing.buy_prefix)
        .bind(&listing.rent_suffix)
        .bind(&listing.buy_suffix)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            self.critical(
                format!("Error creating property {}", listing.system_id),
                Some(&listing.system_id),
                err,
            )
        })?;
        Ok(())
    }

    /// Stored raw payload, byte-for-byte as it was written.
    pub async fn get(&self, system_id: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>(r#"SELECT raw FROM property WHERE "systemId" = $1"#)
            .bind(system_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| {
                self.critical(
                    format!("Error retrieving property {system_id}"),
                    Some(system_id),
                    err,
                )
            })
    }

    pub async fn get_ids(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(r#"SELECT "systemId" FROM property ORDER BY "systemId""#)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| self.critical("Error retrieving property ids".to_string(), None, err))
    }

    /// Re-normalize and overwrite every mutable column of `system_id`. Returns rows affected;
    /// an unknown id is not an error.
    pub async fn update(&self, system_id: &str, raw: &RawListing) -> Result<u64, StoreError> {
        let listing = normalize(raw)?;
        self.update_normalized(system_id, &listing).await
    }

    pub async fn update_normalized(
        &self,
        system_id: &str,
        listing: &CanonicalListing,
    ) -> Result<u64, StoreError> {
        if listing.system_id != system_id {
            self.logger.log(
                LogLevel::Warn,
                &format!(
                    "Payload id {} differs from target property; keeping {system_id}",
                    listing.system_id
                ),
                Some(system_id),
                None,
            );
        }

        let result = sqlx::query(
            r#"
            UPDATE property SET
              type = $2,
              "propertyType" = $3,
              street = $4,
              number = $5,
              "numberAddition" = $6,
              postcode = $7,
              city = $8,
              country = $9,
              rent = $10,
              buy = $11,
              "rentPrice" = $12,
              "buyPrice" = $13,
              "objectCode" = $14,
              "lastChanged" = $15,
              raw = $16,
              "objectStatus" = $17,
              "rentPrefix" = $18,
              "buyPrefix" = $19,
              "rentSuffix" = $20,
              "buySuffix" = $21
            WHERE "systemId" = $1
            "#,
        )
        .bind(system_id)
        .bind(listing.listing_type.as_str())
        .bind(listing.property_type.map(|p| p.as_str()))
        .bind(&listing.street)
        .bind(&listing.number)
        .bind(&listing.number_addition)
        .bind(&listing.postcode)
        .bind(&listing.city)
        .bind(&listing.country)
        .bind(listing.rent)
        .bind(listing.buy)
        .bind(listing.rent_price)
        .bind(listing.buy_price)
        .bind(&listing.object_code)
        .bind(listing.last_changed)
        .bind(&listing.raw)
        .bind(&listing.object_status)
        .bind(&listing.rent_prefix)
        .bind(&listing.buy_prefix)
        .bind(&listing.rent_suffix)
        .bind(&listing.buy_suffix)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            self.critical(
                format!("Error updating property {system_id}"),
                Some(system_id),
                err,
            )
        })?;
        Ok(result.rows_affected())
    }

    /// Cascade to the media updater, then delete the listing row. A media failure leaves the
    /// row in place.
    pub async fn remove(&self, system_id: &str) -> Result<(), StoreError> {
        if let Err(source) = self.media_updater.remove_all(system_id).await {
            self.logger.log(
                LogLevel::Error,
                &format!("Error removing media for property {system_id}"),
                Some(system_id),
                Some(&source),
            );
            return Err(StoreError::Media {
                system_id: system_id.to_string(),
                source,
            });
        }

        sqlx::query(r#"DELETE FROM property WHERE "systemId" = $1"#)
            .bind(system_id)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                self.critical(
                    format!("Error removing property {system_id}"),
                    Some(system_id),
                    err,
                )
            })?;
        Ok(())
    }

    /// Full normalized row as stored, without re-parsing `raw`.
    pub async fn get_listing(
        &self,
        system_id: &str,
    ) -> Result<Option<CanonicalListing>, StoreError> {
        let sql = format!(r#"SELECT {LISTING_COLUMNS} FROM property WHERE "systemId" = $1"#);
        let row = sqlx::query(&sql)
            .bind(system_id)
            .fetch_optional(&self.pool)
            .await
            .and_then(|row| row.map(|r| listing_from_row(&r)).transpose())
            .map_err(|err| {
                self.critical(
                    format!("Error retrieving property {system_id}"),
                    Some(system_id),
                    err,
                )
            })?;
        Ok(row)
    }
}

fn listing_from_row(row: &PgRow) -> Result<CanonicalListing, sqlx::Error> {
    let type_label: String = row.try_get("type")?;
    let listing_type = ListingType::parse(&type_label).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown listing type {type_label:?}").into())
    })?;
    let property_type = match row.try_get::<Option<String>, _>("propertyType")? {
        Some(label) => Some(PropertyType::parse(&label).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown property type {label:?}").into())
        })?),
        None => None,
    };

    Ok(CanonicalListing {
        system_id: row.try_get("systemId")?,
        object_code: row.try_get("objectCode")?,
        listing_type,
        property_type,
        street: row.try_get("street")?,
        number: row.try_get("number")?,
        number_addition: row.try_get("numberAddition")?,
        postcode: row.try_get("postcode")?,
        city: row.try_get("city")?,
        country: row.try_get("country")?,
        object_status: row.try_get("objectStatus")?,
        buy: row.try_get("buy")?,
        buy_price: row.try_get("buyPrice")?,
        buy_prefix: row.try_get("buyPrefix")?,
        buy_suffix: row.try_get("buySuffix")?,
        rent: row.try_get("rent")?,
        rent_price: row.try_get("rentPrice")?,
        rent_prefix: row.try_get("rentPrefix")?,
        rent_suffix: row.try_get("rentSuffix")?,
        last_changed: row.try_get("lastChanged")?,
        raw: row.try_get("raw")?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;

    use crate::{ListingStore, LogLevel, MemoryLogger, StoreError};
    use estatefeed_core::RawListing;

    async fn closed_store(logger: Arc<MemoryLogger>) -> ListingStore {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://estatefeed@127.0.0.1:1/estatefeed")
            .unwrap();
        pool.close().await;
        ListingStore::with_catalog_media(pool, logger)
    }

    fn apartment(id: &str) -> RawListing {
        RawListing::new(json!({
            "ObjectSystemID": id,
            "Wonen": { "Appartement": {} },
            "ObjectDetails": {
                "Adres": { "Nederlands": { "Woonplaats": "Utrecht" } },
                "StatusBeschikbaarheid": { "Status": "Beschikbaar" }
            }
        }))
    }

    #[tokio::test]
    async fn malformed_payload_fails_before_touching_the_pool() {
        let logger = Arc::new(MemoryLogger::new());
        let store = closed_store(logger.clone()).await;
        let raw = RawListing::new(json!({ "ObjectSystemID": "NVM-7", "Wonen": { "Woonhuis": {} } }));

        let err = store.create(&raw).await.unwrap_err();
        assert!(matches!(err, StoreError::Normalize(_)));
        assert!(logger.entries().is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_surfaces_and_logs_with_id() {
        let logger = Arc::new(MemoryLogger::new());
        let store = closed_store(logger.clone()).await;

        let err = store.create(&apartment("NVM-8")).await.unwrap_err();
        assert!(matches!(err, StoreError::Persistence { .. }));
        assert_eq!(err.system_id(), Some("NVM-8"));

        assert!(store.get("NVM-8").await.is_err());
        assert!(store.update("NVM-8", &apartment("NVM-8")).await.is_err());
        assert!(store.get_ids().await.is_err());

        let entries = logger.entries_for("NVM-8");
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.level == LogLevel::Error && e.error.is_some()));
    }

    #[tokio::test]
    async fn remove_stops_when_media_cascade_fails() {
        let logger = Arc::new(MemoryLogger::new());
        let store = closed_store(logger.clone()).await;

        let err = store.remove("NVM-9").await.unwrap_err();
        assert!(matches!(err, StoreError::Media { .. }));
        let entries = logger.entries_for("NVM-9");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("media"));
    }
}
