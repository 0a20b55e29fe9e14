//! Image catalog per listing and the media cascade run before a listing is deleted.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use estatefeed_core::ImageRecord;
use sqlx::PgPool;
use thiserror::Error;

use crate::{settle, BestEffort, ListingLogger};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("image catalog: {0}")]
    Catalog(#[from] sqlx::Error),
    #[error("media files: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

/// Removes everything a listing owns outside the `property` table.
#[async_trait]
pub trait MediaUpdater: Send + Sync {
    async fn remove_all(&self, system_id: &str) -> Result<(), MediaError>;
}

/// Feed-side filenames in their desired display order. Built from a single name or any
/// sequence of names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayOrder(Vec<String>);

impl DisplayOrder {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn filenames(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for DisplayOrder {
    fn from(filename: &str) -> Self {
        Self(vec![filename.to_string()])
    }
}

impl From<String> for DisplayOrder {
    fn from(filename: String) -> Self {
        Self(vec![filename])
    }
}

impl From<Vec<String>> for DisplayOrder {
    fn from(filenames: Vec<String>) -> Self {
        Self(filenames)
    }
}

impl From<Vec<&str>> for DisplayOrder {
    fn from(filenames: Vec<&str>) -> Self {
        filenames.into_iter().collect()
    }
}

impl From<&[&str]> for DisplayOrder {
    fn from(filenames: &[&str]) -> Self {
        filenames.iter().copied().collect()
    }
}

impl From<&[String]> for DisplayOrder {
    fn from(filenames: &[String]) -> Self {
        Self(filenames.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for DisplayOrder {
    fn from(filenames: [&str; N]) -> Self {
        filenames.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for DisplayOrder {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Clone)]
pub struct MediaCatalog {
    pool: PgPool,
    logger: Arc<dyn ListingLogger>,
}

impl fmt::Debug for MediaCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCatalog").finish_non_exhaustive()
    }
}

fn image_from_row(
    (system_id, filename, local_name, display_order): (String, String, String, i32),
) -> ImageRecord {
    ImageRecord {
        system_id,
        filename,
        local_name,
        display_order,
    }
}

impl MediaCatalog {
    pub fn new(pool: PgPool, logger: Arc<dyn ListingLogger>) -> Self {
        Self { pool, logger }
    }

    pub async fn add_image(
        &self,
        system_id: &str,
        filename: &str,
        local_name: &str,
    ) -> BestEffort<()> {
        let result = sqlx::query(
            r#"INSERT INTO image ("systemId", filename, "localName") VALUES ($1, $2, $3)"#,
        )
        .bind(system_id)
        .bind(filename)
        .bind(local_name)
        .execute(&self.pool)
        .await
        .map(|_| ());
        settle(
            self.logger.as_ref(),
            Some(system_id),
            || format!("Error adding image '{filename}'"),
            result,
        )
    }

    pub async fn get_images(&self, system_id: &str) -> BestEffort<Vec<ImageRecord>> {
        let result = sqlx::query_as::<_, (String, String, String, i32)>(
            r#"
            SELECT "systemId", filename, "localName", "displayOrder"
            FROM image
            WHERE "systemId" = $1
            ORDER BY "displayOrder", filename
            "#,
        )
        .bind(system_id)
        .fetch_all(&self.pool)
        .await
        .map(|rows| rows.into_iter().map(image_from_row).collect());
        settle(
            self.logger.as_ref(),
            Some(system_id),
            || format!("Error retrieving images for property {system_id}"),
            result,
        )
    }

    /// First image by display order.
    pub async fn get_main_image(&self, system_id: &str) -> BestEffort<Option<ImageRecord>> {
        let result = sqlx::query_as::<_, (String, String, String, i32)>(
            r#"
            SELECT "systemId", filename, "localName", "displayOrder"
            FROM image
            WHERE "systemId" = $1
            ORDER BY "displayOrder", filename
            LIMIT 1
            "#,
        )
        .bind(system_id)
        .fetch_optional(&self.pool)
        .await
        .map(|row| row.map(image_from_row));
        settle(
            self.logger.as_ref(),
            Some(system_id),
            || format!("Error retrieving main image for property {system_id}"),
            result,
        )
    }

    /// Give each listed filename its position (0-based) as display order, in one statement.
    /// Images not listed keep their current order; an empty list issues no SQL.
    pub async fn update_display_order(
        &self,
        system_id: &str,
        filenames: impl Into<DisplayOrder>,
    ) -> BestEffort<()> {
        let order = filenames.into();
        if order.is_empty() {
            return BestEffort::ok(());
        }
        let result = sqlx::query(
            r#"
            UPDATE image AS i
            SET "displayOrder" = (t.position - 1)::int
            FROM UNNEST($2::text[]) WITH ORDINALITY AS t(filename, position)
            WHERE i."systemId" = $1 AND i.filename = t.filename
            "#,
        )
        .bind(system_id)
        .bind(order.filenames())
        .execute(&self.pool)
        .await
        .map(|_| ());
        settle(
            self.logger.as_ref(),
            Some(system_id),
            || format!("Error updating display order for property {system_id}"),
            result,
        )
    }

    pub async fn remove_image(&self, system_id: &str, filename: &str) -> BestEffort<()> {
        let result = sqlx::query(r#"DELETE FROM image WHERE "systemId" = $1 AND filename = $2"#)
            .bind(system_id)
            .bind(filename)
            .execute(&self.pool)
            .await
            .map(|_| ());
        settle(
            self.logger.as_ref(),
            Some(system_id),
            || format!("Error removing image '{filename}'"),
            result,
        )
    }

    /// Delete every catalog entry of a listing. Fallible, since listing removal depends on it.
    pub async fn remove_all_images(&self, system_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(r#"DELETE FROM image WHERE "systemId" = $1"#)
            .bind(system_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Cascade that only clears the image catalog.
#[derive(Debug, Clone)]
pub struct CatalogMediaUpdater {
    catalog: MediaCatalog,
}

impl CatalogMediaUpdater {
    pub fn new(catalog: MediaCatalog) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl MediaUpdater for CatalogMediaUpdater {
    async fn remove_all(&self, system_id: &str) -> Result<(), MediaError> {
        self.catalog.remove_all_images(system_id).await?;
        Ok(())
    }
}
