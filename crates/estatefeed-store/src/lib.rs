//! PostgreSQL persistence for normalized listings, the deferred removal queue and the
//! per-listing image catalog.
//!
//! Operations come in two tiers. The listing record itself (`create`, `get`, `get_ids`,
//! `update`, `remove`) returns `Result<_, StoreError>`: failures are logged and surfaced.
//! Queue and media bookkeeping returns [`BestEffort`]: failures are logged and a default value
//! is handed back instead.

use std::fmt;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

mod listings;
pub mod logger;
pub mod media;
pub mod removal;

pub use estatefeed_normalize::NormalizeError;
pub use logger::{ListingLogger, LogEntry, LogLevel, MemoryLogger, TracingLogger};
pub use media::{CatalogMediaUpdater, DisplayOrder, MediaCatalog, MediaError, MediaUpdater};
pub use removal::RemovalQueue;

pub const CRATE_NAME: &str = "estatefeed-store";

/// Reference DDL for the `property`, `remove_queue` and `image` tables.
pub const SCHEMA_SQL: &str = include_str!("../schema.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("connecting to database: {0}")]
    Connect(#[source] sqlx::Error),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("persistence failure{}: {source}", for_listing(.system_id))]
    Persistence {
        system_id: Option<String>,
        source: sqlx::Error,
    },
    #[error("media cascade failed for listing {system_id}: {source}")]
    Media {
        system_id: String,
        source: MediaError,
    },
}

fn for_listing(system_id: &Option<String>) -> String {
    match system_id {
        Some(id) => format!(" for listing {id}"),
        None => String::new(),
    }
}

impl StoreError {
    pub fn system_id(&self) -> Option<&str> {
        match self {
            StoreError::Persistence { system_id, .. } => system_id.as_deref(),
            StoreError::Media { system_id, .. } => Some(system_id),
            StoreError::Normalize(err) => Some(err.system_id()),
            StoreError::Config(_) | StoreError::Connect(_) => None,
        }
    }
}

/// Outcome of a best-effort operation. The value is always usable; `is_degraded` tells whether
/// it is the fallback substituted after a logged store failure.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestEffort<T> {
    value: T,
    degraded: bool,
}

impl<T> BestEffort<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn degraded(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Log a failed best-effort statement and fall back to `T::default()`.
pub(crate) fn settle<T: Default>(
    logger: &dyn ListingLogger,
    subject: Option<&str>,
    message: impl FnOnce() -> String,
    result: Result<T, sqlx::Error>,
) -> BestEffort<T> {
    match result {
        Ok(value) => BestEffort::ok(value),
        Err(err) => {
            logger.log(LogLevel::Error, &message(), subject, Some(&err));
            BestEffort::degraded(T::default())
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
        }
    }

    /// `DATABASE_URL` and `ESTATEFEED_MAX_CONNECTIONS`; `None` when no URL is set.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let max_connections = std::env::var("ESTATEFEED_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        Some(Self {
            url,
            max_connections,
        })
    }
}

/// Either a ready pool or the parameters to build one. A ready pool wins when both are set.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub pool: Option<PgPool>,
    pub database: Option<DatabaseOptions>,
}

impl StoreConfig {
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool: Some(pool),
            database: None,
        }
    }

    pub fn with_database(database: DatabaseOptions) -> Self {
        Self {
            pool: None,
            database: Some(database),
        }
    }

    pub async fn into_pool(self) -> Result<PgPool, StoreError> {
        if let Some(pool) = self.pool {
            return Ok(pool);
        }
        let Some(database) = self.database else {
            return Err(StoreError::Config(
                "either a connection pool or database options must be set".to_string(),
            ));
        };
        if database.url.trim().is_empty() {
            return Err(StoreError::Config("database url is empty".to_string()));
        }
        PgPoolOptions::new()
            .max_connections(database.max_connections.max(1))
            .connect(&database.url)
            .await
            .map_err(StoreError::Connect)
    }
}

/// Listing persistence with its removal queue and image catalog. Cloning is cheap; all clones
/// share one pool.
#[derive(Clone)]
pub struct ListingStore {
    pool: PgPool,
    logger: Arc<dyn ListingLogger>,
    media_updater: Arc<dyn MediaUpdater>,
    removal_queue: RemovalQueue,
    media: MediaCatalog,
}

impl fmt::Debug for ListingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingStore")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl ListingStore {
    pub fn new(
        pool: PgPool,
        logger: Arc<dyn ListingLogger>,
        media_updater: Arc<dyn MediaUpdater>,
    ) -> Self {
        Self {
            removal_queue: RemovalQueue::new(pool.clone(), logger.clone()),
            media: MediaCatalog::new(pool.clone(), logger.clone()),
            pool,
            logger,
            media_updater,
        }
    }

    /// Store whose removal cascade only clears the image catalog.
    pub fn with_catalog_media(pool: PgPool, logger: Arc<dyn ListingLogger>) -> Self {
        let updater = CatalogMediaUpdater::new(MediaCatalog::new(pool.clone(), logger.clone()));
        Self::new(pool, logger, Arc::new(updater))
    }

    pub async fn connect(
        config: StoreConfig,
        logger: Arc<dyn ListingLogger>,
        media_updater: Option<Arc<dyn MediaUpdater>>,
    ) -> Result<Self, StoreError> {
        let pool = config.into_pool().await?;
        Ok(match media_updater {
            Some(updater) => Self::new(pool, logger, updater),
            None => Self::with_catalog_media(pool, logger),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn logger(&self) -> &Arc<dyn ListingLogger> {
        &self.logger
    }

    pub fn removal_queue(&self) -> &RemovalQueue {
        &self.removal_queue
    }

    pub fn media(&self) -> &MediaCatalog {
        &self.media
    }

    /// Log a critical-path failure and wrap it for the caller.
    fn critical(&self, message: String, subject: Option<&str>, source: sqlx::Error) -> StoreError {
        self.logger
            .log(LogLevel::Error, &message, subject, Some(&source));
        StoreError::Persistence {
            system_id: subject.map(str::to_string),
            source,
        }
    }
}
