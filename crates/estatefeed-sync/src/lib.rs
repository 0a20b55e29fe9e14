//! Feed ingestion, the removal sweep and its cron schedule.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use estatefeed_core::RawListing;
use estatefeed_media::{FetchConfig, ImageSyncSummary, LocalMediaUpdater, MediaFetcher, MediaFileStore};
use estatefeed_normalize::normalize;
use estatefeed_store::{
    DatabaseOptions, ListingLogger, ListingStore, MediaCatalog, StoreConfig, TracingLogger,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "estatefeed-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub media_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub sweep_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            max_connections: lookup("ESTATEFEED_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            media_dir: lookup("ESTATEFEED_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./media")),
            scheduler_enabled: lookup("ESTATEFEED_SCHEDULER_ENABLED")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            sweep_cron: lookup("ESTATEFEED_SWEEP_CRON")
                .unwrap_or_else(|| "0 0 3 * * *".to_string()),
            user_agent: lookup("ESTATEFEED_USER_AGENT")
                .unwrap_or_else(|| format!("estatefeed/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: lookup("ESTATEFEED_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    pub fn database_options(&self) -> Result<DatabaseOptions> {
        let Some(url) = &self.database_url else {
            bail!("DATABASE_URL is not set");
        };
        Ok(DatabaseOptions {
            url: url.clone(),
            max_connections: self.max_connections,
        })
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..FetchConfig::default()
        }
    }
}

/// Read a feed dump: either a JSON array of listing objects or one listing object.
pub fn load_feed_file(path: &Path) -> Result<Vec<RawListing>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: JsonValue =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    match value {
        JsonValue::Array(items) => Ok(items.into_iter().map(RawListing::new).collect()),
        value @ JsonValue::Object(_) => Ok(vec![RawListing::new(value)]),
        _ => bail!(
            "{} must contain a listing object or an array of them",
            path.display()
        ),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Create or update each record. Known ids come from one `get_ids` call up front; a record
/// that fails to normalize is rejected, one the store refuses is counted as failed.
pub async fn ingest(store: &ListingStore, records: &[RawListing]) -> Result<IngestSummary> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let mut known: HashSet<String> = store
        .get_ids()
        .await
        .context("loading known listing ids")?
        .into_iter()
        .collect();

    let mut summary = IngestSummary {
        run_id,
        started_at,
        finished_at: started_at,
        created: 0,
        updated: 0,
        rejected: 0,
        failed: 0,
    };

    for raw in records {
        let listing = match normalize(raw) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(%run_id, system_id = err.system_id(), error = %err, "listing rejected");
                summary.rejected += 1;
                continue;
            }
        };
        let system_id = listing.system_id.clone();

        if known.contains(&system_id) {
            match store.update_normalized(&system_id, &listing).await {
                Ok(_) => summary.updated += 1,
                Err(err) => {
                    warn!(%run_id, system_id = %system_id, error = %err, "listing update failed");
                    summary.failed += 1;
                }
            }
        } else {
            match store.create_normalized(&listing).await {
                Ok(()) => {
                    summary.created += 1;
                    known.insert(system_id);
                }
                Err(err) => {
                    warn!(%run_id, system_id = %system_id, error = %err, "listing create failed");
                    summary.failed += 1;
                }
            }
        }
    }

    summary.finished_at = Utc::now();
    info!(
        %run_id,
        created = summary.created,
        updated = summary.updated,
        rejected = summary.rejected,
        failed = summary.failed,
        "ingest finished"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub run_id: Uuid,
    pub due: usize,
    pub removed: usize,
    pub already_gone: usize,
    pub failed: usize,
    /// The queue could not be read; nothing was attempted.
    pub degraded: bool,
}

/// Removes every listing whose queued removal date has passed, then consumes those entries.
#[derive(Debug, Clone)]
pub struct RemovalSweep {
    store: ListingStore,
}

impl RemovalSweep {
    pub fn new(store: ListingStore) -> Self {
        Self { store }
    }

    pub async fn run_once(&self) -> SweepSummary {
        let run_id = Uuid::new_v4();
        let ready = self.store.removal_queue().get_ready_for_removal().await;
        let degraded = ready.is_degraded();

        let mut seen = HashSet::new();
        let due: Vec<String> = ready
            .into_inner()
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut summary = SweepSummary {
            run_id,
            due: due.len(),
            removed: 0,
            already_gone: 0,
            failed: 0,
            degraded,
        };

        for system_id in &due {
            match self.store.get(system_id).await {
                Ok(None) => summary.already_gone += 1,
                Ok(Some(_)) => match self.store.remove(system_id).await {
                    Ok(()) => summary.removed += 1,
                    Err(err) => {
                        warn!(%run_id, system_id = %system_id, error = %err, "listing removal failed");
                        summary.failed += 1;
                        continue;
                    }
                },
                Err(err) => {
                    warn!(%run_id, system_id = %system_id, error = %err, "removal lookup failed");
                    summary.failed += 1;
                    continue;
                }
            }

            // Acted on: consume the due entries so a relisted id is not removed again.
            if let Err(err) = self.store.removal_queue().clear_due(system_id).await {
                warn!(%run_id, system_id = %system_id, error = %err, "clearing due queue entries failed");
            }
        }

        info!(
            %run_id,
            due = summary.due,
            removed = summary.removed,
            already_gone = summary.already_gone,
            failed = summary.failed,
            degraded,
            "removal sweep finished"
        );
        summary
    }
}

/// Cron scheduler running the sweep, or `None` when scheduling is disabled.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    sweep: RemovalSweep,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = &config.sweep_cron;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let sweep = sweep.clone();
        Box::pin(async move {
            let summary = sweep.run_once().await;
            if summary.failed > 0 || summary.degraded {
                warn!(run_id = %summary.run_id, failed = summary.failed, "scheduled sweep incomplete");
            }
        })
    })
    .with_context(|| format!("creating sweep job for cron {cron}"))?;
    sched.add(job).await.context("adding sweep job")?;
    Ok(Some(sched))
}

/// Store, media handling and sweep wired from one [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncPipeline {
    config: SyncConfig,
    store: ListingStore,
    media: LocalMediaUpdater,
}

impl SyncPipeline {
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        let pool = StoreConfig::with_database(config.database_options()?)
            .into_pool()
            .await
            .context("connecting listing store")?;
        let logger: Arc<dyn ListingLogger> = Arc::new(TracingLogger);
        let fetcher = MediaFetcher::new(config.fetch_config())?;
        let media = LocalMediaUpdater::new(
            MediaFileStore::new(config.media_dir.clone()),
            Arc::new(fetcher),
            MediaCatalog::new(pool.clone(), logger.clone()),
        );
        let store = ListingStore::new(pool, logger, Arc::new(media.clone()));
        Ok(Self {
            config,
            store,
            media,
        })
    }

    pub fn store(&self) -> &ListingStore {
        &self.store
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestSummary> {
        let records = load_feed_file(path)?;
        ingest(&self.store, &records).await
    }

    pub async fn sweep(&self) -> SweepSummary {
        RemovalSweep::new(self.store.clone()).run_once().await
    }

    pub async fn sync_images(&self, system_id: &str, urls: &[String]) -> ImageSyncSummary {
        self.media.sync_images(system_id, urls).await
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        maybe_build_scheduler(&self.config, RemovalSweep::new(self.store.clone())).await
    }
}
