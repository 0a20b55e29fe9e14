//! Local image storage for listings: downloads feed images, keeps them hash-addressed on disk
//! and mirrors them into the store's image catalog.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use estatefeed_store::{MediaCatalog, MediaError, MediaUpdater};
use serde::Serialize;
use tracing::{info, warn};

mod fetch;
mod files;

pub use fetch::{
    image_extension, image_filename, is_retryable_status, BackoffPolicy, FetchConfig, FetchError,
    FetchedImage, MediaFetcher,
};
pub use files::{MediaFileStore, StoredImage};

pub const CRATE_NAME: &str = "estatefeed-media";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageSyncSummary {
    pub downloaded: usize,
    pub deduplicated: usize,
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Media cascade that owns files on disk as well as the catalog rows pointing at them.
#[derive(Debug, Clone)]
pub struct LocalMediaUpdater {
    files: MediaFileStore,
    fetcher: Arc<MediaFetcher>,
    catalog: MediaCatalog,
}

impl LocalMediaUpdater {
    pub fn new(files: MediaFileStore, fetcher: Arc<MediaFetcher>, catalog: MediaCatalog) -> Self {
        Self {
            files,
            fetcher,
            catalog,
        }
    }

    pub fn files(&self) -> &MediaFileStore {
        &self.files
    }

    /// Bring a listing's images in line with `urls`: download and catalog new ones, drop
    /// entries no longer listed, then apply the feed order. A failed download is counted and
    /// skipped; an already cataloged image with that name is left alone.
    pub async fn sync_images(&self, system_id: &str, urls: &[String]) -> ImageSyncSummary {
        let mut summary = ImageSyncSummary::default();
        let existing: HashMap<String, String> = self
            .catalog
            .get_images(system_id)
            .await
            .into_inner()
            .into_iter()
            .map(|image| (image.filename, image.local_name))
            .collect();

        let mut wanted = Vec::with_capacity(urls.len());
        for url in urls {
            let filename = image_filename(url);
            if wanted.contains(&filename) {
                continue;
            }
            wanted.push(filename.clone());

            let fetched = match self.fetcher.fetch(system_id, url).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(system_id, url, error = %err, "image download failed");
                    summary.failed += 1;
                    continue;
                }
            };
            let extension = image_extension(&fetched.final_url, fetched.content_type.as_deref());
            let stored = match self
                .files
                .store_bytes(system_id, &extension, &fetched.body)
                .await
            {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(system_id, url, error = %format!("{err:#}"), "storing image failed");
                    summary.failed += 1;
                    continue;
                }
            };
            if stored.deduplicated {
                summary.deduplicated += 1;
            } else {
                summary.downloaded += 1;
            }

            match existing.get(&filename) {
                Some(local_name) if *local_name == stored.local_name => {}
                Some(_) => {
                    let _ = self.catalog.remove_image(system_id, &filename).await;
                    self.add(system_id, &filename, &stored.local_name, &mut summary)
                        .await;
                }
                None => {
                    self.add(system_id, &filename, &stored.local_name, &mut summary)
                        .await
                }
            }
        }

        let wanted_set: HashSet<&str> = wanted.iter().map(String::as_str).collect();
        for filename in existing.keys() {
            if !wanted_set.contains(filename.as_str()) {
                let outcome = self.catalog.remove_image(system_id, filename).await;
                if !outcome.is_degraded() {
                    summary.removed += 1;
                }
            }
        }
        self.prune_files(system_id).await;

        let _ = self.catalog.update_display_order(system_id, wanted).await;
        info!(
            system_id,
            downloaded = summary.downloaded,
            added = summary.added,
            removed = summary.removed,
            failed = summary.failed,
            "images synced"
        );
        summary
    }

    async fn add(
        &self,
        system_id: &str,
        filename: &str,
        local_name: &str,
        summary: &mut ImageSyncSummary,
    ) {
        if self
            .catalog
            .add_image(system_id, filename, local_name)
            .await
            .is_degraded()
        {
            summary.failed += 1;
        } else {
            summary.added += 1;
        }
    }

    /// Delete files in the listing directory that no catalog entry points at any more.
    async fn prune_files(&self, system_id: &str) {
        let images = self.catalog.get_images(system_id).await;
        if images.is_degraded() {
            return;
        }
        let referenced: HashSet<String> = images
            .into_inner()
            .into_iter()
            .map(|image| image.local_name)
            .collect();
        let dir = self.files.listing_dir(system_id);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return;
        };
        let dir_name = MediaFileStore::listing_dir_name(system_id);
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let local_name = format!("{dir_name}/{name}");
            if name.starts_with('.') || referenced.contains(&local_name) {
                continue;
            }
            if let Err(err) = self.files.remove_file(&local_name).await {
                warn!(system_id, local_name = %local_name, error = %err, "removing stale image failed");
            }
        }
    }
}

#[async_trait]
impl MediaUpdater for LocalMediaUpdater {
    /// Catalog rows first, then files. A failed catalog delete leaves every file in place, so
    /// no row ever points at a missing file.
    async fn remove_all(&self, system_id: &str) -> Result<(), MediaError> {
        self.catalog.remove_all_images(system_id).await?;
        self.files.remove_dir(system_id).await?;
        Ok(())
    }
}
