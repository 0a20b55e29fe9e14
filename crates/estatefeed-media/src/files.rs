use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Bytes written (or found) under the media root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub content_hash: String,
    /// Path relative to the media root, `/`-separated; this is what the catalog keeps.
    pub local_name: String,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed image files, one directory per listing.
#[derive(Debug, Clone)]
pub struct MediaFileStore {
    root: PathBuf,
}

impl MediaFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Directory name for a listing. Bytes outside `[A-Za-z0-9._-]`, and a leading `.`, are
    /// percent-encoded, so distinct ids never share a directory and none escapes the root.
    /// The empty id maps to `%`, which no encoded id can produce.
    pub fn listing_dir_name(system_id: &str) -> String {
        if system_id.is_empty() {
            return "%".to_string();
        }
        let mut name = String::with_capacity(system_id.len());
        for (i, byte) in system_id.bytes().enumerate() {
            let keep = byte.is_ascii_alphanumeric()
                || matches!(byte, b'_' | b'-')
                || (byte == b'.' && i > 0);
            if keep {
                name.push(char::from(byte));
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name
    }

    pub fn local_name(system_id: &str, content_hash: &str, extension: &str) -> String {
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        format!(
            "{}/{content_hash}.{ext}",
            Self::listing_dir_name(system_id)
        )
    }

    pub fn listing_dir(&self, system_id: &str) -> PathBuf {
        self.root.join(Self::listing_dir_name(system_id))
    }

    pub fn path_of(&self, local_name: &str) -> PathBuf {
        local_name
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Write `bytes` to `<root>/<system_id>/<sha256>.<ext>` via a temp file and rename.
    /// Identical content for the same listing is stored once.
    pub async fn store_bytes(
        &self,
        system_id: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredImage> {
        let content_hash = Self::sha256_hex(bytes);
        let local_name = Self::local_name(system_id, &content_hash, extension);
        let absolute_path = self.path_of(&local_name);
        let dir = self.listing_dir(system_id);

        let stored = |deduplicated| StoredImage {
            content_hash: content_hash.clone(),
            local_name: local_name.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating media directory {}", dir.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking media path {}", absolute_path.display()))?
        {
            return Ok(stored(true));
        }

        let temp_path = dir.join(format!(".{}.part", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("syncing {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            if err.kind() == io::ErrorKind::AlreadyExists {
                return Ok(stored(true));
            }
            return Err(err).with_context(|| {
                format!(
                    "renaming {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }
        Ok(stored(false))
    }

    /// Delete one stored file. Returns whether it existed.
    pub async fn remove_file(&self, local_name: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_of(local_name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Delete a listing's whole directory. Returns whether it existed.
    pub async fn remove_dir(&self, system_id: &str) -> io::Result<bool> {
        match fs::remove_dir_all(self.listing_dir(system_id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}
