//! Local Directory Tier 2 Backend
//!
//! File-based record storage. Each record is one file,
//! `<root>/<namespace>/<owner_id>/<fingerprint>.rec`, laid out as
//!
//! ```text
//! [header length: u32 BE][header JSON: key, timestamps, compression][payload]
//! ```
//!
//! A record is published with a single rename, so a reader always sees the
//! header and payload of the same write. Nothing is indexed in memory, so
//! several processes can share one directory.

use super::PersistedCache;
use crate::cache::compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
use crate::cache::key::{CacheKey, KeyPattern};
use crate::cache::record::CacheRecord;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "rec";

/// Upper bound on a record header; anything larger is corruption
const MAX_HEADER_BYTES: usize = 64 * 1024;

// =============================================================================
// Local Store Configuration
// =============================================================================

/// Configuration for the local directory store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    /// Root directory for record files
    pub root_path: PathBuf,
    /// Whether to fsync data before publishing it
    pub sync_writes: bool,
    /// Payload compression
    pub compression: CompressionConfig,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("/var/cache/forecast-cache"),
            sync_writes: false,
            compression: CompressionConfig::default(),
        }
    }
}

// =============================================================================
// Record Header
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    key: CacheKey,
    computed_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    compression: CompressionAlgorithm,
    stored_bytes: u64,
}

impl StoredMetadata {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

fn encode_record(metadata: &StoredMetadata, payload: &[u8]) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(metadata)?;
    if header.len() > MAX_HEADER_BYTES {
        return Err(Error::Internal(format!(
            "Record header of {} bytes exceeds {} bytes",
            header.len(),
            MAX_HEADER_BYTES
        )));
    }

    let mut encoded = Vec::with_capacity(4 + header.len() + payload.len());
    encoded.extend_from_slice(&(header.len() as u32).to_be_bytes());
    encoded.extend_from_slice(&header);
    encoded.extend_from_slice(payload);
    Ok(encoded)
}

/// Split a record file into its header and payload (None if malformed)
fn decode_record(bytes: &[u8]) -> Option<(StoredMetadata, &[u8])> {
    let len_bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    let header_len = u32::from_be_bytes(len_bytes) as usize;
    if header_len > MAX_HEADER_BYTES {
        return None;
    }
    let header = bytes.get(4..4 + header_len)?;
    let payload = &bytes[4 + header_len..];

    let metadata: StoredMetadata = serde_json::from_slice(header).ok()?;
    if metadata.stored_bytes != payload.len() as u64 {
        return None;
    }
    Some((metadata, payload))
}

// =============================================================================
// Local Persisted Cache
// =============================================================================

/// Tier 2 cache on a local (or shared) filesystem
pub struct LocalPersistedCache {
    root_path: PathBuf,
    sync_writes: bool,
    compression: CompressionManager,
    temp_counter: AtomicU64,
}

impl LocalPersistedCache {
    /// Open a store rooted at `root_path` with default settings
    pub async fn with_path(root_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(LocalStoreConfig {
            root_path: root_path.into(),
            ..Default::default()
        })
        .await
    }

    /// Open a store, creating the root directory if needed
    pub async fn with_config(config: LocalStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_path).await?;

        debug!(
            root = %config.root_path.display(),
            compression = %config.compression.algorithm,
            "Opened local tier 2 store"
        );

        Ok(Self {
            root_path: config.root_path,
            sync_writes: config.sync_writes,
            compression: CompressionManager::with_config(config.compression),
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn owner_dir(&self, namespace: &str, owner_id: u64) -> PathBuf {
        self.root_path.join(namespace).join(owner_id.to_string())
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.owner_dir(&key.namespace, key.owner_id)
            .join(format!("{}.{}", key.fingerprint, RECORD_EXTENSION))
    }

    fn unique_suffix(&self) -> String {
        format!(
            "{}.{}",
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Write a file so readers see either the old or the new content
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Internal(format!("Invalid record path: {}", path.display())))?;
        let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, self.unique_suffix()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        if self.sync_writes {
            file.sync_all().await?;
        }
        drop(file);

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read only the header of a record file (None if missing or unreadable)
    async fn read_header(&self, path: &Path) -> Result<Option<StoredMetadata>> {
        let mut file = match fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let header_len = match file.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if header_len > MAX_HEADER_BYTES {
            warn!(path = %path.display(), "Discarding record with oversized header");
            return Ok(None);
        }

        let mut header = vec![0u8; header_len];
        match file.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        match serde_json::from_slice(&header) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable record header");
                Ok(None)
            }
        }
    }

    /// Every record file under the root
    async fn record_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for namespace_dir in list_dirs(&self.root_path).await? {
            for owner_dir in list_dirs(&namespace_dir).await? {
                files.extend(list_record_files(&owner_dir).await?);
            }
        }
        Ok(files)
    }

    /// Detach an owner directory with a rename, then delete it
    ///
    /// Writers racing the delete recreate a fresh directory instead of
    /// failing the removal.
    async fn remove_owner_dir(&self, owner_dir: &Path) -> Result<u64> {
        let owner = owner_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("owner");
        let detached = owner_dir.with_file_name(format!(".purge-{}-{}", owner, self.unique_suffix()));

        match fs::rename(owner_dir, &detached).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        let removed = list_record_files(&detached).await?.len() as u64;
        fs::remove_dir_all(&detached).await?;
        Ok(removed)
    }
}

#[async_trait]
impl PersistedCache for LocalPersistedCache {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>> {
        let path = self.record_path(key);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (metadata, stored) = match decode_record(&bytes) {
            Some(parts) => parts,
            None => {
                warn!(key = %key, "Discarding malformed tier 2 record");
                remove_if_exists(&path).await?;
                return Ok(None);
            }
        };

        if metadata.key != *key || metadata.is_expired_at(Utc::now()) {
            remove_if_exists(&path).await?;
            return Ok(None);
        }

        let value = self
            .compression
            .decompress(stored, metadata.compression)
            .and_then(|raw| Ok(serde_json::from_slice::<serde_json::Value>(&raw)?));

        match value {
            Ok(value) => Ok(Some(CacheRecord {
                key: metadata.key,
                value,
                computed_at: metadata.computed_at,
                expires_at: metadata.expires_at,
            })),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding corrupt tier 2 record");
                remove_if_exists(&path).await?;
                Ok(None)
            }
        }
    }

    async fn put(&self, record: CacheRecord) -> Result<()> {
        let path = self.record_path(&record.key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let raw = serde_json::to_vec(&record.value)?;
        let (stored, compression) = self.compression.compress(&raw);

        let metadata = StoredMetadata {
            key: record.key,
            computed_at: record.computed_at,
            expires_at: record.expires_at,
            compression,
            stored_bytes: stored.len() as u64,
        };
        self.write_atomic(&path, &encode_record(&metadata, &stored)?)
            .await?;

        debug!(
            key = %metadata.key,
            bytes = metadata.stored_bytes,
            compression = %compression,
            "Tier 2 put"
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        remove_if_exists(&self.record_path(key)).await
    }

    async fn delete_pattern(&self, pattern: &KeyPattern) -> Result<u64> {
        let owner_id = pattern.owner_id();
        let namespaces = match pattern.namespace() {
            Some(namespace) => vec![self.root_path.join(namespace)],
            None => list_dirs(&self.root_path).await?,
        };

        let mut removed = 0u64;
        for namespace_dir in namespaces {
            removed += self
                .remove_owner_dir(&namespace_dir.join(owner_id.to_string()))
                .await?;
        }

        debug!(pattern = %pattern, removed = removed, "Tier 2 pattern delete");
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut purged = 0u64;

        for path in self.record_files().await? {
            let expired = match self.read_header(&path).await? {
                Some(metadata) => metadata.is_expired_at(now),
                None => true,
            };
            if expired && remove_if_exists(&path).await? {
                purged += 1;
            }
        }

        Ok(purged)
    }

    async fn entry_count(&self) -> Result<u64> {
        Ok(self.record_files().await?.len() as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        let probe = self
            .root_path
            .join(format!(".health_check.{}", self.unique_suffix()));
        match fs::write(&probe, b"ok").await {
            Ok(_) => {
                let _ = fs::remove_file(&probe).await;
                Ok(true)
            }
            Err(e) => {
                warn!(root = %self.root_path.display(), error = %e, "Tier 2 directory not writable");
                Ok(false)
            }
        }
    }
}

// =============================================================================
// Directory Helpers
// =============================================================================

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Subdirectories of `dir`, skipping hidden (temporary or detached) entries
async fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if is_hidden(&entry.path()) {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

async fn list_record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_hidden(&path) && path.extension().map(|e| e == RECORD_EXTENSION).unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
