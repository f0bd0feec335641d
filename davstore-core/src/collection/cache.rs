//! Versioned cache blobs kept under `.engine.cache/`.
//!
//! Every blob carries [`BLOB_FORMAT`]. A blob that can't be read or was
//! written by another format is a cache miss, never an error.

use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::Collection;
use crate::constants::{BLOB_FORMAT, CACHE_VERSION, ITEM_CACHE};
use crate::error::{StoreError, StoreResult};
use crate::item::{Item, ItemMeta, sha256_hex};
use crate::lock::{LockGuard, LockManager, LockMode};
use crate::pathutils::is_safe_filesystem_path_component;

#[derive(Serialize, Deserialize)]
struct Blob<T> {
    format: u32,
    data: T,
}

/// Read a blob. `Ok(None)` if it doesn't exist, `Err(reason)` if it's unusable.
pub(super) fn load_blob<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, String> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let blob: Blob<T> = serde_json::from_slice(&raw).map_err(|e| e.to_string())?;
    if blob.format != BLOB_FORMAT {
        return Err(format!("unsupported format {}", blob.format));
    }
    Ok(Some(blob.data))
}

pub(super) fn encode_blob<T: Serialize>(data: &T) -> StoreResult<Vec<u8>> {
    let blob = Blob {
        format: BLOB_FORMAT,
        data,
    };
    Ok(serde_json::to_vec(&blob).map_err(std::io::Error::from)?)
}

/// Content hash used to validate item cache entries.
pub(super) fn item_cache_hash(raw: &[u8]) -> String {
    let mut input = CACHE_VERSION.as_bytes().to_vec();
    input.extend_from_slice(raw);
    sha256_hex(&input)
}

/// Derived fields of an item, keyed by the hash of its raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct CacheEntry {
    pub hash: String,
    pub uid: Option<String>,
    pub etag: String,
    pub text: String,
    pub name: String,
    pub component_name: String,
    pub start: i64,
    pub end: i64,
}

impl CacheEntry {
    pub fn new(item: &Item, hash: String) -> StoreResult<Self> {
        let meta = item.meta()?;
        Ok(CacheEntry {
            hash,
            uid: meta.uid.clone(),
            etag: item.etag().to_string(),
            text: item.serialize().to_string(),
            name: meta.name.clone(),
            component_name: meta.component_name.clone(),
            start: meta.time_range.0,
            end: meta.time_range.1,
        })
    }

    pub fn into_item(
        self,
        collection_path: &str,
        href: &str,
        last_modified: Option<DateTime<Utc>>,
    ) -> Item {
        let meta = ItemMeta {
            name: self.name,
            component_name: self.component_name,
            uid: self.uid,
            time_range: (self.start, self.end),
        };
        Item::with_meta(collection_path, href, last_modified, self.text, self.etag, meta)
    }
}

impl Collection {
    /// Exclusive lock on the item cache, unless the storage is write locked.
    pub(super) fn acquire_cache_lock(&self) -> StoreResult<Option<LockGuard<'_>>> {
        if self.write_locked() {
            return Ok(None);
        }
        if let Some(parent) = self.item_cache_lock.path().parent() {
            self.ctx.writer.makedirs_synced(parent)?;
        }
        self.item_cache_lock.acquire(LockMode::Write).map(Some)
    }

    pub(super) fn load_item_cache(&self, href: &str, input_hash: &str) -> Option<CacheEntry> {
        let path = self.cache_folder(ITEM_CACHE).join(href);
        match load_blob::<CacheEntry>(&path) {
            Ok(Some(entry)) if entry.hash == input_hash => Some(entry),
            Ok(_) => None,
            Err(reason) => {
                warn!(
                    "Failed to load item cache entry {href:?} in {:?}: {reason}",
                    self.path
                );
                None
            }
        }
    }

    pub(super) fn store_item_cache(&self, href: &str, entry: &CacheEntry) -> StoreResult<()> {
        let folder = self.cache_folder(ITEM_CACHE);
        self.ctx.writer.makedirs_synced(&folder)?;
        self.write_blob(&folder.join(href), entry)
    }

    /// Replace a blob atomically. Permission errors are ignored, the cache is optional.
    pub(super) fn write_blob<T: Serialize>(&self, path: &Path, data: &T) -> StoreResult<()> {
        match self.ctx.writer.replace_file(path, &encode_blob(data)?) {
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::PermissionDenied => {
                debug!("Not writing cache blob {:?}: {e}", path.display());
                Ok(())
            }
            result => result,
        }
    }

    /// Write a blob in place, for directories that aren't visible yet.
    pub(super) fn write_blob_nonatomic<T: Serialize>(&self, path: &Path, data: &T) -> StoreResult<()> {
        let mut file = File::create(path)?;
        file.write_all(&encode_blob(data)?)?;
        self.ctx.writer.fsync_file(&file, path)
    }

    /// Remove cache entries whose item no longer exists. Done at most once
    /// per collection value.
    pub(super) fn clean_item_cache_once(&self) -> StoreResult<()> {
        if self.item_cache_cleaned.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.clean_item_cache()
    }

    pub(super) fn clean_item_cache(&self) -> StoreResult<()> {
        let folder = self.cache_folder(ITEM_CACHE);
        let orphans = self
            .cache_names(&folder)?
            .into_iter()
            .filter(|name| !self.filesystem_path.join(name).is_file());
        self.clean_cache(&folder, orphans, None)
    }

    /// Safe file names in a cache folder, empty if it doesn't exist.
    pub(super) fn cache_names(&self, folder: &Path) -> StoreResult<HashSet<String>> {
        let entries = match std::fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = HashSet::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().to_string();
            if is_safe_filesystem_path_component(&name) {
                names.insert(name);
            }
        }
        Ok(names)
    }

    /// Remove `names` from `folder`, only those older than `max_age` if given.
    pub(super) fn clean_cache(
        &self,
        folder: &Path,
        names: impl IntoIterator<Item = String>,
        max_age: Option<Duration>,
    ) -> StoreResult<()> {
        let age_limit = max_age.and_then(|age| SystemTime::now().checked_sub(age));
        let mut modified = false;

        for name in names {
            if !is_safe_filesystem_path_component(&name) {
                continue;
            }
            let path = folder.join(&name);
            if let Some(limit) = age_limit {
                match std::fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(mtime) if mtime <= limit => {}
                    _ => continue,
                }
            }
            debug!("Found expired item in cache: {name:?}");
            match std::fs::remove_file(&path) {
                Ok(()) => modified = true,
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if modified {
            self.ctx.writer.sync_directory(folder)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        value: String,
    }

    #[test]
    fn test_blob_round_trip_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        assert_eq!(load_blob::<Sample>(&path), Ok(None));

        let sample = Sample {
            value: "x".to_string(),
        };
        std::fs::write(&path, encode_blob(&sample).unwrap()).unwrap();
        assert_eq!(load_blob::<Sample>(&path), Ok(Some(sample)));

        std::fs::write(&path, br#"{"format": 999, "data": {"value": "x"}}"#).unwrap();
        assert!(load_blob::<Sample>(&path).is_err());

        std::fs::write(&path, b"\x00\x01garbage").unwrap();
        assert!(load_blob::<Sample>(&path).is_err());
    }

    #[test]
    fn test_item_cache_hash_depends_on_content() {
        assert_eq!(item_cache_hash(b"a"), item_cache_hash(b"a"));
        assert_ne!(item_cache_hash(b"a"), item_cache_hash(b"b"));
        assert_ne!(item_cache_hash(b"a"), sha256_hex(b"a"));
    }
}
