//! Collections: directories of items with metadata.
//!
//! ```text
//! <collection>/
//!   <href>                          one file per item
//!   .engine.props                   metadata (JSON string map)
//!   .engine.cache/item/<href>       derived item fields
//!   .engine.cache/history/<href>    history chain link
//!   .engine.cache/sync-token/<name> href -> history etag snapshot
//! ```

mod cache;
mod delete;
mod get;
mod history;
mod meta;
mod serialize;
mod sync;
mod upload;

pub use meta::{CollectionTag, Props, check_and_sanitize_props};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::constants::{CACHE_DIR, ITEM_CACHE, LOCK_FILE, PROPS_FILE};
use crate::error::StoreResult;
use crate::item::Item;
use crate::lock::{FileLock, LockMode};
use crate::pathutils;
use crate::storage::StorageContext;

pub struct Collection {
    ctx: Arc<StorageContext>,
    path: String,
    filesystem_path: PathBuf,
    item_cache_lock: FileLock,
    meta_cache: OnceCell<Props>,
    etag_cache: OnceCell<String>,
    item_cache_cleaned: AtomicBool,
}

impl Collection {
    /// The collection at the stripped logical `path`.
    pub(crate) fn open(ctx: Arc<StorageContext>, path: &str) -> StoreResult<Self> {
        let filesystem_path = pathutils::path_to_filesystem(&ctx.collection_root(), path)?;
        Ok(Self::at(ctx, path, filesystem_path))
    }

    /// A collection whose files live at `filesystem_path`, which may differ
    /// from where `path` resolves (collections built in a temporary directory).
    pub(crate) fn at(ctx: Arc<StorageContext>, path: &str, filesystem_path: PathBuf) -> Self {
        let item_cache_lock = FileLock::new(
            filesystem_path
                .join(CACHE_DIR)
                .join(format!("{LOCK_FILE}.{ITEM_CACHE}")),
        );
        Collection {
            ctx,
            path: path.to_string(),
            filesystem_path,
            item_cache_lock,
            meta_cache: OnceCell::new(),
            etag_cache: OnceCell::new(),
            item_cache_cleaned: AtomicBool::new(false),
        }
    }

    /// Stripped logical path, `""` for the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn filesystem_path(&self) -> &Path {
        &self.filesystem_path
    }

    /// First path component, the principal owning the collection.
    pub fn owner(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }

    pub fn is_principal(&self) -> bool {
        !self.path.is_empty() && !self.path.contains('/')
    }

    fn props_path(&self) -> PathBuf {
        self.filesystem_path.join(PROPS_FILE)
    }

    fn cache_folder(&self, kind: &str) -> PathBuf {
        self.filesystem_path.join(CACHE_DIR).join(kind)
    }

    /// Memoized values are only trusted while nobody can be writing.
    fn write_locked(&self) -> bool {
        self.ctx.lock.locked() == Some(LockMode::Write)
    }

    /// ETag over every item and the metadata.
    pub fn etag(&self) -> StoreResult<String> {
        if self.write_locked() {
            return self.compute_etag();
        }
        self.etag_cache.get_or_try_init(|| self.compute_etag()).cloned()
    }

    fn compute_etag(&self) -> StoreResult<String> {
        let mut hasher = Sha256::new();
        for item in self.get_all() {
            let item = item?;
            hasher.update(format!("{}/{}", item.href().unwrap_or_default(), item.etag()).as_bytes());
        }
        let meta = serde_json::to_string(&self.get_meta()?).map_err(std::io::Error::from)?;
        hasher.update(meta.as_bytes());
        Ok(format!("\"{:x}\"", hasher.finalize()))
    }

    /// Newest modification of the directory, its metadata or any item, as an HTTP date.
    pub fn last_modified(&self) -> StoreResult<String> {
        let mut relevant = vec![self.filesystem_path.clone()];
        let props_path = self.props_path();
        if props_path.exists() {
            relevant.push(props_path);
        }
        relevant.extend(self.list()?.into_iter().map(|href| self.filesystem_path.join(href)));

        let mut last: Option<DateTime<Utc>> = None;
        for path in relevant {
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            last = Some(last.map_or(modified, |l| l.max(modified)));
        }

        Ok(last
            .unwrap_or_default()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string())
    }

    pub fn has_uid(&self, uid: &str) -> StoreResult<bool> {
        for item in self.get_all() {
            if item?.uid()? == Some(uid) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Items of type `component_name` whose time range overlaps `[start, end)`.
    pub fn get_filtered<'a>(
        &'a self,
        component_name: &'a str,
        start: i64,
        end: i64,
    ) -> impl Iterator<Item = StoreResult<Item>> + 'a {
        self.get_all().filter_map(move |item| {
            let item = match item {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };
            let meta = match item.meta() {
                Ok(meta) => meta,
                Err(e) => return Some(Err(e)),
            };
            let (item_start, item_end) = meta.time_range;
            let keep = meta.component_name == component_name && item_start < end && item_end > start;
            keep.then_some(Ok(item))
        })
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("path", &self.path)
            .field("filesystem_path", &self.filesystem_path)
            .finish()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", pathutils::unstrip_path(&self.path, true))
    }
}
