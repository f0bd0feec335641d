use std::collections::HashSet;
use std::io::ErrorKind;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::Collection;
use super::cache::{CacheEntry, item_cache_hash};
use crate::constants::STORAGE_PREFIX;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::lock::LockMode;
use crate::pathutils::{is_safe_filesystem_path_component, path_to_filesystem};

impl Collection {
    /// Hrefs of all items.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        let mut hrefs = Vec::new();
        for entry in std::fs::read_dir(&self.filesystem_path)? {
            let entry = entry?;
            let href = entry.file_name().to_string_lossy().to_string();
            if !is_safe_filesystem_path_component(&href) {
                if !href.starts_with(STORAGE_PREFIX) {
                    debug!("Skipping item {href:?} in {:?}", self.path);
                }
                continue;
            }
            if entry.path().is_file() {
                hrefs.push(href);
            }
        }
        Ok(hrefs)
    }

    /// The item stored under `href`, `None` if there is none.
    pub fn get(&self, href: &str) -> StoreResult<Option<Item>> {
        self.get_item(href, true)
    }

    pub(crate) fn get_item(&self, href: &str, verify_href: bool) -> StoreResult<Option<Item>> {
        let path = if verify_href {
            if !is_safe_filesystem_path_component(href) {
                debug!("Can't translate name {href:?} safely to filesystem in {:?}", self.path);
                return Ok(None);
            }
            match path_to_filesystem(&self.filesystem_path, href) {
                Ok(path) => path,
                Err(e) if e.is_validation() => {
                    debug!("Can't translate name {href:?} safely to filesystem in {:?}: {e}", self.path);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        } else {
            self.filesystem_path.join(href)
        };

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound || path.is_dir() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let input_hash = item_cache_hash(&raw);
        let entry = match self.load_item_cache(href, &input_hash) {
            Some(entry) => entry,
            None => {
                let _guard = self.acquire_cache_lock()?;
                // Another reader may have filled the cache while we waited.
                let cached = if self.ctx.lock.locked() == Some(LockMode::Read) {
                    self.load_item_cache(href, &input_hash)
                } else {
                    None
                };
                match cached {
                    Some(entry) => entry,
                    None => self.refresh_item_cache(href, raw, input_hash)?,
                }
            }
        };

        let last_modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Ok(Some(entry.into_item(&self.path, href, last_modified)))
    }

    fn refresh_item_cache(&self, href: &str, raw: Vec<u8>, input_hash: String) -> StoreResult<CacheEntry> {
        let corrupted = |reason: String| StoreError::Corrupted {
            href: href.to_string(),
            collection: self.path.clone(),
            reason,
        };

        let text = String::from_utf8(raw).map_err(|e| corrupted(e.to_string()))?;
        let item = Item::new(&self.path, text);
        item.validate(self.tag()?)
            .map_err(|e| corrupted(e.to_string()))?;
        let entry = CacheEntry::new(&item, input_hash)?;

        if let Err(e) = self.store_item_cache(href, &entry) {
            warn!("Failed to store item cache entry {href:?} in {:?}: {e}", self.path);
        }
        self.clean_item_cache_once()?;
        Ok(entry)
    }

    /// Fetch several items, yielding `None` for hrefs that don't exist.
    pub fn get_multi<'a, I>(&'a self, hrefs: I) -> StoreResult<impl Iterator<Item = StoreResult<(String, Option<Item>)>> + 'a>
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: 'a,
    {
        let files: HashSet<String> = self.list()?.into_iter().collect();
        Ok(hrefs.into_iter().map(move |href| {
            // Names reachable under another spelling are treated as unsafe.
            let safe = is_safe_filesystem_path_component(&href)
                && (files.contains(&href)
                    || std::fs::symlink_metadata(self.filesystem_path.join(&href)).is_err());
            if !safe {
                debug!("Can't translate name {href:?} safely to filesystem in {:?}", self.path);
                return Ok((href, None));
            }
            let item = if files.contains(&href) {
                self.get_item(&href, false)?
            } else {
                None
            };
            Ok((href, item))
        }))
    }

    /// Every item. Items removed concurrently are skipped.
    pub fn get_all(&self) -> impl Iterator<Item = StoreResult<Item>> + '_ {
        let listing = self.list();
        let (hrefs, error) = match listing {
            Ok(hrefs) => (hrefs, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        error
            .map(Err)
            .into_iter()
            .chain(hrefs.into_iter().filter_map(move |href| self.get_item(&href, false).transpose()))
    }
}
