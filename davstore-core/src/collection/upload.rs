use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};

use log::debug;

use super::Collection;
use super::cache::{CacheEntry, item_cache_hash};
use crate::constants::ITEM_CACHE;
use crate::error::{StoreError, StoreResult};
use crate::item::{Item, find_available_uid, get_etag};
use crate::pathutils::{is_safe_filesystem_path_component, path_to_filesystem};

impl Collection {
    /// Store `item` under `href`, replacing any previous item atomically.
    /// Returns the item as read back from disk.
    pub fn upload(&self, href: &str, item: &Item) -> StoreResult<Item> {
        if !is_safe_filesystem_path_component(href) {
            return Err(StoreError::UnsafePath(href.to_string()));
        }
        item.validate(self.tag()?).map_err(|e| {
            StoreError::InvalidItem(format!(
                "Failed to store item {href:?} in collection {:?}: {e}",
                self.path
            ))
        })?;

        let text = item.serialize();
        let entry = CacheEntry::new(item, item_cache_hash(text.as_bytes()))?;
        self.store_item_cache(href, &entry)?;

        let path = path_to_filesystem(&self.filesystem_path, href)?;
        self.ctx.writer.replace_file(&path, text.as_bytes())?;
        debug!("Stored item {href:?} in collection {:?}", self.path);

        self.clean_item_cache()?;
        self.update_history_etag(href, Some(item))?;
        self.clean_history()?;

        self.get_item(href, false)?
            .ok_or_else(|| StoreError::ComponentNotFound(href.to_string()))
    }

    /// Write many items into a directory nobody else can see yet.
    ///
    /// Hrefs are derived from each item's UID, falling back to a hash of the
    /// UID and then to a random name if the file system refuses a name.
    pub(crate) fn upload_all_nonatomic(&self, items: &[Item], suffix: &str) -> StoreResult<()> {
        let cache_folder = self.cache_folder(ITEM_CACHE);
        self.ctx.writer.makedirs_synced(&cache_folder)?;

        let tag = self.tag()?;
        let mut taken: HashSet<String> = HashSet::new();
        for item in items {
            item.validate(tag)?;
            let uid = item.uid()?.map(str::to_string);
            let mut candidates: Vec<String> = Vec::new();
            if let Some(uid) = &uid {
                if uid.to_lowercase().ends_with(&suffix.to_lowercase()) {
                    candidates.push(uid.clone());
                } else {
                    candidates.push(format!("{uid}{suffix}"));
                }
                candidates.push(format!("{}{suffix}", get_etag(uid).trim_matches('"')));
            }

            let href = self.write_new_item(item, candidates, suffix, &mut taken)?;
            let text = item.serialize();
            let entry = CacheEntry::new(item, item_cache_hash(text.as_bytes()))?;
            self.write_blob_nonatomic(&cache_folder.join(&href), &entry)?;
        }

        self.ctx.writer.sync_directory(&cache_folder)?;
        self.ctx.writer.sync_directory(&self.filesystem_path)
    }

    fn write_new_item(
        &self,
        item: &Item,
        candidates: Vec<String>,
        suffix: &str,
        taken: &mut HashSet<String>,
    ) -> StoreResult<String> {
        for candidate in candidates {
            if taken.contains(&candidate) || !is_safe_filesystem_path_component(&candidate) {
                continue;
            }
            let path = self.filesystem_path.join(&candidate);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(item.serialize().as_bytes())?;
                    self.ctx.writer.fsync_file(&file, &path)?;
                    taken.insert(candidate.clone());
                    return Ok(candidate);
                }
                Err(e) if unusable_name(&e) => {
                    debug!("Href {candidate:?} unusable in {:?}: {e}", self.path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let href = find_available_uid(
            |name| taken.contains(name) || self.filesystem_path.join(name).exists(),
            suffix,
        )
        .ok_or_else(|| StoreError::ComponentExists(format!("no free href in {:?}", self.path)))?;
        let path = self.filesystem_path.join(&href);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        file.write_all(item.serialize().as_bytes())?;
        self.ctx.writer.fsync_file(&file, &path)?;
        taken.insert(href.clone());
        Ok(href)
    }
}

/// The file system refused the name itself, another name may work.
fn unusable_name(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    let too_long = e.raw_os_error() == Some(libc::ENAMETOOLONG);
    #[cfg(not(unix))]
    let too_long = false;

    too_long || matches!(e.kind(), ErrorKind::AlreadyExists | ErrorKind::InvalidInput)
}
