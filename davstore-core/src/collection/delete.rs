use std::io::ErrorKind;

use log::{debug, warn};

use super::Collection;
use crate::constants::{ITEM_CACHE, TMP_PREFIX};
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::pathutils::{is_safe_filesystem_path_component, path_to_filesystem};

impl Collection {
    /// Delete the item `href`, or the whole collection with `None`.
    pub fn delete(&self, href: Option<&str>) -> StoreResult<()> {
        match href {
            None => self.delete_collection(),
            Some(href) => self.delete_item(href),
        }
    }

    fn delete_collection(&self) -> StoreResult<()> {
        let parent = self
            .filesystem_path
            .parent()
            .ok_or_else(|| StoreError::UnsafePath(self.path.clone()))?;

        if std::fs::remove_dir(&self.filesystem_path).is_ok() {
            debug!("Deleted empty collection {:?}", self.path);
            return self.ctx.writer.sync_directory(parent);
        }

        // Move the tree out of sight first, so it disappears atomically.
        let trash = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempdir_in(parent)?;
        match std::fs::rename(&self.filesystem_path, trash.path().join("delete")) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Collection {:?} already deleted", self.path);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.ctx.writer.sync_directory(parent)?;

        if let Err(e) = trash.close() {
            warn!("Failed to clean up deleted collection {:?}: {e}", self.path);
        }
        Ok(())
    }

    fn delete_item(&self, href: &str) -> StoreResult<()> {
        if !is_safe_filesystem_path_component(href) {
            return Err(StoreError::UnsafePath(href.to_string()));
        }
        let path = path_to_filesystem(&self.filesystem_path, href)?;
        if !path.is_file() {
            return Err(StoreError::ComponentNotFound(href.to_string()));
        }

        std::fs::remove_file(&path)?;
        self.ctx.writer.sync_directory(&self.filesystem_path)?;
        debug!("Deleted item {href:?} from collection {:?}", self.path);

        self.update_history_etag(href, None)?;
        self.clean_history()
    }

    /// Move the stored `item` to `dest` under `to_href`, carrying its cache entry along.
    pub(crate) fn move_item_to(&self, item: &Item, dest: &Collection, to_href: &str) -> StoreResult<()> {
        let href = item
            .href()
            .ok_or_else(|| StoreError::ComponentNotFound(String::new()))?;
        if !is_safe_filesystem_path_component(to_href) {
            return Err(StoreError::UnsafePath(to_href.to_string()));
        }
        let from = path_to_filesystem(&self.filesystem_path, href)?;
        let to = path_to_filesystem(&dest.filesystem_path, to_href)?;
        std::fs::rename(&from, &to)?;
        self.ctx.writer.sync_directory(&dest.filesystem_path)?;
        if self.filesystem_path != dest.filesystem_path {
            self.ctx.writer.sync_directory(&self.filesystem_path)?;
        }

        let cache_from = self.cache_folder(ITEM_CACHE).join(href);
        if cache_from.is_file() {
            let cache_folder = dest.cache_folder(ITEM_CACHE);
            dest.ctx.writer.makedirs_synced(&cache_folder)?;
            match std::fs::rename(&cache_from, cache_folder.join(to_href)) {
                Ok(()) => {
                    dest.ctx.writer.sync_directory(&cache_folder)?;
                    if self.filesystem_path != dest.filesystem_path {
                        self.ctx.writer.sync_directory(&self.cache_folder(ITEM_CACHE))?;
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        dest.update_history_etag(to_href, Some(item))?;
        self.update_history_etag(href, None)?;
        dest.clean_history()?;
        if self.filesystem_path != dest.filesystem_path {
            self.clean_history()?;
        }
        Ok(())
    }
}
