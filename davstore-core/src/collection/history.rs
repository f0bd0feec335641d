//! Per-href history chains.
//!
//! Each href keeps the last ETag seen and a history ETag. Whenever the ETag
//! changes (including to "deleted", the empty ETag) the history ETag is
//! rehashed together with the new ETag, so a deleted and recreated item
//! never reports a history ETag it had before.

use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Collection;
use super::cache::load_blob;
use crate::constants::HISTORY_CACHE;
use crate::error::StoreResult;
use crate::item::{Item, get_etag};

#[derive(Debug, Serialize, Deserialize)]
struct HistoryEntry {
    etag: String,
    history_etag: String,
}

impl Collection {
    /// Record the current state of `href` (`None` once deleted) and return
    /// its history ETag.
    pub(crate) fn update_history_etag(&self, href: &str, item: Option<&Item>) -> StoreResult<String> {
        let folder = self.cache_folder(HISTORY_CACHE);
        let path = folder.join(href);

        let previous = match load_blob::<HistoryEntry>(&path) {
            Ok(previous) => previous,
            Err(reason) => {
                warn!("Failed to load history of {href:?} in {:?}: {reason}", self.path);
                None
            }
        };
        let (cache_etag, history_etag) = match previous {
            Some(entry) => (entry.etag, entry.history_etag),
            None => (String::new(), Uuid::new_v4().simple().to_string()),
        };

        let etag = item.map(|item| item.etag()).unwrap_or_default();
        if etag == cache_etag {
            return Ok(history_etag);
        }

        let history_etag = get_etag(&format!("{history_etag}/{etag}"))
            .trim_matches('"')
            .to_string();
        self.ctx.writer.makedirs_synced(&folder)?;
        self.write_blob(
            &path,
            &HistoryEntry {
                etag: etag.to_string(),
                history_etag: history_etag.clone(),
            },
        )?;
        Ok(history_etag)
    }

    /// Hrefs with a history entry but no item.
    pub(crate) fn deleted_history_hrefs(&self) -> StoreResult<Vec<String>> {
        let mut hrefs: Vec<String> = self
            .cache_names(&self.cache_folder(HISTORY_CACHE))?
            .into_iter()
            .filter(|href| !self.filesystem_path.join(href).is_file())
            .collect();
        hrefs.sort();
        Ok(hrefs)
    }

    /// Drop tombstones older than the configured sync token age.
    pub(crate) fn clean_history(&self) -> StoreResult<()> {
        let folder = self.cache_folder(HISTORY_CACHE);
        let deleted = self.deleted_history_hrefs()?;
        self.clean_cache(&folder, deleted, Some(self.ctx.config.max_sync_token_age))
    }
}
