use std::collections::BTreeMap;
use std::fs::File;
use std::io::ErrorKind;
use std::time::SystemTime;

use log::{debug, warn};
use sha2::{Digest, Sha256};

use super::Collection;
use super::cache::load_blob;
use crate::constants::{SYNC_TOKEN_CACHE, SYNC_TOKEN_PREFIX};
use crate::error::{StoreError, StoreResult};

/// href -> history ETag
type Snapshot = BTreeMap<String, String>;

fn token_name(token: &str) -> StoreResult<&str> {
    let name = token
        .strip_prefix(SYNC_TOKEN_PREFIX)
        .ok_or_else(|| StoreError::MalformedToken(token.to_string()))?;
    if name.len() != 64 || !name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(StoreError::MalformedToken(token.to_string()));
    }
    Ok(name)
}

fn snapshot_name(state: &Snapshot) -> String {
    let mut hasher = Sha256::new();
    for (href, history_etag) in state {
        hasher.update(href.as_bytes());
        hasher.update(b"/");
        hasher.update(history_etag.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

impl Collection {
    /// A token for the current state and the hrefs changed since `old_token`.
    ///
    /// Without `old_token` every href is reported. Deleted hrefs keep being
    /// reported as changes until their tombstone expires.
    pub fn sync(&self, old_token: Option<&str>) -> StoreResult<(String, Vec<String>)> {
        let old_name = old_token.map(token_name).transpose()?;

        let mut state = Snapshot::new();
        for item in self.get_all() {
            let item = item?;
            let Some(href) = item.href() else { continue };
            let history_etag = self.update_history_etag(href, Some(&item))?;
            state.insert(href.to_string(), history_etag);
        }
        for href in self.deleted_history_hrefs()? {
            let history_etag = self.update_history_etag(&href, None)?;
            state.insert(href, history_etag);
        }

        let name = snapshot_name(&state);
        let token = format!("{SYNC_TOKEN_PREFIX}{name}");
        if old_name == Some(name.as_str()) {
            return Ok((token, Vec::new()));
        }

        let folder = self.cache_folder(SYNC_TOKEN_CACHE);
        let old_state = match old_name {
            Some(old_name) => {
                let old_path = folder.join(old_name);
                match load_blob::<Snapshot>(&old_path) {
                    Ok(Some(old_state)) => old_state,
                    Ok(None) => return Err(StoreError::TokenNotFound(old_token.unwrap_or_default().to_string())),
                    Err(reason) => {
                        warn!("Failed to load stored sync token {old_name:?} in {:?}: {reason}", self.path);
                        if let Err(e) = std::fs::remove_file(&old_path) {
                            debug!("Failed to remove sync token {old_name:?}: {e}");
                        }
                        return Err(StoreError::TokenNotFound(old_token.unwrap_or_default().to_string()));
                    }
                }
            }
            None => Snapshot::new(),
        };

        let token_path = folder.join(&name);
        if token_path.exists() {
            // Keep a token that's in use from expiring.
            match File::options().write(true).open(&token_path) {
                Ok(file) => file.set_modified(SystemTime::now())?,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            self.ctx.writer.makedirs_synced(&folder)?;
            self.write_blob(&token_path, &state)?;
            let stale = self.cache_names(&folder)?;
            self.clean_cache(&folder, stale, Some(self.ctx.config.max_sync_token_age))?;
            self.clean_history()?;
        }

        let mut changes: Vec<String> = state
            .iter()
            .filter(|(href, history_etag)| old_state.get(*href) != Some(*history_etag))
            .map(|(href, _)| href.clone())
            .collect();
        changes.extend(old_state.into_keys().filter(|href| !state.contains_key(href)));
        Ok((token, changes))
    }
}
