use std::path::Path;

use anyhow::{Context, Result};
use davstore_core::{Item, LockMode, Storage};
use owo_colors::OwoColorize;

use super::{current_user, find_collection};

pub fn run(storage: &dyn Storage, collection: &str, href: &str, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Could not read {}", file.display()))?;

    let lock = storage.acquire_lock(LockMode::Write, current_user().as_deref())?;
    let collection = find_collection(storage, collection)?;
    let stored = collection.upload(href, &Item::new(collection.path(), text))?;
    lock.commit()?;

    println!("{} {} {}", "Stored".green(), href, stored.etag().dimmed());
    Ok(())
}
