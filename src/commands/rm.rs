use anyhow::Result;
use davstore_core::{LockMode, Storage};
use owo_colors::OwoColorize;

use super::{current_user, find_collection};

pub fn run(storage: &dyn Storage, collection: &str, href: Option<&str>) -> Result<()> {
    let lock = storage.acquire_lock(LockMode::Write, current_user().as_deref())?;
    let collection = find_collection(storage, collection)?;
    if href.is_none() && collection.path().is_empty() {
        anyhow::bail!("Refusing to delete the storage root");
    }
    collection.delete(href)?;
    lock.commit()?;

    match href {
        Some(href) => println!("{} {} from {}", "Deleted".red(), href, collection),
        None => println!("{} {}", "Deleted".red(), collection),
    }
    Ok(())
}
