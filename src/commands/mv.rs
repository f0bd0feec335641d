use anyhow::Result;
use davstore_core::{LockMode, Storage};
use owo_colors::OwoColorize;

use super::{current_user, find_collection, find_item};

pub fn run(
    storage: &dyn Storage,
    collection: &str,
    href: &str,
    to_collection: &str,
    to_href: &str,
) -> Result<()> {
    let lock = storage.acquire_lock(LockMode::Write, current_user().as_deref())?;
    let source = find_collection(storage, collection)?;
    let item = find_item(&source, href)?;
    let dest = find_collection(storage, to_collection)?;
    if dest.get(to_href)?.is_some() {
        anyhow::bail!("Item {to_href} already exists in {dest}");
    }
    storage.move_item(&item, &dest, to_href)?;
    lock.commit()?;

    println!("{} {}{} -> {}{}", "Moved".yellow(), source, href, dest, to_href);
    Ok(())
}
