use anyhow::Result;
use davstore_core::{LockMode, Props, Storage};
use owo_colors::OwoColorize;

use super::current_user;

pub fn run(
    storage: &dyn Storage,
    path: &str,
    tag: Option<String>,
    displayname: Option<String>,
) -> Result<()> {
    let mut props = Props::new();
    if let Some(tag) = tag {
        props.insert("tag".to_string(), tag.to_uppercase());
    }
    if let Some(displayname) = displayname {
        props.insert("D:displayname".to_string(), displayname);
    }

    let lock = storage.acquire_lock(LockMode::Write, current_user().as_deref())?;
    let collection = storage.create_collection(path, None, Some(props))?;
    lock.commit()?;

    println!("{} {}", "Created".green(), collection);
    Ok(())
}
