use anyhow::Result;
use davstore_core::{Depth, LockMode, Storage};

use crate::render::{Render, to_json};

pub fn run(storage: &dyn Storage, path: &str, depth: Depth, json: bool) -> Result<()> {
    let lock = storage.acquire_lock(LockMode::Read, None)?;

    let mut found = false;
    for node in storage.discover(path, depth)? {
        let node = node?;
        found = true;
        if json {
            println!("{}", to_json(&node));
        } else {
            println!("{}", node.render());
        }
    }

    lock.commit()?;
    if !found {
        anyhow::bail!("Nothing found at {path}");
    }
    Ok(())
}
