use anyhow::Result;
use davstore_core::{LockMode, Storage, StoreError};
use owo_colors::OwoColorize;

use super::find_collection;

pub fn run(storage: &dyn Storage, path: &str, token: Option<&str>) -> Result<()> {
    let lock = storage.acquire_lock(LockMode::Read, None)?;
    let collection = find_collection(storage, path)?;

    let (new_token, changes) = match collection.sync(token) {
        Ok(result) => result,
        Err(StoreError::TokenNotFound(_)) => {
            anyhow::bail!("Token is unknown or expired, sync again without --token")
        }
        Err(e) => return Err(e.into()),
    };
    lock.commit()?;

    println!("{}", new_token.bold());
    for href in changes {
        println!("   {}", href.yellow());
    }
    Ok(())
}
