use anyhow::Result;
use davstore_core::{LockMode, Storage};
use owo_colors::OwoColorize;

pub fn run(storage: &dyn Storage) -> Result<()> {
    let lock = storage.acquire_lock(LockMode::Read, None)?;
    let ok = storage.verify();
    lock.commit()?;

    if !ok {
        anyhow::bail!("Storage verification failed, see the log for details");
    }
    println!("{}", "Storage verified".green());
    Ok(())
}
