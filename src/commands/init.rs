use std::path::Path;

use anyhow::Result;
use davstore_core::Settings;
use owo_colors::OwoColorize;

pub fn run(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Settings::config_path()?,
    };
    if path.exists() {
        anyhow::bail!("Config file {} already exists", path.display());
    }

    Settings::create_default_config(&path)?;
    println!("{} {}", "Created".green(), path.display());
    Ok(())
}
