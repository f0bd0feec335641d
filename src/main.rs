mod commands;
mod logging;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use davstore_core::{Depth, Settings, Storage, StorageRegistry};

#[derive(Parser)]
#[command(name = "davstore")]
#[command(about = "Inspect and maintain a CalDAV/CardDAV filesystem storage")]
struct Cli {
    /// Config file (default: ~/.config/davstore/config.toml)
    #[arg(short = 'C', long, global = true)]
    config: Option<PathBuf>,

    /// Print debug messages
    #[arg(short = 'D', long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a commented default config file
    Init,
    /// Check the whole storage for invalid items and collections
    Verify,
    /// List a collection and its children
    Ls {
        path: String,

        /// 0 for the node itself, 1 to include children
        #[arg(short, long, default_value = "1")]
        depth: Depth,

        /// Print one JSON object per node
        #[arg(long)]
        json: bool,
    },
    /// Print a sync token and the items changed since --token
    Sync {
        path: String,

        #[arg(short, long)]
        token: Option<String>,
    },
    /// Store an item read from a file
    Put {
        collection: String,
        href: String,
        file: PathBuf,
    },
    /// Delete an item, or the whole collection without href
    Rm {
        collection: String,
        href: Option<String>,
    },
    /// Create a collection
    Mkcol {
        path: String,

        /// VCALENDAR or VADDRESSBOOK
        #[arg(long)]
        tag: Option<String>,

        #[arg(long)]
        displayname: Option<String>,
    },
    /// Move an item to another collection
    Mv {
        collection: String,
        href: String,
        to_collection: String,
        to_href: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let _logger = logging::init(&settings.logging.level, cli.debug)?;

    if let Commands::Init = cli.command {
        return commands::init::run(cli.config.as_deref());
    }

    let storage = StorageRegistry::new().open(&settings.storage)?;
    run(cli.command, storage.as_ref())
}

fn run(command: Commands, storage: &dyn Storage) -> Result<()> {
    match command {
        Commands::Init => Ok(()),
        Commands::Verify => commands::verify::run(storage),
        Commands::Ls { path, depth, json } => commands::ls::run(storage, &path, depth, json),
        Commands::Sync { path, token } => commands::sync::run(storage, &path, token.as_deref()),
        Commands::Put {
            collection,
            href,
            file,
        } => commands::put::run(storage, &collection, &href, &file),
        Commands::Rm { collection, href } => commands::rm::run(storage, &collection, href.as_deref()),
        Commands::Mkcol {
            path,
            tag,
            displayname,
        } => commands::mkcol::run(storage, &path, tag, displayname),
        Commands::Mv {
            collection,
            href,
            to_collection,
            to_href,
        } => commands::mv::run(storage, &collection, &href, &to_collection, &to_href),
    }
}
