//! Storage entry point.
//!
//! A [`Storage`] is opened once from configuration through the
//! [`StorageRegistry`]. Callers take a lock scope with
//! [`Storage::acquire_lock`], then discover collections and items and work
//! on them through [`Collection`].

mod discover;
mod hook;
mod registry;
mod verify;

pub use hook::StorageLock;
pub use registry::{StorageFactory, StorageRegistry};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::atomic::AtomicWriter;
use crate::collection::{Collection, Props};
use crate::config::StorageConfig;
use crate::constants::{COLLECTION_ROOT, LOCK_FILE, TMP_PREFIX};
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::lock::{FileLock, LockManager, LockMode};
use crate::pathutils::{path_to_filesystem, sanitize_path, strip_path};

/// Shared state of an open storage.
pub(crate) struct StorageContext {
    pub(crate) config: StorageConfig,
    pub(crate) folder: PathBuf,
    pub(crate) lock: Arc<dyn LockManager>,
    pub(crate) writer: AtomicWriter,
}

impl StorageContext {
    pub(crate) fn collection_root(&self) -> PathBuf {
        self.folder.join(COLLECTION_ROOT)
    }
}

/// A node found by [`Storage::discover`].
#[derive(Debug)]
pub enum Node {
    Collection(Collection),
    Item(Item),
}

impl Node {
    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Node::Collection(collection) => Some(collection),
            Node::Item(_) => None,
        }
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Node::Item(item) => Some(item),
            Node::Collection(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Only the node itself.
    Zero,
    /// The node and its direct children.
    One,
}

impl std::str::FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            other => Err(format!("unsupported depth {other:?}")),
        }
    }
}

pub type NodeIter<'a> = Box<dyn Iterator<Item = StoreResult<Node>> + 'a>;

/// Operations the protocol layer needs from a storage backend.
pub trait Storage: Send + Sync {
    /// The node at `path` and, with [`Depth::One`], its children.
    /// Empty if nothing exists at `path`.
    fn discover(&self, path: &str, depth: Depth) -> StoreResult<NodeIter<'_>>;

    /// Create the collection at `path`.
    ///
    /// Without metadata this only makes sure the directory exists. With
    /// metadata the collection, including `items`, is built aside and
    /// installed in one step, replacing anything at `path`.
    fn create_collection(
        &self,
        path: &str,
        items: Option<Vec<Item>>,
        props: Option<Props>,
    ) -> StoreResult<Collection>;

    /// Move a stored item to `to_collection` under `to_href`.
    fn move_item(&self, item: &Item, to_collection: &Collection, to_href: &str) -> StoreResult<()>;

    /// Block until the storage lock is granted in `mode`.
    fn acquire_lock(&self, mode: LockMode, user: Option<&str>) -> StoreResult<StorageLock<'_>>;

    /// Check the whole tree, logging every problem. True if none was found.
    fn verify(&self) -> bool;
}

/// The filesystem backend: one directory per collection, one file per item.
pub struct MultiFilesystem {
    ctx: Arc<StorageContext>,
}

impl MultiFilesystem {
    pub fn new(config: &StorageConfig) -> StoreResult<Self> {
        let lock = FileLock::new(config.data_path().join(LOCK_FILE));
        Self::with_lock(config, Arc::new(lock))
    }

    /// Open the storage with another lock implementation.
    pub fn with_lock(config: &StorageConfig, lock: Arc<dyn LockManager>) -> StoreResult<Self> {
        let ctx = StorageContext {
            config: config.clone(),
            folder: config.data_path(),
            lock,
            writer: AtomicWriter::new(config.filesystem_fsync),
        };
        ctx.writer.makedirs_synced(&ctx.collection_root())?;
        debug!(
            "Opened storage in {:?} (exchange: {:?})",
            ctx.folder.display(),
            ctx.writer.strategy()
        );
        Ok(MultiFilesystem { ctx: Arc::new(ctx) })
    }

    pub fn folder(&self) -> &Path {
        &self.ctx.folder
    }

    /// The collection at `path` without checking that it exists.
    pub fn collection(&self, path: &str) -> StoreResult<Collection> {
        Collection::open(Arc::clone(&self.ctx), &strip_path(&sanitize_path(path)))
    }
}

impl fmt::Debug for MultiFilesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiFilesystem")
            .field("folder", &self.ctx.folder)
            .finish()
    }
}

impl Storage for MultiFilesystem {
    fn discover(&self, path: &str, depth: Depth) -> StoreResult<NodeIter<'_>> {
        discover::discover(Arc::clone(&self.ctx), path, depth)
    }

    fn create_collection(
        &self,
        path: &str,
        items: Option<Vec<Item>>,
        props: Option<Props>,
    ) -> StoreResult<Collection> {
        let root = self.ctx.collection_root();
        self.ctx.writer.makedirs_synced(&root)?;
        let sane_path = strip_path(&sanitize_path(path));
        let filesystem_path = path_to_filesystem(&root, &sane_path)?;

        let Some(props) = props.filter(|props| !props.is_empty()) else {
            self.ctx.writer.makedirs_synced(&filesystem_path)?;
            return Collection::open(Arc::clone(&self.ctx), &sane_path);
        };

        let parent = filesystem_path
            .parent()
            .ok_or_else(|| StoreError::UnsafePath(sane_path.clone()))?;
        self.ctx.writer.makedirs_synced(parent)?;

        let tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempdir_in(parent)?;
        let tmp_path = tmp.path().join("collection");
        std::fs::create_dir(&tmp_path)?;

        let staged = Collection::at(Arc::clone(&self.ctx), &sane_path, tmp_path.clone());
        staged.set_meta(props)?;
        if let Some(items) = items {
            match staged.tag()? {
                Some(tag) => staged.upload_all_nonatomic(&items, tag.item_suffix())?,
                None if items.is_empty() => {}
                None => {
                    return Err(StoreError::InvalidItem(format!(
                        "Items can't be stored in generic collection {sane_path:?}"
                    )));
                }
            }
        }

        self.ctx.writer.exchange_directory(&tmp_path, &filesystem_path)?;
        self.ctx.writer.sync_directory(parent)?;
        debug!("Created collection {sane_path:?}");
        Collection::open(Arc::clone(&self.ctx), &sane_path)
    }

    fn move_item(&self, item: &Item, to_collection: &Collection, to_href: &str) -> StoreResult<()> {
        let source = Collection::open(Arc::clone(&self.ctx), item.collection_path())?;
        source.move_item_to(item, to_collection, to_href)?;
        debug!(
            "Moved item {:?} from {:?} to {:?} as {to_href:?}",
            item.href().unwrap_or_default(),
            source.path(),
            to_collection.path()
        );
        Ok(())
    }

    fn acquire_lock(&self, mode: LockMode, user: Option<&str>) -> StoreResult<StorageLock<'_>> {
        let guard = self.ctx.lock.acquire(mode)?;
        let hook = (mode == LockMode::Write && !self.ctx.config.hook.is_empty()).then(|| {
            hook::Hook::new(&self.ctx.config.hook, &self.ctx.folder, user)
        });
        Ok(StorageLock::new(guard, hook))
    }

    fn verify(&self) -> bool {
        verify::verify(self)
    }
}
