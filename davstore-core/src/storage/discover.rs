use std::path::Path;
use std::sync::Arc;

use log::debug;

use super::{Depth, Node, NodeIter, StorageContext};
use crate::collection::Collection;
use crate::constants::STORAGE_PREFIX;
use crate::error::{StoreError, StoreResult};
use crate::pathutils::{
    is_safe_filesystem_path_component, path_to_filesystem, sanitize_path, strip_path,
};

pub(super) fn discover<'a>(
    ctx: Arc<StorageContext>,
    path: &str,
    depth: Depth,
) -> StoreResult<NodeIter<'a>> {
    let sane_path = strip_path(&sanitize_path(path));
    debug!("Discovering {sane_path:?} with depth {depth:?}");

    let filesystem_path = match path_to_filesystem(&ctx.collection_root(), &sane_path) {
        Ok(filesystem_path) => filesystem_path,
        Err(e) if e.is_validation() => {
            debug!("Can't discover {sane_path:?}: {e}");
            return Ok(Box::new(std::iter::empty::<StoreResult<Node>>()));
        }
        Err(e) => return Err(e),
    };

    if !filesystem_path.is_dir() {
        if !filesystem_path.is_file() {
            return Ok(Box::new(std::iter::empty::<StoreResult<Node>>()));
        }
        // A path naming a file yields that single item.
        let (collection_path, href) = match sane_path.rsplit_once('/') {
            Some((collection_path, href)) => (collection_path, href),
            None => ("", sane_path.as_str()),
        };
        let collection = Collection::open(ctx, collection_path)?;
        let item = collection.get_item(href, false).transpose();
        return Ok(Box::new(item.into_iter().map(|item| item.map(Node::Item))));
    }

    let this = Collection::open(Arc::clone(&ctx), &sane_path)?;
    if depth == Depth::Zero {
        return Ok(Box::new(std::iter::once(Ok(Node::Collection(this)))));
    }

    let children = child_collections(Arc::clone(&ctx), &sane_path, &filesystem_path)?;
    let items_of = Collection::open(ctx, &sane_path)?;
    let hrefs = items_of.list()?;
    let items = hrefs
        .into_iter()
        .filter_map(move |href| items_of.get_item(&href, false).transpose())
        .map(|item| item.map(Node::Item));

    Ok(Box::new(
        std::iter::once(Ok(Node::Collection(this)))
            .chain(items)
            .chain(children),
    ))
}

/// Direct child collections, opened lazily while iterating.
fn child_collections<'a>(
    ctx: Arc<StorageContext>,
    sane_path: &str,
    filesystem_path: &Path,
) -> StoreResult<NodeIter<'a>> {
    let parent = sane_path.to_string();
    let entries = std::fs::read_dir(filesystem_path)?;

    Ok(Box::new(entries.filter_map(move |entry| {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Some(Err(StoreError::from(e))),
        };
        if !entry.path().is_dir() {
            return None;
        }
        let href = entry.file_name().to_string_lossy().to_string();
        if !is_safe_filesystem_path_component(&href) {
            if !href.starts_with(STORAGE_PREFIX) {
                debug!("Skipping collection {href:?} in {parent:?}");
            }
            return None;
        }
        let child_path = if parent.is_empty() {
            href
        } else {
            format!("{parent}/{href}")
        };
        Some(Collection::open(Arc::clone(&ctx), &child_path).map(Node::Collection))
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::lock::MemoryLock;
    use crate::storage::{MultiFilesystem, Storage};

    fn storage(dir: &Path) -> MultiFilesystem {
        let config = StorageConfig::with_folder(dir);
        MultiFilesystem::with_lock(&config, Arc::new(MemoryLock::new())).unwrap()
    }

    fn paths(storage: &MultiFilesystem, path: &str, depth: Depth) -> Vec<String> {
        storage
            .discover(path, depth)
            .unwrap()
            .map(|node| match node.unwrap() {
                Node::Collection(c) => format!("{}/", c.path()),
                Node::Item(i) => i.href().unwrap_or_default().to_string(),
            })
            .collect()
    }

    #[test]
    fn test_discover_missing_and_unsafe_paths_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        assert!(paths(&storage, "/nobody/", Depth::One).is_empty());
        assert!(paths(&storage, "/.engine.cache/", Depth::Zero).is_empty());
        assert!(paths(&storage, "/name~/", Depth::Zero).is_empty());
    }

    #[test]
    fn test_discover_children_skip_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        storage.create_collection("/alice/", None, None).unwrap();
        storage.create_collection("/alice/cal/", None, None).unwrap();
        std::fs::create_dir(storage.folder().join("collection-root/alice/.engine.tmp-x")).unwrap();

        assert_eq!(paths(&storage, "/", Depth::Zero), vec!["/"]);
        assert_eq!(paths(&storage, "/alice/", Depth::One), vec!["alice/", "alice/cal/"]);
    }
}
