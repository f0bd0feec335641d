pub mod init;
pub mod ls;
pub mod mkcol;
pub mod mv;
pub mod put;
pub mod rm;
pub mod sync;
pub mod verify;

use anyhow::Result;
use davstore_core::{Collection, Depth, Item, Node, Storage};

/// User name passed to the storage hook.
fn current_user() -> Option<String> {
    std::env::var("USER").ok()
}

/// The existing collection at `path`.
fn find_collection(storage: &dyn Storage, path: &str) -> Result<Collection> {
    match storage.discover(path, Depth::Zero)?.next().transpose()? {
        Some(Node::Collection(collection)) => Ok(collection),
        Some(Node::Item(_)) => anyhow::bail!("{path} is an item, not a collection"),
        None => anyhow::bail!("Collection {path} not found"),
    }
}

/// The item `href` in the collection at `path`.
fn find_item(collection: &Collection, href: &str) -> Result<Item> {
    collection
        .get(href)?
        .ok_or_else(|| anyhow::anyhow!("Item {href} not found in {collection}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use davstore_core::{MultiFilesystem, Props, StorageConfig};

    fn storage(dir: &std::path::Path) -> MultiFilesystem {
        let mut config = StorageConfig::with_folder(dir);
        config.filesystem_fsync = false;
        MultiFilesystem::new(&config).unwrap()
    }

    #[test]
    fn test_find_collection() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let props = Props::from([("tag".to_string(), "VADDRESSBOOK".to_string())]);
        storage.create_collection("/alice/book/", None, Some(props)).unwrap();

        let book = find_collection(&storage, "/alice/book/").unwrap();
        assert_eq!(book.path(), "alice/book");
        assert!(find_collection(&storage, "/alice/missing/").is_err());
    }

    #[test]
    fn test_find_item() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let props = Props::from([("tag".to_string(), "VADDRESSBOOK".to_string())]);
        let book = storage.create_collection("/alice/book/", None, Some(props)).unwrap();
        let card = "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:c1\r\nFN:Bob\r\nEND:VCARD\r\n";
        book.upload("c1.vcf", &Item::new(book.path(), card)).unwrap();

        assert!(find_collection(&storage, "/alice/book/c1.vcf").is_err());
        assert_eq!(find_item(&book, "c1.vcf").unwrap().uid().unwrap(), Some("c1"));
        assert!(find_item(&book, "c2.vcf").is_err());
    }
}
