//! Items: single calendar or contact objects stored as one file.

mod parse;

pub use parse::{ItemMeta, ParsedObject, parse_object};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::collection::CollectionTag;
use crate::error::StoreResult;

/// Quoted sha256 hex digest of `text`.
pub fn get_etag(text: &str) -> String {
    format!("\"{}\"", sha256_hex(text.as_bytes()))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// A random UID in UUID form, `suffix` appended, for which `exists` is false.
pub fn find_available_uid(exists: impl Fn(&str) -> bool, suffix: &str) -> Option<String> {
    (0..1000)
        .map(|_| format!("{}{}", uuid::Uuid::new_v4().hyphenated(), suffix))
        .find(|name| !exists(name))
}

/// A calendar or contact object.
///
/// The serialized text and ETag are available immediately. Parsed fields are
/// computed on first use and memoized; concurrent first calls parse once.
#[derive(Debug)]
pub struct Item {
    collection_path: String,
    href: Option<String>,
    last_modified: Option<DateTime<Utc>>,
    text: String,
    etag: String,
    meta: OnceCell<ItemMeta>,
}

impl Item {
    /// A new item that isn't stored yet.
    pub fn new(collection_path: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        Item {
            collection_path: collection_path.to_string(),
            href: None,
            last_modified: None,
            etag: get_etag(&text),
            text,
            meta: OnceCell::new(),
        }
    }

    /// An item whose derived fields are already known (loaded from cache).
    pub(crate) fn with_meta(
        collection_path: &str,
        href: &str,
        last_modified: Option<DateTime<Utc>>,
        text: String,
        etag: String,
        meta: ItemMeta,
    ) -> Self {
        Item {
            collection_path: collection_path.to_string(),
            href: Some(href.to_string()),
            last_modified,
            text,
            etag,
            meta: OnceCell::with_value(meta),
        }
    }

    pub fn collection_path(&self) -> &str {
        &self.collection_path
    }

    pub fn href(&self) -> Option<&str> {
        self.href.as_deref()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// Last modification as an HTTP date.
    pub fn http_last_modified(&self) -> Option<String> {
        self.last_modified
            .map(|t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
    }

    pub fn serialize(&self) -> &str {
        &self.text
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn meta(&self) -> StoreResult<&ItemMeta> {
        self.meta
            .get_or_try_init(|| parse_object(&self.text).map(|parsed| parsed.meta()))
    }

    pub fn uid(&self) -> StoreResult<Option<&str>> {
        Ok(self.meta()?.uid.as_deref())
    }

    pub fn name(&self) -> StoreResult<&str> {
        Ok(&self.meta()?.name)
    }

    pub fn component_name(&self) -> StoreResult<&str> {
        Ok(&self.meta()?.component_name)
    }

    pub fn time_range(&self) -> StoreResult<(i64, i64)> {
        Ok(self.meta()?.time_range)
    }

    /// Check that the item may live in a collection with `tag`, memoizing
    /// the parsed fields on success.
    pub fn validate(&self, tag: Option<CollectionTag>) -> StoreResult<&ItemMeta> {
        let parsed = parse_object(&self.text)?;
        parsed.check(tag)?;
        Ok(self.meta.get_or_init(|| parsed.meta()))
    }
}
