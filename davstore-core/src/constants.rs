//! On-disk names and fixed values shared across the engine.

/// Prefix reserved for engine-owned files inside the storage tree.
pub const STORAGE_PREFIX: &str = ".engine";

/// Directory under the storage root holding the collection tree.
pub const COLLECTION_ROOT: &str = "collection-root";

pub const PROPS_FILE: &str = ".engine.props";
pub const LOCK_FILE: &str = ".engine.lock";
pub const CACHE_DIR: &str = ".engine.cache";
pub const TMP_PREFIX: &str = ".engine.tmp-";

/// Suffix of editor/temp files; names ending in it are never items.
pub const RESERVED_SUFFIX: &str = "~";

pub const ITEM_CACHE: &str = "item";
pub const HISTORY_CACHE: &str = "history";
pub const SYNC_TOKEN_CACHE: &str = "sync-token";

pub const SYNC_TOKEN_PREFIX: &str = "http://davstore.org/ns/sync/";

/// Mixed into every item cache key so that a format change invalidates old entries.
pub const CACHE_VERSION: &str = concat!("davstore-core;", env!("CARGO_PKG_VERSION"), ";cache-v1;");

/// Format tag written into every cache, history and sync-token blob.
pub const BLOB_FORMAT: u32 = 1;

/// Default lifetime of sync tokens and history tombstones (30 days).
pub const DEFAULT_MAX_SYNC_TOKEN_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// 0001-01-01T00:00:00Z
pub const TIMESTAMP_MIN: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59.999999Z rounded up
pub const TIMESTAMP_MAX: i64 = 253_402_300_800;

pub const TAG_CALENDAR: &str = "VCALENDAR";
pub const TAG_ADDRESSBOOK: &str = "VADDRESSBOOK";
