//! Filesystem storage engine for CalDAV/CardDAV collections.
//!
//! This crate stores calendar and contact collections as plain directories:
//! - `storage` opens a backend and hands out lock scopes
//! - `collection` reads and writes items, metadata and sync tokens
//! - `lock` and `atomic` provide the locking and crash-safe write primitives

pub mod atomic;
pub mod collection;
pub mod config;
pub mod constants;
pub mod error;
pub mod item;
pub mod lock;
pub mod pathutils;
pub mod storage;

pub use collection::{Collection, CollectionTag, Props};
pub use config::{Settings, StorageConfig};
pub use error::{StoreError, StoreResult};
pub use item::Item;
pub use lock::{LockManager, LockMode, MemoryLock};
pub use storage::{Depth, MultiFilesystem, Node, Storage, StorageLock, StorageRegistry};
