use std::collections::HashMap;

use log::debug;

use super::{MultiFilesystem, Storage};
use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};

/// Builds a storage backend from its configuration.
pub type StorageFactory = Box<dyn Fn(&StorageConfig) -> StoreResult<Box<dyn Storage>> + Send + Sync>;

/// Backends by their `type` name.
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl Default for StorageRegistry {
    fn default() -> Self {
        let mut registry = StorageRegistry {
            factories: HashMap::new(),
        };
        registry.register(
            "multifilesystem",
            Box::new(|config| Ok(Box::new(MultiFilesystem::new(config)?) as Box<dyn Storage>)),
        );
        registry
    }
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the backend called `name`.
    pub fn register(&mut self, name: &str, factory: StorageFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Open the backend named by `config.backend`.
    pub fn open(&self, config: &StorageConfig) -> StoreResult<Box<dyn Storage>> {
        let factory = self
            .factories
            .get(&config.backend)
            .ok_or_else(|| StoreError::UnknownBackend(config.backend.clone()))?;
        debug!("Opening {:?} storage", config.backend);
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_backend_is_registered() {
        let registry = StorageRegistry::new();
        assert_eq!(registry.names(), vec!["multifilesystem"]);

        let dir = tempfile::tempdir().unwrap();
        let storage = registry.open(&StorageConfig::with_folder(dir.path())).unwrap();
        assert!(storage.verify());
        assert!(dir.path().join("collection-root").is_dir());
    }

    #[test]
    fn test_unknown_backend() {
        let registry = StorageRegistry::new();
        let mut config = StorageConfig::with_folder("/nonexistent");
        config.backend = "sqlite".to_string();
        assert!(matches!(registry.open(&config), Err(StoreError::UnknownBackend(name)) if name == "sqlite"));
    }

    #[test]
    fn test_custom_backend() {
        let mut registry = StorageRegistry::new();
        registry.register(
            "memory",
            Box::new(|_| Err(StoreError::Config("not available".to_string()))),
        );
        assert_eq!(registry.names(), vec!["memory", "multifilesystem"]);

        let mut config = StorageConfig::with_folder("/nonexistent");
        config.backend = "memory".to_string();
        assert!(matches!(registry.open(&config), Err(StoreError::Config(_))));
    }
}
