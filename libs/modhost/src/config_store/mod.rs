//! Keyed JSON settings persisted per module.
//!
//! A [`ConfigStore`] is a dumb `key -> text` table with three single-statement
//! operations. [`ScopedConfig`] puts a module namespace and serde on top:
//! the stored key is `"{module}.{key}"` and the payload is the value's JSON.
//!
//! Entries are seeded once with `init_config` and only updated afterwards;
//! `save_config` never creates a row.

mod memory;
mod sql;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::AnyPool;
use thiserror::Error;

pub use memory::MemoryConfigStore;
pub use sql::SqlConfigStore;

/// Store-level failure.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("config entry '{0}' not found")]
    NotFound(String),
    #[error("config store I/O failure")]
    Io(#[source] anyhow::Error),
}

/// Key/value persistence used for module settings.
///
/// Every method is one atomic round trip for its key; there is no
/// transaction spanning a load and a subsequent save.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Insert `data` under `key` unless an entry exists. Returns whether a row was written.
    async fn init_if_absent(&self, key: &str, data: &str) -> Result<bool, ConfigStoreError>;

    async fn load(&self, key: &str) -> Result<String, ConfigStoreError>;

    /// Overwrite an existing entry; [`ConfigStoreError::NotFound`] if there is none.
    async fn save(&self, key: &str, data: &str) -> Result<(), ConfigStoreError>;

    /// Database pool behind the store, handed to modules that keep their own tables.
    fn db_pool(&self) -> Option<AnyPool> {
        None
    }
}

/// Typed, module-facing config failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config '{key}' not found")]
    NotFound { key: String },
    #[error("config payload does not match the requested type")]
    Serialize(#[from] serde_json::Error),
    #[error("config store failure")]
    Store(#[source] anyhow::Error),
}

impl ConfigError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::NotFound { .. })
    }
}

impl From<ConfigStoreError> for ConfigError {
    fn from(e: ConfigStoreError) -> Self {
        match e {
            ConfigStoreError::NotFound(key) => ConfigError::NotFound { key },
            ConfigStoreError::Io(source) => ConfigError::Store(source),
        }
    }
}

/// A [`ConfigStore`] bound to one module's key namespace.
///
/// Handles load and update existing entries; they cannot create one:
///
/// ```compile_fail
/// async fn seed_late(cfg: modhost::ScopedConfig) {
///     let _ = cfg.init_config("hello", &1u32).await;
/// }
/// ```
#[derive(Clone)]
pub struct ScopedConfig {
    module: Arc<str>,
    store: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for ScopedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedConfig")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl ScopedConfig {
    pub fn new(module: impl Into<Arc<str>>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            module: module.into(),
            store,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Stored key for a module-local key.
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}.{}", self.module, key)
    }

    /// Seed `default` under `key` if nothing is stored yet; safe on every start.
    ///
    /// Only reachable through `BeforeCreatedCtx`, so entries are created in
    /// phase 1 and merely updated afterwards.
    pub(crate) async fn init_config<T>(&self, key: &str, default: &T) -> Result<bool, ConfigError>
    where
        T: Serialize + Sync,
    {
        let data = serde_json::to_string(default)?;
        let key = self.storage_key(key);
        let inserted = self.store.init_if_absent(&key, &data).await?;
        if inserted {
            tracing::debug!(module = %self.module, key = %key, "Config seeded");
        }
        Ok(inserted)
    }

    pub async fn load_config<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        let data = self.store.load(&self.storage_key(key)).await?;
        Ok(serde_json::from_str(&data)?)
    }

    pub async fn save_config<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize + Sync,
    {
        let data = serde_json::to_string(value)?;
        self.store.save(&self.storage_key(key), &data).await?;
        Ok(())
    }
}
