use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ConfigStore, ConfigStoreError};

/// In-process store for tests and mock runs. Same contract as the SQL store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: DashMap<String, String>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn init_if_absent(&self, key: &str, data: &str) -> Result<bool, ConfigStoreError> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(data.to_owned());
                Ok(true)
            }
        }
    }

    async fn load(&self, key: &str) -> Result<String, ConfigStoreError> {
        self.entries
            .get(key)
            .map(|e| e.value().clone())
            .ok_or_else(|| ConfigStoreError::NotFound(key.to_owned()))
    }

    async fn save(&self, key: &str, data: &str) -> Result<(), ConfigStoreError> {
        match self.entries.get_mut(key) {
            Some(mut e) => {
                *e = data.to_owned();
                Ok(())
            }
            None => Err(ConfigStoreError::NotFound(key.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_init_inserts_once() {
        let store = Arc::new(MemoryConfigStore::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.init_if_absent("k", &i.to_string()).await.unwrap()
            }));
        }

        let mut inserted = 0;
        for t in tasks {
            if t.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 1);
    }
}
