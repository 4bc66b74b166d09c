use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Storage;
use crate::error::Error;

/// Process-local storage. Nothing survives a restart; used by tests and by
/// hosts that do not want a file on disk.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.values.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.values.lock().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.values.lock().await.remove(key);
        Ok(())
    }

    async fn set_many(&self, writes: &[(&str, Option<&str>)]) -> Result<(), Error> {
        let mut values = self.values.lock().await;
        for (key, value) in writes {
            match value {
                Some(value) => values.insert(key.to_string(), value.to_string()),
                None => values.remove(*key),
            };
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.values.lock().await.clear();
        Ok(())
    }
}
