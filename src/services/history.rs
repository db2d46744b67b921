// src/services/history.rs
use crate::errors::StudioError;
use crate::models::{HistoryItem, MAX_HISTORY_ITEMS, RestoredSelection};
use async_trait::async_trait;
use log::warn;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Single key holding the serialized history list.
const HISTORY_KEY: &str = "aether-ai-history";

/// Key-value persistence capability for the history blob.
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StudioError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StudioError>;
    async fn remove(&self, key: &str) -> Result<(), StudioError>;
}

pub struct RedisStorage {
    client: Client,
}

impl RedisStorage {
    pub async fn new(redis_url: &str) -> Result<Self, StudioError> {
        let client = Client::open(redis_url).map_err(|e| StudioError::Storage(e.to_string()))?;

        // Test connection
        let mut conn = client
            .get_async_connection()
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HistoryStorage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StudioError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))?;

        conn.get(key)
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StudioError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))?;

        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), StudioError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))?;

        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StudioError::Storage(e.to_string()))
    }
}

/// In-memory fallback for when Redis is unreachable, and the test double.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StudioError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StudioError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StudioError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Bounded, newest-first log of past generations, persisted after every
/// mutation. Persistence failures degrade to in-memory state, never to an
/// error for the caller.
pub struct HistoryStore {
    storage: Arc<dyn HistoryStorage>,
    items: RwLock<Vec<HistoryItem>>,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn HistoryStorage>) -> Self {
        Self {
            storage,
            items: RwLock::new(Vec::new()),
        }
    }

    /// Read the persisted list into memory. Absent or corrupt data comes
    /// back as an empty list.
    pub async fn load(&self) -> Vec<HistoryItem> {
        let loaded = match self.storage.get(HISTORY_KEY).await {
            Ok(Some(blob)) => match serde_json::from_str::<Vec<HistoryItem>>(&blob) {
                Ok(items) => items,
                Err(e) => {
                    warn!("Ignoring corrupt history data: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to load history: {}", e);
                Vec::new()
            }
        };

        let mut items = self.items.write().unwrap();
        *items = loaded;
        items.clone()
    }

    /// Prepend, evict past the bound, persist, return the new list.
    pub async fn append(&self, item: HistoryItem) -> Vec<HistoryItem> {
        let snapshot = {
            let mut items = self.items.write().unwrap();
            items.insert(0, item);
            items.truncate(MAX_HISTORY_ITEMS);
            items.clone()
        };

        match serde_json::to_string(&snapshot) {
            Ok(blob) => {
                if let Err(e) = self.storage.set(HISTORY_KEY, &blob).await {
                    warn!("Failed to persist history: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize history: {}", e),
        }

        snapshot
    }

    /// Reset to empty and drop the persisted key.
    pub async fn clear(&self) {
        self.items.write().unwrap().clear();
        if let Err(e) = self.storage.remove(HISTORY_KEY).await {
            warn!("Failed to remove persisted history: {}", e);
        }
    }

    pub fn items(&self) -> Vec<HistoryItem> {
        self.items.read().unwrap().clone()
    }

    pub fn find(&self, id: uuid::Uuid) -> Option<HistoryItem> {
        self.items
            .read()
            .unwrap()
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Pure projection back into the input state; the list is untouched.
    pub fn restore(item: &HistoryItem) -> RestoredSelection {
        RestoredSelection {
            image: item.source_image.clone(),
            prompt: item.prompt.clone(),
            style: item.style,
            result_image_url: item.result_image_url.clone(),
        }
    }
}
