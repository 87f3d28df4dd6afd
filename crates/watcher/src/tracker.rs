use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::Mutex;

/// Concurrency-safe key/value store shared between the monitors' producer
/// side and the processor. Every operation takes the instance lock, so no
/// two operations observe intermediate state. Per-key semantics are
/// last-write-wins.
#[derive(Debug, Default)]
pub struct Tracker<K, V> {
    data: Mutex<HashMap<K, V>>,
}

impl<K, V> Tracker<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set(&self, key: K, value: V) {
        self.data.lock().await.insert(key, value);
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.data.lock().await.get(key).cloned()
    }

    pub async fn delete(&self, key: &K) {
        self.data.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.data.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.lock().await.is_empty()
    }
}
