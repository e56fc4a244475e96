use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::Backend;

#[derive(Default)]
struct Data {
    values: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<i64>>,
    lists: HashMap<String, VecDeque<i64>>,
}

/// Process-local backend
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<Data>,
}

impl MemoryBackend {
    fn data(&self) -> MutexGuard<'_, Data> {
        match self.data.lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data().values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data().values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data().values.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut data = self.data();
        let value = match data.values.get(key) {
            Some(value) => value
                .parse::<i64>()
                .with_context(|| format!("Value of {:?} is not a counter", key))?,
            None => 0,
        } + 1;
        data.values.insert(key.to_string(), value.to_string());
        Ok(value)
    }

    async fn set_add(&self, key: &str, member: i64) -> Result<()> {
        self.data().sets.entry(key.to_string()).or_default().insert(member);
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: i64) -> Result<()> {
        if let Some(set) = self.data().sets.get_mut(key) {
            set.remove(&member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<i64>> {
        Ok(self
            .data()
            .sets
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn list_push(&self, key: &str, value: i64) -> Result<()> {
        self.data().lists.entry(key.to_string()).or_default().push_back(value);
        Ok(())
    }

    async fn list_pop(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.data().lists.get_mut(key).and_then(|list| list.pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_and_list() {
        let backend = MemoryBackend::default();
        assert_eq!(backend.incr("seq").await.unwrap(), 1);
        assert_eq!(backend.incr("seq").await.unwrap(), 2);
        backend.set("text", "abc").await.unwrap();
        assert!(backend.incr("text").await.is_err());

        backend.list_push("queue", 3).await.unwrap();
        backend.list_push("queue", 4).await.unwrap();
        assert_eq!(backend.list_pop("queue").await.unwrap(), Some(3));
        assert_eq!(backend.list_pop("queue").await.unwrap(), Some(4));
        assert_eq!(backend.list_pop("queue").await.unwrap(), None);
    }
}
