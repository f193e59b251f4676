//! Process-local [`SessionStore`] for tests and local experiments. Tokens are not
//! shared between processes, so deployments use the DynamoDB store.

use crate::session::SessionStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[cfg(test)]
use mock_instant::thread_local::Instant;
#[cfg(not(test))]
use std::time::Instant;

#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Session store lock is poisoned"))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut entries = self.lock()?;

        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                let _ = entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let _ = self
            .lock()?
            .insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));

        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let _ = self.lock()?.remove(key);

        Ok(())
    }
}
