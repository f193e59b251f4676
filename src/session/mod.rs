//! Caching of the billing service session token.
//!
//! The billing service hands out short-lived session ids. [`SessionCache`] keeps exactly
//! one of them under a fixed key in a shared [`SessionStore`] and only logs in again once
//! the store no longer reports the token as alive. Expiry is lazy: nothing refreshes the
//! token in the background, the next caller after the lease ran out performs the login.
//!
//! Logins are single-flight within a process: callers which miss the cache concurrently
//! queue up behind one login and then pick up the token it stored. Separate processes
//! sharing the same store may still log in twice, the last write wins.

use crate::errors::ResultExt;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[cfg(feature = "aws_dynamodb")]
pub mod dynamo;
pub mod memory;

/// Key under which the billing session token is stored.
pub const SESSION_KEY: &str = "portaone_session_id";

/// Lease of a freshly obtained session token.
pub const SESSION_TTL: Duration = Duration::from_secs(25 * 60);

/// A shared key-value store with per-entry expiry.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the value for `key` unless it is absent or its TTL has passed.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// Exchanges operator credentials for a new session token.
#[async_trait]
pub trait Login: Send + Sync {
    async fn login(&self) -> anyhow::Result<String>;
}

pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    login: Arc<dyn Login>,
    key: String,
    ttl: Duration,
    login_lock: Mutex<()>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SessionStore>, login: Arc<dyn Login>) -> Self {
        Self::with_key(store, login, SESSION_KEY, SESSION_TTL)
    }

    pub fn with_key(
        store: Arc<dyn SessionStore>,
        login: Arc<dyn Login>,
        key: &str,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            login,
            key: key.to_owned(),
            ttl,
            login_lock: Mutex::new(()),
        }
    }

    /// Returns the cached token or logs in to obtain a fresh one.
    ///
    /// # Errors
    ///
    /// Fails with an `Auth` error if the cache misses and the login fails. A broken
    /// store is logged and treated like a miss.
    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    pub async fn get_or_create(&self) -> anyhow::Result<String> {
        if let Some(token) = self.lookup().await {
            return Ok(token);
        }

        let _guard = self.login_lock.lock().await;

        // Whoever held the lock before us may have just stored a token.
        if let Some(token) = self.lookup().await {
            return Ok(token);
        }

        tracing::info!("No live billing session cached, logging in...");
        let token = self
            .login
            .login()
            .await
            .context("Failed to log in to the billing service")
            .mark_auth()?;

        if let Err(err) = self.store.put(&self.key, &token, self.ttl).await {
            tracing::warn!(
                key = self.key.as_str(),
                "Failed to cache the billing session: {:#}",
                err
            );
        }

        Ok(token)
    }

    /// Drops the cached token if it still equals `token`.
    ///
    /// Used when the billing service rejected the token before its lease ran out.
    #[tracing::instrument(level = "debug", skip(self, token))]
    pub async fn invalidate(&self, token: &str) {
        let _guard = self.login_lock.lock().await;

        if self.lookup().await.as_deref() == Some(token)
            && let Err(err) = self.store.remove(&self.key).await
        {
            tracing::warn!(
                key = self.key.as_str(),
                "Failed to drop the rejected billing session: {:#}",
                err
            );
        }
    }

    async fn lookup(&self) -> Option<String> {
        match self.store.get(&self.key).await {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                tracing::warn!(
                    key = self.key.as_str(),
                    "Session cache unavailable, treating as miss: {:#}",
                    err
                );
                None
            }
        }
    }
}
