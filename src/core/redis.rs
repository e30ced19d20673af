use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

/// Shared Redis connection. Every operation is a no-op while disconnected so
/// callers can treat the cache as optional.
#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.manager.read().await.is_some()
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    /// Reads a JSON value. Undecodable entries count as misses.
    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(None);
        };

        let raw: Option<String> = cmd("GET").arg(key).query_async(&mut manager).await?;
        Ok(raw.and_then(|payload| match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "Discarding undecodable cache entry");
                None
            }
        }))
    }

    pub(crate) async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), RedisError> {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(());
        };

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(key, error = %err, "Skipping cache write for unserializable value");
                return Ok(());
            }
        };

        let mut command = cmd("SET");
        command.arg(key).arg(payload);
        if ttl_seconds > 0 {
            command.arg("EX").arg(ttl_seconds);
        }
        command.query_async::<_, ()>(&mut manager).await
    }

    pub(crate) async fn delete_keys(&self, keys: &[String]) -> Result<(), RedisError> {
        if keys.is_empty() {
            return Ok(());
        }

        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return Ok(());
        };

        cmd("DEL").arg(keys).query_async::<_, ()>(&mut manager).await
    }
}
