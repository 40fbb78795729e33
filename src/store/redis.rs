//! Redis-backed queue store.
//!
//! Uses `redis::aio::ConnectionManager` for multiplexed connections with
//! automatic reconnection. Blocking pops park the whole multiplexed
//! connection, so each consumer loop asks for a [`QueueStore::dedicated`]
//! handle instead of sharing one.

use std::collections::HashMap;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::debug;

use super::QueueStore;
use crate::error::{StoreError, StoreResult};

#[derive(Clone)]
pub struct RedisQueueStore {
    client: redis::Client,
    connection_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisQueueStore {
    /// Opens a client for `url` and establishes the first connection.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid Redis URL: {e}")))?;
        let connection_manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect to Redis: {e}")))?;

        debug!(url = %redact_url(url), "Redis queue store connected");
        Ok(Self {
            client,
            connection_manager,
        })
    }
}

fn command_error(command: &'static str) -> impl FnOnce(redis::RedisError) -> StoreError {
    move |e| match StoreError::from(e) {
        StoreError::Command { message, .. } => StoreError::Command { command, message },
        other => other,
    }
}

impl QueueStore for RedisQueueStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_error("PING"))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Connection(format!("unexpected PING reply: {pong}")))
        }
    }

    async fn dedicated(&self) -> StoreResult<Self> {
        let connection_manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| StoreError::Connection(format!("failed to open connection: {e}")))?;
        Ok(Self {
            client: self.client.clone(),
            connection_manager,
        })
    }

    async fn push_left(&self, queue: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("LPUSH")
            .arg(queue)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(command_error("LPUSH"))
    }

    async fn pop_right_blocking(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        let mut conn = self.connection_manager.clone();
        // A zero timeout means "block forever" to Redis.
        let seconds = timeout.as_secs_f64().max(0.001);
        let mut cmd = redis::cmd("BRPOP");
        for queue in queues {
            cmd.arg(queue);
        }
        cmd.arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(command_error("BRPOP"))
    }

    async fn remove(&self, queue: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("LREM")
            .arg(queue)
            .arg(0)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(command_error("LREM"))
    }

    async fn len(&self, queue: &str) -> StoreResult<usize> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("LLEN")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(command_error("LLEN"))
    }

    async fn trim(&self, queue: &str, keep: usize) -> StoreResult<()> {
        let mut conn = self.connection_manager.clone();
        if keep == 0 {
            return redis::cmd("DEL")
                .arg(queue)
                .query_async::<()>(&mut conn)
                .await
                .map_err(command_error("DEL"));
        }
        redis::cmd("LTRIM")
            .arg(queue)
            .arg(0)
            .arg(keep - 1)
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error("LTRIM"))
    }

    async fn range(&self, queue: &str, limit: usize) -> StoreResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection_manager.clone();
        // LRANGE stops are inclusive; -1 reads to the end.
        let stop = isize::try_from(limit - 1).unwrap_or(-1);
        redis::cmd("LRANGE")
            .arg(queue)
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(command_error("LRANGE"))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection_manager.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("DEL"))?;
        Ok(removed > 0)
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(command_error("HSET"))
    }

    async fn get_fields(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("HGETALL"))
    }

    async fn set_slot(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(command_error("SET"))
    }

    async fn get_slot(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("GET"))
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        // SCAN instead of KEYS so a large keyspace never blocks the server
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(command_error("SCAN"))?;
            found.extend(keys);

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        Ok(found)
    }
}

/// Redact credentials from a Redis URL for logging.
pub(crate) fn redact_url(url: &str) -> String {
    let authority = url.find("://").map(|i| i + 3).unwrap_or(0);
    let Some(at_pos) = url.find('@') else {
        return url.to_string();
    };
    match url[..at_pos].rfind(':') {
        Some(colon_pos) if colon_pos >= authority => {
            format!("{}***{}", &url[..=colon_pos], &url[at_pos..])
        }
        _ => url.to_string(),
    }
}
