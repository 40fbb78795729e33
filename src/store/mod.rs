//! Shared queue store used by every loop of the orchestrator.
//!
//! The orchestrator only depends on the [`QueueStore`] trait. Two providers
//! exist: [`RedisQueueStore`] for deployments and [`MemoryQueueStore`] for
//! tests and the in-process demo.

pub mod keys;
mod memory;
mod redis;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::error::StoreResult;

pub use self::memory::MemoryQueueStore;
pub use self::redis::RedisQueueStore;

/// Capabilities the core needs from a Redis-compatible store.
///
/// Every mutation is a single-key atomic primitive. There are no multi-key
/// transactions, so exactly-once consumption of a list element rests entirely
/// on the store's atomic pop.
pub trait QueueStore: Clone + Send + Sync + 'static {
    /// Round-trip check used at startup and by the health loop.
    fn ping(&self) -> impl Future<Output = StoreResult<()>> + Send;

    /// A handle with its own connection, for loops that park in blocking pops.
    fn dedicated(&self) -> impl Future<Output = StoreResult<Self>> + Send;

    /// Prepends `value` to `queue`. Returns the new length.
    fn push_left(&self, queue: &str, value: &str)
    -> impl Future<Output = StoreResult<usize>> + Send;

    /// Removes and returns the tail of the first non-empty queue, as `(queue, value)`.
    ///
    /// Returns `Ok(None)` once `timeout` elapses with every queue empty.
    fn pop_right_blocking(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> impl Future<Output = StoreResult<Option<(String, String)>>> + Send;

    /// Removes every element equal to `value`. Linear in the queue length.
    fn remove(&self, queue: &str, value: &str) -> impl Future<Output = StoreResult<usize>> + Send;

    fn len(&self, queue: &str) -> impl Future<Output = StoreResult<usize>> + Send;

    /// Keeps only the first `keep` elements from the head of `queue`.
    fn trim(&self, queue: &str, keep: usize) -> impl Future<Output = StoreResult<()>> + Send;

    /// Up to `limit` elements from the head of `queue`, head first. Does not pop.
    fn range(&self, queue: &str, limit: usize)
    -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Merges `fields` into the hash at `key`, last write wins per field.
    fn set_fields(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Full read of the hash at `key`. Empty when the key does not exist.
    fn get_fields(
        &self,
        key: &str,
    ) -> impl Future<Output = StoreResult<HashMap<String, String>>> + Send;

    fn set_slot(&self, key: &str, value: &str) -> impl Future<Output = StoreResult<()>> + Send;

    fn get_slot(&self, key: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// Keys matching a glob `pattern` (only `*` is interpreted).
    fn scan_keys(&self, pattern: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;
}
