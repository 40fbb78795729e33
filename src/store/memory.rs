//! In-process queue store with the same contract as Redis.
//!
//! Blocking pops wait on a [`Notify`] that every push signals, so an idle
//! consumer costs nothing until data arrives or its timeout fires.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::QueueStore;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    slots: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<MemoryState>,
    pushed: Notify,
    offline: AtomicBool,
    reject_pushes: AtomicBool,
}

/// Cloning shares the underlying data, like a second connection to the same server.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    inner: Arc<Inner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.inner.offline.load(Ordering::Relaxed) {
            return Err(StoreError::Connection("memory store is offline".into()));
        }
        self.inner
            .state
            .lock()
            .map_err(|_| StoreError::Connection("memory store lock poisoned".into()))
    }

    fn try_pop(&self, queues: &[String]) -> StoreResult<Option<(String, String)>> {
        let mut state = self.state()?;
        for queue in queues {
            let Some(list) = state.lists.get_mut(queue) else {
                continue;
            };
            let Some(value) = list.pop_back() else {
                continue;
            };
            if list.is_empty() {
                state.lists.remove(queue);
            }
            return Ok(Some((queue.clone(), value)));
        }
        Ok(None)
    }

    /// Makes every operation fail with a connection error until switched back.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::Relaxed);
    }

    /// Makes only `push_left` fail, leaving reads and hash writes working.
    #[cfg(test)]
    pub fn set_reject_pushes(&self, reject: bool) {
        self.inner.reject_pushes.store(reject, Ordering::Relaxed);
    }

    /// Snapshot of a list, head first. Test helper.
    #[cfg(test)]
    pub fn list(&self, queue: &str) -> Vec<String> {
        self.state()
            .map(|s| s.lists.get(queue).map(|l| l.iter().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }
}

impl QueueStore for MemoryQueueStore {
    async fn ping(&self) -> StoreResult<()> {
        self.state().map(|_| ())
    }

    async fn dedicated(&self) -> StoreResult<Self> {
        Ok(self.clone())
    }

    async fn push_left(&self, queue: &str, value: &str) -> StoreResult<usize> {
        if self.inner.reject_pushes.load(Ordering::Relaxed) {
            return Err(StoreError::Command {
                command: "LPUSH",
                message: "push rejected".into(),
            });
        }
        let len = {
            let mut state = self.state()?;
            let list = state.lists.entry(queue.to_string()).or_default();
            list.push_front(value.to_string());
            list.len()
        };
        self.inner.pushed.notify_waiters();
        Ok(len)
    }

    async fn pop_right_blocking(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not lost.
            let notified = self.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(popped) = self.try_pop(queues)? {
                return Ok(Some(popped));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn remove(&self, queue: &str, value: &str) -> StoreResult<usize> {
        let mut state = self.state()?;
        let Some(list) = state.lists.get_mut(queue) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|item| item != value);
        let removed = before - list.len();
        if list.is_empty() {
            state.lists.remove(queue);
        }
        Ok(removed)
    }

    async fn len(&self, queue: &str) -> StoreResult<usize> {
        Ok(self.state()?.lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn trim(&self, queue: &str, keep: usize) -> StoreResult<()> {
        let mut state = self.state()?;
        if keep == 0 {
            state.lists.remove(queue);
        } else if let Some(list) = state.lists.get_mut(queue) {
            list.truncate(keep);
        }
        Ok(())
    }

    async fn range(&self, queue: &str, limit: usize) -> StoreResult<Vec<String>> {
        Ok(self
            .state()?
            .lists
            .get(queue)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut state = self.state()?;
        let list = state.lists.remove(key).is_some();
        let hash = state.hashes.remove(key).is_some();
        let slot = state.slots.remove(key).is_some();
        Ok(list || hash || slot)
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut state = self.state()?;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn get_fields(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.state()?.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn set_slot(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state()?.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_slot(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state()?.slots.get(key).cloned())
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let state = self.state()?;
        let mut keys: Vec<String> = state
            .lists
            .keys()
            .chain(state.hashes.keys())
            .chain(state.slots.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Glob matching with `*` as the only wildcard.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) || text.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn fifo_order_within_a_queue() {
        let store = MemoryQueueStore::new();
        store.push_left("q", "a").await.unwrap();
        store.push_left("q", "b").await.unwrap();
        store.push_left("q", "c").await.unwrap();

        let q = queues(&["q"]);
        let timeout = Duration::from_millis(10);
        assert_eq!(store.pop_right_blocking(&q, timeout).await.unwrap().unwrap().1, "a");
        assert_eq!(store.pop_right_blocking(&q, timeout).await.unwrap().unwrap().1, "b");
        assert_eq!(store.pop_right_blocking(&q, timeout).await.unwrap().unwrap().1, "c");
        assert_eq!(store.len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_takes_first_non_empty_queue() {
        let store = MemoryQueueStore::new();
        store.push_left("second", "x").await.unwrap();

        let popped = store
            .pop_right_blocking(&queues(&["first", "second"]), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(popped, Some(("second".to_string(), "x".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_when_empty() {
        let store = MemoryQueueStore::new();
        let started = Instant::now();
        let popped = store
            .pop_right_blocking(&queues(&["q"]), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_pop_wakes_on_push() {
        let store = MemoryQueueStore::new();
        let consumer = store.clone();
        let handle = tokio::spawn(async move {
            consumer
                .pop_right_blocking(&queues(&["q"]), Duration::from_secs(30))
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        store.push_left("q", "job").await.unwrap();

        let popped = handle.await.unwrap().unwrap();
        assert_eq!(popped, Some(("q".to_string(), "job".to_string())));
    }

    #[tokio::test]
    async fn remove_drops_matching_elements() {
        let store = MemoryQueueStore::new();
        store.push_left("q", "keep").await.unwrap();
        store.push_left("q", "drop").await.unwrap();

        assert_eq!(store.remove("q", "drop").await.unwrap(), 1);
        assert_eq!(store.remove("q", "drop").await.unwrap(), 0);
        assert_eq!(store.list("q"), vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn trim_keeps_newest_head_elements() {
        let store = MemoryQueueStore::new();
        for value in ["1", "2", "3", "4"] {
            store.push_left("log", value).await.unwrap();
        }
        store.trim("log", 2).await.unwrap();

        assert_eq!(store.range("log", 10).await.unwrap(), vec!["4", "3"]);
        assert_eq!(store.range("log", 1).await.unwrap(), vec!["4"]);
        assert!(store.range("missing", 5).await.unwrap().is_empty());

        store.trim("log", 0).await.unwrap();
        assert_eq!(store.len("log").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fields_merge_last_write_wins() {
        let store = MemoryQueueStore::new();
        store
            .set_fields("h", &[("a".into(), "1".into()), ("b".into(), "2".into())])
            .await
            .unwrap();
        store.set_fields("h", &[("b".into(), "3".into())]).await.unwrap();

        let fields = store.get_fields("h").await.unwrap();
        assert_eq!(fields.get("a").map(String::as_str), Some("1"));
        assert_eq!(fields.get("b").map(String::as_str), Some("3"));
        assert!(store.get_fields("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scan_matches_glob() {
        let store = MemoryQueueStore::new();
        store.set_fields("agentik:status:1", &[("s".into(), "x".into())]).await.unwrap();
        store.set_fields("agentik:status:2", &[("s".into(), "x".into())]).await.unwrap();
        store.set_slot("agentik:heartbeat", "{}").await.unwrap();

        let keys = store.scan_keys("agentik:status:*").await.unwrap();
        assert_eq!(keys, vec!["agentik:status:1", "agentik:status:2"]);
    }

    #[tokio::test]
    async fn offline_store_reports_connection_errors() {
        let store = MemoryQueueStore::new();
        store.set_offline(true);
        assert!(matches!(store.ping().await, Err(StoreError::Connection(_))));
        assert!(store.push_left("q", "x").await.is_err());

        store.set_offline(false);
        assert!(store.ping().await.is_ok());
    }

    #[test]
    fn glob_match_cases() {
        assert!(glob_match("a*", "abc"));
        assert!(glob_match("*c", "abc"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*b*c", "aXbYc"));
        assert!(!glob_match("a*c", "ab"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
