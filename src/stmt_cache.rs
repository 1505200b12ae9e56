use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::driver::{DriverConnection, DriverStatement};
use crate::error::SqlFluentError;

/// Default per-connection bound on cached prepared statements.
pub const DEFAULT_STMT_CACHE_SIZE: usize = 100;

struct CacheEntry {
    statement: Arc<dyn DriverStatement>,
    connection_name: String,
}

struct CacheInner {
    entries: HashMap<u64, CacheEntry>,
    /// Per-connection insertion order, oldest first.
    order: HashMap<String, VecDeque<u64>>,
}

/// Per-connection prepared-statement cache with FIFO eviction.
///
/// Keys are `hash(connection_name, sql)`. A single async mutex guards the
/// whole lookup-prepare-insert sequence, so two tasks racing on the same
/// query text never prepare it twice and eviction can't interleave with an
/// insert. Handles are `Arc`-shared: an entry evicted while a caller still
/// holds its handle stays alive until that caller drops it.
///
/// The cache is purely a performance structure; clearing it never affects
/// query correctness.
pub struct StatementCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STMT_CACHE_SIZE)
    }
}

fn cache_key(connection_name: &str, sql: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    connection_name.hash(&mut hasher);
    sql.hash(&mut hasher);
    hasher.finish()
}

impl StatementCache {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        StatementCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: HashMap::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Return the cached handle for `(connection_name, sql)`, preparing and
    /// inserting it on miss. When the connection's entry count is at the
    /// bound, the oldest entry is closed and evicted first.
    pub async fn get_or_prepare(
        &self,
        connection_name: &str,
        connection: &Arc<dyn DriverConnection>,
        sql: &str,
    ) -> Result<Arc<dyn DriverStatement>, SqlFluentError> {
        let key = cache_key(connection_name, sql);
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if let Some(entry) = inner.entries.get(&key) {
            return Ok(entry.statement.clone());
        }

        // Evict before preparing so the bound is never exceeded.
        let oldest = inner
            .order
            .get_mut(connection_name)
            .filter(|queue| queue.len() >= self.capacity)
            .and_then(VecDeque::pop_front);
        if let Some(oldest) = oldest
            && let Some(evicted) = inner.entries.remove(&oldest)
        {
            evicted.statement.close().await;
        }

        let statement = connection.prepare(sql).await?;
        inner.entries.insert(
            key,
            CacheEntry {
                statement: statement.clone(),
                connection_name: connection_name.to_string(),
            },
        );
        inner
            .order
            .entry(connection_name.to_string())
            .or_default()
            .push_back(key);
        Ok(statement)
    }

    /// Close and drop cached statements: one connection's when a name is
    /// given, everything otherwise.
    pub async fn clear(&self, connection_name: Option<&str>) {
        let mut inner = self.inner.lock().await;
        match connection_name {
            Some(name) => {
                if let Some(queue) = inner.order.remove(name) {
                    for key in queue {
                        if let Some(entry) = inner.entries.remove(&key) {
                            entry.statement.close().await;
                        }
                    }
                }
            }
            None => {
                for (_, entry) in inner.entries.drain() {
                    entry.statement.close().await;
                }
                inner.order.clear();
            }
        }
    }

    /// Entry counts per connection name.
    pub async fn stats(&self) -> HashMap<String, usize> {
        let inner = self.inner.lock().await;
        let mut stats: HashMap<String, usize> = HashMap::new();
        for entry in inner.entries.values() {
            *stats.entry(entry.connection_name.clone()).or_insert(0) += 1;
        }
        stats
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
