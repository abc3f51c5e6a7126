//! Pooling of server-side cursors for paginated reads.
//!
//! Paging through a large collection with skip/limit makes the store walk past every skipped
//! document again for each page. The pool keeps cursors that have just served page N, already
//! positioned at page N+1, so a caller walking forward gets each following page from a live
//! cursor instead of a fresh scan.
//!
//! Cursors are keyed by [`CursorKey`]: collection, query fingerprint, page window and
//! [`AllocationPolicy`]. The pool is split into shards, each an LRU cache behind its own
//! mutex. Locks are held only for map operations, never while talking to the store.
//!
//! Staleness is tracked with generation counters per database and per collection. A cursor
//! remembers the generation it was opened under; any write bumps the counter and makes the
//! cursor unusable. Counters of deleted resources are dropped again, so the counter maps only
//! hold resources that still exist.

use bson::Document;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
    num::NonZeroUsize,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use crate::{
    backend::{StoreBackend, StoreCursor},
    config::CursorPoolConfig,
    error::DataAccessResult,
    metadata::CollectionId,
    page::PageWindow,
    query::{QueryDescriptor, QueryFingerprint},
};

/// How eagerly the pool opens cursors for pages that were not asked for yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Open exactly the requested window and close the cursor once it is served.
    #[default]
    None,
    /// Keep the served cursor for the following page.
    EagerLinear,
    /// Keep the served cursor for the following page and pre-open a few pages around the
    /// requested one. Useful when the access order is unpredictable.
    EagerRandom,
}

/// Identity of a pooled cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    collection: CollectionId,
    fingerprint: QueryFingerprint,
    window: PageWindow,
    policy: AllocationPolicy,
}

impl CursorKey {
    fn at_window(&self, window: PageWindow) -> Self {
        Self {
            window,
            ..self.clone()
        }
    }
}

/// Counters describing what the pool has done since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Pages served from a pooled cursor.
    pub hits: u64,
    /// Pages that needed a freshly opened cursor.
    pub misses: u64,
    /// Cursors pushed out by the capacity bound.
    pub evictions: u64,
    /// Cursors discarded because their collection was written to.
    pub invalidations: u64,
    /// Cursors discarded because they sat idle too long.
    pub expired: u64,
    /// Cursors opened ahead of demand by the eager random policy.
    pub preopened: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    expired: AtomicU64,
    preopened: AtomicU64,
}

impl PoolCounters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            preopened: self.preopened.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Generation {
    dropped: u64,
    database: u64,
    collection: u64,
}

/// Missing entries read as zero. Removing an entry always bumps a counter one level up, so a
/// generation captured before the removal can never be observed again.
#[derive(Debug, Default)]
struct Generations {
    dropped: u64,
    databases: HashMap<String, u64>,
    collections: HashMap<CollectionId, u64>,
}

struct PooledCursor<C> {
    cursor: C,
    generation: Generation,
    last_used: Instant,
}

type Shard<C> = Mutex<LruCache<CursorKey, PooledCursor<C>>>;

/// A sharded, generation-checked LRU pool of store cursors.
pub struct CursorPool<C> {
    shards: Vec<Shard<C>>,
    generations: RwLock<Generations>,
    max_idle: Duration,
    random_span: u64,
    counters: PoolCounters,
}

impl<C: StoreCursor> CursorPool<C> {
    pub fn new(config: &CursorPoolConfig) -> Self {
        let capacity = config.capacity.max(1);
        let shard_count = config.shards.clamp(1, capacity);

        Self {
            // shard capacities add up to exactly `capacity`
            shards: (0..shard_count)
                .map(|index| {
                    let size = capacity / shard_count + usize::from(index < capacity % shard_count);
                    Mutex::new(LruCache::new(
                        NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN),
                    ))
                })
                .collect(),
            generations: RwLock::new(Generations::default()),
            max_idle: config.max_idle(),
            random_span: config.random_span,
            counters: PoolCounters::default(),
        }
    }

    /// Returns one page of documents, reusing a pooled cursor when possible and pooling cursors
    /// for later pages according to `policy`.
    ///
    /// A cursor is registered only after its page was read successfully, so a failing store
    /// call never leaves anything behind in the pool.
    pub async fn acquire<B>(
        &self,
        backend: &B,
        collection: &CollectionId,
        query: &QueryDescriptor,
        window: PageWindow,
        policy: AllocationPolicy,
    ) -> DataAccessResult<Vec<Document>>
    where
        B: StoreBackend<Cursor = C>,
    {
        let generation = self.generation(collection);
        let key = CursorKey {
            collection: collection.clone(),
            fingerprint: query.fingerprint().clone(),
            window,
            policy,
        };

        let mut cursor = match self.take(&key, generation) {
            Some(cursor) => {
                PoolCounters::add(&self.counters.hits, 1);
                tracing::trace!(collection = %collection, %window, "cursor pool hit");
                cursor
            }
            None => {
                PoolCounters::add(&self.counters.misses, 1);
                tracing::trace!(collection = %collection, %window, "cursor pool miss");
                backend
                    .open_cursor(collection, query, window.skip())
                    .await?
            }
        };

        let documents = cursor.next_batch(window.pagesize()).await?;
        let exhausted = (documents.len() as u64) < window.pagesize();

        if policy != AllocationPolicy::None && !exhausted {
            self.register(key.at_window(window.next()), cursor, generation);
        }

        if policy == AllocationPolicy::EagerRandom {
            self.preopen_around(backend, &key, query, generation, exhausted)
                .await;
        }

        Ok(documents)
    }

    /// Discards every cursor over `collection` and makes cursors opened before this call stale.
    pub fn invalidate(&self, collection: &CollectionId) {
        {
            let mut generations = self.generations.write();
            *generations
                .collections
                .entry(collection.clone())
                .or_default() += 1;
        }

        let purged = self.purge(|key| key.collection == *collection);
        tracing::debug!(collection = %collection, purged, "invalidated pooled cursors");
    }

    /// Like [`CursorPool::invalidate`] for every collection of a database.
    pub fn invalidate_database(&self, database: &str) {
        {
            let mut generations = self.generations.write();
            *generations
                .databases
                .entry(database.to_string())
                .or_default() += 1;
        }

        let purged = self.purge(|key| key.collection.database() == database);
        tracing::debug!(database, purged, "invalidated pooled cursors");
    }

    /// Drops the counter of a deleted collection. Every cursor of its database becomes stale.
    pub fn forget(&self, collection: &CollectionId) {
        {
            let mut generations = self.generations.write();
            generations.collections.remove(collection);
            *generations
                .databases
                .entry(collection.database().to_string())
                .or_default() += 1;
        }

        let purged = self.purge(|key| key.collection.database() == collection.database());
        tracing::debug!(collection = %collection, purged, "forgot deleted collection");
    }

    /// Drops the counters of a deleted database and its collections.
    pub fn forget_database(&self, database: &str) {
        {
            let mut generations = self.generations.write();
            generations.databases.remove(database);
            generations
                .collections
                .retain(|collection, _| collection.database() != database);
            generations.dropped += 1;
        }

        let purged = self.purge(|key| key.collection.database() == database);
        tracing::debug!(database, purged, "forgot deleted database");
    }

    /// Number of cursors currently pooled.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    async fn preopen_around<B>(
        &self,
        backend: &B,
        served: &CursorKey,
        query: &QueryDescriptor,
        generation: Generation,
        exhausted: bool,
    ) where
        B: StoreBackend<Cursor = C>,
    {
        let page = served.window.page();
        let first = page.saturating_sub(self.random_span).max(1);
        // nothing exists past a short page
        let last = if exhausted {
            page - 1
        } else {
            page.saturating_add(self.random_span)
        };

        for target in first..=last {
            if target == page || target == page + 1 {
                continue;
            }
            let Some(window) = served.window.at_page(target) else {
                continue;
            };

            let key = served.at_window(window);
            if self.contains_at(&key, generation) {
                continue;
            }

            match backend
                .open_cursor(&served.collection, query, window.skip())
                .await
            {
                Ok(cursor) => {
                    PoolCounters::add(&self.counters.preopened, 1);
                    self.register(key, cursor, generation);
                }
                Err(err) => {
                    tracing::warn!(
                        collection = %served.collection,
                        %window,
                        error = %err,
                        "failed to pre-open cursor"
                    );
                }
            }
        }
    }

    fn generation(&self, collection: &CollectionId) -> Generation {
        let generations = self.generations.read();

        Generation {
            dropped: generations.dropped,
            database: generations
                .databases
                .get(collection.database())
                .copied()
                .unwrap_or_default(),
            collection: generations
                .collections
                .get(collection)
                .copied()
                .unwrap_or_default(),
        }
    }

    fn shard(&self, key: &CursorKey) -> &Shard<C> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;

        &self.shards[index]
    }

    fn take(&self, key: &CursorKey, generation: Generation) -> Option<C> {
        let pooled = self.shard(key).lock().pop(key)?;

        if pooled.generation != generation {
            PoolCounters::add(&self.counters.invalidations, 1);
            tracing::trace!(collection = %key.collection, "discarding stale cursor");
            return None;
        }
        if pooled.last_used.elapsed() > self.max_idle {
            PoolCounters::add(&self.counters.expired, 1);
            tracing::trace!(collection = %key.collection, "discarding idle cursor");
            return None;
        }

        Some(pooled.cursor)
    }

    fn contains_at(&self, key: &CursorKey, generation: Generation) -> bool {
        self.shard(key)
            .lock()
            .peek(key)
            .is_some_and(|pooled| {
                pooled.generation == generation && pooled.last_used.elapsed() <= self.max_idle
            })
    }

    fn register(&self, key: CursorKey, cursor: C, generation: Generation) {
        if self.generation(&key.collection) != generation {
            PoolCounters::add(&self.counters.invalidations, 1);
            return;
        }

        let pooled = PooledCursor {
            cursor,
            generation,
            last_used: Instant::now(),
        };
        let displaced = self.shard(&key).lock().push(key.clone(), pooled);

        if let Some((displaced_key, _)) = displaced {
            if displaced_key != key {
                PoolCounters::add(&self.counters.evictions, 1);
                tracing::debug!(
                    collection = %displaced_key.collection,
                    window = %displaced_key.window,
                    "evicted least recently used cursor"
                );
            }
        }
    }

    fn purge(&self, matches: impl Fn(&CursorKey) -> bool) -> u64 {
        let mut purged = Vec::new();

        for shard in &self.shards {
            let mut shard = shard.lock();
            let keys = shard
                .iter()
                .filter(|(key, _)| matches(key))
                .map(|(key, _)| key.clone())
                .collect::<Vec<_>>();

            purged.extend(keys.iter().filter_map(|key| shard.pop(key)));
        }

        let count = purged.len() as u64;
        PoolCounters::add(&self.counters.invalidations, count);
        count
    }
}

impl<C> std::fmt::Debug for CursorPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorPool")
            .field("shards", &self.shards.len())
            .field("max_idle", &self.max_idle)
            .field("random_span", &self.random_span)
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}
