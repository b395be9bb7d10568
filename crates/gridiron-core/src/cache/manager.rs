//! Cache layer implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use gridiron_storage::PersistentKeyStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::period::{PeriodCalendar, PeriodKey};
use super::policy::EvictionPolicy;
use crate::clock::{Clock, SystemClock};

/// Durable index of every persistent key, used by `clear`
const ALL_KEYS_TAG: &str = "*";
const TAG_INDEX_PREFIX: &str = "__tag__:";

/// Configuration for the cache layer
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries held in memory before eviction starts
    pub max_entries: usize,
    /// Eviction policy
    pub eviction_policy: EvictionPolicy,
    /// Width of a deterministic period while live
    pub live_bucket: Duration,
    /// Offset defining the local calendar day for static periods
    pub utc_offset: FixedOffset,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            eviction_policy: EvictionPolicy::Lru,
            live_bucket: Duration::from_secs(15 * 60),
            utc_offset: Utc.fix(),
        }
    }
}

/// How an entry is stored
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub ttl: Duration,
    pub tags: Vec<String>,
    /// Mirror the entry to the durable store
    pub persistent: bool,
}

impl PutOptions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tags.into_iter().fold(self, |opts, tag| opts.tag(tag))
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// A cache entry; only ever handed out as a `CachedValue` copy
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub(crate) value: Bytes,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) tags: Vec<String>,
    pub(crate) persistent: bool,
    pub(crate) access_count: u64,
    pub(crate) last_accessed: DateTime<Utc>,
    /// Insertion order
    pub(crate) seq: u64,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    fn snapshot(&self) -> CachedValue {
        CachedValue {
            value: self.value.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Immutable view of a cached value
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Bytes,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What `get_or_insert_with` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupOutcome {
    /// Served from an existing entry (including one another loader won the race for)
    Hit,
    /// Loaded and stored
    Inserted,
    /// Loaded, but a tag was invalidated while loading, so it was not stored
    Uncached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub value: Bytes,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub outcome: LookupOutcome,
}

impl Lookup {
    fn from_cached(cached: CachedValue, outcome: LookupOutcome) -> Self {
        Self {
            value: cached.value,
            created_at: cached.created_at,
            expires_at: cached.expires_at,
            outcome,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub persistent_entries: usize,
    pub tags: usize,
    pub max_entries: usize,
    pub eviction_policy: String,
    pub durable_backend: Option<String>,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub durable_loads: u64,
    pub durable_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    inserts: u64,
    evictions: u64,
    expirations: u64,
    invalidations: u64,
    durable_loads: u64,
    durable_errors: u64,
}

/// Tag generations seen when a load or write started
#[derive(Debug, Clone, PartialEq, Eq)]
struct Generation {
    epoch: u64,
    tags: Vec<u64>,
}

/// Invalidation counters per tag
#[derive(Debug, Clone, Default)]
struct Generations {
    /// Bumped by `clear`
    epoch: u64,
    tags: HashMap<String, u64>,
}

impl Generations {
    fn of(&self, tags: &[String]) -> Generation {
        Generation {
            epoch: self.epoch,
            tags: tags
                .iter()
                .map(|t| self.tags.get(t).copied().unwrap_or(0))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    tag_index: HashMap<String, HashSet<String>>,
    generations: Generations,
    seq: u64,
    counters: Counters,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn insert(&mut self, key: &str, entry: CacheEntry) {
        self.remove(key);
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.entries.insert(key.to_string(), entry);
        self.counters.inserts += 1;
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn generation(&self, tags: &[String]) -> Generation {
        self.generations.of(tags)
    }

    fn bump(&mut self, tag: &str) {
        *self.generations.tags.entry(tag.to_string()).or_insert(0) += 1;
    }

    /// Evict down to `max` entries, never choosing `keep`
    fn evict_over(&mut self, max: usize, policy: EvictionPolicy, keep: &str) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max {
            let victim = self
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != keep)
                .min_by(|a, b| policy.compare(a.1, b.1))
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else { break };
            debug!("Evicting cache entry: {}", victim);
            self.remove(&victim);
            self.counters.evictions += 1;
            evicted += 1;
        }
        evicted
    }
}

/// Header of a durable entry; the value bytes follow it
#[derive(Debug, Serialize, Deserialize)]
struct DurableHeader {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    tags: Vec<String>,
}

fn encode_durable(entry: &CacheEntry) -> Result<Bytes, serde_json::Error> {
    let header = serde_json::to_vec(&DurableHeader {
        created_at: entry.created_at,
        expires_at: entry.expires_at,
        tags: entry.tags.clone(),
    })?;
    let mut buf = BytesMut::with_capacity(4 + header.len() + entry.value.len());
    buf.put_u32(header.len() as u32);
    buf.put_slice(&header);
    buf.put_slice(&entry.value);
    Ok(buf.freeze())
}

fn decode_durable(mut raw: Bytes) -> Option<(DurableHeader, Bytes)> {
    if raw.remaining() < 4 {
        return None;
    }
    let len = raw.get_u32() as usize;
    if raw.remaining() < len {
        return None;
    }
    let header = raw.split_to(len);
    let header: DurableHeader = serde_json::from_slice(&header).ok()?;
    Some((header, raw))
}

fn tag_index_key(tag: &str) -> String {
    format!("{}{}", TAG_INDEX_PREFIX, tag)
}

fn ttl_as_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

/// In-process TTL cache with tags, bounded size, durable spill-over and
/// deterministic period keys
///
/// The in-memory map sits behind a synchronous mutex that is never held
/// across an await point; durable I/O happens outside it.
pub struct CacheLayer {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    calendar: PeriodCalendar,
    inner: Mutex<Inner>,
    durable: Option<Arc<dyn PersistentKeyStore>>,
    /// Serializes read-modify-write of durable tag indexes
    index_lock: tokio::sync::Mutex<()>,
}

impl CacheLayer {
    /// Create a memory-only cache on the system clock
    pub fn new(config: CacheConfig) -> Self {
        info!(
            "Initializing cache layer (max_entries: {}, policy: {}, live bucket: {:?})",
            config.max_entries,
            config.eviction_policy.as_str(),
            config.live_bucket
        );

        let calendar = PeriodCalendar::new(config.utc_offset, config.live_bucket);
        Self {
            config: CacheConfig {
                max_entries: config.max_entries.max(1),
                ..config
            },
            clock: Arc::new(SystemClock),
            calendar,
            inner: Mutex::new(Inner::default()),
            durable: None,
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Mirror persistent entries to `store`
    pub fn with_durable(mut self, store: Arc<dyn PersistentKeyStore>) -> Self {
        info!("Cache spill-over enabled ({})", store.backend_name());
        self.durable = Some(store);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Get a fresh value
    ///
    /// Expired entries are dropped on the way. On a memory miss the durable
    /// store is consulted and a fresh durable entry is loaded back into memory.
    pub async fn get(&self, key: &str) -> Option<CachedValue> {
        let found = self.lookup(key).await;
        let mut inner = self.inner.lock();
        if found.is_some() {
            inner.counters.hits += 1;
            metrics::counter!("gridiron_cache_hits_total").increment(1);
        } else {
            inner.counters.misses += 1;
            metrics::counter!("gridiron_cache_misses_total").increment(1);
        }
        found
    }

    /// Lookup without touching hit/miss counters
    async fn lookup(&self, key: &str) -> Option<CachedValue> {
        let now = self.clock.now();
        let expired_persistent = {
            let mut inner = self.inner.lock();
            match inner.entries.get(key).map(|e| e.is_fresh(now)) {
                Some(true) => {
                    let entry = inner.entries.get_mut(key)?;
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    return Some(entry.snapshot());
                }
                Some(false) => {
                    let expired = inner.remove(key);
                    inner.counters.expirations += 1;
                    expired.is_some_and(|e| e.persistent)
                }
                None => false,
            }
        };

        let store = self.durable.as_ref()?;
        if expired_persistent {
            self.delete_durable(store.as_ref(), key).await;
            return None;
        }
        self.load_durable(store.as_ref(), key, now).await
    }

    /// Lazily bring a durable entry back into memory
    async fn load_durable(
        &self,
        store: &dyn PersistentKeyStore,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<CachedValue> {
        let before = self.inner.lock().generations.clone();
        let raw = match store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read durable cache entry {}: {}", key, e);
                self.inner.lock().counters.durable_errors += 1;
                return None;
            }
        };

        let Some((header, value)) = decode_durable(raw) else {
            warn!("Discarding corrupt durable cache entry {}", key);
            self.delete_durable(store, key).await;
            return None;
        };

        if header.expires_at <= now {
            debug!("Durable cache entry {} expired", key);
            self.delete_durable(store, key).await;
            return None;
        }

        let mut inner = self.inner.lock();
        // A writer may have raced us while the store was read
        if let Some(entry) = inner.entries.get(key)
            && entry.is_fresh(now)
        {
            return Some(entry.snapshot());
        }
        // The copy read may predate an invalidation that ran meanwhile
        if inner.generation(&header.tags) != before.of(&header.tags) {
            debug!("Not loading {}: invalidated while reading", key);
            return None;
        }

        let seq = inner.next_seq();
        let entry = CacheEntry {
            value,
            created_at: header.created_at,
            expires_at: header.expires_at,
            tags: header.tags,
            persistent: true,
            access_count: 1,
            last_accessed: now,
            seq,
        };
        let snapshot = entry.snapshot();
        inner.insert(key, entry);
        inner.counters.durable_loads += 1;
        inner.evict_over(self.config.max_entries, self.config.eviction_policy, key);
        debug!("Loaded cache entry {} from durable store", key);
        Some(snapshot)
    }

    /// Store a value, replacing any existing entry
    pub async fn put(&self, key: &str, value: Bytes, options: PutOptions) -> CachedValue {
        let (entry, generation) = {
            let mut inner = self.inner.lock();
            let entry = self.new_entry(&mut inner, value, &options);
            let generation = inner.generation(&entry.tags);
            inner.insert(key, entry.clone());
            inner.evict_over(self.config.max_entries, self.config.eviction_policy, key);
            (entry, generation)
        };
        self.persist(key, &entry, generation).await;
        entry.snapshot()
    }

    /// Store a value unless a fresh entry exists; returns whichever value won
    pub async fn put_if_absent(&self, key: &str, value: Bytes, options: PutOptions) -> CachedValue {
        if let Some(existing) = self.lookup(key).await {
            return existing;
        }
        match self.insert_if_absent(key, value, &options, None).await {
            Insert::Stored(cached) | Insert::Existing(cached) => cached,
            // No generation check was requested
            Insert::Superseded(value) => {
                let now = self.clock.now();
                CachedValue {
                    value,
                    created_at: now,
                    expires_at: now,
                }
            }
        }
    }

    /// Get a fresh value, or load and store one
    ///
    /// Concurrent loaders for the same key all return the value of the first
    /// one to store. If a tag of `options` is invalidated while the loader
    /// runs, the loaded value is returned but not stored.
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &str,
        options: PutOptions,
        loader: F,
    ) -> Result<Lookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(Lookup::from_cached(hit, LookupOutcome::Hit));
        }

        let generation = self.inner.lock().generation(&options.tags);
        let value = loader().await?;

        let lookup = match self
            .insert_if_absent(key, value, &options, Some(generation))
            .await
        {
            Insert::Stored(cached) => Lookup::from_cached(cached, LookupOutcome::Inserted),
            Insert::Existing(cached) => Lookup::from_cached(cached, LookupOutcome::Hit),
            Insert::Superseded(value) => {
                debug!("Not caching {}: invalidated while loading", key);
                let now = self.clock.now();
                Lookup {
                    value,
                    created_at: now,
                    expires_at: now,
                    outcome: LookupOutcome::Uncached,
                }
            }
        };
        Ok(lookup)
    }

    /// Derive the deterministic key for the current period
    pub fn deterministic_key(&self, namespace: &str, context: &str, live: bool) -> PeriodKey {
        self.calendar
            .key(namespace, context, live, self.clock.now())
    }

    /// Deterministic-mode read
    ///
    /// The entry lives until the end of the period, so every read within the
    /// same (period, mode) pair returns the same bytes until a tag of
    /// `options` is invalidated. `options.ttl` is ignored.
    pub async fn get_or_insert_deterministic<F, Fut, E>(
        &self,
        namespace: &str,
        context: &str,
        live: bool,
        options: PutOptions,
        loader: F,
    ) -> Result<(PeriodKey, Lookup), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        let period = self.deterministic_key(namespace, context, live);
        let remaining = (period.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_secs(1));
        let options = PutOptions {
            ttl: remaining,
            ..options
        };
        let lookup = self.get_or_insert_with(&period.key, options, loader).await?;
        Ok((period, lookup))
    }

    /// Remove one entry, including its durable copy
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.remove(key);
            if removed.is_some() {
                inner.counters.invalidations += 1;
            }
            removed
        };

        let mut durable_removed = false;
        if let Some(store) = &self.durable {
            durable_removed = store.delete(key).await.unwrap_or_else(|e| {
                warn!("Failed to delete durable cache entry {}: {}", key, e);
                false
            });
        }
        removed.is_some() || durable_removed
    }

    /// Remove every entry carrying `tag`, in memory and in the durable store
    ///
    /// Loads of tagged values already in flight will not be stored.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let mut removed: HashSet<String> = {
            let mut inner = self.inner.lock();
            inner.bump(tag);
            let keys = inner.tag_index.get(tag).cloned().unwrap_or_default();
            for key in &keys {
                inner.remove(key);
            }
            inner.counters.invalidations += keys.len() as u64;
            keys
        };

        if let Some(store) = &self.durable {
            let _guard = self.index_lock.lock().await;
            let index_key = tag_index_key(tag);
            for key in self.read_index(store.as_ref(), &index_key).await {
                match store.delete(&key).await {
                    Ok(true) => {
                        removed.insert(key);
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Failed to delete durable cache entry {}: {}", key, e),
                }
            }
            if let Err(e) = store.delete(&index_key).await {
                warn!("Failed to delete tag index {}: {}", index_key, e);
            }
        }

        if !removed.is_empty() {
            debug!("Invalidated {} cache entries tagged {}", removed.len(), tag);
        }
        removed.len()
    }

    /// Drop everything, including durable copies
    pub async fn clear(&self) -> usize {
        let cleared = {
            let mut inner = self.inner.lock();
            let count = inner.entries.len();
            inner.entries.clear();
            inner.tag_index.clear();
            inner.generations.epoch += 1;
            inner.counters.invalidations += count as u64;
            count
        };
        let durable = if self.durable.is_some() {
            self.invalidate_tag(ALL_KEYS_TAG).await
        } else {
            0
        };
        info!("Cleared cache ({} in memory, {} durable)", cleared, durable);
        cleared.max(durable)
    }

    /// Remove expired in-memory entries
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<(String, bool)> = {
            let mut inner = self.inner.lock();
            let keys: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| !e.is_fresh(now))
                .map(|(k, _)| k.clone())
                .collect();
            let expired: Vec<(String, bool)> = keys
                .into_iter()
                .filter_map(|k| inner.remove(&k).map(|e| (k, e.persistent)))
                .collect();
            inner.counters.expirations += expired.len() as u64;
            expired
        };

        if let Some(store) = &self.durable {
            for (key, persistent) in &expired {
                if *persistent {
                    self.delete_durable(store.as_ref(), key).await;
                }
            }
        }
        expired.len()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            persistent_entries: inner.entries.values().filter(|e| e.persistent).count(),
            tags: inner.tag_index.len(),
            max_entries: self.config.max_entries,
            eviction_policy: self.config.eviction_policy.as_str().to_string(),
            durable_backend: self.durable.as_ref().map(|s| s.backend_name().to_string()),
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            inserts: inner.counters.inserts,
            evictions: inner.counters.evictions,
            expirations: inner.counters.expirations,
            invalidations: inner.counters.invalidations,
            durable_loads: inner.counters.durable_loads,
            durable_errors: inner.counters.durable_errors,
        }
    }

    fn new_entry(&self, inner: &mut Inner, value: Bytes, options: &PutOptions) -> CacheEntry {
        let now = self.clock.now();
        CacheEntry {
            value,
            created_at: now,
            expires_at: now
                .checked_add_signed(ttl_as_chrono(options.ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            tags: options.tags.clone(),
            persistent: options.persistent && self.durable.is_some(),
            access_count: 0,
            last_accessed: now,
            seq: inner.next_seq(),
        }
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        value: Bytes,
        options: &PutOptions,
        generation: Option<Generation>,
    ) -> Insert {
        let now = self.clock.now();
        let (entry, current) = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.entries.get(key)
                && existing.is_fresh(now)
            {
                return Insert::Existing(existing.snapshot());
            }
            let current = inner.generation(&options.tags);
            if let Some(generation) = generation
                && current != generation
            {
                return Insert::Superseded(value);
            }
            let entry = self.new_entry(&mut inner, value, options);
            inner.insert(key, entry.clone());
            inner.evict_over(self.config.max_entries, self.config.eviction_policy, key);
            (entry, current)
        };
        self.persist(key, &entry, current).await;
        Insert::Stored(entry.snapshot())
    }

    /// Mirror a persistent entry and register it in its tag indexes
    ///
    /// `generation` is the tag generation the entry was stored under. If one
    /// of its tags is invalidated before the durable copy is indexed, the
    /// copy is deleted again so a later read cannot bring it back.
    async fn persist(&self, key: &str, entry: &CacheEntry, generation: Generation) {
        if !entry.persistent {
            return;
        }
        let Some(store) = &self.durable else { return };

        let encoded = match encode_durable(entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode cache entry {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = store.set(key, encoded).await {
            warn!("Failed to write durable cache entry {}: {}", key, e);
            self.inner.lock().counters.durable_errors += 1;
            return;
        }

        let _guard = self.index_lock.lock().await;
        for tag in entry.tags.iter().map(String::as_str).chain([ALL_KEYS_TAG]) {
            let index_key = tag_index_key(tag);
            let mut keys = self.read_index(store.as_ref(), &index_key).await;
            if keys.iter().any(|k| k == key) {
                continue;
            }
            keys.push(key.to_string());
            let encoded = match serde_json::to_vec(&keys) {
                Ok(encoded) => Bytes::from(encoded),
                Err(e) => {
                    warn!("Failed to encode tag index {}: {}", index_key, e);
                    continue;
                }
            };
            if let Err(e) = store.set(&index_key, encoded).await {
                warn!("Failed to write tag index {}: {}", index_key, e);
                self.inner.lock().counters.durable_errors += 1;
            }
        }

        // An invalidation that bumps after this check finds the key indexed
        {
            let mut inner = self.inner.lock();
            if inner.generation(&entry.tags) == generation {
                return;
            }
            if inner.entries.get(key).is_some_and(|e| e.seq == entry.seq) {
                inner.remove(key);
            }
        }
        debug!("Dropping durable copy of {}: invalidated while writing", key);
        self.delete_durable(store.as_ref(), key).await;
    }

    async fn read_index(&self, store: &dyn PersistentKeyStore, index_key: &str) -> Vec<String> {
        match store.get(index_key).await {
            Ok(Some(raw)) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt tag index {}: {}", index_key, e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read tag index {}: {}", index_key, e);
                Vec::new()
            }
        }
    }

    async fn delete_durable(&self, store: &dyn PersistentKeyStore, key: &str) {
        if let Err(e) = store.delete(key).await {
            warn!("Failed to delete durable cache entry {}: {}", key, e);
            self.inner.lock().counters.durable_errors += 1;
        }
    }
}

enum Insert {
    Stored(CachedValue),
    Existing(CachedValue),
    Superseded(Bytes),
}

/// Spawn a background task that purges expired entries periodically
pub fn spawn_cleanup_task(cache: Arc<CacheLayer>, every: Duration) -> tokio::task::JoinHandle<()> {
    use tokio::time::interval;

    info!("Starting background cache cleanup task (interval: {:?})", every);

    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_secs(1)));

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = cache.purge_expired().await;
            if purged > 0 {
                info!("Scheduled cleanup: {} expired cache entries removed", purged);
            }
        }
    })
}
