use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::BoxFuture;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::{CacheContents, CacheError};
use crate::singleflight::LoadSlots;

/// The loader supplied to a [`RefreshingCache`] at construction time.
///
/// Invoked for cache misses and for scheduled background refreshes. It must be
/// safe to call concurrently for distinct keys, and it must not hold on to
/// cache-internal state.
pub(crate) type CacheLoader<K, V> =
    Box<dyn Fn(&K) -> BoxFuture<'static, CacheContents<V>> + Send + Sync>;

/// An entry in the cache map, together with its two independent deadlines.
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    /// When the sweeper evicts this entry.
    expires_at: Instant,
    /// When the sweeper proactively reloads this entry.
    next_refresh_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: Instant, expire_after: Duration, refresh_after: Duration) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now + expire_after,
            next_refresh_at: now + refresh_after,
        }
    }
}

/// A self-expiring, auto-refreshing, concurrency-safe `K → V` map.
///
/// Values are loaded on demand through the loader given to [`new`](Self::new).
/// Concurrent misses for the same key share a single loader invocation, and
/// failed loads are never committed, so callers can simply retry.
///
/// A background sweeper evicts entries whose expiry deadline passed and
/// reloads live entries whose refresh deadline passed. A failed refresh keeps
/// the stale value in place; freshness is an optimization here, not a
/// correctness requirement.
///
/// The handle is cheap to clone; all clones operate on the same map. Dropping
/// the last handle stops the sweeper.
pub struct RefreshingCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for RefreshingCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<K, V> {
    name: &'static str,
    expire_after: Duration,
    refresh_after: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    /// In-flight loads, one slot per key currently being loaded.
    loads: LoadSlots<K, V>,
    /// Keys with a background refresh currently running.
    refreshes: Mutex<HashSet<K>>,
    loader: CacheLoader<K, V>,
}

impl<K, V> fmt::Debug for RefreshingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .entries
            .try_lock()
            .map(|e| e.len())
            .unwrap_or_default();
        let refreshes = self
            .inner
            .refreshes
            .try_lock()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("RefreshingCache")
            .field("name", &self.inner.name)
            .field("entries", &entries)
            .field("running refreshes", &refreshes)
            .finish()
    }
}

impl<K, V> RefreshingCache<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a new cache and spawns its sweeper onto the current runtime.
    ///
    /// `name` is a diagnostic label used in logs. `expire_after` and
    /// `refresh_after` are fixed for the lifetime of the cache; neither needs
    /// to be shorter than the other.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        name: &'static str,
        expire_after: Duration,
        refresh_after: Duration,
        loader: impl Fn(&K) -> BoxFuture<'static, CacheContents<V>> + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new(CacheInner {
            name,
            expire_after,
            refresh_after,
            entries: Mutex::new(HashMap::new()),
            loads: LoadSlots::default(),
            refreshes: Mutex::new(HashSet::new()),
            loader: Box::new(loader),
        });

        // The sweeper only holds a weak handle, so it shuts down once the
        // last cache handle is dropped.
        let cadence = sweep_cadence(expire_after, refresh_after);
        tokio::spawn(sweep(Arc::downgrade(&inner), cadence));

        Self { inner }
    }

    /// Inserts or overwrites an entry, resetting its deadlines from now.
    ///
    /// Never invokes the loader.
    pub fn put(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Returns the value for `key`, loading it on a miss.
    ///
    /// Concurrent callers for the same key all observe the outcome of the one
    /// loader invocation that is admitted, including a failed one. A failed
    /// load leaves no entry behind, so the next call retries the loader.
    ///
    /// This only suspends while the load for *this* key is in flight; loads
    /// for other keys proceed independently.
    pub async fn get(&self, key: &K) -> CacheContents<V> {
        if let Some(value) = self.inner.live_value(key) {
            tracing::trace!(cache = self.inner.name, ?key, "cache hit");
            return Ok(value);
        }

        let (channel, installed) = self
            .inner
            .loads
            .join_or_install(key, || self.spawn_load(key.clone()));
        if !installed {
            tracing::trace!(cache = self.inner.name, ?key, "joined in-flight load");
        }

        channel.await.unwrap_or(Err(CacheError::Cancelled))
    }

    /// Whether an entry for `key` exists and has not been swept yet.
    ///
    /// Purely observational: never loads, refreshes, or extends deadlines. An
    /// entry whose expiry has passed but which the sweeper has not gotten to
    /// yet still counts as present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.entries.lock().unwrap().contains_key(key)
    }

    /// Removes the entry for `key`, returning its value if one was present.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner
            .entries
            .lock()
            .unwrap()
            .remove(key)
            .map(|entry| entry.value)
    }

    /// Drops all entries. The next lookup for any key goes to the loader.
    pub fn clear(&self) {
        let mut entries = self.inner.entries.lock().unwrap();
        let dropped = entries.len();
        entries.clear();
        drop(entries);
        tracing::debug!(cache = self.inner.name, dropped, "cache cleared");
    }

    /// The diagnostic label of this cache.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// The number of entries currently held, swept or not.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    /// The number of load slots currently in flight.
    #[cfg(test)]
    pub(crate) fn inflight_loads(&self) -> usize {
        self.inner.loads.len()
    }

    /// Spawns the load for `key` and returns the channel its outcome will be
    /// published on.
    ///
    /// The load runs as its own task, so it settles even if every waiting
    /// caller goes away in the meantime.
    fn spawn_load(&self, key: K) -> oneshot::Receiver<CacheContents<V>> {
        let (sender, receiver) = oneshot::channel();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let slot = KeyGuard::load_slot(Arc::clone(&inner), key.clone());

            // The slot was installed after this caller's miss; a racing load
            // or refresh may have committed a value since. Re-check before
            // paying for the loader.
            let result = match inner.live_value(&key) {
                Some(value) => Ok(value),
                None => {
                    tracing::trace!(cache = inner.name, ?key, "invoking loader");
                    let result = (inner.loader)(&key).await;
                    if let Ok(value) = &result {
                        inner.insert(key.clone(), value.clone());
                    }
                    result
                }
            };

            // Release the slot before publishing, so that a caller either
            // joins a channel that will still produce the outcome, or misses
            // the slot and finds the committed entry.
            drop(slot);
            sender.send(result).ok();
        });

        receiver
    }
}

impl<K, V> CacheInner<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Returns the value for `key` if an entry exists and has not expired.
    fn live_value(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        (Instant::now() < entry.expires_at).then(|| entry.value.clone())
    }

    fn insert(&self, key: K, value: V) {
        let entry = CacheEntry::new(value, Instant::now(), self.expire_after, self.refresh_after);
        self.entries.lock().unwrap().insert(key, entry);
    }

    /// One sweeper pass: evict everything past its expiry deadline, then kick
    /// off refreshes for live entries past their refresh deadline.
    fn sweep_once(self: &Arc<Self>) {
        let now = Instant::now();
        let mut due = Vec::new();
        {
            let mut entries = self.entries.lock().unwrap();
            entries.retain(|key, entry| {
                if now >= entry.expires_at {
                    let age = now.duration_since(entry.created_at);
                    tracing::trace!(cache = self.name, ?key, ?age, "evicting expired entry");
                    return false;
                }
                if now >= entry.next_refresh_at {
                    due.push(key.clone());
                }
                true
            });
        }

        for key in due {
            self.spawn_refresh(key);
        }
    }

    /// Reloads `key` in its own task, deduplicated against refreshes that are
    /// still running from an earlier tick.
    ///
    /// One slow refresh therefore never delays sweeping or other keys.
    fn spawn_refresh(self: &Arc<Self>, key: K) {
        if !self.refreshes.lock().unwrap().insert(key.clone()) {
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _done = KeyGuard::refresh_marker(Arc::clone(&inner), key.clone());

            match (inner.loader)(&key).await {
                Ok(value) => {
                    let now = Instant::now();
                    let mut entries = inner.entries.lock().unwrap();
                    // The entry may have been evicted or invalidated while the
                    // refresh was running; then the reloaded value is dropped.
                    if let Some(entry) = entries.get_mut(&key) {
                        *entry =
                            CacheEntry::new(value, now, inner.expire_after, inner.refresh_after);
                    }
                }
                Err(error) => {
                    // The stale value stays authoritative; the sweeper retries
                    // on a later tick.
                    tracing::warn!(cache = inner.name, ?key, %error, "background refresh failed");
                }
            }
        });
    }
}

/// Clears a key's in-flight bookkeeping when dropped, so that a panicking
/// loader cannot permanently wedge that key.
struct KeyGuard<K: Clone + Eq + Hash, V: Clone> {
    inner: Arc<CacheInner<K, V>>,
    key: K,
    kind: GuardKind,
}

enum GuardKind {
    LoadSlot,
    RefreshMarker,
}

impl<K: Clone + Eq + Hash, V: Clone> KeyGuard<K, V> {
    fn load_slot(inner: Arc<CacheInner<K, V>>, key: K) -> Self {
        Self {
            inner,
            key,
            kind: GuardKind::LoadSlot,
        }
    }

    fn refresh_marker(inner: Arc<CacheInner<K, V>>, key: K) -> Self {
        Self {
            inner,
            key,
            kind: GuardKind::RefreshMarker,
        }
    }
}

impl<K: Clone + Eq + Hash, V: Clone> Drop for KeyGuard<K, V> {
    fn drop(&mut self) {
        match self.kind {
            GuardKind::LoadSlot => self.inner.loads.release(&self.key),
            GuardKind::RefreshMarker => {
                self.inner.refreshes.lock().unwrap().remove(&self.key);
            }
        }
    }
}

/// How often the sweeper wakes up, derived from the configured deadlines so
/// that neither eviction nor refresh lags more than half its interval.
fn sweep_cadence(expire_after: Duration, refresh_after: Duration) -> Duration {
    (expire_after.min(refresh_after) / 2).max(Duration::from_millis(10))
}

async fn sweep<K, V>(cache: Weak<CacheInner<K, V>>, cadence: Duration)
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut interval = time::interval(cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = cache.upgrade() else {
            break;
        };
        inner.sweep_once();
    }
}
