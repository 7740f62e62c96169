use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

use crate::error::CacheContents;

/// The channel over which the outcome of one load is shared between all
/// callers waiting for the same key.
pub(crate) type LoadChannel<V> = Shared<oneshot::Receiver<CacheContents<V>>>;

/// Tracks the in-flight load per distinct key.
///
/// A slot is created lazily when the first caller misses, and removed again
/// when the load settles, so the registry stays bounded even under high key
/// cardinality. Keys are compared by value equality, which makes composite
/// multi-field keys work the same as scalar ones.
pub(crate) struct LoadSlots<K, V> {
    slots: Mutex<HashMap<K, LoadChannel<V>>>,
}

impl<K, V> Default for LoadSlots<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> LoadSlots<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Joins the in-flight load for `key`, or installs a fresh one.
    ///
    /// `install` is only invoked if no load is currently in flight for this
    /// key; the channel it returns becomes the slot every later caller joins.
    /// The boolean is `true` if this caller installed the slot.
    pub(crate) fn join_or_install(
        &self,
        key: &K,
        install: impl FnOnce() -> oneshot::Receiver<CacheContents<V>>,
    ) -> (LoadChannel<V>, bool) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(channel) = slots.get(key) {
            // A concurrent load for this key was deduplicated.
            (channel.clone(), false)
        } else {
            let channel = install().shared();
            slots.insert(key.clone(), channel.clone());
            (channel, true)
        }
    }

    /// Releases the slot for `key` once its load has settled.
    ///
    /// Callers either joined a channel that will still receive the outcome,
    /// or they arrive after this and start a new load.
    pub(crate) fn release(&self, key: &K) {
        self.slots.lock().unwrap().remove(key);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
