//! Content-addressed cache of rendered tab blocks.
//!
//! [`FragmentCache`] maps a [`FragmentKey`] hash to the block rendered for it.
//! The lifecycle follows a documentation build:
//!
//! ```text
//! create -> mark_build_start -> get_or_compute* -> finish_build (evict + persist)
//! ```
//!
//! Entries loaded from disk or computed in an earlier build are dropped by
//! [`FragmentCache::evict_stale`] unless the current build used them.

mod store;

pub use store::{is_cache_dir, CacheStore, FileStore};

use crate::fragment::BlockMeta;
use crate::tabs::RenderOptions;
use crate::config::DefaultTab;
use crate::version::VersionRange;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything that influences the rendered text of a fragment.
#[derive(Debug)]
pub struct FragmentKey<'a> {
    pub code: &'a str,
    pub language: &'a str,
    pub range: VersionRange,
    pub title_template: &'a str,
    pub meta: &'a BlockMeta,
    pub syntax: &'a str,
    pub render: RenderOptions,
}

impl FragmentKey<'_> {
    /// Hex SHA-256 over a length-prefixed encoding of every field, so that
    /// no two distinct inputs can produce the same byte stream.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |value: &str| {
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        };

        field(self.syntax);
        field(self.language);
        field(&self.range.min().to_string());
        field(&self.range.max().to_string());
        field(self.title_template);
        field(match self.render.default_tab {
            DefaultTab::Highest => "highest",
            DefaultTab::Lowest => "lowest",
        });
        field(if self.render.reverse_order { "reverse" } else { "forward" });
        match self.meta {
            BlockMeta::Fence { head, tail } => {
                field("fence");
                field(head);
                field(tail);
            }
            BlockMeta::Directive { options } => {
                field("directive");
                for (name, value) in options {
                    field(name);
                    field(value.as_deref().unwrap_or(""));
                }
            }
        }
        field(self.code);

        format!("{:x}", hasher.finalize())
    }
}

/// Whether the host signals the end of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Entries unused by the finished build are dropped.
    OnBuildFinished,
    /// Entries live until the cache is dropped.
    Disabled,
}

#[derive(Debug, Default)]
struct Slot {
    value: Mutex<Option<String>>,
    last_access: AtomicU64,
    dirty: AtomicBool,
}

/// Counters for the build summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

/// Thread-safe cache with at-most-once computation per key.
pub struct FragmentCache {
    entries: Mutex<HashMap<String, Arc<Slot>>>,
    generation: AtomicU64,
    eviction: Eviction,
    store: Option<Box<dyn CacheStore>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FragmentCache {
    /// Memory-only cache.
    pub fn in_memory(eviction: Eviction) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            eviction,
            store: None,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Cache backed by `store`, preloaded with everything it holds.
    pub fn with_store(store: Box<dyn CacheStore>, eviction: Eviction) -> Self {
        let loaded = store.load();
        log::debug!("Loaded {} cached block(s)", loaded.len());

        let entries = loaded
            .into_iter()
            .map(|(key, value)| {
                let slot = Slot {
                    value: Mutex::new(Some(value)),
                    ..Slot::default()
                };
                (key, Arc::new(slot))
            })
            .collect();

        Self {
            entries: Mutex::new(entries),
            store: Some(store),
            ..Self::in_memory(eviction)
        }
    }

    /// Starts a new build: entries must be used again to survive eviction.
    pub fn mark_build_start(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the value for `key`, running `compute` on a miss.
    ///
    /// Concurrent callers with the same key wait for the first computation
    /// and share its result. A failed computation stores nothing.
    pub fn get_or_compute<E>(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<String, E>,
    ) -> Result<String, E> {
        let slot = {
            let mut entries = lock(&self.entries);
            Arc::clone(entries.entry(key.to_string()).or_default())
        };
        slot.last_access
            .store(self.generation.load(Ordering::SeqCst), Ordering::SeqCst);

        let mut value = lock(&slot.value);
        if let Some(cached) = value.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let computed = match compute() {
            Ok(computed) => computed,
            Err(err) => {
                drop(value);
                self.discard_empty(key, &slot);
                return Err(err);
            }
        };
        *value = Some(computed.clone());
        slot.dirty.store(true, Ordering::SeqCst);
        Ok(computed)
    }

    /// Removes the entry for `key` if it is still `slot`, holds no value
    /// and nobody else is waiting on it. Takes the map lock before the
    /// slot's value lock, like every other path.
    fn discard_empty(&self, key: &str, slot: &Arc<Slot>) {
        let mut entries = lock(&self.entries);
        let unused = entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
            && Arc::strong_count(slot) == 2
            && lock(&slot.value).is_none();
        if unused {
            entries.remove(key);
        }
    }

    /// Looks a key up without computing. Counts as an access.
    pub fn get(&self, key: &str) -> Option<String> {
        let slot = lock(&self.entries).get(key).cloned()?;
        slot.last_access
            .store(self.generation.load(Ordering::SeqCst), Ordering::SeqCst);
        let value = lock(&slot.value).clone();
        value
    }

    /// Removes entries not accessed since the last [`mark_build_start`]
    /// and returns their keys. Does nothing when eviction is disabled.
    ///
    /// [`mark_build_start`]: FragmentCache::mark_build_start
    pub fn evict_stale(&self) -> Vec<String> {
        if self.eviction == Eviction::Disabled {
            return Vec::new();
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let mut entries = lock(&self.entries);
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| {
                slot.last_access.load(Ordering::SeqCst) < generation
                    || lock(&slot.value).is_none()
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.remove(key);
        }
        stale
    }

    /// Writes new entries to the backing store. With `evict`, stale entries
    /// are dropped first and removed from the store as well.
    pub fn persist(&self, evict: bool) -> std::io::Result<()> {
        let evicted = if evict { self.evict_stale() } else { Vec::new() };
        let Some(store) = &self.store else {
            return Ok(());
        };

        for key in &evicted {
            store.remove(key)?;
        }

        let entries = lock(&self.entries);
        let mut written = 0;
        for (key, slot) in entries.iter() {
            if !slot.dirty.swap(false, Ordering::SeqCst) {
                continue;
            }
            if let Some(value) = lock(&slot.value).as_ref() {
                store.write(key, value)?;
                written += 1;
            }
        }
        log::debug!(
            "Persisted {} cached block(s), evicted {}",
            written,
            evicted.len()
        );
        Ok(())
    }

    /// Build-finished hook: evict what this build did not use, then persist.
    pub fn finish_build(&self) -> std::io::Result<()> {
        self.persist(self.eviction == Eviction::OnBuildFinished)
    }

    /// Build-failed hook: keep everything, persist what was computed.
    pub fn abort_build(&self) -> std::io::Result<()> {
        self.persist(false)
    }

    /// Drops every entry from memory and from the backing store.
    pub fn clear_all(&self) -> std::io::Result<()> {
        lock(&self.entries).clear();
        match &self.store {
            Some(store) => store.clear(),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: lock(&self.entries).len(),
        }
    }
}
