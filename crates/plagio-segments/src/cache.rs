// Copyright 2025 Plagio Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bounded LRU cache of loaded engines, keyed by index directory.
//!
//! Entries are pinned while a query borrows them so eviction cannot pull
//! an index out from under a search. Failed loads are remembered and
//! retried only after a backoff. LRU position moves only on a successful
//! borrow, so repeated misses cannot keep a broken entry hot.

use lru::LruCache;
use parking_lot::Mutex;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plagio::LoadedIndex;

#[derive(Default)]
struct EntryState {
    index: Option<Arc<LoadedIndex>>,
    last_err: Option<String>,
    last_attempt: Option<Instant>,
}

#[derive(Default)]
struct CacheEntry {
    state: Mutex<EntryState>,
    pins: AtomicU32,
}

pub struct EngineCache {
    cap: usize,
    retry: Duration,
    // unbounded LRU; capacity is enforced manually so pinned entries
    // can be skipped during eviction
    inner: Mutex<LruCache<String, Arc<CacheEntry>>>,
}

/// A borrowed engine. Holds a pin for its lifetime; dereferences to the
/// loaded index.
pub struct PinnedEngine {
    entry: Arc<CacheEntry>,
    index: Arc<LoadedIndex>,
}

impl std::fmt::Debug for PinnedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedEngine").finish_non_exhaustive()
    }
}

impl Deref for PinnedEngine {
    type Target = LoadedIndex;

    fn deref(&self) -> &LoadedIndex {
        &self.index
    }
}

impl Drop for PinnedEngine {
    fn drop(&mut self) {
        self.entry.pins.fetch_sub(1, Ordering::Relaxed);
    }
}

impl EngineCache {
    pub fn new(cap: usize, retry: Duration) -> Self {
        Self {
            cap: cap.max(1),
            retry,
            inner: Mutex::new(LruCache::unbounded()),
        }
    }

    fn get_or_create(&self, dir: &str) -> Arc<CacheEntry> {
        let mut lru = self.inner.lock();
        if let Some(e) = lru.peek(dir) {
            return e.clone();
        }

        // make room; rotate pinned victims back to MRU, bounded attempts
        let mut attempts = lru.len();
        while lru.len() >= self.cap && attempts > 0 {
            attempts -= 1;
            match lru.pop_lru() {
                Some((key, victim)) => {
                    if victim.pins.load(Ordering::Relaxed) > 0 {
                        lru.push(key, victim);
                    }
                }
                None => break,
            }
        }

        let entry = Arc::new(CacheEntry::default());
        lru.push(dir.to_string(), entry.clone());
        entry
    }

    fn ensure_loaded(&self, dir: &str, entry: &CacheEntry) -> Result<Arc<LoadedIndex>, String> {
        let mut st = entry.state.lock();
        if let Some(idx) = &st.index {
            return Ok(idx.clone());
        }

        if let Some(at) = st.last_attempt {
            let blocked = self.retry.is_zero() || at.elapsed() < self.retry;
            if blocked {
                return Err(st
                    .last_err
                    .clone()
                    .unwrap_or_else(|| "load_failed".to_string()));
            }
        }

        st.last_attempt = Some(Instant::now());
        match LoadedIndex::load(Path::new(dir)) {
            Ok(idx) => {
                let idx = Arc::new(idx);
                st.index = Some(idx.clone());
                st.last_err = None;
                Ok(idx)
            }
            Err(e) => {
                let msg = format!("{} ({})", e, e.code());
                log::warn!("load {} failed: {}", dir, msg);
                st.last_err = Some(msg.clone());
                Err(msg)
            }
        }
    }

    /// Borrow the engine for `dir`, loading it on first use. Promotes the
    /// entry in the LRU only when the borrow succeeds.
    pub fn borrow(&self, dir: &str) -> Result<PinnedEngine, String> {
        let entry = self.get_or_create(dir);
        let index = self.ensure_loaded(dir, &entry)?;
        entry.pins.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.lock().get(dir);
        Ok(PinnedEngine { entry, index })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_load_is_cached_until_backoff() {
        let cache = EngineCache::new(4, Duration::from_secs(3600));
        let err1 = cache.borrow("/nonexistent/idx").unwrap_err();
        let err2 = cache.borrow("/nonexistent/idx").unwrap_err();
        // second failure comes from the cache, not a fresh load
        assert_eq!(err1, err2);
    }

    #[test]
    fn zero_backoff_never_retries() {
        let cache = EngineCache::new(4, Duration::ZERO);
        assert!(cache.borrow("/nonexistent/idx").is_err());
        assert!(cache.borrow("/nonexistent/idx").is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let cache = EngineCache::new(2, Duration::ZERO);
        for i in 0..5 {
            let _ = cache.borrow(&format!("/missing/{}", i));
        }
        assert!(cache.len() <= 2);
    }
}
