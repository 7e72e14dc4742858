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

//! Fan-out search across many index directories with per-external-docid
//! aggregation into a global top-K.
//!
//! Per-index failures are counted, never fatal; the reply is a JSON
//! envelope either way.

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use plagio::engine::{SearchStats, TOPK_HARD_MAX};

mod cache;
pub use cache::{EngineCache, PinnedEngine};

/// Hard cap on the per-index hit count requested during fan-out.
pub const LOCAL_K_HARD_MAX: usize = 8_000;
/// Hard cap on the number of index directories per call.
pub const DIRS_HARD_MAX: usize = 20_000;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

static GLOBAL_CACHE: Lazy<EngineCache> = Lazy::new(|| {
    let cap = env_usize("SEG_CACHE_MAX", 256);
    let retry_ms = env_usize("SEG_LOAD_RETRY_MS", 3_000);
    EngineCache::new(cap, Duration::from_millis(retry_ms as u64))
});

/// Ask each index for more than the caller's K so a doc ranked below K
/// locally can still win globally; scale down as fan-out grows.
fn choose_local_k(k: usize, n_dirs: usize) -> usize {
    let lk = match n_dirs {
        0..=8 => k * 4,
        9..=64 => k * 3,
        65..=512 => k * 2,
        _ => k,
    };
    lk.max(k).min(LOCAL_K_HARD_MAX)
}

struct AggHit {
    best_index_dir: String,
    score: f64,
    j9: f64,
    c9: f64,
    cand_hits: u16,
    found_in: u32,
    last_seen_dir: usize,
    is_fallback: bool,
    did: u32,
}

fn error_json(code: &str, message: &str) -> String {
    json!({
        "ok": false,
        "error": { "code": code, "message": message },
        "count": 0,
        "hits": [],
    })
    .to_string()
}

/// Search `dirs` through the process-wide engine cache and merge the
/// results. Returns the JSON envelope as a string.
pub fn multi_search_json(query: &str, top_k: usize, dirs: &[String]) -> String {
    multi_search_json_with(&GLOBAL_CACHE, query, top_k, dirs)
}

/// Same as [`multi_search_json`] with an explicit cache, for callers
/// that manage their own lifetimes (and for tests).
pub fn multi_search_json_with(
    cache: &EngineCache,
    query: &str,
    top_k: usize,
    dirs: &[String],
) -> String {
    if query.is_empty() {
        return error_json("bad_request", "empty query");
    }
    if dirs.is_empty() {
        return error_json("bad_request", "no index dirs");
    }
    if dirs.len() > DIRS_HARD_MAX {
        return error_json("bad_request", "too many dirs");
    }
    if top_k == 0 {
        return error_json("bad_request", "top_k must be positive");
    }
    let k = top_k.min(TOPK_HARD_MAX);
    let local_k = choose_local_k(k, dirs.len());
    let debug = env_bool("SEG_DEBUG", false);

    let mut agg: HashMap<String, AggHit> = HashMap::with_capacity(
        (dirs.len().min(1_024) * local_k.min(128)).min(1_000_000),
    );
    let mut stats_by_index: Vec<Value> = Vec::new();
    let mut dirs_ok = 0usize;
    let mut dirs_failed = 0usize;

    for (di, dir) in dirs.iter().enumerate() {
        if dir.is_empty() {
            dirs_failed += 1;
            continue;
        }

        let engine = match cache.borrow(dir) {
            Ok(e) => e,
            Err(err) => {
                dirs_failed += 1;
                if debug {
                    stats_by_index.push(json!({
                        "index_dir": dir,
                        "ok": false,
                        "error": err,
                    }));
                }
                continue;
            }
        };
        dirs_ok += 1;

        let mut stats = SearchStats::default();
        let hits = engine.search_text_with_stats(
            query,
            local_k,
            local_k,
            debug.then_some(&mut stats),
        );

        if debug {
            stats_by_index.push(json!({
                "index_dir": dir,
                "ok": true,
                "got": hits.len(),
                "local_k": local_k,
                "stats": {
                    "q_uniq_shingles": stats.q_uniq_shingles,
                    "seeds_total": stats.seeds_total,
                    "seeds_used": stats.seeds_used,
                    "cand_total_before_cap": stats.cand_total_before_cap,
                    "cand_after_cap": stats.cand_after_cap,
                    "inter_scanned_shingles": stats.inter_scanned_shingles,
                    "scored": stats.scored,
                },
            }));
        }

        let ids = engine.doc_ids();
        for h in &hits {
            let real_id = ids
                .get(h.doc as usize)
                .filter(|id| !id.is_empty());
            // real external id when the sidecar has one; otherwise a
            // dir-scoped key so distinct indexes cannot collide
            let (key, is_fallback) = match real_id {
                Some(id) => (id.clone(), false),
                None => (format!("{}:{}", dir, h.doc), true),
            };

            use std::collections::hash_map::Entry;
            match agg.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(AggHit {
                        best_index_dir: dir.clone(),
                        score: h.score,
                        j9: h.j,
                        c9: h.c,
                        cand_hits: h.cand_hits,
                        found_in: 1,
                        last_seen_dir: di,
                        is_fallback,
                        did: h.doc,
                    });
                }
                Entry::Occupied(mut slot) => {
                    let ah = slot.get_mut();
                    if ah.last_seen_dir != di {
                        ah.found_in += 1;
                        ah.last_seen_dir = di;
                    }
                    if h.score > ah.score {
                        ah.score = h.score;
                        ah.j9 = h.j;
                        ah.c9 = h.c;
                        ah.cand_hits = h.cand_hits;
                        ah.best_index_dir = dir.clone();
                        ah.is_fallback = is_fallback;
                        ah.did = h.doc;
                    } else if h.cand_hits > ah.cand_hits {
                        ah.cand_hits = h.cand_hits;
                    }
                }
            }
        }
    }

    // global top-k: bounded min-heap over (score, key)
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    #[derive(PartialEq)]
    struct HeapKey<'a>(f64, &'a str);
    impl Eq for HeapKey<'_> {}
    impl PartialOrd for HeapKey<'_> {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for HeapKey<'_> {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.0.total_cmp(&other.0).then_with(|| self.1.cmp(other.1))
        }
    }

    let mut heap: BinaryHeap<Reverse<HeapKey<'_>>> = BinaryHeap::with_capacity(k + 1);
    for (key, hit) in &agg {
        heap.push(Reverse(HeapKey(hit.score, key.as_str())));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut top: Vec<HeapKey<'_>> = heap.into_iter().map(|r| r.0).collect();
    top.sort_unstable_by(|a, b| b.cmp(a));

    let hits: Vec<Value> = top
        .iter()
        .map(|HeapKey(_, key)| {
            let h = &agg[*key];
            json!({
                "doc_id": if h.is_fallback { h.did.to_string() } else { (*key).to_string() },
                "doc_uid": key,
                "best_index_dir": h.best_index_dir,
                "score": h.score,
                "j9": h.j9,
                "c9": h.c9,
                "cand_hits": h.cand_hits,
                "found_in": h.found_in,
            })
        })
        .collect();

    let mut out = json!({
        "ok": true,
        "top_k": k,
        "local_k": local_k,
        "dirs_ok": dirs_ok,
        "dirs_failed": dirs_failed,
        "unique_docs_considered": agg.len(),
        "count": hits.len(),
        "hits": hits,
    });
    if debug {
        out["stats_by_index"] = Value::Array(stats_by_index);
    }
    out.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_k_policy() {
        assert_eq!(choose_local_k(10, 1), 40);
        assert_eq!(choose_local_k(10, 8), 40);
        assert_eq!(choose_local_k(10, 9), 30);
        assert_eq!(choose_local_k(10, 64), 30);
        assert_eq!(choose_local_k(10, 65), 20);
        assert_eq!(choose_local_k(10, 513), 10);
        assert_eq!(choose_local_k(5_000, 1), LOCAL_K_HARD_MAX);
    }

    #[test]
    fn bad_request_shapes() {
        let cache = EngineCache::new(4, std::time::Duration::ZERO);
        for (q, k, dirs) in [
            ("", 10, vec!["d".to_string()]),
            ("query", 0, vec!["d".to_string()]),
            ("query", 10, vec![]),
        ] {
            let raw = multi_search_json_with(&cache, q, k, &dirs);
            let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
            assert_eq!(v["ok"], false);
            assert_eq!(v["error"]["code"], "bad_request");
            assert_eq!(v["count"], 0);
        }
    }
}
