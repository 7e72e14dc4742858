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

//! Hot query path over a loaded index.
//!
//! Per-query shape: shingle the query, look up each distinct hash, pick
//! the rarest hits as seeds, gather candidate docs from seed postings,
//! cap the candidate list, then merge every query term's posting list
//! against it to count true intersections and score. All scratch space
//! is thread-local and soft-capped.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::time::Instant;

use super::config::{EngineConfig, RAW_HARD_MAX, TOPK_HARD_MAX};
use super::reader::LoadedIndex;
use crate::text::{self, SHINGLE_K};

/// One scored result. `doc` is the local doc id; the docids sidecar maps
/// it to the caller's external id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchHit {
    pub doc: u32,
    pub score: f64,
    pub j: f64,
    pub c: f64,
    /// Seed postings that contained the doc, saturated at u16::MAX.
    pub cand_hits: u16,
}

/// Per-query counters, reported through the aggregator's debug output.
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchStats {
    pub q_uniq_shingles: usize,
    pub seeds_total: usize,
    pub seeds_used: usize,
    pub cand_total_before_cap: usize,
    pub cand_after_cap: usize,
    pub inter_scanned_shingles: usize,
    pub scored: usize,
}

#[derive(Clone, Copy)]
struct Term {
    df: u64,
    l: u64,
    r: u64,
}

#[derive(Clone, Copy)]
struct Cand {
    doc: u32,
    seed_hits: u16,
}

#[derive(Clone, Copy)]
struct Scored {
    doc: u32,
    score: f64,
    j: f64,
    c: f64,
    seed_hits: u16,
}

// soft caps on retained thread-local capacity
const RAW_SOFT_CAP: usize = 4_000_000; // 16 MB of u32
const CAND_SOFT_CAP: usize = 4_096;
const QSH_SOFT_CAP: usize = 262_144;

#[derive(Default)]
struct Scratch {
    spans: Vec<text::TokenSpan>,
    q_sh: Vec<u64>,
    terms: Vec<Term>,
    raw: Vec<u32>,
    cand: Vec<Cand>,
    inter: Vec<u16>,
    scored: Vec<Scored>,
}

impl Scratch {
    fn shrink_soft(&mut self) {
        if self.raw.capacity() > RAW_SOFT_CAP {
            self.raw.shrink_to(RAW_SOFT_CAP);
        }
        if self.cand.capacity() > CAND_SOFT_CAP {
            self.cand.shrink_to(CAND_SOFT_CAP);
            self.inter.shrink_to(CAND_SOFT_CAP);
            self.scored.shrink_to(CAND_SOFT_CAP);
        }
        if self.q_sh.capacity() > QSH_SOFT_CAP {
            self.q_sh.shrink_to(QSH_SOFT_CAP);
            self.terms.shrink_to(QSH_SOFT_CAP);
        }
    }
}

thread_local! {
    static SCRATCH: RefCell<Scratch> = RefCell::new(Scratch::default());
}

fn jc_compute(inter: u32, q: usize, t: u32) -> (f64, f64) {
    if inter == 0 || q == 0 || t == 0 {
        return (0.0, 0.0);
    }
    let uni = (q as i64 + t as i64 - inter as i64).max(1);
    let j = inter as f64 / uni as f64;
    let c = inter as f64 / q as f64;
    (j, c)
}

impl LoadedIndex {
    /// Top-K search. Returns hits sorted by score descending; an empty
    /// vector for short queries or when nothing intersects.
    pub fn search_text(&self, query: &str, top_k: usize, max_hits: usize) -> Vec<SearchHit> {
        self.search_text_with_stats(query, top_k, max_hits, None)
    }

    pub fn search_text_with_stats(
        &self,
        query: &str,
        top_k: usize,
        max_hits: usize,
        mut stats: Option<&mut SearchStats>,
    ) -> Vec<SearchHit> {
        let want = top_k.min(max_hits).min(TOPK_HARD_MAX);
        if want == 0 {
            return Vec::new();
        }
        let cfg = self.config();

        SCRATCH.with(|cell| {
            let mut scratch = cell.borrow_mut();
            let hits = self.search_inner(query, want, cfg, &mut scratch, stats.as_deref_mut());
            scratch.shrink_soft();
            hits
        })
    }

    fn search_inner(
        &self,
        query: &str,
        want: usize,
        cfg: &EngineConfig,
        s: &mut Scratch,
        mut stats: Option<&mut SearchStats>,
    ) -> Vec<SearchHit> {
        let perf = cfg.perf_stats;
        let t0 = Instant::now();

        // normalize + shingle the query
        let norm = text::normalize(query);
        text::tokenize_spans(&norm, &mut s.spans);
        if s.spans.len() < cfg.w_min_query || s.spans.len() < SHINGLE_K {
            return Vec::new();
        }
        text::fill_shingle_hashes(&norm, &s.spans, SHINGLE_K, usize::MAX, &mut s.q_sh);
        s.q_sh.sort_unstable();
        s.q_sh.dedup();
        if s.q_sh.len() > cfg.max_q_uniq9 {
            // deterministic truncation: keep the numerically smallest
            s.q_sh.truncate(cfg.max_q_uniq9);
        }
        let q_size = s.q_sh.len();
        if q_size == 0 {
            return Vec::new();
        }
        if let Some(st) = stats.as_deref_mut() {
            st.q_uniq_shingles = q_size;
        }
        let t_norm = Instant::now();

        // posting lookup for every distinct query shingle
        s.terms.clear();
        for &h in &s.q_sh {
            if let Some((l, r)) = self.postings(h) {
                s.terms.push(Term { df: r - l, l, r });
            }
        }
        if s.terms.is_empty() {
            return Vec::new();
        }
        let t_lookup = Instant::now();

        // seed selection: rarest first, df cutoff, cumulative-df budget
        let mut seed_order: Vec<u32> = (0..s.terms.len() as u32)
            .filter(|&i| s.terms[i as usize].df <= cfg.max_df_for_seed)
            .collect();
        if seed_order.is_empty() {
            return Vec::new();
        }
        seed_order.sort_unstable_by_key(|&i| (s.terms[i as usize].df, i));
        if let Some(st) = stats.as_deref_mut() {
            st.seeds_total = seed_order.len();
        }

        let take_max = seed_order.len().min(cfg.fetch_per_k);
        let budget = cfg.sum_df_budget();
        let mut sum_df = 0u64;
        let mut take = 0usize;
        while take < take_max {
            let df = s.terms[seed_order[take] as usize].df;
            if sum_df + df > budget {
                break;
            }
            sum_df += df;
            take += 1;
        }
        // always use at least one seed, budget or not
        let take = take.max(1);
        if let Some(st) = stats.as_deref_mut() {
            st.seeds_used = take;
        }

        // gather candidates from seed postings
        let raw_cap = if sum_df > 0 {
            (sum_df as usize).min(RAW_HARD_MAX)
        } else {
            RAW_HARD_MAX
        };
        s.raw.clear();
        'gather: for &ti in &seed_order[..take] {
            let term = s.terms[ti as usize];
            for p in term.l..term.r {
                if s.raw.len() >= raw_cap {
                    break 'gather;
                }
                s.raw.push(self.did_at(p));
            }
        }
        if s.raw.is_empty() {
            return Vec::new();
        }
        s.raw.sort_unstable();

        // run-length encode into (doc, seed_hits)
        s.cand.clear();
        let mut i = 0usize;
        while i < s.raw.len() {
            let doc = s.raw[i];
            let mut cnt = 1u32;
            i += 1;
            while i < s.raw.len() && s.raw[i] == doc {
                cnt += 1;
                i += 1;
            }
            s.cand.push(Cand {
                doc,
                seed_hits: cnt.min(u16::MAX as u32) as u16,
            });
        }
        if let Some(st) = stats.as_deref_mut() {
            st.cand_total_before_cap = s.cand.len();
        }

        // cap candidates by seed_hits, then restore doc order for the merges
        if s.cand.len() > cfg.max_cands_doc {
            let keep = cfg.max_cands_doc;
            s.cand
                .select_nth_unstable_by_key(keep - 1, |c| Reverse(c.seed_hits));
            s.cand.truncate(keep);
            s.cand.sort_unstable_by_key(|c| c.doc);
        }
        if let Some(st) = stats.as_deref_mut() {
            st.cand_after_cap = s.cand.len();
        }
        let t_gather = Instant::now();

        // true intersection counts: every query term against the
        // candidate array, both sides sorted by doc
        s.inter.clear();
        s.inter.resize(s.cand.len(), 0);
        for term in &s.terms {
            let mut p = term.l;
            let mut ci = 0usize;
            while p < term.r && ci < s.cand.len() {
                let doc_p = self.did_at(p);
                let doc_c = s.cand[ci].doc;
                match doc_p.cmp(&doc_c) {
                    std::cmp::Ordering::Less => p += 1,
                    std::cmp::Ordering::Greater => ci += 1,
                    std::cmp::Ordering::Equal => {
                        s.inter[ci] = s.inter[ci].saturating_add(1);
                        p += 1;
                        ci += 1;
                    }
                }
            }
        }
        if let Some(st) = stats.as_deref_mut() {
            st.inter_scanned_shingles = s.terms.len();
        }
        let t_inter = Instant::now();

        // scoring
        s.scored.clear();
        for (ci, cand) in s.cand.iter().enumerate() {
            let inter = s.inter[ci] as u32;
            if inter == 0 {
                continue;
            }
            let Some(meta) = self.doc_meta(cand.doc) else {
                continue;
            };
            if meta.tok_len < cfg.w_min_doc {
                continue;
            }
            let t_size = (meta.tok_len as i64 - SHINGLE_K as i64 + 1).max(0) as u32;
            if t_size == 0 {
                continue;
            }
            let (j, c) = jc_compute(inter, q_size, t_size);
            let score = cfg.w9 * (cfg.alpha * j + (1.0 - cfg.alpha) * c);
            s.scored.push(Scored {
                doc: cand.doc,
                score,
                j,
                c,
                seed_hits: cand.seed_hits,
            });
        }
        if let Some(st) = stats.as_deref_mut() {
            st.scored = s.scored.len();
        }
        if s.scored.is_empty() {
            return Vec::new();
        }

        // top-K by partial selection, then order the kept prefix
        if s.scored.len() > want {
            s.scored.select_nth_unstable_by(want - 1, |a, b| {
                b.score.total_cmp(&a.score).then(a.doc.cmp(&b.doc))
            });
            s.scored.truncate(want);
        }
        s.scored.sort_unstable_by(|a, b| {
            b.score.total_cmp(&a.score).then(a.doc.cmp(&b.doc))
        });
        let t_score = Instant::now();

        if perf {
            log::info!(
                "query phases us: norm={} lookup={} gather={} intersect={} score={}",
                (t_norm - t0).as_micros(),
                (t_lookup - t_norm).as_micros(),
                (t_gather - t_lookup).as_micros(),
                (t_inter - t_gather).as_micros(),
                (t_score - t_inter).as_micros(),
            );
        }

        s.scored
            .iter()
            .map(|sc| SearchHit {
                doc: sc.doc,
                score: sc.score,
                j: sc.j,
                c: sc.c,
                cand_hits: sc.seed_hits,
            })
            .collect()
    }
}
