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

//! Per-index search configuration, read from `index_config.json`.
//!
//! A missing or unreadable file yields the defaults; individual values
//! outside their sane ranges are clamped at load time so the hot path
//! never re-checks them.

use serde::Deserialize;
use std::path::Path;

use crate::index::CONFIG_FILE;

/// Hard safety limits, applied after any configuration.
pub const TOPK_HARD_MAX: usize = 2_000;
pub const FETCH_PER_K_HARD_MAX: usize = 8_192;
pub const MAX_CANDS_HARD_MAX: usize = 2_000_000;
pub const MAX_Q_UNIQ_MIN: usize = 128;
pub const MAX_Q_UNIQ_MAX: usize = 200_000;
pub const SUM_DF_HARD_CEILING: u64 = 500_000_000;
/// Absolute bound on the raw candidate buffer, even with budgets off.
pub const RAW_HARD_MAX: usize = 50_000_000;

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Minimum candidate document token length.
    pub w_min_doc: u32,
    /// Queries shorter than this many tokens return empty results.
    pub w_min_query: usize,
    /// Jaccard/containment mix.
    pub alpha: f64,
    /// Overall score scale.
    pub w9: f64,
    /// Seed count cap.
    pub fetch_per_k: usize,
    /// Candidate list cap.
    pub max_cands_doc: usize,
    /// Shingles with a larger df are never seeds.
    pub max_df_for_seed: u64,
    /// Cap on distinct query shingles.
    pub max_q_uniq9: usize,
    /// Cumulative-df budget across seeds; 0 disables the soft budget.
    pub max_sum_df_seeds: u64,
    /// Absolute df budget ceiling.
    pub hard_max_sum_df_seeds: u64,
    /// Reserved for callers; never used by scoring.
    pub plag_thr: f64,
    pub partial_thr: f64,
    /// Load-time validation sampling knobs.
    pub validate_postings_samples: usize,
    pub validate_did_samples: usize,
    pub validate_uniq_samples: usize,
    pub validate_postings_maxlen: usize,
    /// Log per-phase query timings.
    pub perf_stats: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            w_min_doc: 8,
            w_min_query: 9,
            alpha: 0.60,
            w9: 0.90,
            fetch_per_k: 64,
            max_cands_doc: 1_000,
            max_df_for_seed: 200_000,
            max_q_uniq9: 4_096,
            max_sum_df_seeds: 2_000_000,
            hard_max_sum_df_seeds: 20_000_000,
            plag_thr: 0.70,
            partial_thr: 0.30,
            validate_postings_samples: 256,
            validate_did_samples: 65_536,
            validate_uniq_samples: 4_096,
            validate_postings_maxlen: 4_096,
            perf_stats: false,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawWeights {
    alpha: Option<f64>,
    w9: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawThresholds {
    plag_thr: Option<f64>,
    partial_thr: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    w_min_doc: Option<i64>,
    w_min_query: Option<i64>,
    fetch_per_k_doc: Option<i64>,
    max_cands_doc: Option<i64>,
    max_df_for_seed: Option<i64>,
    max_q_uniq9: Option<i64>,
    max_sum_df_seeds: Option<u64>,
    hard_max_sum_df_seeds: Option<u64>,
    weights: RawWeights,
    thresholds: RawThresholds,
    validate_postings_samples: Option<i64>,
    validate_did_samples: Option<i64>,
    validate_uniq_samples: Option<i64>,
    validate_postings_maxlen: Option<i64>,
    perf_stats: Option<i64>,
}

fn as_usize(v: Option<i64>, default: usize) -> usize {
    match v {
        Some(x) if x >= 0 => x as usize,
        Some(_) => 0,
        None => default,
    }
}

impl EngineConfig {
    /// Read `index_config.json` from an index directory, falling back to
    /// defaults on absence or parse failure.
    pub fn load_from_dir(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(s) => match serde_json::from_str::<RawConfig>(&s) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("bad {}: {}; using defaults", path.display(), e);
                    RawConfig::default()
                }
            },
            Err(_) => RawConfig::default(),
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Self {
        let d = Self::default();
        let mut cfg = Self {
            w_min_doc: as_usize(raw.w_min_doc, d.w_min_doc as usize).max(1) as u32,
            w_min_query: as_usize(raw.w_min_query, d.w_min_query).max(1),
            alpha: clamp01(raw.weights.alpha.unwrap_or(d.alpha)),
            w9: clamp01(raw.weights.w9.unwrap_or(d.w9)),
            fetch_per_k: as_usize(raw.fetch_per_k_doc, d.fetch_per_k),
            max_cands_doc: as_usize(raw.max_cands_doc, d.max_cands_doc),
            max_df_for_seed: as_usize(raw.max_df_for_seed, d.max_df_for_seed as usize).max(1)
                as u64,
            max_q_uniq9: as_usize(raw.max_q_uniq9, d.max_q_uniq9),
            max_sum_df_seeds: raw.max_sum_df_seeds.unwrap_or(d.max_sum_df_seeds),
            hard_max_sum_df_seeds: raw
                .hard_max_sum_df_seeds
                .unwrap_or(d.hard_max_sum_df_seeds),
            plag_thr: raw.thresholds.plag_thr.unwrap_or(d.plag_thr),
            partial_thr: raw.thresholds.partial_thr.unwrap_or(d.partial_thr),
            validate_postings_samples: as_usize(
                raw.validate_postings_samples,
                d.validate_postings_samples,
            ),
            validate_did_samples: as_usize(raw.validate_did_samples, d.validate_did_samples),
            validate_uniq_samples: as_usize(raw.validate_uniq_samples, d.validate_uniq_samples),
            validate_postings_maxlen: as_usize(
                raw.validate_postings_maxlen,
                d.validate_postings_maxlen,
            )
            .max(1),
            perf_stats: raw.perf_stats.unwrap_or(0) != 0,
        };

        cfg.fetch_per_k = cfg.fetch_per_k.clamp(1, FETCH_PER_K_HARD_MAX);
        cfg.max_cands_doc = cfg.max_cands_doc.clamp(1, MAX_CANDS_HARD_MAX);
        cfg.max_q_uniq9 = cfg.max_q_uniq9.clamp(MAX_Q_UNIQ_MIN, MAX_Q_UNIQ_MAX);
        cfg.hard_max_sum_df_seeds = cfg.hard_max_sum_df_seeds.min(SUM_DF_HARD_CEILING);
        cfg
    }

    /// Effective cumulative-df budget for seed selection. The hard
    /// ceiling applies even when the soft budget is disabled.
    pub fn sum_df_budget(&self) -> u64 {
        if self.max_sum_df_seeds == 0 {
            self.hard_max_sum_df_seeds
        } else {
            self.max_sum_df_seeds.min(self.hard_max_sum_df_seeds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> EngineConfig {
        EngineConfig::from_raw(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn defaults_when_empty() {
        assert_eq!(parse("{}"), EngineConfig::default());
    }

    #[test]
    fn clamps_out_of_range_values() {
        let cfg = parse(
            r#"{
                "fetch_per_k_doc": 100000,
                "max_cands_doc": 0,
                "max_q_uniq9": 1,
                "hard_max_sum_df_seeds": 999999999999,
                "weights": { "alpha": 1.5, "w9": -0.2 }
            }"#,
        );
        assert_eq!(cfg.fetch_per_k, FETCH_PER_K_HARD_MAX);
        assert_eq!(cfg.max_cands_doc, 1);
        assert_eq!(cfg.max_q_uniq9, MAX_Q_UNIQ_MIN);
        assert_eq!(cfg.hard_max_sum_df_seeds, SUM_DF_HARD_CEILING);
        assert_eq!(cfg.alpha, 1.0);
        assert_eq!(cfg.w9, 0.0);
    }

    #[test]
    fn sum_df_budget_honors_disable_and_ceiling() {
        let mut cfg = EngineConfig::default();
        assert_eq!(cfg.sum_df_budget(), 2_000_000);

        cfg.max_sum_df_seeds = 0;
        assert_eq!(cfg.sum_df_budget(), cfg.hard_max_sum_df_seeds);

        cfg.max_sum_df_seeds = u64::MAX;
        cfg.hard_max_sum_df_seeds = 5;
        assert_eq!(cfg.sum_df_budget(), 5);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let cfg = parse(r#"{ "not_a_knob": 1, "w_min_doc": 3 }"#);
        assert_eq!(cfg.w_min_doc, 3);
    }
}
