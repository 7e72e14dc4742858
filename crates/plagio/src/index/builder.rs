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

//! Streaming index construction.
//!
//! One reader thread feeds line batches through a bounded channel to N
//! workers. Each worker shingles its documents with worker-local doc
//! ids and spills sorted runs; after ingestion the runs are merged
//! (remapping local ids to global ones via per-worker bases) into the
//! final CSR, which is published with a tmp-file + rename.

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use super::{
    merge_runs_to_csr, reduce_runs_multipass, write_run_file, BuildError, DocMeta, IndexHeader,
    PairRec, RunKind, DOCIDS_FILE, INDEX_FILE, META_FILE,
};
use crate::text::{self, TokenSpan, SHINGLE_K};

pub const MAX_TOKENS_PER_DOC: usize = 100_000;
pub const MAX_SHINGLES_PER_DOC: usize = 50_000;

const LINES_PER_BATCH: usize = 2048;
const QUEUE_MAX_BATCHES: usize = 32;

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Builder tunables. `from_env` reads the `PLAGIO_*` overrides.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Worker thread count; 0 selects `min(available_parallelism, 16)`.
    pub threads: usize,
    /// Soft cap of buffered pairs before a worker spills a run.
    pub run_max_pairs: usize,
    /// Merge fan-in per pass.
    pub merge_max_way: usize,
    /// Emit the full per-doc-id metadata map into the meta JSON.
    pub meta_docs_map: bool,
    /// Keep the build temp directory for debugging.
    pub keep_tmp: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            run_max_pairs: 2_000_000,
            merge_max_way: 64,
            meta_docs_map: false,
            keep_tmp: false,
        }
    }
}

impl BuildOptions {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            threads: env_usize("PLAGIO_THREADS", d.threads),
            run_max_pairs: env_usize("PLAGIO_RUN_MAX_PAIRS", d.run_max_pairs)
                .clamp(1_000, 50_000_000),
            merge_max_way: env_usize("PLAGIO_MERGE_MAX_WAY", d.merge_max_way).max(8),
            meta_docs_map: env_bool("PLAGIO_META_DOCS_MAP", d.meta_docs_map),
            keep_tmp: env_bool("PLAGIO_TMP_KEEP", d.keep_tmp),
        }
    }

    fn effective_threads(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map_or(4, std::num::NonZeroUsize::get)
            .min(16)
    }
}

/// Counters reported after a successful build.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub lines_total: u64,
    pub docs_ok: u64,
    pub docs_bad: u64,
    pub pairs_emitted: u64,
    pub uniq_cnt: u64,
    pub did_cnt: u64,
    pub workers: usize,
    pub runs_final: usize,
}

#[derive(Deserialize)]
struct CorpusRecord {
    doc_id: String,
    text: String,
}

struct WorkerOutput {
    doc_ids: Vec<String>,
    docs_meta: Vec<DocMeta>,
    run_paths: Vec<PathBuf>,
    docs_ok: u64,
    docs_bad: u64,
    pairs_emitted: u64,
}

struct WorkerCtx {
    tid: u32,
    runs_dir: PathBuf,
    run_max_pairs: usize,
    run_seq: u32,

    out: WorkerOutput,
    run_recs: Vec<PairRec>,

    // per-doc scratch
    spans: Vec<TokenSpan>,
    hashes: Vec<u64>,
}

impl WorkerCtx {
    fn new(tid: u32, runs_dir: PathBuf, run_max_pairs: usize) -> Self {
        Self {
            tid,
            runs_dir,
            run_max_pairs,
            run_seq: 0,
            out: WorkerOutput {
                doc_ids: Vec::new(),
                docs_meta: Vec::new(),
                run_paths: Vec::new(),
                docs_ok: 0,
                docs_bad: 0,
                pairs_emitted: 0,
            },
            run_recs: Vec::with_capacity(run_max_pairs.min(1 << 20)),
            spans: Vec::with_capacity(256),
            hashes: Vec::with_capacity(4096),
        }
    }

    fn flush_run(&mut self) -> Result<()> {
        if self.run_recs.is_empty() {
            return Ok(());
        }
        let path = self
            .runs_dir
            .join(format!("run_local_t{}_{}.bin", self.tid, self.run_seq));
        self.run_seq += 1;
        write_run_file(&path, RunKind::Local, self.tid, &mut self.run_recs)?;
        self.out.run_paths.push(path);

        // keep the buffer from staying inflated after a pathological doc
        if self.run_recs.capacity() > self.run_max_pairs * 2 {
            self.run_recs.shrink_to(self.run_max_pairs);
        }
        Ok(())
    }

    fn process_line(&mut self, line: &str) -> Result<()> {
        let rec: CorpusRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(_) => {
                self.out.docs_bad += 1;
                return Ok(());
            }
        };
        if rec.doc_id.is_empty() || rec.text.is_empty() {
            self.out.docs_bad += 1;
            return Ok(());
        }

        let norm = text::normalize(&rec.text);
        text::tokenize_spans(&norm, &mut self.spans);
        if self.spans.len() > MAX_TOKENS_PER_DOC {
            self.spans.truncate(MAX_TOKENS_PER_DOC);
        }
        if self.spans.len() < SHINGLE_K {
            self.out.docs_bad += 1;
            return Ok(());
        }

        let (simhash_hi, simhash_lo) = text::simhash128(&norm, &self.spans);
        let local_doc = self.out.doc_ids.len() as u32;
        self.out.doc_ids.push(rec.doc_id);
        self.out.docs_meta.push(DocMeta {
            tok_len: self.spans.len() as u32,
            simhash_hi,
            simhash_lo,
        });
        self.out.docs_ok += 1;

        text::fill_shingle_hashes(
            &norm,
            &self.spans,
            SHINGLE_K,
            MAX_SHINGLES_PER_DOC,
            &mut self.hashes,
        );
        self.hashes.sort_unstable();
        self.hashes.dedup();

        for &h in &self.hashes {
            self.run_recs.push(PairRec { h, doc: local_doc });
        }
        self.out.pairs_emitted += self.hashes.len() as u64;

        if self.run_recs.len() >= self.run_max_pairs {
            self.flush_run()?;
        }
        Ok(())
    }
}

fn worker_loop(
    tid: u32,
    rx: Receiver<Vec<String>>,
    runs_dir: PathBuf,
    run_max_pairs: usize,
) -> Result<WorkerOutput> {
    let mut ctx = WorkerCtx::new(tid, runs_dir, run_max_pairs);
    let mut fatal: Option<anyhow::Error> = None;

    // keep draining after a fatal error so the producer never blocks
    for batch in rx.iter() {
        if fatal.is_some() {
            continue;
        }
        for line in &batch {
            if let Err(e) = ctx.process_line(line) {
                fatal = Some(e);
                break;
            }
        }
    }

    if fatal.is_none() {
        if let Err(e) = ctx.flush_run() {
            fatal = Some(e);
        }
    }
    match fatal {
        Some(e) => Err(e),
        None => Ok(ctx.out),
    }
}

fn unique_build_dir(out_dir: &Path) -> PathBuf {
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let nonce: u32 = rand::thread_rng().gen();
    out_dir.join(format!("_build_{}_{}_{:08x}", pid, ts, nonce))
}

/// Rename the synced tmp file over `dst`. Same-filesystem rename is
/// atomic; readers see either the old index or the new one.
fn publish(tmp: &Path, dst: &Path) -> Result<()> {
    std::fs::rename(tmp, dst)
        .with_context(|| format!("publish {} -> {}", tmp.display(), dst.display()))
}

/// Build an index from a JSONL corpus into `out_dir`.
///
/// Input lines are `{"doc_id": "...", "text": "..."}`; extra fields are
/// ignored, malformed or too-short documents are counted as bad and
/// skipped. On any error the previously published index files are left
/// untouched.
pub fn build_index(corpus: &Path, out_dir: &Path, opts: &BuildOptions) -> Result<BuildReport> {
    let started = Instant::now();
    let workers = opts.effective_threads();

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create out dir {}", out_dir.display()))?;
    let build_dir = unique_build_dir(out_dir);
    let runs_dir = build_dir.join("runs");
    let tmp_dir = build_dir.join("tmp");
    std::fs::create_dir_all(&runs_dir).context("create runs dir")?;
    std::fs::create_dir_all(&tmp_dir).context("create tmp dir")?;

    let file =
        File::open(corpus).with_context(|| format!("open corpus {}", corpus.display()))?;
    let mut reader = BufReader::new(file);

    let (tx, rx) = bounded::<Vec<String>>(QUEUE_MAX_BATCHES);

    let mut lines_total = 0u64;
    let outputs: Vec<Result<WorkerOutput>> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for tid in 0..workers {
            let rx = rx.clone();
            let runs_dir = runs_dir.clone();
            let run_max_pairs = opts.run_max_pairs;
            handles.push(
                scope.spawn(move || worker_loop(tid as u32, rx, runs_dir, run_max_pairs)),
            );
        }
        drop(rx);

        let mut batch = Vec::with_capacity(LINES_PER_BATCH);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    // stop feeding; workers drain and finish
                    log::error!("corpus read failed: {}", e);
                    break;
                }
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            lines_total += 1;
            batch.push(trimmed.to_string());
            if batch.len() >= LINES_PER_BATCH {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(LINES_PER_BATCH));
                if tx.send(full).is_err() {
                    break;
                }
            }
        }
        if !batch.is_empty() {
            let _ = tx.send(batch);
        }
        drop(tx);

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut worker_outs = Vec::with_capacity(outputs.len());
    for out in outputs {
        worker_outs.push(out?);
    }

    // global doc ids: concatenate worker-local spaces in worker order
    let total_docs: u64 = worker_outs.iter().map(|o| o.doc_ids.len() as u64).sum();
    if total_docs == 0 {
        bail!(BuildError::NoDocs);
    }
    if total_docs > u32::MAX as u64 {
        bail!(BuildError::TooManyDocs(total_docs));
    }

    let mut bases = Vec::with_capacity(worker_outs.len());
    let mut acc = 0u32;
    for out in &worker_outs {
        bases.push(acc);
        acc += out.doc_ids.len() as u32;
    }

    let mut doc_ids: Vec<String> = Vec::with_capacity(total_docs as usize);
    let mut docs_meta: Vec<DocMeta> = Vec::with_capacity(total_docs as usize);
    let mut run_paths: Vec<PathBuf> = Vec::new();
    let mut docs_ok = 0u64;
    let mut docs_bad = 0u64;
    let mut pairs_emitted = 0u64;
    for out in worker_outs {
        docs_ok += out.docs_ok;
        docs_bad += out.docs_bad;
        pairs_emitted += out.pairs_emitted;
        doc_ids.extend(out.doc_ids);
        docs_meta.extend(out.docs_meta);
        run_paths.extend(out.run_paths);
    }
    if run_paths.is_empty() {
        bail!(BuildError::NoDocs);
    }

    let reduced = reduce_runs_multipass(run_paths, &tmp_dir, opts.merge_max_way, &bases)?;
    let runs_final = reduced.len();

    let uniq_tmp = tmp_dir.join("uniq.tmp");
    let off_tmp = tmp_dir.join("off.tmp");
    let did_tmp = tmp_dir.join("did.tmp");
    let (uniq_cnt, did_cnt) =
        merge_runs_to_csr(&reduced, &bases, &uniq_tmp, &off_tmp, &did_tmp)?;

    // assemble the final binary: header, metas, then the CSR sections
    let bin_tmp = tmp_dir.join("index_native.bin.tmp");
    {
        let file = File::create(&bin_tmp)
            .with_context(|| format!("create {}", bin_tmp.display()))?;
        let mut w = BufWriter::new(file);
        IndexHeader {
            n_docs: total_docs as u32,
            uniq_cnt,
            did_cnt,
        }
        .write_to(&mut w)?;
        for meta in &docs_meta {
            meta.write_to(&mut w)?;
        }
        for section in [&uniq_tmp, &off_tmp, &did_tmp] {
            let mut src = File::open(section)
                .with_context(|| format!("open {}", section.display()))?;
            std::io::copy(&mut src, &mut w)
                .with_context(|| format!("append {}", section.display()))?;
        }
        let file = w.into_inner().context("flush index file")?;
        file.sync_all().context("sync index file")?;
    }
    publish(&bin_tmp, &out_dir.join(INDEX_FILE))?;

    let docids_tmp = tmp_dir.join("docids.json.tmp");
    {
        let file = File::create(&docids_tmp)
            .with_context(|| format!("create {}", docids_tmp.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer(&mut w, &doc_ids).context("write docids json")?;
        let file = w.into_inner().context("flush docids json")?;
        file.sync_all().context("sync docids json")?;
    }
    publish(&docids_tmp, &out_dir.join(DOCIDS_FILE))?;

    let mut meta = json!({
        "config": {
            "k": SHINGLE_K,
            "max_tokens": MAX_TOKENS_PER_DOC,
            "max_shingles": MAX_SHINGLES_PER_DOC,
            "bin_version": super::VERSION,
            "merge_max_way": opts.merge_max_way,
            "thresholds": { "plag_thr": 0.7, "partial_thr": 0.3 },
        },
        "stats": {
            "lines_total": lines_total,
            "docs_ok": docs_ok,
            "docs_bad": docs_bad,
            "pairs_emitted_pre_dedup": pairs_emitted,
            "uniq_cnt": uniq_cnt,
            "did_cnt": did_cnt,
            "workers": workers,
            "runs_final": runs_final,
        },
    });
    if opts.meta_docs_map {
        // huge on large corpora; opt-in only
        let mut map = serde_json::Map::with_capacity(doc_ids.len());
        for (id, m) in doc_ids.iter().zip(&docs_meta) {
            map.insert(
                id.clone(),
                json!({
                    "tok_len": m.tok_len,
                    "simhash_hi": m.simhash_hi,
                    "simhash_lo": m.simhash_lo,
                }),
            );
        }
        meta["docs_meta"] = serde_json::Value::Object(map);
    }
    let meta_tmp = tmp_dir.join("meta.json.tmp");
    {
        let file = File::create(&meta_tmp)
            .with_context(|| format!("create {}", meta_tmp.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer(&mut w, &meta).context("write meta json")?;
        let file = w.into_inner().context("flush meta json")?;
        file.sync_all().context("sync meta json")?;
    }
    publish(&meta_tmp, &out_dir.join(META_FILE))?;

    if !opts.keep_tmp {
        let _ = std::fs::remove_dir_all(&build_dir);
    }

    log::info!(
        "built {} in {:.1}s: docs={} uniq={} did={} lines={} bad={} workers={} runs_final={}",
        out_dir.join(INDEX_FILE).display(),
        started.elapsed().as_secs_f64(),
        total_docs,
        uniq_cnt,
        did_cnt,
        lines_total,
        docs_bad,
        workers,
        runs_final,
    );

    Ok(BuildReport {
        lines_total,
        docs_ok,
        docs_bad,
        pairs_emitted,
        uniq_cnt,
        did_cnt,
        workers,
        runs_final,
    })
}
