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

//! Sorted run files and the k-way merges over them.
//!
//! A run is a sorted, deduped sequence of `(hash, doc)` pairs spilled to
//! disk during ingestion. Local runs carry worker-local doc ids and the
//! worker id in the header; merge passes remap them to global ids and
//! emit global runs, so only the first pass needs the per-worker bases.

use anyhow::{bail, Context, Result};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::BuildError;

const RUN_MAGIC: [u8; 4] = *b"RUN1";
const RUN_HEADER_LEN: usize = 20;
const PAIR_REC_LEN: usize = 12;

/// Records buffered per reader between refills.
const MERGE_BUF_RECS: usize = 1 << 16;
/// Records buffered before a merged-run write.
const WRITE_BUF_RECS: usize = 1 << 20;

/// One posting pair. Derived ordering is `(h, doc)`, which is the sort
/// order of every run file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PairRec {
    pub h: u64,
    pub doc: u32,
}

impl PairRec {
    fn encode(&self) -> [u8; PAIR_REC_LEN] {
        let mut buf = [0u8; PAIR_REC_LEN];
        buf[0..8].copy_from_slice(&self.h.to_le_bytes());
        buf[8..12].copy_from_slice(&self.doc.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            h: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            doc: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RunKind {
    /// Doc ids are local to the worker named in the header.
    Local,
    /// Doc ids are already global.
    Global,
}

impl RunKind {
    fn to_u32(self) -> u32 {
        match self {
            RunKind::Local => 1,
            RunKind::Global => 2,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(RunKind::Local),
            2 => Some(RunKind::Global),
            _ => None,
        }
    }
}

fn write_run_header(
    w: &mut impl Write,
    kind: RunKind,
    tid: u32,
    count: u64,
) -> std::io::Result<()> {
    w.write_all(&RUN_MAGIC)?;
    w.write_all(&kind.to_u32().to_le_bytes())?;
    w.write_all(&tid.to_le_bytes())?;
    w.write_all(&count.to_le_bytes())?;
    Ok(())
}

/// Sort, dedup and spill `recs` to a run file. The buffer is drained but
/// keeps its capacity for reuse.
pub(crate) fn write_run_file(
    path: &Path,
    kind: RunKind,
    tid: u32,
    recs: &mut Vec<PairRec>,
) -> Result<()> {
    recs.sort_unstable();
    recs.dedup();

    let file = File::create(path)
        .with_context(|| format!("create run file {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_run_header(&mut w, kind, tid, recs.len() as u64)?;
    for rec in recs.iter() {
        w.write_all(&rec.encode())?;
    }
    w.into_inner()
        .with_context(|| format!("flush run file {}", path.display()))?;
    recs.clear();
    Ok(())
}

/// Buffered reader over one run file. Validates the sort order of the
/// stream as the cursor advances; a violation aborts the whole build.
pub(crate) struct RunReader {
    path: PathBuf,
    file: BufReader<File>,
    kind: RunKind,
    tid: u32,
    count: u64,
    read: u64,
    buf: Vec<PairRec>,
    idx: usize,
    last: Option<PairRec>,
}

impl RunReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("open run file {}", path.display()))?;
        let mut file = BufReader::new(file);
        let mut hdr = [0u8; RUN_HEADER_LEN];
        file.read_exact(&mut hdr)
            .with_context(|| format!("read run header {}", path.display()))?;
        if hdr[0..4] != RUN_MAGIC {
            bail!(BuildError::CorruptRun(format!(
                "bad magic in {}",
                path.display()
            )));
        }
        let kind_raw = u32::from_le_bytes(hdr[4..8].try_into().unwrap());
        let kind = RunKind::from_u32(kind_raw).ok_or_else(|| {
            BuildError::CorruptRun(format!(
                "unknown run kind {} in {}",
                kind_raw,
                path.display()
            ))
        })?;
        let tid = u32::from_le_bytes(hdr[8..12].try_into().unwrap());
        let count = u64::from_le_bytes(hdr[12..20].try_into().unwrap());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            kind,
            tid,
            count,
            read: 0,
            buf: Vec::with_capacity(MERGE_BUF_RECS),
            idx: 0,
            last: None,
        })
    }

    fn refill(&mut self) -> Result<bool> {
        if self.read >= self.count {
            return Ok(false);
        }
        let want = ((self.count - self.read) as usize).min(MERGE_BUF_RECS);
        let mut raw = vec![0u8; want * PAIR_REC_LEN];
        self.file
            .read_exact(&mut raw)
            .with_context(|| format!("read run records from {}", self.path.display()))?;
        self.buf.clear();
        self.idx = 0;
        for chunk in raw.chunks_exact(PAIR_REC_LEN) {
            self.buf.push(PairRec::decode(chunk));
        }
        self.read += want as u64;
        Ok(true)
    }

    /// Next record with a global doc id, or `None` at end of run.
    /// `bases` maps worker id to its global doc-id base and is required
    /// for local runs.
    pub(crate) fn next_global(&mut self, bases: Option<&[u32]>) -> Result<Option<PairRec>> {
        if self.idx >= self.buf.len() && !self.refill()? {
            return Ok(None);
        }
        let rec = self.buf[self.idx];
        self.idx += 1;

        if let Some(prev) = self.last {
            if rec < prev {
                bail!(BuildError::CorruptRun(format!(
                    "records out of order in {}",
                    self.path.display()
                )));
            }
        }
        self.last = Some(rec);

        let doc = match self.kind {
            RunKind::Global => rec.doc,
            RunKind::Local => {
                let bases = bases.ok_or_else(|| {
                    BuildError::CorruptRun(format!(
                        "local run {} merged without doc bases",
                        self.path.display()
                    ))
                })?;
                let base = *bases.get(self.tid as usize).ok_or_else(|| {
                    BuildError::CorruptRun(format!(
                        "bad worker id {} in {}",
                        self.tid,
                        self.path.display()
                    ))
                })?;
                base.checked_add(rec.doc).ok_or_else(|| {
                    BuildError::CorruptRun(format!(
                        "doc id overflow in {}",
                        self.path.display()
                    ))
                })?
            }
        };
        Ok(Some(PairRec { h: rec.h, doc }))
    }
}

/// Min-heap over the head record of every open run.
struct MergeHeap {
    readers: Vec<RunReader>,
    heap: BinaryHeap<Reverse<(PairRec, usize)>>,
}

impl MergeHeap {
    fn open(inputs: &[PathBuf], bases: Option<&[u32]>) -> Result<Self> {
        let mut readers = Vec::with_capacity(inputs.len());
        for p in inputs {
            readers.push(RunReader::open(p)?);
        }
        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (i, r) in readers.iter_mut().enumerate() {
            if let Some(rec) = r.next_global(bases)? {
                heap.push(Reverse((rec, i)));
            }
        }
        Ok(Self { readers, heap })
    }

    fn pop(&mut self, bases: Option<&[u32]>) -> Result<Option<PairRec>> {
        let Some(Reverse((rec, i))) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(next) = self.readers[i].next_global(bases)? {
            self.heap.push(Reverse((next, i)));
        }
        Ok(Some(rec))
    }
}

/// Merge several runs into one global run, deduping `(h, doc)` pairs.
fn merge_runs_to_global_run(
    inputs: &[PathBuf],
    out_path: &Path,
    bases: Option<&[u32]>,
) -> Result<()> {
    let mut heap = MergeHeap::open(inputs, bases)?;

    let file = File::create(out_path)
        .with_context(|| format!("create merged run {}", out_path.display()))?;
    let mut w = BufWriter::new(file);
    // count is unknown until the end; patched below
    write_run_header(&mut w, RunKind::Global, 0, 0)?;

    let mut pending: Vec<PairRec> = Vec::with_capacity(WRITE_BUF_RECS);
    let mut written = 0u64;
    let mut last: Option<PairRec> = None;

    while let Some(rec) = heap.pop(bases)? {
        if last == Some(rec) {
            continue;
        }
        last = Some(rec);
        pending.push(rec);
        if pending.len() >= WRITE_BUF_RECS {
            for r in pending.drain(..) {
                w.write_all(&r.encode())?;
            }
        }
        written += 1;
    }
    for r in pending.drain(..) {
        w.write_all(&r.encode())?;
    }

    let mut file = w
        .into_inner()
        .with_context(|| format!("flush merged run {}", out_path.display()))?;
    file.seek(SeekFrom::Start(0))?;
    write_run_header(&mut file, RunKind::Global, 0, written)?;
    file.sync_all()
        .with_context(|| format!("sync merged run {}", out_path.display()))?;
    Ok(())
}

/// Reduce the run count below `max_way` with passes of `max_way`-way
/// merges so the final merge never exceeds the open-file budget. After
/// the first pass every surviving run is global and `bases` is no longer
/// consulted.
pub(crate) fn reduce_runs_multipass(
    runs: Vec<PathBuf>,
    tmp_dir: &Path,
    max_way: usize,
    bases: &[u32],
) -> Result<Vec<PathBuf>> {
    let max_way = max_way.max(8);
    let mut cur = runs;
    let mut bases_opt: Option<&[u32]> = Some(bases);
    let mut pass = 0usize;

    while cur.len() > max_way {
        let mut next = Vec::with_capacity(cur.len().div_ceil(max_way));
        for group in cur.chunks(max_way) {
            let out = tmp_dir.join(format!("run_global_p{}_g{}.bin", pass, next.len()));
            merge_runs_to_global_run(group, &out, bases_opt)?;
            next.push(out);
        }
        for p in &cur {
            // consumed inputs; failure to unlink is not fatal
            let _ = std::fs::remove_file(p);
        }
        log::debug!(
            "merge pass {}: {} runs -> {}",
            pass,
            cur.len(),
            next.len()
        );
        cur = next;
        pass += 1;
        bases_opt = None;
    }
    Ok(cur)
}

/// Final merge: stream every surviving run through the heap and emit the
/// three CSR sections to temp files. Returns `(uniq_cnt, did_cnt)`.
pub(crate) fn merge_runs_to_csr(
    runs: &[PathBuf],
    bases: &[u32],
    uniq_tmp: &Path,
    off_tmp: &Path,
    did_tmp: &Path,
) -> Result<(u64, u64)> {
    let mut heap = MergeHeap::open(runs, Some(bases))?;

    let mut f_uniq = BufWriter::new(
        File::create(uniq_tmp).with_context(|| format!("create {}", uniq_tmp.display()))?,
    );
    let mut f_off = BufWriter::new(
        File::create(off_tmp).with_context(|| format!("create {}", off_tmp.display()))?,
    );
    let mut f_did = BufWriter::new(
        File::create(did_tmp).with_context(|| format!("create {}", did_tmp.display()))?,
    );

    let mut uniq_cnt = 0u64;
    let mut did_cnt = 0u64;
    let mut cur_hash: Option<u64> = None;
    let mut last_doc = u32::MAX;

    while let Some(rec) = heap.pop(Some(bases))? {
        if cur_hash != Some(rec.h) {
            f_uniq.write_all(&rec.h.to_le_bytes())?;
            f_off.write_all(&did_cnt.to_le_bytes())?;
            uniq_cnt += 1;
            cur_hash = Some(rec.h);
            last_doc = u32::MAX;
        }
        if rec.doc != last_doc {
            f_did.write_all(&rec.doc.to_le_bytes())?;
            did_cnt += 1;
            last_doc = rec.doc;
        }
    }
    // closing row pointer, |off| = |uniq| + 1
    f_off.write_all(&did_cnt.to_le_bytes())?;

    f_uniq.into_inner().context("flush uniq tmp")?;
    f_off.into_inner().context("flush off tmp")?;
    f_did.into_inner().context("flush did tmp")?;
    Ok((uniq_cnt, did_cnt))
}
