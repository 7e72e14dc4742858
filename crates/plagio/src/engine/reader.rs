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

//! Read side of the index: memory-map the file, validate the header and
//! CSR invariants, bind typed accessors over the raw bytes.
//!
//! Section offsets inside an mmap carry no alignment guarantee, so every
//! integer access goes through `from_le_bytes` on a byte slice instead of
//! a cast; this also keeps the format little-endian on any host.

use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::config::EngineConfig;
use super::LoadError;
use crate::index::{DocMeta, IndexHeader, DOCIDS_FILE, DOC_META_LEN, HEADER_LEN, INDEX_FILE};

enum IndexData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl IndexData {
    fn bytes(&self) -> &[u8] {
        match self {
            IndexData::Mapped(m) => m,
            IndexData::Owned(v) => v,
        }
    }
}

/// A fully loaded, validated, immutable index. Shared across query
/// threads behind an `Arc`; all methods are `&self`.
pub struct LoadedIndex {
    data: IndexData,
    dir: PathBuf,
    n_docs: u32,
    uniq_cnt: u64,
    did_cnt: u64,
    uniq_off: usize,
    off_off: usize,
    did_off: usize,
    docs_meta: Vec<DocMeta>,
    doc_ids: Vec<String>,
    config: EngineConfig,
}

impl std::fmt::Debug for LoadedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedIndex")
            .field("dir", &self.dir)
            .field("n_docs", &self.n_docs)
            .finish_non_exhaustive()
    }
}

impl LoadedIndex {
    /// Load `index_native.bin` plus its sidecars from `dir`. The index is
    /// validated completely before this returns; an `Err` leaves nothing
    /// half-installed.
    pub fn load(dir: &Path) -> Result<Self, LoadError> {
        let config = EngineConfig::load_from_dir(dir);
        let bin_path = dir.join(INDEX_FILE);

        let file = File::open(&bin_path)?;
        // fall back to an owned buffer if the platform refuses the map
        let data = match unsafe { Mmap::map(&file) } {
            Ok(m) => IndexData::Mapped(m),
            Err(e) => {
                log::warn!("mmap {} failed ({}), reading into memory", bin_path.display(), e);
                IndexData::Owned(std::fs::read(&bin_path)?)
            }
        };

        let bytes = data.bytes();
        let header = IndexHeader::parse(bytes)?;
        let n_docs = header.n_docs;
        let uniq_cnt = header.uniq_cnt;
        let did_cnt = header.did_cnt;

        // counts bounded by the file itself keep the layout arithmetic
        // below from overflowing on a crafted header
        let len = bytes.len() as u64;
        if uniq_cnt > len / 8 || did_cnt > len / 4 {
            return Err(LoadError::Truncated(format!(
                "header counts (U={}, D={}) exceed a {}-byte file",
                uniq_cnt, did_cnt, len
            )));
        }

        let meta_bytes = (n_docs as u64) * DOC_META_LEN as u64;
        let uniq_bytes = uniq_cnt * 8;
        let off_bytes = (uniq_cnt + 1) * 8;
        let did_bytes = did_cnt * 4;
        let need = HEADER_LEN as u64 + meta_bytes + uniq_bytes + off_bytes + did_bytes;
        if (bytes.len() as u64) < need {
            return Err(LoadError::Truncated(format!(
                "file is {} bytes, layout needs {}",
                bytes.len(),
                need
            )));
        }

        let meta_off = HEADER_LEN;
        let uniq_off = meta_off + meta_bytes as usize;
        let off_off = uniq_off + uniq_bytes as usize;
        let did_off = off_off + off_bytes as usize;

        let mut docs_meta = Vec::with_capacity(n_docs as usize);
        for i in 0..n_docs as usize {
            let at = meta_off + i * DOC_META_LEN;
            docs_meta.push(DocMeta::parse(&bytes[at..at + DOC_META_LEN]));
        }

        let doc_ids = load_doc_ids(dir, n_docs)?;

        let idx = Self {
            data,
            dir: dir.to_path_buf(),
            n_docs,
            uniq_cnt,
            did_cnt,
            uniq_off,
            off_off,
            did_off,
            docs_meta,
            doc_ids,
            config,
        };
        idx.validate_csr()?;
        Ok(idx)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn n_docs(&self) -> u32 {
        self.n_docs
    }

    pub fn uniq_cnt(&self) -> u64 {
        self.uniq_cnt
    }

    pub fn did_cnt(&self) -> u64 {
        self.did_cnt
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    pub fn doc_meta(&self, doc: u32) -> Option<&DocMeta> {
        self.docs_meta.get(doc as usize)
    }

    #[inline]
    pub(crate) fn uniq_at(&self, i: u64) -> u64 {
        let at = self.uniq_off + (i as usize) * 8;
        u64::from_le_bytes(self.data.bytes()[at..at + 8].try_into().unwrap())
    }

    #[inline]
    pub(crate) fn off_at(&self, i: u64) -> u64 {
        let at = self.off_off + (i as usize) * 8;
        u64::from_le_bytes(self.data.bytes()[at..at + 8].try_into().unwrap())
    }

    #[inline]
    pub(crate) fn did_at(&self, p: u64) -> u32 {
        let at = self.did_off + (p as usize) * 4;
        u32::from_le_bytes(self.data.bytes()[at..at + 4].try_into().unwrap())
    }

    /// Posting range for a shingle hash, or `None` on a miss.
    pub(crate) fn postings(&self, h: u64) -> Option<(u64, u64)> {
        let mut lo = 0u64;
        let mut hi = self.uniq_cnt;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.uniq_at(mid) < h {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo >= self.uniq_cnt || self.uniq_at(lo) != h {
            return None;
        }
        let l = self.off_at(lo);
        let r = self.off_at(lo + 1);
        if l < r {
            Some((l, r))
        } else {
            None
        }
    }

    fn validate_csr(&self) -> Result<(), LoadError> {
        let u = self.uniq_cnt;
        let d = self.did_cnt;

        if self.off_at(0) != 0 {
            return Err(LoadError::CsrInvariant("off[0] != 0".into()));
        }
        if self.off_at(u) != d {
            return Err(LoadError::CsrInvariant("off[U] != D".into()));
        }

        // row pointers: full monotonic scan
        let mut prev = 0u64;
        for i in 1..=u {
            let cur = self.off_at(i);
            if cur < prev || cur > d {
                return Err(LoadError::CsrInvariant(format!(
                    "off[{}]={} out of order (prev {}, D {})",
                    i, cur, prev, d
                )));
            }
            prev = cur;
        }

        // uniq strictly ascending: windows at the ends and the middle
        // plus an even stride of samples
        if u > 1 {
            let check_window = |start: u64, len: u64| -> Result<(), LoadError> {
                let end = (start + len).min(u - 1);
                for i in start..end {
                    if self.uniq_at(i) >= self.uniq_at(i + 1) {
                        return Err(LoadError::CsrInvariant(format!(
                            "uniq not strictly ascending at {}",
                            i
                        )));
                    }
                }
                Ok(())
            };
            check_window(0, 64)?;
            check_window(u / 2, 64)?;
            check_window(u.saturating_sub(65), 64)?;

            let samples = self.config.validate_uniq_samples as u64;
            if samples > 0 {
                let stride = (u / samples).max(1);
                let mut i = 0u64;
                while i + stride < u {
                    if self.uniq_at(i) >= self.uniq_at(i + stride) {
                        return Err(LoadError::CsrInvariant(format!(
                            "uniq not ascending between {} and {}",
                            i,
                            i + stride
                        )));
                    }
                    i += stride;
                }
            }
        }

        // sampled doc-id range checks
        let n = self.n_docs;
        let did_samples = self.config.validate_did_samples as u64;
        if d > 0 && did_samples > 0 {
            let stride = (d / did_samples).max(1);
            let mut p = 0u64;
            while p < d {
                if self.did_at(p) >= n {
                    return Err(LoadError::CsrInvariant(format!(
                        "did[{}]={} >= N_docs {}",
                        p,
                        self.did_at(p),
                        n
                    )));
                }
                p += stride;
            }
        }

        // sampled posting slices: strictly ascending, in range
        let slice_samples = self.config.validate_postings_samples as u64;
        if u > 0 && slice_samples > 0 {
            let stride = (u / slice_samples).max(1);
            let maxlen = self.config.validate_postings_maxlen as u64;
            let mut i = 0u64;
            while i < u {
                let l = self.off_at(i);
                let r = self.off_at(i + 1).min(l + maxlen);
                let mut prev_doc: Option<u32> = None;
                for p in l..r {
                    let doc = self.did_at(p);
                    if doc >= n {
                        return Err(LoadError::CsrInvariant(format!(
                            "did[{}]={} >= N_docs {}",
                            p, doc, n
                        )));
                    }
                    if let Some(pd) = prev_doc {
                        if doc <= pd {
                            return Err(LoadError::CsrInvariant(format!(
                                "posting list {} not strictly ascending at {}",
                                i, p
                            )));
                        }
                    }
                    prev_doc = Some(doc);
                }
                i += stride;
            }
        }

        Ok(())
    }
}

fn load_doc_ids(dir: &Path, n_docs: u32) -> Result<Vec<String>, LoadError> {
    let path = dir.join(DOCIDS_FILE);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| LoadError::DocIds(format!("{}: {}", path.display(), e)))?;
    let mut ids: Vec<String> = serde_json::from_str(&raw)
        .map_err(|e| LoadError::DocIds(format!("{}: {}", path.display(), e)))?;

    if ids.len() != n_docs as usize {
        log::warn!(
            "{}: {} ids for {} docs",
            path.display(),
            ids.len(),
            n_docs
        );
        if ids.len() > n_docs as usize {
            ids.truncate(n_docs as usize);
        }
    }
    Ok(ids)
}
