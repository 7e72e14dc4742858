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

//! On-disk index format and the streaming builder.
//!
//! The index file is little-endian and self-describing:
//!
//! ```text
//! Header            44 bytes: magic "PLAG", version, N_docs, U, D, reserved
//! DocMeta[N_docs]   20 bytes each: tok_len u32, simhash_hi u64, simhash_lo u64
//! uniq[U]           u64, strictly ascending shingle hashes
//! off[U+1]          u64, CSR row pointers into did
//! did[D]            u32, concatenated strictly-ascending posting lists
//! ```
//!
//! A JSON sidecar (`index_native_docids.json`) maps local doc index to the
//! caller's external string id, positionally.

use std::fmt;
use std::io::{self, Write};

pub const MAGIC: [u8; 4] = *b"PLAG";
pub const VERSION: u32 = 2;

pub const HEADER_LEN: usize = 44;
pub const DOC_META_LEN: usize = 20;

/// File names inside an index directory.
pub const INDEX_FILE: &str = "index_native.bin";
pub const DOCIDS_FILE: &str = "index_native_docids.json";
pub const META_FILE: &str = "index_native_meta.json";
pub const CONFIG_FILE: &str = "index_config.json";

mod error;
pub use error::BuildError;

mod runs;
pub(crate) use runs::{merge_runs_to_csr, reduce_runs_multipass, write_run_file, PairRec, RunKind};

mod builder;
pub use builder::{build_index, BuildOptions, BuildReport};

/// Fixed-size file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexHeader {
    pub n_docs: u32,
    pub uniq_cnt: u64,
    pub did_cnt: u64,
}

/// Header parse failures, mapped to loader error codes by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    TooSmall,
    BadMagic,
    BadVersion(u32),
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::TooSmall => write!(f, "file smaller than header"),
            HeaderError::BadMagic => write!(f, "bad magic"),
            HeaderError::BadVersion(v) => write!(f, "unsupported version {}", v),
        }
    }
}

impl std::error::Error for HeaderError {}

impl IndexHeader {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&self.n_docs.to_le_bytes())?;
        w.write_all(&self.uniq_cnt.to_le_bytes())?;
        w.write_all(&self.did_cnt.to_le_bytes())?;
        w.write_all(&0u64.to_le_bytes())?;
        w.write_all(&0u64.to_le_bytes())?;
        Ok(())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::TooSmall);
        }
        if bytes[0..4] != MAGIC {
            return Err(HeaderError::BadMagic);
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(HeaderError::BadVersion(version));
        }
        Ok(Self {
            n_docs: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            uniq_cnt: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
            did_cnt: u64::from_le_bytes(bytes[20..28].try_into().unwrap()),
        })
    }
}

/// Per-document metadata record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DocMeta {
    pub tok_len: u32,
    pub simhash_hi: u64,
    pub simhash_lo: u64,
}

impl DocMeta {
    pub fn write_to(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.tok_len.to_le_bytes())?;
        w.write_all(&self.simhash_hi.to_le_bytes())?;
        w.write_all(&self.simhash_lo.to_le_bytes())?;
        Ok(())
    }

    /// `bytes` must be exactly [`DOC_META_LEN`] long.
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            tok_len: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            simhash_hi: u64::from_le_bytes(bytes[4..12].try_into().unwrap()),
            simhash_lo: u64::from_le_bytes(bytes[12..20].try_into().unwrap()),
        }
    }
}
