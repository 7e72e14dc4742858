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

//! Search engine over a built index: loading, validation and the hot
//! query path.

mod config;
pub use config::{EngineConfig, RAW_HARD_MAX, TOPK_HARD_MAX};

mod error;
pub use error::LoadError;

mod reader;
pub use reader::LoadedIndex;

mod searcher;
pub use searcher::{SearchHit, SearchStats};

use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// An atomically swappable handle to a loaded index.
///
/// `load` builds and validates the new index completely before
/// publishing it, so concurrent queries observe either the previous
/// index or the new one, never a partial state. A failed load leaves the
/// published index untouched.
#[derive(Default)]
pub struct SearchEngine {
    current: RwLock<Option<Arc<LoadedIndex>>>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load or reload the index in `dir` and publish it.
    pub fn load(&self, dir: &Path) -> Result<(), LoadError> {
        let idx = LoadedIndex::load(dir)?;
        log::info!(
            "loaded {}: docs={} uniq={} did={}",
            dir.display(),
            idx.n_docs(),
            idx.uniq_cnt(),
            idx.did_cnt()
        );
        *self.current.write() = Some(Arc::new(idx));
        Ok(())
    }

    /// The currently published index, if any. Holders keep it alive
    /// across a concurrent reload.
    pub fn snapshot(&self) -> Option<Arc<LoadedIndex>> {
        self.current.read().clone()
    }

    /// Search the published index; empty result when none is loaded.
    pub fn search_text(&self, query: &str, top_k: usize, max_hits: usize) -> Vec<SearchHit> {
        match self.snapshot() {
            Some(idx) => idx.search_text(query, top_k, max_hits),
            None => Vec::new(),
        }
    }
}
