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

//! Near-duplicate detection over word-shingle hashes.
//!
//! The crate splits into three layers: the shared text pipeline
//! ([`text`]), the on-disk CSR index and its streaming builder
//! ([`index`]), and the mmap-backed query engine ([`engine`]). Multi-
//! index fan-out lives in the sibling `plagio-segments` crate.

pub mod engine;
pub mod index;
pub mod text;

// Flat re-exports for the common call sites.
pub use engine::{LoadedIndex, SearchEngine, SearchHit};
pub use index::{build_index, BuildOptions, BuildReport};
pub use text::SHINGLE_K;
