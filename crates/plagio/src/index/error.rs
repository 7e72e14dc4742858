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

use std::error::Error;
use std::fmt::{self, Display};

/// Typed errors for the failure classes of index building that callers
/// may want to distinguish. I/O and parse errors travel through
/// `anyhow` with context and wrap one of these only at the boundary.
#[derive(Debug)]
pub enum BuildError {
    /// The corpus produced no indexable documents.
    NoDocs,
    /// Cumulative document count does not fit a u32 local doc id.
    TooManyDocs(u64),
    /// A run file is malformed or its records are out of order.
    CorruptRun(String),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NoDocs => write!(f, "no valid docs in corpus"),
            BuildError::TooManyDocs(n) => {
                write!(f, "corpus has {} docs, exceeding u32 doc ids", n)
            }
            BuildError::CorruptRun(s) => write!(f, "corrupt run: {}", s),
        }
    }
}

impl Error for BuildError {}
