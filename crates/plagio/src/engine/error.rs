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

use crate::index::HeaderError;

/// Load-time failures. A failed load never disturbs a previously
/// published index; `code()` is the stable wire identifier surfaced to
/// callers.
#[derive(Debug)]
pub enum LoadError {
    Io(String),
    BadMagic,
    BadVersion(u32),
    /// File ends before the named section does.
    Truncated(String),
    /// A CSR invariant does not hold.
    CsrInvariant(String),
    /// The docids sidecar is missing or not a JSON string array.
    DocIds(String),
}

impl LoadError {
    pub fn code(&self) -> &'static str {
        match self {
            LoadError::Io(_) => "io",
            LoadError::BadMagic => "bad_magic",
            LoadError::BadVersion(_) => "bad_version",
            LoadError::Truncated(_) => "truncated",
            LoadError::CsrInvariant(_) => "csr_invariant",
            LoadError::DocIds(_) => "doc_ids",
        }
    }
}

impl Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(s) => write!(f, "io error: {}", s),
            LoadError::BadMagic => write!(f, "bad magic"),
            LoadError::BadVersion(v) => write!(f, "unsupported index version {}", v),
            LoadError::Truncated(s) => write!(f, "truncated index: {}", s),
            LoadError::CsrInvariant(s) => write!(f, "csr invariant violated: {}", s),
            LoadError::DocIds(s) => write!(f, "docids sidecar: {}", s),
        }
    }
}

impl Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e.to_string())
    }
}

impl From<HeaderError> for LoadError {
    fn from(e: HeaderError) -> Self {
        match e {
            HeaderError::TooSmall => LoadError::Truncated("header".to_string()),
            HeaderError::BadMagic => LoadError::BadMagic,
            HeaderError::BadVersion(v) => LoadError::BadVersion(v),
        }
    }
}
