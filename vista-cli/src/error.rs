// Copyright 2025 vista Project Authors
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

use std::path::PathBuf;

/// Error type of the cli tool.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Error raised by the cache.
    #[error("cache error: {0}")]
    Cache(#[from] vista::Error),
    /// Malformed formats file.
    #[error("malformed formats file: {0}")]
    Json(#[from] serde_json::Error),
    /// The cache directory does not exist.
    #[error("cache directory not found: {0:?}")]
    DirectoryNotFound(PathBuf),
    /// The format is not present in the cache directory.
    #[error("format not found: {0}")]
    FormatNotFound(String),
    /// Other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type of the cli tool.
pub type Result<T> = core::result::Result<T, Error>;
