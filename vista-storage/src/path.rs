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

use std::path::{Path, PathBuf};

use twox_hash::XxHash64;
use vista_common::error::{Error, Result};

/// Extension of entry files.
pub const ENTRY_EXTENSION: &str = "vst";
/// Prefix of in-progress writes. Files with this prefix are garbage after a restart.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Check that a format name can be used as a directory name.
///
/// Valid names are non-empty, consist of `[A-Za-z0-9._-]` and are neither `.` nor `..`.
pub fn validate_format_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(Error::config("invalid format name").with_context("format", name))
    }
}

pub fn hash_key(key: &str) -> u64 {
    XxHash64::oneshot(0, key.as_bytes())
}

pub fn entry_path(root: &Path, format: &str, hash: u64) -> PathBuf {
    root.join(format).join(format!("{hash:016x}.{ENTRY_EXTENSION}"))
}

/// Parse the key hash back from an entry file name.
pub fn parse_entry_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(ENTRY_EXTENSION)?.strip_suffix('.')?;
    if stem.len() != 16 {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}
