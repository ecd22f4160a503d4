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

//! Disk tier of vista.
//!
//! [`DiskStore`] persists `(key, format) -> bytes` entries under a root directory with the layout:
//!
//! ```plain
//! <root>/<format>/<xxh64(key) as 16 hex digits>.vst
//! ```
//!
//! The layout is deterministic, so a store reopened on the same directory serves the entries
//! written before the restart.

mod entry;
mod index;
mod path;
mod store;

pub use entry::{MAGIC, VERSION};
pub use path::validate_format_name;
pub use store::{DiskStore, DiskStoreBuilder};
