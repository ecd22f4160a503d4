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

//! The memory tier of vista: a weighted, sharded in-memory cache with LRU eviction.
//!
//! Eviction runs synchronously inside the mutating call and never rejects an insertion.

mod cache;
mod lru;

pub use cache::{Cache, CacheBuilder, Weighter};
pub use vista_common::event::{Event, EventListener};
