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

//! Shared components for vista: the error type, cache events, statistics and task spawning.

/// Error and result types shared by all vista crates.
pub mod error;
/// Cache events and the customizable event listener.
pub mod event;
/// Tracking of background work.
pub mod pending;
/// Task spawning helpers.
pub mod spawn;
/// Counters sampled by the cache engine and its tiers.
pub mod statistics;

pub use error::{Error, ErrorKind, Result};
pub use event::{Event, EventListener};
pub use pending::{Pending, PendingGuard};
pub use spawn::{SpawnHandle, Spawner};
pub use statistics::Statistics;
