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

pub use image;
pub use vista_common::{
    error::{Error, ErrorKind, Result},
    event::{Event, EventListener},
    spawn::Spawner,
    statistics::StatisticsSnapshot,
};
pub use vista_memory::{Cache, Weighter};
pub use vista_storage::DiskStore;

pub use crate::{
    artifact::Image,
    codec::{Codec, ImageCodec},
    engine::{
        ImageCache, ImageCacheBuilder, ImageCacheBuilderPhaseMemory, ImageCacheBuilderPhaseStorage, ImageRequest,
        RequestState,
    },
    fetcher::{DiskFetcher, Fetcher, FnFetcher, ImmediateFetcher, Source},
    format::{Format, Preload, ResizeHook, ScaleMode, Size},
    key::{CacheKey, Key},
    transform::{scaled_size, ResizeTransformer, Transformer},
};
