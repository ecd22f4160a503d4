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

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use vista_common::{error::Result, event::EventListener, spawn::Spawner, statistics::Statistics};
use vista_memory::{Cache, CacheBuilder, Weighter};
use vista_storage::DiskStoreBuilder;

use super::ImageCache;
use crate::{
    artifact::Image,
    codec::{Codec, ImageCodec},
    key::CacheKey,
    transform::{ResizeTransformer, Transformer},
};

/// Image cache builder.
///
/// ```rust
/// # use vista::ImageCacheBuilder;
/// # async fn build(dir: &std::path::Path) -> vista::Result<()> {
/// let cache = ImageCacheBuilder::new()
///     .with_name("gallery")
///     .memory(64 * 1024 * 1024)
///     .with_shards(4)
///     .storage()
///     .with_directory(dir)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ImageCacheBuilder {
    name: String,
    event_listener: Option<Arc<dyn EventListener<Key = CacheKey, Value = Image>>>,
}

impl Default for ImageCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCacheBuilder {
    /// Create a new image cache builder.
    pub fn new() -> Self {
        Self {
            name: "vista".to_string(),
            event_listener: None,
        }
    }

    /// Set the name of the image cache instance.
    ///
    /// Default: `vista`.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set event listener of the memory tier.
    ///
    /// The listener is called while the cache holds internal locks and must not call back into the
    /// cache.
    ///
    /// Default: No event listener installed.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Key = CacheKey, Value = Image>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Continue to modify the memory tier configurations. `capacity` is in bytes.
    pub fn memory(self, capacity: usize) -> ImageCacheBuilderPhaseMemory {
        let mut builder = CacheBuilder::new(capacity).with_weighter(|_: &CacheKey, image: &Image| image.weight());
        if let Some(event_listener) = self.event_listener {
            builder = builder.with_event_listener(event_listener);
        }
        ImageCacheBuilderPhaseMemory {
            name: self.name,
            builder,
        }
    }
}

/// Image cache builder to modify the memory tier configurations.
pub struct ImageCacheBuilderPhaseMemory {
    name: String,
    builder: CacheBuilder<CacheKey, Image>,
}

impl ImageCacheBuilderPhaseMemory {
    /// Set memory tier sharding count. The LRU order is kept per shard.
    ///
    /// Default: `1`.
    pub fn with_shards(self, shards: usize) -> Self {
        Self {
            name: self.name,
            builder: self.builder.with_shards(shards),
        }
    }

    /// Set memory tier weighter.
    ///
    /// Default: the size of the decoded pixels.
    pub fn with_weighter(self, weighter: impl Weighter<CacheKey, Image>) -> Self {
        Self {
            name: self.name,
            builder: self.builder.with_weighter(weighter),
        }
    }

    /// Continue to modify the disk tier and hook configurations.
    pub fn storage(self) -> ImageCacheBuilderPhaseStorage {
        ImageCacheBuilderPhaseStorage {
            name: self.name,
            memory: self.builder.build(),
            dir: None,
            transformer: Arc::new(ResizeTransformer::default()),
            codec: Arc::new(ImageCodec),
            spawner: None,
        }
    }
}

/// Image cache builder to modify the disk tier and hook configurations.
pub struct ImageCacheBuilderPhaseStorage {
    name: String,
    memory: Cache<CacheKey, Image>,
    dir: Option<PathBuf>,
    transformer: Arc<dyn Transformer>,
    codec: Arc<dyn Codec>,
    spawner: Option<Spawner>,
}

impl ImageCacheBuilderPhaseStorage {
    /// Set the root directory of the disk tier.
    ///
    /// Default: No disk tier, the cache is memory only.
    pub fn with_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the transformer that renders fetched data in a format.
    ///
    /// Default: [`ResizeTransformer`].
    pub fn with_transformer(mut self, transformer: impl Transformer) -> Self {
        self.transformer = Arc::new(transformer);
        self
    }

    /// Set the codec of persisted images.
    ///
    /// Default: [`ImageCodec`].
    pub fn with_codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Set the spawner of the background work.
    ///
    /// Default: the runtime that calls [`ImageCacheBuilderPhaseStorage::build`].
    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Build and open the image cache with the given configurations.
    pub async fn build(self) -> Result<ImageCache> {
        let spawner = self.spawner.unwrap_or_else(Spawner::current);
        let statistics = Arc::new(Statistics::default());

        let storage = match self.dir {
            Some(dir) => Some(
                DiskStoreBuilder::new(dir)
                    .with_spawner(spawner.clone())
                    .with_statistics(statistics.clone())
                    .open()
                    .await?,
            ),
            None => None,
        };
        tracing::info!(
            "[vista]: Image cache {} built, memory capacity: {}, disk tier: {:?}.",
            self.name,
            self.memory.capacity(),
            storage.as_ref().map(|storage| storage.dir())
        );

        Ok(ImageCache::new(
            self.name,
            self.memory,
            storage,
            self.transformer,
            self.codec,
            spawner,
            statistics,
        ))
    }
}
