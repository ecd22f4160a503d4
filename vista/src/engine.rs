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

mod builder;
mod inflight;
mod request;

use std::{fmt::Debug, sync::Arc};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot::{self, error::TryRecvError};
use vista_common::{
    error::{Error, ErrorKind, Result},
    pending::{Pending, PendingGuard},
    spawn::Spawner,
    statistics::{Statistics, StatisticsSnapshot},
};
use vista_memory::Cache;
use vista_storage::DiskStore;

pub use self::{
    builder::{ImageCacheBuilder, ImageCacheBuilderPhaseMemory, ImageCacheBuilderPhaseStorage},
    request::{ImageRequest, RequestState},
};
use self::{
    inflight::{Enqueue, InflightMap},
    request::Waiting,
};
use crate::{
    artifact::Image,
    codec::Codec,
    fetcher::Fetcher,
    format::{Format, Preload},
    key::{CacheKey, Key},
    transform::Transformer,
};

/// Where a resolved image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Disk,
    Fetch,
}

struct ImageCacheInner {
    name: String,

    memory: Cache<CacheKey, Image>,
    storage: Option<DiskStore>,

    formats: RwLock<HashMap<String, Arc<Format>>>,
    /// Lock order: `inflights` before the memory tier.
    inflights: Arc<Mutex<InflightMap>>,

    transformer: Arc<dyn Transformer>,
    codec: Arc<dyn Codec>,

    spawner: Spawner,
    pending: Pending,
    statistics: Arc<Statistics>,
}

/// Two-tier image cache.
///
/// Images are cached by key and [`Format`] in a weighted in-memory LRU and, optionally, in a
/// persistent per-format store on disk. On a miss of both tiers, the image is fetched with the
/// caller's [`Fetcher`], rendered in the format, stored in both tiers and handed to every caller
/// waiting for it. Concurrent requests of the same key and format share a single fetch.
///
/// Background work runs on the tokio runtime captured when the cache was built, so the cache can
/// be used from any thread.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<ImageCacheInner>,
}

impl Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("name", &self.inner.name)
            .field("memory", &self.inner.memory)
            .field("storage", &self.inner.storage)
            .finish()
    }
}

impl ImageCache {
    pub(crate) fn new(
        name: String,
        memory: Cache<CacheKey, Image>,
        storage: Option<DiskStore>,
        transformer: Arc<dyn Transformer>,
        codec: Arc<dyn Codec>,
        spawner: Spawner,
        statistics: Arc<Statistics>,
    ) -> Self {
        Self {
            inner: Arc::new(ImageCacheInner {
                name,
                memory,
                storage,
                formats: RwLock::new(HashMap::new()),
                inflights: Arc::new(Mutex::new(InflightMap::default())),
                transformer,
                codec,
                spawner,
                pending: Pending::default(),
                statistics,
            }),
        }
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Access the memory tier.
    pub fn memory(&self) -> &Cache<CacheKey, Image> {
        &self.inner.memory
    }

    /// Access the disk tier, if the cache has one.
    pub fn storage(&self) -> Option<&DiskStore> {
        self.inner.storage.as_ref()
    }

    /// Register a format and prepare its disk directory.
    ///
    /// Registering a format again is a no-op. A format with a registered name and a different
    /// rendering is rejected with [`ErrorKind::Config`].
    pub async fn register_format(&self, format: Format) -> Result<Arc<Format>> {
        let format = self.inner.resolve_format(&format)?;
        self.inner.prepare_storage(&format).await?;
        Ok(format)
    }

    /// Get a registered format by name.
    pub fn format(&self, name: &str) -> Option<Arc<Format>> {
        self.inner.formats.read().get(name).cloned()
    }

    /// All registered formats.
    pub fn formats(&self) -> Vec<Arc<Format>> {
        self.inner.formats.read().values().cloned().collect()
    }

    /// Get the image of `key` in `format`, fetching it with `fetcher` on a miss of both tiers.
    ///
    /// A memory hit is ready right away. Otherwise the returned request resolves once the image
    /// is loaded from disk or fetched and transformed. The format is registered on first use.
    pub fn get(&self, key: impl Into<Key>, format: &Format, fetcher: impl Fetcher) -> ImageRequest {
        let key = key.into();
        let format = match self.inner.resolve_format(format) {
            Ok(format) => format,
            Err(e) => return ImageRequest::failed(e),
        };
        let cache_key = CacheKey::new(key, format.name.as_str());

        if let Some(image) = self.inner.memory.get(&cache_key) {
            Statistics::incr(&self.inner.statistics.memory_hits);
            tracing::trace!("[vista]: Memory hit {cache_key}.");
            return ImageRequest::hit(image);
        }

        let mut inflights = self.inner.inflights.lock();
        // Completions fill the memory tier under the in-flight lock, look again before joining.
        if let Some(image) = self.inner.memory.get(&cache_key) {
            drop(inflights);
            Statistics::incr(&self.inner.statistics.memory_hits);
            return ImageRequest::hit(image);
        }

        let fetcher: Arc<dyn Fetcher> = Arc::new(fetcher);
        match inflights.enqueue(&cache_key, fetcher.clone()) {
            Enqueue::Wait { ticket, waiter } => {
                drop(inflights);
                Statistics::incr(&self.inner.statistics.coalesced);
                tracing::trace!("[vista]: Join in-flight request of {cache_key}.");
                let waiting = Waiting::new(waiter, self.inner.inflights.clone(), cache_key, ticket);
                ImageRequest::wait(RequestState::Wait, waiting)
            }
            Enqueue::Launch {
                ticket,
                waiter,
                cancelled,
            } => {
                drop(inflights);
                let waiting = Waiting::new(waiter, self.inner.inflights.clone(), cache_key.clone(), ticket);
                let guard = self.inner.pending.guard();
                let inner = self.inner.clone();
                self.inner.spawner.spawn(async move {
                    inner.drive(cache_key, ticket.id, format, fetcher, cancelled, guard).await;
                });
                ImageRequest::wait(RequestState::Miss, waiting)
            }
        }
    }

    /// Get the image of the fetcher's key in `format`, see [`ImageCache::get`].
    pub fn fetch(&self, format: &Format, fetcher: impl Fetcher) -> ImageRequest {
        let key = fetcher.key().clone();
        self.get(key, format, fetcher)
    }

    /// Look up the image of `key` in a registered format without fetching.
    ///
    /// A disk hit is promoted to the memory tier.
    pub async fn lookup(&self, key: impl Into<Key>, format_name: &str) -> Result<Option<Image>> {
        let Some(format) = self.format(format_name) else {
            return Ok(None);
        };
        let cache_key = CacheKey::new(key.into(), format_name);
        if let Some(image) = self.inner.memory.get(&cache_key) {
            Statistics::incr(&self.inner.statistics.memory_hits);
            return Ok(Some(image));
        }
        let Some(image) = self.inner.load(&cache_key, &format, true).await else {
            return Ok(None);
        };
        Statistics::incr(&self.inner.statistics.disk_hits);
        let _inflights = self.inner.inflights.lock();
        // A completion may have filled the memory tier meanwhile, keep its image.
        if let Some(image) = self.inner.memory.get(&cache_key) {
            return Ok(Some(image));
        }
        self.inner.memory.insert(cache_key, image.clone());
        Ok(Some(image))
    }

    /// Store an image already rendered in a registered format into both tiers.
    ///
    /// The disk write happens in the background.
    pub fn insert(&self, key: impl Into<Key>, format_name: &str, image: impl Into<Image>) -> Result<()> {
        let format = self.format(format_name).ok_or_else(|| unknown_format(format_name))?;
        let cache_key = CacheKey::new(key.into(), format_name);
        let image = image.into();
        {
            let _inflights = self.inner.inflights.lock();
            self.inner.memory.insert(cache_key.clone(), image.clone());
        }
        self.inner.persist_in_background(cache_key, format, image);
        Ok(())
    }

    /// Cancel the in-flight request of `key` in a format for every waiter.
    ///
    /// Waiters resolve with [`ErrorKind::Cancelled`]. Returns `false` if nothing was in flight.
    pub fn cancel(&self, key: impl Into<Key>, format_name: &str) -> bool {
        let cache_key = CacheKey::new(key.into(), format_name);
        let Some((fetcher, notifiers)) = self.inner.inflights.lock().abort(&cache_key) else {
            return false;
        };
        tracing::debug!("[vista]: Cancel in-flight request of {cache_key}.");
        let e = Error::cancelled()
            .with_context("key", cache_key.key())
            .with_context("format", format_name);
        for notifier in notifiers {
            let _ = notifier.send(Err(e.clone()));
        }
        fetcher.cancel();
        true
    }

    /// Remove the image of `key` in a format from both tiers.
    pub async fn remove(&self, key: impl Into<Key>, format_name: &str) -> Result<()> {
        let key = key.into();
        self.inner.memory.remove(&CacheKey::new(key.clone(), format_name));
        if let Some(storage) = self.inner.storage.as_ref() {
            storage.remove(&key, format_name).await?;
        }
        Ok(())
    }

    /// Remove the images of `key` in every format from both tiers.
    pub async fn remove_all(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        for format in self.formats() {
            self.inner.memory.remove(&CacheKey::new(key.clone(), format.name.as_str()));
        }
        if let Some(storage) = self.inner.storage.as_ref() {
            storage.remove_key(&key).await?;
        }
        Ok(())
    }

    /// Remove every image from both tiers. In-flight requests are not affected.
    pub async fn clear(&self) -> Result<()> {
        self.inner.memory.clear();
        if let Some(storage) = self.inner.storage.as_ref() {
            storage.clear().await?;
        }
        Ok(())
    }

    /// Change the disk capacity of a registered format.
    ///
    /// Entries over the new capacity are evicted in the background.
    pub fn set_capacity(&self, format_name: &str, capacity: usize) -> Result<()> {
        {
            let mut formats = self.inner.formats.write();
            let format = formats.get_mut(format_name).ok_or_else(|| unknown_format(format_name))?;
            let mut updated = (**format).clone();
            updated.disk_capacity = capacity;
            *format = Arc::new(updated);
        }
        if let Some(storage) = self.inner.storage.as_ref() {
            if storage.capacity(format_name).is_some() {
                storage.set_capacity(format_name, capacity)?;
            }
        }
        Ok(())
    }

    /// Snapshot of the operation counters.
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.statistics.snapshot()
    }

    /// Wait until in-flight requests and background disk work have settled.
    pub async fn wait(&self) {
        self.inner.pending.wait().await;
        if let Some(storage) = self.inner.storage.as_ref() {
            storage.wait().await;
        }
    }
}

fn check_cancelled(key: &CacheKey, cancelled: &mut oneshot::Receiver<()>) -> Result<()> {
    match cancelled.try_recv() {
        Err(TryRecvError::Empty) => Ok(()),
        _ => {
            tracing::debug!("[vista]: Request of {key} canceled.");
            Err(Error::cancelled()
                .with_context("key", key.key())
                .with_context("format", key.format()))
        }
    }
}

fn unknown_format(name: &str) -> Error {
    Error::config("format not registered").with_context("format", name)
}

impl ImageCacheInner {
    fn resolve_format(self: &Arc<Self>, format: &Format) -> Result<Arc<Format>> {
        let conflict = |registered: &Arc<Format>| {
            if registered.is_compatible(format) {
                Ok(registered.clone())
            } else {
                Err(Error::config("a different format is registered with the same name")
                    .with_context("format", &format.name))
            }
        };

        if let Some(registered) = self.formats.read().get(&format.name) {
            return conflict(registered);
        }

        format.validate()?;
        let registered = {
            let mut formats = self.formats.write();
            if let Some(registered) = formats.get(&format.name) {
                return conflict(registered);
            }
            let registered = Arc::new(format.clone());
            formats.insert(format.name.clone(), registered.clone());
            registered
        };
        tracing::info!("[vista]: Format {} registered: {registered:?}", registered.name);

        if registered.preload == Preload::All && registered.allow_disk_cache && self.storage.is_some() {
            let guard = self.pending.guard();
            let inner = self.clone();
            let format = registered.clone();
            self.spawner.spawn(async move {
                inner.preload(format).await;
                drop(guard);
            });
        }
        Ok(registered)
    }

    /// Make sure the disk tier knows the format and its capacity.
    async fn prepare_storage(&self, format: &Format) -> Result<()> {
        let Some(storage) = self.storage.as_ref() else {
            return Ok(());
        };
        if !format.allow_disk_cache {
            return Ok(());
        }
        // Capacity changes replace the registered format, so callers may hold a stale one.
        let capacity = self
            .formats
            .read()
            .get(&format.name)
            .map(|registered| registered.disk_capacity)
            .unwrap_or(format.disk_capacity);
        if storage.capacity(&format.name) == Some(capacity) {
            return Ok(());
        }
        storage.register(&format.name, capacity).await
    }

    /// Drive an in-flight request to completion and notify its waiters.
    async fn drive(
        self: Arc<Self>,
        key: CacheKey,
        id: u64,
        format: Arc<Format>,
        fetcher: Arc<dyn Fetcher>,
        mut cancelled: oneshot::Receiver<()>,
        _guard: PendingGuard,
    ) {
        // A canceled request still completes, its result is discarded as stale.
        let res = self.resolve(&key, &format, fetcher.as_ref(), &mut cancelled).await;

        let notifiers = {
            let mut inflights = self.inflights.lock();
            let Some(notifiers) = inflights.take(&key, id) else {
                Statistics::incr(&self.statistics.stale_completions);
                let e = Error::new(ErrorKind::StaleCompletion, "discard completion")
                    .with_context("key", key.key())
                    .with_context("format", key.format())
                    .with_context("generation", id);
                tracing::debug!("[vista]: {e}");
                return;
            };
            if let Ok((image, _)) = res.as_ref() {
                self.memory.insert(key.clone(), image.clone());
            }
            notifiers
        };

        let delivered = match res.as_ref() {
            Ok((image, _)) => Ok(image.clone()),
            Err(e) => {
                Statistics::incr(&self.statistics.failures);
                tracing::debug!("[vista]: Request of {key} failed: {e}");
                Err(e.clone())
            }
        };
        for notifier in notifiers {
            let _ = notifier.send(delivered.clone());
        }

        if let Ok((image, Origin::Fetch)) = res {
            self.persist(&key, &format, image).await;
        }
    }

    /// Load from disk, or fetch and transform.
    ///
    /// The remaining stages are skipped once the request is canceled.
    async fn resolve(
        &self,
        key: &CacheKey,
        format: &Arc<Format>,
        fetcher: &dyn Fetcher,
        cancelled: &mut oneshot::Receiver<()>,
    ) -> Result<(Image, Origin)> {
        if let Some(image) = self.load(key, format, true).await {
            Statistics::incr(&self.statistics.disk_hits);
            tracing::trace!("[vista]: Disk hit {key}.");
            return Ok((image, Origin::Disk));
        }
        check_cancelled(key, cancelled)?;
        Statistics::incr(&self.statistics.misses);
        Statistics::incr(&self.statistics.fetches);

        let source = fetcher.fetch().await.map_err(|e| {
            let e = if e.kind().is_user_visible() {
                e
            } else {
                Error::fetch_failed("fetcher failed").with_source(e)
            };
            e.with_context("key", key.key()).with_context("format", key.format())
        })?;
        check_cancelled(key, cancelled)?;

        let transformer = self.transformer.clone();
        let f = format.clone();
        let image = self
            .spawner
            .asyncify(move || transformer.transform(source, &f))
            .await
            .map_err(|e| {
                let e = if e.kind() == ErrorKind::TransformFailed {
                    e
                } else {
                    Error::transform_failed("transformer failed").with_source(e)
                };
                e.with_context("key", key.key()).with_context("format", key.format())
            })?;
        Ok((image, Origin::Fetch))
    }

    /// Load and decode an image from disk. Every failure is a miss.
    ///
    /// `promote` marks the entry as the most recently used one on disk.
    async fn load(&self, key: &CacheKey, format: &Arc<Format>, promote: bool) -> Option<Image> {
        let storage = self.storage.as_ref()?;
        if !format.allow_disk_cache {
            return None;
        }
        if let Err(e) = self.prepare_storage(format).await {
            tracing::warn!("[vista]: Disk tier unavailable for format {}: {e}", format.name);
            return None;
        }
        let loaded = if promote {
            storage.load(key.key(), key.format()).await
        } else {
            storage.peek(key.key(), key.format()).await
        };
        let data = match loaded {
            Ok(data) => data?,
            Err(e) => {
                tracing::warn!("[vista]: Load {key} from disk failed: {e}");
                return None;
            }
        };

        let codec = self.codec.clone();
        let f = format.clone();
        match self.spawner.asyncify(move || codec.decode(&data, &f)).await {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!("[vista]: Drop undecodable disk entry {key}: {e}");
                if let Err(e) = storage.remove(key.key(), key.format()).await {
                    tracing::warn!("[vista]: Remove disk entry {key} failed: {e}");
                }
                None
            }
        }
    }

    /// Encode an image and hand it to the disk tier. Failures are logged and dropped.
    async fn persist(&self, key: &CacheKey, format: &Arc<Format>, image: Image) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        if !format.allow_disk_cache {
            return;
        }
        if let Err(e) = self.prepare_storage(format).await {
            tracing::warn!("[vista]: Disk tier unavailable for format {}: {e}", format.name);
            return;
        }
        let codec = self.codec.clone();
        let f = format.clone();
        match self.spawner.asyncify(move || codec.encode(&image, &f)).await {
            Ok(data) => storage.insert(key.key(), key.format(), data),
            Err(e) => tracing::warn!("[vista]: Skip persisting {key}: {e}"),
        }
    }

    fn persist_in_background(self: &Arc<Self>, key: CacheKey, format: Arc<Format>, image: Image) {
        if self.storage.is_none() || !format.allow_disk_cache {
            return;
        }
        let guard = self.pending.guard();
        let inner = self.clone();
        self.spawner.spawn(async move {
            inner.persist(&key, &format, image).await;
            drop(guard);
        });
    }

    /// Load the disk entries of a format into memory, most recently used first, while memory has room.
    ///
    /// Entries are inserted least recently used first so that the memory order follows the disk order.
    async fn preload(&self, format: Arc<Format>) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        if let Err(e) = self.prepare_storage(&format).await {
            tracing::warn!("[vista]: Skip preloading format {}: {e}", format.name);
            return;
        }

        let mut room = self.memory.capacity().saturating_sub(self.memory.usage());
        let mut images = vec![];
        for key in storage.keys(&format.name) {
            let cache_key = CacheKey::new(Key::from(key), format.name.as_str());
            if self.memory.contains(&cache_key) {
                continue;
            }
            let Some(image) = self.load(&cache_key, &format, false).await else {
                continue;
            };
            if image.weight() > room {
                break;
            }
            room -= image.weight();
            images.push((cache_key, image));
        }

        let mut loaded = 0;
        for (cache_key, image) in images.into_iter().rev() {
            let _inflights = self.inflights.lock();
            if !self.memory.contains(&cache_key) {
                self.memory.insert(cache_key, image);
                loaded += 1;
            }
        }
        tracing::info!("[vista]: Preloaded {loaded} images of format {}.", format.name);
    }
}
