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
    fmt::Debug,
    fs::{self, File},
    io::{self, BufReader, Write},
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
    time::{Instant, SystemTime},
};

use bytes::Bytes;
use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use vista_common::{
    error::{Error, ErrorKind, Result},
    pending::Pending,
    spawn::Spawner,
    statistics::Statistics,
};

use crate::{
    entry::EntryHeader,
    index::FormatIndex,
    path::{entry_path, hash_key, parse_entry_name, validate_format_name, TEMP_PREFIX},
};

/// Builder of [`DiskStore`].
pub struct DiskStoreBuilder {
    dir: PathBuf,
    spawner: Option<Spawner>,
    statistics: Option<Arc<Statistics>>,
}

impl DiskStoreBuilder {
    /// Create a builder for a store rooted at `dir`. The directory is created if missing.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            spawner: None,
            statistics: None,
        }
    }

    /// Set the spawner used for blocking file operations.
    ///
    /// The default spawner is the one of the runtime that calls [`DiskStoreBuilder::open`].
    pub fn with_spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Share the statistics with the owner of the store.
    pub fn with_statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Open the store and rebuild the indexes of the entries already on disk.
    ///
    /// Formats found on disk are tracked with unlimited capacity until they are registered.
    pub async fn open(self) -> Result<DiskStore> {
        let spawner = self.spawner.unwrap_or_else(Spawner::current);
        let statistics = self.statistics.unwrap_or_default();

        let now = Instant::now();
        tracing::info!("[storage]: Start recovery of {:?}.", self.dir);
        let dir = self.dir.clone();
        let indexes = spawner.asyncify(move || recover(&dir)).await?;
        tracing::info!(
            "[storage]: Finish recovery in {:?}, {} entries of {} formats recovered.",
            now.elapsed(),
            indexes.values().map(|index| index.len()).sum::<usize>(),
            indexes.len()
        );

        Ok(DiskStore {
            inner: Arc::new(DiskStoreInner {
                dir: self.dir,
                indexes: Mutex::new(indexes),
                spawner,
                statistics,
                pending: Pending::default(),
            }),
        })
    }
}

struct DiskStoreInner {
    dir: PathBuf,
    /// Per-format indexes.
    ///
    /// File renames and deletions happen with the lock held, so the indexes and the files never
    /// disagree about which entry a path belongs to.
    indexes: Mutex<HashMap<String, FormatIndex>>,
    spawner: Spawner,
    statistics: Arc<Statistics>,
    pending: Pending,
}

/// Persistent `(key, format) -> bytes` store.
///
/// Every format owns a directory under the root and a byte capacity. Entries of a format are
/// evicted least recently accessed first once the format exceeds its capacity.
///
/// Writes go to a temporary file that is renamed over the entry path, so a crash never leaves a
/// partially written entry behind.
#[derive(Clone)]
pub struct DiskStore {
    inner: Arc<DiskStoreInner>,
}

impl Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore").field("dir", &self.inner.dir).finish()
    }
}

impl DiskStore {
    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Statistics shared by the store.
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.inner.statistics
    }

    /// Register a format with its capacity in bytes, creating its directory if needed.
    ///
    /// Registering a known format updates its capacity.
    pub async fn register(&self, format: &str, capacity: usize) -> Result<()> {
        validate_format_name(format)?;
        let dir = self.inner.dir.join(format);
        self.inner
            .spawner
            .asyncify(move || fs::create_dir_all(&dir).map_err(Error::storage))
            .await?;

        let over = {
            let mut indexes = self.inner.indexes.lock();
            let index = indexes
                .entry(format.to_string())
                .or_insert_with(|| FormatIndex::new(capacity));
            index.set_capacity(capacity);
            index.is_over_capacity()
        };
        tracing::debug!("[storage]: Format {format} registered with capacity {capacity}.");
        if over {
            self.schedule_evict(format);
        }
        Ok(())
    }

    /// Update the capacity of a registered format.
    ///
    /// Entries over the new capacity are evicted in the background.
    pub fn set_capacity(&self, format: &str, capacity: usize) -> Result<()> {
        let over = {
            let mut indexes = self.inner.indexes.lock();
            let index = indexes.get_mut(format).ok_or_else(|| unknown_format(format))?;
            index.set_capacity(capacity);
            index.is_over_capacity()
        };
        tracing::info!("[storage]: Capacity of format {format} is set to {capacity}.");
        if over {
            self.schedule_evict(format);
        }
        Ok(())
    }

    /// Persist an entry in the background.
    ///
    /// Failures are logged and otherwise dropped. Use [`DiskStore::wait`] to wait for the write to
    /// settle.
    pub fn insert(&self, key: &str, format: &str, payload: Bytes) {
        let guard = self.inner.pending.guard();
        let store = self.clone();
        let key = key.to_string();
        let format = format.to_string();
        self.inner.spawner.spawn(async move {
            if let Err(e) = store.write(&key, &format, payload).await {
                tracing::warn!("[storage]: Drop entry {key} of format {format}: {e}");
            }
            drop(guard);
        });
    }

    /// Persist an entry and wait for it to be durable.
    pub async fn write(&self, key: &str, format: &str, payload: Bytes) -> Result<()> {
        if !self.inner.indexes.lock().contains_key(format) {
            return Err(unknown_format(format));
        }

        let hash = hash_key(key);
        let buf = EntryHeader::serialize(key, &payload);
        let inner = self.inner.clone();
        let (k, f) = (key.to_string(), format.to_string());
        let over = self
            .inner
            .spawner
            .asyncify(move || {
                let mut file = tempfile::Builder::new()
                    .prefix(TEMP_PREFIX)
                    .tempfile_in(inner.dir.join(&f))
                    .map_err(Error::storage)?;
                file.write_all(&buf).map_err(Error::storage)?;
                file.as_file().sync_data().map_err(Error::storage)?;

                let path = entry_path(&inner.dir, &f, hash);
                let mut indexes = inner.indexes.lock();
                let index = indexes.get_mut(&f).ok_or_else(|| unknown_format(&f))?;
                file.persist(&path).map_err(|e| Error::storage(e.error))?;
                index.insert(hash, k, buf.len());
                Statistics::incr(&inner.statistics.disk_writes);
                Ok(index.is_over_capacity())
            })
            .await?;

        if over {
            self.schedule_evict(format);
        }
        Ok(())
    }

    /// Load the payload of an entry and mark it as the most recently used one of its format.
    ///
    /// Missing and corrupted entries are misses. A corrupted entry is removed.
    pub async fn load(&self, key: &str, format: &str) -> Result<Option<Bytes>> {
        self.read(key, format, true).await
    }

    /// Load the payload of an entry without changing the access order.
    pub async fn peek(&self, key: &str, format: &str) -> Result<Option<Bytes>> {
        self.read(key, format, false).await
    }

    async fn read(&self, key: &str, format: &str, promote: bool) -> Result<Option<Bytes>> {
        let hash = hash_key(key);
        let known = self
            .inner
            .indexes
            .lock()
            .get(format)
            .and_then(|index| index.get(hash))
            .is_some_and(|record| record.key == key);
        if !known {
            return Ok(None);
        }

        let path = entry_path(&self.inner.dir, format, hash);
        let loaded = self
            .inner
            .spawner
            .asyncify(move || match fs::read(&path) {
                Ok(buf) => {
                    let decoded = EntryHeader::deserialize(Bytes::from(buf));
                    if promote && decoded.is_ok() {
                        touch(&path);
                    }
                    Ok(Some(decoded))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::storage(e)),
            })
            .await?;

        match loaded {
            Some(Ok((header, payload))) if header.key == key => {
                if promote {
                    if let Some(index) = self.inner.indexes.lock().get_mut(format) {
                        index.touch(hash);
                    }
                }
                Ok(Some(payload))
            }
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => {
                tracing::warn!("[storage]: Entry {key} of format {format} is corrupted, remove it: {e}");
                self.remove(key, format).await?;
                Ok(None)
            }
            None => {
                tracing::warn!("[storage]: Entry {key} of format {format} disappeared from disk.");
                if let Some(index) = self.inner.indexes.lock().get_mut(format) {
                    index.remove(hash);
                }
                Ok(None)
            }
        }
    }

    /// Remove an entry. Returns `true` if the entry existed.
    pub async fn remove(&self, key: &str, format: &str) -> Result<bool> {
        let hash = hash_key(key);
        let inner = self.inner.clone();
        let (key, format) = (key.to_string(), format.to_string());
        self.inner
            .spawner
            .asyncify(move || {
                let mut indexes = inner.indexes.lock();
                let Some(index) = indexes.get_mut(&format) else {
                    return Ok(false);
                };
                if !index.get(hash).is_some_and(|record| record.key == key) {
                    return Ok(false);
                }
                index.remove(hash);
                remove_file(&entry_path(&inner.dir, &format, hash))?;
                Ok(true)
            })
            .await
    }

    /// Remove the entries of a key in every format.
    pub async fn remove_key(&self, key: &str) -> Result<()> {
        for format in self.formats() {
            self.remove(key, &format).await?;
        }
        Ok(())
    }

    /// Remove every entry of a format. The format stays registered.
    pub async fn clear_format(&self, format: &str) -> Result<()> {
        let inner = self.inner.clone();
        let format = format.to_string();
        self.inner
            .spawner
            .asyncify(move || {
                let mut indexes = inner.indexes.lock();
                let Some(index) = indexes.get_mut(&format) else {
                    return Ok(());
                };
                index.clear();
                for entry in fs::read_dir(inner.dir.join(&format)).map_err(Error::storage)? {
                    let path = entry.map_err(Error::storage)?.path();
                    let is_entry = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .and_then(parse_entry_name)
                        .is_some();
                    if is_entry {
                        remove_file(&path)?;
                    }
                }
                tracing::debug!("[storage]: Format {format} cleared.");
                Ok(())
            })
            .await
    }

    /// Remove every entry of every format.
    pub async fn clear(&self) -> Result<()> {
        for format in self.formats() {
            self.clear_format(&format).await?;
        }
        Ok(())
    }

    /// Keys of a format, from the most to the least recently accessed.
    pub fn keys(&self, format: &str) -> Vec<String> {
        self.inner
            .indexes
            .lock()
            .get(format)
            .map(|index| index.keys())
            .unwrap_or_default()
    }

    /// Bytes used by a format.
    pub fn usage(&self, format: &str) -> usize {
        self.inner.indexes.lock().get(format).map(|index| index.usage()).unwrap_or_default()
    }

    /// Capacity of a format, if known.
    pub fn capacity(&self, format: &str) -> Option<usize> {
        self.inner.indexes.lock().get(format).map(|index| index.capacity())
    }

    /// Entry count of a format.
    pub fn len(&self, format: &str) -> usize {
        self.inner.indexes.lock().get(format).map(|index| index.len()).unwrap_or_default()
    }

    /// Names of the known formats, sorted.
    pub fn formats(&self) -> Vec<String> {
        self.inner.indexes.lock().keys().cloned().sorted().collect()
    }

    /// Wait until every background write and eviction has settled.
    pub async fn wait(&self) {
        self.inner.pending.wait().await
    }

    fn schedule_evict(&self, format: &str) {
        let guard = self.inner.pending.guard();
        let inner = self.inner.clone();
        let format = format.to_string();
        self.inner.spawner.spawn_blocking(move || {
            if let Err(e) = evict(&inner, &format) {
                tracing::warn!("[storage]: Eviction of format {format} failed: {e}");
            }
            drop(guard);
        });
    }
}

fn unknown_format(format: &str) -> Error {
    Error::config("format not registered").with_context("format", format)
}

fn evict(inner: &DiskStoreInner, format: &str) -> Result<()> {
    let mut indexes = inner.indexes.lock();
    let Some(index) = indexes.get_mut(format) else {
        return Ok(());
    };
    let victims = index.evict();
    for (hash, _) in victims.iter() {
        remove_file(&entry_path(&inner.dir, format, *hash))?;
    }
    inner
        .statistics
        .disk_evictions
        .fetch_add(victims.len(), Ordering::Relaxed);
    tracing::debug!(
        "[storage]: {} entries of format {format} evicted, usage: {}, capacity: {}.",
        victims.len(),
        index.usage(),
        index.capacity()
    );
    Ok(())
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(Error::storage(e)),
        _ => Ok(()),
    }
}

/// Mirror the access to the modification time, so the access order survives restarts.
fn touch(path: &Path) {
    let res = File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::now()));
    if let Err(e) = res {
        tracing::trace!("[storage]: Cannot touch {path:?}: {e}");
    }
}

fn recover(dir: &Path) -> Result<HashMap<String, FormatIndex>> {
    fs::create_dir_all(dir).map_err(Error::storage)?;

    let mut indexes = HashMap::new();
    for entry in fs::read_dir(dir).map_err(Error::storage)? {
        let entry = entry.map_err(Error::storage)?;
        if !entry.file_type().map_err(Error::storage)?.is_dir() {
            continue;
        }
        let Some(format) = entry.file_name().to_str().map(|name| name.to_string()) else {
            continue;
        };
        if validate_format_name(&format).is_err() {
            continue;
        }
        let index = recover_format(&entry.path())?;
        tracing::debug!("[storage]: Format {format} recovered with {} entries.", index.len());
        indexes.insert(format, index);
    }
    Ok(indexes)
}

fn recover_format(dir: &Path) -> Result<FormatIndex> {
    let mut recovered = vec![];
    for entry in fs::read_dir(dir).map_err(Error::storage)? {
        let path = entry.map_err(Error::storage)?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with(TEMP_PREFIX) {
            remove_file(&path)?;
            continue;
        }
        let Some(hash) = parse_entry_name(name) else {
            continue;
        };
        match inspect(&path, hash) {
            Ok((key, size, modified)) => recovered.push((hash, key, size, modified)),
            Err(e) => {
                tracing::warn!("[storage]: Remove unreadable entry {path:?}: {e}");
                remove_file(&path)?;
            }
        }
    }

    recovered.sort_by_key(|(_, _, _, modified)| *modified);
    let mut index = FormatIndex::new(usize::MAX);
    for (hash, key, size, _) in recovered {
        index.insert(hash, key, size);
    }
    Ok(index)
}

/// Validate the header of an entry file without reading its payload.
fn inspect(path: &Path, hash: u64) -> Result<(String, usize, SystemTime)> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    let header = EntryHeader::read_from(&mut BufReader::new(file))?;

    if hash_key(&header.key) != hash {
        return Err(Error::new(ErrorKind::Codec, "entry key does not match its file name"));
    }
    let size = header.entry_len(metadata.len())?;
    Ok((header.key, size, metadata.modified()?))
}
