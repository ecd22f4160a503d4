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
    future::Future,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use futures::{
    future::{ready, BoxFuture},
    FutureExt,
};
use vista_common::{
    error::{Error, ErrorKind, Result},
    spawn::Spawner,
};

use crate::{artifact::Image, key::Key};

/// Data produced by a [`Fetcher`].
#[derive(Debug, Clone)]
pub enum Source {
    /// An already decoded image.
    Image(Image),
    /// Encoded image data, decoded by the transformer.
    Encoded(Bytes),
}

/// Asynchronous source of the image of a key.
///
/// A fetch resolves exactly once, either with the data or with an error. The cache calls
/// [`Fetcher::fetch`] at most once per fetcher and never has two fetches of a key and format in
/// flight at the same time.
///
/// [`Fetcher::cancel`] is advisory: once called, the cache no longer polls the pending fetch and
/// ignores its result. Fetchers that hold external resources release them there.
pub trait Fetcher: Send + Sync + 'static {
    /// Key of the image the fetcher produces.
    fn key(&self) -> &Key;

    /// Start fetching.
    fn fetch(&self) -> BoxFuture<'static, Result<Source>>;

    /// Cancel the pending fetch. A no-op for completed fetches.
    fn cancel(&self) {}
}

impl<F> Fetcher for Arc<F>
where
    F: Fetcher + ?Sized,
{
    fn key(&self) -> &Key {
        F::key(self)
    }

    fn fetch(&self) -> BoxFuture<'static, Result<Source>> {
        F::fetch(self)
    }

    fn cancel(&self) {
        F::cancel(self)
    }
}

/// Fetcher of an image that is already available.
#[derive(Debug, Clone)]
pub struct ImmediateFetcher {
    key: Key,
    image: Image,
}

impl ImmediateFetcher {
    /// Create a fetcher that hands out `image` for `key`.
    pub fn new(key: impl Into<Key>, image: impl Into<Image>) -> Self {
        Self {
            key: key.into(),
            image: image.into(),
        }
    }
}

impl Fetcher for ImmediateFetcher {
    fn key(&self) -> &Key {
        &self.key
    }

    fn fetch(&self) -> BoxFuture<'static, Result<Source>> {
        ready(Ok(Source::Image(self.image.clone()))).boxed()
    }
}

/// Fetcher that reads encoded image data from a file.
#[derive(Debug)]
pub struct DiskFetcher {
    key: Key,
    path: PathBuf,
    cancelled: Arc<AtomicBool>,
}

impl DiskFetcher {
    /// Create a fetcher of the file at `path`, keyed by the path itself.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self::with_key(path.to_string_lossy().as_ref(), &path)
    }

    /// Create a fetcher of the file at `path` with an explicit key.
    pub fn with_key(key: impl Into<Key>, path: impl AsRef<Path>) -> Self {
        Self {
            key: key.into(),
            path: path.as_ref().to_path_buf(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Fetcher for DiskFetcher {
    fn key(&self) -> &Key {
        &self.key
    }

    fn fetch(&self) -> BoxFuture<'static, Result<Source>> {
        self.cancelled.store(false, Ordering::Release);
        let path = self.path.clone();
        let cancelled = self.cancelled.clone();
        async move {
            let spawner = Spawner::current();
            let read = {
                let path = path.clone();
                spawner.asyncify(move || std::fs::read(&path).map_err(Error::from)).await
            };
            if cancelled.load(Ordering::Acquire) {
                return Err(Error::cancelled().with_context("path", path.display()));
            }
            let data = read.map_err(|e| {
                let message = match e.downcast_ref::<std::io::Error>().map(|e| e.kind()) {
                    Some(std::io::ErrorKind::NotFound) => "image file not found",
                    _ => "cannot read image file",
                };
                Error::new(ErrorKind::FetchFailed, message)
                    .with_context("path", path.display())
                    .with_source(e)
            })?;
            Ok(Source::Encoded(Bytes::from(data)))
        }
        .boxed()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Fetcher backed by a closure, the adapter for network and other custom sources.
///
/// ```rust
/// # use vista::{FnFetcher, Source};
/// let fetcher = FnFetcher::new("https://example.com/a.png", || async {
///     let body = bytes::Bytes::from_static(b"...");
///     Ok(Source::Encoded(body))
/// });
/// ```
pub struct FnFetcher<F> {
    key: Key,
    f: F,
    on_cancel: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<F> Debug for FnFetcher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFetcher").field("key", &self.key).finish()
    }
}

impl<F, FU> FnFetcher<F>
where
    F: Fn() -> FU + Send + Sync + 'static,
    FU: Future<Output = Result<Source>> + Send + 'static,
{
    /// Create a fetcher that calls `f` to fetch.
    pub fn new(key: impl Into<Key>, f: F) -> Self {
        Self {
            key: key.into(),
            f,
            on_cancel: None,
        }
    }

    /// Set a callback invoked when the fetch is canceled.
    pub fn with_cancel(mut self, on_cancel: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(on_cancel));
        self
    }
}

impl<F, FU> Fetcher for FnFetcher<F>
where
    F: Fn() -> FU + Send + Sync + 'static,
    FU: Future<Output = Result<Source>> + Send + 'static,
{
    fn key(&self) -> &Key {
        &self.key
    }

    fn fetch(&self) -> BoxFuture<'static, Result<Source>> {
        (self.f)().boxed()
    }

    fn cancel(&self) {
        if let Some(on_cancel) = self.on_cancel.as_ref() {
            on_cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use image::DynamicImage;

    use super::*;

    #[tokio::test]
    async fn test_immediate_fetcher() {
        let fetcher = ImmediateFetcher::new("a", DynamicImage::new_rgb8(4, 4));
        assert_eq!(fetcher.key().as_str(), "a");
        fetcher.cancel();
        match fetcher.fetch().await.unwrap() {
            Source::Image(image) => assert_eq!(image.width(), 4),
            Source::Encoded(_) => panic!("expect a decoded image"),
        }
    }

    #[tokio::test]
    async fn test_disk_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"encoded").unwrap();

        let fetcher = DiskFetcher::new(&path);
        assert_eq!(fetcher.key().as_str(), path.to_string_lossy());
        match fetcher.fetch().await.unwrap() {
            Source::Encoded(data) => assert_eq!(&data[..], b"encoded"),
            Source::Image(_) => panic!("expect encoded data"),
        }

        let missing = DiskFetcher::with_key("missing", dir.path().join("missing.bin"));
        let err = missing.fetch().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
        assert_eq!(err.message(), "image file not found");
        assert_eq!(err.context()[0].0, "path");
    }

    #[tokio::test]
    async fn test_disk_fetcher_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"encoded").unwrap();

        let fetcher = DiskFetcher::new(&path);
        let fetch = fetcher.fetch();
        fetcher.cancel();
        assert_eq!(fetch.await.unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
