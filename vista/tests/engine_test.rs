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
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::future::join_all;
use itertools::Itertools;
use parking_lot::Mutex;
use vista::{
    image::{DynamicImage, Rgb, RgbImage},
    CacheKey, Codec, Error, ErrorKind, Event, EventListener, Fetcher, FnFetcher, Format, Image, ImageCache,
    ImageCacheBuilder, ImageCodec, ImmediateFetcher, Preload, RequestState, Source,
};

const KB: usize = 1024;
const MB: usize = 1024 * 1024;
const NO_DELAY: Duration = Duration::ZERO;
const SLOW: Duration = Duration::from_millis(100);

fn thumb() -> Format {
    Format::new("thumb").with_size(100, 100).with_disk_capacity(MB)
}

fn picture(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

async fn memory_cache(capacity: usize) -> ImageCache {
    ImageCacheBuilder::new().memory(capacity).storage().build().await.unwrap()
}

async fn hybrid_cache(dir: &Path) -> ImageCache {
    hybrid_cache_with_memory(dir, 64 * MB).await
}

async fn hybrid_cache_with_memory(dir: &Path, capacity: usize) -> ImageCache {
    ImageCacheBuilder::new()
        .with_name("test")
        .memory(capacity)
        .storage()
        .with_directory(dir)
        .build()
        .await
        .unwrap()
}

#[derive(Debug, Default, Clone)]
struct Tracker {
    fetches: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
}

impl Tracker {
    fn fetcher(&self, key: &str, delay: Duration) -> impl Fetcher {
        let fetches = self.fetches.clone();
        let cancels = self.cancels.clone();
        FnFetcher::new(key, move || {
            fetches.fetch_add(1, Ordering::Relaxed);
            async move {
                tokio::time::sleep(delay).await;
                Ok(Source::Image(Image::new(picture(500, 500))))
            }
        })
        .with_cancel(move || {
            cancels.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn failing(&self, key: &str, delay: Duration) -> impl Fetcher {
        let fetches = self.fetches.clone();
        FnFetcher::new(key, move || {
            fetches.fetch_add(1, Ordering::Relaxed);
            async move {
                tokio::time::sleep(delay).await;
                Err(Error::fetch_failed("host unreachable"))
            }
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn cancels(&self) -> usize {
        self.cancels.load(Ordering::Relaxed)
    }
}

#[test_log::test(tokio::test)]
async fn test_memory_hit_never_fetches() {
    let cache = memory_cache(64 * MB).await;
    let tracker = Tracker::default();

    let request = cache.get("photo1", &thumb(), tracker.fetcher("photo1", NO_DELAY));
    assert_eq!(request.state(), RequestState::Miss);
    let image = request.await.unwrap();
    assert_eq!((image.width(), image.height()), (100, 100));

    let request = cache.get("photo1", &thumb(), tracker.fetcher("photo1", NO_DELAY));
    assert_eq!(request.state(), RequestState::Hit);
    assert!(request.is_ready());
    assert!(request.await.unwrap().ptr_eq(&image));

    assert_eq!(tracker.fetches(), 1);
    let statistics = cache.statistics();
    assert_eq!(statistics.fetches, 1);
    assert_eq!(statistics.memory_hits, 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_gets_share_one_fetch() {
    let cache = memory_cache(64 * MB).await;
    let tracker = Tracker::default();

    let requests = (0..16)
        .map(|_| cache.get("photo1", &thumb(), tracker.fetcher("photo1", SLOW)))
        .collect_vec();
    assert_eq!(requests[0].state(), RequestState::Miss);
    assert!(requests[1..].iter().all(|r| r.state() == RequestState::Wait));

    let images = join_all(requests)
        .await
        .into_iter()
        .map(|res| res.unwrap())
        .collect_vec();
    assert!(images.iter().all(|image| image.ptr_eq(&images[0])));
    assert_eq!(tracker.fetches(), 1);
    assert_eq!(cache.statistics().coalesced, 15);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_cancel_one_waiter_keeps_the_others() {
    let cache = memory_cache(64 * MB).await;
    let tracker = Tracker::default();

    let mut requests = (0..3)
        .map(|_| cache.get("photo1", &thumb(), tracker.fetcher("photo1", SLOW)))
        .collect_vec();
    requests.remove(0).cancel();

    for res in join_all(requests).await {
        assert_eq!(res.unwrap().width(), 100);
    }
    assert_eq!(tracker.fetches(), 1);
    assert_eq!(tracker.cancels(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_last_waiter_cancel_reaches_the_fetcher() {
    let cache = memory_cache(64 * MB).await;
    let tracker = Tracker::default();

    let requests = (0..2)
        .map(|_| cache.get("photo1", &thumb(), tracker.fetcher("photo1", SLOW)))
        .collect_vec();
    for request in requests {
        request.cancel();
    }
    assert_eq!(tracker.cancels(), 1);

    cache.wait().await;
    assert!(!cache.memory().contains(&CacheKey::new("photo1".into(), "thumb")));
    assert_eq!(cache.statistics().stale_completions, 1);

    let request = cache.get("photo1", &thumb(), tracker.fetcher("photo1", NO_DELAY));
    assert_eq!(request.state(), RequestState::Miss);
    assert_eq!(request.await.unwrap().width(), 100);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_cancel_aborts_every_waiter() {
    let cache = memory_cache(64 * MB).await;
    let tracker = Tracker::default();

    let requests = (0..3)
        .map(|_| cache.get("photo1", &thumb(), tracker.fetcher("photo1", SLOW)))
        .collect_vec();
    assert!(cache.cancel("photo1", "thumb"));
    assert!(!cache.cancel("photo1", "thumb"));

    for res in join_all(requests).await {
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Cancelled);
    }
    assert_eq!(tracker.cancels(), 1);

    cache.wait().await;
    assert!(cache.memory().is_empty());
}

/// A fetcher that ignores cancellation and delivers a `side`x`side` original after `delay`.
fn stubborn_fetcher(key: &str, side: u32, delay: Duration, fetches: &Arc<AtomicUsize>) -> impl Fetcher {
    let fetches = fetches.clone();
    FnFetcher::new(key, move || {
        fetches.fetch_add(1, Ordering::Relaxed);
        async move {
            tokio::time::sleep(delay).await;
            Ok(Source::Image(Image::new(picture(side, side))))
        }
    })
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_late_completion_of_canceled_request_is_discarded() {
    let cache = memory_cache(64 * MB).await;
    // Images keep their size in this format, which tells the generations apart.
    let original = Format::new("original");
    let key = CacheKey::new("photo1".into(), "original");
    let fetches = Arc::new(AtomicUsize::new(0));

    let old = cache.get("photo1", &original, stubborn_fetcher("photo1", 300, SLOW, &fetches));
    assert_eq!(old.state(), RequestState::Miss);
    // Let the old fetch start before canceling it.
    tokio::time::sleep(SLOW / 4).await;
    assert!(cache.cancel("photo1", "original"));
    assert_eq!(old.await.unwrap_err().kind(), ErrorKind::Cancelled);

    // The new generation is still in flight when the old fetch completes.
    let new = cache.get("photo1", &original, stubborn_fetcher("photo1", 200, 3 * SLOW, &fetches));
    assert_eq!(new.state(), RequestState::Miss);
    tokio::time::sleep(2 * SLOW).await;
    assert!(!cache.memory().contains(&key));
    assert_eq!(cache.statistics().stale_completions, 1);

    let joined = cache.get("photo1", &original, stubborn_fetcher("photo1", 100, NO_DELAY, &fetches));
    assert_eq!(joined.state(), RequestState::Wait);

    for res in join_all([new, joined]).await {
        assert_eq!(res.unwrap().width(), 200);
    }
    cache.wait().await;

    assert_eq!(cache.memory().get(&key).unwrap().width(), 200);
    assert_eq!(fetches.load(Ordering::Relaxed), 2);
    let statistics = cache.statistics();
    assert_eq!(statistics.stale_completions, 1);
    assert_eq!(statistics.failures, 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_failure_reaches_every_waiter() {
    let cache = memory_cache(64 * MB).await;
    let tracker = Tracker::default();

    let requests = (0..4)
        .map(|_| cache.get("photo1", &thumb(), tracker.failing("photo1", SLOW)))
        .collect_vec();
    for res in join_all(requests).await {
        let e = res.unwrap_err();
        assert_eq!(e.kind(), ErrorKind::FetchFailed);
        assert_eq!(e.message(), "host unreachable");
    }
    assert_eq!(tracker.fetches(), 1);
    assert_eq!(cache.statistics().failures, 1);
    assert!(cache.memory().is_empty());

    // Nothing is cached, the next request fetches again.
    let request = cache.get("photo1", &thumb(), tracker.fetcher("photo1", NO_DELAY));
    assert_eq!(request.state(), RequestState::Miss);
    assert!(request.await.is_ok());
    assert_eq!(tracker.fetches(), 2);
}

#[test_log::test(tokio::test)]
async fn test_transform_failure() {
    let cache = memory_cache(64 * MB).await;
    let fetcher = FnFetcher::new("broken", || async { Ok(Source::Encoded(Bytes::from_static(b"not an image"))) });

    let e = cache.fetch(&thumb(), fetcher).await.unwrap_err();
    assert_eq!(e.kind(), ErrorKind::TransformFailed);
    assert!(cache.memory().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_thumb_scenario_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = Tracker::default();

    let cache = hybrid_cache(dir.path()).await;
    let fetcher = ImmediateFetcher::new("photo1", picture(500, 500));
    let image = cache.get("photo1", &thumb(), fetcher).await.unwrap();
    assert_eq!((image.width(), image.height()), (100, 100));

    // A cached image is served even if the fetcher would fail.
    let cached = cache
        .get("photo1", &thumb(), tracker.failing("photo1", NO_DELAY))
        .await
        .unwrap();
    assert!(cached.ptr_eq(&image));
    assert_eq!(tracker.fetches(), 0);

    cache.wait().await;
    let storage = cache.storage().unwrap();
    assert_eq!(storage.keys("thumb"), vec!["photo1"]);
    assert!(storage.usage("thumb") <= MB);
    drop(cache);

    let cache = hybrid_cache(dir.path()).await;
    let request = cache.get("photo1", &thumb(), tracker.failing("photo1", NO_DELAY));
    assert_eq!(request.state(), RequestState::Miss);
    let restored = request.await.unwrap();
    assert_eq!((restored.width(), restored.height()), (100, 100));
    assert_eq!(tracker.fetches(), 0);

    let statistics = cache.statistics();
    assert_eq!(statistics.disk_hits, 1);
    assert_eq!(statistics.fetches, 0);
}

#[test_log::test(tokio::test)]
async fn test_corrupted_disk_entry_is_fetched_again() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = Tracker::default();
    let cache = hybrid_cache(dir.path()).await;

    cache.get("photo1", &thumb(), tracker.fetcher("photo1", NO_DELAY)).await.unwrap();
    cache.wait().await;

    let entry = fs::read_dir(dir.path().join("thumb"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .exactly_one()
        .unwrap();
    let mut data = fs::read(&entry).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xff;
    fs::write(&entry, data).unwrap();

    cache.memory().clear();
    let image = cache.get("photo1", &thumb(), tracker.fetcher("photo1", NO_DELAY)).await.unwrap();
    assert_eq!(image.width(), 100);
    assert_eq!(tracker.fetches(), 2);
}

#[test_log::test(tokio::test)]
async fn test_format_registration() {
    let cache = memory_cache(64 * MB).await;
    let registered = cache.register_format(thumb()).await.unwrap();
    assert_eq!(cache.format("thumb").unwrap().size, registered.size);

    let conflicting = thumb().with_size(50, 50);
    let request = cache.get("a", &conflicting, ImmediateFetcher::new("a", picture(10, 10)));
    assert_eq!(request.await.unwrap_err().kind(), ErrorKind::Config);

    // The disk capacity is not part of the rendering.
    let resized = thumb().with_disk_capacity(KB);
    assert!(cache
        .get("a", &resized, ImmediateFetcher::new("a", picture(10, 10)))
        .await
        .is_ok());

    let invalid = Format::new("../escape");
    assert_eq!(
        cache.register_format(invalid).await.unwrap_err().kind(),
        ErrorKind::Config
    );
    assert_eq!(cache.formats().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_lookup_insert_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let cache = hybrid_cache(dir.path()).await;
    let large = Format::new("large").with_size(400, 400);
    cache.register_format(thumb()).await.unwrap();
    cache.register_format(large).await.unwrap();

    assert_eq!(
        cache.insert("a", "unknown", picture(1, 1)).unwrap_err().kind(),
        ErrorKind::Config
    );
    cache.insert("a", "thumb", picture(100, 100)).unwrap();
    cache.insert("a", "large", picture(400, 400)).unwrap();
    cache.wait().await;

    assert!(cache.lookup("a", "thumb").await.unwrap().is_some());
    assert!(cache.lookup("b", "thumb").await.unwrap().is_none());
    assert!(cache.lookup("a", "unknown").await.unwrap().is_none());

    cache.memory().clear();
    let image = cache.lookup("a", "thumb").await.unwrap().unwrap();
    assert_eq!(image.width(), 100);
    assert!(cache.memory().contains(&CacheKey::new("a".into(), "thumb")));
    assert_eq!(cache.statistics().disk_hits, 1);

    cache.remove("a", "thumb").await.unwrap();
    assert!(cache.lookup("a", "thumb").await.unwrap().is_none());
    assert!(cache.lookup("a", "large").await.unwrap().is_some());

    cache.remove_all("a").await.unwrap();
    assert!(cache.lookup("a", "large").await.unwrap().is_none());

    cache.insert("b", "thumb", picture(100, 100)).unwrap();
    cache.wait().await;
    cache.clear().await.unwrap();
    assert!(cache.lookup("b", "thumb").await.unwrap().is_none());
}

/// Decodes like [`ImageCodec`], but meets the test at `gate` before and after decoding.
struct GatedCodec {
    gate: Arc<Barrier>,
}

impl Codec for GatedCodec {
    fn encode(&self, image: &Image, format: &Format) -> vista::Result<Bytes> {
        ImageCodec.encode(image, format)
    }

    fn decode(&self, data: &[u8], format: &Format) -> vista::Result<Image> {
        self.gate.wait();
        let image = ImageCodec.decode(data, format);
        self.gate.wait();
        image
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_lookup_keeps_newer_memory_image() {
    let dir = tempfile::tempdir().unwrap();
    let gate = Arc::new(Barrier::new(2));
    let cache = ImageCacheBuilder::new()
        .memory(64 * MB)
        .storage()
        .with_directory(dir.path())
        .with_codec(GatedCodec { gate: gate.clone() })
        .build()
        .await
        .unwrap();
    cache.register_format(thumb()).await.unwrap();
    let key = CacheKey::new("a".into(), "thumb");

    cache.insert("a", "thumb", picture(100, 100)).unwrap();
    cache.wait().await;
    cache.memory().clear();

    let lookup = tokio::spawn({
        let cache = cache.clone();
        async move { cache.lookup("a", "thumb").await }
    });

    // The lookup is decoding the disk entry while a newer image is inserted.
    let g = gate.clone();
    tokio::task::spawn_blocking(move || g.wait()).await.unwrap();
    let newer = Image::new(picture(100, 100));
    cache.insert("a", "thumb", newer.clone()).unwrap();
    let g = gate.clone();
    tokio::task::spawn_blocking(move || g.wait()).await.unwrap();

    let found = lookup.await.unwrap().unwrap().unwrap();
    assert!(found.ptr_eq(&newer));
    assert!(cache.memory().get(&key).unwrap().ptr_eq(&newer));
    cache.wait().await;
}

#[derive(Default)]
struct Evictions(Mutex<Vec<String>>);

impl EventListener for Evictions {
    type Key = CacheKey;
    type Value = Image;

    fn on_leave(&self, reason: Event, key: &CacheKey, _: &Image) {
        if reason == Event::Evict {
            self.0.lock().push(key.key().to_string());
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_memory_usage_stays_under_capacity() {
    // 100x100 RGB images weigh 30000 bytes, room for 3.
    let capacity = 3 * 30_000;
    let evictions = Arc::new(Evictions::default());
    let cache = ImageCacheBuilder::new()
        .with_event_listener(evictions.clone())
        .memory(capacity)
        .storage()
        .build()
        .await
        .unwrap();

    for i in 0..5 {
        let key = format!("photo{i}");
        let fetcher = ImmediateFetcher::new(key.as_str(), picture(500, 500));
        cache.get(key.as_str(), &thumb(), fetcher).await.unwrap();
        assert!(cache.memory().usage() <= capacity);
    }

    assert_eq!(cache.memory().len(), 3);
    assert_eq!(evictions.0.lock().clone(), vec!["photo0", "photo1"]);
}

#[test_log::test(tokio::test)]
async fn test_set_capacity_trims_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = hybrid_cache(dir.path()).await;
    let tracker = Tracker::default();

    for i in 0..4 {
        let key = format!("photo{i}");
        cache.get(key.as_str(), &thumb(), tracker.fetcher(&key, NO_DELAY)).await.unwrap();
    }
    cache.wait().await;
    let storage = cache.storage().unwrap();
    assert_eq!(storage.len("thumb"), 4);

    cache.set_capacity("thumb", 0).unwrap();
    cache.wait().await;
    assert_eq!(storage.usage("thumb"), 0);
    assert_eq!(cache.format("thumb").unwrap().disk_capacity, 0);
    assert!(cache.set_capacity("unknown", 0).is_err());
}

#[test_log::test(tokio::test)]
async fn test_format_without_disk_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = hybrid_cache(dir.path()).await;
    let format = thumb().with_allow_disk_cache(false);

    cache.fetch(&format, ImmediateFetcher::new("photo1", picture(500, 500))).await.unwrap();
    cache.wait().await;
    assert!(cache.storage().unwrap().keys("thumb").is_empty());
}

#[test_log::test(tokio::test)]
async fn test_preload_all() {
    let dir = tempfile::tempdir().unwrap();
    let format = thumb().with_preload(Preload::All);
    let keys = ["photo0", "photo1", "photo2", "photo3"];

    let cache = hybrid_cache(dir.path()).await;
    for key in keys {
        cache.fetch(&format, ImmediateFetcher::new(key, picture(500, 500))).await.unwrap();
        cache.wait().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(cache);

    let cache = hybrid_cache(dir.path()).await;
    cache.register_format(format.clone()).await.unwrap();
    cache.wait().await;
    assert_eq!(cache.memory().len(), 4);

    let tracker = Tracker::default();
    let request = cache.get("photo2", &format, tracker.failing("photo2", NO_DELAY));
    assert_eq!(request.state(), RequestState::Hit);
    drop(request);
    drop(cache);

    // 100x100 RGB images weigh 30000 bytes, room for 2 of the 4.
    let cache = hybrid_cache_with_memory(dir.path(), 75_000).await;
    cache.register_format(format.clone()).await.unwrap();
    cache.wait().await;

    // Preloading leaves the disk order untouched.
    let storage = cache.storage().unwrap();
    assert_eq!(storage.keys("thumb"), vec!["photo3", "photo2", "photo1", "photo0"]);

    let cached = |key: &str| cache.memory().contains(&CacheKey::new(key.into(), "thumb"));
    assert_eq!(cache.memory().len(), 2);
    assert!(cached("photo3"));
    assert!(cached("photo2"));
    assert!(!cached("photo1"));
    assert!(!cached("photo0"));

    // The memory order follows the disk order, the next insertion evicts photo2.
    cache.insert("extra", "thumb", picture(100, 100)).unwrap();
    assert!(cached("photo3"));
    assert!(!cached("photo2"));
    assert!(cached("extra"));
    cache.wait().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
async fn test_get_from_a_thread_without_runtime() {
    let cache = memory_cache(64 * MB).await;

    let image = tokio::task::spawn_blocking(move || {
        std::thread::spawn(move || {
            let fetcher = ImmediateFetcher::new("photo1", picture(500, 500));
            futures::executor::block_on(cache.get("photo1", &thumb(), fetcher))
        })
        .join()
        .unwrap()
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(image.width(), 100);
}
