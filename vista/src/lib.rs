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

//! vista - a two-tier keyed image cache.
//!
//! Images are requested by key and [`Format`] (the size, scaling and compression policy of a
//! display slot). [`ImageCache`] serves them from memory, then from disk, and on a miss of both
//! fetches them with a pluggable [`Fetcher`], renders them in the format and stores them in both
//! tiers. Concurrent requests of the same image share one fetch.
//!
//! ```rust
//! use vista::image::DynamicImage;
//! use vista::{Format, ImageCacheBuilder, ImmediateFetcher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> vista::Result<()> {
//! let cache = ImageCacheBuilder::new().memory(16 * 1024 * 1024).storage().build().await?;
//! let thumb = Format::new("thumb").with_size(100, 100);
//!
//! let fetcher = ImmediateFetcher::new("photo-1", DynamicImage::new_rgb8(500, 500));
//! let image = cache.fetch(&thumb, fetcher).await?;
//! assert_eq!((image.width(), image.height()), (100, 100));
//! # Ok(())
//! # }
//! ```

mod artifact;
mod codec;
mod engine;
mod fetcher;
mod format;
mod key;
mod transform;

mod prelude;
pub use prelude::*;
