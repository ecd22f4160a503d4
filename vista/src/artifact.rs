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

use std::{fmt::Debug, ops::Deref, sync::Arc};

use image::DynamicImage;

/// A decoded image in its final format, as served by the cache.
///
/// Cloning an image is cheap; clones share the same pixels.
#[derive(Clone)]
pub struct Image {
    inner: Arc<DynamicImage>,
}

impl Image {
    /// Wrap a decoded image.
    pub fn new(image: DynamicImage) -> Self {
        Self { inner: Arc::new(image) }
    }

    /// Estimated memory footprint in bytes.
    pub fn weight(&self) -> usize {
        self.inner.as_bytes().len()
    }

    /// The decoded pixels.
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.inner
    }

    /// Take the decoded pixels, cloning them if they are shared.
    pub fn into_dynamic(self) -> DynamicImage {
        Arc::unwrap_or_clone(self.inner)
    }

    /// Whether two images share the same pixels.
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for Image {
    type Target = DynamicImage;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl From<DynamicImage> for Image {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.width() == other.width()
                && self.height() == other.height()
                && self.color() == other.color()
                && self.as_bytes() == other.as_bytes())
    }
}

impl Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.color())
            .finish()
    }
}
