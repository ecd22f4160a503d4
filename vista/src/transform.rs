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

use image::{imageops::FilterType, DynamicImage};
use vista_common::error::{Error, ErrorKind, Result};

use crate::{
    artifact::Image,
    fetcher::Source,
    format::{Format, ScaleMode, Size},
};

/// Turns fetched data into the image served for a format.
///
/// Called once per successful fetch, off the async workers. A failure is delivered to every
/// caller waiting on the fetch and nothing is cached.
pub trait Transformer: Send + Sync + 'static {
    /// Render `source` in `format`.
    fn transform(&self, source: Source, format: &Format) -> Result<Image>;
}

/// Default [`Transformer`]: decodes encoded data, runs the format hooks and resizes per the
/// format's [`ScaleMode`].
#[derive(Debug, Clone)]
pub struct ResizeTransformer {
    filter: FilterType,
}

impl Default for ResizeTransformer {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ResizeTransformer {
    /// Set the resampling filter.
    ///
    /// Default: [`FilterType::Lanczos3`].
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    fn resize(&self, image: DynamicImage, format: &Format) -> DynamicImage {
        let Some(target) = format.size else {
            return image;
        };
        let original = (image.width(), image.height());
        let (width, height) = scaled_size(original, target, format.scale_mode);
        if (width, height) == original {
            return image;
        }
        if !format.allow_upscaling && (width > original.0 || height > original.1) {
            return image;
        }
        image.resize_exact(width, height, self.filter)
    }
}

impl Transformer for ResizeTransformer {
    fn transform(&self, source: Source, format: &Format) -> Result<Image> {
        let image = match source {
            Source::Image(image) => image.into_dynamic(),
            Source::Encoded(data) => image::load_from_memory(&data)
                .map_err(|e| Error::transform_failed("cannot decode fetched data").with_source(e))?,
        };

        let image = match format.pre_resize.as_ref() {
            Some(hook) => hook(image),
            None => image,
        };
        let image = self.resize(image, format);
        let image = match format.post_resize.as_ref() {
            Some(hook) => hook(image),
            None => image,
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(Error::new(ErrorKind::TransformFailed, "image is empty"));
        }
        Ok(Image::new(image))
    }
}

/// Size of an image of `original` size fitted into `target` with `mode`.
pub fn scaled_size(original: (u32, u32), target: Size, mode: ScaleMode) -> (u32, u32) {
    let (width, height) = original;
    if width == 0 || height == 0 {
        return original;
    }
    let ratio_w = target.width as f64 / width as f64;
    let ratio_h = target.height as f64 / height as f64;
    let scale = match mode {
        ScaleMode::Fill => return (target.width, target.height),
        ScaleMode::None => return original,
        ScaleMode::AspectFit => ratio_w.min(ratio_h),
        ScaleMode::AspectFill => ratio_w.max(ratio_h),
    };
    let apply = |v: u32| ((v as f64 * scale).round() as u32).max(1);
    (apply(width), apply(height))
}
