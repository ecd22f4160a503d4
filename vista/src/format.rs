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

use std::{fmt::Debug, sync::Arc};

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use vista_common::error::{Error, Result};

/// How an image is fitted into the size of a [`Format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Stretch to exactly the format size, ignoring the aspect ratio.
    #[default]
    Fill,
    /// Scale to fit inside the format size, keeping the aspect ratio.
    AspectFit,
    /// Scale to cover the format size, keeping the aspect ratio.
    AspectFill,
    /// Keep the original size.
    None,
}

/// Which disk entries of a format are loaded into memory when the format is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preload {
    /// Load nothing.
    #[default]
    None,
    /// Load entries, most recently used first, while the memory tier has room.
    All,
}

/// Target size of a [`Format`] in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Hook applied to an image around the resize step.
pub type ResizeHook = Arc<dyn Fn(DynamicImage) -> DynamicImage + Send + Sync>;

/// Display policy of a cached image: its size, scaling and compression, and how much disk it may use.
///
/// Formats are addressed by name. Once registered in a cache, a format with the same name and a
/// different rendering is rejected.
///
/// Formats can be loaded from configuration:
///
/// ```rust
/// # use vista::{Format, ScaleMode};
/// let format: Format = serde_json::from_str(
///     r#"{ "name": "thumb", "size": { "width": 100, "height": 100 }, "scale_mode": "aspect_fill" }"#,
/// )
/// .unwrap();
/// assert_eq!(format.scale_mode, ScaleMode::AspectFill);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct Format {
    /// Unique name of the format, also the name of its disk directory.
    pub name: String,
    /// Target size. Images keep their size if unset.
    #[serde(default)]
    pub size: Option<Size>,
    /// How images are fitted into [`Format::size`].
    #[serde(default)]
    pub scale_mode: ScaleMode,
    /// Whether images smaller than the target size are scaled up.
    #[serde(default)]
    pub allow_upscaling: bool,
    /// Lossy compression quality of persisted images, from 1 to 100.
    #[serde(default = "default_compression_quality")]
    pub compression_quality: u8,
    /// Disk capacity of the format in bytes.
    #[serde(default = "default_disk_capacity")]
    pub disk_capacity: usize,
    /// Whether images of this format are persisted.
    #[serde(default = "default_allow_disk_cache")]
    pub allow_disk_cache: bool,
    /// Preload policy.
    #[serde(default)]
    pub preload: Preload,
    /// Applied to the source image before resizing.
    #[serde(skip)]
    pub pre_resize: Option<ResizeHook>,
    /// Applied to the resized image.
    #[serde(skip)]
    pub post_resize: Option<ResizeHook>,
}

fn default_compression_quality() -> u8 {
    90
}

fn default_disk_capacity() -> usize {
    64 * 1024 * 1024
}

fn default_allow_disk_cache() -> bool {
    true
}

impl Debug for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("scale_mode", &self.scale_mode)
            .field("allow_upscaling", &self.allow_upscaling)
            .field("compression_quality", &self.compression_quality)
            .field("disk_capacity", &self.disk_capacity)
            .field("allow_disk_cache", &self.allow_disk_cache)
            .field("preload", &self.preload)
            .field("pre_resize", &self.pre_resize.is_some())
            .field("post_resize", &self.post_resize.is_some())
            .finish()
    }
}

impl Format {
    /// Create a format that keeps the original size.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            scale_mode: ScaleMode::default(),
            allow_upscaling: false,
            compression_quality: default_compression_quality(),
            disk_capacity: default_disk_capacity(),
            allow_disk_cache: default_allow_disk_cache(),
            preload: Preload::default(),
            pre_resize: None,
            post_resize: None,
        }
    }

    /// Set the target size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some(Size { width, height });
        self
    }

    /// Set the scale mode.
    ///
    /// Default: [`ScaleMode::Fill`].
    pub fn with_scale_mode(mut self, scale_mode: ScaleMode) -> Self {
        self.scale_mode = scale_mode;
        self
    }

    /// Allow scaling images up to the target size.
    ///
    /// Default: `false`.
    pub fn with_allow_upscaling(mut self, allow_upscaling: bool) -> Self {
        self.allow_upscaling = allow_upscaling;
        self
    }

    /// Set the compression quality of persisted images.
    ///
    /// Default: `90`.
    pub fn with_compression_quality(mut self, compression_quality: u8) -> Self {
        self.compression_quality = compression_quality;
        self
    }

    /// Set the disk capacity in bytes.
    ///
    /// Default: 64 MiB.
    pub fn with_disk_capacity(mut self, disk_capacity: usize) -> Self {
        self.disk_capacity = disk_capacity;
        self
    }

    /// Enable or disable persisting images of this format.
    ///
    /// Default: `true`.
    pub fn with_allow_disk_cache(mut self, allow_disk_cache: bool) -> Self {
        self.allow_disk_cache = allow_disk_cache;
        self
    }

    /// Set the preload policy.
    ///
    /// Default: [`Preload::None`].
    pub fn with_preload(mut self, preload: Preload) -> Self {
        self.preload = preload;
        self
    }

    /// Set a hook applied before resizing.
    pub fn with_pre_resize(mut self, hook: impl Fn(DynamicImage) -> DynamicImage + Send + Sync + 'static) -> Self {
        self.pre_resize = Some(Arc::new(hook));
        self
    }

    /// Set a hook applied after resizing.
    pub fn with_post_resize(mut self, hook: impl Fn(DynamicImage) -> DynamicImage + Send + Sync + 'static) -> Self {
        self.post_resize = Some(Arc::new(hook));
        self
    }

    /// Check the format can be registered.
    pub fn validate(&self) -> Result<()> {
        vista_storage::validate_format_name(&self.name)?;
        if !(1..=100).contains(&self.compression_quality) {
            return Err(Error::config("compression quality must be within 1..=100")
                .with_context("format", &self.name)
                .with_context("compression_quality", self.compression_quality));
        }
        if let Some(size) = self.size {
            if size.width == 0 || size.height == 0 {
                return Err(Error::config("format size must not be empty")
                    .with_context("format", &self.name)
                    .with_context("size", format!("{}x{}", size.width, size.height)));
            }
        }
        Ok(())
    }

    /// Whether two formats with the same name render images the same way.
    ///
    /// The disk capacity is not part of the rendering. Hooks are compared by identity.
    pub fn is_compatible(&self, other: &Format) -> bool {
        fn same_hook(a: &Option<ResizeHook>, b: &Option<ResizeHook>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }

        self.name == other.name
            && self.size == other.size
            && self.scale_mode == other.scale_mode
            && self.allow_upscaling == other.allow_upscaling
            && self.compression_quality == other.compression_quality
            && self.allow_disk_cache == other.allow_disk_cache
            && same_hook(&self.pre_resize, &other.pre_resize)
            && same_hook(&self.post_resize, &other.post_resize)
    }
}

#[cfg(test)]
mod tests {
    use vista_common::ErrorKind;

    use super::*;

    #[test]
    fn test_format_defaults_from_json() {
        let formats: Vec<Format> = serde_json::from_str(
            r#"[
                { "name": "thumb", "size": { "width": 100, "height": 100 }, "disk_capacity": 1048576 },
                { "name": "original", "scale_mode": "none", "allow_disk_cache": false, "preload": "all" }
            ]"#,
        )
        .unwrap();

        assert_eq!(formats[0].size, Some(Size { width: 100, height: 100 }));
        assert_eq!(formats[0].scale_mode, ScaleMode::Fill);
        assert_eq!(formats[0].compression_quality, 90);
        assert_eq!(formats[0].disk_capacity, 1048576);
        assert!(formats[0].allow_disk_cache);

        assert_eq!(formats[1].scale_mode, ScaleMode::None);
        assert_eq!(formats[1].preload, Preload::All);
        assert!(!formats[1].allow_disk_cache);
        assert!(formats[1].pre_resize.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(Format::new("thumb").with_size(10, 10).validate().is_ok());
        for format in [
            Format::new("a/b"),
            Format::new("thumb").with_size(0, 10),
            Format::new("thumb").with_compression_quality(0),
            Format::new("thumb").with_compression_quality(101),
        ] {
            assert_eq!(format.validate().unwrap_err().kind(), ErrorKind::Config, "{format:?}");
        }
    }

    #[test]
    fn test_compatibility() {
        let thumb = Format::new("thumb").with_size(100, 100);
        assert!(thumb.is_compatible(&thumb.clone().with_disk_capacity(1)));
        assert!(!thumb.is_compatible(&thumb.clone().with_size(50, 50)));
        assert!(!thumb.is_compatible(&thumb.clone().with_scale_mode(ScaleMode::AspectFit)));

        let hooked = thumb.clone().with_post_resize(|image| image.grayscale());
        assert!(hooked.is_compatible(&hooked.clone()));
        assert!(!hooked.is_compatible(&thumb));
    }
}
