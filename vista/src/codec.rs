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

use bytes::Bytes;
use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    DynamicImage,
};
use vista_common::error::{Error, ErrorKind, Result};

use crate::{artifact::Image, format::Format};

/// Serialization of images for the disk tier.
pub trait Codec: Send + Sync + 'static {
    /// Encode an image of `format`.
    fn encode(&self, image: &Image, format: &Format) -> Result<Bytes>;

    /// Decode an image of `format`.
    fn decode(&self, data: &[u8], format: &Format) -> Result<Image>;
}

/// Default [`Codec`]: JPEG at the format's compression quality, PNG for images with an alpha
/// channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCodec;

impl Codec for ImageCodec {
    fn encode(&self, image: &Image, format: &Format) -> Result<Bytes> {
        let mut buf = Vec::new();
        let res = if image.color().has_alpha() {
            image.write_with_encoder(PngEncoder::new(&mut buf))
        } else {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, format.compression_quality))
        };
        res.map_err(|e| {
            Error::new(ErrorKind::Codec, "cannot encode image")
                .with_context("format", &format.name)
                .with_source(e)
        })?;
        Ok(Bytes::from(buf))
    }

    fn decode(&self, data: &[u8], format: &Format) -> Result<Image> {
        let image = image::load_from_memory(data).map_err(|e| {
            Error::new(ErrorKind::Codec, "cannot decode image")
                .with_context("format", &format.name)
                .with_source(e)
        })?;
        Ok(Image::new(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_for_opaque_png_for_alpha() {
        let format = Format::new("thumb");

        let opaque = Image::new(DynamicImage::new_rgb8(16, 8));
        let data = ImageCodec.encode(&opaque, &format).unwrap();
        assert_eq!(&data[..2], &[0xff, 0xd8]);
        let decoded = ImageCodec.decode(&data, &format).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));

        let alpha = Image::new(DynamicImage::new_rgba8(16, 8));
        let data = ImageCodec.encode(&alpha, &format).unwrap();
        assert_eq!(&data[..4], b"\x89PNG");
        assert_eq!(ImageCodec.decode(&data, &format).unwrap(), alpha);
    }

    #[test]
    fn test_quality_affects_size() {
        let noisy = DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 7 + y * 13) as u8, (x * y) as u8, (x ^ y) as u8])
        }));
        let noisy = Image::new(noisy);
        let low = ImageCodec
            .encode(&noisy, &Format::new("low").with_compression_quality(10))
            .unwrap();
        let high = ImageCodec
            .encode(&noisy, &Format::new("high").with_compression_quality(100))
            .unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_decode_garbage() {
        let err = ImageCodec.decode(b"garbage", &Format::new("thumb")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }
}
