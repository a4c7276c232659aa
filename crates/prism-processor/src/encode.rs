//! Output formats and encoding.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use prism_core::{ImageError, ImageResult};
use serde::Serialize;

/// Formats the processor can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JPEG with configurable quality.
    Jpeg,
    /// PNG.
    Png,
    /// GIF, first frame only.
    Gif,
    /// Lossless WebP.
    Webp,
    /// BMP.
    Bmp,
    /// TIFF.
    Tiff,
}

impl OutputFormat {
    /// Parse a `format(...)` argument.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Writable counterpart of a decoded format.
    #[must_use]
    pub const fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::WebP => Some(Self::Webp),
            ImageFormat::Bmp => Some(Self::Bmp),
            ImageFormat::Tiff => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Short name used in metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }

    /// MIME type of the encoded output.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
        }
    }

    const fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::Webp => ImageFormat::WebP,
            Self::Bmp => ImageFormat::Bmp,
            Self::Tiff => ImageFormat::Tiff,
        }
    }
}

/// Encode `image` as `format`; `quality` applies to JPEG only.
pub(crate) fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let result = match format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            image.to_rgb8().write_with_encoder(encoder)
        }
        other => DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buffer, other.image_format()),
    };
    result.map_err(|err| ImageError::backend("process.encode", err))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::BlobType;
    use std::error::Error;

    #[test]
    fn every_format_encodes_with_matching_magic() -> Result<(), Box<dyn Error>> {
        let image = DynamicImage::new_rgb8(8, 6);
        let cases = [
            (OutputFormat::Jpeg, BlobType::Jpeg),
            (OutputFormat::Png, BlobType::Png),
            (OutputFormat::Gif, BlobType::Gif),
            (OutputFormat::Webp, BlobType::Webp),
            (OutputFormat::Bmp, BlobType::Bmp),
            (OutputFormat::Tiff, BlobType::Tiff),
        ];
        for (format, expected) in cases {
            let bytes = encode(&image, format, 80)?;
            assert_eq!(BlobType::detect(&bytes), expected, "{format:?}");
            assert_eq!(expected.content_type(), format.content_type());
        }
        Ok(())
    }

    #[test]
    fn format_names_parse() {
        assert_eq!(OutputFormat::parse("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("webp"), Some(OutputFormat::Webp));
        assert_eq!(OutputFormat::parse("avif"), None);
        assert_eq!(
            OutputFormat::from_image_format(ImageFormat::Png),
            Some(OutputFormat::Png)
        );
        assert_eq!(OutputFormat::from_image_format(ImageFormat::Avif), None);
    }
}
