//! `Processor` implementation over the pure-Rust pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use prism_core::{Blob, ImageError, ImageResult, Params, Processor, RequestContext};
use tracing::debug;

use crate::pipeline;

/// Default JPEG quality when no `quality` filter is given.
pub const DEFAULT_QUALITY: u8 = 80;

/// Limits and switches for [`ImageProcessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Filter names skipped as if absent.
    pub disabled_filters: Vec<String>,
    /// Largest accepted width, zero for none.
    pub max_width: u32,
    /// Largest accepted height, zero for none.
    pub max_height: u32,
    /// Largest accepted pixel count, zero for none.
    pub max_resolution: u64,
    /// JPEG quality used without a `quality` filter.
    pub default_quality: u8,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            disabled_filters: Vec::new(),
            max_width: 0,
            max_height: 0,
            max_resolution: 0,
            default_quality: DEFAULT_QUALITY,
        }
    }
}

/// Processor decoding and encoding with the `image` crate.
#[derive(Debug, Clone, Default)]
pub struct ImageProcessor {
    config: Arc<ProcessorConfig>,
}

impl ImageProcessor {
    /// Build a processor with `config`.
    #[must_use]
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }
}

#[async_trait]
impl Processor for ImageProcessor {
    fn name(&self) -> &str {
        "image"
    }

    async fn process(
        &self,
        ctx: &RequestContext,
        blob: &Blob,
        params: &Params,
    ) -> ImageResult<Blob> {
        ctx.check("process")?;
        if params.is_passthrough() {
            return Ok(blob.clone());
        }
        if blob.is_empty() {
            return Err(ImageError::Pass);
        }
        let bytes = blob.read_all().await?;
        let config = Arc::clone(&self.config);
        let request = params.clone();
        let output = tokio::task::spawn_blocking(move || pipeline::run(&config, &bytes, &request))
            .await
            .map_err(|err| ImageError::backend("process.join", err))??;
        debug!(
            image = %params.image,
            content_type = output.content_type,
            size = output.bytes.len(),
            "processed image"
        );
        Ok(Blob::from_bytes(output.bytes)
            .with_content_type(output.content_type)
            .with_headers(blob.headers().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};
    use prism_core::{BlobType, ErrorKind, Filter};
    use std::error::Error;
    use std::io::Cursor;

    fn png_blob() -> Result<Blob, Box<dyn Error>> {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 32, Rgba([0, 128, 255, 255])));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png)?;
        Ok(Blob::from_bytes(buffer.into_inner()))
    }

    #[tokio::test]
    async fn converts_format_and_keeps_headers() -> Result<(), Box<dyn Error>> {
        let processor = ImageProcessor::default();
        let blob = png_blob()?.with_headers(vec![("cache-control".into(), "max-age=5".into())]);
        let mut params = Params::for_image("a.png");
        params.width = 16;
        params.filters = vec![Filter::new("format", ["webp"])];
        let output = processor
            .process(&RequestContext::background(), &blob, &params)
            .await?;
        assert_eq!(output.sniff().await?, BlobType::Webp);
        assert_eq!(output.declared_content_type(), Some("image/webp"));
        assert_eq!(output.headers(), blob.headers());
        Ok(())
    }

    #[tokio::test]
    async fn passthrough_empty_and_canceled_requests() -> Result<(), Box<dyn Error>> {
        let processor = ImageProcessor::new(ProcessorConfig::default());
        let ctx = RequestContext::background();
        let blob = png_blob()?;
        let same = processor.process(&ctx, &blob, &Params::for_image("a.png")).await?;
        assert_eq!(same.read_all().await?, blob.read_all().await?);

        let mut params = Params::for_image("a.png");
        params.width = 10;
        let empty = processor.process(&ctx, &Blob::empty(), &params).await.err();
        assert_eq!(empty.map(|err| err.kind()), Some(ErrorKind::Pass));

        ctx.cancel();
        let canceled = processor.process(&ctx, &blob, &params).await.err();
        assert_eq!(canceled.map(|err| err.kind()), Some(ErrorKind::Timeout));
        Ok(())
    }
}
