//! Synchronous decode, transform, and encode of one image.
//!
//! # Design
//! - Runs on a blocking thread; nothing here awaits.
//! - Stage order: limits, header limits, decode, trim, manual crop, resize, fill, flips,
//!   pixel filters, then metadata or encode.
//! - Input the decoder cannot identify is declined with `Pass` so another
//!   processor may try it.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageReader, RgbaImage};
use prism_core::{ImageError, ImageResult, Params, TrimPosition};
use serde::Serialize;

use crate::encode::{OutputFormat, encode};
use crate::filters::{FilterPlan, apply};
use crate::geometry::{self, Rect, Resize, Target};
use crate::processor::ProcessorConfig;

/// Encoded result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Output {
    pub(crate) bytes: Vec<u8>,
    pub(crate) content_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Metadata {
    format: &'static str,
    content_type: &'static str,
    width: u32,
    height: u32,
    source_width: u32,
    source_height: u32,
    bands: u8,
    has_alpha: bool,
}

fn check_limits(config: &ProcessorConfig, width: u32, height: u32) -> ImageResult<()> {
    let too_wide = config.max_width > 0 && width > config.max_width;
    let too_tall = config.max_height > 0 && height > config.max_height;
    let too_many = config.max_resolution > 0
        && u64::from(width) * u64::from(height) > config.max_resolution;
    if too_wide || too_tall || too_many {
        return Err(ImageError::invalid(
            "max_resolution_exceeded",
            format!("{width}x{height}"),
        ));
    }
    Ok(())
}

fn crop(image: &DynamicImage, rect: Rect) -> DynamicImage {
    image.crop_imm(rect.x, rect.y, rect.width, rect.height)
}

/// Bounding box of pixels that differ from the sampled corner.
fn trim_bounds(image: &RgbaImage, position: TrimPosition, tolerance: u32) -> Option<Rect> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let reference = match position {
        TrimPosition::TopLeft => *image.get_pixel(0, 0),
        TrimPosition::BottomRight => *image.get_pixel(width - 1, height - 1),
    };
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        let distance = pixel
            .0
            .iter()
            .zip(reference.0.iter())
            .map(|(a, b)| u32::from(a.abs_diff(*b)))
            .max()
            .unwrap_or_default();
        if distance > tolerance {
            bounds = Some(bounds.map_or((x, y, x, y), |(left, top, right, bottom)| {
                (left.min(x), top.min(y), right.max(x), bottom.max(y))
            }));
        }
    }
    bounds.map(|(left, top, right, bottom)| Rect {
        x: left,
        y: top,
        width: right - left + 1,
        height: bottom - top + 1,
    })
}

/// Transform `bytes` according to `params`.
pub(crate) fn run(config: &ProcessorConfig, bytes: &[u8], params: &Params) -> ImageResult<Output> {
    let plan = FilterPlan::parse(&params.filters, &config.disabled_filters)?;
    check_limits(config, params.width, params.height)?;

    let source_format = image::guess_format(bytes).map_err(|_| ImageError::Pass)?;
    let unreadable = |err: image::ImageError| ImageError::unsupported("decode", err.to_string());
    // Header dimensions are checked before any pixel data is inflated.
    let (source_width, source_height) = ImageReader::with_format(Cursor::new(bytes), source_format)
        .into_dimensions()
        .map_err(unreadable)?;
    check_limits(config, source_width, source_height)?;
    let mut image = ImageReader::with_format(Cursor::new(bytes), source_format)
        .decode()
        .map_err(unreadable)?;

    if params.trim {
        let tolerance = params.trim_tolerance;
        if let Some(rect) = trim_bounds(&image.to_rgba8(), params.trim_by, tolerance) {
            image = crop(&image, rect);
        }
    }
    if let Some(area) = params.crop
        && let Some(rect) = geometry::clamp_crop(
            image.dimensions(),
            area.left,
            area.top,
            area.right,
            area.bottom,
        )
    {
        image = crop(&image, rect);
    }

    let target = Target {
        width: params.width,
        height: params.height,
        fit_in: params.fit_in,
        stretch: params.stretch,
        upscale: plan.upscale,
        h_align: params.h_align,
        v_align: params.v_align,
    };
    image = match geometry::plan(image.dimensions(), target) {
        Resize::Keep => image,
        Resize::Exact(width, height) => image.resize_exact(width, height, FilterType::Lanczos3),
        Resize::Cover { scaled, crop: area } => {
            let resized = image.resize_exact(scaled.0, scaled.1, FilterType::Lanczos3);
            crop(&resized, area)
        }
    };

    if let Some(color) = plan.fill
        && params.fit_in
        && params.width > 0
        && params.height > 0
        && image.dimensions() != (params.width, params.height)
    {
        let mut canvas = RgbaImage::from_pixel(params.width, params.height, color);
        let (x, y) = geometry::centered((params.width, params.height), image.dimensions());
        imageops::overlay(&mut canvas, &image.to_rgba8(), i64::from(x), i64::from(y));
        image = DynamicImage::ImageRgba8(canvas);
    }

    if params.h_flip {
        image = image.fliph();
    }
    if params.v_flip {
        image = image.flipv();
    }
    for operation in &plan.operations {
        image = apply(image, *operation);
    }

    let format = plan
        .format
        .or_else(|| OutputFormat::from_image_format(source_format))
        .unwrap_or(OutputFormat::Png);

    if params.meta {
        let metadata = Metadata {
            format: format.as_str(),
            content_type: format.content_type(),
            width: image.width(),
            height: image.height(),
            source_width,
            source_height,
            bands: image.color().channel_count(),
            has_alpha: image.color().has_alpha(),
        };
        let bytes = serde_json::to_vec(&metadata)
            .map_err(|err| ImageError::backend("process.meta", err))?;
        return Ok(Output {
            bytes,
            content_type: "application/json",
        });
    }

    let quality = plan.quality.unwrap_or(config.default_quality);
    Ok(Output {
        bytes: encode(&image, format, quality)?,
        content_type: format.content_type(),
    })
}
