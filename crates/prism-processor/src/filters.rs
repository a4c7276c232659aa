//! Filter parsing and pixel filters.
//!
//! Output options (`format`, `quality`, `fill`, `upscale`) shape the
//! pipeline; the rest are pixel operations applied in request order after
//! resizing. Disabled names are skipped as if absent; unknown names are
//! rejected.

use image::{DynamicImage, Rgba, RgbaImage, imageops};
use prism_core::{BlobType, Filter, ImageError, ImageResult};

use crate::color;
use crate::encode::OutputFormat;

const NO_OP_FILTERS: &[&str] = &["strip_exif", "strip_icc", "strip_metadata"];

/// Quarter-turn rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rotation {
    Quarter,
    Half,
    ThreeQuarters,
}

/// Pixel operation applied after geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Operation {
    Grayscale,
    Blur(f32),
    Rotate(Rotation),
    Brightness(i32),
    Contrast(f32),
    Background(Rgba<u8>),
}

/// Filters resolved into pipeline options.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FilterPlan {
    pub(crate) format: Option<OutputFormat>,
    pub(crate) quality: Option<u8>,
    pub(crate) fill: Option<Rgba<u8>>,
    pub(crate) upscale: bool,
    pub(crate) operations: Vec<Operation>,
}

fn invalid(filter: &Filter) -> ImageError {
    ImageError::invalid("filter_argument_invalid", format!("{}({})", filter.name, filter.args.join(",")))
}

fn number<T: std::str::FromStr>(filter: &Filter) -> ImageResult<T> {
    filter
        .arg(0)
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| invalid(filter))
}

fn colour(filter: &Filter) -> ImageResult<Rgba<u8>> {
    filter.arg(0).and_then(color::parse).ok_or_else(|| invalid(filter))
}

impl FilterPlan {
    /// Resolve `filters`, skipping names listed in `disabled`.
    pub(crate) fn parse(filters: &[Filter], disabled: &[String]) -> ImageResult<Self> {
        let mut plan = Self::default();
        for filter in filters {
            let name = filter.name.as_str();
            if disabled.iter().any(|entry| entry == name) || NO_OP_FILTERS.contains(&name) {
                continue;
            }
            match name {
                "format" => {
                    let value = filter.arg(0).unwrap_or_default();
                    plan.format = Some(OutputFormat::parse(value).ok_or_else(|| {
                        if BlobType::from_format(value).is_some_and(BlobType::is_image) {
                            ImageError::unsupported("format", value)
                        } else {
                            invalid(filter)
                        }
                    })?);
                }
                "quality" => {
                    let quality: u32 = number(filter)?;
                    plan.quality = Some(u8::try_from(quality.min(100)).unwrap_or(100));
                }
                "fill" => plan.fill = Some(colour(filter)?),
                "upscale" => plan.upscale = true,
                "background_color" => plan.operations.push(Operation::Background(colour(filter)?)),
                "grayscale" => plan.operations.push(Operation::Grayscale),
                "blur" => {
                    let sigma: f32 = number(filter)?;
                    if !(sigma.is_finite() && sigma >= 0.0) {
                        return Err(invalid(filter));
                    }
                    if sigma > 0.0 {
                        plan.operations.push(Operation::Blur(sigma));
                    }
                }
                "rotate" => {
                    let angle: i32 = number(filter)?;
                    let rotation = match angle.rem_euclid(360) {
                        0 => None,
                        90 => Some(Rotation::Quarter),
                        180 => Some(Rotation::Half),
                        270 => Some(Rotation::ThreeQuarters),
                        _ => return Err(invalid(filter)),
                    };
                    plan.operations.extend(rotation.map(Operation::Rotate));
                }
                "brightness" => {
                    let amount: i32 = number(filter)?;
                    plan.operations
                        .push(Operation::Brightness(amount.clamp(-100, 100) * 255 / 100));
                }
                "contrast" => {
                    let amount: f32 = number(filter)?;
                    if !amount.is_finite() {
                        return Err(invalid(filter));
                    }
                    plan.operations.push(Operation::Contrast(amount.clamp(-100.0, 100.0)));
                }
                other => return Err(ImageError::unsupported("filter", other)),
            }
        }
        Ok(plan)
    }
}

/// Apply one pixel operation.
pub(crate) fn apply(image: DynamicImage, operation: Operation) -> DynamicImage {
    match operation {
        Operation::Grayscale => image.grayscale(),
        Operation::Blur(sigma) => image.blur(sigma),
        Operation::Rotate(Rotation::Quarter) => image.rotate90(),
        Operation::Rotate(Rotation::Half) => image.rotate180(),
        Operation::Rotate(Rotation::ThreeQuarters) => image.rotate270(),
        Operation::Brightness(amount) => image.brighten(amount),
        Operation::Contrast(amount) => image.adjust_contrast(amount),
        Operation::Background(color) => {
            if !image.color().has_alpha() {
                return image;
            }
            let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), color);
            imageops::overlay(&mut canvas, &image.to_rgba8(), 0, 0);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}
