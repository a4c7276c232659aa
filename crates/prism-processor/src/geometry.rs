//! Resize and crop arithmetic, independent of pixel data.

use prism_core::{HAlign, VAlign};

/// Pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// How the decoded image reaches the requested box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resize {
    /// Keep the current size.
    Keep,
    /// Resize to exactly this size.
    Exact(u32, u32),
    /// Resize to `scaled`, then crop `crop` out of it.
    Cover { scaled: (u32, u32), crop: Rect },
}

/// Requested box plus mode flags.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Target {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) fit_in: bool,
    pub(crate) stretch: bool,
    pub(crate) upscale: bool,
    pub(crate) h_align: Option<HAlign>,
    pub(crate) v_align: Option<VAlign>,
}

fn scaled(value: u32, scale: f64) -> u32 {
    let result = (f64::from(value) * scale).round();
    if result < 1.0 {
        1
    } else if result > f64::from(u32::MAX) {
        u32::MAX
    } else {
        // Range checked above.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let result = result as u32;
        result
    }
}

fn ratio(target: u32, source: u32) -> f64 {
    f64::from(target) / f64::from(source.max(1))
}

/// Plan the resize step for a `source` of the given size.
pub(crate) fn plan(source: (u32, u32), target: Target) -> Resize {
    let (src_w, src_h) = source;
    if target.width == 0 && target.height == 0 {
        return Resize::Keep;
    }
    if target.fit_in {
        let scale = match (target.width, target.height) {
            (0, h) => ratio(h, src_h),
            (w, 0) => ratio(w, src_w),
            (w, h) => ratio(w, src_w).min(ratio(h, src_h)),
        };
        let scale = if target.upscale { scale } else { scale.min(1.0) };
        let size = (scaled(src_w, scale), scaled(src_h, scale));
        return if size == source {
            Resize::Keep
        } else {
            Resize::Exact(size.0, size.1)
        };
    }
    let (width, height) = match (target.width, target.height) {
        (0, h) => (scaled(src_w, ratio(h, src_h)), h),
        (w, 0) => (w, scaled(src_h, ratio(w, src_w))),
        (w, h) => (w, h),
    };
    if target.stretch || target.width == 0 || target.height == 0 {
        return if (width, height) == source {
            Resize::Keep
        } else {
            Resize::Exact(width, height)
        };
    }
    let scale = ratio(width, src_w).max(ratio(height, src_h));
    let scaled_size = (
        scaled(src_w, scale).max(width),
        scaled(src_h, scale).max(height),
    );
    let x = match target.h_align.unwrap_or(HAlign::Center) {
        HAlign::Left => 0,
        HAlign::Center => (scaled_size.0 - width) / 2,
        HAlign::Right => scaled_size.0 - width,
    };
    let y = match target.v_align.unwrap_or(VAlign::Middle) {
        VAlign::Top => 0,
        VAlign::Middle => (scaled_size.1 - height) / 2,
        VAlign::Bottom => scaled_size.1 - height,
    };
    Resize::Cover {
        scaled: scaled_size,
        crop: Rect {
            x,
            y,
            width,
            height,
        },
    }
}

/// Clamp a crop rectangle to the image; `None` when nothing remains.
pub(crate) fn clamp_crop(
    image: (u32, u32),
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
) -> Option<Rect> {
    let right = right.min(image.0);
    let bottom = bottom.min(image.1);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    })
}

/// Offset that centres `inner` inside `outer`.
pub(crate) const fn centered(outer: (u32, u32), inner: (u32, u32)) -> (u32, u32) {
    (
        outer.0.saturating_sub(inner.0) / 2,
        outer.1.saturating_sub(inner.1) / 2,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(width: u32, height: u32) -> Target {
        Target {
            width,
            height,
            ..Target::default()
        }
    }

    #[test]
    fn auto_dimensions_keep_aspect_ratio() {
        assert_eq!(plan((1000, 500), target(0, 0)), Resize::Keep);
        assert_eq!(plan((1000, 500), target(500, 0)), Resize::Exact(500, 250));
        assert_eq!(plan((1000, 500), target(0, 100)), Resize::Exact(200, 100));
    }

    #[test]
    fn fit_in_never_upscales_unless_asked() {
        let fit = |w, h, upscale| Target {
            fit_in: true,
            upscale,
            ..target(w, h)
        };
        assert_eq!(plan((1000, 500), fit(400, 400, false)), Resize::Exact(400, 200));
        assert_eq!(plan((500, 1000), fit(400, 400, false)), Resize::Exact(200, 400));
        assert_eq!(plan((100, 100), fit(200, 200, false)), Resize::Keep);
        assert_eq!(plan((100, 100), fit(200, 300, true)), Resize::Exact(200, 200));
        assert_eq!(plan((1000, 500), fit(0, 100, false)), Resize::Exact(200, 100));
    }

    #[test]
    fn stretch_ignores_aspect_ratio() {
        let stretch = Target {
            stretch: true,
            ..target(300, 300)
        };
        assert_eq!(plan((1000, 500), stretch), Resize::Exact(300, 300));
    }

    #[test]
    fn cover_crops_according_to_alignment() {
        let centred = plan((1000, 500), target(300, 300));
        assert_eq!(
            centred,
            Resize::Cover {
                scaled: (600, 300),
                crop: Rect {
                    x: 150,
                    y: 0,
                    width: 300,
                    height: 300
                },
            }
        );
        let left = plan(
            (1000, 500),
            Target {
                h_align: Some(HAlign::Left),
                ..target(300, 300)
            },
        );
        assert!(matches!(left, Resize::Cover { crop: Rect { x: 0, .. }, .. }));
        let right = plan(
            (1000, 500),
            Target {
                h_align: Some(HAlign::Right),
                ..target(300, 300)
            },
        );
        assert!(matches!(right, Resize::Cover { crop: Rect { x: 300, .. }, .. }));
        let bottom = plan(
            (500, 1000),
            Target {
                v_align: Some(VAlign::Bottom),
                ..target(300, 300)
            },
        );
        assert!(matches!(bottom, Resize::Cover { crop: Rect { y: 300, .. }, .. }));
    }

    #[test]
    fn crop_is_clamped_to_the_image() {
        assert_eq!(
            clamp_crop((100, 80), 10, 10, 500, 500),
            Some(Rect {
                x: 10,
                y: 10,
                width: 90,
                height: 70
            })
        );
        assert_eq!(clamp_crop((100, 80), 150, 0, 200, 10), None);
        assert_eq!(centered((300, 300), (300, 150)), (0, 75));
    }
}
