//! Parsed request intent.

use serde::Serialize;

/// Horizontal alignment used when cropping to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    /// Keep the left edge.
    Left,
    /// Keep the right edge.
    Right,
    /// Keep the centre.
    Center,
}

impl HAlign {
    /// Protocol token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Center => "center",
        }
    }
}

/// Vertical alignment used when cropping to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    /// Keep the top edge.
    Top,
    /// Keep the bottom edge.
    Bottom,
    /// Keep the middle.
    Middle,
}

impl VAlign {
    /// Protocol token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Middle => "middle",
        }
    }
}

/// Corner whose colour defines the border removed by `trim`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrimPosition {
    /// Sample the top-left pixel.
    #[default]
    TopLeft,
    /// Sample the bottom-right pixel.
    BottomRight,
}

impl TrimPosition {
    /// Protocol token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::BottomRight => "bottom-right",
        }
    }
}

/// Manual crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Crop {
    /// Left edge.
    pub left: u32,
    /// Top edge.
    pub top: u32,
    /// Right edge (exclusive).
    pub right: u32,
    /// Bottom edge (exclusive).
    pub bottom: u32,
}

impl Crop {
    /// Whether the rectangle selects nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// A named filter with its ordered arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    /// Filter name, preserved as written.
    pub name: String,
    /// Arguments split on top-level commas.
    pub args: Vec<String>,
}

impl Filter {
    /// Construct a filter from a name and arguments.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// First argument, if any.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Parsed transformation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Params {
    /// Logical source image path, opaque to the engine.
    pub image: String,
    /// Signature token as supplied, empty when unsigned.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hash: String,
    /// Request used the `unsafe` marker instead of a signature.
    #[serde(rename = "unsafe")]
    pub unsafe_request: bool,
    /// Return metadata JSON instead of pixels.
    pub meta: bool,
    /// Remove a uniform border.
    pub trim: bool,
    /// Corner sampled by `trim`.
    pub trim_by: TrimPosition,
    /// Colour distance tolerated by `trim`.
    pub trim_tolerance: u32,
    /// Manual crop applied before resizing.
    pub crop: Option<Crop>,
    /// Fit inside the target box instead of filling it.
    pub fit_in: bool,
    /// Resize to exactly the target box.
    pub stretch: bool,
    /// Target width, 0 for auto.
    pub width: u32,
    /// Target height, 0 for auto.
    pub height: u32,
    /// Flip horizontally.
    pub h_flip: bool,
    /// Flip vertically.
    pub v_flip: bool,
    /// Horizontal alignment when filling.
    pub h_align: Option<HAlign>,
    /// Vertical alignment when filling.
    pub v_align: Option<VAlign>,
    /// Content-aware focal point requested.
    pub smart: bool,
    /// Ordered filter list.
    pub filters: Vec<Filter>,
}

impl Params {
    /// Convenience constructor for a pass-through request.
    #[must_use]
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Last filter with the given name; later filters override earlier ones.
    #[must_use]
    pub fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().rev().find(|filter| filter.name == name)
    }

    /// Whether the request asks for no transformation at all.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        !self.meta
            && !self.trim
            && self.crop.is_none()
            && !self.fit_in
            && !self.stretch
            && self.width == 0
            && self.height == 0
            && !self.h_flip
            && !self.v_flip
            && self.filters.is_empty()
    }
}
