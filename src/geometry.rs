//! Pixel-space geometry shared by the assignment engine and evidence cropping.
//!
//! Detector boxes are kept as `f32` so centers and distances are exact. Crop
//! regions are whole pixels, because they index into the decoded image.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Axis-aligned detector box `(x1, y1, x2, y2)` with `x1 < x2` and `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("bounding box coordinates must be finite"));
        }
        if x1 >= x2 || y1 >= y2 {
            return Err(anyhow!(
                "bounding box ({}, {}, {}, {}) must satisfy x1 < x2 and y1 < y2",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn x1(&self) -> f32 {
        self.x1
    }

    pub fn y1(&self) -> f32 {
        self.y1
    }

    pub fn x2(&self) -> f32 {
        self.x2
    }

    pub fn y2(&self) -> f32 {
        self.y2
    }

    pub fn center(&self) -> Point {
        Point {
            x: (self.x1 + self.x2) / 2.0,
            y: (self.y1 + self.y2) / 2.0,
        }
    }
}

impl TryFrom<[f32; 4]> for BoundingBox {
    type Error = anyhow::Error;

    fn try_from(v: [f32; 4]) -> Result<Self> {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Euclidean distance between two centers.
pub fn distance(a: Point, b: Point) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Whole-pixel rectangle `[x1, x2) x [y1, y2)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropRegion {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Portion of `b` that lies inside this region, in region-local pixels.
    ///
    /// Returns `None` when the box does not overlap the region.
    pub fn relative(&self, b: &BoundingBox) -> Option<CropRegion> {
        let x1 = clamp_floor(b.x1 - self.x1 as f32, self.width());
        let y1 = clamp_floor(b.y1 - self.y1 as f32, self.height());
        let x2 = clamp_floor(b.x2 - self.x1 as f32, self.width());
        let y2 = clamp_floor(b.y2 - self.y1 as f32, self.height());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(CropRegion { x1, y1, x2, y2 })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// The padded union collapsed to zero area once clamped to the image.
    Degenerate,
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryError::Degenerate => write!(f, "crop region has zero area after clamping"),
        }
    }
}

impl std::error::Error for GeometryError {}

/// Union of `boxes`, grown by `pad` on every side and clamped to the image.
///
/// Edges are floored to whole pixels. An empty input, an empty image, or a
/// union lying entirely outside the image is `GeometryError::Degenerate`.
pub fn union_with_padding(
    boxes: &[BoundingBox],
    pad: u32,
    image_width: u32,
    image_height: u32,
) -> std::result::Result<CropRegion, GeometryError> {
    let first = boxes.first().ok_or(GeometryError::Degenerate)?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x1, first.y1, first.x2, first.y2);
    for b in &boxes[1..] {
        min_x = min_x.min(b.x1);
        min_y = min_y.min(b.y1);
        max_x = max_x.max(b.x2);
        max_y = max_y.max(b.y2);
    }

    let pad = pad as f32;
    let region = CropRegion {
        x1: clamp_floor(min_x - pad, image_width),
        y1: clamp_floor(min_y - pad, image_height),
        x2: clamp_floor(max_x + pad, image_width),
        y2: clamp_floor(max_y + pad, image_height),
    };
    if region.x2 <= region.x1 || region.y2 <= region.y1 {
        return Err(GeometryError::Degenerate);
    }
    Ok(region)
}

fn clamp_floor(v: f32, upper: u32) -> u32 {
    v.floor().clamp(0.0, upper as f32) as u32
}
