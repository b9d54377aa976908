//! Decoded photographs and the pixel operations evidence needs.
//!
//! - `Photo`: owned RGB image handed to detectors and classifiers.
//! - Crops are copies, so a classifier can never mutate the source photograph.
//! - Annotation draws hollow rectangles directly into a crop before encoding.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ExtendedColorType, Rgb, RgbImage};

use crate::geometry::CropRegion;

pub const KICKBOARD_COLOR: [u8; 3] = [0, 0, 255];
pub const PERSON_COLOR: [u8; 3] = [0, 255, 0];
pub const HELMET_COLOR: [u8; 3] = [255, 0, 0];
pub const BOX_THICKNESS: u32 = 2;

#[derive(Clone, Debug)]
pub struct Photo {
    image: RgbImage,
}

impl Photo {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode photo")?;
        Ok(Self {
            image: image.into_rgb8(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("failed to open photo {}", path.display()))?;
        Ok(Self {
            image: image.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    /// Copies `region` out of the photo. The region must lie within the image.
    pub fn crop(&self, region: &CropRegion) -> Result<Photo> {
        if region.x2 > self.width() || region.y2 > self.height() {
            return Err(anyhow!(
                "crop {:?} exceeds photo bounds {}x{}",
                region,
                self.width(),
                self.height()
            ));
        }
        let view = imageops::crop_imm(
            &self.image,
            region.x1,
            region.y1,
            region.width(),
            region.height(),
        );
        Ok(Photo {
            image: view.to_image(),
        })
    }

    /// Draws a hollow rectangle; edges outside the image are skipped.
    pub fn draw_box(&mut self, region: &CropRegion, color: [u8; 3], thickness: u32) {
        let (w, h) = self.image.dimensions();
        let pixel = Rgb(color);
        for t in 0..thickness {
            let top = region.y1.saturating_add(t);
            let bottom = region.y2.checked_sub(1 + t);
            let left = region.x1.saturating_add(t);
            let right = region.x2.checked_sub(1 + t);
            for x in region.x1..region.x2.min(w) {
                if top < h {
                    self.image.put_pixel(x, top, pixel);
                }
                if let Some(y) = bottom.filter(|y| *y < h) {
                    self.image.put_pixel(x, y, pixel);
                }
            }
            for y in region.y1..region.y2.min(h) {
                if left < w {
                    self.image.put_pixel(left, y, pixel);
                }
                if let Some(x) = right.filter(|x| *x < w) {
                    self.image.put_pixel(x, y, pixel);
                }
            }
        }
    }

    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder
            .encode(
                self.image.as_raw(),
                self.width(),
                self.height(),
                ExtendedColorType::Rgb8,
            )
            .context("encode jpeg")?;
        Ok(buf)
    }
}
