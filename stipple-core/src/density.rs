//! Density field derived from image darkness.

use std::path::Path;

use crate::{Result, StippleError};

/// Per-pixel stippling weight, `1 - luminance / 255`, floored at
/// `f32::EPSILON` so no cell ever has exactly zero mass.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct DensityField {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

/// Map an 8-bit luminance to a density value
#[inline]
fn density_of(luma: u8) -> f32 {
    (1.0 - luma as f32 / 255.0).max(f32::EPSILON)
}

/// Weighted channel combination, truncated to 8 bits
#[inline]
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) as u8
}

impl DensityField {
    /// Build from a single-channel image
    pub fn from_luma(image: &image::GrayImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::check_dimensions(width, height)?;
        let values = image.as_raw().iter().map(|&v| density_of(v)).collect();
        Ok(Self { width, height, values })
    }

    /// Build from an RGB image, reducing channels to luminance
    pub fn from_rgb(image: &image::RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::check_dimensions(width, height)?;
        let values = image
            .as_raw()
            .chunks_exact(3)
            .map(|px| density_of(luminance(px[0], px[1], px[2])))
            .collect();
        Ok(Self { width, height, values })
    }

    /// Build from any decoded image. Single-channel sources are used as-is;
    /// everything else goes through the luminance reduction.
    pub fn from_image(image: &image::DynamicImage) -> Result<Self> {
        if image.color().channel_count() <= 2 {
            Self::from_luma(&image.to_luma8())
        } else {
            Self::from_rgb(&image.to_rgb8())
        }
    }

    /// Load and decode an image file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let image = image::open(path)?;
        Self::from_image(&image)
    }

    /// Build a synthetic field from a luminance function `f(x, y) -> 0..=255`
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Result<Self> {
        Self::check_dimensions(width, height)?;
        let mut values = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                values.push(density_of(f(x, y)));
            }
        }
        Ok(Self { width, height, values })
    }

    fn check_dimensions(width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(StippleError::InvalidInput(format!(
                "density field must be non-empty, got {}x{}",
                width, height
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// Row-major density values
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Total mass of the field
    pub fn total(&self) -> f64 {
        self.values.iter().map(|&v| v as f64).sum()
    }
}
