//! Nearest-seed partition traits and the label raster they produce.

use std::str::FromStr;

use crate::{Position, Result, StippleError, MAX_LABELS};

/// Nearest-seed index for each pixel, row-major.
///
/// Labels are only meaningful for the seed list that produced them; they
/// are not stable across iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRaster {
    pub labels: Vec<u32>,
    pub width: u32,
    pub height: u32,
}

impl LabelRaster {
    pub fn new(labels: Vec<u32>, width: u32, height: u32) -> Self {
        debug_assert_eq!(labels.len(), width as usize * height as usize);
        Self { labels, width, height }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.labels[y as usize * self.width as usize + x as usize]
    }

    /// Pixel count per label, for labels in `0..num_labels`
    pub fn histogram(&self, num_labels: usize) -> Vec<u32> {
        let mut counts = vec![0u32; num_labels];
        for &label in &self.labels {
            if let Some(count) = counts.get_mut(label as usize) {
                *count += 1;
            }
        }
        counts
    }
}

/// Trait for nearest-seed partition backends.
///
/// `partition` labels every pixel of a `width` x `height` raster with the
/// index of the seed minimizing
/// `(fx - sx)^2 * aspect^2 + (fy - sy)^2`, `aspect = width / height`,
/// where `(fx, fy)` is the pixel centre in normalized coordinates. Ties go
/// to the lowest index.
pub trait PartitionBackend {
    fn partition(&mut self, seeds: &[Position], width: u32, height: u32) -> Result<LabelRaster>;

    /// Short human-readable backend name
    fn name(&self) -> &'static str;
}

impl<T: PartitionBackend + ?Sized> PartitionBackend for &mut T {
    fn partition(&mut self, seeds: &[Position], width: u32, height: u32) -> Result<LabelRaster> {
        (**self).partition(seeds, width, height)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: PartitionBackend + ?Sized> PartitionBackend for Box<T> {
    fn partition(&mut self, seeds: &[Position], width: u32, height: u32) -> Result<LabelRaster> {
        (**self).partition(seeds, width, height)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Reject empty rasters and empty or oversized seed lists
pub(crate) fn validate_request(seeds: &[Position], width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(StippleError::InvalidInput(format!(
            "raster resolution must be positive, got {}x{}",
            width, height
        )));
    }
    if seeds.is_empty() {
        return Err(StippleError::InvalidInput("no seeds to partition".into()));
    }
    if seeds.len() > MAX_LABELS {
        return Err(StippleError::InvalidInput(format!(
            "{} seeds exceed the label capacity of {}",
            seeds.len(),
            MAX_LABELS
        )));
    }
    Ok(())
}

/// Seed position in pixel units. Squared pixel-space distance equals the
/// normalized aspect-corrected metric scaled by `height^2`.
#[inline]
pub(crate) fn seed_in_pixels(seed: &Position, width: u32, height: u32) -> (f64, f64) {
    (seed.x * width as f64, seed.y * height as f64)
}

/// Available partition strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Exact scan over every seed for every pixel
    BruteForce,
    /// Exact search accelerated by a uniform seed grid
    Grid,
    /// GPU cone rasterization with depth testing
    Raster,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "brute" | "brute-force" | "bruteforce" => Ok(BackendKind::BruteForce),
            "grid" => Ok(BackendKind::Grid),
            "gpu" | "raster" => Ok(BackendKind::Raster),
            _ => Err(format!(
                "unknown backend '{}' (expected brute, grid, or gpu)",
                s
            )),
        }
    }
}

impl BackendKind {
    /// Instantiate the selected backend
    pub fn create(self) -> Result<Box<dyn PartitionBackend>> {
        match self {
            BackendKind::BruteForce => Ok(Box::new(crate::BruteForceBackend::new())),
            BackendKind::Grid => Ok(Box::new(crate::GridBackend::new())),
            #[cfg(feature = "gpu")]
            BackendKind::Raster => Ok(Box::new(crate::RasterBackend::new()?)),
            #[cfg(not(feature = "gpu"))]
            BackendKind::Raster => Err(StippleError::BackendUnavailable(
                "raster backend requires the `gpu` feature".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!("grid".parse::<BackendKind>(), Ok(BackendKind::Grid));
        assert_eq!("Brute".parse::<BackendKind>(), Ok(BackendKind::BruteForce));
        assert_eq!("gpu".parse::<BackendKind>(), Ok(BackendKind::Raster));
        assert!("voronoi".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_validate_request() {
        let seeds = [Position::new(0.5, 0.5)];
        assert!(validate_request(&seeds, 4, 4).is_ok());
        assert!(matches!(validate_request(&seeds, 0, 4), Err(StippleError::InvalidInput(_))));
        assert!(matches!(validate_request(&[], 4, 4), Err(StippleError::InvalidInput(_))));
    }

    #[test]
    fn test_get_is_row_major() {
        let raster = LabelRaster::new((0..12).collect(), 4, 3);
        assert_eq!(raster.get(0, 0), 0);
        assert_eq!(raster.get(3, 0), 3);
        assert_eq!(raster.get(0, 1), 4);
        assert_eq!(raster.get(3, 2), 11);
    }

    #[test]
    fn test_histogram_ignores_out_of_range_labels() {
        let raster = LabelRaster::new(vec![0, 1, 1, 7], 2, 2);
        assert_eq!(raster.histogram(2), vec![1, 2]);
    }
}
