//! Per-cell density moments and the quantities derived from them.

use rayon::prelude::*;

use crate::{DensityField, LabelRaster, Position, Result, StippleError};

/// Rows per accumulation band. Bands are reduced in order, so sums do not
/// depend on thread scheduling.
const BAND_ROWS: usize = 32;

/// Aggregate statistics of one Voronoi cell.
///
/// Moments are taken over pixel indices `(x, y)` weighted by density.
/// Derived quantities only exist for non-degenerate cells.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoronoiCell {
    /// Pixel count
    pub area: u32,
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m11: f64,
    pub m20: f64,
    pub m02: f64,
    derived: Option<Derived>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Derived {
    centroid: Position,
    orientation: f64,
    split_axis: Position,
}

impl VoronoiCell {
    /// A zero-mass or zero-area cell; its seed should be dropped
    pub fn is_degenerate(&self) -> bool {
        self.m00 <= 0.0 || self.area == 0
    }

    /// Density-weighted centroid in normalized coordinates
    pub fn centroid(&self) -> Option<Position> {
        self.derived.map(|d| d.centroid)
    }

    /// Angle (radians) of the principal axis of the cell's mass
    pub fn orientation(&self) -> Option<f64> {
        self.derived.map(|d| d.orientation)
    }

    /// Half-offset between the two children when the cell splits, along
    /// the principal axis, in normalized coordinates
    pub fn split_axis(&self) -> Option<Position> {
        self.derived.map(|d| d.split_axis)
    }

    /// Mean density over the cell's pixels
    pub fn mean_density(&self) -> Option<f64> {
        (self.area > 0).then(|| self.m00 / self.area as f64)
    }

    #[inline]
    fn add(&mut self, x: f64, y: f64, density: f64) {
        self.area += 1;
        self.m00 += density;
        self.m10 += x * density;
        self.m01 += y * density;
        self.m11 += x * y * density;
        self.m20 += x * x * density;
        self.m02 += y * y * density;
    }

    fn merge(&mut self, other: &VoronoiCell) {
        self.area += other.area;
        self.m00 += other.m00;
        self.m10 += other.m10;
        self.m01 += other.m01;
        self.m11 += other.m11;
        self.m20 += other.m20;
        self.m02 += other.m02;
    }

    fn finish(&mut self, width: u32, height: u32) {
        if self.is_degenerate() {
            self.derived = None;
            return;
        }

        let cx = self.m10 / self.m00;
        let cy = self.m01 / self.m00;

        let a = self.m20 / self.m00 - cx * cx;
        let b = 2.0 * (self.m11 / self.m00 - cx * cy);
        let c = self.m02 / self.m00 - cy * cy;
        let orientation = b.atan2(a - c) / 2.0;

        let magnitude = ((self.area.max(1) as f64) / std::f64::consts::PI).sqrt() / 2.0;
        let split_axis = Position::new(
            orientation.cos() * magnitude / width as f64,
            orientation.sin() * magnitude / height as f64,
        );

        self.derived = Some(Derived {
            centroid: Position::new((cx + 0.5) / width as f64, (cy + 0.5) / height as f64),
            orientation,
            split_axis,
        });
    }
}

/// Accumulate density moments per label.
///
/// Returns `num_cells` cells indexed like the seed list that produced
/// `raster`. Labels at or beyond `num_cells` are ignored.
pub fn accumulate(
    raster: &LabelRaster,
    density: &DensityField,
    num_cells: usize,
) -> Result<Vec<VoronoiCell>> {
    if (raster.width, raster.height) != density.dimensions() {
        return Err(StippleError::InvalidInput(format!(
            "label raster is {}x{} but density field is {}x{}",
            raster.width,
            raster.height,
            density.width(),
            density.height()
        )));
    }

    let width = raster.width as usize;
    let band_len = BAND_ROWS * width;
    let values = density.values();

    let bands: Vec<Vec<VoronoiCell>> = raster
        .labels
        .par_chunks(band_len)
        .enumerate()
        .map(|(band, labels)| {
            let mut cells = vec![VoronoiCell::default(); num_cells];
            let offset = band * band_len;
            for (i, &label) in labels.iter().enumerate() {
                let Some(cell) = cells.get_mut(label as usize) else {
                    continue;
                };
                let idx = offset + i;
                let x = (idx % width) as f64;
                let y = (idx / width) as f64;
                cell.add(x, y, values[idx] as f64);
            }
            cells
        })
        .collect();

    let mut cells = vec![VoronoiCell::default(); num_cells];
    for band in &bands {
        for (cell, partial) in cells.iter_mut().zip(band) {
            cell.merge(partial);
        }
    }
    for cell in &mut cells {
        cell.finish(raster.width, raster.height);
    }

    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform(width: u32, height: u32) -> DensityField {
        DensityField::from_fn(width, height, |_, _| 0).unwrap()
    }

    #[test]
    fn test_single_cell_centroid_is_grid_center() {
        let raster = LabelRaster::new(vec![0; 16], 4, 4);
        let cells = accumulate(&raster, &uniform(4, 4), 1).unwrap();

        assert_eq!(cells[0].area, 16);
        assert_relative_eq!(cells[0].m00, 16.0);
        let centroid = cells[0].centroid().unwrap();
        assert_relative_eq!(centroid.x, 0.5);
        assert_relative_eq!(centroid.y, 0.5);
    }

    #[test]
    fn test_centroid_is_density_weighted_mean() {
        let (w, h) = (6u32, 5u32);
        let density = DensityField::from_fn(w, h, |x, y| (x * 40 + y * 7) as u8).unwrap();
        let raster = LabelRaster::new(vec![0; (w * h) as usize], w, h);
        let cells = accumulate(&raster, &density, 1).unwrap();

        let (mut sum, mut sx, mut sy) = (0.0f64, 0.0f64, 0.0f64);
        for y in 0..h {
            for x in 0..w {
                let d = density.get(x, y) as f64;
                sum += d;
                sx += x as f64 * d;
                sy += y as f64 * d;
            }
        }
        let centroid = cells[0].centroid().unwrap();
        assert_relative_eq!(centroid.x, (sx / sum + 0.5) / w as f64, epsilon = 1e-12);
        assert_relative_eq!(centroid.y, (sy / sum + 0.5) / h as f64, epsilon = 1e-12);
    }

    #[test]
    fn test_orientation_follows_elongation() {
        let wide = LabelRaster::new(vec![0; 16], 8, 2);
        let cells = accumulate(&wide, &uniform(8, 2), 1).unwrap();
        assert_relative_eq!(cells[0].orientation().unwrap(), 0.0);

        let tall = LabelRaster::new(vec![0; 16], 2, 8);
        let cells = accumulate(&tall, &uniform(2, 8), 1).unwrap();
        assert_relative_eq!(
            cells[0].orientation().unwrap(),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_split_axis_scaled_to_normalized_coordinates() {
        let raster = LabelRaster::new(vec![0; 16], 8, 2);
        let cells = accumulate(&raster, &uniform(8, 2), 1).unwrap();
        let axis = cells[0].split_axis().unwrap();
        let magnitude = (16.0 / std::f64::consts::PI).sqrt() / 2.0;
        assert_relative_eq!(axis.x, magnitude / 8.0, epsilon = 1e-12);
        assert_relative_eq!(axis.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_area_counts_floor_density_pixels() {
        let white = DensityField::from_fn(3, 3, |_, _| 255).unwrap();
        let raster = LabelRaster::new(vec![0; 9], 3, 3);
        let cells = accumulate(&raster, &white, 1).unwrap();
        assert_eq!(cells[0].area, 9);
        assert_relative_eq!(cells[0].m00, 9.0 * f32::EPSILON as f64);
        assert!(!cells[0].is_degenerate());
    }

    #[test]
    fn test_unowned_cell_is_degenerate() {
        let raster = LabelRaster::new(vec![0, 1, 0, 1], 2, 2);
        let cells = accumulate(&raster, &uniform(2, 2), 3).unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].area, 2);
        assert_eq!(cells[1].area, 2);
        assert!(cells[2].is_degenerate());
        assert!(cells[2].centroid().is_none());
        assert!(cells[2].split_axis().is_none());
    }

    #[test]
    fn test_bands_sum_like_single_pass() {
        // Taller than one band so the band merge is exercised
        let (w, h) = (7u32, 100u32);
        let labels: Vec<u32> = (0..w * h).map(|i| (i / w) % 3).collect();
        let raster = LabelRaster::new(labels, w, h);
        let cells = accumulate(&raster, &uniform(w, h), 3).unwrap();
        let total: u32 = cells.iter().map(|c| c.area).sum();
        assert_eq!(total, w * h);
        assert_eq!(cells[0].area, 34 * w);
    }

    #[test]
    fn test_cells_conserve_field_mass() {
        let (w, h) = (9u32, 70u32);
        let density = DensityField::from_fn(w, h, |x, y| ((x * 31 + y * 3) % 256) as u8).unwrap();
        let labels: Vec<u32> = (0..w * h).map(|i| (i % w + i / w) % 4).collect();
        let cells = accumulate(&LabelRaster::new(labels, w, h), &density, 4).unwrap();

        let mass: f64 = cells.iter().map(|c| c.m00).sum();
        assert_relative_eq!(mass, density.total(), max_relative = 1e-12);

        for cell in &cells {
            let mean = cell.mean_density().unwrap();
            assert_relative_eq!(mean * cell.area as f64, cell.m00, max_relative = 1e-12);
            assert!(mean > 0.0 && mean <= 1.0);
        }
        assert!(VoronoiCell::default().mean_density().is_none());
    }

    #[test]
    fn test_dimension_mismatch() {
        let raster = LabelRaster::new(vec![0; 4], 2, 2);
        assert!(matches!(
            accumulate(&raster, &uniform(3, 3), 1),
            Err(StippleError::InvalidInput(_))
        ));
    }
}
