//! CPU nearest-seed partition backends using Rayon for parallelism.

use rayon::prelude::*;

use crate::partition::{seed_in_pixels, validate_request, LabelRaster, PartitionBackend};
use crate::{Position, Result};

/// Exact O(W*H*N) scan. Reference implementation for the faster backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct BruteForceBackend;

impl BruteForceBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PartitionBackend for BruteForceBackend {
    fn partition(&mut self, seeds: &[Position], width: u32, height: u32) -> Result<LabelRaster> {
        validate_request(seeds, width, height)?;
        let seeds_px: Vec<(f64, f64)> = seeds
            .iter()
            .map(|s| seed_in_pixels(s, width, height))
            .collect();

        let mut labels = vec![0u32; width as usize * height as usize];
        labels
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let py = y as f64 + 0.5;
                for (x, label) in row.iter_mut().enumerate() {
                    let px = x as f64 + 0.5;
                    let mut min_dist = f64::INFINITY;
                    let mut nearest = 0u32;
                    for (i, &(sx, sy)) in seeds_px.iter().enumerate() {
                        let dx = px - sx;
                        let dy = py - sy;
                        let dist = dx * dx + dy * dy;
                        // strict: the first seed wins ties
                        if dist < min_dist {
                            min_dist = dist;
                            nearest = i as u32;
                        }
                    }
                    *label = nearest;
                }
            });

        Ok(LabelRaster::new(labels, width, height))
    }

    fn name(&self) -> &'static str {
        "brute-force"
    }
}

/// Exact search over a uniform grid of seed bins, expanding ring by ring
/// until no unvisited bin can hold a closer seed.
#[derive(Debug, Default, Clone, Copy)]
pub struct GridBackend;

/// Seeds binned into a `cols` x `rows` grid over the raster, in pixel units
struct SeedGrid {
    bins: Vec<Vec<u32>>,
    cols: usize,
    rows: usize,
    cell_w: f64,
    cell_h: f64,
}

impl SeedGrid {
    fn build(seeds_px: &[(f64, f64)], width: u32, height: u32) -> Self {
        let side = (seeds_px.len() as f64).sqrt().ceil() as usize;
        let cols = side.max(1);
        let rows = side.max(1);
        let cell_w = width as f64 / cols as f64;
        let cell_h = height as f64 / rows as f64;

        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); cols * rows];
        for (i, &(sx, sy)) in seeds_px.iter().enumerate() {
            // negative coordinates saturate to bin 0
            let gc = ((sx / cell_w) as usize).min(cols - 1);
            let gr = ((sy / cell_h) as usize).min(rows - 1);
            bins[gr * cols + gc].push(i as u32);
        }
        Self { bins, cols, rows, cell_w, cell_h }
    }

    #[inline]
    fn nearest(&self, px: f64, py: f64, seeds_px: &[(f64, f64)]) -> u32 {
        let gc = ((px / self.cell_w) as usize).min(self.cols - 1);
        let gr = ((py / self.cell_h) as usize).min(self.rows - 1);
        let ox = px - gc as f64 * self.cell_w;
        let oy = py - gr as f64 * self.cell_h;

        let mut min_dist = f64::INFINITY;
        let mut nearest = u32::MAX;

        for radius in 0usize.. {
            let r_start = gr.saturating_sub(radius);
            let r_end = (gr + radius + 1).min(self.rows);
            let c_start = gc.saturating_sub(radius);
            let c_end = (gc + radius + 1).min(self.cols);

            for ri in r_start..r_end {
                for ci in c_start..c_end {
                    // interior bins were visited at a smaller radius
                    if radius > 0
                        && ri > r_start && ri < r_end - 1
                        && ci > c_start && ci < c_end - 1
                    {
                        continue;
                    }
                    for &seed_idx in &self.bins[ri * self.cols + ci] {
                        let (sx, sy) = seeds_px[seed_idx as usize];
                        let dx = px - sx;
                        let dy = py - sy;
                        let dist = dx * dx + dy * dy;
                        if dist < min_dist || (dist == min_dist && seed_idx < nearest) {
                            min_dist = dist;
                            nearest = seed_idx;
                        }
                    }
                }
            }

            if r_start == 0 && c_start == 0 && r_end == self.rows && c_end == self.cols {
                break;
            }
            // Distance from the pixel to the nearest bin outside this ring.
            // Strict comparison so an equidistant lower-index seed is not missed.
            let rf = radius as f64;
            let min_unchecked = (ox + rf * self.cell_w)
                .min(self.cell_w * (rf + 1.0) - ox)
                .min(oy + rf * self.cell_h)
                .min(self.cell_h * (rf + 1.0) - oy);
            if min_dist < min_unchecked * min_unchecked * (1.0 - 1e-12) {
                break;
            }
        }

        nearest
    }
}

impl GridBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PartitionBackend for GridBackend {
    fn partition(&mut self, seeds: &[Position], width: u32, height: u32) -> Result<LabelRaster> {
        validate_request(seeds, width, height)?;
        let seeds_px: Vec<(f64, f64)> = seeds
            .iter()
            .map(|s| seed_in_pixels(s, width, height))
            .collect();
        let grid = SeedGrid::build(&seeds_px, width, height);

        let mut labels = vec![0u32; width as usize * height as usize];
        labels
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let py = y as f64 + 0.5;
                for (x, label) in row.iter_mut().enumerate() {
                    *label = grid.nearest(x as f64 + 0.5, py, &seeds_px);
                }
            });

        Ok(LabelRaster::new(labels, width, height))
    }

    fn name(&self) -> &'static str {
        "grid"
    }
}
