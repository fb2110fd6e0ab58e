//! Rasterizing a stipple set as filled discs.

use crate::{Point, Rgb};

/// Draws a point set onto a canvas
pub trait Renderer {
    fn render(&mut self, points: &[Point], width: u32, height: u32, background: Rgb)
        -> image::RgbImage;
}

impl<T: Renderer + ?Sized> Renderer for &mut T {
    fn render(&mut self, points: &[Point], width: u32, height: u32, background: Rgb)
        -> image::RgbImage
    {
        (**self).render(points, width, height, background)
    }
}

/// Filled-disc renderer. Each point covers every pixel within `size`
/// pixels of its denormalized (truncated) position.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscRenderer;

impl DiscRenderer {
    pub fn new() -> Self {
        Self
    }

    fn draw_disc(image: &mut image::RgbImage, cx: i64, cy: i64, radius: f32, color: Rgb) {
        let (w, h) = (image.width() as i64, image.height() as i64);
        let r = radius.max(0.0) as f64;
        let r_sq = r * r;
        let reach = r.floor() as i64;

        let y0 = (cy - reach).max(0);
        let y1 = (cy + reach).min(h - 1);
        let x0 = (cx - reach).max(0);
        let x1 = (cx + reach).min(w - 1);

        for py in y0..=y1 {
            let dy = (py - cy) as f64;
            for px in x0..=x1 {
                let dx = (px - cx) as f64;
                if dx * dx + dy * dy <= r_sq {
                    image.put_pixel(px as u32, py as u32, image::Rgb(color));
                }
            }
        }
    }
}

impl Renderer for DiscRenderer {
    fn render(&mut self, points: &[Point], width: u32, height: u32, background: Rgb)
        -> image::RgbImage
    {
        let mut image = image::RgbImage::from_pixel(width, height, image::Rgb(background));
        for point in points {
            let (x, y) = point.pos.to_pixel(width, height);
            Self::draw_disc(&mut image, x as i64, y as i64, point.size, point.color);
        }
        image
    }
}
