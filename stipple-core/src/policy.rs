//! Per-cell stipple size and color assignment.

use crate::{Rgb, VoronoiCell};

/// Chooses the radius and color of the stipple emitted for a cell.
///
/// The radius also drives the split/merge target mass, so a policy that
/// varies size varies local point density.
pub trait StipplePolicy {
    fn size(&self, cell: &VoronoiCell) -> f32;

    fn color(&self, cell: &VoronoiCell) -> Rgb;
}

/// Same size and color for every cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantPolicy {
    pub size: f32,
    pub color: Rgb,
}

impl ConstantPolicy {
    pub fn new(size: f32, color: Rgb) -> Self {
        Self { size, color }
    }
}

impl StipplePolicy for ConstantPolicy {
    fn size(&self, _cell: &VoronoiCell) -> f32 {
        self.size
    }

    fn color(&self, _cell: &VoronoiCell) -> Rgb {
        self.color
    }
}

impl<P: StipplePolicy + ?Sized> StipplePolicy for Box<P> {
    fn size(&self, cell: &VoronoiCell) -> f32 {
        (**self).size(cell)
    }

    fn color(&self, cell: &VoronoiCell) -> Rgb {
        (**self).color(cell)
    }
}
