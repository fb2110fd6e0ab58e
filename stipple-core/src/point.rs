//! Position and stipple point types.

use std::ops::{Add, Sub};

use crate::Rgb;

/// 2D position in normalized image coordinates ([0,1] x [0,1]).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamp each axis independently into [0, 1]
    pub fn clamped(self) -> Self {
        Self {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
        }
    }

    /// Denormalize to pixel coordinates on a `width` x `height` canvas
    pub fn to_pixel(self, width: u32, height: u32) -> (f64, f64) {
        (self.x * width as f64, self.y * height as f64)
    }

    pub fn is_normalized(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A stipple: a disc with position, radius (pixels) and color
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub pos: Position,
    pub size: f32,
    pub color: Rgb,
}

impl Point {
    pub fn new(pos: Position, size: f32, color: Rgb) -> Self {
        Self { pos, size, color }
    }

    /// Placeholder point used during seeding; size and color are assigned
    /// by the policy once the point owns a cell.
    pub fn seed(pos: Position) -> Self {
        Self {
            pos,
            size: 0.0,
            color: [0, 0, 0],
        }
    }
}

/// Extract positions from a point set (for partitioning)
pub fn positions(points: &[Point]) -> Vec<Position> {
    points.iter().map(|p| p.pos).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_per_axis() {
        assert_eq!(Position::new(-0.2, 0.5).clamped(), Position::new(0.0, 0.5));
        assert_eq!(Position::new(1.3, -4.0).clamped(), Position::new(1.0, 0.0));
        assert_eq!(Position::new(0.25, 0.75).clamped(), Position::new(0.25, 0.75));
    }

    #[test]
    fn test_arithmetic() {
        let a = Position::new(0.5, 0.5);
        let b = Position::new(0.1, -0.2);
        assert_eq!(a + b, Position::new(0.6, 0.3));
        assert_eq!(a - b, Position::new(0.4, 0.7));
    }
}
