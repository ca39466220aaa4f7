use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A 2D point, in pixel or real-plane units depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Linear interpolation towards `other`; `t = 0.5` is the midpoint.
    pub fn lerp(&self, other: &Point2, t: f64) -> Point2 {
        Point2::new(self.x + (other.x - self.x) * t, self.y + (other.y - self.y) * t)
    }

    /// Direction of the segment from `self` to `to`, in radians `[0, 2π)`.
    ///
    /// The angle is measured from the +x axis and grows clockwise on screen
    /// (image y grows downwards). A zero-length segment has angle 0.
    pub fn direction_to(&self, to: &Point2) -> f64 {
        let d = self.distance(to);
        if d == 0.0 {
            return 0.0;
        }
        let a = ((to.x - self.x) / d).clamp(-1.0, 1.0).acos();
        if to.y > self.y { 2.0 * PI - a } else { a }
    }
}

/// Width and height, in pixel or real-plane units depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size2 {
    pub width: f64,
    pub height: f64,
}

impl Size2 {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn lerp(&self, other: &Size2, t: f64) -> Size2 {
        Size2::new(
            self.width + (other.width - self.width) * t,
            self.height + (other.height - self.height) * t,
        )
    }
}

/// A candidate object found in a single frame. Regions live for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
    /// Center in pixel coordinates.
    pub point: Point2,
    /// Size in pixels.
    pub size: Size2,
    /// Center on the calibrated real plane.
    pub real_point: Point2,
    /// Size on the calibrated real plane.
    pub real_size: Size2,
}

impl Region {
    /// A region known only in pixel space.
    pub fn from_pixels(point: Point2, size: Size2) -> Self {
        Self {
            point,
            size,
            ..Default::default()
        }
    }
}
