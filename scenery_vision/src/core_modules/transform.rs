// THEORY:
// The `Transform2D` maps between two coordinate spaces:
// - the *real plane*: calibrated scene coordinates (e.g. a floor or a wall),
// - the *display plane*: pixel coordinates in the camera image.
//
// The forward direction (real -> display) is a chain of simple stages:
//   1. scale `(sx, sy)` and translate `(mx, my)`
//   2. shear along x by `h`, then along y by `g`
//   3. rotate by `theta`
//   4. pseudo-perspective depth correction `(deep_hx, deep_hy, deep_hs)`, which
//      pulls y towards the horizon line `deep_hy` in proportion to the distance of
//      x from the vanishing column `deep_hx`.
//
// The inverse undoes the stages in reverse order. The depth stage is solved for y
// algebraically, so `inverse(forward(p))` reproduces `p` up to floating-point error
// whenever the parameters are non-degenerate (non-zero scales, and
// `1 + (deep_hx - x) * deep_hs != 0`).
//
// The detector only ever needs the inverse: regions are found in pixels and are
// converted onto the real plane before tracking.

use super::region::{Point2, Region, Size2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform2D {
    /// Translation.
    pub mx: f64,
    pub my: f64,
    /// Scale.
    pub sx: f64,
    pub sy: f64,
    /// Rotation in radians.
    pub theta: f64,
    /// Shear of y by x.
    pub g: f64,
    /// Shear of x by y.
    pub h: f64,
    /// Vanishing column of the depth correction.
    pub deep_hx: f64,
    /// Horizon row of the depth correction.
    pub deep_hy: f64,
    /// Strength of the depth correction; 0 disables it.
    pub deep_hs: f64,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity(0)
    }
}

impl Transform2D {
    /// The identity mapping, with the depth horizon set to half the frame width.
    pub fn identity(frame_width: u32) -> Self {
        Self {
            mx: 0.0,
            my: 0.0,
            sx: 1.0,
            sy: 1.0,
            theta: 0.0,
            g: 0.0,
            h: 0.0,
            deep_hx: 0.0,
            deep_hy: frame_width as f64 / 2.0,
            deep_hs: 0.0,
        }
    }

    /// Maps a real-plane point to display coordinates.
    pub fn forward(&self, p: Point2) -> Point2 {
        let mut qx = self.sx * p.x + self.mx;
        let mut qy = self.sy * p.y + self.my;

        qx += self.h * qy;
        qy += self.g * qx;

        let (sin, cos) = self.theta.sin_cos();
        let rx = cos * qx - sin * qy;
        let mut ry = sin * qx + cos * qy;

        ry -= (self.deep_hy - ry) * (self.deep_hx - rx) * self.deep_hs;

        Point2::new(rx, ry)
    }

    /// Maps a display point back onto the real plane.
    pub fn inverse(&self, q: Point2) -> Point2 {
        let qx = q.x;
        let k = (self.deep_hx - qx) * self.deep_hs;
        let qy = (q.y + self.deep_hy * k) / (1.0 + k);

        let (sin, cos) = self.theta.sin_cos();
        let mut x = cos * qx + sin * qy;
        let mut y = -sin * qx + cos * qy;

        y -= self.g * x;
        x -= self.h * y;

        Point2::new((x - self.mx) / self.sx, (y - self.my) / self.sy)
    }

    /// Real-plane size of a pixel-space box centered at `real_point`.
    pub fn inverse_size(&self, size: Size2, real_point: Point2) -> Size2 {
        let width = size.width / self.sx;
        let mut height = size.height / self.sy;
        height -= height * (self.deep_hx - real_point.x) * self.deep_hs;
        Size2::new(width, height)
    }

    /// Fills in the real-plane fields of a region from its pixel fields.
    pub fn apply_to_region(&self, region: &mut Region) {
        region.real_point = self.inverse(region.point);
        region.real_size = self.inverse_size(region.size, region.real_point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2, b: Point2) {
        assert!(
            (a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6,
            "{a:?} != {b:?}"
        );
    }

    #[test]
    fn identity_is_a_no_op() {
        let t = Transform2D::identity(640);
        let p = Point2::new(12.5, -3.0);
        assert_close(t.forward(p), p);
        assert_close(t.inverse(p), p);
    }

    #[test]
    fn scale_and_translate() {
        let t = Transform2D {
            sx: 2.0,
            sy: 4.0,
            mx: 10.0,
            my: -5.0,
            ..Transform2D::identity(0)
        };
        assert_close(t.forward(Point2::new(1.0, 1.0)), Point2::new(12.0, -1.0));
        assert_close(t.inverse(Point2::new(12.0, -1.0)), Point2::new(1.0, 1.0));
    }

    #[test]
    fn region_size_is_scaled_and_depth_corrected() {
        let t = Transform2D {
            sx: 2.0,
            sy: 2.0,
            deep_hx: 10.0,
            deep_hs: 0.01,
            ..Transform2D::identity(0)
        };
        let size = t.inverse_size(Size2::new(20.0, 20.0), Point2::new(0.0, 0.0));
        assert_eq!(size.width, 10.0);
        assert!((size.height - 9.0).abs() < 1e-12);
    }
}
