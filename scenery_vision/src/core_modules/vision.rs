// THEORY:
// The detector owns the scan loops and the tracking logic, but it does not
// reimplement classical image filters. Everything that needs neighbourhood
// processing (clustering, edges, contours, morphology, circle Hough, cascade
// classifiers) goes through the `VisionPrimitives` collaborator.
//
// Key architectural principles:
// 1.  **Narrow seam**: The trait speaks `image::GrayImage` masks and this crate's
//     geometry types. Backends translate to their native representation inside.
// 2.  **Pure-Rust default**: `ImageprocVision` is built on `imageproc` and covers
//     clustering, edges, contours and morphology. It has no Hough or cascade
//     support and reports those as `VisionError::Unsupported`.
// 3.  **Native backend on demand**: With the `opencv` feature, `OpenCvVision`
//     provides the full set including cascade models and circle detection.
// 4.  **Owned resources**: A loaded cascade model is a `Box<dyn CascadeModel>`.
//     Dropping the box releases the native resource.

use super::region::{Point2, Size2};
use crate::error::VisionError;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Value of a set pixel in a binary mask.
pub const MASK_ON: u8 = 255;
/// Blurred masks are re-binarized at this level.
pub const MASK_THRESHOLD: u8 = 128;

/// A connected group of set mask pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cluster {
    /// Center of the bounding box.
    pub center: Point2,
    /// Bounding box size in pixels.
    pub size: Size2,
    /// Number of set pixels.
    pub area: u32,
}

/// A circle found by the Hough transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Point2,
    pub radius: f64,
}

/// An axis-aligned detection box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn center(&self) -> Point2 {
        Point2::new(
            (self.x + self.width / 2) as f64,
            (self.y + self.height / 2) as f64,
        )
    }
}

/// A traced contour, as an ordered list of pixel points.
pub type Contour = Vec<Point2>;

/// Edge detection thresholds for contour mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourParams {
    pub threshold1: f64,
    pub threshold2: f64,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            threshold1: 10.0,
            threshold2: 100.0,
        }
    }
}

/// Circle Hough parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleParams {
    /// Inverse ratio of the accumulator resolution to the image resolution.
    pub inverse_ratio: f64,
    /// Minimum distance between detected centers.
    pub min_distance: f64,
    /// Upper edge threshold.
    pub param1: f64,
    /// Accumulator threshold.
    pub param2: f64,
    pub min_radius: i32,
    /// 0 means unbounded.
    pub max_radius: i32,
}

impl Default for CircleParams {
    fn default() -> Self {
        Self {
            inverse_ratio: 5.0,
            min_distance: 100.0,
            param1: 100.0,
            param2: 100.0,
            min_radius: 0,
            max_radius: 0,
        }
    }
}

/// Multi-scale detection parameters for cascade classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeParams {
    pub scale_factor: f64,
    pub min_width: i32,
    pub min_height: i32,
    /// 0 means unbounded.
    pub max_width: i32,
    /// 0 means unbounded.
    pub max_height: i32,
}

impl CascadeParams {
    pub const DEFAULT_SCALE_FACTOR: f64 = 1.1;
    pub const MIN_SCALE_FACTOR: f64 = 1.01;

    /// Returns a copy whose scale factor is usable by a multi-scale search.
    pub fn sanitized(mut self) -> Self {
        if !(self.scale_factor > Self::MIN_SCALE_FACTOR) {
            self.scale_factor = Self::DEFAULT_SCALE_FACTOR;
        }
        self
    }
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: Self::DEFAULT_SCALE_FACTOR,
            min_width: 120,
            min_height: 120,
            max_width: 0,
            max_height: 0,
        }
    }
}

/// A loaded object-detection model.
pub trait CascadeModel: Send {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &CascadeParams,
    ) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Neighbourhood image operations used by the region detector.
pub trait VisionPrimitives: Send + Sync {
    /// Groups set mask pixels into 8-connected clusters, in scan order of their
    /// first pixel. Clusters smaller than `min_area` pixels are skipped.
    fn clusters(&self, mask: &GrayImage, min_area: u32) -> Vec<Cluster>;

    /// Binary edge map of a grayscale image.
    fn edges(&self, gray: &GrayImage, params: &ContourParams) -> Result<GrayImage, VisionError>;

    /// Traces the outlines in a binary edge map.
    fn contours(&self, edges: &GrayImage) -> Result<Vec<Contour>, VisionError>;

    /// Circle Hough transform over a grayscale image.
    fn circles(&self, gray: &GrayImage, params: &CircleParams)
    -> Result<Vec<Circle>, VisionError>;

    fn erode(&self, mask: &GrayImage, size: u8) -> GrayImage;

    fn dilate(&self, mask: &GrayImage, size: u8) -> GrayImage;

    /// Box blur followed by re-thresholding at `MASK_THRESHOLD`.
    fn blur(&self, mask: &GrayImage, size: u8) -> GrayImage;

    fn load_cascade(&self, path: &Path) -> Result<Box<dyn CascadeModel>, VisionError>;
}

/// Pure-Rust backend built on `imageproc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageprocVision;

impl VisionPrimitives for ImageprocVision {
    fn clusters(&self, mask: &GrayImage, min_area: u32) -> Vec<Cluster> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

        // label -> (min_x, min_y, max_x, max_y, area), in first-seen order
        let mut order: Vec<u32> = Vec::new();
        let mut bounds: Vec<Option<(u32, u32, u32, u32, u32)>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label == 0 {
                continue;
            }
            let slot = label as usize;
            if bounds.len() <= slot {
                bounds.resize(slot + 1, None);
            }
            match &mut bounds[slot] {
                Some((min_x, min_y, max_x, max_y, area)) => {
                    *min_x = (*min_x).min(x);
                    *min_y = (*min_y).min(y);
                    *max_x = (*max_x).max(x);
                    *max_y = (*max_y).max(y);
                    *area += 1;
                }
                empty => {
                    *empty = Some((x, y, x, y, 1));
                    order.push(label);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|label| bounds[label as usize])
            .filter(|&(_, _, _, _, area)| area >= min_area)
            .map(|(min_x, min_y, max_x, max_y, area)| Cluster {
                center: Point2::new(
                    (min_x + max_x) as f64 / 2.0,
                    (min_y + max_y) as f64 / 2.0,
                ),
                size: Size2::new((max_x - min_x + 1) as f64, (max_y - min_y + 1) as f64),
                area,
            })
            .collect()
    }

    fn edges(&self, gray: &GrayImage, params: &ContourParams) -> Result<GrayImage, VisionError> {
        let low = params.threshold1.min(params.threshold2) as f32;
        let high = params.threshold1.max(params.threshold2) as f32;
        Ok(imageproc::edges::canny(gray, low, high))
    }

    fn contours(&self, edges: &GrayImage) -> Result<Vec<Contour>, VisionError> {
        Ok(imageproc::contours::find_contours::<i32>(edges)
            .into_iter()
            .map(|contour| {
                contour
                    .points
                    .into_iter()
                    .map(|p| Point2::new(p.x as f64, p.y as f64))
                    .collect()
            })
            .collect())
    }

    fn circles(
        &self,
        _gray: &GrayImage,
        _params: &CircleParams,
    ) -> Result<Vec<Circle>, VisionError> {
        Err(VisionError::Unsupported("circle Hough transform"))
    }

    fn erode(&self, mask: &GrayImage, size: u8) -> GrayImage {
        imageproc::morphology::erode(mask, Norm::LInf, size)
    }

    fn dilate(&self, mask: &GrayImage, size: u8) -> GrayImage {
        imageproc::morphology::dilate(mask, Norm::LInf, size)
    }

    fn blur(&self, mask: &GrayImage, size: u8) -> GrayImage {
        let radius = size as u32;
        let mut blurred = imageproc::filter::box_filter(mask, radius, radius);
        binarize(&mut blurred);
        blurred
    }

    fn load_cascade(&self, _path: &Path) -> Result<Box<dyn CascadeModel>, VisionError> {
        Err(VisionError::Unsupported("cascade classifier"))
    }
}

/// Re-binarizes a mask in place at `MASK_THRESHOLD`.
pub fn binarize(mask: &mut GrayImage) {
    for px in mask.pixels_mut() {
        px.0[0] = if px.0[0] >= MASK_THRESHOLD { MASK_ON } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(width: u32, height: u32, on: &[(u32, u32)]) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for &(x, y) in on {
            mask.put_pixel(x, y, Luma([MASK_ON]));
        }
        mask
    }

    #[test]
    fn single_pixel_cluster_is_centered_on_pixel() {
        let mask = mask_with(2, 2, &[(1, 0)]);
        let clusters = ImageprocVision.clusters(&mask, 1);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].center, Point2::new(1.0, 0.0));
        assert_eq!(clusters[0].size, Size2::new(1.0, 1.0));
        assert_eq!(clusters[0].area, 1);
    }

    #[test]
    fn clusters_come_out_in_scan_order() {
        let mask = mask_with(10, 10, &[(8, 1), (8, 2), (1, 5), (2, 5), (2, 6)]);
        let clusters = ImageprocVision.clusters(&mask, 1);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].center, Point2::new(8.0, 1.5));
        assert_eq!(clusters[1].center, Point2::new(1.5, 5.5));
        assert_eq!(clusters[1].area, 3);
    }

    #[test]
    fn diagonal_pixels_are_one_cluster() {
        let mask = mask_with(4, 4, &[(0, 0), (1, 1), (2, 2)]);
        assert_eq!(ImageprocVision.clusters(&mask, 1).len(), 1);
    }

    #[test]
    fn min_area_skips_small_clusters() {
        let mask = mask_with(10, 10, &[(0, 0), (5, 5), (5, 6), (6, 5)]);
        let clusters = ImageprocVision.clusters(&mask, 2);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].area, 3);
    }

    #[test]
    fn erode_removes_isolated_pixels_and_dilate_grows() {
        let mask = mask_with(5, 5, &[(2, 2)]);
        let eroded = ImageprocVision.erode(&mask, 1);
        assert!(eroded.pixels().all(|p| p.0[0] == 0));
        let dilated = ImageprocVision.dilate(&mask, 1);
        assert_eq!(dilated.pixels().filter(|p| p.0[0] == MASK_ON).count(), 9);
    }

    #[test]
    fn unsupported_primitives_report_errors() {
        let gray = GrayImage::new(4, 4);
        assert!(matches!(
            ImageprocVision.circles(&gray, &CircleParams::default()),
            Err(VisionError::Unsupported(_))
        ));
        assert!(ImageprocVision.load_cascade(Path::new("face.xml")).is_err());
    }

    #[test]
    fn scale_factor_is_sanitized() {
        let params = CascadeParams {
            scale_factor: 1.0,
            ..Default::default()
        };
        assert_eq!(params.sanitized().scale_factor, 1.1);
        let params = CascadeParams {
            scale_factor: 1.3,
            ..Default::default()
        };
        assert_eq!(params.sanitized().scale_factor, 1.3);
    }
}
