// THEORY:
// `OpenCvVision` is the native backend of the vision collaborator, available with
// the `opencv` feature. It covers the primitives the pure-Rust backend lacks
// (circle Hough and cascade classifiers) and uses OpenCV's own edge, contour and
// morphology routines for the rest. Clustering is shared with `ImageprocVision`.
//
// Masks cross the seam as single-channel 8-bit `Mat`s copied from and back into
// `image::GrayImage` buffers.

use super::region::Point2;
use super::vision::{
    BoundingBox, CascadeModel, CascadeParams, Circle, CircleParams, Cluster, Contour,
    ContourParams, ImageprocVision, VisionPrimitives, binarize,
};
use crate::error::VisionError;
use image::GrayImage;
use opencv::{
    core::{self, Mat, Point, Rect, Scalar, Size, Vec3f, Vector},
    imgproc,
    objdetect::{self, CascadeClassifier},
    prelude::*,
};
use std::path::Path;
use tracing::warn;

// Minimum neighbours for a cascade detection to be kept.
const CASCADE_MIN_NEIGHBORS: i32 = 3;

fn backend(err: opencv::Error) -> VisionError {
    VisionError::Backend(err.to_string())
}

fn to_mat(gray: &GrayImage) -> Result<Mat, VisionError> {
    let mut mat = Mat::new_rows_cols_with_default(
        gray.height() as i32,
        gray.width() as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )
    .map_err(backend)?;
    mat.data_bytes_mut()
        .map_err(backend)?
        .copy_from_slice(gray.as_raw());
    Ok(mat)
}

fn to_gray(mat: &Mat) -> Result<GrayImage, VisionError> {
    let bytes = mat.data_bytes().map_err(backend)?.to_vec();
    GrayImage::from_raw(mat.cols() as u32, mat.rows() as u32, bytes)
        .ok_or_else(|| VisionError::Backend("unexpected mat layout".into()))
}

fn kernel(size: u8) -> Result<Mat, VisionError> {
    let side = 2 * size as i32 + 1;
    imgproc::get_structuring_element(imgproc::MORPH_RECT, Size::new(side, side), Point::new(-1, -1))
        .map_err(backend)
}

/// Takes the native result, or logs the failure and runs `fallback`.
fn or_fallback(
    op: &'static str,
    native: Result<GrayImage, VisionError>,
    fallback: impl FnOnce() -> GrayImage,
) -> GrayImage {
    native.unwrap_or_else(|err| {
        warn!(op, error = %err, "opencv failed; using the imageproc backend");
        fallback()
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvVision;

impl OpenCvVision {
    fn morphology(&self, mask: &GrayImage, size: u8, erode: bool) -> Result<GrayImage, VisionError> {
        let src = to_mat(mask)?;
        let mut dst = Mat::default();
        let border = imgproc::morphology_default_border_value().map_err(backend)?;
        let k = kernel(size)?;
        if erode {
            imgproc::erode(&src, &mut dst, &k, Point::new(-1, -1), 1, core::BORDER_CONSTANT, border)
        } else {
            imgproc::dilate(&src, &mut dst, &k, Point::new(-1, -1), 1, core::BORDER_CONSTANT, border)
        }
        .map_err(backend)?;
        to_gray(&dst)
    }
}

impl VisionPrimitives for OpenCvVision {
    fn clusters(&self, mask: &GrayImage, min_area: u32) -> Vec<Cluster> {
        ImageprocVision.clusters(mask, min_area)
    }

    fn edges(&self, gray: &GrayImage, params: &ContourParams) -> Result<GrayImage, VisionError> {
        let src = to_mat(gray)?;
        let mut dst = Mat::default();
        imgproc::canny(&src, &mut dst, params.threshold1, params.threshold2, 3, false)
            .map_err(backend)?;
        to_gray(&dst)
    }

    fn contours(&self, edges: &GrayImage) -> Result<Vec<Contour>, VisionError> {
        let src = to_mat(edges)?;
        let mut found = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            &src,
            &mut found,
            imgproc::RETR_LIST,
            imgproc::CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )
        .map_err(backend)?;
        Ok(found
            .iter()
            .map(|contour| {
                contour
                    .iter()
                    .map(|p| Point2::new(p.x as f64, p.y as f64))
                    .collect()
            })
            .collect())
    }

    fn circles(&self, gray: &GrayImage, params: &CircleParams) -> Result<Vec<Circle>, VisionError> {
        let src = to_mat(gray)?;
        let mut smoothed = Mat::default();
        imgproc::gaussian_blur(&src, &mut smoothed, Size::new(5, 5), 0.0, 0.0, core::BORDER_DEFAULT)
            .map_err(backend)?;
        let mut found = Vector::<Vec3f>::new();
        imgproc::hough_circles(
            &smoothed,
            &mut found,
            imgproc::HOUGH_GRADIENT,
            params.inverse_ratio,
            params.min_distance,
            params.param1,
            params.param2,
            params.min_radius,
            params.max_radius,
        )
        .map_err(backend)?;
        Ok(found
            .iter()
            .map(|c| Circle {
                center: Point2::new(c[0] as f64, c[1] as f64),
                radius: c[2] as f64,
            })
            .collect())
    }

    fn erode(&self, mask: &GrayImage, size: u8) -> GrayImage {
        or_fallback("erode", self.morphology(mask, size, true), || {
            ImageprocVision.erode(mask, size)
        })
    }

    fn dilate(&self, mask: &GrayImage, size: u8) -> GrayImage {
        or_fallback("dilate", self.morphology(mask, size, false), || {
            ImageprocVision.dilate(mask, size)
        })
    }

    fn blur(&self, mask: &GrayImage, size: u8) -> GrayImage {
        let blurred = to_mat(mask).and_then(|src| {
            let side = 2 * size as i32 + 1;
            let mut dst = Mat::default();
            imgproc::blur(&src, &mut dst, Size::new(side, side), Point::new(-1, -1), core::BORDER_DEFAULT)
                .map_err(backend)?;
            let mut out = to_gray(&dst)?;
            binarize(&mut out);
            Ok(out)
        });
        or_fallback("blur", blurred, || ImageprocVision.blur(mask, size))
    }

    fn load_cascade(&self, path: &Path) -> Result<Box<dyn CascadeModel>, VisionError> {
        let load_error = |reason: String| VisionError::ModelLoad {
            path: path.to_path_buf(),
            reason,
        };
        let name = path
            .to_str()
            .ok_or_else(|| load_error("path is not valid UTF-8".into()))?;
        let classifier = CascadeClassifier::new(name).map_err(|e| load_error(e.to_string()))?;
        if classifier.empty().map_err(|e| load_error(e.to_string()))? {
            return Err(load_error("model file is empty or unreadable".into()));
        }
        Ok(Box::new(OpenCvCascade { classifier }))
    }
}

/// A loaded OpenCV cascade classifier. Dropping it releases the model.
pub struct OpenCvCascade {
    classifier: CascadeClassifier,
}

impl CascadeModel for OpenCvCascade {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &CascadeParams,
    ) -> Result<Vec<BoundingBox>, VisionError> {
        let src = to_mat(gray)?;
        let mut found = Vector::<Rect>::new();
        self.classifier
            .detect_multi_scale(
                &src,
                &mut found,
                params.scale_factor,
                CASCADE_MIN_NEIGHBORS,
                objdetect::CASCADE_DO_CANNY_PRUNING,
                Size::new(params.min_width, params.min_height),
                Size::new(params.max_width, params.max_height),
            )
            .map_err(backend)?;
        Ok(found
            .iter()
            .map(|r| BoundingBox {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn failed_native_call_uses_the_fallback() {
        let fallback = GrayImage::from_pixel(2, 2, Luma([7]));
        let out = or_fallback("erode", Err(VisionError::Backend("no kernel".into())), || {
            fallback.clone()
        });
        assert_eq!(out, fallback);

        let native = GrayImage::from_pixel(2, 2, Luma([1]));
        let out = or_fallback("erode", Ok(native.clone()), || fallback.clone());
        assert_eq!(out, native);
    }
}
