// THEORY:
// The `RegionDetector` is the per-frame scan of the engine. Given one BGR frame and
// the active `DetectionMode`, it produces an ordered list of candidate `Region`s
// and, for mask-based modes, a binary hit mask of the same size as the frame.
//
// Key architectural principles:
// 1.  **Per-pixel loops stay here**: Color thresholding and frame differencing are
//     tight loops over the raw buffer. Color uses the process-wide HSV table.
// 2.  **Neighbourhood work is delegated**: Clustering, edges, contours, Hough and
//     cascade evaluation go through `VisionPrimitives`.
// 3.  **Real-plane conversion**: Mask-based modes run every region through the
//     inverse calibration transform. Cascade and circle regions stay in pixel
//     space only.
// 4.  **Failure policy**: A frame of the wrong size is an error. A missing or
//     unsupported resource (no cascade model, no Hough support) yields an empty
//     region list and a log line, never an error.

use super::frame::{BGR_CHANNELS, Frame};
use super::pixel::pixel::{HsvRange, channel_difference, hsv_of_bgr};
use super::region::{Point2, Region, Size2};
use super::transform::Transform2D;
use super::vision::{CascadeModel, Contour, MASK_ON, VisionPrimitives};
use crate::config::{DetectionMode, ProcessConfig};
use crate::error::{DetectError, VisionError};
use image::GrayImage;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Everything one detection cycle produced.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Regions in scan order.
    pub regions: Vec<Region>,
    /// Traced outlines, contour mode only.
    pub contours: Vec<Contour>,
}

pub struct RegionDetector {
    width: u32,
    height: u32,
    vision: Arc<dyn VisionPrimitives>,
    hit_mask: GrayImage,
    /// Whether `hit_mask` belongs to the last cycle.
    mask_valid: bool,
    previous: Option<Frame>,
    cascade: Option<Box<dyn CascadeModel>>,
    /// Unsupported-primitive warnings already emitted, to avoid one per frame.
    reported: Vec<&'static str>,
}

impl RegionDetector {
    pub fn new(width: u32, height: u32, vision: Arc<dyn VisionPrimitives>) -> Self {
        Self {
            width,
            height,
            vision,
            hit_mask: GrayImage::new(width, height),
            mask_valid: false,
            previous: None,
            cascade: None,
            reported: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Changes the expected frame size; motion history and the mask are reset.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.hit_mask = GrayImage::new(width, height);
        self.mask_valid = false;
        self.previous = None;
    }

    /// The hit mask of the last cycle, for color, motion and contour modes.
    pub fn hit_mask(&self) -> Option<&GrayImage> {
        self.mask_valid.then_some(&self.hit_mask)
    }

    pub fn has_cascade(&self) -> bool {
        self.cascade.is_some()
    }

    /// Replaces the cascade model. An empty path is ignored. On failure cascade
    /// detection stays disabled until a valid model is loaded.
    pub fn load_cascade(&mut self, path: &Path) -> Result<(), VisionError> {
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        // Release the old model before acquiring the new one.
        self.cascade = None;
        match self.vision.load_cascade(path) {
            Ok(model) => {
                info!(path = %path.display(), "cascade model loaded");
                self.cascade = Some(model);
                Ok(())
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cascade detection disabled");
                Err(err)
            }
        }
    }

    pub fn unload_cascade(&mut self) {
        self.cascade = None;
    }

    /// Forgets the previous frame used by motion mode.
    pub fn reset_motion(&mut self) {
        self.previous = None;
    }

    /// Runs one detection cycle.
    pub fn detect(
        &mut self,
        frame: &Frame,
        config: &ProcessConfig,
    ) -> Result<Detection, DetectError> {
        self.mask_valid = false;
        if config.mode == DetectionMode::None {
            return Ok(Detection::default());
        }
        self.check_dimensions(frame)?;

        let detection = match config.mode {
            DetectionMode::None => Detection::default(),
            DetectionMode::Color => {
                self.find_color(frame, config.color.into());
                self.mask_regions(config)
            }
            DetectionMode::Motion => {
                self.find_motion(frame, config.motion.sensitivity);
                let detection = self.mask_regions(config);
                self.remember(frame);
                detection
            }
            DetectionMode::Cascade => self.find_cascade(frame, config),
            DetectionMode::Contour => self.find_contours(frame, config),
            DetectionMode::Circle => self.find_circles(frame, config),
        };

        trace!(
            mode = ?config.mode,
            regions = detection.regions.len(),
            "detection cycle"
        );
        Ok(detection)
    }

    fn check_dimensions(&self, frame: &Frame) -> Result<(), DetectError> {
        if frame.width != self.width || frame.height != self.height || frame.channels != BGR_CHANNELS
        {
            return Err(DetectError::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: frame.width,
                actual_height: frame.height,
                actual_channels: frame.channels,
            });
        }
        let expected = self.width as usize * self.height as usize * BGR_CHANNELS as usize;
        if frame.data.len() != expected {
            return Err(DetectError::BufferLength {
                expected,
                actual: frame.data.len(),
            });
        }
        Ok(())
    }

    fn find_color(&mut self, frame: &Frame, range: HsvRange) {
        for (hit, bgr) in self
            .hit_mask
            .iter_mut()
            .zip(frame.data.chunks_exact(BGR_CHANNELS as usize))
        {
            *hit = if range.contains(hsv_of_bgr(bgr)) { MASK_ON } else { 0 };
        }
        self.mask_valid = true;
    }

    fn find_motion(&mut self, frame: &Frame, sensitivity: u32) {
        match &self.previous {
            Some(previous) => {
                let c = BGR_CHANNELS as usize;
                for ((hit, now), before) in self
                    .hit_mask
                    .iter_mut()
                    .zip(frame.data.chunks_exact(c))
                    .zip(previous.data.chunks_exact(c))
                {
                    *hit = if channel_difference(now, before) > sensitivity {
                        MASK_ON
                    } else {
                        0
                    };
                }
            }
            // Nothing to compare against on the first cycle.
            None => self.hit_mask.fill(0),
        }
        self.mask_valid = true;
    }

    fn remember(&mut self, frame: &Frame) {
        match &mut self.previous {
            Some(previous) => {
                previous.data.clear();
                previous.data.extend_from_slice(&frame.data);
                previous.timestamp = frame.timestamp;
            }
            None => self.previous = Some(frame.clone()),
        }
    }

    fn find_cascade(&mut self, frame: &Frame, config: &ProcessConfig) -> Detection {
        let Some(model) = self.cascade.as_mut() else {
            return Detection::default();
        };
        let gray = frame.to_gray();
        match model.detect(&gray, &config.cascade.params.sanitized()) {
            Ok(boxes) => Detection {
                regions: boxes
                    .iter()
                    .map(|b| {
                        Region::from_pixels(b.center(), Size2::new(b.width as f64, b.height as f64))
                    })
                    .collect(),
                contours: Vec::new(),
            },
            Err(err) => {
                self.report(err);
                Detection::default()
            }
        }
    }

    fn find_contours(&mut self, frame: &Frame, config: &ProcessConfig) -> Detection {
        let gray = frame.to_gray();
        let traced = self
            .vision
            .edges(&gray, &config.contour)
            .and_then(|edges| Ok((self.vision.contours(&edges)?, edges)));
        match traced {
            Ok((contours, edges)) => {
                self.hit_mask = edges;
                self.mask_valid = true;
                let mut detection = self.mask_regions(config);
                detection.contours = contours;
                detection
            }
            Err(err) => {
                self.report(err);
                Detection::default()
            }
        }
    }

    fn find_circles(&mut self, frame: &Frame, config: &ProcessConfig) -> Detection {
        let gray = frame.to_gray();
        match self.vision.circles(&gray, &config.circle) {
            Ok(circles) => Detection {
                regions: circles
                    .iter()
                    .map(|c| {
                        let diameter = c.radius * 2.0;
                        Region::from_pixels(c.center, Size2::new(diameter, diameter))
                    })
                    .collect(),
                contours: Vec::new(),
            },
            Err(err) => {
                self.report(err);
                Detection::default()
            }
        }
    }

    /// Filters the hit mask, clusters it and converts clusters into regions.
    fn mask_regions(&mut self, config: &ProcessConfig) -> Detection {
        let filters = config.mask;
        if filters.erosion_size > 0 {
            self.hit_mask = self.vision.erode(&self.hit_mask, filters.erosion_size);
        }
        if filters.dilation_size > 0 {
            self.hit_mask = self.vision.dilate(&self.hit_mask, filters.dilation_size);
        }
        if filters.blur_size > 0 {
            self.hit_mask = self.vision.blur(&self.hit_mask, filters.blur_size);
        }

        let regions = self
            .vision
            .clusters(&self.hit_mask, config.clustering.min_area)
            .into_iter()
            .map(|cluster| to_real_plane(&config.transform, cluster.center, cluster.size))
            .collect();

        Detection {
            regions,
            contours: Vec::new(),
        }
    }

    fn report(&mut self, err: VisionError) {
        match err {
            VisionError::Unsupported(what) if self.reported.contains(&what) => {
                debug!(primitive = what, "unsupported primitive skipped");
            }
            VisionError::Unsupported(what) => {
                warn!(primitive = what, "vision backend cannot run this mode; output is empty");
                self.reported.push(what);
            }
            other => warn!(error = %other, "detection failed; output is empty"),
        }
    }
}

fn to_real_plane(transform: &Transform2D, point: Point2, size: Size2) -> Region {
    let mut region = Region::from_pixels(point, size);
    transform.apply_to_region(&mut region);
    region
}
