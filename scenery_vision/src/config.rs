// THEORY:
// All tunable behaviour of a detector lives in one serializable `ProcessConfig`.
// Every field has a working default, and every section is `#[serde(default)]`, so a
// configuration file only needs to mention what it changes:
//
//     { "mode": "motion", "motion": { "sensitivity": 60 }, "filter": { "half_window": 1 } }
//
// Configurations are plain JSON files, loaded and saved through `serde_json`.

use crate::core_modules::pixel::pixel::HsvRange;
use crate::core_modules::tracker::TrackingParams;
use crate::core_modules::transform::Transform2D;
use crate::core_modules::vision::{CascadeParams, CircleParams, ContourParams};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which detector runs each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    /// Do nothing; every output is empty.
    None,
    /// HSV color thresholding.
    #[default]
    Color,
    /// Frame differencing against the previous frame.
    Motion,
    /// Cascade-classifier object detection.
    Cascade,
    /// Edge detection and contour tracing.
    Contour,
    /// Circle Hough transform.
    Circle,
}

impl DetectionMode {
    /// Modes that build a binary hit mask and cluster it.
    pub fn uses_hit_mask(&self) -> bool {
        matches!(self, Self::Color | Self::Motion | Self::Contour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorParams {
    pub hue_min: u8,
    pub hue_max: u8,
    pub saturation_min: u8,
    pub value_min: u8,
    pub invert: bool,
}

impl Default for ColorParams {
    fn default() -> Self {
        Self {
            hue_min: 0,
            hue_max: 50,
            saturation_min: 50,
            value_min: 50,
            invert: false,
        }
    }
}

impl From<ColorParams> for HsvRange {
    fn from(p: ColorParams) -> Self {
        HsvRange {
            hue_min: p.hue_min,
            hue_max: p.hue_max,
            saturation_min: p.saturation_min,
            value_min: p.value_min,
            invert: p.invert,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    /// A pixel is a hit when the summed channel difference exceeds this.
    pub sensitivity: u32,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self { sensitivity: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Model file to load. `None` or an empty path leaves the current model in place.
    pub model_path: Option<PathBuf>,
    #[serde(flatten)]
    pub params: CascadeParams,
}

/// Morphology applied to the hit mask before clustering. 0 disables a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskFilterParams {
    pub erosion_size: u8,
    pub dilation_size: u8,
    pub blur_size: u8,
}

impl MaskFilterParams {
    pub fn is_identity(&self) -> bool {
        self.erosion_size == 0 && self.dilation_size == 0 && self.blur_size == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Connected components with fewer pixels are ignored.
    pub min_area: u32,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self { min_area: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Half-width `W` of the `2W + 1` smoothing window; 0 disables filtering.
    pub half_window: usize,
}

/// Complete configuration of one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Expected frame width in pixels.
    pub width: u32,
    /// Expected frame height in pixels.
    pub height: u32,
    pub mode: DetectionMode,
    pub color: ColorParams,
    pub motion: MotionParams,
    pub cascade: CascadeConfig,
    pub contour: ContourParams,
    pub circle: CircleParams,
    pub mask: MaskFilterParams,
    pub clustering: ClusterParams,
    pub tracking: TrackingParams,
    pub filter: FilterParams,
    /// Calibration between pixels and the real plane.
    pub transform: Transform2D,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl ProcessConfig {
    /// Default configuration for frames of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: DetectionMode::default(),
            color: ColorParams::default(),
            motion: MotionParams::default(),
            cascade: CascadeConfig::default(),
            contour: ContourParams::default(),
            circle: CircleParams::default(),
            mask: MaskFilterParams::default(),
            clustering: ClusterParams::default(),
            tracking: TrackingParams::default(),
            filter: FilterParams::default(),
            transform: Transform2D::identity(width),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
