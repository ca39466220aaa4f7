// THEORY:
// A `FrameSupplier` is anything that can fill a `Frame` with the next picture:
// a directory of still images, a video file, a camera. Suppliers are driven by a
// source node on its own worker, so `grab` is allowed to block.
//
// Key architectural principles:
// 1.  **Fill, don't allocate**: `grab` writes into a frame handed out by the
//     frame buffer, reshaping it only when the dimensions change.
// 2.  **Always BGR**: Whatever the decoder produces, the frame leaves the supplier
//     as three-channel BGR.
// 3.  **Explicit end of stream**: A finite supplier reports
//     `SourceError::Exhausted`, which stops its worker cleanly.

use crate::core_modules::frame::{BGR_CHANNELS, Frame};
use crate::error::SourceError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub trait FrameSupplier: Send {
    /// Writes the next picture into `frame`.
    fn grab(&mut self, frame: &mut Frame) -> Result<(), SourceError>;

    /// Releases the underlying device or file handle.
    fn release(&mut self) {}
}

/// Plays the image files of a directory in file-name order.
#[derive(Debug, Clone)]
pub struct ImageSequenceSupplier {
    paths: Vec<PathBuf>,
    next: usize,
    looping: bool,
}

impl ImageSequenceSupplier {
    /// Collects the `png`, `jpg`, `jpeg` and `bmp` files of `dir`.
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let io = |source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io)? {
            let path = entry.map_err(io)?.path();
            if path.is_file() && is_image(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        info!(dir = %dir.display(), images = paths.len(), "image sequence opened");
        Ok(Self::from_paths(paths, looping))
    }

    pub fn from_paths(paths: Vec<PathBuf>, looping: bool) -> Self {
        Self {
            paths,
            next: 0,
            looping,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

impl FrameSupplier for ImageSequenceSupplier {
    fn grab(&mut self, frame: &mut Frame) -> Result<(), SourceError> {
        if self.paths.is_empty() {
            return Err(SourceError::Exhausted);
        }
        if self.next >= self.paths.len() {
            if !self.looping {
                return Err(SourceError::Exhausted);
            }
            self.next = 0;
        }
        let path = &self.paths[self.next];
        self.next += 1;

        let rgb = image::open(path)
            .map_err(|source| SourceError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgb8();

        frame.reshape(rgb.width(), rgb.height(), BGR_CHANNELS);
        for (dst, src) in frame.data.chunks_exact_mut(3).zip(rgb.as_raw().chunks_exact(3)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
        }
        debug!(path = %path.display(), "image decoded");
        Ok(())
    }
}

/// Where a source node takes its frames from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceKind {
    ImageSequence { dir: PathBuf, looping: bool },
    Camera { index: i32 },
    VideoFile { path: PathBuf },
}

/// Serializable description of a frame source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub source: SourceKind,
    /// Minimum time between two frames, in milliseconds. `0` runs flat out.
    pub cadence_ms: u64,
    /// Slots in the source's frame ring.
    pub buffer_depth: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Camera { index: 0 },
            cadence_ms: 33,
            buffer_depth: crate::core_modules::frame_buffer::DEFAULT_DEPTH,
        }
    }
}

impl SourceConfig {
    pub fn cadence(&self) -> Option<Duration> {
        (self.cadence_ms > 0).then(|| Duration::from_millis(self.cadence_ms))
    }

    /// Opens the configured supplier.
    pub fn open(&self) -> Result<Box<dyn FrameSupplier>, SourceError> {
        match &self.source {
            SourceKind::ImageSequence { dir, looping } => {
                Ok(Box::new(ImageSequenceSupplier::open(dir, *looping)?))
            }
            #[cfg(feature = "opencv")]
            SourceKind::Camera { index } => Ok(Box::new(VideoCaptureSupplier::camera(*index)?)),
            #[cfg(feature = "opencv")]
            SourceKind::VideoFile { path } => Ok(Box::new(VideoCaptureSupplier::file(path)?)),
            #[cfg(not(feature = "opencv"))]
            SourceKind::Camera { .. } | SourceKind::VideoFile { .. } => Err(SourceError::Capture(
                "video capture requires the `opencv` feature".into(),
            )),
        }
    }
}

#[cfg(feature = "opencv")]
pub use capture::VideoCaptureSupplier;

#[cfg(feature = "opencv")]
mod capture {
    use super::FrameSupplier;
    use crate::core_modules::frame::{BGR_CHANNELS, Frame};
    use crate::error::SourceError;
    use opencv::{
        core::Mat,
        prelude::*,
        videoio::{self, VideoCapture},
    };
    use std::path::Path;
    use tracing::info;

    fn capture(err: opencv::Error) -> SourceError {
        SourceError::Capture(err.to_string())
    }

    /// Camera or video-file supplier backed by OpenCV's `VideoCapture`.
    pub struct VideoCaptureSupplier {
        cap: Option<VideoCapture>,
        mat: Mat,
    }

    impl VideoCaptureSupplier {
        pub fn camera(index: i32) -> Result<Self, SourceError> {
            let cap = VideoCapture::new(index, videoio::CAP_ANY).map_err(capture)?;
            info!(index, "camera opened");
            Self::checked(cap)
        }

        pub fn file(path: &Path) -> Result<Self, SourceError> {
            let name = path.to_string_lossy();
            let cap = VideoCapture::from_file(&name, videoio::CAP_ANY).map_err(capture)?;
            info!(path = %name, "video file opened");
            Self::checked(cap)
        }

        fn checked(cap: VideoCapture) -> Result<Self, SourceError> {
            if !cap.is_opened().map_err(capture)? {
                return Err(SourceError::NotOpen);
            }
            Ok(Self {
                cap: Some(cap),
                mat: Mat::default(),
            })
        }
    }

    impl FrameSupplier for VideoCaptureSupplier {
        fn grab(&mut self, frame: &mut Frame) -> Result<(), SourceError> {
            let cap = self.cap.as_mut().ok_or(SourceError::NotOpen)?;
            if !cap.read(&mut self.mat).map_err(capture)? || self.mat.empty() {
                return Err(SourceError::Exhausted);
            }
            if self.mat.channels() != BGR_CHANNELS as i32 {
                return Err(SourceError::Capture(format!(
                    "expected a 3-channel frame, got {}",
                    self.mat.channels()
                )));
            }
            frame.reshape(self.mat.cols() as u32, self.mat.rows() as u32, BGR_CHANNELS);
            let bytes = self.mat.data_bytes().map_err(capture)?;
            if bytes.len() != frame.data.len() {
                return Err(SourceError::Capture("unexpected frame layout".into()));
            }
            frame.data.copy_from_slice(bytes);
            Ok(())
        }

        fn release(&mut self) {
            if let Some(mut cap) = self.cap.take() {
                let _ = cap.release();
                info!("capture released");
            }
        }
    }
}
