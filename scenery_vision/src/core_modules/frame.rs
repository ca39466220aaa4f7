// THEORY:
// A `Frame` is the raw unit of work that flows from a capture source into the
// detector. It is a packed, row-major, channel-interleaved byte buffer plus the
// metadata needed to interpret it. Color frames are always BGR with three
// channels; single-channel frames are used for binary hit masks.
//
// Frames are shared read-only between nodes as `FrameView` (an `Arc<Frame>`), so
// handing a frame to several downstream consumers never copies pixels.

use image::{GrayImage, Luma};
use std::sync::Arc;
use std::time::Instant;

/// Number of channels in a color frame (B, G, R).
pub const BGR_CHANNELS: u32 = 3;
/// Number of channels in a mask frame.
pub const MASK_CHANNELS: u32 = 1;

/// Shared, read-only handle to a frame.
pub type FrameView = Arc<Frame>;

#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Row-major, channel-interleaved bytes. Color frames are BGR.
    pub data: Vec<u8>,
    pub timestamp: Instant,
}

impl Frame {
    /// Creates a zeroed frame.
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0; (width * height * channels) as usize],
            timestamp: Instant::now(),
        }
    }

    /// Wraps an existing BGR buffer. Returns `None` when the buffer length does
    /// not match the dimensions.
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != (width * height * BGR_CHANNELS) as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            channels: BGR_CHANNELS,
            data,
            timestamp: Instant::now(),
        })
    }

    /// Converts a binary mask into a single-channel frame.
    pub fn from_mask(mask: &GrayImage) -> Self {
        Self {
            width: mask.width(),
            height: mask.height(),
            channels: MASK_CHANNELS,
            data: mask.as_raw().clone(),
            timestamp: Instant::now(),
        }
    }

    /// Changes the dimensions, keeping the allocation when it is large enough.
    pub fn reshape(&mut self, width: u32, height: u32, channels: u32) {
        self.width = width;
        self.height = height;
        self.channels = channels;
        self.data.resize((width * height * channels) as usize, 0);
    }

    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the channel bytes of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let start = (y * self.width + x) as usize * c;
        &self.data[start..start + c]
    }

    /// Mutable access to the channel bytes of the pixel at `(x, y)`.
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let c = self.channels as usize;
        let start = (y * self.width + x) as usize * c;
        &mut self.data[start..start + c]
    }

    /// Rec. 601 luminance image of a BGR frame. Mask frames are copied as-is.
    pub fn to_gray(&self) -> GrayImage {
        if self.channels == MASK_CHANNELS {
            return GrayImage::from_raw(self.width, self.height, self.data.clone())
                .unwrap_or_else(|| GrayImage::new(self.width, self.height));
        }
        let c = self.channels as usize;
        let mut gray = GrayImage::new(self.width, self.height);
        for (i, px) in gray.pixels_mut().enumerate() {
            let p = &self.data[i * c..i * c + c];
            let luma = 0.114 * p[0] as f64 + 0.587 * p[1] as f64 + 0.299 * p[2] as f64;
            *px = Luma([luma.round().clamp(0.0, 255.0) as u8]);
        }
        gray
    }
}
