// THEORY:
// The `pipeline` module ties the core modules into one per-frame cycle, the
// `Process`. It is the unit of work a detector node runs on every frame:
//
//   Stage 1: Detection     - `RegionDetector` turns the frame into regions
//   Stage 2: Assignment    - `TrackAssigner` matches regions to track slots
//   Stage 3: Filtering     - `TrackFilter` smooths the slots over a short window
//   Stage 4: Feedback      - corrections made by the filter flow back into the
//                            assigner so track ages stay continuous
//
// Configuration changes can arrive from any thread through a `ProcessControl`
// handle. They are applied at the start of the next cycle, which is also the only
// place where resources such as cascade models are (re)acquired.

use crate::config::{DetectionMode, ProcessConfig};
use crate::core_modules::frame::{Frame, FrameView};
use crate::core_modules::region::Region;
use crate::core_modules::region_detector::RegionDetector;
use crate::core_modules::timing::TimingStats;
use crate::core_modules::track_filter::TrackFilter;
use crate::core_modules::tracker::{Track, TrackAssigner};
use crate::core_modules::vision::{Contour, ImageprocVision, VisionPrimitives};
use crate::error::DetectError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Everything one cycle produced.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub regions: Vec<Region>,
    /// Assigner output.
    pub tracks: Vec<Track>,
    /// Filter output, `W` frames behind `tracks`.
    pub filtered: Vec<Track>,
    /// Hit mask for color, motion and contour modes.
    pub mask: Option<FrameView>,
    pub contours: Vec<Contour>,
}

/// Thread-safe handle for changing a running `Process`'s configuration.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    pending: Arc<Mutex<Option<ProcessConfig>>>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a configuration; only the latest queued one is applied.
    pub fn update(&self, config: ProcessConfig) {
        *self.pending.lock() = Some(config);
    }

    pub fn take(&self) -> Option<ProcessConfig> {
        self.pending.lock().take()
    }
}

pub struct Process {
    config: ProcessConfig,
    detector: RegionDetector,
    assigner: TrackAssigner,
    filter: TrackFilter,
    timing: TimingStats,
}

impl Process {
    /// Creates a process on the pure-Rust vision backend.
    pub fn new(config: ProcessConfig) -> Self {
        Self::with_vision(config, Arc::new(ImageprocVision))
    }

    pub fn with_vision(config: ProcessConfig, vision: Arc<dyn VisionPrimitives>) -> Self {
        let mut detector = RegionDetector::new(config.width, config.height, vision);
        if let Some(path) = &config.cascade.model_path {
            // Failures are logged by the detector; cascade mode stays empty.
            let _ = detector.load_cascade(path);
        }
        Self {
            assigner: TrackAssigner::new(config.tracking),
            filter: TrackFilter::new(config.filter.half_window),
            detector,
            config,
            timing: TimingStats::default(),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn detector(&self) -> &RegionDetector {
        &self.detector
    }

    /// Current assigner slots.
    pub fn tracks(&self) -> &[Track] {
        self.assigner.tracks()
    }

    /// Mean cycle time of the last window of ten cycles, in milliseconds.
    pub fn timing_result(&self) -> f64 {
        self.timing.mean_ms()
    }

    /// Applies a new configuration.
    ///
    /// Changing the tracking parameters resizes the slots and clears the filter
    /// window. Changing the filter window clears it. A changed cascade path
    /// releases the old model and loads the new one.
    pub fn apply_config(&mut self, config: ProcessConfig) {
        let old = std::mem::replace(&mut self.config, config);
        let new = &self.config;

        if (old.width, old.height) != (new.width, new.height) {
            self.detector.resize(new.width, new.height);
        }
        if old.mode != new.mode {
            self.detector.reset_motion();
        }
        if old.cascade.model_path != new.cascade.model_path {
            if let Some(path) = &new.cascade.model_path {
                let _ = self.detector.load_cascade(path);
            }
        }
        if old.tracking != new.tracking {
            self.assigner.set_params(new.tracking);
            self.filter.clear();
        }
        if old.filter != new.filter {
            self.filter.set_half_window(new.filter.half_window);
        }
        debug!(mode = ?new.mode, "process configuration applied");
    }

    /// Applies the newest configuration queued on `control`, if any.
    pub fn apply_pending(&mut self, control: &ProcessControl) {
        if let Some(config) = control.take() {
            self.apply_config(config);
        }
    }

    /// Runs one full cycle on `frame`.
    pub fn step(&mut self, frame: &Frame) -> Result<ProcessOutput, DetectError> {
        let started = Instant::now();

        // Stage 1: Detection
        let detection = self.detector.detect(frame, &self.config)?;
        if self.config.mode == DetectionMode::None {
            self.record_timing(started);
            return Ok(ProcessOutput::default());
        }

        // Stage 2: Assignment
        let tracks = self.assigner.update(&detection.regions).to_vec();

        // Stage 3: Filtering
        let filtered = self.filter.push(&tracks);

        // Stage 4: Feedback
        if let Some(newest) = self.filter.newest() {
            self.assigner.restore(newest);
        }

        let mask = self
            .detector
            .hit_mask()
            .map(|mask| Arc::new(Frame::from_mask(mask)));

        self.record_timing(started);
        Ok(ProcessOutput {
            regions: detection.regions,
            tracks,
            filtered,
            mask,
            contours: detection.contours,
        })
    }

    fn record_timing(&mut self, started: Instant) {
        if let Some(mean) = self.timing.record(started.elapsed()) {
            debug!(mean_ms = mean.as_secs_f64() * 1000.0, "process timing");
        }
    }
}
