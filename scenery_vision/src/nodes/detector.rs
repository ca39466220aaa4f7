// THEORY:
// The detector node runs one `Process` cycle per incoming frame and spreads the
// results over typed output ports. Configuration updates queued on its
// `ProcessControl` are applied before the cycle, on the worker thread that owns
// the process, so the process itself never needs a lock.

use crate::config::ProcessConfig;
use crate::error::GraphError;
use crate::graph::{NodeBehavior, Payload, PortSpec, PortType, Record};
use crate::pipeline::{Process, ProcessControl};
use tracing::trace;

pub const IMAGE_INPUT: usize = 0;

pub const REGIONS_OUTPUT: usize = 0;
pub const TRACKS_OUTPUT: usize = 1;
pub const FILTERED_OUTPUT: usize = 2;
pub const MASK_OUTPUT: usize = 3;
pub const CONTOURS_OUTPUT: usize = 4;
/// Filtered track positions, one per slot.
pub const POINTS_OUTPUT: usize = 5;
/// Whether each filtered slot is live.
pub const ACTIVE_OUTPUT: usize = 6;

pub struct DetectorNode {
    process: Process,
    control: ProcessControl,
}

impl DetectorNode {
    pub fn new(config: ProcessConfig) -> Self {
        Self::with_process(Process::new(config))
    }

    pub fn with_process(process: Process) -> Self {
        Self {
            process,
            control: ProcessControl::new(),
        }
    }

    /// Handle for reconfiguring the node while its graph runs.
    pub fn control(&self) -> ProcessControl {
        self.control.clone()
    }
}

impl NodeBehavior for DetectorNode {
    fn name(&self) -> &str {
        "detector"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("image", PortType::Image)]
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::new("regions", PortType::Record),
            PortSpec::new("tracks", PortType::Record),
            PortSpec::new("filtered", PortType::Record),
            PortSpec::new("mask", PortType::Image),
            PortSpec::new("contours", PortType::Record),
            PortSpec::new("points", PortType::Points),
            PortSpec::new("active", PortType::Booleans),
        ]
    }

    fn step(&mut self, inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
        self.process.apply_pending(&self.control);

        let Some(frame) = inputs.get(IMAGE_INPUT).and_then(Payload::as_image) else {
            trace!("detector ran without a frame");
            return Ok(());
        };
        let out = self.process.step(frame)?;

        outputs[POINTS_OUTPUT] = Payload::Points(out.filtered.iter().map(|t| t.point).collect());
        outputs[ACTIVE_OUTPUT] = Payload::Booleans(out.filtered.iter().map(|t| t.is_live()).collect());
        outputs[REGIONS_OUTPUT] = Payload::Record(Record::Regions(out.regions));
        outputs[TRACKS_OUTPUT] = Payload::Record(Record::Tracks(out.tracks));
        outputs[FILTERED_OUTPUT] = Payload::Record(Record::Tracks(out.filtered));
        outputs[MASK_OUTPUT] = out.mask.map_or(Payload::Empty, Payload::Image);
        outputs[CONTOURS_OUTPUT] = Payload::Record(Record::Contours(out.contours));
        Ok(())
    }
}
