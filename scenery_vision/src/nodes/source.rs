use crate::core_modules::frame_buffer::FrameBuffer;
use crate::error::GraphError;
use crate::graph::{NodeBehavior, Payload, PortSpec, PortType};
use crate::sources::FrameSupplier;
use std::sync::Arc;
use tracing::info;

/// Output port carrying the captured frame.
pub const IMAGE_OUTPUT: usize = 0;

/// Pulls frames from a `FrameSupplier` into a frame ring and publishes the
/// newest one. Has no inputs; meant to be driven by a source worker.
pub struct SourceNode {
    supplier: Box<dyn FrameSupplier>,
    buffer: Arc<FrameBuffer>,
}

impl SourceNode {
    pub fn new(supplier: Box<dyn FrameSupplier>, buffer_depth: usize) -> Self {
        Self {
            supplier,
            buffer: Arc::new(FrameBuffer::new(buffer_depth)),
        }
    }

    /// Shared handle to the frame ring, for readers outside the graph.
    pub fn buffer(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.buffer)
    }
}

impl NodeBehavior for SourceNode {
    fn name(&self) -> &str {
        "source"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("image", PortType::Image)]
    }

    fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
        let mut frame = self.buffer.begin_write();
        if let Err(err) = self.supplier.grab(&mut frame) {
            self.buffer.cancel_write(frame);
            return Err(err.into());
        }
        outputs[IMAGE_OUTPUT] = Payload::Image(self.buffer.commit(frame));
        Ok(())
    }

    fn shutdown(&mut self) {
        self.supplier.release();
        info!(frames = self.buffer.frames_written(), fps = self.buffer.fps(), "source released");
    }
}
