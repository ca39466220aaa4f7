// THEORY:
// A `Node` is one vertex of the dataflow graph: a behaviour (what the node does)
// wrapped in the machinery every node shares (ports, links, identity, timing and
// the processing flag).
//
// Execution model:
// 1.  **Claim**: A node runs only after winning the Idle -> Processing transition,
//     a single `compare_exchange` on an atomic flag. Two threads can never both
//     run the same node.
// 2.  **Step**: The behaviour reads its input payloads and writes its outputs
//     into a scratch copy, which replaces the ports once every type checks.
// 3.  **Release**: The outputs and their links are captured as `Deliveries`,
//     then the flag returns to Idle. Whatever another thread does to the node
//     afterwards, this step delivers exactly what it produced.
// 4.  **Propagate**: For every output port and every link, depth first, the
//     target is claimed, the payload is copied into the linked input and the
//     target runs synchronously on this thread. A target that is already busy
//     drops the update; there is no queue.
//
// Links hold `Weak` references, so the graph owns its nodes and a removed node
// simply stops receiving.

use super::port::{InputPort, Link, OutputPort, Payload, PortSpec};
use crate::core_modules::timing::TimingStats;
use crate::error::GraphError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// What a node does. Implemented by concrete node types.
pub trait NodeBehavior: Send {
    /// Human-readable node type name.
    fn name(&self) -> &str;

    fn inputs(&self) -> Vec<PortSpec>;

    fn outputs(&self) -> Vec<PortSpec>;

    /// Runs once. `outputs` holds the previous cycle's payloads on entry.
    fn step(&mut self, inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError>;

    /// Releases resources held by the behaviour.
    fn shutdown(&mut self) {}
}

pub struct Node {
    id: Uuid,
    name: String,
    processing: AtomicBool,
    behavior: Mutex<Box<dyn NodeBehavior>>,
    inputs: Mutex<Vec<InputPort>>,
    outputs: Mutex<Vec<OutputPort>>,
    position: Mutex<(f32, f32)>,
    timing: Mutex<TimingStats>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("processing", &self.is_processing())
            .finish()
    }
}

impl Node {
    pub fn new(behavior: Box<dyn NodeBehavior>) -> Arc<Self> {
        let inputs = behavior
            .inputs()
            .into_iter()
            .map(|spec| InputPort {
                spec,
                payload: Payload::Empty,
            })
            .collect();
        let outputs = behavior
            .outputs()
            .into_iter()
            .map(|spec| OutputPort {
                spec,
                payload: Payload::Empty,
                links: Vec::new(),
            })
            .collect();
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: behavior.name().to_string(),
            processing: AtomicBool::new(false),
            behavior: Mutex::new(behavior),
            inputs: Mutex::new(inputs),
            outputs: Mutex::new(outputs),
            position: Mutex::new((0.0, 0.0)),
            timing: Mutex::new(TimingStats::default()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn position(&self) -> (f32, f32) {
        *self.position.lock()
    }

    pub fn set_position(&self, x: f32, y: f32) {
        *self.position.lock() = (x, y);
    }

    /// Mean step time over the last window of ten steps, in milliseconds.
    pub fn timing_result(&self) -> f64 {
        self.timing.lock().mean_ms()
    }

    pub fn input_specs(&self) -> Vec<PortSpec> {
        self.inputs.lock().iter().map(|p| p.spec).collect()
    }

    pub fn output_specs(&self) -> Vec<PortSpec> {
        self.outputs.lock().iter().map(|p| p.spec).collect()
    }

    /// Latest payload received on an input port.
    pub fn input(&self, port: usize) -> Option<Payload> {
        self.inputs.lock().get(port).map(|p| p.payload.clone())
    }

    /// Latest payload produced on an output port.
    pub fn output(&self, port: usize) -> Option<Payload> {
        self.outputs.lock().get(port).map(|p| p.payload.clone())
    }

    /// Runs this node and everything downstream of it. Returns `false` when the
    /// node was busy and nothing ran.
    pub fn invoke(&self) -> Result<bool, GraphError> {
        match self.execute()? {
            Some(deliveries) => {
                deliveries.deliver();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Claims the node and runs its step without propagating. Returns `None`
    /// when the node was busy, otherwise the outputs captured by this step.
    pub fn execute(&self) -> Result<Option<Deliveries>, GraphError> {
        if !self.try_claim() {
            trace!(node = %self.name, "node busy; invocation dropped");
            return Ok(None);
        }
        self.run_claimed().map(Some)
    }

    /// Releases the behaviour's resources.
    pub fn shutdown(&self) {
        self.behavior.lock().shutdown();
    }

    pub(crate) fn try_claim(&self) -> bool {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn release(&self) {
        self.processing.store(false, Ordering::Release);
    }

    /// Claims the node and writes `payload` into an input. The caller must run
    /// the node afterwards. A busy node drops the payload.
    fn receive(&self, port: usize, payload: Payload) -> bool {
        if !self.try_claim() {
            trace!(node = %self.name, port, "node busy; update dropped");
            return false;
        }
        match self.inputs.lock().get_mut(port) {
            Some(input) => {
                input.payload = payload;
                true
            }
            None => {
                self.processing.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Runs the step of a node already claimed by this thread, then releases it.
    /// The outputs are captured while the claim is still held.
    fn run_claimed(&self) -> Result<Deliveries, GraphError> {
        let started = Instant::now();
        let result = self.step_once();
        self.processing.store(false, Ordering::Release);

        if let Some(mean) = self.timing.lock().record(started.elapsed()) {
            debug!(node = %self.name, mean_ms = mean.as_secs_f64() * 1000.0, "node timing");
        }
        result
    }

    fn step_once(&self) -> Result<Deliveries, GraphError> {
        let inputs: Vec<Payload> = self.inputs.lock().iter().map(|p| p.payload.clone()).collect();
        let mut scratch: Vec<Payload> = self.outputs.lock().iter().map(|p| p.payload.clone()).collect();

        self.behavior.lock().step(&inputs, &mut scratch)?;

        let mut ports = self.outputs.lock();
        for (index, (port, payload)) in ports.iter().zip(&scratch).enumerate() {
            if !payload.fits(port.spec.kind) {
                return Err(GraphError::PayloadType {
                    node: self.name.clone(),
                    index,
                    expected: port.spec.kind,
                    actual: payload.port_type().unwrap_or(port.spec.kind),
                });
            }
        }
        let captured = ports
            .iter_mut()
            .zip(scratch)
            .map(|(port, payload)| {
                port.payload = payload.clone();
                (payload, port.links.clone())
            })
            .collect();
        Ok(Deliveries { ports: captured })
    }

    pub(crate) fn add_link(&self, output: usize, link: Link) {
        if let Some(port) = self.outputs.lock().get_mut(output) {
            port.links.push(link);
        }
    }

    /// Removes matching links from one output port, or from all of them.
    pub(crate) fn remove_links(&self, output: Option<usize>, predicate: impl Fn(&Link) -> bool) -> usize {
        let mut removed = 0;
        for (index, port) in self.outputs.lock().iter_mut().enumerate() {
            if output.is_some_and(|o| o != index) {
                continue;
            }
            let before = port.links.len();
            port.links.retain(|link| !predicate(link));
            removed += before - port.links.len();
        }
        removed
    }

    /// Nodes directly downstream of this one.
    pub(crate) fn successors(&self) -> Vec<Arc<Node>> {
        self.outputs
            .lock()
            .iter()
            .flat_map(|port| port.links.iter().filter_map(|l| l.target.upgrade()))
            .collect()
    }
}

/// Output payloads and their links, captured when a step completes.
#[derive(Debug, Default)]
pub struct Deliveries {
    ports: Vec<(Payload, Vec<Link>)>,
}

impl Deliveries {
    /// Copies each payload into every linked input and runs the target, depth
    /// first. Busy targets and removed nodes are skipped.
    pub fn deliver(self) {
        for (payload, links) in self.ports {
            for link in links {
                let Some(target) = link.target.upgrade() else {
                    continue;
                };
                if !target.receive(link.port, payload.clone()) {
                    continue;
                }
                match target.run_claimed() {
                    Ok(next) => next.deliver(),
                    Err(err) => warn!(node = %target.name, error = %err, "node step failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::port::PortType;

    /// Adds one to a counter and forwards a boolean.
    struct Counter {
        runs: Arc<Mutex<u32>>,
    }

    impl NodeBehavior for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn inputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::new("in", PortType::Booleans)]
        }
        fn outputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::new("out", PortType::Booleans)]
        }
        fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
            *self.runs.lock() += 1;
            outputs[0] = Payload::Booleans(vec![true]);
            Ok(())
        }
    }

    struct WrongType;

    impl NodeBehavior for WrongType {
        fn name(&self) -> &str {
            "wrong"
        }
        fn inputs(&self) -> Vec<PortSpec> {
            Vec::new()
        }
        fn outputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::new("out", PortType::Image)]
        }
        fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
            outputs[0] = Payload::Points(Vec::new());
            Ok(())
        }
    }

    /// Emits one more `true` than the previous step.
    struct Lengthening {
        len: usize,
    }

    impl NodeBehavior for Lengthening {
        fn name(&self) -> &str {
            "lengthening"
        }
        fn inputs(&self) -> Vec<PortSpec> {
            Vec::new()
        }
        fn outputs(&self) -> Vec<PortSpec> {
            vec![PortSpec::new("out", PortType::Booleans)]
        }
        fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
            self.len += 1;
            outputs[0] = Payload::Booleans(vec![true; self.len]);
            Ok(())
        }
    }

    fn counter() -> (Arc<Node>, Arc<Mutex<u32>>) {
        let runs = Arc::new(Mutex::new(0));
        let node = Node::new(Box::new(Counter { runs: runs.clone() }));
        (node, runs)
    }

    #[test]
    fn invoke_runs_and_returns_to_idle() {
        let (node, runs) = counter();
        assert!(node.invoke().expect("step"));
        assert_eq!(*runs.lock(), 1);
        assert!(!node.is_processing());
        assert!(matches!(node.output(0), Some(Payload::Booleans(_))));
    }

    #[test]
    fn busy_node_drops_invocation() {
        let (node, runs) = counter();
        assert!(node.try_claim());
        assert!(!node.invoke().expect("no error"));
        assert_eq!(*runs.lock(), 0);
    }

    #[test]
    fn propagation_copies_into_linked_input() {
        let (a, _) = counter();
        let (b, b_runs) = counter();
        a.add_link(
            0,
            Link {
                target: Arc::downgrade(&b),
                port: 0,
            },
        );
        a.invoke().expect("step");
        assert_eq!(*b_runs.lock(), 1);
        assert!(matches!(b.input(0), Some(Payload::Booleans(v)) if v == vec![true]));
    }

    #[test]
    fn deliveries_carry_the_step_that_produced_them() {
        let source = Node::new(Box::new(Lengthening { len: 0 }));
        let (sink, _) = counter();
        source.add_link(
            0,
            Link {
                target: Arc::downgrade(&sink),
                port: 0,
            },
        );

        let first = source.execute().expect("step").expect("idle");
        let second = source.execute().expect("step").expect("idle");
        assert!(matches!(source.output(0), Some(Payload::Booleans(v)) if v.len() == 2));

        first.deliver();
        assert!(matches!(sink.input(0), Some(Payload::Booleans(v)) if v.len() == 1));
        second.deliver();
        assert!(matches!(sink.input(0), Some(Payload::Booleans(v)) if v.len() == 2));
    }

    #[test]
    fn wrong_payload_type_is_an_error() {
        let node = Node::new(Box::new(WrongType));
        assert!(matches!(node.invoke(), Err(GraphError::PayloadType { .. })));
        assert!(!node.is_processing());
    }

    #[test]
    fn dead_links_are_skipped() {
        let (a, _) = counter();
        {
            let (b, _) = counter();
            a.add_link(
                0,
                Link {
                    target: Arc::downgrade(&b),
                    port: 0,
                },
            );
        }
        assert!(a.invoke().expect("step"));
        assert!(a.successors().is_empty());
    }
}
