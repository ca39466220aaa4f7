use parking_lot::Mutex;
use scenery_vision::core_modules::frame::{BGR_CHANNELS, Frame};
use scenery_vision::error::{GraphError, SourceError};
use scenery_vision::nodes::{DetectorNode, ProbeNode, SourceNode, detector};
use scenery_vision::sources::FrameSupplier;
use scenery_vision::{Graph, NodeBehavior, Payload, PortSpec, PortType, ProcessConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Emits a boolean list one element longer on every run.
struct Growing {
    len: usize,
}

impl NodeBehavior for Growing {
    fn name(&self) -> &str {
        "growing"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }
    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("flags", PortType::Booleans)]
    }
    fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
        self.len += 1;
        outputs[0] = Payload::Booleans(vec![true; self.len]);
        Ok(())
    }
}

/// Blocks inside its step until released.
struct Gate {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
    runs: Arc<Mutex<u32>>,
}

impl NodeBehavior for Gate {
    fn name(&self) -> &str {
        "gate"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("flags", PortType::Booleans)]
    }
    fn outputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }
    fn step(&mut self, _inputs: &[Payload], _outputs: &mut [Payload]) -> Result<(), GraphError> {
        *self.runs.lock() += 1;
        let _ = self.entered.send(());
        let _ = self.release.recv();
        Ok(())
    }
}

struct Sink(PortType);

impl NodeBehavior for Sink {
    fn name(&self) -> &str {
        "sink"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("in", self.0)]
    }
    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("out", self.0)]
    }
    fn step(&mut self, inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
        outputs[0] = inputs[0].clone();
        Ok(())
    }
}

/// Takes a couple of milliseconds per step.
struct Slow {
    len: usize,
}

impl NodeBehavior for Slow {
    fn name(&self) -> &str {
        "slow"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }
    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("flags", PortType::Booleans)]
    }
    fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
        std::thread::sleep(Duration::from_millis(2));
        self.len += 1;
        outputs[0] = Payload::Booleans(vec![true; self.len]);
        Ok(())
    }
}

/// Keeps every payload it receives.
struct Recorder {
    seen: Arc<Mutex<Vec<Payload>>>,
}

impl NodeBehavior for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("flags", PortType::Booleans)]
    }
    fn outputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }
    fn step(&mut self, inputs: &[Payload], _outputs: &mut [Payload]) -> Result<(), GraphError> {
        self.seen.lock().push(inputs[0].clone());
        Ok(())
    }
}

/// Writes its name to a shared log when it runs.
struct Logged {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl NodeBehavior for Logged {
    fn name(&self) -> &str {
        self.name
    }
    fn inputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("in", PortType::Booleans)]
    }
    fn outputs(&self) -> Vec<PortSpec> {
        vec![PortSpec::new("out", PortType::Booleans)]
    }
    fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
        self.log.lock().push(self.name);
        outputs[0] = Payload::Booleans(vec![true]);
        Ok(())
    }
}

fn flag_len(payload: Option<Payload>) -> Option<usize> {
    match payload {
        Some(Payload::Booleans(flags)) => Some(flags.len()),
        _ => None,
    }
}

#[test]
fn busy_target_drops_the_update() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let runs = Arc::new(Mutex::new(0));

    let mut graph = Graph::new();
    let a = graph.add_node(Box::new(Growing { len: 0 }));
    let b = graph.add_node(Box::new(Gate {
        entered: entered_tx,
        release: release_rx,
        runs: Arc::clone(&runs),
    }));
    graph.connect(a.id(), 0, b.id(), 0).expect("connect");

    std::thread::scope(|scope| {
        let first = scope.spawn(|| a.invoke());
        entered_rx.recv().expect("gate entered");
        assert!(b.is_processing());

        // A is idle again and runs, but B is still busy with the first payload.
        assert!(graph.trigger(a.id()).expect("second run"));
        assert_eq!(flag_len(a.output(0)), Some(2));
        assert_eq!(flag_len(b.input(0)), Some(1));

        release_tx.send(()).expect("release");
        assert!(first.join().expect("thread").expect("first run"));
    });

    assert_eq!(*runs.lock(), 1);
    assert!(!b.is_processing());
}

#[test]
fn concurrent_invocations_never_deliver_empty_payloads() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut graph = Graph::new();
    let x = graph.add_node(Box::new(Slow { len: 0 }));
    let y = graph.add_node(Box::new(Recorder {
        seen: Arc::clone(&seen),
    }));
    graph.connect(x.id(), 0, y.id(), 0).expect("connect");

    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..100 {
                    x.invoke().expect("step");
                }
            });
        }
    });

    let seen = seen.lock();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|p| matches!(p, Payload::Booleans(flags) if !flags.is_empty())));
    assert!(flag_len(x.output(0)).is_some());
}

#[test]
fn propagation_is_depth_first_in_link_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut graph = Graph::new();
    let mut logged = |name| {
        graph.add_node(Box::new(Logged {
            name,
            log: Arc::clone(&log),
        }))
    };
    let (a, b, c, d) = (logged("a"), logged("b"), logged("c"), logged("d"));
    graph.connect(a.id(), 0, b.id(), 0).expect("a -> b");
    graph.connect(b.id(), 0, c.id(), 0).expect("b -> c");
    graph.connect(a.id(), 0, d.id(), 0).expect("a -> d");

    assert!(graph.trigger(a.id()).expect("run"));
    assert_eq!(*log.lock(), ["a", "b", "c", "d"]);
}

#[test]
fn mismatched_port_types_cannot_be_linked() {
    let mut graph = Graph::new();
    let a = graph.add_node(Box::new(Growing { len: 0 }));
    let b = graph.add_node(Box::new(Sink(PortType::Image)));
    let err = graph.connect(a.id(), 0, b.id(), 0).expect_err("type mismatch");
    assert!(matches!(
        err,
        GraphError::PortTypeMismatch {
            from: PortType::Booleans,
            to: PortType::Image
        }
    ));
    assert!(matches!(
        graph.connect(a.id(), 3, b.id(), 0),
        Err(GraphError::PortOutOfRange { .. })
    ));
}

#[test]
fn cycles_are_rejected() {
    let mut graph = Graph::new();
    let a = graph.add_node(Box::new(Sink(PortType::Points)));
    let b = graph.add_node(Box::new(Sink(PortType::Points)));
    let c = graph.add_node(Box::new(Sink(PortType::Points)));
    graph.connect(a.id(), 0, b.id(), 0).expect("a -> b");
    graph.connect(b.id(), 0, c.id(), 0).expect("b -> c");

    assert!(matches!(graph.connect(c.id(), 0, a.id(), 0), Err(GraphError::Cycle)));
    assert!(matches!(graph.connect(a.id(), 0, a.id(), 0), Err(GraphError::Cycle)));
}

#[test]
fn removed_node_stops_receiving() {
    let mut graph = Graph::new();
    let a = graph.add_node(Box::new(Growing { len: 0 }));
    let b = graph.add_node(Box::new(Sink(PortType::Booleans)));
    graph.connect(a.id(), 0, b.id(), 0).expect("connect");
    graph.set_position(b.id(), 10.0, 20.0).expect("position");
    assert_eq!(b.position(), (10.0, 20.0));

    let removed = graph.remove_node(b.id()).expect("remove");
    graph.trigger(a.id()).expect("run");
    assert!(removed.input(0).is_some_and(|p| p.is_empty()));
    assert!(graph.node(b.id()).is_none());
    assert!(!graph.disconnect(a.id(), 0, a.id(), 0).expect("nothing to remove"));
}

/// Moves one red pixel one step right per frame, then runs dry.
struct MovingDot {
    x: u32,
    frames: u32,
    released: Arc<AtomicBool>,
}

impl FrameSupplier for MovingDot {
    fn grab(&mut self, frame: &mut Frame) -> Result<(), SourceError> {
        if self.frames == 0 {
            return Err(SourceError::Exhausted);
        }
        self.frames -= 1;
        frame.reshape(8, 4, BGR_CHANNELS);
        frame.data.fill(0);
        frame.pixel_mut(self.x, 1).copy_from_slice(&[0, 0, 255]);
        self.x += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn source_worker_drives_the_pipeline() {
    let released = Arc::new(AtomicBool::new(false));
    let supplier = MovingDot {
        x: 0,
        frames: 4,
        released: Arc::clone(&released),
    };

    let mut graph = Graph::new();
    let source = graph.add_node(Box::new(SourceNode::new(Box::new(supplier), 2)));
    let detect = graph.add_node(Box::new(DetectorNode::new(ProcessConfig::new(8, 4))));
    let (probe, mut handle) = ProbeNode::new(vec![PortSpec::new("tracks", PortType::Record)]);
    let probe = graph.add_node(Box::new(probe));

    graph.connect(source.id(), 0, detect.id(), detector::IMAGE_INPUT).expect("source -> detector");
    graph
        .connect(detect.id(), detector::TRACKS_OUTPUT, probe.id(), 0)
        .expect("detector -> probe");

    graph.start_source(source.id(), Some(Duration::from_millis(1))).expect("start");
    let seen = tokio::time::timeout(Duration::from_secs(10), handle.wait_for(4)).await;
    assert_eq!(seen, Ok(true));

    graph.shutdown().await;
    assert!(released.load(Ordering::SeqCst));

    let latest = handle.latest(0).expect("port");
    let tracks = latest.as_tracks().expect("tracks");
    assert_eq!(tracks[0].age, 4);
    assert_eq!(tracks[0].point.x, 3.0);
}
