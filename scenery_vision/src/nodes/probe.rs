use crate::error::GraphError;
use crate::graph::{NodeBehavior, Payload, PortSpec};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Sink node that keeps the latest payload of each input for code outside the
/// graph. It has no outputs.
pub struct ProbeNode {
    inputs: Vec<PortSpec>,
    latest: Arc<Mutex<Vec<Payload>>>,
    updates: watch::Sender<u64>,
}

/// Read side of a `ProbeNode`. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    latest: Arc<Mutex<Vec<Payload>>>,
    updates: watch::Receiver<u64>,
}

impl ProbeNode {
    pub fn new(inputs: Vec<PortSpec>) -> (Self, ProbeHandle) {
        let latest = Arc::new(Mutex::new(vec![Payload::Empty; inputs.len()]));
        let (updates, rx) = watch::channel(0);
        let handle = ProbeHandle {
            latest: Arc::clone(&latest),
            updates: rx,
        };
        (
            Self {
                inputs,
                latest,
                updates,
            },
            handle,
        )
    }
}

impl NodeBehavior for ProbeNode {
    fn name(&self) -> &str {
        "probe"
    }

    fn inputs(&self) -> Vec<PortSpec> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<PortSpec> {
        Vec::new()
    }

    fn step(&mut self, inputs: &[Payload], _outputs: &mut [Payload]) -> Result<(), GraphError> {
        let mut latest = self.latest.lock();
        for (slot, payload) in latest.iter_mut().zip(inputs) {
            slot.clone_from(payload);
        }
        drop(latest);
        self.updates.send_modify(|count| *count += 1);
        Ok(())
    }
}

impl ProbeHandle {
    /// Latest payload seen on input `port`.
    pub fn latest(&self, port: usize) -> Option<Payload> {
        self.latest.lock().get(port).cloned()
    }

    /// Number of times the probe has run. Every delivery runs it once, so a
    /// probe fed by two links of the same node counts two per upstream run.
    pub fn updates(&self) -> u64 {
        *self.updates.borrow()
    }

    /// Waits until the probe has run at least `count` times. Returns `false` if
    /// the probe was dropped first.
    pub async fn wait_for(&mut self, count: u64) -> bool {
        self.updates.wait_for(|seen| *seen >= count).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, Node, NodeBehavior, PortType};

    /// Writes one flag to each of its two outputs.
    struct Pair;

    impl NodeBehavior for Pair {
        fn name(&self) -> &str {
            "pair"
        }
        fn inputs(&self) -> Vec<PortSpec> {
            Vec::new()
        }
        fn outputs(&self) -> Vec<PortSpec> {
            vec![
                PortSpec::new("left", PortType::Booleans),
                PortSpec::new("right", PortType::Booleans),
            ]
        }
        fn step(&mut self, _inputs: &[Payload], outputs: &mut [Payload]) -> Result<(), GraphError> {
            outputs[0] = Payload::Booleans(vec![true]);
            outputs[1] = Payload::Booleans(vec![false]);
            Ok(())
        }
    }

    #[tokio::test]
    async fn probe_records_inputs_and_counts_runs() {
        let (mut probe, mut handle) = ProbeNode::new(vec![PortSpec::new("flags", PortType::Booleans)]);
        probe
            .step(&[Payload::Booleans(vec![true, false])], &mut [])
            .expect("step");

        assert!(handle.wait_for(1).await);
        assert_eq!(handle.updates(), 1);
        assert!(matches!(handle.latest(0), Some(Payload::Booleans(b)) if b == vec![true, false]));
        assert!(handle.latest(1).is_none());
    }

    #[test]
    fn update_count_follows_deliveries_not_upstream_runs() {
        let flags = || PortSpec::new("flags", PortType::Booleans);
        let mut graph = Graph::new();
        let pair = graph.add_node(Box::new(Pair));
        let (both, both_handle) = ProbeNode::new(vec![flags(), flags()]);
        let (left, left_handle) = ProbeNode::new(vec![flags()]);
        let both = graph.add_node(Box::new(both));
        let left = graph.add_node(Box::new(left));
        graph.connect(pair.id(), 0, both.id(), 0).expect("left -> both");
        graph.connect(pair.id(), 1, both.id(), 1).expect("right -> both");
        graph.connect(pair.id(), 0, left.id(), 0).expect("left -> left");

        for _ in 0..3 {
            graph.trigger(pair.id()).expect("run");
        }
        assert_eq!(both_handle.updates(), 6);
        assert_eq!(left_handle.updates(), 3);
        assert!(matches!(both_handle.latest(1), Some(Payload::Booleans(b)) if b == vec![false]));
    }

    #[tokio::test]
    async fn dropped_probe_ends_the_wait() {
        let (probe, mut handle) = ProbeNode::new(Vec::new());
        let node = Node::new(Box::new(probe));
        drop(node);
        assert!(!handle.wait_for(1).await);
    }
}
