// THEORY:
// The `Graph` owns a set of nodes and the typed links between their ports. It is
// the controller-facing API: add and remove nodes, connect and disconnect ports,
// trigger a node by hand, and start or stop the workers that drive source nodes.
//
// Key architectural principles:
// 1.  **Typed edges**: An output can only be linked to an input of the same
//     `PortType`; port types never change after a node is created.
// 2.  **Acyclic by construction**: `connect` refuses any link that would let a
//     node reach itself, so depth-first propagation always terminates.
// 3.  **Ownership**: The graph owns its nodes; callers may keep handles. Links
//     are weak, so a removed node never leaves a dangling pointer, only a link
//     that is skipped and pruned.
// 4.  **Orderly shutdown**: `shutdown` signals every worker and joins them all,
//     so capture devices are released before it returns.

pub mod node;
pub mod port;
pub mod worker;

pub use node::{Deliveries, Node, NodeBehavior};
pub use port::{Link, Payload, PortSpec, PortType, Record};
pub use worker::SourceWorker;

use crate::error::GraphError;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
pub struct Graph {
    nodes: Vec<Arc<Node>>,
    workers: Vec<SourceWorker>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns a handle to it.
    pub fn add_node(&mut self, behavior: Box<dyn NodeBehavior>) -> Arc<Node> {
        let node = Node::new(behavior);
        debug!(node = %node.name(), id = %node.id(), "node added");
        self.nodes.push(Arc::clone(&node));
        node
    }

    pub fn node(&self, id: Uuid) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| n.id() == id).cloned()
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn set_position(&self, id: Uuid, x: f32, y: f32) -> Result<(), GraphError> {
        self.require(id)?.set_position(x, y);
        Ok(())
    }

    /// Links output `output` of `from` to input `input` of `to`.
    pub fn connect(
        &self,
        from: Uuid,
        output: usize,
        to: Uuid,
        input: usize,
    ) -> Result<(), GraphError> {
        let source = self.require(from)?;
        let target = self.require(to)?;

        let out_spec = *source
            .output_specs()
            .get(output)
            .ok_or_else(|| GraphError::PortOutOfRange {
                node: source.name().to_string(),
                direction: "output",
                index: output,
            })?;
        let in_spec = *target
            .input_specs()
            .get(input)
            .ok_or_else(|| GraphError::PortOutOfRange {
                node: target.name().to_string(),
                direction: "input",
                index: input,
            })?;
        if out_spec.kind != in_spec.kind {
            return Err(GraphError::PortTypeMismatch {
                from: out_spec.kind,
                to: in_spec.kind,
            });
        }
        if from == to || Self::reaches(&target, from) {
            return Err(GraphError::Cycle);
        }

        source.add_link(
            output,
            Link {
                target: Arc::downgrade(&target),
                port: input,
            },
        );
        debug!(from = %source.name(), output, to = %target.name(), input, "ports linked");
        Ok(())
    }

    /// Removes the link between the given ports. Returns whether one existed.
    pub fn disconnect(
        &self,
        from: Uuid,
        output: usize,
        to: Uuid,
        input: usize,
    ) -> Result<bool, GraphError> {
        let source = self.require(from)?;
        let target = self.require(to)?;
        let target = Arc::downgrade(&target);
        let removed = source.remove_links(Some(output), |link| {
            link.port == input && link.target.ptr_eq(&target)
        });
        Ok(removed > 0)
    }

    /// Removes a node; links into it from other nodes are pruned.
    pub fn remove_node(&mut self, id: Uuid) -> Result<Arc<Node>, GraphError> {
        if self.is_source_running(id) {
            let node = self.require(id)?;
            return Err(GraphError::WorkerRunning {
                node: node.name().to_string(),
            });
        }
        let index = self
            .nodes
            .iter()
            .position(|n| n.id() == id)
            .ok_or(GraphError::UnknownNode(id))?;
        let node = self.nodes.remove(index);
        let removed = Arc::downgrade(&node);
        for other in &self.nodes {
            other.remove_links(None, |link| link.target.ptr_eq(&removed));
        }
        self.workers.retain(|w| w.node_id() != id);
        debug!(node = %node.name(), "node removed");
        Ok(node)
    }

    /// Runs a node and everything downstream of it on the calling thread.
    pub fn trigger(&self, id: Uuid) -> Result<bool, GraphError> {
        self.require(id)?.invoke()
    }

    /// Starts a worker that drives `id` as a source.
    pub fn start_source(&mut self, id: Uuid, cadence: Option<Duration>) -> Result<(), GraphError> {
        let node = self.require(id)?;
        if self.is_source_running(id) {
            return Err(GraphError::WorkerRunning {
                node: node.name().to_string(),
            });
        }
        self.workers.retain(|w| w.node_id() != id);
        info!(node = %node.name(), ?cadence, "starting source worker");
        self.workers.push(SourceWorker::spawn(node, cadence));
        Ok(())
    }

    /// Whether a worker is currently driving `id`.
    pub fn is_source_running(&self, id: Uuid) -> bool {
        self.workers.iter().any(|w| w.node_id() == id && !w.is_finished())
    }

    /// Stops every worker and waits for all of them.
    pub async fn shutdown(&mut self) {
        let workers = std::mem::take(&mut self.workers);
        for worker in &workers {
            worker.request_stop();
        }
        join_all(workers.into_iter().map(SourceWorker::join)).await;
        info!("graph shut down");
    }

    fn require(&self, id: Uuid) -> Result<Arc<Node>, GraphError> {
        self.node(id).ok_or(GraphError::UnknownNode(id))
    }

    /// Whether `target` is `start` or reachable downstream of it.
    fn reaches(start: &Arc<Node>, target: Uuid) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![Arc::clone(start)];
        while let Some(node) = stack.pop() {
            if node.id() == target {
                return true;
            }
            if seen.insert(node.id()) {
                stack.extend(node.successors());
            }
        }
        false
    }
}
