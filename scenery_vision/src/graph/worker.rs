// THEORY:
// Source nodes (cameras, video files, image sequences) block while they wait for
// the next frame, so each one gets its own worker instead of running on the
// controller's thread. A worker is a Tokio blocking task that loops:
//
//   1. stop requested? -> leave
//   2. run the source step (acquisition happens here and may block)
//   3. stop requested? -> leave without delivering
//   4. propagate the frame downstream on this thread
//   5. wait out the rest of the cadence, waking early on a stop request
//
// A step that did not run (node busy, or failed) always waits at least
// `RETRY_PAUSE` before the next attempt, even without a cadence.
//
// On exit the node's behaviour is shut down, which releases capture devices. The
// stop signal is a `tokio::sync::watch` channel so the blocking loop can poll it
// cheaply and the cadence wait can be interrupted.

use super::node::Node;
use crate::error::{GraphError, SourceError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Minimum wait after a step that did not run.
pub const RETRY_PAUSE: Duration = Duration::from_millis(1);

pub struct SourceWorker {
    node_id: Uuid,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SourceWorker {
    /// Starts driving `node` on a blocking task of the current Tokio runtime.
    /// With a `cadence`, steps start at most once per period.
    pub fn spawn(node: Arc<Node>, cadence: Option<Duration>) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let runtime = Handle::current();
        let node_id = node.id();
        let handle = tokio::task::spawn_blocking(move || run(node, stop_rx, cadence, runtime));
        Self {
            node_id,
            stop,
            handle,
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Asks the worker to stop after its current step.
    pub fn request_stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stops the worker and waits for it to exit.
    pub async fn join(self) {
        self.request_stop();
        if let Err(err) = self.handle.await {
            warn!(node = %self.node_id, error = %err, "source worker panicked");
        }
    }
}

fn run(node: Arc<Node>, stop: watch::Receiver<bool>, cadence: Option<Duration>, runtime: Handle) {
    info!(node = %node.name(), "source worker started");
    let stopped = || *stop.borrow();

    while !stopped() {
        let started = Instant::now();
        let ran = match node.execute() {
            Ok(Some(deliveries)) => {
                if stopped() {
                    break;
                }
                deliveries.deliver();
                true
            }
            Ok(None) => {
                trace!(node = %node.name(), "source busy; retrying");
                false
            }
            Err(GraphError::Source(SourceError::Exhausted)) => {
                info!(node = %node.name(), "source exhausted");
                break;
            }
            Err(err) => {
                warn!(node = %node.name(), error = %err, "source step failed");
                false
            }
        };

        let wait = pause(cadence, started.elapsed(), ran);
        if !wait.is_zero() {
            let mut wake = stop.clone();
            runtime.block_on(async {
                let _ = tokio::time::timeout(wait, wake.wait_for(|stop| *stop)).await;
            });
        }
    }

    node.shutdown();
    debug!(node = %node.name(), "source worker stopped");
}

/// Time left before the next attempt.
fn pause(cadence: Option<Duration>, elapsed: Duration, ran: bool) -> Duration {
    let floor = if ran { Duration::ZERO } else { RETRY_PAUSE };
    cadence
        .map_or(Duration::ZERO, |period| period.saturating_sub(elapsed))
        .max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeBehavior;
    use crate::graph::port::{Payload, PortSpec, PortType};
    use parking_lot::Mutex;

    struct Ticker {
        runs: Arc<Mutex<u32>>,
    }

    impl NodeBehavior for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }
        fn inputs(&self) -> Vec<PortSpec> {
            Vec::new()
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

    #[test]
    fn unproductive_steps_always_pause() {
        assert_eq!(pause(None, Duration::ZERO, true), Duration::ZERO);
        assert_eq!(pause(None, Duration::ZERO, false), RETRY_PAUSE);
        let period = Duration::from_millis(20);
        assert_eq!(pause(Some(period), Duration::from_millis(5), true), Duration::from_millis(15));
        assert_eq!(pause(Some(period), Duration::from_millis(30), true), Duration::ZERO);
        assert_eq!(pause(Some(period), Duration::from_millis(30), false), RETRY_PAUSE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_source_retries_until_released() {
        let runs = Arc::new(Mutex::new(0));
        let node = Node::new(Box::new(Ticker { runs: runs.clone() }));
        assert!(node.try_claim());

        let worker = SourceWorker::spawn(Arc::clone(&node), None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*runs.lock(), 0);
        assert!(!worker.is_finished());

        node.release();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(*runs.lock() > 0);

        worker.join().await;
    }
}
