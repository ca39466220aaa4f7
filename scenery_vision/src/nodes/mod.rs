// THEORY:
// Concrete node behaviours. A graph built from these three covers the whole
// real-time path:
//
//   SourceNode ---image---> DetectorNode ---records/points/mask---> ProbeNode
//
// The source node is driven by a worker; the detector and the probe run inline
// on that worker's thread through propagation.

pub mod detector;
pub mod probe;
pub mod source;

pub use detector::DetectorNode;
pub use probe::{ProbeHandle, ProbeNode};
pub use source::SourceNode;
