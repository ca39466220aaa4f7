// THEORY:
// This file is the main entry point for the `scenery_vision` library crate. It
// defines the public API consumed by front ends such as `scenery_tester`.
//
// The crate has two halves:
// 1.  **The detection pipeline**: `core_modules` holds the per-frame building
//     blocks (frame ring, pixel classification, region detector, coordinate
//     transform, track assigner, track filter) and `pipeline::Process` chains
//     them into one cycle configured by `config::ProcessConfig`.
// 2.  **The dataflow graph**: `graph` schedules node behaviours over typed
//     ports, with one worker per source node and synchronous depth-first
//     propagation for everything downstream. `nodes` and `sources` provide the
//     concrete behaviours and frame suppliers.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod graph;
pub mod nodes;
pub mod pipeline;
pub mod sources;

pub use config::{DetectionMode, ProcessConfig};
pub use graph::{Graph, Node, NodeBehavior, Payload, PortSpec, PortType, Record};
pub use pipeline::{Process, ProcessControl, ProcessOutput};
pub use sources::{FrameSupplier, SourceConfig};
