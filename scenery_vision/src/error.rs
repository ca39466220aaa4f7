// THEORY:
// Every layer of the engine reports failure through its own small error enum so
// callers can tell a misconfigured frame apart from a missing model file or a bad
// graph edit. The enums are aggregated into a crate-level `Error` for consumers
// that only want to bubble failures up.
//
// Key architectural principles:
// 1.  **Preconditions are errors**: A frame whose size or buffer length does not
//     match the configured detector is returned as a `DetectError`.
// 2.  **Resource failures are not fatal**: `VisionError` is produced by the vision
//     collaborator; the detector logs it and yields empty output instead of
//     failing the whole cycle.
// 3.  **Graph edits are validated**: Port ranges, port types and cycles are checked
//     at connection time and surface as `GraphError`.

use std::path::PathBuf;
use thiserror::Error;

use crate::graph::PortType;

/// Failures raised by the vision collaborator (edge, contour, Hough, cascade).
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("{0} is not available in this vision backend")]
    Unsupported(&'static str),
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("vision backend error: {0}")]
    Backend(String),
}

/// Failures of a single detection cycle.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("frame is {actual_width}x{actual_height}x{actual_channels}, detector expects {expected_width}x{expected_height}x3")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
        actual_channels: u32,
    },
    #[error("frame buffer holds {actual} bytes, {expected} expected")]
    BufferLength { expected: usize, actual: usize },
}

/// Failures of a frame supplier.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source is exhausted")]
    Exhausted,
    #[error("source is not open")]
    NotOpen,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("capture error: {0}")]
    Capture(String),
}

/// Failures of graph editing and node execution.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0} does not exist in this graph")]
    UnknownNode(uuid::Uuid),
    #[error("node `{node}` has no {direction} port {index}")]
    PortOutOfRange {
        node: String,
        direction: &'static str,
        index: usize,
    },
    #[error("cannot link a {from:?} output to a {to:?} input")]
    PortTypeMismatch { from: PortType, to: PortType },
    #[error("node `{node}` wrote a {actual:?} payload to {expected:?} port {index}")]
    PayloadType {
        node: String,
        index: usize,
        expected: PortType,
        actual: PortType,
    },
    #[error("linking these ports would create a cycle")]
    Cycle,
    #[error("node `{node}` has an active source worker")]
    WorkerRunning { node: String },
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Failures loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
