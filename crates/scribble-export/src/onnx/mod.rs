//! ONNX serialization of a traced network.

mod export;
mod graph;

pub use export::*;
pub use graph::{GraphBuilder, GraphOptions, ShapeVector, tensor_value_info};
pub(crate) use graph::{attr_float, attr_int, attr_ints, attr_string};

/// Messages generated from `src/protos/onnx.proto`.
#[allow(clippy::all)]
#[allow(missing_docs)]
pub mod protos {
    include!(concat!(env!("OUT_DIR"), "/onnx-protos/mod.rs"));

    pub use onnx::*;
}

/// Lowest opset whose `Resize`, `Slice` and `Conv` signatures are emitted.
pub const MIN_OPSET_VERSION: usize = 13;

/// Highest opset the emitted operators have been checked against.
pub const MAX_OPSET_VERSION: usize = 21;

/// ONNX IR version matching an opset, following the release table of the ONNX project.
pub fn ir_version(opset_version: usize) -> i64 {
    match opset_version {
        ..=14 => 7,
        15..=18 => 8,
        19..=20 => 9,
        _ => 10,
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(
        "Unsupported opset version {0}, expected a version between {min} and {max}",
        min = MIN_OPSET_VERSION,
        max = MAX_OPSET_VERSION
    )]
    UnsupportedOpset(usize),

    #[error("Invalid dummy input shape {shape:?}: {reason}")]
    InvalidDummyInput { shape: [usize; 4], reason: String },

    #[error("Invalid dynamic axis {axis} for '{value}': graph values have rank 4")]
    InvalidDynamicAxis { value: String, axis: usize },

    #[error("Traced output has shape {actual:?}, expected {expected:?}")]
    UnexpectedOutputShape {
        actual: [usize; 4],
        expected: [usize; 4],
    },

    #[error("Tensor data error: {0}")]
    TensorData(String),

    #[error("Protobuf error: {0}")]
    Protobuf(#[from] protobuf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
