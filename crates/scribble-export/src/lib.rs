//! `scribble-export` loads a trained ScribblePrompt UNet checkpoint into a Burn module and
//! traces it into an ONNX graph whose batch, height and width axes are dynamic.
//!
//! The pipeline is linear: build the architecture, load the weights (strictly by default),
//! disable gradient tracking, move the network to the selected device and trace it.

/// Compute device selection.
pub mod backend;
/// Reading checkpoints into the network.
pub mod checkpoint;
/// Command line interface.
pub mod cli;
/// The UNet architecture.
pub mod model;
/// ONNX graph construction and serialization.
pub mod onnx;
/// Eager and tracing execution of the network.
pub mod trace;

mod error;
mod logger;
mod predictor;

pub use error::*;
pub use logger::*;
pub use predictor::*;
