//! Execution of the UNet forward pass, either eagerly or while recording an ONNX graph.
//!
//! The network is written once against [`Executor`]. Running it with [`Eager`] is the plain
//! forward pass; running it with [`Tracer`] performs the same computation on a concrete
//! input and records every primitive as a graph node, so the exported graph is exactly
//! the computation that was executed.

mod eager;
mod shape;
mod tracer;

pub use eager::Eager;
pub use shape::{Dim, SymbolicShape};
pub use tracer::{Traced, Tracer};

use burn::nn::LeakyRelu;
use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::tensor::backend::Backend;

/// The primitives used by the segmentation network.
///
/// `scope` is the dotted module path of the caller (`enc_blocks.0.conv`), or an empty
/// string for functional calls made directly by the network.
pub trait Executor<B: Backend> {
    /// Value flowing between primitives.
    type Value: Clone;

    /// 2D convolution with "same" zero padding.
    fn conv2d(&mut self, scope: &str, conv: &Conv2d<B>, x: Self::Value) -> Self::Value;

    fn leaky_relu(&mut self, scope: &str, activation: &LeakyRelu, x: Self::Value)
    -> Self::Value;

    /// Unpadded max pooling.
    fn max_pool2d(&mut self, scope: &str, pool: &MaxPool2d, x: Self::Value) -> Self::Value;

    /// Bilinear resize (corners aligned) of `x` to the spatial size of `reference`.
    fn resize_like(&mut self, scope: &str, x: Self::Value, reference: &Self::Value)
    -> Self::Value;

    fn concat(&mut self, scope: &str, values: Vec<Self::Value>, dim: usize) -> Self::Value;
}
