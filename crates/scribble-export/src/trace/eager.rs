use burn::nn::LeakyRelu;
use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

use super::Executor;

/// Runs every primitive directly on the backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct Eager;

impl<B: Backend> Executor<B> for Eager {
    type Value = Tensor<B, 4>;

    fn conv2d(&mut self, _scope: &str, conv: &Conv2d<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
        conv.forward(x)
    }

    fn leaky_relu(
        &mut self,
        _scope: &str,
        activation: &LeakyRelu,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        activation.forward(x)
    }

    fn max_pool2d(&mut self, _scope: &str, pool: &MaxPool2d, x: Tensor<B, 4>) -> Tensor<B, 4> {
        pool.forward(x)
    }

    fn resize_like(
        &mut self,
        _scope: &str,
        x: Tensor<B, 4>,
        reference: &Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        resize_bilinear(x, reference)
    }

    fn concat(&mut self, _scope: &str, values: Vec<Tensor<B, 4>>, dim: usize) -> Tensor<B, 4> {
        Tensor::cat(values, dim)
    }
}

/// Burn's bilinear interpolation maps corner pixels onto corner pixels.
pub(crate) fn resize_bilinear<B: Backend>(
    x: Tensor<B, 4>,
    reference: &Tensor<B, 4>,
) -> Tensor<B, 4> {
    let [_, _, height, width] = reference.dims();

    interpolate(
        x,
        [height, width],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}
