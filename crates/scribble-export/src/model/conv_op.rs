use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LeakyRelu, LeakyReluConfig, PaddingConfig2d};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::trace::Executor;

/// Configuration to create a [convolution block](ConvOp).
#[derive(Config, Debug)]
pub struct ConvOpConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Square kernel size. Must be odd so that "same" padding is symmetric.
    #[config(default = 3)]
    pub kernel_size: usize,
    /// Apply a LeakyReLU after the convolution.
    #[config(default = true)]
    pub activation: bool,
    #[config(default = 0.01)]
    pub negative_slope: f64,
}

/// A 2D convolution with "same" zero padding, followed by an optional LeakyReLU.
#[derive(Module, Debug)]
pub struct ConvOp<B: Backend> {
    pub conv: Conv2d<B>,
    pub nonlin: Option<LeakyRelu>,
}

/// Name and shape of a trained parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl ConvOpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvOp<B> {
        assert!(
            self.kernel_size % 2 == 1,
            "Same padding requires an odd kernel size, got {}",
            self.kernel_size
        );
        let padding = self.kernel_size / 2;

        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(true)
        .init(device);

        let nonlin = self.activation.then(|| {
            LeakyReluConfig::new()
                .with_negative_slope(self.negative_slope)
                .init()
        });

        ConvOp { conv, nonlin }
    }
}

impl<B: Backend> ConvOp<B> {
    pub fn forward_with<E: Executor<B>>(
        &self,
        executor: &mut E,
        scope: &str,
        x: E::Value,
    ) -> E::Value {
        let x = executor.conv2d(&format!("{scope}.conv"), &self.conv, x);

        match &self.nonlin {
            Some(nonlin) => executor.leaky_relu(&format!("{scope}.nonlin"), nonlin, x),
            None => x,
        }
    }

    /// Parameters in state-dict order, prefixed with the block path.
    pub fn parameter_specs(&self, prefix: &str) -> Vec<ParamSpec> {
        let mut specs = vec![ParamSpec {
            name: format!("{prefix}.conv.weight"),
            shape: self.conv.weight.val().dims().to_vec(),
        }];

        if let Some(bias) = &self.conv.bias {
            specs.push(ParamSpec {
                name: format!("{prefix}.conv.bias"),
                shape: bias.val().dims().to_vec(),
            });
        }

        specs
    }

    /// Replace the trained parameters. `None` keeps the current value.
    pub fn with_parameters(
        mut self,
        weight: Option<TensorData>,
        bias: Option<TensorData>,
        device: &B::Device,
    ) -> Self {
        if let Some(weight) = weight {
            self.conv.weight = Param::from_tensor(Tensor::from_data(weight, device));
        }
        if let Some(bias) = bias {
            self.conv.bias = Some(Param::from_tensor(Tensor::from_data(bias, device)));
        }

        self
    }
}
