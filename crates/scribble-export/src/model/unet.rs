use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

use super::conv_op::{ConvOp, ConvOpConfig, ParamSpec};
use crate::trace::{Eager, Executor};

/// Configuration of the ScribblePrompt UNet.
///
/// The defaults are the hyperparameters of the released `nf192` checkpoints: five input
/// channels (image, positive and negative scribbles or clicks, box, previous mask), one
/// output logit channel and four levels of 192 features.
#[derive(Config, Debug)]
pub struct UNetConfig {
    #[config(default = 5)]
    pub in_channels: usize,
    #[config(default = 1)]
    pub out_channels: usize,
    /// Number of features of each encoder level, from the finest to the coarsest.
    #[config(default = "vec![192, 192, 192, 192]")]
    pub features: Vec<usize>,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 0.01)]
    pub negative_slope: f64,
}

/// Encoder/decoder network with skip connections.
///
/// Each encoder level but the last stores its output as a skip connection and is followed
/// by a 2x2 max pooling. Each decoder level resizes the running features to the size of the
/// matching skip, concatenates both on the channel axis and applies a convolution block.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    pub enc_blocks: Vec<ConvOp<B>>,
    pub dec_blocks: Vec<ConvOp<B>>,
    pub out_conv: ConvOp<B>,
    pool: MaxPool2d,
}

impl UNetConfig {
    /// Initialize a new [UNet](UNet) module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        assert!(
            !self.features.is_empty(),
            "The UNet needs at least one encoder level"
        );

        let block = |in_channels, out_channels| {
            ConvOpConfig::new(in_channels, out_channels)
                .with_kernel_size(self.kernel_size)
                .with_negative_slope(self.negative_slope)
        };

        let mut enc_blocks = Vec::with_capacity(self.features.len());
        let mut channels = self.in_channels;
        for &features in self.features.iter() {
            enc_blocks.push(block(channels, features).init(device));
            channels = features;
        }

        let skips = &self.features[..self.features.len() - 1];
        let mut dec_blocks = Vec::with_capacity(skips.len());
        for &skip in skips.iter().rev() {
            dec_blocks.push(block(channels + skip, skip).init(device));
            channels = skip;
        }

        let out_conv = ConvOpConfig::new(channels, self.out_channels)
            .with_kernel_size(1)
            .with_activation(false)
            .init(device);

        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        UNet {
            enc_blocks,
            dec_blocks,
            out_conv,
            pool,
        }
    }
}

impl<B: Backend> UNet<B> {
    /// # Shapes
    ///
    /// - input: `[batch_size, in_channels, height, width]`
    /// - output: `[batch_size, out_channels, height, width]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_with(&mut Eager, input)
    }

    /// Run the forward pass with the given executor.
    pub fn forward_with<E: Executor<B>>(&self, executor: &mut E, input: E::Value) -> E::Value {
        let last = self.enc_blocks.len() - 1;
        let mut skips = Vec::with_capacity(last);
        let mut x = input;

        for (i, block) in self.enc_blocks.iter().enumerate() {
            x = block.forward_with(executor, &format!("enc_blocks.{i}"), x);
            if i == last {
                break;
            }
            skips.push(x.clone());
            x = executor.max_pool2d("", &self.pool, x);
        }

        for (i, (block, skip)) in self
            .dec_blocks
            .iter()
            .zip(skips.into_iter().rev())
            .enumerate()
        {
            x = executor.resize_like("", x, &skip);
            x = executor.concat("", vec![x, skip], 1);
            x = block.forward_with(executor, &format!("dec_blocks.{i}"), x);
        }

        self.out_conv.forward_with(executor, "out_conv", x)
    }

    pub fn in_channels(&self) -> usize {
        self.enc_blocks[0].conv.weight.val().dims()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.out_conv.conv.weight.val().dims()[0]
    }

    /// Smallest spatial extent that survives every pooling level.
    pub fn min_spatial_size(&self) -> usize {
        1 << (self.enc_blocks.len() - 1)
    }

    /// Every convolution block with its state-dict path, in module order.
    pub fn blocks(&self) -> Vec<(String, &ConvOp<B>)> {
        let encoders = self
            .enc_blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (format!("enc_blocks.{i}"), block));
        let decoders = self
            .dec_blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (format!("dec_blocks.{i}"), block));

        encoders
            .chain(decoders)
            .chain(core::iter::once(("out_conv".to_string(), &self.out_conv)))
            .collect()
    }

    /// Expected trained parameters, in module order.
    pub fn parameter_specs(&self) -> Vec<ParamSpec> {
        self.blocks()
            .into_iter()
            .flat_map(|(prefix, block)| block.parameter_specs(&prefix))
            .collect()
    }

    /// Rebuild the network, transforming each convolution block.
    pub fn map_blocks<F>(self, mut f: F) -> Self
    where
        F: FnMut(&str, ConvOp<B>) -> ConvOp<B>,
    {
        let enc_blocks = self
            .enc_blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| f(&format!("enc_blocks.{i}"), block))
            .collect();
        let dec_blocks = self
            .dec_blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| f(&format!("dec_blocks.{i}"), block))
            .collect();
        let out_conv = f("out_conv", self.out_conv);

        Self {
            enc_blocks,
            dec_blocks,
            out_conv,
            pool: self.pool,
        }
    }
}
