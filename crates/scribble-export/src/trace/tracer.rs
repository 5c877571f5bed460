use burn::nn::LeakyRelu;
use burn::nn::conv::Conv2d;
use burn::nn::pool::MaxPool2d;
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

use super::eager::resize_bilinear;
use super::{Dim, Executor, SymbolicShape};
use crate::onnx::{GraphBuilder, attr_float, attr_int, attr_ints, attr_string};

/// A concrete tensor together with the graph value that produces it.
#[derive(Debug, Clone)]
pub struct Traced<B: Backend> {
    pub tensor: Tensor<B, 4>,
    pub name: String,
    pub shape: SymbolicShape,
}

/// Executes the network on a concrete input while recording the ONNX graph.
#[derive(Debug)]
pub struct Tracer {
    graph: GraphBuilder,
}

impl Tracer {
    pub fn new(graph: GraphBuilder) -> Self {
        Self { graph }
    }

    /// Declare a graph input fed with `tensor`.
    pub fn input<B: Backend>(
        &mut self,
        name: &str,
        tensor: Tensor<B, 4>,
        shape: SymbolicShape,
    ) -> Traced<B> {
        Traced {
            tensor,
            name: name.to_string(),
            shape,
        }
    }

    pub fn finish(self) -> GraphBuilder {
        self.graph
    }
}

impl<B: Backend> Executor<B> for Tracer {
    type Value = Traced<B>;

    fn conv2d(&mut self, scope: &str, conv: &Conv2d<B>, x: Traced<B>) -> Traced<B> {
        let weight = conv.weight.val();
        let [out_channels, _, kernel_h, kernel_w] = weight.dims();
        let pads = [kernel_h / 2, kernel_w / 2];

        let mut inputs = vec![x.name.clone()];
        inputs.push(self.graph.parameter(
            &format!("{scope}.weight"),
            weight.dims().to_vec(),
            weight.into_data(),
        ));
        if let Some(bias) = &conv.bias {
            let bias = bias.val();
            inputs.push(self.graph.parameter(
                &format!("{scope}.bias"),
                bias.dims().to_vec(),
                bias.into_data(),
            ));
        }

        let attributes = vec![
            attr_ints("dilations", &conv.dilation),
            attr_int("group", conv.groups as i64),
            attr_ints("kernel_shape", &[kernel_h, kernel_w]),
            attr_ints("pads", &[pads[0], pads[1], pads[0], pads[1]]),
            attr_ints("strides", &conv.stride),
        ];
        let name = self.graph.node("Conv", scope, inputs, attributes);

        let shape = x
            .shape
            .with_dim(1, Dim::Fixed(out_channels))
            .with_dim(
                2,
                x.shape
                    .dim(2)
                    .window(kernel_h, conv.stride[0], pads[0], conv.dilation[0]),
            )
            .with_dim(
                3,
                x.shape
                    .dim(3)
                    .window(kernel_w, conv.stride[1], pads[1], conv.dilation[1]),
            );

        Traced {
            tensor: conv.forward(x.tensor),
            name,
            shape,
        }
    }

    fn leaky_relu(&mut self, scope: &str, activation: &LeakyRelu, x: Traced<B>) -> Traced<B> {
        let name = self.graph.node(
            "LeakyRelu",
            scope,
            vec![x.name],
            vec![attr_float("alpha", activation.negative_slope as f32)],
        );

        Traced {
            tensor: activation.forward(x.tensor),
            name,
            shape: x.shape,
        }
    }

    fn max_pool2d(&mut self, scope: &str, pool: &MaxPool2d, x: Traced<B>) -> Traced<B> {
        let [kernel_h, kernel_w] = pool.kernel_size;
        let [stride_h, stride_w] = pool.stride;

        let attributes = vec![
            attr_int("ceil_mode", 0),
            attr_ints("kernel_shape", &pool.kernel_size),
            attr_ints("pads", &[0, 0, 0, 0]),
            attr_ints("strides", &pool.stride),
        ];
        let name = self.graph.node("MaxPool", scope, vec![x.name], attributes);

        let shape = x
            .shape
            .with_dim(2, x.shape.dim(2).window(kernel_h, stride_h, 0, 1))
            .with_dim(3, x.shape.dim(3).window(kernel_w, stride_w, 0, 1));

        Traced {
            tensor: pool.forward(x.tensor),
            name,
            shape,
        }
    }

    fn resize_like(&mut self, scope: &str, x: Traced<B>, reference: &Traced<B>) -> Traced<B> {
        let leading = self.graph.shape_slice(scope, &x.name, &x.shape, 0, 2);
        let spatial = self
            .graph
            .shape_slice(scope, &reference.name, &reference.shape, 2, 4);
        let sizes = self.graph.concat_shapes(scope, vec![leading, spatial]);
        let sizes = self.graph.materialize(scope, sizes);

        let attributes = vec![
            attr_string("coordinate_transformation_mode", "align_corners"),
            attr_string("mode", "linear"),
            attr_string("nearest_mode", "floor"),
        ];
        // Resize(X, roi, scales, sizes): roi and scales are left empty when sizes is given.
        let name = self.graph.node(
            "Resize",
            scope,
            vec![x.name, String::new(), String::new(), sizes],
            attributes,
        );

        let shape = x
            .shape
            .with_dim(2, reference.shape.dim(2).clone())
            .with_dim(3, reference.shape.dim(3).clone());

        Traced {
            tensor: resize_bilinear(x.tensor, &reference.tensor),
            name,
            shape,
        }
    }

    fn concat(&mut self, scope: &str, values: Vec<Traced<B>>, dim: usize) -> Traced<B> {
        let channels = values
            .iter()
            .map(|value| value.shape.dim(dim).value())
            .sum::<Option<usize>>()
            .map(Dim::Fixed)
            .unwrap_or(Dim::Unknown);
        let shape = values[0].shape.with_dim(dim, channels);

        let inputs = values.iter().map(|value| value.name.clone()).collect();
        let name = self
            .graph
            .node("Concat", scope, inputs, vec![attr_int("axis", dim as i64)]);

        let tensors = values.into_iter().map(|value| value.tensor).collect();

        Traced {
            tensor: Tensor::cat(tensors, dim),
            name,
            shape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::GraphOptions;
    use burn::nn::conv::Conv2dConfig;
    use burn::nn::pool::MaxPool2dConfig;
    use burn::nn::{LeakyReluConfig, PaddingConfig2d};

    type TestBackend = burn::backend::NdArray;

    fn executor(
        tracer: &mut Tracer,
    ) -> &mut impl Executor<TestBackend, Value = Traced<TestBackend>> {
        tracer
    }

    fn traced_input(tracer: &mut Tracer, dims: [usize; 4]) -> Traced<TestBackend> {
        let device = Default::default();
        let axes = vec![(0, "batch_size".to_string()), (2, "height".to_string())];
        tracer.input(
            "input",
            Tensor::<TestBackend, 4>::ones(dims, &device),
            SymbolicShape::with_dynamic_axes(&dims, &axes),
        )
    }

    #[test]
    fn conv_records_parameters_and_keeps_symbols() {
        let device = Default::default();
        let conv = Conv2dConfig::new([2, 3], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init::<TestBackend>(&device);
        let mut tracer = Tracer::new(GraphBuilder::new(GraphOptions::default()));
        let x = traced_input(&mut tracer, [1, 2, 8, 6]);

        let y = tracer.conv2d("enc_blocks.0.conv", &conv, x);

        assert_eq!(y.tensor.dims(), [1, 3, 8, 6]);
        assert_eq!(y.shape.to_string(), "[batch_size, 3, height, 6]");
        let graph = tracer.finish();
        let node = &graph.nodes()[0];
        assert_eq!(node.op_type, "Conv");
        assert_eq!(
            node.input,
            vec![
                "input".to_string(),
                "enc_blocks.0.conv.weight".to_string(),
                "enc_blocks.0.conv.bias".to_string()
            ]
        );
        assert_eq!(graph.parameter_count(), 2 * 3 * 3 * 3 + 3);
    }

    #[test]
    fn pooling_loses_symbolic_extent() {
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let mut tracer = Tracer::new(GraphBuilder::new(GraphOptions::default()));
        let x = traced_input(&mut tracer, [1, 2, 8, 6]);

        let y = executor(&mut tracer).max_pool2d("", &pool, x);

        assert_eq!(y.tensor.dims(), [1, 2, 4, 3]);
        assert_eq!(y.shape.to_string(), "[batch_size, 2, ?, 3]");
    }

    #[test]
    fn resize_takes_the_reference_spatial_dims() {
        let activation = LeakyReluConfig::new().init();
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let mut tracer = Tracer::new(GraphBuilder::new(GraphOptions::default()));
        let skip = traced_input(&mut tracer, [1, 2, 8, 6]);

        let exec = executor(&mut tracer);
        let x = exec.leaky_relu("enc_blocks.0.nonlin", &activation, skip.clone());
        let x = exec.max_pool2d("", &pool, x);
        let x = exec.resize_like("", x, &skip);
        let y = exec.concat("", vec![x, skip], 1);

        assert_eq!(y.tensor.dims(), [1, 4, 8, 6]);
        assert_eq!(y.shape.to_string(), "[batch_size, 4, height, 6]");

        let graph = tracer.finish();
        let ops: Vec<_> = graph
            .nodes()
            .iter()
            .map(|node| node.op_type.as_str())
            .collect();
        // Batch and height are dynamic, so both halves of the size vector are computed.
        assert_eq!(
            ops,
            vec![
                "LeakyRelu",
                "MaxPool",
                "Shape",
                "Slice",
                "Shape",
                "Slice",
                "Concat",
                "Resize",
                "Concat"
            ]
        );
    }
}
