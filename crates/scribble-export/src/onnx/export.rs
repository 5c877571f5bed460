use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor};
use protobuf::{Message, MessageField};
use serde::{Deserialize, Serialize};

use super::protos::{ModelProto, OperatorSetIdProto, tensor_proto::DataType};
use super::{
    ExportError, GraphBuilder, GraphOptions, MAX_OPSET_VERSION, MIN_OPSET_VERSION, ir_version,
    tensor_value_info,
};
use crate::model::UNet;
use crate::trace::{SymbolicShape, Tracer};

/// Name of the single graph in the exported model.
pub const GRAPH_NAME: &str = "main_graph";

/// An axis left symbolic in the exported graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicAxis {
    pub axis: usize,
    pub name: String,
}

impl DynamicAxis {
    pub fn new(axis: usize, name: &str) -> Self {
        Self {
            axis,
            name: name.to_string(),
        }
    }
}

/// Batch, height and width are left dynamic; channels are fixed by the architecture.
pub fn default_dynamic_axes() -> Vec<DynamicAxis> {
    vec![
        DynamicAxis::new(0, "batch_size"),
        DynamicAxis::new(2, "height"),
        DynamicAxis::new(3, "width"),
    ]
}

/// Configuration of the ONNX export.
#[derive(Config, Debug)]
pub struct ExportConfig {
    #[config(default = 20)]
    pub opset_version: usize,
    /// Store the trained weights inside the graph. When disabled, they are graph inputs.
    #[config(default = true)]
    pub export_params: bool,
    /// Replace shape computations known at export time by constants.
    #[config(default = true)]
    pub do_constant_folding: bool,
    #[config(default = "String::from(\"input\")")]
    pub input_name: String,
    #[config(default = "String::from(\"output\")")]
    pub output_name: String,
    #[config(default = "default_dynamic_axes()")]
    pub input_dynamic_axes: Vec<DynamicAxis>,
    #[config(default = "default_dynamic_axes()")]
    pub output_dynamic_axes: Vec<DynamicAxis>,
    /// Shape of the example input the network is traced with.
    #[config(default = "[1, 5, 256, 256]")]
    pub dummy_input: [usize; 4],
    #[config(default = "String::from(env!(\"CARGO_PKG_NAME\"))")]
    pub producer_name: String,
}

/// What was written by [export_onnx].
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub opset_version: usize,
    pub nodes: usize,
    pub initializers: usize,
    /// Number of trained scalar values.
    pub parameters: usize,
    pub input_shape: SymbolicShape,
    pub output_shape: SymbolicShape,
}

/// Trace `model` on a random example input and return the resulting ONNX model.
pub fn trace_model<B: Backend>(
    model: &UNet<B>,
    device: &B::Device,
    config: &ExportConfig,
) -> Result<ModelProto, ExportError> {
    validate(model, config)?;

    let mut tracer = Tracer::new(GraphBuilder::new(GraphOptions {
        fold_constants: config.do_constant_folding,
        export_params: config.export_params,
    }));

    let input_axes = named_axes(&config.input_dynamic_axes);
    let input_shape = SymbolicShape::with_dynamic_axes(&config.dummy_input, &input_axes);
    let dummy = Tensor::<B, 4>::random(config.dummy_input, Distribution::Normal(0.0, 1.0), device);
    let input = tracer.input(&config.input_name, dummy, input_shape.clone());

    let output = model.forward_with(&mut tracer, input);

    let [batch_size, _, height, width] = config.dummy_input;
    let expected = [batch_size, model.out_channels(), height, width];
    let actual = output.tensor.dims();
    if actual != expected {
        return Err(ExportError::UnexpectedOutputShape { actual, expected });
    }

    let mut output_shape = output.shape.clone();
    output_shape.rename_axes(&named_axes(&config.output_dynamic_axes));

    let mut graph = tracer.finish();
    graph.rename_value(&output.name, &config.output_name);

    let inputs = vec![tensor_value_info(
        &config.input_name,
        DataType::FLOAT,
        &input_shape,
    )];
    let outputs = vec![tensor_value_info(
        &config.output_name,
        DataType::FLOAT,
        &output_shape,
    )];

    log::debug!(
        "Traced {} nodes, input {input_shape}, output {output_shape}",
        graph.nodes().len()
    );

    let mut opset = OperatorSetIdProto::new();
    opset.domain = String::new();
    opset.version = config.opset_version as i64;

    let mut proto = ModelProto::new();
    proto.ir_version = ir_version(config.opset_version);
    proto.opset_import = vec![opset];
    proto.producer_name = config.producer_name.clone();
    proto.producer_version = env!("CARGO_PKG_VERSION").to_string();
    proto.graph = MessageField::some(graph.build(GRAPH_NAME, inputs, outputs)?);

    Ok(proto)
}

/// Serialize the model to the protobuf wire format.
pub fn encode_model(model: &ModelProto) -> Result<Vec<u8>, ExportError> {
    Ok(model.write_to_bytes()?)
}

/// Trace `model` and write the ONNX file to `path`.
pub fn export_onnx<B: Backend>(
    model: &UNet<B>,
    device: &B::Device,
    config: &ExportConfig,
    path: &Path,
) -> Result<ExportSummary, ExportError> {
    let proto = trace_model(model, device, config)?;
    let bytes = encode_model(&proto)?;
    std::fs::write(path, bytes)?;

    let graph = proto.graph.get_or_default();
    let parameters = model
        .parameter_specs()
        .iter()
        .map(|spec| spec.shape.iter().product::<usize>())
        .sum();

    let input_axes = named_axes(&config.input_dynamic_axes);
    let [batch_size, _, height, width] = config.dummy_input;
    let output_dims = [batch_size, model.out_channels(), height, width];

    Ok(ExportSummary {
        path: path.to_path_buf(),
        opset_version: config.opset_version,
        nodes: graph.node.len(),
        initializers: graph.initializer.len(),
        parameters,
        input_shape: SymbolicShape::with_dynamic_axes(&config.dummy_input, &input_axes),
        output_shape: SymbolicShape::with_dynamic_axes(
            &output_dims,
            &named_axes(&config.output_dynamic_axes),
        ),
    })
}

fn named_axes(axes: &[DynamicAxis]) -> Vec<(usize, String)> {
    axes.iter()
        .map(|axis| (axis.axis, axis.name.clone()))
        .collect()
}

fn validate<B: Backend>(model: &UNet<B>, config: &ExportConfig) -> Result<(), ExportError> {
    if !(MIN_OPSET_VERSION..=MAX_OPSET_VERSION).contains(&config.opset_version) {
        return Err(ExportError::UnsupportedOpset(config.opset_version));
    }

    let shape = config.dummy_input;
    let invalid = |reason: String| ExportError::InvalidDummyInput { shape, reason };

    if shape.contains(&0) {
        return Err(invalid("every dimension must be at least 1".into()));
    }
    if shape[1] != model.in_channels() {
        return Err(invalid(format!(
            "the network expects {} input channels",
            model.in_channels()
        )));
    }
    let min_size = model.min_spatial_size();
    if shape[2] < min_size || shape[3] < min_size {
        return Err(invalid(format!(
            "height and width must be at least {min_size} to survive every pooling level"
        )));
    }

    for (value, axes) in [
        (&config.input_name, &config.input_dynamic_axes),
        (&config.output_name, &config.output_dynamic_axes),
    ] {
        for (i, axis) in axes.iter().enumerate() {
            let duplicated = axes[..i].iter().any(|other| other.axis == axis.axis);
            if axis.axis >= 4 || duplicated {
                return Err(ExportError::InvalidDynamicAxis {
                    value: value.clone(),
                    axis: axis.axis,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UNetConfig;
    use crate::onnx::protos::{ValueInfoProto, tensor_shape_proto::dimension, type_proto};
    use protobuf::Enum;

    type TestBackend = burn::backend::NdArray;

    fn small_model() -> UNet<TestBackend> {
        UNetConfig::new()
            .with_features(vec![4, 4, 4, 4])
            .init(&Default::default())
    }

    fn config() -> ExportConfig {
        ExportConfig::new().with_dummy_input([1, 5, 16, 16])
    }

    fn dims_of(info: &ValueInfoProto) -> Vec<String> {
        let Some(type_proto::Value::TensorType(tensor)) = &info.type_.value else {
            panic!("{} is not a tensor", info.name);
        };

        tensor
            .shape
            .dim
            .iter()
            .map(|dim| match &dim.value {
                Some(dimension::Value::DimValue(value)) => value.to_string(),
                Some(dimension::Value::DimParam(param)) => param.clone(),
                _ => "?".to_string(),
            })
            .collect()
    }

    fn count_ops(model: &ModelProto, op_type: &str) -> usize {
        model
            .graph
            .node
            .iter()
            .filter(|node| node.op_type == op_type)
            .count()
    }

    #[test]
    fn default_config() {
        let config = ExportConfig::new();

        assert_eq!(config.opset_version, 20);
        assert!(config.export_params);
        assert!(config.do_constant_folding);
        assert_eq!(config.input_name, "input");
        assert_eq!(config.output_name, "output");
        assert_eq!(config.dummy_input, [1, 5, 256, 256]);
        assert_eq!(config.input_dynamic_axes, default_dynamic_axes());
        assert_eq!(config.producer_name, "scribble-export");
    }

    #[test]
    fn graph_declares_dynamic_batch_and_spatial_axes() {
        let model = small_model();

        let proto = trace_model(&model, &Default::default(), &config()).unwrap();
        let graph = &proto.graph;

        assert_eq!(graph.name, GRAPH_NAME);
        assert_eq!(graph.input.len(), 1);
        assert_eq!(graph.input[0].name, "input");
        assert_eq!(dims_of(&graph.input[0]), ["batch_size", "5", "height", "width"]);
        assert_eq!(graph.output.len(), 1);
        assert_eq!(graph.output[0].name, "output");
        assert_eq!(dims_of(&graph.output[0]), ["batch_size", "1", "height", "width"]);
        assert_eq!(proto.ir_version, 9);
        assert_eq!(proto.opset_import[0].version, 20);
    }

    #[test]
    fn every_primitive_is_recorded() {
        let model = small_model();

        let proto = trace_model(&model, &Default::default(), &config()).unwrap();

        assert_eq!(count_ops(&proto, "Conv"), 8);
        assert_eq!(count_ops(&proto, "LeakyRelu"), 7);
        assert_eq!(count_ops(&proto, "MaxPool"), 3);
        assert_eq!(count_ops(&proto, "Resize"), 3);
        // One Concat for the skip connection and one for the Resize sizes per decoder level.
        assert_eq!(count_ops(&proto, "Concat"), 6);
        let weights = proto
            .graph
            .initializer
            .iter()
            .filter(|tensor| tensor.name.ends_with(".weight"));
        assert_eq!(weights.count(), 8);

        let last = proto.graph.node.last().unwrap();
        assert_eq!(last.name, "/out_conv.conv/Conv");
        assert_eq!(last.output, vec!["output".to_string()]);
    }

    #[test]
    fn static_axes_fold_the_shape_subgraph() {
        let model = small_model();
        let config = config()
            .with_input_dynamic_axes(vec![])
            .with_output_dynamic_axes(vec![]);

        let proto = trace_model(&model, &Default::default(), &config).unwrap();

        assert_eq!(count_ops(&proto, "Shape"), 0);
        assert_eq!(count_ops(&proto, "Slice"), 0);
        assert_eq!(count_ops(&proto, "Concat"), 3);
        assert_eq!(dims_of(&proto.graph.input[0]), ["1", "5", "16", "16"]);
        assert_eq!(dims_of(&proto.graph.output[0]), ["1", "1", "16", "16"]);
    }

    #[test]
    fn disabled_folding_keeps_the_shape_subgraph() {
        let model = small_model();
        let config = config()
            .with_input_dynamic_axes(vec![])
            .with_output_dynamic_axes(vec![])
            .with_do_constant_folding(false);

        let proto = trace_model(&model, &Default::default(), &config).unwrap();

        assert_eq!(count_ops(&proto, "Shape"), 6);
        assert_eq!(count_ops(&proto, "Slice"), 6);
    }

    #[test]
    fn weights_become_inputs_without_export_params() {
        let model = small_model();
        let config = config().with_export_params(false);

        let proto = trace_model(&model, &Default::default(), &config).unwrap();
        let graph = &proto.graph;

        assert_eq!(graph.input.len(), 1 + 16);
        assert!(graph.initializer.iter().all(|tensor| tensor.data_type == DataType::INT64.value()));
        assert!(graph.input.iter().any(|info| info.name == "enc_blocks.0.conv.weight"));
        assert_eq!(dims_of(&graph.input[1]), ["4", "5", "3", "3"]);
    }

    #[test]
    fn encoding_does_not_depend_on_the_dummy_values() {
        let model = small_model();
        let device = Default::default();

        let first = encode_model(&trace_model(&model, &device, &config()).unwrap()).unwrap();
        let second = encode_model(&trace_model(&model, &device, &config()).unwrap()).unwrap();

        assert_eq!(first, second);
        let decoded = ModelProto::parse_from_bytes(&first).unwrap();
        assert_eq!(decoded.graph.node.len(), 39);
    }

    #[test]
    fn unsupported_opset_is_rejected() {
        let err = trace_model(
            &small_model(),
            &Default::default(),
            &config().with_opset_version(11),
        )
        .unwrap_err();

        assert!(matches!(err, ExportError::UnsupportedOpset(11)));
    }

    #[test]
    fn dummy_input_must_match_the_network() {
        let model = small_model();
        let device = Default::default();

        let channels = trace_model(&model, &device, &config().with_dummy_input([1, 3, 16, 16]));
        let too_small = trace_model(&model, &device, &config().with_dummy_input([1, 5, 4, 16]));
        let empty = trace_model(&model, &device, &config().with_dummy_input([0, 5, 16, 16]));

        assert!(matches!(channels, Err(ExportError::InvalidDummyInput { .. })));
        assert!(matches!(too_small, Err(ExportError::InvalidDummyInput { .. })));
        assert!(matches!(empty, Err(ExportError::InvalidDummyInput { .. })));
    }

    #[test]
    fn dynamic_axes_must_exist_once() {
        let model = small_model();
        let device = Default::default();

        let out_of_range = config().with_input_dynamic_axes(vec![DynamicAxis::new(4, "depth")]);
        let duplicated = config().with_output_dynamic_axes(vec![
            DynamicAxis::new(2, "height"),
            DynamicAxis::new(2, "rows"),
        ]);

        assert!(matches!(
            trace_model(&model, &device, &out_of_range),
            Err(ExportError::InvalidDynamicAxis { axis: 4, .. })
        ));
        assert!(matches!(
            trace_model(&model, &device, &duplicated),
            Err(ExportError::InvalidDynamicAxis { axis: 2, .. })
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let config = config().with_opset_version(17).with_export_params(false);

        config.save(&path).unwrap();
        let loaded = ExportConfig::load(&path).unwrap();

        assert_eq!(loaded.opset_version, 17);
        assert!(!loaded.export_params);
        assert_eq!(loaded.dummy_input, [1, 5, 16, 16]);
        assert_eq!(loaded.output_dynamic_axes, default_dynamic_axes());
    }
}
