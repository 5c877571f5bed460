use std::collections::HashMap;

use burn::tensor::TensorData;
use protobuf::{Enum, EnumOrUnknown, MessageField};

use super::ExportError;
use super::protos::{
    AttributeProto, GraphProto, NodeProto, TensorProto, TensorShapeProto, TypeProto,
    ValueInfoProto, attribute_proto::AttributeType, tensor_proto::DataType, tensor_shape_proto,
    type_proto,
};
use crate::trace::{Dim, SymbolicShape};

/// Options controlling what the builder emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    /// Replace shape computations whose result is known at export time by constants.
    pub fold_constants: bool,
    /// Store trained parameters as initializers. When disabled they become graph inputs.
    pub export_params: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            fold_constants: true,
            export_params: true,
        }
    }
}

/// A one dimensional int64 value describing (part of) a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeVector {
    /// Folded at export time, not yet part of the graph.
    Constant(Vec<i64>),
    /// Computed by the graph at inference time.
    Value { name: String, len: usize },
}

impl ShapeVector {
    pub fn len(&self) -> usize {
        match self {
            ShapeVector::Constant(values) => values.len(),
            ShapeVector::Value { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ShapeVector::Constant(_))
    }
}

#[derive(Debug)]
enum InitializerData {
    Float(TensorData),
    Int64(Vec<i64>),
}

#[derive(Debug)]
struct Initializer {
    name: String,
    dims: Vec<usize>,
    data: InitializerData,
    parameter: bool,
}

impl Initializer {
    fn into_proto(self) -> Result<TensorProto, ExportError> {
        let mut tensor = TensorProto::new();
        tensor.name = self.name;
        tensor.dims = self.dims.iter().map(|&dim| dim as i64).collect();

        match self.data {
            InitializerData::Float(data) => {
                let values = data
                    .convert::<f32>()
                    .to_vec::<f32>()
                    .map_err(|err| ExportError::TensorData(format!("{err:?}")))?;

                tensor.data_type = DataType::FLOAT.value();
                tensor.raw_data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            }
            InitializerData::Int64(values) => {
                tensor.data_type = DataType::INT64.value();
                tensor.int64_data = values;
            }
        }

        Ok(tensor)
    }
}

/// Accumulates the nodes and initializers of an inference graph.
///
/// Node names follow the `/<scope>/<OpType>` convention, with a numeric suffix when the
/// same operator appears more than once in a scope. Every node has a single output named
/// `<node name>_output_0`.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    options: GraphOptions,
    nodes: Vec<NodeProto>,
    initializers: Vec<Initializer>,
    name_counts: HashMap<String, usize>,
}

impl GraphBuilder {
    pub fn new(options: GraphOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn nodes(&self) -> &[NodeProto] {
        &self.nodes
    }

    /// Register a trained float parameter under its state-dict name.
    pub fn parameter(&mut self, name: &str, dims: Vec<usize>, data: TensorData) -> String {
        self.initializers.push(Initializer {
            name: name.to_string(),
            dims,
            data: InitializerData::Float(data),
            parameter: true,
        });
        name.to_string()
    }

    /// Register a one dimensional int64 constant.
    pub fn constant(&mut self, scope: &str, values: Vec<i64>) -> String {
        let name = format!("{}_output_0", self.unique_name(scope, "Constant"));
        self.initializers.push(Initializer {
            name: name.clone(),
            dims: vec![values.len()],
            data: InitializerData::Int64(values),
            parameter: false,
        });
        name
    }

    /// Append a node and return the name of its output.
    pub fn node(
        &mut self,
        op_type: &str,
        scope: &str,
        inputs: Vec<String>,
        attributes: Vec<AttributeProto>,
    ) -> String {
        let name = self.unique_name(scope, op_type);
        let output = format!("{name}_output_0");

        let mut node = NodeProto::new();
        node.name = name;
        node.op_type = op_type.to_string();
        node.input = inputs;
        node.output = vec![output.clone()];
        node.attribute = attributes;
        self.nodes.push(node);

        output
    }

    /// The axes `start..end` of the shape of `value`.
    pub fn shape_slice(
        &mut self,
        scope: &str,
        value: &str,
        shape: &SymbolicShape,
        start: usize,
        end: usize,
    ) -> ShapeVector {
        if self.options.fold_constants {
            if let Some(values) = shape.known(start, end) {
                return ShapeVector::Constant(values);
            }
        }

        let shape = self.node("Shape", scope, vec![value.to_string()], vec![]);
        let starts = self.constant(scope, vec![start as i64]);
        let ends = self.constant(scope, vec![end as i64]);
        let axes = self.constant(scope, vec![0]);
        let name = self.node("Slice", scope, vec![shape, starts, ends, axes], vec![]);

        ShapeVector::Value {
            name,
            len: end - start,
        }
    }

    /// Concatenate shape vectors.
    pub fn concat_shapes(&mut self, scope: &str, parts: Vec<ShapeVector>) -> ShapeVector {
        if self.options.fold_constants && parts.iter().all(ShapeVector::is_constant) {
            let values = parts
                .into_iter()
                .flat_map(|part| match part {
                    ShapeVector::Constant(values) => values,
                    ShapeVector::Value { .. } => Vec::new(),
                })
                .collect();
            return ShapeVector::Constant(values);
        }

        let len = parts.iter().map(ShapeVector::len).sum();
        let inputs = parts
            .into_iter()
            .map(|part| self.materialize(scope, part))
            .collect();
        let name = self.node("Concat", scope, inputs, vec![attr_int("axis", 0)]);

        ShapeVector::Value { name, len }
    }

    /// Name of a graph value holding the shape vector.
    pub fn materialize(&mut self, scope: &str, vector: ShapeVector) -> String {
        match vector {
            ShapeVector::Constant(values) => self.constant(scope, values),
            ShapeVector::Value { name, .. } => name,
        }
    }

    /// Rename a value everywhere it is produced or consumed.
    pub fn rename_value(&mut self, from: &str, to: &str) {
        for node in self.nodes.iter_mut() {
            for name in node.input.iter_mut().chain(node.output.iter_mut()) {
                if name == from {
                    *name = to.to_string();
                }
            }
        }
    }

    /// Number of trained float values registered so far.
    pub fn parameter_count(&self) -> usize {
        self.initializers
            .iter()
            .filter(|init| init.parameter)
            .map(|init| init.dims.iter().product::<usize>())
            .sum()
    }

    pub fn build(
        self,
        name: &str,
        inputs: Vec<ValueInfoProto>,
        outputs: Vec<ValueInfoProto>,
    ) -> Result<GraphProto, ExportError> {
        let mut graph = GraphProto::new();
        graph.name = name.to_string();
        graph.input = inputs;

        for initializer in self.initializers {
            if initializer.parameter && !self.options.export_params {
                let dims = initializer.dims.iter().map(|&dim| Dim::Fixed(dim)).collect();
                graph.input.push(tensor_value_info(
                    &initializer.name,
                    DataType::FLOAT,
                    &SymbolicShape::new(dims),
                ));
            } else {
                graph.initializer.push(initializer.into_proto()?);
            }
        }

        graph.node = self.nodes;
        graph.output = outputs;

        Ok(graph)
    }

    fn unique_name(&mut self, scope: &str, base: &str) -> String {
        let prefix = if scope.is_empty() {
            format!("/{base}")
        } else {
            format!("/{scope}/{base}")
        };

        let count = self.name_counts.entry(prefix.clone()).or_insert(0);
        let name = match *count {
            0 => prefix,
            n => format!("{prefix}_{n}"),
        };
        *count += 1;

        name
    }
}

/// Typed description of a tensor graph input or output.
pub fn tensor_value_info(name: &str, elem_type: DataType, shape: &SymbolicShape) -> ValueInfoProto {
    let mut shape_proto = TensorShapeProto::new();
    for dim in shape.dims() {
        let mut dimension = tensor_shape_proto::Dimension::new();
        dimension.value = match dim {
            Dim::Fixed(value) => Some(tensor_shape_proto::dimension::Value::DimValue(
                *value as i64,
            )),
            Dim::Symbol(symbol) => Some(tensor_shape_proto::dimension::Value::DimParam(
                symbol.clone(),
            )),
            Dim::Unknown => None,
        };
        shape_proto.dim.push(dimension);
    }

    let mut tensor_type = type_proto::Tensor::new();
    tensor_type.elem_type = elem_type.value();
    tensor_type.shape = MessageField::some(shape_proto);

    let mut ty = TypeProto::new();
    ty.value = Some(type_proto::Value::TensorType(tensor_type));

    let mut info = ValueInfoProto::new();
    info.name = name.to_string();
    info.type_ = MessageField::some(ty);
    info
}

pub(crate) fn attr_int(name: &str, value: i64) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = EnumOrUnknown::new(AttributeType::INT);
    attr.i = value;
    attr
}

pub(crate) fn attr_ints(name: &str, values: &[usize]) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = EnumOrUnknown::new(AttributeType::INTS);
    attr.ints = values.iter().map(|&v| v as i64).collect();
    attr
}

pub(crate) fn attr_float(name: &str, value: f32) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = EnumOrUnknown::new(AttributeType::FLOAT);
    attr.f = value;
    attr
}

pub(crate) fn attr_string(name: &str, value: &str) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = EnumOrUnknown::new(AttributeType::STRING);
    attr.s = value.as_bytes().to_vec();
    attr
}
