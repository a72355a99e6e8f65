//! Node definitions and their shape rules.

use crate::error::{BackendError, Result};
use crate::kernels::broadcast_dims;
use crate::subgraph::TensorValue;
use crate::types::{Datatype, ValueId};

/// Broadcasting elementwise binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
}

/// Elementwise unary operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryKind {
    Abs,
    Ceiling,
    Floor,
    Negate,
    SquareRoot,
    Sigmoid,
    Tanh,
    HardSwish,
    Clamp { min: f32, max: f32 },
    Elu { alpha: f32 },
    LeakyRelu { slope: f32 },
}

/// `padding` is `[top, bottom, left, right]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Convolution2dParams {
    pub padding: [usize; 4],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub groups: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pooling2dParams {
    pub window: [usize; 2],
    pub padding: [usize; 4],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
}

/// `output = alpha * input' x filter' + beta * bias`.
///
/// The filter is `[k, n]` unless `transpose_filter` is set, in which case it
/// is `[n, k]`. The bias broadcasts to `[m, n]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullyConnectedParams {
    pub alpha: f32,
    pub beta: f32,
    pub transpose_input: bool,
    pub transpose_filter: bool,
}

impl Default for FullyConnectedParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            transpose_input: false,
            transpose_filter: false,
        }
    }
}

/// One operation in a subgraph.
///
/// Every node writes exactly one output value. Activations are NHWC and
/// convolution filters are OHWI.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Binary {
        kind: BinaryKind,
        input1: ValueId,
        input2: ValueId,
        output: ValueId,
    },
    Unary {
        kind: UnaryKind,
        input: ValueId,
        output: ValueId,
    },
    Copy {
        input: ValueId,
        output: ValueId,
    },
    /// The new shape is the output value's shape.
    StaticReshape {
        input: ValueId,
        output: ValueId,
    },
    StaticTranspose {
        permutation: Vec<usize>,
        input: ValueId,
        output: ValueId,
    },
    Concatenate {
        axis: usize,
        inputs: Vec<ValueId>,
        output: ValueId,
    },
    StaticConstantPad {
        pre_padding: Vec<usize>,
        post_padding: Vec<usize>,
        padding_value: f32,
        input: ValueId,
        output: ValueId,
    },
    /// Normalizes over the last axis.
    Softmax {
        input: ValueId,
        output: ValueId,
    },
    FullyConnected {
        params: FullyConnectedParams,
        input: ValueId,
        filter: ValueId,
        bias: Option<ValueId>,
        output: ValueId,
    },
    Convolution2d {
        params: Convolution2dParams,
        input: ValueId,
        filter: ValueId,
        bias: Option<ValueId>,
        output: ValueId,
    },
    AveragePooling2d {
        params: Pooling2dParams,
        input: ValueId,
        output: ValueId,
    },
    MaxPooling2d {
        params: Pooling2dParams,
        input: ValueId,
        output: ValueId,
    },
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Binary { kind, .. } => match kind {
                BinaryKind::Add => "add",
                BinaryKind::Subtract => "subtract",
                BinaryKind::Multiply => "multiply",
                BinaryKind::Divide => "divide",
                BinaryKind::Maximum => "maximum",
                BinaryKind::Minimum => "minimum",
            },
            Node::Unary { kind, .. } => match kind {
                UnaryKind::Abs => "abs",
                UnaryKind::Ceiling => "ceiling",
                UnaryKind::Floor => "floor",
                UnaryKind::Negate => "negate",
                UnaryKind::SquareRoot => "square_root",
                UnaryKind::Sigmoid => "sigmoid",
                UnaryKind::Tanh => "tanh",
                UnaryKind::HardSwish => "hardswish",
                UnaryKind::Clamp { .. } => "clamp",
                UnaryKind::Elu { .. } => "elu",
                UnaryKind::LeakyRelu { .. } => "leaky_relu",
            },
            Node::Copy { .. } => "copy",
            Node::StaticReshape { .. } => "static_reshape",
            Node::StaticTranspose { .. } => "static_transpose",
            Node::Concatenate { .. } => "concatenate",
            Node::StaticConstantPad { .. } => "static_constant_pad",
            Node::Softmax { .. } => "softmax",
            Node::FullyConnected { .. } => "fully_connected",
            Node::Convolution2d { .. } => "convolution_2d",
            Node::AveragePooling2d { .. } => "average_pooling_2d",
            Node::MaxPooling2d { .. } => "max_pooling_2d",
        }
    }

    /// Input values in kernel argument order.
    pub fn inputs(&self) -> Vec<ValueId> {
        match self {
            Node::Binary { input1, input2, .. } => vec![*input1, *input2],
            Node::Unary { input, .. }
            | Node::Copy { input, .. }
            | Node::StaticReshape { input, .. }
            | Node::StaticTranspose { input, .. }
            | Node::StaticConstantPad { input, .. }
            | Node::Softmax { input, .. }
            | Node::AveragePooling2d { input, .. }
            | Node::MaxPooling2d { input, .. } => vec![*input],
            Node::Concatenate { inputs, .. } => inputs.clone(),
            Node::FullyConnected {
                input,
                filter,
                bias,
                ..
            }
            | Node::Convolution2d {
                input,
                filter,
                bias,
                ..
            } => {
                let mut inputs = vec![*input, *filter];
                inputs.extend(*bias);
                inputs
            }
        }
    }

    pub fn output(&self) -> ValueId {
        match self {
            Node::Binary { output, .. }
            | Node::Unary { output, .. }
            | Node::Copy { output, .. }
            | Node::StaticReshape { output, .. }
            | Node::StaticTranspose { output, .. }
            | Node::Concatenate { output, .. }
            | Node::StaticConstantPad { output, .. }
            | Node::Softmax { output, .. }
            | Node::FullyConnected { output, .. }
            | Node::Convolution2d { output, .. }
            | Node::AveragePooling2d { output, .. }
            | Node::MaxPooling2d { output, .. } => *output,
        }
    }

    /// Whether the node does arithmetic, as opposed to moving elements.
    fn is_arithmetic(&self) -> bool {
        !matches!(
            self,
            Node::Copy { .. }
                | Node::StaticReshape { .. }
                | Node::StaticTranspose { .. }
                | Node::Concatenate { .. }
                | Node::StaticConstantPad { .. }
        )
    }

    /// Check value types and shapes against the node's rules.
    pub(crate) fn validate(&self, inputs: &[&TensorValue], output: &TensorValue) -> Result<()> {
        let name = self.name();
        if inputs.iter().any(|value| value.id == output.id) {
            return Err(BackendError::invalid_parameter(format!(
                "{name}: output {} is also an input",
                output.id
            )));
        }
        if let Some(value) = inputs.iter().find(|v| v.datatype != output.datatype) {
            return Err(BackendError::invalid_parameter(format!(
                "{name}: input {} is {} but output {} is {}",
                value.id, value.datatype, output.id, output.datatype
            )));
        }
        if self.is_arithmetic() && output.datatype != Datatype::Fp32 {
            return Err(BackendError::unsupported(format!(
                "{name} does not support {} values",
                output.datatype
            )));
        }

        let expected = self.output_dims(inputs, output)?;
        if expected != output.dims {
            return Err(BackendError::invalid_parameter(format!(
                "{name}: output {} has shape {:?}, expected {:?}",
                output.id, output.dims, expected
            )));
        }
        Ok(())
    }

    fn output_dims(&self, inputs: &[&TensorValue], output: &TensorValue) -> Result<Vec<usize>> {
        let name = self.name();
        let first = match inputs.first() {
            Some(value) => &value.dims,
            None => {
                return Err(BackendError::invalid_parameter(format!(
                    "{name}: at least one input is required"
                )))
            }
        };
        match self {
            Node::Binary { .. } => broadcast_dims(first, &inputs[1].dims).ok_or_else(|| {
                BackendError::invalid_parameter(format!(
                    "{name}: shapes {first:?} and {:?} do not broadcast",
                    inputs[1].dims
                ))
            }),
            Node::Unary { kind, .. } => {
                if let UnaryKind::Clamp { min, max } = kind {
                    if min.is_nan() || max.is_nan() || min > max {
                        return Err(BackendError::invalid_parameter(format!(
                            "clamp: min {min} exceeds max {max}"
                        )));
                    }
                }
                Ok(first.clone())
            }
            Node::Copy { .. } => Ok(first.clone()),
            Node::Softmax { .. } => {
                if first.is_empty() {
                    return Err(BackendError::invalid_parameter(
                        "softmax: input must have at least one dimension",
                    ));
                }
                Ok(first.clone())
            }
            Node::StaticReshape { .. } => {
                let count = |dims: &[usize]| dims.iter().product::<usize>();
                if count(first) != count(&output.dims) {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: cannot reshape {first:?} to {:?}",
                        output.dims
                    )));
                }
                Ok(output.dims.clone())
            }
            Node::StaticTranspose { permutation, .. } => {
                let mut seen = vec![false; first.len()];
                let valid = permutation.len() == first.len()
                    && permutation.iter().all(|&axis| {
                        axis < first.len() && !std::mem::replace(&mut seen[axis], true)
                    });
                if !valid {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: invalid permutation {permutation:?} for rank {}",
                        first.len()
                    )));
                }
                Ok(permutation.iter().map(|&axis| first[axis]).collect())
            }
            Node::Concatenate { axis, .. } => {
                let axis = *axis;
                if axis >= first.len() {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: axis {axis} out of range for rank {}",
                        first.len()
                    )));
                }
                let mut dims = first.clone();
                for value in &inputs[1..] {
                    let compatible = value.dims.len() == first.len()
                        && value
                            .dims
                            .iter()
                            .zip(first)
                            .enumerate()
                            .all(|(i, (a, b))| i == axis || a == b);
                    if !compatible {
                        return Err(BackendError::invalid_parameter(format!(
                            "{name}: {:?} cannot be joined with {first:?} on axis {axis}",
                            value.dims
                        )));
                    }
                    dims[axis] += value.dims[axis];
                }
                Ok(dims)
            }
            Node::StaticConstantPad {
                pre_padding,
                post_padding,
                ..
            } => {
                if pre_padding.len() != first.len() || post_padding.len() != first.len() {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: padding must have {} entries",
                        first.len()
                    )));
                }
                Ok(first
                    .iter()
                    .zip(pre_padding.iter().zip(post_padding))
                    .map(|(dim, (pre, post))| dim + pre + post)
                    .collect())
            }
            Node::FullyConnected { params, .. } => {
                let filter = &inputs[1].dims;
                if first.len() != 2 || filter.len() != 2 {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: input {first:?} and filter {filter:?} must be 2-D"
                    )));
                }
                let (m, k) = if params.transpose_input {
                    (first[1], first[0])
                } else {
                    (first[0], first[1])
                };
                let (filter_k, n) = if params.transpose_filter {
                    (filter[1], filter[0])
                } else {
                    (filter[0], filter[1])
                };
                if k != filter_k {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: input {first:?} and filter {filter:?} disagree on the inner dimension"
                    )));
                }
                if let Some(bias) = inputs.get(2) {
                    if broadcast_dims(&bias.dims, &[m, n]).as_deref() != Some(&[m, n][..]) {
                        return Err(BackendError::invalid_parameter(format!(
                            "{name}: bias {:?} does not broadcast to [{m}, {n}]",
                            bias.dims
                        )));
                    }
                }
                Ok(vec![m, n])
            }
            Node::Convolution2d { params, .. } => {
                let filter = &inputs[1].dims;
                if first.len() != 4 || filter.len() != 4 {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: input {first:?} and filter {filter:?} must be 4-D"
                    )));
                }
                let groups = params.groups;
                let out_channels = filter[0];
                if groups == 0 || filter[3] * groups != first[3] || out_channels % groups != 0 {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: filter {filter:?} with {groups} groups does not fit input {first:?}"
                    )));
                }
                if let Some(bias) = inputs.get(2) {
                    if bias.dims != [out_channels] {
                        return Err(BackendError::invalid_parameter(format!(
                            "{name}: bias {:?} must be [{out_channels}]",
                            bias.dims
                        )));
                    }
                }
                let height = window_output_size(
                    name,
                    first[1],
                    filter[1],
                    [params.padding[0], params.padding[1]],
                    params.strides[0],
                    params.dilations[0],
                )?;
                let width = window_output_size(
                    name,
                    first[2],
                    filter[2],
                    [params.padding[2], params.padding[3]],
                    params.strides[1],
                    params.dilations[1],
                )?;
                Ok(vec![first[0], height, width, out_channels])
            }
            Node::AveragePooling2d { params, .. } | Node::MaxPooling2d { params, .. } => {
                if first.len() != 4 {
                    return Err(BackendError::invalid_parameter(format!(
                        "{name}: input {first:?} must be 4-D"
                    )));
                }
                let height = window_output_size(
                    name,
                    first[1],
                    params.window[0],
                    [params.padding[0], params.padding[1]],
                    params.strides[0],
                    params.dilations[0],
                )?;
                let width = window_output_size(
                    name,
                    first[2],
                    params.window[1],
                    [params.padding[2], params.padding[3]],
                    params.strides[1],
                    params.dilations[1],
                )?;
                Ok(vec![first[0], height, width, first[3]])
            }
        }
    }
}

fn window_output_size(
    name: &str,
    input: usize,
    window: usize,
    [pad_begin, pad_end]: [usize; 2],
    stride: usize,
    dilation: usize,
) -> Result<usize> {
    if window == 0 || stride == 0 || dilation == 0 {
        return Err(BackendError::invalid_parameter(format!(
            "{name}: window {window}, stride {stride} and dilation {dilation} must be positive"
        )));
    }
    let effective = dilation * (window - 1) + 1;
    let padded = input + pad_begin + pad_end;
    if padded < effective {
        return Err(BackendError::invalid_parameter(format!(
            "{name}: window of extent {effective} exceeds padded input {padded}"
        )));
    }
    Ok((padded - effective) / stride + 1)
}
