//! Operator to backend node translation.

use crate::bindings::BindingTable;
use kiln_backend::{
    BinaryKind, Convolution2dParams, FullyConnectedParams, Node, Pooling2dParams, UnaryKind,
};
use kiln_core::{
    BinaryOp, Error, FilterLayout, Graph, InputLayout, Operator, OperatorKind, PadMode, Result,
    UnaryOp,
};

/// Build the backend node for an operator whose operands are all bound.
pub fn lower_operator(graph: &Graph, operator: &Operator, bindings: &BindingTable) -> Result<Node> {
    let (min_inputs, max_inputs) = match &operator.kind {
        OperatorKind::Binary(_) => (2, 2),
        OperatorKind::Conv2d(_) | OperatorKind::Gemm(_) => (2, 3),
        OperatorKind::Concat { .. } => (1, usize::MAX),
        _ => (1, 1),
    };
    if operator.inputs.len() < min_inputs || operator.inputs.len() > max_inputs {
        return Err(Error::InvalidParameter(format!(
            "{} has {} inputs",
            operator.label(),
            operator.inputs.len()
        )));
    }
    let [output] = operator.outputs.as_slice() else {
        return Err(Error::InvalidParameter(format!(
            "{} must have exactly one output, has {}",
            operator.label(),
            operator.outputs.len()
        )));
    };

    let input = |i: usize| bindings.value(operator.inputs[i]);
    let optional = |i: usize| operator.inputs.get(i).map(|&id| bindings.value(id)).transpose();
    let output = bindings.value(*output)?;
    let unsupported = |what: &str| {
        Err(Error::Unsupported(format!(
            "{}: {what} is not supported by the backend",
            operator.label()
        )))
    };

    let node = match &operator.kind {
        OperatorKind::Binary(op) => {
            let kind = match op {
                BinaryOp::Add => BinaryKind::Add,
                BinaryOp::Sub => BinaryKind::Subtract,
                BinaryOp::Mul => BinaryKind::Multiply,
                BinaryOp::Div => BinaryKind::Divide,
                BinaryOp::Max => BinaryKind::Maximum,
                BinaryOp::Min => BinaryKind::Minimum,
                BinaryOp::Pow => return unsupported("operator pow"),
            };
            Node::Binary {
                kind,
                input1: input(0)?,
                input2: input(1)?,
                output,
            }
        }
        OperatorKind::Unary(op) => {
            let kind = match op {
                UnaryOp::Abs => UnaryKind::Abs,
                UnaryOp::Ceil => UnaryKind::Ceiling,
                UnaryOp::Floor => UnaryKind::Floor,
                UnaryOp::Neg => UnaryKind::Negate,
                UnaryOp::Sqrt => UnaryKind::SquareRoot,
                UnaryOp::Sigmoid => UnaryKind::Sigmoid,
                UnaryOp::Tanh => UnaryKind::Tanh,
                UnaryOp::HardSwish => UnaryKind::HardSwish,
                UnaryOp::Relu => UnaryKind::Clamp {
                    min: 0.0,
                    max: f32::INFINITY,
                },
                UnaryOp::Exp => return unsupported("operator exp"),
            };
            Node::Unary {
                kind,
                input: input(0)?,
                output,
            }
        }
        OperatorKind::Clamp(options) => Node::Unary {
            kind: UnaryKind::Clamp {
                min: options.min,
                max: options.max,
            },
            input: input(0)?,
            output,
        },
        OperatorKind::Elu { alpha } => Node::Unary {
            kind: UnaryKind::Elu { alpha: *alpha },
            input: input(0)?,
            output,
        },
        OperatorKind::LeakyRelu { alpha } => Node::Unary {
            kind: UnaryKind::LeakyRelu { slope: *alpha },
            input: input(0)?,
            output,
        },
        OperatorKind::Conv2d(options) => {
            if options.input_layout != InputLayout::Nhwc {
                return unsupported("nchw input layout");
            }
            if options.filter_layout != FilterLayout::Ohwi {
                return unsupported(&format!("{:?} filter layout", options.filter_layout));
            }
            Node::Convolution2d {
                params: Convolution2dParams {
                    padding: options.padding,
                    strides: options.strides,
                    dilations: options.dilations,
                    groups: options.groups,
                },
                input: input(0)?,
                filter: input(1)?,
                bias: optional(2)?,
                output,
            }
        }
        OperatorKind::Pool2d { kind, options } => {
            if options.layout != InputLayout::Nhwc {
                return unsupported("nchw input layout");
            }
            let window = match options.window_dimensions {
                Some(window) => window,
                None => {
                    let shape = &graph.operand(operator.inputs[0])?.descriptor.shape;
                    match shape.as_slice() {
                        &[_, height, width, _] => [height, width],
                        _ => {
                            return Err(Error::InvalidParameter(format!(
                                "{}: input must be 4-D",
                                operator.label()
                            )))
                        }
                    }
                }
            };
            let params = Pooling2dParams {
                window,
                padding: options.padding,
                strides: options.strides,
                dilations: options.dilations,
            };
            let input = input(0)?;
            match kind {
                kiln_core::PoolKind::Average => Node::AveragePooling2d {
                    params,
                    input,
                    output,
                },
                kiln_core::PoolKind::Max => Node::MaxPooling2d {
                    params,
                    input,
                    output,
                },
            }
        }
        OperatorKind::Gemm(options) => Node::FullyConnected {
            params: FullyConnectedParams {
                alpha: options.alpha,
                beta: options.beta,
                transpose_input: options.a_transpose,
                transpose_filter: options.b_transpose,
            },
            input: input(0)?,
            filter: input(1)?,
            bias: optional(2)?,
            output,
        },
        OperatorKind::Reshape => Node::StaticReshape {
            input: input(0)?,
            output,
        },
        OperatorKind::Softmax => Node::Softmax {
            input: input(0)?,
            output,
        },
        OperatorKind::Transpose { permutation } => Node::StaticTranspose {
            permutation: permutation.clone(),
            input: input(0)?,
            output,
        },
        OperatorKind::Concat { axis } => Node::Concatenate {
            axis: *axis,
            inputs: (0..operator.inputs.len())
                .map(input)
                .collect::<Result<Vec<_>>>()?,
            output,
        },
        OperatorKind::Pad(options) => {
            if options.mode != PadMode::Constant {
                return unsupported(&format!("{:?} padding", options.mode));
            }
            Node::StaticConstantPad {
                pre_padding: options.beginning.clone(),
                post_padding: options.ending.clone(),
                padding_value: options.value,
                input: input(0)?,
                output,
            }
        }
    };

    tracing::trace!(operator = %operator.id, node = node.name(), "lowered operator");
    Ok(node)
}
