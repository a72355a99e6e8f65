//! Build graphs operator by operator.
//!
//! The builder plays the role of the upstream graph-construction layer: it
//! validates attributes, infers every output descriptor, and hands out
//! operand handles. Operands can only be created from operands that already
//! exist, so a finished graph never contains a cycle.

use crate::broadcast::broadcast_shape;
use crate::ir::{Graph, Operand, OperandId, OperandKind, Operator, OperatorId};
use crate::options::{
    BinaryOp, ClampOptions, Conv2dOptions, FilterLayout, GemmOptions, InputLayout, OperatorKind,
    PadOptions, Pool2dOptions, PoolKind, UnaryOp,
};
use crate::types::{Element, OperandDescriptor};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Incrementally constructs a [`Graph`].
///
/// # Example
///
/// ```
/// use kiln_core::{DataType, GraphBuilder, OperandDescriptor};
///
/// # fn main() -> kiln_core::Result<()> {
/// let mut builder = GraphBuilder::new();
/// let desc = OperandDescriptor::new(DataType::F32, vec![4]);
/// let a = builder.input("a", desc.clone())?;
/// let b = builder.input("b", desc)?;
/// let c = builder.add(a, b)?;
/// let graph = builder.build(&[("c", c)])?;
/// assert_eq!(graph.operators().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    operands: Vec<Operand>,
    operators: Vec<Operator>,
    input_names: HashSet<String>,
}

impl GraphBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Leaves ──

    /// Declare a named graph input.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the name is empty or already used by
    /// another input, or if the descriptor size overflows.
    pub fn input(&mut self, name: &str, descriptor: OperandDescriptor) -> Result<OperandId> {
        if name.is_empty() {
            return Err(Error::InvalidParameter(
                "input name must not be empty".to_string(),
            ));
        }
        if !self.input_names.insert(name.to_string()) {
            return Err(Error::InvalidParameter(format!(
                "duplicate input name '{name}'"
            )));
        }
        validate_descriptor(&descriptor)?;
        Ok(self.push_operand(
            OperandKind::Input {
                name: name.to_string(),
            },
            descriptor,
            None,
        ))
    }

    /// Declare a constant from raw bytes in native byte order.
    pub fn constant(
        &mut self,
        descriptor: OperandDescriptor,
        data: impl Into<Vec<u8>>,
    ) -> Result<OperandId> {
        let data = data.into();
        validate_descriptor(&descriptor)?;
        if data.len() != descriptor.byte_length() {
            return Err(Error::InvalidParameter(format!(
                "constant {descriptor} needs {} bytes, got {}",
                descriptor.byte_length(),
                data.len()
            )));
        }
        Ok(self.push_operand(
            OperandKind::Constant {
                data: Arc::from(data),
            },
            descriptor,
            None,
        ))
    }

    /// Declare a constant from typed values.
    pub fn constant_from_slice<T: Element>(
        &mut self,
        shape: &[usize],
        values: &[T],
    ) -> Result<OperandId> {
        let descriptor = OperandDescriptor::new(T::DTYPE, shape.to_vec());
        self.constant(descriptor, bytemuck::cast_slice::<T, u8>(values).to_vec())
    }

    // ── Generic operator entry point ──

    /// Record an operator with caller-inferred output descriptors.
    ///
    /// The attribute bundle is taken as already validated. The typed helpers
    /// below validate and infer shapes before delegating here.
    pub fn add_operator(
        &mut self,
        kind: OperatorKind,
        inputs: &[OperandId],
        output_descriptors: Vec<OperandDescriptor>,
    ) -> Result<Vec<OperandId>> {
        for &input in inputs {
            self.descriptor(input)?;
        }
        if output_descriptors.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "{} must produce at least one output",
                kind.name()
            )));
        }
        for descriptor in &output_descriptors {
            validate_descriptor(descriptor)?;
        }

        let operator_id = OperatorId(self.operators.len());
        let outputs: Vec<OperandId> = output_descriptors
            .into_iter()
            .map(|desc| self.push_operand(OperandKind::Intermediate, desc, Some(operator_id)))
            .collect();

        tracing::trace!(operator = %operator_id, kind = kind.name(), "recorded operator");
        self.operators.push(Operator {
            id: operator_id,
            kind,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
        });
        Ok(outputs)
    }

    // ── Elementwise ──

    /// Broadcasting binary operator.
    pub fn binary(&mut self, op: BinaryOp, a: OperandId, b: OperandId) -> Result<OperandId> {
        let lhs = self.descriptor(a)?;
        let rhs = self.descriptor(b)?;
        if lhs.dtype != rhs.dtype {
            return Err(Error::InvalidParameter(format!(
                "{}: operand types differ ({} vs {})",
                op.name(),
                lhs.dtype,
                rhs.dtype
            )));
        }
        let shape = broadcast_shape(&lhs.shape, &rhs.shape)?;
        let desc = OperandDescriptor::new(lhs.dtype, shape);
        self.single(OperatorKind::Binary(op), &[a, b], desc)
    }

    pub fn add(&mut self, a: OperandId, b: OperandId) -> Result<OperandId> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: OperandId, b: OperandId) -> Result<OperandId> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: OperandId, b: OperandId) -> Result<OperandId> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: OperandId, b: OperandId) -> Result<OperandId> {
        self.binary(BinaryOp::Div, a, b)
    }

    pub fn max(&mut self, a: OperandId, b: OperandId) -> Result<OperandId> {
        self.binary(BinaryOp::Max, a, b)
    }

    pub fn min(&mut self, a: OperandId, b: OperandId) -> Result<OperandId> {
        self.binary(BinaryOp::Min, a, b)
    }

    pub fn pow(&mut self, a: OperandId, b: OperandId) -> Result<OperandId> {
        self.binary(BinaryOp::Pow, a, b)
    }

    /// Shape-preserving unary operator.
    pub fn unary(&mut self, op: UnaryOp, x: OperandId) -> Result<OperandId> {
        let desc = self.descriptor(x)?.clone();
        self.single(OperatorKind::Unary(op), &[x], desc)
    }

    pub fn relu(&mut self, x: OperandId) -> Result<OperandId> {
        self.unary(UnaryOp::Relu, x)
    }

    pub fn sigmoid(&mut self, x: OperandId) -> Result<OperandId> {
        self.unary(UnaryOp::Sigmoid, x)
    }

    pub fn tanh(&mut self, x: OperandId) -> Result<OperandId> {
        self.unary(UnaryOp::Tanh, x)
    }

    pub fn hard_swish(&mut self, x: OperandId) -> Result<OperandId> {
        self.unary(UnaryOp::HardSwish, x)
    }

    /// Clamp every element into `[min, max]`.
    pub fn clamp(&mut self, x: OperandId, options: ClampOptions) -> Result<OperandId> {
        if options.min.is_nan() || options.max.is_nan() || options.min > options.max {
            return Err(Error::InvalidParameter(format!(
                "clamp: invalid bounds [{}, {}]",
                options.min, options.max
            )));
        }
        let desc = self.descriptor(x)?.clone();
        self.single(OperatorKind::Clamp(options), &[x], desc)
    }

    pub fn elu(&mut self, x: OperandId, alpha: f32) -> Result<OperandId> {
        if alpha.is_nan() || alpha <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "elu: alpha must be positive, got {alpha}"
            )));
        }
        let desc = self.descriptor(x)?.clone();
        self.single(OperatorKind::Elu { alpha }, &[x], desc)
    }

    pub fn leaky_relu(&mut self, x: OperandId, alpha: f32) -> Result<OperandId> {
        if !alpha.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "leakyRelu: alpha must be finite, got {alpha}"
            )));
        }
        let desc = self.descriptor(x)?.clone();
        self.single(OperatorKind::LeakyRelu { alpha }, &[x], desc)
    }

    // ── Convolution and pooling ──

    /// 2-D convolution with an optional per-output-channel bias.
    pub fn conv2d(
        &mut self,
        input: OperandId,
        filter: OperandId,
        bias: Option<OperandId>,
        options: Conv2dOptions,
    ) -> Result<OperandId> {
        let input_desc = self.descriptor(input)?;
        let filter_desc = self.descriptor(filter)?;
        if input_desc.rank() != 4 || filter_desc.rank() != 4 {
            return Err(Error::InvalidParameter(format!(
                "conv2d: input and filter must be 4-D, got {} and {}",
                input_desc, filter_desc
            )));
        }
        if input_desc.dtype != filter_desc.dtype {
            return Err(Error::InvalidParameter(format!(
                "conv2d: input type {} does not match filter type {}",
                input_desc.dtype, filter_desc.dtype
            )));
        }
        validate_window_params("conv2d", options.strides, options.dilations)?;
        if options.groups == 0 {
            return Err(Error::InvalidParameter(
                "conv2d: groups must be positive".to_string(),
            ));
        }

        let [batch, in_height, in_width, in_channels] =
            spatial_dims(&input_desc.shape, options.input_layout);
        let f = &filter_desc.shape;
        let (out_channels, filter_height, filter_width, filter_in) = match options.filter_layout {
            FilterLayout::Oihw => (f[0], f[2], f[3], f[1]),
            FilterLayout::Hwio => (f[3], f[0], f[1], f[2]),
            FilterLayout::Ohwi => (f[0], f[1], f[2], f[3]),
            FilterLayout::Ihwo => (f[3], f[1], f[2], f[0]),
        };
        if filter_in.checked_mul(options.groups) != Some(in_channels) {
            return Err(Error::InvalidParameter(format!(
                "conv2d: {in_channels} input channels do not match filter input channels \
                 {filter_in} x groups {}",
                options.groups
            )));
        }
        if out_channels % options.groups != 0 {
            return Err(Error::InvalidParameter(format!(
                "conv2d: {out_channels} output channels are not divisible by groups {}",
                options.groups
            )));
        }

        let out_height = window_output_size(
            "conv2d",
            in_height,
            filter_height,
            options.padding[0],
            options.padding[1],
            options.strides[0],
            options.dilations[0],
        )?;
        let out_width = window_output_size(
            "conv2d",
            in_width,
            filter_width,
            options.padding[2],
            options.padding[3],
            options.strides[1],
            options.dilations[1],
        )?;

        let dtype = input_desc.dtype;
        let mut inputs = vec![input, filter];
        if let Some(bias) = bias {
            let bias_desc = self.descriptor(bias)?;
            if bias_desc.shape != [out_channels] || bias_desc.dtype != dtype {
                return Err(Error::InvalidParameter(format!(
                    "conv2d: bias must be {dtype}[{out_channels}], got {bias_desc}"
                )));
            }
            inputs.push(bias);
        }

        let shape = layout_shape(
            options.input_layout,
            [batch, out_height, out_width, out_channels],
        );
        let desc = OperandDescriptor::new(dtype, shape);
        self.single(OperatorKind::Conv2d(options), &inputs, desc)
    }

    /// 2-D average or max pooling.
    pub fn pool2d(
        &mut self,
        kind: PoolKind,
        input: OperandId,
        mut options: Pool2dOptions,
    ) -> Result<OperandId> {
        let input_desc = self.descriptor(input)?;
        let name = match kind {
            PoolKind::Average => "averagePool2d",
            PoolKind::Max => "maxPool2d",
        };
        if input_desc.rank() != 4 {
            return Err(Error::InvalidParameter(format!(
                "{name}: input must be 4-D, got {input_desc}"
            )));
        }
        validate_window_params(name, options.strides, options.dilations)?;

        let [batch, in_height, in_width, channels] =
            spatial_dims(&input_desc.shape, options.layout);
        let window = *options
            .window_dimensions
            .get_or_insert([in_height, in_width]);
        if window[0] == 0 || window[1] == 0 {
            return Err(Error::InvalidParameter(format!(
                "{name}: window dimensions must be positive, got {window:?}"
            )));
        }

        let out_height = window_output_size(
            name,
            in_height,
            window[0],
            options.padding[0],
            options.padding[1],
            options.strides[0],
            options.dilations[0],
        )?;
        let out_width = window_output_size(
            name,
            in_width,
            window[1],
            options.padding[2],
            options.padding[3],
            options.strides[1],
            options.dilations[1],
        )?;

        let shape = layout_shape(options.layout, [batch, out_height, out_width, channels]);
        let desc = OperandDescriptor::new(input_desc.dtype, shape);
        self.single(OperatorKind::Pool2d { kind, options }, &[input], desc)
    }

    pub fn average_pool2d(&mut self, input: OperandId, options: Pool2dOptions) -> Result<OperandId> {
        self.pool2d(PoolKind::Average, input, options)
    }

    pub fn max_pool2d(&mut self, input: OperandId, options: Pool2dOptions) -> Result<OperandId> {
        self.pool2d(PoolKind::Max, input, options)
    }

    // ── Matrix multiplication ──

    /// General matrix multiplication `alpha * A' * B' + beta * C`.
    pub fn gemm(
        &mut self,
        a: OperandId,
        b: OperandId,
        c: Option<OperandId>,
        options: GemmOptions,
    ) -> Result<OperandId> {
        let a_desc = self.descriptor(a)?;
        let b_desc = self.descriptor(b)?;
        if a_desc.rank() != 2 || b_desc.rank() != 2 {
            return Err(Error::InvalidParameter(format!(
                "gemm: operands must be 2-D, got {a_desc} and {b_desc}"
            )));
        }
        if a_desc.dtype != b_desc.dtype {
            return Err(Error::InvalidParameter(format!(
                "gemm: operand types differ ({} vs {})",
                a_desc.dtype, b_desc.dtype
            )));
        }

        let (m, k) = if options.a_transpose {
            (a_desc.shape[1], a_desc.shape[0])
        } else {
            (a_desc.shape[0], a_desc.shape[1])
        };
        let (k2, n) = if options.b_transpose {
            (b_desc.shape[1], b_desc.shape[0])
        } else {
            (b_desc.shape[0], b_desc.shape[1])
        };
        if k != k2 {
            return Err(Error::InvalidParameter(format!(
                "gemm: inner dimensions differ ({k} vs {k2})"
            )));
        }

        let dtype = a_desc.dtype;
        let mut inputs = vec![a, b];
        if let Some(c) = c {
            let c_desc = self.descriptor(c)?;
            if c_desc.dtype != dtype || broadcast_shape(&c_desc.shape, &[m, n])? != [m, n] {
                return Err(Error::InvalidParameter(format!(
                    "gemm: C operand {c_desc} is not broadcastable to [{m}, {n}]"
                )));
            }
            inputs.push(c);
        }

        let desc = OperandDescriptor::new(dtype, vec![m, n]);
        self.single(OperatorKind::Gemm(options), &inputs, desc)
    }

    // ── Data movement ──

    /// Reinterpret `x` with a new shape of the same element count.
    pub fn reshape(&mut self, x: OperandId, new_shape: &[usize]) -> Result<OperandId> {
        let desc = self.descriptor(x)?;
        let target = OperandDescriptor::new(desc.dtype, new_shape.to_vec());
        validate_descriptor(&target)?;
        if target.element_count() != desc.element_count() {
            return Err(Error::InvalidParameter(format!(
                "reshape: cannot reshape {desc} to {new_shape:?}"
            )));
        }
        self.single(OperatorKind::Reshape, &[x], target)
    }

    /// Softmax over the last axis.
    pub fn softmax(&mut self, x: OperandId) -> Result<OperandId> {
        let desc = self.descriptor(x)?.clone();
        if desc.rank() == 0 {
            return Err(Error::InvalidParameter(
                "softmax: input must have at least one dimension".to_string(),
            ));
        }
        self.single(OperatorKind::Softmax, &[x], desc)
    }

    /// Permute dimensions; `None` reverses them.
    pub fn transpose(&mut self, x: OperandId, permutation: Option<Vec<usize>>) -> Result<OperandId> {
        let desc = self.descriptor(x)?;
        let rank = desc.rank();
        let permutation = permutation.unwrap_or_else(|| (0..rank).rev().collect());

        let mut seen = vec![false; rank];
        let valid = permutation.len() == rank
            && permutation
                .iter()
                .all(|&axis| axis < rank && !std::mem::replace(&mut seen[axis], true));
        if !valid {
            return Err(Error::InvalidParameter(format!(
                "transpose: {permutation:?} is not a permutation of rank {rank}"
            )));
        }

        let shape = permutation.iter().map(|&axis| desc.shape[axis]).collect::<Vec<_>>();
        let out = OperandDescriptor::new(desc.dtype, shape);
        self.single(OperatorKind::Transpose { permutation }, &[x], out)
    }

    /// Concatenate along `axis`.
    pub fn concat(&mut self, inputs: &[OperandId], axis: usize) -> Result<OperandId> {
        let first = match inputs.first() {
            Some(&first) => self.descriptor(first)?.clone(),
            None => {
                return Err(Error::InvalidParameter(
                    "concat: at least one input is required".to_string(),
                ))
            }
        };
        if axis >= first.rank() {
            return Err(Error::InvalidParameter(format!(
                "concat: axis {axis} out of range for rank {}",
                first.rank()
            )));
        }

        let mut shape = first.shape.clone();
        for &input in &inputs[1..] {
            let desc = self.descriptor(input)?;
            let compatible = desc.dtype == first.dtype
                && desc.rank() == first.rank()
                && desc
                    .shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(Error::InvalidParameter(format!(
                    "concat: {desc} is incompatible with {first} along axis {axis}"
                )));
            }
            shape[axis] = shape[axis].checked_add(desc.shape[axis]).ok_or_else(|| {
                Error::InvalidParameter(format!("concat: axis {axis} size overflows"))
            })?;
        }

        let desc = OperandDescriptor::new(first.dtype, shape);
        self.single(OperatorKind::Concat { axis }, inputs, desc)
    }

    /// Pad every dimension by `beginning[i]` / `ending[i]` elements.
    pub fn pad(&mut self, x: OperandId, options: PadOptions) -> Result<OperandId> {
        let desc = self.descriptor(x)?;
        if options.beginning.len() != desc.rank() || options.ending.len() != desc.rank() {
            return Err(Error::InvalidParameter(format!(
                "pad: padding lengths must equal rank {}",
                desc.rank()
            )));
        }
        let shape = desc
            .shape
            .iter()
            .zip(options.beginning.iter().zip(&options.ending))
            .map(|(&dim, (&begin, &end))| {
                dim.checked_add(begin)
                    .and_then(|padded| padded.checked_add(end))
                    .ok_or_else(|| {
                        Error::InvalidParameter(format!(
                            "pad: padding {begin} + {end} overflows dimension {dim}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let out = OperandDescriptor::new(desc.dtype, shape);
        self.single(OperatorKind::Pad(options), &[x], out)
    }

    // ── Finish ──

    /// Finish the graph with the given named outputs.
    ///
    /// Output names must be unique and each operand may be named once.
    /// Operands produced by an operator become `Output` operands; naming an
    /// input or constant directly yields an identity passthrough.
    pub fn build(mut self, outputs: &[(&str, OperandId)]) -> Result<Graph> {
        if outputs.is_empty() {
            return Err(Error::InvalidParameter(
                "a graph needs at least one output".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut operands = HashSet::new();
        for &(name, id) in outputs {
            if name.is_empty() {
                return Err(Error::InvalidParameter(
                    "output name must not be empty".to_string(),
                ));
            }
            if !names.insert(name) {
                return Err(Error::InvalidParameter(format!(
                    "duplicate output name '{name}'"
                )));
            }
            self.descriptor(id)?;
            if !operands.insert(id) {
                return Err(Error::InvalidParameter(format!(
                    "operand {id} is bound to more than one output name"
                )));
            }

            let operand = &mut self.operands[id.index()];
            if operand.producer.is_some() {
                operand.kind = OperandKind::Output {
                    name: name.to_string(),
                };
            }
        }

        let outputs: Vec<(String, OperandId)> = outputs
            .iter()
            .map(|&(name, id)| (name.to_string(), id))
            .collect();
        tracing::debug!(
            operands = self.operands.len(),
            operators = self.operators.len(),
            outputs = outputs.len(),
            "built graph"
        );
        Ok(Graph::from_parts(self.operands, self.operators, outputs))
    }

    // ── Helpers ──

    fn push_operand(
        &mut self,
        kind: OperandKind,
        descriptor: OperandDescriptor,
        producer: Option<OperatorId>,
    ) -> OperandId {
        let id = OperandId(self.operands.len());
        self.operands.push(Operand {
            id,
            kind,
            descriptor,
            producer,
        });
        id
    }

    fn descriptor(&self, id: OperandId) -> Result<&OperandDescriptor> {
        self.operands
            .get(id.index())
            .map(|operand| &operand.descriptor)
            .ok_or_else(|| Error::InvalidParameter(format!("operand {id} does not exist")))
    }

    fn single(
        &mut self,
        kind: OperatorKind,
        inputs: &[OperandId],
        output: OperandDescriptor,
    ) -> Result<OperandId> {
        let outputs = self.add_operator(kind, inputs, vec![output])?;
        Ok(outputs[0])
    }
}

fn validate_descriptor(descriptor: &OperandDescriptor) -> Result<()> {
    match descriptor.checked_byte_length() {
        Some(_) => Ok(()),
        None => Err(Error::InvalidParameter(format!(
            "operand size of {descriptor} overflows"
        ))),
    }
}

fn validate_window_params(name: &str, strides: [usize; 2], dilations: [usize; 2]) -> Result<()> {
    if strides.contains(&0) || dilations.contains(&0) {
        return Err(Error::InvalidParameter(format!(
            "{name}: strides {strides:?} and dilations {dilations:?} must be positive"
        )));
    }
    Ok(())
}

/// `[batch, height, width, channels]` regardless of layout.
fn spatial_dims(shape: &[usize], layout: InputLayout) -> [usize; 4] {
    match layout {
        InputLayout::Nchw => [shape[0], shape[2], shape[3], shape[1]],
        InputLayout::Nhwc => [shape[0], shape[1], shape[2], shape[3]],
    }
}

/// Inverse of [`spatial_dims`].
fn layout_shape(layout: InputLayout, [n, h, w, c]: [usize; 4]) -> Vec<usize> {
    match layout {
        InputLayout::Nchw => vec![n, c, h, w],
        InputLayout::Nhwc => vec![n, h, w, c],
    }
}

fn window_output_size(
    name: &str,
    input: usize,
    window: usize,
    pad_begin: usize,
    pad_end: usize,
    stride: usize,
    dilation: usize,
) -> Result<usize> {
    let overflow = || {
        Error::InvalidParameter(format!(
            "{name}: window {window} (dilation {dilation}) or padding \
             {pad_begin}/{pad_end} overflows"
        ))
    };
    let effective = dilation
        .checked_mul(window.saturating_sub(1))
        .and_then(|span| span.checked_add(1))
        .ok_or_else(overflow)?;
    let padded = input
        .checked_add(pad_begin)
        .and_then(|padded| padded.checked_add(pad_end))
        .ok_or_else(overflow)?;
    if window == 0 || padded < effective {
        return Err(Error::InvalidParameter(format!(
            "{name}: window {window} (dilation {dilation}) does not fit padded input {padded}"
        )));
    }
    Ok((padded - effective) / stride + 1)
}
