//! Compiled, invocable form of a subgraph.

use crate::error::{BackendError, Result};
use crate::kernels::nn::Pooling;
use crate::kernels::{elementwise, nn, shape};
use crate::library::ensure_initialized;
use crate::node::Node;
use crate::subgraph::Subgraph;
use crate::types::{Datatype, ExternalInput, ExternalOutput, ValueFlags, ValueId};

/// Metadata the runtime keeps per value.
#[derive(Debug, Clone)]
struct ValueInfo {
    datatype: Datatype,
    dims: Vec<usize>,
    flags: ValueFlags,
}

impl ValueInfo {
    fn byte_length(&self) -> usize {
        self.dims.iter().product::<usize>() * self.datatype.size()
    }
}

/// An executable plan built from a [`Subgraph`].
///
/// The runtime copies everything it needs out of the subgraph, including
/// static data, so the subgraph can be dropped right after compilation.
/// Every value gets a workspace of raw 32-bit words; arithmetic kernels view
/// them as `f32`, data movement kernels copy them as-is.
#[derive(Debug)]
pub struct Runtime {
    values: Vec<ValueInfo>,
    buffers: Vec<Vec<u32>>,
    nodes: Vec<Node>,
    external_inputs: Vec<ValueId>,
    external_outputs: Vec<ValueId>,
}

impl Runtime {
    /// Compile a subgraph.
    ///
    /// # Errors
    ///
    /// `Uninitialized` if the library is not initialized; `InvalidState` if
    /// an external value was never defined, a node reads a value nothing
    /// wrote yet, a value is written twice or an external output is never
    /// written.
    pub fn new(subgraph: &Subgraph) -> Result<Self> {
        ensure_initialized("creating a runtime")?;

        let mut values = Vec::with_capacity(subgraph.value_slots().len());
        let mut buffers = Vec::with_capacity(values.capacity());
        let mut available = Vec::with_capacity(values.capacity());
        for (index, slot) in subgraph.value_slots().iter().enumerate() {
            let value = slot.as_ref().ok_or_else(|| {
                BackendError::invalid_state(format!("external value v{index} was never defined"))
            })?;
            let words = match &value.data {
                Some(data) => data
                    .chunks_exact(4)
                    .map(bytemuck::pod_read_unaligned::<u32>)
                    .collect(),
                None => vec![0u32; value.element_count()],
            };
            values.push(ValueInfo {
                datatype: value.datatype,
                dims: value.dims.clone(),
                flags: value.flags,
            });
            buffers.push(words);
            available.push(value.is_static() || value.flags.contains(ValueFlags::EXTERNAL_INPUT));
        }

        for node in subgraph.nodes() {
            if let Some(input) = node.inputs().into_iter().find(|id| !available[id.index()]) {
                return Err(BackendError::invalid_state(format!(
                    "{} reads {input} before it is produced",
                    node.name()
                )));
            }
            let output = node.output();
            if std::mem::replace(&mut available[output.index()], true) {
                return Err(BackendError::invalid_state(format!(
                    "{} writes {output}, which already has a producer",
                    node.name()
                )));
            }
        }

        let external = |flag: ValueFlags| -> Vec<ValueId> {
            values
                .iter()
                .enumerate()
                .filter(|(_, info)| info.flags.contains(flag))
                .map(|(index, _)| ValueId(index as u32))
                .collect()
        };
        let external_inputs = external(ValueFlags::EXTERNAL_INPUT);
        let external_outputs = external(ValueFlags::EXTERNAL_OUTPUT);

        if let Some(id) = external_outputs.iter().find(|id| !available[id.index()]) {
            return Err(BackendError::invalid_state(format!(
                "external output {id} is never written"
            )));
        }

        tracing::debug!(
            values = values.len(),
            nodes = subgraph.nodes().len(),
            inputs = external_inputs.len(),
            outputs = external_outputs.len(),
            "created runtime"
        );

        Ok(Self {
            values,
            buffers,
            nodes: subgraph.nodes().to_vec(),
            external_inputs,
            external_outputs,
        })
    }

    /// Ids of the external inputs, ascending.
    pub fn external_inputs(&self) -> &[ValueId] {
        &self.external_inputs
    }

    /// Ids of the external outputs, ascending.
    pub fn external_outputs(&self) -> &[ValueId] {
        &self.external_outputs
    }

    /// Run every node once.
    ///
    /// Each external input and output must be supplied exactly once with a
    /// buffer of exactly the value's byte length. Results are written into
    /// the output buffers.
    pub fn invoke(
        &mut self,
        inputs: &[ExternalInput<'_>],
        outputs: &mut [ExternalOutput<'_>],
    ) -> Result<()> {
        let input_ids: Vec<(ValueId, usize)> =
            inputs.iter().map(|input| (input.id, input.data.len())).collect();
        let output_ids: Vec<(ValueId, usize)> = outputs
            .iter()
            .map(|output| (output.id, output.data.len()))
            .collect();
        self.check_bindings("input", ValueFlags::EXTERNAL_INPUT, &input_ids)?;
        self.check_bindings("output", ValueFlags::EXTERNAL_OUTPUT, &output_ids)?;

        for input in inputs {
            let buffer = &mut self.buffers[input.id.index()];
            for (word, chunk) in buffer.iter_mut().zip(input.data.chunks_exact(4)) {
                *word = bytemuck::pod_read_unaligned(chunk);
            }
        }

        let Self {
            values,
            buffers,
            nodes,
            ..
        } = self;
        for node in nodes.iter() {
            let output = node.output().index();
            let mut out = std::mem::take(&mut buffers[output]);
            run_node(node, values, buffers, &mut out);
            buffers[output] = out;
        }

        for output in outputs.iter_mut() {
            let words = &self.buffers[output.id.index()];
            output
                .data
                .copy_from_slice(bytemuck::cast_slice::<u32, u8>(words));
        }
        Ok(())
    }

    fn check_bindings(
        &self,
        role: &str,
        flag: ValueFlags,
        bound: &[(ValueId, usize)],
    ) -> Result<()> {
        let mut seen = vec![false; self.values.len()];
        for &(id, len) in bound {
            let info = self
                .values
                .get(id.index())
                .filter(|info| info.flags.contains(flag))
                .ok_or_else(|| {
                    BackendError::invalid_parameter(format!("{id} is not an external {role}"))
                })?;
            if std::mem::replace(&mut seen[id.index()], true) {
                return Err(BackendError::invalid_parameter(format!(
                    "external {role} {id} is bound more than once"
                )));
            }
            if len != info.byte_length() {
                return Err(BackendError::invalid_parameter(format!(
                    "external {role} {id} needs {} bytes, got {len}",
                    info.byte_length()
                )));
            }
        }

        let expected = match role {
            "input" => &self.external_inputs,
            _ => &self.external_outputs,
        };
        if let Some(missing) = expected.iter().find(|id| !seen[id.index()]) {
            return Err(BackendError::invalid_parameter(format!(
                "external {role} {missing} is not bound"
            )));
        }
        Ok(())
    }
}

fn run_node(node: &Node, values: &[ValueInfo], buffers: &[Vec<u32>], out: &mut [u32]) {
    let dims = |id: &ValueId| values[id.index()].dims.as_slice();
    let words = |id: &ValueId| buffers[id.index()].as_slice();
    let floats = |id: &ValueId| bytemuck::cast_slice::<u32, f32>(&buffers[id.index()]);

    match node {
        Node::Binary {
            kind,
            input1,
            input2,
            output,
        } => elementwise::binary(
            *kind,
            (floats(input1), dims(input1)),
            (floats(input2), dims(input2)),
            bytemuck::cast_slice_mut(out),
            dims(output),
        ),
        Node::Unary { kind, input, .. } => {
            elementwise::unary(*kind, floats(input), bytemuck::cast_slice_mut(out))
        }
        Node::Copy { input, .. } | Node::StaticReshape { input, .. } => {
            out.copy_from_slice(words(input))
        }
        Node::StaticTranspose {
            permutation,
            input,
            output,
        } => shape::transpose(words(input), dims(input), permutation, out, dims(output)),
        Node::Concatenate { axis, inputs, .. } => {
            let parts: Vec<(&[u32], &[usize])> =
                inputs.iter().map(|id| (words(id), dims(id))).collect();
            shape::concat(&parts, *axis, out)
        }
        Node::StaticConstantPad {
            pre_padding,
            padding_value,
            input,
            output,
            ..
        } => {
            let fill = match values[output.index()].datatype {
                Datatype::Fp32 => padding_value.to_bits(),
                Datatype::Int32 => bytemuck::cast(*padding_value as i32),
            };
            shape::constant_pad(words(input), dims(input), pre_padding, fill, out, dims(output))
        }
        Node::Softmax { input, .. } => {
            elementwise::softmax(floats(input), dims(input), bytemuck::cast_slice_mut(out))
        }
        Node::FullyConnected {
            params,
            input,
            filter,
            bias,
            ..
        } => nn::fully_connected(
            (floats(input), dims(input)),
            (floats(filter), dims(filter)),
            bias.as_ref().map(|id| (floats(id), dims(id))),
            params,
            bytemuck::cast_slice_mut(out),
        ),
        Node::Convolution2d {
            params,
            input,
            filter,
            bias,
            output,
        } => nn::conv2d(
            (floats(input), dims(input)),
            (floats(filter), dims(filter)),
            bias.as_ref().map(floats),
            params,
            bytemuck::cast_slice_mut(out),
            dims(output),
        ),
        Node::AveragePooling2d {
            params,
            input,
            output,
        } => nn::pool2d(
            Pooling::Average,
            (floats(input), dims(input)),
            params,
            bytemuck::cast_slice_mut(out),
            dims(output),
        ),
        Node::MaxPooling2d {
            params,
            input,
            output,
        } => nn::pool2d(
            Pooling::Max,
            (floats(input), dims(input)),
            params,
            bytemuck::cast_slice_mut(out),
            dims(output),
        ),
    }
}
