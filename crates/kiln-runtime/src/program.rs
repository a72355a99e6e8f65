//! Compiled, reusable graphs.

use crate::shared::ContextHandle;
use crate::tensor::Tensor;
use kiln_backend::{ExternalInput, ExternalOutput, Runtime, ValueId};
use kiln_compiler::map_backend_error;
use kiln_core::{Error, Graph, OperandDescriptor, OperatorId, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A named external value and the tensor it expects.
#[derive(Debug, Clone)]
struct Port {
    id: ValueId,
    descriptor: OperandDescriptor,
}

/// A graph compiled against the shared backend.
///
/// Computes are serialized by an internal lock, so a program can be shared
/// behind an `Arc` and reused any number of times without recompiling.
#[derive(Debug)]
pub struct GraphProgram {
    // Field order is drop order: the runtime and the data it was built from
    // go before the context reference that keeps the backend alive.
    runtime: Mutex<Runtime>,
    inputs: HashMap<String, Port>,
    outputs: HashMap<String, Port>,
    order: Vec<OperatorId>,
    _static_buffers: Vec<Arc<[u8]>>,
    _context: ContextHandle,
}

impl GraphProgram {
    /// Compile `graph`, holding `context` for the program's lifetime.
    #[tracing::instrument(skip_all, fields(operators = graph.operators().len()))]
    pub(crate) fn compile(graph: &Graph, context: ContextHandle) -> Result<Self> {
        let compiled = kiln_compiler::compile(graph)?;
        let (input_ids, output_ids, static_buffers) = compiled.bindings.into_parts();

        let inputs = graph
            .inputs()
            .filter_map(|operand| {
                let name = operand.name()?;
                let id = *input_ids.get(name)?;
                Some((name.to_string(), Port {
                    id,
                    descriptor: operand.descriptor.clone(),
                }))
            })
            .collect();

        let mut outputs = HashMap::with_capacity(output_ids.len());
        for (name, operand) in graph.outputs() {
            let id = output_ids.get(name).copied().ok_or_else(|| {
                Error::InvalidState(format!("output '{name}' was not bound"))
            })?;
            let descriptor = graph.operand(*operand)?.descriptor.clone();
            outputs.insert(name.clone(), Port { id, descriptor });
        }

        tracing::debug!(operators = compiled.order.len(), "built graph program");
        Ok(Self {
            runtime: Mutex::new(compiled.runtime),
            inputs,
            outputs,
            order: compiled.order,
            _static_buffers: static_buffers,
            _context: context,
        })
    }

    /// Run the graph once.
    ///
    /// `inputs` must supply exactly the graph inputs the outputs depend on,
    /// and `outputs` exactly the named outputs, each with the declared data
    /// type and shape. Results are written into the output tensors.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an unknown, missing or mismatched tensor. The
    /// program stays usable after any error.
    pub fn compute(
        &self,
        inputs: &HashMap<String, Tensor>,
        outputs: &mut HashMap<String, Tensor>,
    ) -> Result<()> {
        let bound_inputs = bind("input", &self.inputs, inputs.iter(), |tensor, id| {
            ExternalInput {
                id,
                data: tensor.as_bytes(),
            }
        })?;
        let mut bound_outputs =
            bind("output", &self.outputs, outputs.iter_mut(), |tensor, id| {
                ExternalOutput {
                    id,
                    data: tensor.as_bytes_mut(),
                }
            })?;

        let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        runtime
            .invoke(&bound_inputs, &mut bound_outputs)
            .map_err(|err| map_backend_error(err, "computing graph"))?;
        tracing::trace!(
            inputs = bound_inputs.len(),
            outputs = bound_outputs.len(),
            "computed graph"
        );
        Ok(())
    }

    /// Input names and their external value ids.
    ///
    /// Declared inputs that no named output depends on are absent.
    pub fn input_name_to_id(&self) -> HashMap<String, ValueId> {
        name_to_id(&self.inputs)
    }

    /// Output names and their external value ids.
    pub fn output_name_to_id(&self) -> HashMap<String, ValueId> {
        name_to_id(&self.outputs)
    }

    /// Descriptor of a named input, if the program reads it.
    pub fn input_descriptor(&self, name: &str) -> Option<&OperandDescriptor> {
        self.inputs.get(name).map(|port| &port.descriptor)
    }

    /// Descriptor of a named output.
    pub fn output_descriptor(&self, name: &str) -> Option<&OperandDescriptor> {
        self.outputs.get(name).map(|port| &port.descriptor)
    }

    /// Zeroed tensors for every output, ready to pass to [`compute`](Self::compute).
    pub fn allocate_outputs(&self) -> Result<HashMap<String, Tensor>> {
        self.outputs
            .iter()
            .map(|(name, port)| Ok((name.clone(), Tensor::zeros(&port.descriptor)?)))
            .collect()
    }

    /// Operators in execution order.
    pub fn operator_order(&self) -> &[OperatorId] {
        &self.order
    }
}

fn name_to_id(ports: &HashMap<String, Port>) -> HashMap<String, ValueId> {
    ports
        .iter()
        .map(|(name, port)| (name.clone(), port.id))
        .collect()
}

/// Match caller tensors to ports by name and check their descriptors.
fn bind<'a, T, B>(
    role: &str,
    ports: &HashMap<String, Port>,
    tensors: impl ExactSizeIterator<Item = (&'a String, T)>,
    make: impl Fn(T, ValueId) -> B,
) -> Result<Vec<B>>
where
    T: std::ops::Deref<Target = Tensor>,
{
    if tensors.len() != ports.len() {
        let mut missing: Vec<&str> = ports.keys().map(String::as_str).collect();
        missing.sort_unstable();
        return Err(Error::InvalidParameter(format!(
            "expected {} {role} tensors ({}), got {}",
            ports.len(),
            missing.join(", "),
            tensors.len()
        )));
    }

    tensors
        .map(|(name, tensor)| {
            let port = ports
                .get(name)
                .ok_or_else(|| Error::InvalidParameter(format!("unknown {role} '{name}'")))?;
            if tensor.dtype() != port.descriptor.dtype || tensor.shape() != port.descriptor.shape
            {
                return Err(Error::InvalidParameter(format!(
                    "{role} '{name}' expects {}, got {}",
                    port.descriptor,
                    tensor.descriptor()
                )));
            }
            Ok(make(tensor, port.id))
        })
        .collect()
}
