//! Operand to backend value bindings.
//!
//! Every operand the compiled operators touch gets exactly one backend value.
//! Bindings are created in a fixed order so external ids are predictable:
//! named outputs first (ids `0..n_outputs` in declaration order), then graph
//! inputs in the order the sorted operators first read them.

use crate::error::BackendResultExt;
use kiln_backend::{Datatype, Subgraph, ValueFlags, ValueId};
use kiln_core::{DataType, Error, Graph, Operand, OperandId, OperandKind, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// How a backend value is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRole {
    /// Bound to caller memory at compute time.
    ExternalInput,
    /// Written to caller memory at compute time.
    ExternalOutput,
    /// Runtime-owned scratch between operators.
    Internal,
    /// Constant data fixed at compile time.
    Static,
}

/// A backend value and its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueBinding {
    pub value: ValueId,
    pub role: ValueRole,
}

/// Map a graph element type onto a backend datatype.
pub fn backend_datatype(dtype: DataType) -> Result<Datatype> {
    match dtype {
        DataType::F32 => Ok(Datatype::Fp32),
        DataType::I32 => Ok(Datatype::Int32),
        DataType::F16 | DataType::U32 | DataType::I64 | DataType::I8 | DataType::U8 => Err(
            Error::Unsupported(format!("data type {dtype} is not supported by the backend")),
        ),
    }
}

/// Bindings accumulated while compiling one graph.
#[derive(Debug, Default)]
pub struct BindingTable {
    bindings: HashMap<OperandId, ValueBinding>,
    input_ids: HashMap<String, ValueId>,
    output_ids: HashMap<String, ValueId>,
    static_buffers: Vec<Arc<[u8]>>,
    next_external: u32,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding of an operand, if it has one.
    pub fn get(&self, operand: OperandId) -> Option<ValueBinding> {
        self.bindings.get(&operand).copied()
    }

    /// Backend value of an operand that must already be bound.
    pub fn value(&self, operand: OperandId) -> Result<ValueId> {
        self.get(operand).map(|binding| binding.value).ok_or_else(|| {
            Error::InvalidState(format!("operand {operand} has no backend value"))
        })
    }

    /// Number of bound operands.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// All bindings ordered by backend value id.
    pub fn iter(&self) -> Vec<(OperandId, ValueBinding)> {
        let mut entries: Vec<_> = self
            .bindings
            .iter()
            .map(|(operand, binding)| (*operand, *binding))
            .collect();
        entries.sort_by_key(|(_, binding)| binding.value);
        entries
    }

    pub fn input_name_to_id(&self) -> &HashMap<String, ValueId> {
        &self.input_ids
    }

    pub fn output_name_to_id(&self) -> &HashMap<String, ValueId> {
        &self.output_ids
    }

    /// Constant bytes the compiled program must keep alive.
    pub fn static_buffers(&self) -> &[Arc<[u8]>] {
        &self.static_buffers
    }

    /// Split into the name tables and the static storage.
    pub fn into_parts(
        self,
    ) -> (
        HashMap<String, ValueId>,
        HashMap<String, ValueId>,
        Vec<Arc<[u8]>>,
    ) {
        (self.input_ids, self.output_ids, self.static_buffers)
    }

    /// Define the external output value for a named output.
    ///
    /// A produced operand is bound to it directly. A named output that is an
    /// input or constant only gets the external value; the returned id is the
    /// target of the copy the compiler emits for it.
    pub fn bind_output(
        &mut self,
        subgraph: &mut Subgraph,
        name: &str,
        operand: &Operand,
    ) -> Result<ValueId> {
        let value = self.define_external(subgraph, operand, ValueFlags::EXTERNAL_OUTPUT)?;
        self.output_ids.insert(name.to_string(), value);
        if operand.producer.is_some() {
            self.insert(operand.id, value, ValueRole::ExternalOutput);
        }
        tracing::debug!(name, operand = %operand.id, %value, "bound output");
        Ok(value)
    }

    /// Bind a leaf operand (input or constant) on first use.
    pub fn bind_source(&mut self, subgraph: &mut Subgraph, operand: &Operand) -> Result<ValueId> {
        if let Some(binding) = self.get(operand.id) {
            return Ok(binding.value);
        }

        let value = match &operand.kind {
            OperandKind::Input { name } => {
                let value = self.define_external(subgraph, operand, ValueFlags::EXTERNAL_INPUT)?;
                self.input_ids.insert(name.clone(), value);
                self.insert(operand.id, value, ValueRole::ExternalInput);
                tracing::debug!(name = name.as_str(), operand = %operand.id, %value, "bound input");
                value
            }
            OperandKind::Constant { data } => {
                let datatype = backend_datatype(operand.descriptor.dtype)
                    .map_err(|err| with_operand(err, operand))?;
                let data: Arc<[u8]> = Arc::from(data.to_vec());
                let value = subgraph
                    .define_tensor_value(
                        datatype,
                        &operand.descriptor.shape,
                        Some(Arc::clone(&data)),
                        None,
                        ValueFlags::NONE,
                    )
                    .or_kiln_error(|| format!("defining constant {}", operand.id))?;
                self.static_buffers.push(data);
                self.insert(operand.id, value, ValueRole::Static);
                tracing::trace!(operand = %operand.id, %value, "bound constant");
                value
            }
            OperandKind::Output { .. } | OperandKind::Intermediate => {
                return Err(Error::InvalidState(format!(
                    "operand {} is read before its producer was compiled",
                    operand.id
                )))
            }
        };
        Ok(value)
    }

    /// Bind an operator result that is not a named output.
    pub fn bind_internal(&mut self, subgraph: &mut Subgraph, operand: &Operand) -> Result<ValueId> {
        if let Some(binding) = self.get(operand.id) {
            return Ok(binding.value);
        }
        let datatype =
            backend_datatype(operand.descriptor.dtype).map_err(|err| with_operand(err, operand))?;
        let value = subgraph
            .define_tensor_value(
                datatype,
                &operand.descriptor.shape,
                None,
                None,
                ValueFlags::NONE,
            )
            .or_kiln_error(|| format!("defining value for {}", operand.id))?;
        self.insert(operand.id, value, ValueRole::Internal);
        tracing::trace!(operand = %operand.id, %value, "bound internal value");
        Ok(value)
    }

    /// Bind everything an operator touches: unbound inputs first, then
    /// unbound outputs.
    pub fn bind_operator(
        &mut self,
        subgraph: &mut Subgraph,
        graph: &Graph,
        operator: &kiln_core::Operator,
    ) -> Result<()> {
        for &input in &operator.inputs {
            self.bind_source(subgraph, graph.operand(input)?)?;
        }
        for &output in &operator.outputs {
            self.bind_internal(subgraph, graph.operand(output)?)?;
        }
        Ok(())
    }

    fn define_external(
        &mut self,
        subgraph: &mut Subgraph,
        operand: &Operand,
        flags: ValueFlags,
    ) -> Result<ValueId> {
        let datatype =
            backend_datatype(operand.descriptor.dtype).map_err(|err| with_operand(err, operand))?;
        let id = ValueId(self.next_external);
        let value = subgraph
            .define_tensor_value(datatype, &operand.descriptor.shape, None, Some(id), flags)
            .or_kiln_error(|| format!("defining external value for {}", operand.id))?;
        self.next_external += 1;
        Ok(value)
    }

    fn insert(&mut self, operand: OperandId, value: ValueId, role: ValueRole) {
        let previous = self.bindings.insert(operand, ValueBinding { value, role });
        debug_assert!(previous.is_none(), "operand {operand} bound twice");
    }
}

fn with_operand(err: Error, operand: &Operand) -> Error {
    match err {
        Error::Unsupported(msg) => Error::Unsupported(format!("{msg} (operand {})", operand.id)),
        other => other,
    }
}
