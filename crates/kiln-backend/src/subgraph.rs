//! Define-then-compile subgraph description.

use crate::error::{BackendError, Result};
use crate::library::ensure_initialized;
use crate::node::Node;
use crate::types::{Datatype, ValueFlags, ValueId};
use std::sync::Arc;

/// A tensor value declared in a [`Subgraph`].
#[derive(Debug, Clone)]
pub struct TensorValue {
    pub id: ValueId,
    pub datatype: Datatype,
    pub dims: Vec<usize>,
    /// Static contents, in native byte order.
    pub data: Option<Arc<[u8]>>,
    pub flags: ValueFlags,
}

impl TensorValue {
    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn byte_length(&self) -> usize {
        self.element_count() * self.datatype.size()
    }

    pub fn is_static(&self) -> bool {
        self.data.is_some()
    }
}

/// Values and nodes accumulated before compiling a [`Runtime`].
///
/// [`Runtime`]: crate::Runtime
#[derive(Debug)]
pub struct Subgraph {
    external_value_count: u32,
    /// Indexed by value id. External slots stay `None` until defined.
    values: Vec<Option<TensorValue>>,
    nodes: Vec<Node>,
}

impl Subgraph {
    /// Create a subgraph reserving ids `0..external_value_count` for
    /// external values.
    pub fn new(external_value_count: u32) -> Result<Self> {
        ensure_initialized("creating a subgraph")?;
        Ok(Self {
            external_value_count,
            values: vec![None; external_value_count as usize],
            nodes: Vec::new(),
        })
    }

    /// Declare a tensor value.
    ///
    /// External values take their id from `external_id` and must carry
    /// exactly one of the external flags. Static values carry `data` whose
    /// length matches the tensor size. Internal values get the next id
    /// after the external range.
    pub fn define_tensor_value(
        &mut self,
        datatype: Datatype,
        dims: &[usize],
        data: Option<Arc<[u8]>>,
        external_id: Option<ValueId>,
        flags: ValueFlags,
    ) -> Result<ValueId> {
        if flags.contains(ValueFlags::EXTERNAL_INPUT | ValueFlags::EXTERNAL_OUTPUT) {
            return Err(BackendError::invalid_parameter(
                "a value cannot be both an external input and an external output",
            ));
        }

        let byte_length = dims
            .iter()
            .try_fold(datatype.size(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                BackendError::invalid_parameter(format!("tensor of shape {dims:?} is too large"))
            })?;

        if let Some(data) = &data {
            if flags.is_external() || external_id.is_some() {
                return Err(BackendError::invalid_parameter(
                    "static values cannot be external",
                ));
            }
            if data.len() != byte_length {
                return Err(BackendError::invalid_parameter(format!(
                    "static data is {} bytes, {datatype}{dims:?} needs {byte_length}",
                    data.len()
                )));
            }
        }

        let id = match external_id {
            Some(id) => {
                if !flags.is_external() {
                    return Err(BackendError::invalid_parameter(format!(
                        "external value {id} needs an external flag"
                    )));
                }
                if id.0 >= self.external_value_count {
                    return Err(BackendError::invalid_parameter(format!(
                        "external id {id} is out of range (external value count {})",
                        self.external_value_count
                    )));
                }
                if self.values[id.index()].is_some() {
                    return Err(BackendError::invalid_parameter(format!(
                        "external value {id} is already defined"
                    )));
                }
                id
            }
            None => {
                if flags.is_external() {
                    return Err(BackendError::invalid_parameter(
                        "external values need an external id",
                    ));
                }
                let id = u32::try_from(self.values.len()).map_err(|_| {
                    BackendError::new(crate::Status::OutOfMemory, "too many values")
                })?;
                self.values.push(None);
                ValueId(id)
            }
        };

        tracing::trace!(%id, %datatype, ?dims, static_data = data.is_some(), "defined value");
        self.values[id.index()] = Some(TensorValue {
            id,
            datatype,
            dims: dims.to_vec(),
            data,
            flags,
        });
        Ok(id)
    }

    /// Append a node after checking its values.
    pub fn define_node(&mut self, node: Node) -> Result<()> {
        let inputs = node
            .inputs()
            .into_iter()
            .map(|id| self.lookup(id, node.name()))
            .collect::<Result<Vec<_>>>()?;
        let output = self.lookup(node.output(), node.name())?;
        if output.is_static() || output.flags.contains(ValueFlags::EXTERNAL_INPUT) {
            return Err(BackendError::invalid_parameter(format!(
                "{}: output {} is not writable",
                node.name(),
                output.id
            )));
        }
        node.validate(&inputs, output)?;

        tracing::trace!(node = node.name(), output = %output.id, "defined node");
        self.nodes.push(node);
        Ok(())
    }

    pub fn external_value_count(&self) -> u32 {
        self.external_value_count
    }

    pub fn value(&self, id: ValueId) -> Option<&TensorValue> {
        self.values.get(id.index()).and_then(Option::as_ref)
    }

    pub fn values(&self) -> impl Iterator<Item = &TensorValue> {
        self.values.iter().flatten()
    }

    pub(crate) fn value_slots(&self) -> &[Option<TensorValue>] {
        &self.values
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn lookup(&self, id: ValueId, node: &str) -> Result<&TensorValue> {
        self.value(id).ok_or_else(|| {
            BackendError::invalid_parameter(format!("{node}: value {id} is not defined"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{BinaryKind, UnaryKind};
    use crate::Status;

    fn subgraph(external: u32) -> Subgraph {
        crate::initialize().unwrap();
        Subgraph::new(external).unwrap()
    }

    #[test]
    fn test_external_and_internal_ids() {
        let mut sg = subgraph(2);
        let out = sg
            .define_tensor_value(
                Datatype::Fp32,
                &[4],
                None,
                Some(ValueId(0)),
                ValueFlags::EXTERNAL_OUTPUT,
            )
            .unwrap();
        let internal = sg
            .define_tensor_value(Datatype::Fp32, &[4], None, None, ValueFlags::NONE)
            .unwrap();
        assert_eq!(out, ValueId(0));
        assert_eq!(internal, ValueId(2));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut sg = subgraph(1);
        let both = ValueFlags::EXTERNAL_INPUT | ValueFlags::EXTERNAL_OUTPUT;
        let err = sg
            .define_tensor_value(Datatype::Fp32, &[1], None, Some(ValueId(0)), both)
            .unwrap_err();
        assert_eq!(err.status, Status::InvalidParameter);

        let err = sg
            .define_tensor_value(
                Datatype::Fp32,
                &[1],
                None,
                Some(ValueId(1)),
                ValueFlags::EXTERNAL_INPUT,
            )
            .unwrap_err();
        assert!(err.message.contains("out of range"));

        let data: Arc<[u8]> = Arc::from(vec![0u8; 3]);
        let err = sg
            .define_tensor_value(Datatype::Fp32, &[1], Some(data), None, ValueFlags::NONE)
            .unwrap_err();
        assert!(err.message.contains("static data"));

        sg.define_tensor_value(
            Datatype::Fp32,
            &[1],
            None,
            Some(ValueId(0)),
            ValueFlags::EXTERNAL_INPUT,
        )
        .unwrap();
        let err = sg
            .define_tensor_value(
                Datatype::Fp32,
                &[1],
                None,
                Some(ValueId(0)),
                ValueFlags::EXTERNAL_INPUT,
            )
            .unwrap_err();
        assert!(err.message.contains("already defined"));
    }

    #[test]
    fn test_node_shape_checks() {
        let mut sg = subgraph(0);
        let a = sg
            .define_tensor_value(Datatype::Fp32, &[2, 3], None, None, ValueFlags::NONE)
            .unwrap();
        let b = sg
            .define_tensor_value(Datatype::Fp32, &[3], None, None, ValueFlags::NONE)
            .unwrap();
        let good = sg
            .define_tensor_value(Datatype::Fp32, &[2, 3], None, None, ValueFlags::NONE)
            .unwrap();
        let bad = sg
            .define_tensor_value(Datatype::Fp32, &[3, 2], None, None, ValueFlags::NONE)
            .unwrap();

        sg.define_node(Node::Binary {
            kind: BinaryKind::Add,
            input1: a,
            input2: b,
            output: good,
        })
        .unwrap();

        let err = sg
            .define_node(Node::Binary {
                kind: BinaryKind::Add,
                input1: a,
                input2: b,
                output: bad,
            })
            .unwrap_err();
        assert_eq!(err.status, Status::InvalidParameter);
        assert_eq!(sg.nodes().len(), 1);
    }

    #[test]
    fn test_int32_arithmetic_unsupported() {
        let mut sg = subgraph(0);
        let x = sg
            .define_tensor_value(Datatype::Int32, &[4], None, None, ValueFlags::NONE)
            .unwrap();
        let y = sg
            .define_tensor_value(Datatype::Int32, &[4], None, None, ValueFlags::NONE)
            .unwrap();
        let err = sg
            .define_node(Node::Unary {
                kind: UnaryKind::Abs,
                input: x,
                output: y,
            })
            .unwrap_err();
        assert_eq!(err.status, Status::UnsupportedParameter);

        sg.define_node(Node::Copy {
            input: x,
            output: y,
        })
        .unwrap();
    }
}
