//! Graph to runtime compilation.

use crate::bindings::BindingTable;
use crate::error::BackendResultExt;
use crate::lowering::lower_operator;
use crate::scheduler::sort_operators;
use kiln_backend::{Node, Runtime, Subgraph};
use kiln_core::{Error, Graph, OperatorId, Result};
use std::collections::HashSet;

/// The result of compiling a graph.
///
/// The backend subgraph is gone by the time this exists; only the runtime
/// and the bindings needed to drive it remain.
#[derive(Debug)]
pub struct CompiledGraph {
    pub runtime: Runtime,
    /// Operators in the order their nodes were emitted.
    pub order: Vec<OperatorId>,
    pub bindings: BindingTable,
}

/// Compile a graph into a backend runtime.
///
/// Requires the backend library to be initialized. The first failing
/// backend call aborts compilation; no partially built runtime escapes.
#[tracing::instrument(
    skip_all,
    fields(operators = graph.operators().len(), outputs = graph.outputs().len())
)]
pub fn compile(graph: &Graph) -> Result<CompiledGraph> {
    let order = tracing::debug_span!("sort").in_scope(|| sort_operators(graph));

    let mut subgraph = Subgraph::new(external_value_count(graph, &order)?)
        .or_kiln_error(|| "creating subgraph".to_string())?;
    let mut bindings = BindingTable::new();

    // Named outputs claim the lowest external ids.
    let mut passthrough = Vec::new();
    {
        let _span = tracing::debug_span!("bind_outputs").entered();
        for (name, id) in graph.outputs() {
            let operand = graph.operand(*id)?;
            let value = bindings.bind_output(&mut subgraph, name, operand)?;
            if operand.producer.is_none() {
                passthrough.push((operand, value));
            }
        }
    }

    {
        let _span = tracing::debug_span!("lower", operators = order.len()).entered();
        for &id in &order {
            let operator = graph.operator(id)?;
            bindings.bind_operator(&mut subgraph, graph, operator)?;
            let node = lower_operator(graph, operator, &bindings)?;
            subgraph
                .define_node(node)
                .or_kiln_error(|| operator.label())?;
        }

        // Outputs naming an input or constant get their own value plus a copy.
        for (operand, target) in passthrough {
            let source = bindings.bind_source(&mut subgraph, operand)?;
            subgraph
                .define_node(Node::Copy {
                    input: source,
                    output: target,
                })
                .or_kiln_error(|| format!("copying {} to its output", operand.id))?;
        }
    }

    let runtime = tracing::debug_span!("create_runtime")
        .in_scope(|| Runtime::new(&subgraph))
        .or_kiln_error(|| "creating runtime".to_string())?;

    tracing::debug!(
        nodes = subgraph.nodes().len(),
        values = bindings.len(),
        "compiled graph"
    );
    Ok(CompiledGraph {
        runtime,
        order,
        bindings,
    })
}

/// Named outputs plus every distinct graph input the compiled operators or
/// passthrough outputs read.
fn external_value_count(graph: &Graph, order: &[OperatorId]) -> Result<u32> {
    let mut inputs = HashSet::new();
    for &id in order {
        for &input in &graph.operator(id)?.inputs {
            if graph.operand(input)?.is_input() {
                inputs.insert(input);
            }
        }
    }
    for (_, id) in graph.outputs() {
        if graph.operand(*id)?.is_input() {
            inputs.insert(*id);
        }
    }

    u32::try_from(graph.outputs().len() + inputs.len())
        .map_err(|_| Error::ResourceExhausted("too many external values".to_string()))
}
