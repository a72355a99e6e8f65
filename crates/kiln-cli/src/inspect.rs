//! Text report of how a graph compiles.

use kiln_compiler::{CompiledGraph, ValueRole};
use kiln_core::{Graph, Result};
use std::fmt::Write;

/// Describe the operator order and every value binding of a compiled graph.
pub fn render_report(graph: &Graph, compiled: &CompiledGraph) -> Result<String> {
    let mut out = String::new();

    let _ = writeln!(out, "Operators ({} scheduled of {}):", compiled.order.len(), graph.operators().len());
    for (step, id) in compiled.order.iter().enumerate() {
        let operator = graph.operator(*id)?;
        let inputs: Vec<String> = operator.inputs.iter().map(ToString::to_string).collect();
        let outputs: Vec<String> = operator.outputs.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "  {step:>3}. {:<20} ({}) -> ({})",
            operator.label(),
            inputs.join(", "),
            outputs.join(", ")
        );
    }

    let _ = writeln!(out, "\nBindings ({}):", compiled.bindings.len());
    for (operand_id, binding) in compiled.bindings.iter() {
        let operand = graph.operand(operand_id)?;
        let role = match binding.role {
            ValueRole::ExternalInput => "input",
            ValueRole::ExternalOutput => "output",
            ValueRole::Internal => "internal",
            ValueRole::Static => "static",
        };
        let name = operand.name().map(|n| format!(" '{n}'")).unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:>4}  {role:<8} {}{name}: {}",
            binding.value.to_string(),
            operand.id,
            operand.descriptor
        );
    }

    // Passthrough outputs own a value without an operand binding.
    let mut outputs: Vec<_> = compiled.bindings.output_name_to_id().iter().collect();
    outputs.sort_by_key(|(_, id)| **id);
    let _ = writeln!(out, "\nOutputs:");
    for (name, id) in outputs {
        let _ = writeln!(out, "  {:>4}  {name}", id.to_string());
    }

    let mut inputs: Vec<_> = compiled.bindings.input_name_to_id().iter().collect();
    inputs.sort_by_key(|(_, id)| **id);
    let _ = writeln!(out, "\nInputs:");
    for (name, id) in inputs {
        let _ = writeln!(out, "  {:>4}  {name}", id.to_string());
    }

    Ok(out)
}
