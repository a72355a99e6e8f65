//! Arena representation of a tensor graph.
//!
//! The graph owns every operand and operator in two flat vectors:
//! - **Operands** (`Operand`) are typed, shaped tensor values
//! - **Operators** (`Operator`) consume and produce operands
//!
//! Both are addressed by integer handles (`OperandId`, `OperatorId`) that are
//! indices into the arena. Named outputs select which part of the arena is
//! compiled: only the producers reachable from them matter.

use crate::options::OperatorKind;
use crate::types::OperandDescriptor;
use crate::{Error, Result};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use std::fmt;
use std::sync::Arc;

/// Unique identifier for an operand in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandId(pub usize);

impl OperandId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for OperandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Unique identifier for an operator in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(pub usize);

impl OperatorId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ──────────────────────────────── Operand ────────────────────────────────

/// Role of an operand in the graph.
#[derive(Debug, Clone)]
pub enum OperandKind {
    /// Supplied by the caller at compute time.
    Input { name: String },

    /// Fixed at build time; owns its bytes.
    Constant { data: Arc<[u8]> },

    /// Produced by an operator and returned to the caller under `name`.
    Output { name: String },

    /// Produced by an operator and consumed only inside the graph.
    Intermediate,
}

/// A typed, shaped tensor value.
#[derive(Debug, Clone)]
pub struct Operand {
    pub id: OperandId,
    pub kind: OperandKind,
    pub descriptor: OperandDescriptor,

    /// Operator producing this operand; `None` for inputs and constants.
    pub producer: Option<OperatorId>,
}

impl Operand {
    /// Caller-visible name of an input or output operand.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            OperandKind::Input { name } | OperandKind::Output { name } => Some(name),
            OperandKind::Constant { .. } | OperandKind::Intermediate => None,
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, OperandKind::Input { .. })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, OperandKind::Constant { .. })
    }

    /// Constant bytes, if this operand is a constant.
    pub fn constant_data(&self) -> Option<&[u8]> {
        match &self.kind {
            OperandKind::Constant { data } => Some(data),
            _ => None,
        }
    }
}

// ──────────────────────────────── Operator ───────────────────────────────

/// A computation node: kind, attributes, and ordered operand lists.
#[derive(Debug, Clone)]
pub struct Operator {
    pub id: OperatorId,
    pub kind: OperatorKind,
    pub inputs: Vec<OperandId>,
    pub outputs: Vec<OperandId>,
}

impl Operator {
    /// Operator name plus arena id, for messages (e.g. `conv2d #4`).
    pub fn label(&self) -> String {
        format!("{} {}", self.kind.name(), self.id)
    }
}

// ──────────────────────────────── Graph ──────────────────────────────────

/// A built tensor graph.
///
/// Holds exclusive ownership of the operand/operator arena plus the ordered
/// mapping from output names to operands.
#[derive(Debug, Clone)]
pub struct Graph {
    operands: Vec<Operand>,
    operators: Vec<Operator>,
    outputs: Vec<(String, OperandId)>,
}

impl Graph {
    /// Assemble a graph from a finished arena. Only the builder calls this.
    pub(crate) fn from_parts(
        operands: Vec<Operand>,
        operators: Vec<Operator>,
        outputs: Vec<(String, OperandId)>,
    ) -> Self {
        Self {
            operands,
            operators,
            outputs,
        }
    }

    /// Get an operand by id.
    pub fn operand(&self, id: OperandId) -> Result<&Operand> {
        self.operands
            .get(id.index())
            .ok_or_else(|| Error::InvalidParameter(format!("operand {id} not found")))
    }

    /// Get an operator by id.
    pub fn operator(&self, id: OperatorId) -> Result<&Operator> {
        self.operators
            .get(id.index())
            .ok_or_else(|| Error::InvalidParameter(format!("operator {id} not found")))
    }

    /// All operands in arena order.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// All operators in arena order, including ones no output depends on.
    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    /// Named outputs in declaration order.
    pub fn outputs(&self) -> &[(String, OperandId)] {
        &self.outputs
    }

    /// Look up a named output.
    pub fn output(&self, name: &str) -> Option<OperandId> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// Iterate over input operands in arena order.
    pub fn inputs(&self) -> impl Iterator<Item = &Operand> {
        self.operands.iter().filter(|operand| operand.is_input())
    }

    /// Producers of an operator's inputs, in input order.
    ///
    /// Inputs and constants have no producer and are skipped. An operator
    /// reading the same operand twice reports its producer twice.
    pub fn dependencies(&self, id: OperatorId) -> Result<Vec<OperatorId>> {
        let operator = self.operator(id)?;
        operator
            .inputs
            .iter()
            .map(|&input| Ok(self.operand(input)?.producer))
            .filter_map(|producer| producer.transpose())
            .collect()
    }

    /// Build a petgraph dependency graph (producer -> consumer).
    ///
    /// Node weights are operator ids; edge weights are the operand flowing
    /// along the edge. Node indices match operator indices.
    pub fn dependency_graph(&self) -> DiGraph<OperatorId, OperandId> {
        let mut graph = DiGraph::with_capacity(self.operators.len(), self.operands.len());
        for operator in &self.operators {
            graph.add_node(operator.id);
        }
        for consumer in &self.operators {
            for &input in &consumer.inputs {
                if let Some(producer) = self.operands[input.index()].producer {
                    graph.add_edge(
                        NodeIndex::new(producer.index()),
                        NodeIndex::new(consumer.id.index()),
                        input,
                    );
                }
            }
        }
        graph
    }

    /// Render the operator graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let deps = self.dependency_graph();
        let labelled = deps.map(
            |_, &op| self.operators[op.index()].label(),
            |_, &operand| {
                let operand = &self.operands[operand.index()];
                match operand.name() {
                    Some(name) => format!("{name}: {}", operand.descriptor),
                    None => format!("{}: {}", operand.id, operand.descriptor),
                }
            },
        );
        format!(
            "digraph {{\n{}}}\n",
            Dot::with_config(&labelled, &[Config::GraphContentOnly])
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::GraphBuilder;
    use crate::types::{DataType, OperandDescriptor};

    fn vec4() -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, vec![4])
    }

    #[test]
    fn test_outputs_and_lookup() {
        let mut builder = GraphBuilder::new();
        let a = builder.input("a", vec4()).unwrap();
        let b = builder.input("b", vec4()).unwrap();
        let c = builder.add(a, b).unwrap();
        let graph = builder.build(&[("c", c)]).unwrap();

        assert_eq!(graph.outputs().len(), 1);
        assert_eq!(graph.output("c"), Some(c));
        assert_eq!(graph.output("missing"), None);
        assert_eq!(graph.inputs().count(), 2);
        assert_eq!(graph.operand(c).unwrap().name(), Some("c"));
        assert!(graph.operand(a).unwrap().is_input());
    }

    #[test]
    fn test_dependencies() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", vec4()).unwrap();
        let r = builder.relu(x).unwrap();
        let s = builder.sigmoid(x).unwrap();
        let out = builder.mul(r, s).unwrap();
        let graph = builder.build(&[("out", out)]).unwrap();

        let mul_op = graph.operand(out).unwrap().producer.unwrap();
        let deps = graph.dependencies(mul_op).unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(Some(deps[0]), graph.operand(r).unwrap().producer);
        assert_eq!(Some(deps[1]), graph.operand(s).unwrap().producer);

        let relu_op = graph.operand(r).unwrap().producer.unwrap();
        assert!(graph.dependencies(relu_op).unwrap().is_empty());
    }

    #[test]
    fn test_dependency_graph_is_acyclic() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", vec4()).unwrap();
        let y = builder.relu(x).unwrap();
        let z = builder.add(y, x).unwrap();
        let graph = builder.build(&[("z", z)]).unwrap();

        let deps = graph.dependency_graph();
        assert_eq!(deps.node_count(), 2);
        assert_eq!(deps.edge_count(), 1);
        assert!(!petgraph::algo::is_cyclic_directed(&deps));
    }

    #[test]
    fn test_to_dot() {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", vec4()).unwrap();
        let y = builder.relu(x).unwrap();
        let z = builder.tanh(y).unwrap();
        let graph = builder.build(&[("z", z)]).unwrap();

        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("relu #0"));
        assert!(dot.contains("tanh #1"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
