//! Operator ordering.
//!
//! Only operators that some named output depends on are scheduled. The
//! order is a depth-first post-order seeded from the output producers in
//! declaration order, so it is deterministic for a given graph.

use kiln_core::{Graph, OperatorId};

/// Order the operators the named outputs depend on so every producer comes
/// before its consumers.
///
/// The graph must be acyclic. Graphs from `GraphBuilder` always are; a
/// cycle trips a debug assertion and otherwise yields an order that does
/// not respect every edge.
pub fn sort_operators(graph: &Graph) -> Vec<OperatorId> {
    debug_assert!(
        !petgraph::algo::is_cyclic_directed(&graph.dependency_graph()),
        "operator graph contains a cycle"
    );

    let count = graph.operators().len();
    let mut visited = vec![false; count];
    let mut expanded = vec![false; count];
    let mut order = Vec::new();
    let mut stack = Vec::new();

    let producers = graph
        .outputs()
        .iter()
        .filter_map(|(_, id)| graph.operand(*id).ok().and_then(|operand| operand.producer));

    for root in producers {
        stack.push(root);
        while let Some(&current) = stack.last() {
            let index = current.index();
            if visited[index] {
                stack.pop();
                continue;
            }

            // Second visit: everything pushed above it has been emitted.
            if expanded[index] {
                visited[index] = true;
                order.push(current);
                stack.pop();
                continue;
            }
            expanded[index] = true;

            let pending: Vec<OperatorId> = graph
                .dependencies(current)
                .unwrap_or_default()
                .into_iter()
                .filter(|dep| !visited[dep.index()])
                .collect();
            if pending.is_empty() {
                visited[index] = true;
                order.push(current);
                stack.pop();
            } else {
                // Reversed so the first dependency is examined first.
                stack.extend(pending.into_iter().rev());
            }
        }
    }

    tracing::trace!(scheduled = order.len(), total = count, "sorted operators");
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{DataType, GraphBuilder, OperandDescriptor};
    use std::collections::HashMap;

    fn vec4() -> OperandDescriptor {
        OperandDescriptor::new(DataType::F32, vec![4])
    }

    fn producer(graph: &Graph, id: kiln_core::OperandId) -> OperatorId {
        graph.operand(id).unwrap().producer.unwrap()
    }

    #[test]
    fn test_chain() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", vec4()).unwrap();
        let r = b.relu(x).unwrap();
        let s = b.sigmoid(r).unwrap();
        let t = b.tanh(s).unwrap();
        let graph = b.build(&[("t", t)]).unwrap();

        let order = sort_operators(&graph);
        assert_eq!(
            order,
            vec![producer(&graph, r), producer(&graph, s), producer(&graph, t)]
        );
    }

    #[test]
    fn test_diamond_emits_shared_dependency_once() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", vec4()).unwrap();
        let shared = b.relu(x).unwrap();
        let left = b.sigmoid(shared).unwrap();
        let right = b.tanh(shared).unwrap();
        let joined = b.add(left, right).unwrap();
        let graph = b.build(&[("joined", joined), ("left", left)]).unwrap();

        let order = sort_operators(&graph);
        assert_eq!(
            order,
            vec![
                producer(&graph, shared),
                producer(&graph, left),
                producer(&graph, right),
                producer(&graph, joined),
            ]
        );
    }

    #[test]
    fn test_unreachable_operators_are_skipped() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", vec4()).unwrap();
        let used = b.relu(x).unwrap();
        let _unused = b.tanh(x).unwrap();
        let graph = b.build(&[("used", used)]).unwrap();

        assert_eq!(sort_operators(&graph), vec![producer(&graph, used)]);
    }

    #[test]
    fn test_passthrough_outputs_contribute_nothing() {
        let mut b = GraphBuilder::new();
        let x = b.input("x", vec4()).unwrap();
        let c = b.constant_from_slice(&[4], &[0.0f32; 4]).unwrap();
        let graph = b.build(&[("x_out", x), ("c_out", c)]).unwrap();

        assert!(sort_operators(&graph).is_empty());
    }

    #[test]
    fn test_random_graphs_respect_edges() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..50 {
            let mut b = GraphBuilder::new();
            let mut pool = vec![b.input("x", vec4()).unwrap(), b.input("y", vec4()).unwrap()];
            for _ in 0..rng.gen_range(1..30) {
                let lhs = pool[rng.gen_range(0..pool.len())];
                let next = if rng.gen_bool(0.5) {
                    let rhs = pool[rng.gen_range(0..pool.len())];
                    b.add(lhs, rhs).unwrap()
                } else {
                    b.relu(lhs).unwrap()
                };
                pool.push(next);
            }

            let last = pool.len() - 1;
            let names: Vec<(String, kiln_core::OperandId)> = (2..pool.len())
                .filter(|&i| i == last || rng.gen_bool(0.3))
                .map(|i| (format!("out{i}"), pool[i]))
                .collect();
            let named: Vec<(&str, kiln_core::OperandId)> =
                names.iter().map(|(n, id)| (n.as_str(), *id)).collect();
            let graph = b.build(&named).unwrap();

            let order = sort_operators(&graph);
            let position: HashMap<OperatorId, usize> =
                order.iter().enumerate().map(|(i, op)| (*op, i)).collect();
            assert_eq!(position.len(), order.len(), "operator emitted twice");

            for &op in &order {
                for dep in graph.dependencies(op).unwrap() {
                    assert!(position[&dep] < position[&op]);
                }
            }
            for (_, id) in graph.outputs() {
                assert!(position.contains_key(&producer(&graph, *id)));
            }
        }
    }
}
