//! Shared helpers for runtime integration tests.

#![allow(dead_code)]

use kiln_core::{DataType, Graph, GraphBuilder, OperandDescriptor};
use kiln_runtime::Tensor;
use std::collections::HashMap;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn f32_desc(shape: &[usize]) -> OperandDescriptor {
    OperandDescriptor::new(DataType::F32, shape.to_vec())
}

/// `c = a + b` over `[4]`.
pub fn add_graph() -> Graph {
    let mut b = GraphBuilder::new();
    let lhs = b.input("a", f32_desc(&[4])).unwrap();
    let rhs = b.input("b", f32_desc(&[4])).unwrap();
    let sum = b.add(lhs, rhs).unwrap();
    b.build(&[("c", sum)]).unwrap()
}

/// A graph with no inputs: `out = relu(k1 * k2 - 1)` over constants.
pub fn constant_graph() -> Graph {
    let mut b = GraphBuilder::new();
    let k1 = b.constant_from_slice(&[3], &[1.0f32, 2.0, 3.0]).unwrap();
    let k2 = b.constant_from_slice(&[3], &[0.5f32, 1.0, 2.0]).unwrap();
    let one = b.constant_from_slice(&[], &[1.0f32]).unwrap();
    let product = b.mul(k1, k2).unwrap();
    let shifted = b.sub(product, one).unwrap();
    let out = b.relu(shifted).unwrap();
    b.build(&[("out", out)]).unwrap()
}

/// `y = pow(x, x)`, which the backend cannot run.
pub fn unsupported_graph() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", f32_desc(&[2])).unwrap();
    let y = b.pow(x, x).unwrap();
    b.build(&[("y", y)]).unwrap()
}

/// Build a name -> f32 tensor map.
pub fn tensors(entries: &[(&str, &[usize], Vec<f32>)]) -> HashMap<String, Tensor> {
    entries
        .iter()
        .map(|(name, shape, data)| {
            (
                name.to_string(),
                Tensor::from_vec(data.clone(), shape).unwrap(),
            )
        })
        .collect()
}

pub fn add_inputs(a: [f32; 4], b: [f32; 4]) -> HashMap<String, Tensor> {
    tensors(&[("a", &[4], a.to_vec()), ("b", &[4], b.to_vec())])
}
