//! Shared graph builders for compiler integration tests.

#![allow(dead_code)]

use kiln_backend::{ExternalInput, ExternalOutput, Runtime, ValueId};
use kiln_core::{DataType, Graph, GraphBuilder, OperandDescriptor};

/// Install a test subscriber and make sure the backend is initialized.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    kiln_backend::initialize().expect("backend initialization");
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

/// Two-layer perceptron: `y = softmax(relu(x W1 + b1) W2 + b2)`.
///
/// `x` is `[2, 3]`, hidden width 4, output width 2.
pub fn mlp_graph() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.input("x", f32_desc(&[2, 3])).unwrap();
    let w1 = b
        .constant_from_slice(&[3, 4], &[0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2])
        .unwrap();
    let b1 = b.constant_from_slice(&[4], &[0.0f32, -1.0, 0.5, 0.0]).unwrap();
    let w2 = b
        .constant_from_slice(&[4, 2], &[1.0f32, -1.0, 0.5, 0.5, -0.5, 1.0, 0.0, 2.0])
        .unwrap();
    let b2 = b.constant_from_slice(&[2], &[0.1f32, -0.1]).unwrap();

    let h = b.gemm(x, w1, Some(b1), Default::default()).unwrap();
    let h = b.relu(h).unwrap();
    let logits = b.gemm(h, w2, Some(b2), Default::default()).unwrap();
    let y = b.softmax(logits).unwrap();
    b.build(&[("y", y)]).unwrap()
}

/// Invoke a runtime with f32 data and return the outputs.
pub fn run(
    runtime: &mut Runtime,
    inputs: &[(ValueId, Vec<f32>)],
    outputs: &[(ValueId, usize)],
) -> Vec<Vec<f32>> {
    let bound_inputs: Vec<ExternalInput> = inputs
        .iter()
        .map(|(id, data)| ExternalInput {
            id: *id,
            data: bytemuck::cast_slice(data.as_slice()),
        })
        .collect();
    let mut results: Vec<Vec<f32>> = outputs.iter().map(|(_, len)| vec![0.0; *len]).collect();
    let mut bound_outputs: Vec<ExternalOutput> = outputs
        .iter()
        .zip(results.iter_mut())
        .map(|((id, _), data)| ExternalOutput {
            id: *id,
            data: bytemuck::cast_slice_mut(data.as_mut_slice()),
        })
        .collect();
    runtime
        .invoke(&bound_inputs, &mut bound_outputs)
        .expect("invoke");
    drop(bound_outputs);
    results
}
