//! Built-in demo graphs and their inputs.

use kiln_core::{
    ClampOptions, Conv2dOptions, DataType, Error, Graph, GraphBuilder, OperandDescriptor,
    Pool2dOptions, Result, UnaryOp,
};
use kiln_runtime::{GraphProgram, Tensor};
use rand::Rng;
use std::collections::HashMap;

/// A graph the CLI can build without any model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Demo {
    /// Elementwise add of two length-4 vectors
    Add,
    /// Two-layer perceptron with a softmax head
    Mlp,
    /// 3x3 convolution, clamp and 2x2 average pooling over a 5x5 image
    Conv,
    /// Outputs that name an input directly, next to a negation
    Identity,
}

impl Demo {
    pub fn name(&self) -> &'static str {
        match self {
            Demo::Add => "add",
            Demo::Mlp => "mlp",
            Demo::Conv => "conv",
            Demo::Identity => "identity",
        }
    }

    /// Build the demo graph.
    pub fn graph(&self) -> Result<Graph> {
        match self {
            Demo::Add => add_graph(),
            Demo::Mlp => mlp_graph(),
            Demo::Conv => conv_graph(),
            Demo::Identity => identity_graph(),
        }
    }

    /// Fixed inputs, so repeated runs print the same numbers.
    pub fn sample_inputs(&self) -> Result<HashMap<String, Tensor>> {
        let entries = match self {
            Demo::Add => vec![
                ("a", vec![4], vec![1.0, 2.0, 3.0, 4.0]),
                ("b", vec![4], vec![5.0, 6.0, 7.0, 8.0]),
            ],
            Demo::Mlp => vec![("x", vec![2, 3], vec![1.0, 0.0, -1.0, 0.5, 0.5, 0.5])],
            Demo::Conv => vec![(
                "image",
                vec![1, 5, 5, 2],
                (0..50).map(|v| (v % 11) as f32 / 10.0 - 0.5).collect(),
            )],
            Demo::Identity => vec![("x", vec![4], vec![1.0, -2.0, 3.0, -4.0])],
        };
        entries
            .into_iter()
            .map(|(name, shape, data)| Ok((name.to_string(), Tensor::from_vec(data, &shape)?)))
            .collect()
    }
}

fn f32_desc(shape: &[usize]) -> OperandDescriptor {
    OperandDescriptor::new(DataType::F32, shape.to_vec())
}

/// Deterministic weights in roughly `[-0.5, 0.5]`.
fn weights(count: usize, seed: usize) -> Vec<f32> {
    (0..count)
        .map(|i| ((i * 7 + seed * 13) % 17) as f32 / 16.0 - 0.5)
        .collect()
}

fn add_graph() -> Result<Graph> {
    let mut b = GraphBuilder::new();
    let a = b.input("a", f32_desc(&[4]))?;
    let rhs = b.input("b", f32_desc(&[4]))?;
    let c = b.add(a, rhs)?;
    b.build(&[("c", c)])
}

fn mlp_graph() -> Result<Graph> {
    let mut b = GraphBuilder::new();
    let x = b.input("x", f32_desc(&[2, 3]))?;
    let w1 = b.constant_from_slice(&[3, 8], &weights(24, 1))?;
    let b1 = b.constant_from_slice(&[8], &weights(8, 2))?;
    let w2 = b.constant_from_slice(&[8, 4], &weights(32, 3))?;
    let b2 = b.constant_from_slice(&[4], &weights(4, 4))?;

    let hidden = b.gemm(x, w1, Some(b1), Default::default())?;
    let hidden = b.hard_swish(hidden)?;
    let logits = b.gemm(hidden, w2, Some(b2), Default::default())?;
    let probs = b.softmax(logits)?;
    b.build(&[("probs", probs), ("logits", logits)])
}

fn conv_graph() -> Result<Graph> {
    let mut b = GraphBuilder::new();
    let image = b.input("image", f32_desc(&[1, 5, 5, 2]))?;
    let filter = b.constant_from_slice(&[3, 3, 3, 2], &weights(54, 5))?;
    let bias = b.constant_from_slice(&[3], &[0.1f32, 0.0, -0.1])?;

    let conv = b.conv2d(
        image,
        filter,
        Some(bias),
        Conv2dOptions {
            padding: [1, 1, 1, 1],
            ..Default::default()
        },
    )?;
    let clamped = b.clamp(conv, ClampOptions { min: -1.0, max: 1.0 })?;
    let pooled = b.average_pool2d(
        clamped,
        Pool2dOptions {
            window_dimensions: Some([2, 2]),
            strides: [2, 2],
            ..Default::default()
        },
    )?;
    b.build(&[("features", pooled)])
}

fn identity_graph() -> Result<Graph> {
    let mut b = GraphBuilder::new();
    let x = b.input("x", f32_desc(&[4]))?;
    let negated = b.unary(UnaryOp::Neg, x)?;
    b.build(&[("x", x), ("negated", negated)])
}

/// Uniformly random tensors for every input the program reads.
///
/// Floats are drawn from `[-1, 1)`, integers from `[-8, 8)`.
pub fn random_inputs(
    program: &GraphProgram,
    rng: &mut impl Rng,
) -> Result<HashMap<String, Tensor>> {
    program
        .input_name_to_id()
        .into_keys()
        .map(|name| {
            let descriptor = program.input_descriptor(&name).ok_or_else(|| {
                Error::InvalidState(format!("input '{name}' has no descriptor"))
            })?;
            let count = descriptor.element_count();
            let tensor = match descriptor.dtype {
                DataType::F32 => Tensor::from_vec(
                    (0..count).map(|_| rng.gen_range(-1.0f32..1.0)).collect(),
                    &descriptor.shape,
                )?,
                DataType::I32 => Tensor::from_vec(
                    (0..count).map(|_| rng.gen_range(-8i32..8)).collect(),
                    &descriptor.shape,
                )?,
                other => {
                    return Err(Error::Unsupported(format!(
                        "cannot generate random {other} data for '{name}'"
                    )))
                }
            };
            Ok((name, tensor))
        })
        .collect()
}

/// One line per tensor, `name: float32[2, 2] = [..]`, sorted by name.
pub fn format_tensors(tensors: &HashMap<String, Tensor>) -> Vec<String> {
    let mut names: Vec<&String> = tensors.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            let tensor = &tensors[name];
            let values = match tensor.dtype() {
                DataType::F32 => tensor
                    .to_vec::<f32>()
                    .map(|v| v.iter().map(|x| format!("{x:.4}")).collect::<Vec<_>>()),
                DataType::I32 => tensor
                    .to_vec::<i32>()
                    .map(|v| v.iter().map(i32::to_string).collect::<Vec<_>>()),
                _ => Ok(vec![format!("<{} bytes>", tensor.as_bytes().len())]),
            }
            .unwrap_or_default();
            format!("{name}: {} = [{}]", tensor.descriptor(), values.join(", "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_graphs_build() {
        for demo in [Demo::Add, Demo::Mlp, Demo::Conv, Demo::Identity] {
            let graph = demo.graph().unwrap();
            assert!(!graph.outputs().is_empty(), "{}", demo.name());
        }
    }

    #[test]
    fn test_sample_inputs_match_graph() {
        for demo in [Demo::Add, Demo::Mlp, Demo::Conv, Demo::Identity] {
            let graph = demo.graph().unwrap();
            let inputs = demo.sample_inputs().unwrap();
            assert_eq!(inputs.len(), graph.inputs().count());
            for operand in graph.inputs() {
                let tensor = &inputs[operand.name().unwrap()];
                assert_eq!(tensor.descriptor(), operand.descriptor);
            }
        }
    }

    #[test]
    fn test_conv_output_shape() {
        let graph = Demo::Conv.graph().unwrap();
        let (_, features) = &graph.outputs()[0];
        assert_eq!(
            graph.operand(*features).unwrap().descriptor.shape,
            vec![1, 2, 2, 3]
        );
    }

    #[test]
    fn test_format_tensors() {
        let tensors = HashMap::from([
            ("b".to_string(), Tensor::from_vec(vec![1i32, 2], &[2]).unwrap()),
            ("a".to_string(), Tensor::from_vec(vec![0.5f32], &[1]).unwrap()),
        ]);
        assert_eq!(
            format_tensors(&tensors),
            vec![
                "a: float32[1] = [0.5000]".to_string(),
                "b: int32[2] = [1, 2]".to_string(),
            ]
        );
    }
}
