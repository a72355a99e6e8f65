use kiln_backend::{
    BinaryKind, Convolution2dParams, Datatype, ExternalInput, ExternalOutput, Node, Runtime,
    Status, Subgraph, UnaryKind, ValueFlags, ValueId,
};
use std::sync::Arc;

fn setup(external_values: u32) -> Subgraph {
    let _ = tracing_subscriber::fmt::try_init();
    kiln_backend::initialize().unwrap();
    Subgraph::new(external_values).unwrap()
}

fn external(sg: &mut Subgraph, id: u32, dims: &[usize], flags: ValueFlags) -> ValueId {
    sg.define_tensor_value(Datatype::Fp32, dims, None, Some(ValueId(id)), flags)
        .unwrap()
}

fn internal(sg: &mut Subgraph, dims: &[usize]) -> ValueId {
    sg.define_tensor_value(Datatype::Fp32, dims, None, None, ValueFlags::NONE)
        .unwrap()
}

fn constant(sg: &mut Subgraph, dims: &[usize], values: &[f32]) -> ValueId {
    let data: Arc<[u8]> = Arc::from(bytemuck::cast_slice::<f32, u8>(values));
    sg.define_tensor_value(Datatype::Fp32, dims, Some(data), None, ValueFlags::NONE)
        .unwrap()
}

fn invoke(
    runtime: &mut Runtime,
    inputs: &[(ValueId, &[f32])],
    outputs: &[(ValueId, usize)],
) -> Vec<Vec<f32>> {
    let inputs: Vec<ExternalInput> = inputs
        .iter()
        .map(|(id, data)| ExternalInput {
            id: *id,
            data: bytemuck::cast_slice::<f32, u8>(data),
        })
        .collect();
    let mut results: Vec<Vec<f32>> = outputs.iter().map(|(_, len)| vec![0.0; *len]).collect();
    let mut bound: Vec<ExternalOutput> = outputs
        .iter()
        .zip(results.iter_mut())
        .map(|((id, _), data)| ExternalOutput {
            id: *id,
            data: bytemuck::cast_slice_mut(data.as_mut_slice()),
        })
        .collect();
    runtime.invoke(&inputs, &mut bound).unwrap();
    drop(bound);
    results
}

#[test]
fn test_add_reinvoked_with_new_inputs() {
    let mut sg = setup(3);
    let out = external(&mut sg, 0, &[4], ValueFlags::EXTERNAL_OUTPUT);
    let a = external(&mut sg, 1, &[4], ValueFlags::EXTERNAL_INPUT);
    let b = external(&mut sg, 2, &[4], ValueFlags::EXTERNAL_INPUT);
    sg.define_node(Node::Binary {
        kind: BinaryKind::Add,
        input1: a,
        input2: b,
        output: out,
    })
    .unwrap();

    let mut runtime = Runtime::new(&sg).unwrap();
    drop(sg);

    let first = invoke(
        &mut runtime,
        &[(a, &[1.0, 2.0, 3.0, 4.0][..]), (b, &[5.0, 6.0, 7.0, 8.0][..])],
        &[(out, 4)],
    );
    assert_eq!(first[0], vec![6.0, 8.0, 10.0, 12.0]);

    let second = invoke(
        &mut runtime,
        &[(a, &[2.0, 3.0, 4.0, 5.0][..]), (b, &[6.0, 7.0, 8.0, 9.0][..])],
        &[(out, 4)],
    );
    assert_eq!(second[0], vec![8.0, 10.0, 12.0, 14.0]);
}

#[test]
fn test_static_chain_through_internal_value() {
    // out = relu(x * w) with w static.
    let mut sg = setup(2);
    let out = external(&mut sg, 0, &[3], ValueFlags::EXTERNAL_OUTPUT);
    let x = external(&mut sg, 1, &[3], ValueFlags::EXTERNAL_INPUT);
    let w = constant(&mut sg, &[3], &[1.0, -1.0, 2.0]);
    let tmp = internal(&mut sg, &[3]);
    sg.define_node(Node::Binary {
        kind: BinaryKind::Multiply,
        input1: x,
        input2: w,
        output: tmp,
    })
    .unwrap();
    sg.define_node(Node::Unary {
        kind: UnaryKind::Clamp {
            min: 0.0,
            max: f32::INFINITY,
        },
        input: tmp,
        output: out,
    })
    .unwrap();

    let mut runtime = Runtime::new(&sg).unwrap();
    let result = invoke(&mut runtime, &[(x, &[3.0, 3.0, 3.0][..])], &[(out, 3)]);
    assert_eq!(result[0], vec![3.0, 0.0, 6.0]);
}

#[test]
fn test_copy_from_input_to_output() {
    let mut sg = setup(2);
    let out = external(&mut sg, 0, &[2], ValueFlags::EXTERNAL_OUTPUT);
    let x = external(&mut sg, 1, &[2], ValueFlags::EXTERNAL_INPUT);
    sg.define_node(Node::Copy {
        input: x,
        output: out,
    })
    .unwrap();

    let mut runtime = Runtime::new(&sg).unwrap();
    let result = invoke(&mut runtime, &[(x, &[7.0, -7.0][..])], &[(out, 2)]);
    assert_eq!(result[0], vec![7.0, -7.0]);
}

#[test]
fn test_convolution_with_bias() {
    let mut sg = setup(2);
    let out = external(&mut sg, 0, &[1, 2, 2, 1], ValueFlags::EXTERNAL_OUTPUT);
    let x = external(&mut sg, 1, &[1, 3, 3, 1], ValueFlags::EXTERNAL_INPUT);
    let filter = constant(&mut sg, &[1, 2, 2, 1], &[1.0, 1.0, 1.0, 1.0]);
    let bias = constant(&mut sg, &[1], &[100.0]);
    sg.define_node(Node::Convolution2d {
        params: Convolution2dParams {
            padding: [0; 4],
            strides: [1, 1],
            dilations: [1, 1],
            groups: 1,
        },
        input: x,
        filter,
        bias: Some(bias),
        output: out,
    })
    .unwrap();

    let mut runtime = Runtime::new(&sg).unwrap();
    let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    let result = invoke(&mut runtime, &[(x, &input[..])], &[(out, 4)]);
    assert_eq!(result[0], vec![112.0, 116.0, 124.0, 128.0]);
}

#[test]
fn test_read_before_write_is_rejected() {
    let mut sg = setup(1);
    let out = external(&mut sg, 0, &[2], ValueFlags::EXTERNAL_OUTPUT);
    let tmp = internal(&mut sg, &[2]);
    sg.define_node(Node::Copy {
        input: tmp,
        output: out,
    })
    .unwrap();

    let err = Runtime::new(&sg).unwrap_err();
    assert_eq!(err.status, Status::InvalidState);
    assert!(err.message.contains("before it is produced"));
}

#[test]
fn test_unwritten_output_is_rejected() {
    let mut sg = setup(1);
    external(&mut sg, 0, &[2], ValueFlags::EXTERNAL_OUTPUT);
    let err = Runtime::new(&sg).unwrap_err();
    assert_eq!(err.status, Status::InvalidState);
}

#[test]
fn test_invoke_checks_bindings() {
    let mut sg = setup(2);
    let out = external(&mut sg, 0, &[2], ValueFlags::EXTERNAL_OUTPUT);
    let x = external(&mut sg, 1, &[2], ValueFlags::EXTERNAL_INPUT);
    sg.define_node(Node::Unary {
        kind: UnaryKind::Negate,
        input: x,
        output: out,
    })
    .unwrap();
    let mut runtime = Runtime::new(&sg).unwrap();

    let mut out_bytes = [0u8; 8];
    let short = [0u8; 4];
    let err = runtime
        .invoke(
            &[ExternalInput { id: x, data: &short }],
            &mut [ExternalOutput {
                id: out,
                data: &mut out_bytes,
            }],
        )
        .unwrap_err();
    assert_eq!(err.status, Status::InvalidParameter);
    assert!(err.message.contains("needs 8 bytes"));

    let err = runtime
        .invoke(
            &[],
            &mut [ExternalOutput {
                id: out,
                data: &mut out_bytes,
            }],
        )
        .unwrap_err();
    assert!(err.message.contains("not bound"));

    let full = [0u8; 8];
    let err = runtime
        .invoke(&[ExternalInput { id: out, data: &full }], &mut [])
        .unwrap_err();
    assert!(err.message.contains("is not an external input"));
}
