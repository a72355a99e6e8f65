//! Elementwise and softmax kernels (fp32).

use super::broadcast_offsets;
use crate::node::{BinaryKind, UnaryKind};

pub(crate) fn binary(
    kind: BinaryKind,
    (a, a_dims): (&[f32], &[usize]),
    (b, b_dims): (&[f32], &[usize]),
    out: &mut [f32],
    out_dims: &[usize],
) {
    let apply = |x: f32, y: f32| match kind {
        BinaryKind::Add => x + y,
        BinaryKind::Subtract => x - y,
        BinaryKind::Multiply => x * y,
        BinaryKind::Divide => x / y,
        BinaryKind::Maximum => x.max(y),
        BinaryKind::Minimum => x.min(y),
    };

    // Fast path: no broadcasting.
    if a_dims == out_dims && b_dims == out_dims {
        for ((slot, &x), &y) in out.iter_mut().zip(a).zip(b) {
            *slot = apply(x, y);
        }
        return;
    }

    let offsets = broadcast_offsets(a_dims, out_dims).zip(broadcast_offsets(b_dims, out_dims));
    for (slot, (ia, ib)) in out.iter_mut().zip(offsets) {
        *slot = apply(a[ia], b[ib]);
    }
}

pub(crate) fn unary(kind: UnaryKind, input: &[f32], out: &mut [f32]) {
    let apply = |x: f32| match kind {
        UnaryKind::Abs => x.abs(),
        UnaryKind::Ceiling => x.ceil(),
        UnaryKind::Floor => x.floor(),
        UnaryKind::Negate => -x,
        UnaryKind::SquareRoot => x.sqrt(),
        UnaryKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        UnaryKind::Tanh => x.tanh(),
        UnaryKind::HardSwish => x * (x + 3.0).clamp(0.0, 6.0) / 6.0,
        UnaryKind::Clamp { min, max } => x.max(min).min(max),
        UnaryKind::Elu { alpha } => {
            if x > 0.0 {
                x
            } else {
                alpha * x.exp_m1()
            }
        }
        UnaryKind::LeakyRelu { slope } => {
            if x >= 0.0 {
                x
            } else {
                slope * x
            }
        }
    };
    for (slot, &x) in out.iter_mut().zip(input) {
        *slot = apply(x);
    }
}

/// Softmax over the last axis, max-subtracted.
pub(crate) fn softmax(input: &[f32], dims: &[usize], out: &mut [f32]) {
    let axis = dims.last().copied().unwrap_or(1);
    if axis == 0 {
        return;
    }
    for (row, out_row) in input.chunks_exact(axis).zip(out.chunks_exact_mut(axis)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for (slot, &x) in out_row.iter_mut().zip(row) {
            *slot = (x - max).exp();
            sum += *slot;
        }
        for slot in out_row.iter_mut() {
            *slot /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_same_shape() {
        let mut out = [0.0; 4];
        binary(
            BinaryKind::Add,
            (&[1.0, 2.0, 3.0, 4.0][..], &[4][..]),
            (&[5.0, 6.0, 7.0, 8.0][..], &[4][..]),
            &mut out,
            &[4],
        );
        assert_eq!(out, [6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn test_binary_broadcast() {
        let mut out = [0.0; 6];
        binary(
            BinaryKind::Multiply,
            (&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0][..], &[2, 3][..]),
            (&[10.0, 100.0][..], &[2, 1][..]),
            &mut out,
            &[2, 3],
        );
        assert_eq!(out, [10.0, 20.0, 30.0, 400.0, 500.0, 600.0]);
    }

    #[test]
    fn test_unary_activations() {
        let input = [-2.0, 0.0, 2.0];
        let mut out = [0.0; 3];

        unary(UnaryKind::Clamp { min: 0.0, max: f32::INFINITY }, &input, &mut out);
        assert_eq!(out, [0.0, 0.0, 2.0]);

        unary(UnaryKind::LeakyRelu { slope: 0.5 }, &input, &mut out);
        assert_eq!(out, [-1.0, 0.0, 2.0]);

        unary(UnaryKind::HardSwish, &input, &mut out);
        assert!((out[0] - (-2.0 / 6.0)).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 2.0 * 5.0 / 6.0).abs() < 1e-6);

        unary(UnaryKind::Sigmoid, &[0.0], &mut out[..1]);
        assert_eq!(out[0], 0.5);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let input = [1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0];
        let mut out = [0.0; 6];
        softmax(&input, &[2, 3], &mut out);

        for row in out.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
        assert!(out[2] > out[1] && out[1] > out[0]);
        assert!((out[3] - 1.0 / 3.0).abs() < 1e-6);
    }
}
