//! Data movement kernels. These are element-type agnostic.

use super::{compute_strides, unravel_index};

pub(crate) fn transpose<T: Copy>(
    input: &[T],
    in_dims: &[usize],
    permutation: &[usize],
    out: &mut [T],
    out_dims: &[usize],
) {
    let in_strides = compute_strides(in_dims);
    for (index, slot) in out.iter_mut().enumerate() {
        let coords = unravel_index(index, out_dims);
        let offset: usize = coords
            .iter()
            .zip(permutation)
            .map(|(&c, &axis)| c * in_strides[axis])
            .sum();
        *slot = input[offset];
    }
}

/// Join inputs along `axis`.
///
/// Viewing each tensor as `[outer, axis * inner]`, the output row is the
/// concatenation of the input rows.
pub(crate) fn concat<T: Copy>(inputs: &[(&[T], &[usize])], axis: usize, out: &mut [T]) {
    let Some((_, first_dims)) = inputs.first() else {
        return;
    };
    let outer: usize = first_dims[..axis].iter().product();
    let inner: usize = first_dims[axis + 1..].iter().product();

    let mut cursor = 0;
    for row in 0..outer {
        for (data, dims) in inputs {
            let chunk = dims[axis] * inner;
            out[cursor..cursor + chunk].copy_from_slice(&data[row * chunk..(row + 1) * chunk]);
            cursor += chunk;
        }
    }
}

pub(crate) fn constant_pad<T: Copy>(
    input: &[T],
    in_dims: &[usize],
    pre_padding: &[usize],
    value: T,
    out: &mut [T],
    out_dims: &[usize],
) {
    let in_strides = compute_strides(in_dims);
    for (index, slot) in out.iter_mut().enumerate() {
        let coords = unravel_index(index, out_dims);
        let mut offset = 0;
        let mut inside = true;
        for (axis, &c) in coords.iter().enumerate() {
            match c.checked_sub(pre_padding[axis]) {
                Some(source) if source < in_dims[axis] => offset += source * in_strides[axis],
                _ => {
                    inside = false;
                    break;
                }
            }
        }
        *slot = if inside { input[offset] } else { value };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_2d() {
        let input = [1, 2, 3, 4, 5, 6];
        let mut out = [0; 6];
        transpose(&input, &[2, 3], &[1, 0], &mut out, &[3, 2]);
        assert_eq!(out, [1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_concat_inner_axis() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0];
        let mut out = [0.0; 6];
        concat(&[(&a[..], &[2, 2][..]), (&b[..], &[2, 1][..])], 1, &mut out);
        assert_eq!(out, [1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn test_constant_pad() {
        let input = [1, 2, 3, 4];
        let mut out = [0; 12];
        constant_pad(&input, &[2, 2], &[1, 0], -1, &mut out, &[3, 4]);
        assert_eq!(out, [-1, -1, -1, -1, 1, 2, -1, -1, 3, 4, -1, -1]);
    }
}
