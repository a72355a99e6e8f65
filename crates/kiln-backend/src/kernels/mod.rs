//! Reference kernels.
//!
//! Kernels work on flat row-major slices plus their dimensions. Shapes are
//! validated when nodes are defined, so kernels index without rechecking.

pub(crate) mod elementwise;
pub(crate) mod nn;
pub(crate) mod shape;

/// NumPy-style broadcast of two shapes, or `None` if they are incompatible.
pub(crate) fn broadcast_dims(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    (0..rank)
        .map(|i| {
            let da = (i + a.len()).checked_sub(rank).map_or(1, |j| a[j]);
            let db = (i + b.len()).checked_sub(rank).map_or(1, |j| b[j]);
            match (da, db) {
                _ if da == db => Some(da),
                (1, _) => Some(db),
                (_, 1) => Some(da),
                _ => None,
            }
        })
        .collect()
}

pub(crate) fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

/// Strides of `dims` seen through a broadcast to rank `rank`: broadcast
/// axes get stride 0.
pub(crate) fn broadcast_strides(dims: &[usize], rank: usize) -> Vec<usize> {
    let strides = compute_strides(dims);
    let offset = rank - dims.len();
    (0..rank)
        .map(|i| match i.checked_sub(offset) {
            Some(j) if dims[j] != 1 => strides[j],
            _ => 0,
        })
        .collect()
}

pub(crate) fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}

/// Offsets into a broadcast operand for each output element, in order.
pub(crate) fn broadcast_offsets(dims: &[usize], out_dims: &[usize]) -> impl Iterator<Item = usize> {
    let strides = broadcast_strides(dims, out_dims.len());
    let out_dims = out_dims.to_vec();
    let count: usize = out_dims.iter().product();
    (0..count).map(move |index| {
        unravel_index(index, &out_dims)
            .iter()
            .zip(&strides)
            .map(|(c, s)| c * s)
            .sum()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_dims() {
        assert_eq!(broadcast_dims(&[2, 3], &[3]), Some(vec![2, 3]));
        assert_eq!(broadcast_dims(&[4, 1], &[1, 5]), Some(vec![4, 5]));
        assert_eq!(broadcast_dims(&[], &[2]), Some(vec![2]));
        assert_eq!(broadcast_dims(&[2], &[3]), None);
    }

    #[test]
    fn test_broadcast_offsets() {
        let offsets: Vec<usize> = broadcast_offsets(&[3], &[2, 3]).collect();
        assert_eq!(offsets, vec![0, 1, 2, 0, 1, 2]);

        let offsets: Vec<usize> = broadcast_offsets(&[2, 1], &[2, 3]).collect();
        assert_eq!(offsets, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_broadcast_offsets_outlive_dims() {
        let offsets = {
            let dims = vec![2, 1];
            let out_dims = vec![2, 2];
            broadcast_offsets(&dims, &out_dims)
        };
        assert_eq!(offsets.collect::<Vec<_>>(), vec![0, 0, 1, 1]);
    }
}
