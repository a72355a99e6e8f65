//! Matrix multiplication, convolution and pooling kernels (fp32, NHWC).

use super::broadcast_offsets;
use crate::node::{Convolution2dParams, FullyConnectedParams, Pooling2dParams};

pub(crate) fn fully_connected(
    (input, in_dims): (&[f32], &[usize]),
    (filter, filter_dims): (&[f32], &[usize]),
    bias: Option<(&[f32], &[usize])>,
    params: &FullyConnectedParams,
    out: &mut [f32],
) {
    let (m, k) = if params.transpose_input {
        (in_dims[1], in_dims[0])
    } else {
        (in_dims[0], in_dims[1])
    };
    let n = if params.transpose_filter {
        filter_dims[0]
    } else {
        filter_dims[1]
    };

    let a = |i: usize, p: usize| {
        if params.transpose_input {
            input[p * m + i]
        } else {
            input[i * k + p]
        }
    };
    let b = |p: usize, j: usize| {
        if params.transpose_filter {
            filter[j * k + p]
        } else {
            filter[p * n + j]
        }
    };

    for i in 0..m {
        for j in 0..n {
            let sum: f32 = (0..k).map(|p| a(i, p) * b(p, j)).sum();
            out[i * n + j] = params.alpha * sum;
        }
    }

    if let Some((bias, bias_dims)) = bias {
        for (slot, offset) in out.iter_mut().zip(broadcast_offsets(bias_dims, &[m, n])) {
            *slot += params.beta * bias[offset];
        }
    }
}

/// Map an output coordinate plus window tap to an input coordinate, or
/// `None` when the tap lands in padding.
fn source_index(
    out: usize,
    tap: usize,
    stride: usize,
    dilation: usize,
    pad: usize,
    extent: usize,
) -> Option<usize> {
    (out * stride + tap * dilation)
        .checked_sub(pad)
        .filter(|&index| index < extent)
}

/// NHWC input, OHWI filter, NHWC output.
pub(crate) fn conv2d(
    (input, in_dims): (&[f32], &[usize]),
    (filter, filter_dims): (&[f32], &[usize]),
    bias: Option<&[f32]>,
    params: &Convolution2dParams,
    out: &mut [f32],
    out_dims: &[usize],
) {
    let [batch, in_h, in_w, in_c] = [in_dims[0], in_dims[1], in_dims[2], in_dims[3]];
    let [out_c, k_h, k_w, group_in_c] = [
        filter_dims[0],
        filter_dims[1],
        filter_dims[2],
        filter_dims[3],
    ];
    let [out_h, out_w] = [out_dims[1], out_dims[2]];
    let group_out_c = out_c / params.groups;

    let mut index = 0;
    for n in 0..batch {
        for oh in 0..out_h {
            for ow in 0..out_w {
                for oc in 0..out_c {
                    let group = oc / group_out_c;
                    let mut sum = bias.map_or(0.0, |bias| bias[oc]);
                    for kh in 0..k_h {
                        let Some(ih) = source_index(
                            oh,
                            kh,
                            params.strides[0],
                            params.dilations[0],
                            params.padding[0],
                            in_h,
                        ) else {
                            continue;
                        };
                        for kw in 0..k_w {
                            let Some(iw) = source_index(
                                ow,
                                kw,
                                params.strides[1],
                                params.dilations[1],
                                params.padding[2],
                                in_w,
                            ) else {
                                continue;
                            };
                            let in_base = ((n * in_h + ih) * in_w + iw) * in_c + group * group_in_c;
                            let filter_base = ((oc * k_h + kh) * k_w + kw) * group_in_c;
                            for ic in 0..group_in_c {
                                sum += input[in_base + ic] * filter[filter_base + ic];
                            }
                        }
                    }
                    out[index] = sum;
                    index += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pooling {
    Average,
    Max,
}

/// NHWC pooling. Padding taps are skipped: they neither win a max nor count
/// toward an average.
pub(crate) fn pool2d(
    pooling: Pooling,
    (input, in_dims): (&[f32], &[usize]),
    params: &Pooling2dParams,
    out: &mut [f32],
    out_dims: &[usize],
) {
    let [batch, in_h, in_w, channels] = [in_dims[0], in_dims[1], in_dims[2], in_dims[3]];
    let [out_h, out_w] = [out_dims[1], out_dims[2]];

    let mut index = 0;
    for n in 0..batch {
        for oh in 0..out_h {
            for ow in 0..out_w {
                for c in 0..channels {
                    let mut acc = match pooling {
                        Pooling::Average => 0.0,
                        Pooling::Max => f32::NEG_INFINITY,
                    };
                    let mut count = 0usize;
                    for kh in 0..params.window[0] {
                        let Some(ih) = source_index(
                            oh,
                            kh,
                            params.strides[0],
                            params.dilations[0],
                            params.padding[0],
                            in_h,
                        ) else {
                            continue;
                        };
                        for kw in 0..params.window[1] {
                            let Some(iw) = source_index(
                                ow,
                                kw,
                                params.strides[1],
                                params.dilations[1],
                                params.padding[2],
                                in_w,
                            ) else {
                                continue;
                            };
                            let value = input[((n * in_h + ih) * in_w + iw) * channels + c];
                            acc = match pooling {
                                Pooling::Average => acc + value,
                                Pooling::Max => acc.max(value),
                            };
                            count += 1;
                        }
                    }
                    out[index] = match (pooling, count) {
                        (_, 0) => 0.0,
                        (Pooling::Average, count) => acc / count as f32,
                        (Pooling::Max, _) => acc,
                    };
                    index += 1;
                }
            }
        }
    }
}
