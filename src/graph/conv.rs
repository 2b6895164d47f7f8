//! Convolution and pooling kernels
//!
//! Straightforward nested-loop implementations over `(batch, channels,
//! height, width)` arrays. Convolution runs with unit stride over an input
//! that has already been zero-padded for the configured border mode; the
//! pooling stage carries the stride.

use ndarray::{Array1, Array4};

use crate::spec::PoolType;

/// Zero-pad the spatial dimensions by `(ph, pw)` on each side
pub(crate) fn pad(input: &Array4<f32>, ph: usize, pw: usize) -> Array4<f32> {
    if ph == 0 && pw == 0 {
        return input.clone();
    }
    let (n, c, h, w) = input.dim();
    let mut out = Array4::zeros((n, c, h + 2 * ph, w + 2 * pw));
    out.slice_mut(ndarray::s![.., .., ph..ph + h, pw..pw + w])
        .assign(input);
    out
}

/// Remove the padding added by [`pad`]
pub(crate) fn crop(grad_padded: &Array4<f32>, ph: usize, pw: usize) -> Array4<f32> {
    if ph == 0 && pw == 0 {
        return grad_padded.clone();
    }
    let (_, _, hp, wp) = grad_padded.dim();
    grad_padded
        .slice(ndarray::s![.., .., ph..hp - ph, pw..wp - pw])
        .to_owned()
}

/// Unit-stride valid convolution of a padded input
///
/// `weights` is `(filters, in_channels, kh, kw)`; output is
/// `(batch, filters, h - kh + 1, w - kw + 1)` with the bias added per filter.
pub(crate) fn conv2d_forward(
    padded: &Array4<f32>,
    weights: &Array4<f32>,
    biases: &Array1<f32>,
) -> Array4<f32> {
    let (n, in_c, h, w) = padded.dim();
    let (filters, _, kh, kw) = weights.dim();
    let (oh, ow) = (h - kh + 1, w - kw + 1);

    let mut out = Array4::zeros((n, filters, oh, ow));
    for b in 0..n {
        for f in 0..filters {
            for i in 0..oh {
                for j in 0..ow {
                    let mut acc = biases[f];
                    for c in 0..in_c {
                        for ki in 0..kh {
                            for kj in 0..kw {
                                acc += padded[[b, c, i + ki, j + kj]] * weights[[f, c, ki, kj]];
                            }
                        }
                    }
                    out[[b, f, i, j]] = acc;
                }
            }
        }
    }
    out
}

/// Backward pass of [`conv2d_forward`]
///
/// Returns `(grad_weights, grad_biases, grad_padded_input)` for the gradient
/// `dz` w.r.t. the pre-activation output.
pub(crate) fn conv2d_backward(
    padded: &Array4<f32>,
    weights: &Array4<f32>,
    dz: &Array4<f32>,
) -> (Array4<f32>, Array1<f32>, Array4<f32>) {
    let (n, in_c, _, _) = padded.dim();
    let (filters, _, kh, kw) = weights.dim();
    let (_, _, oh, ow) = dz.dim();

    let mut grad_w = Array4::zeros(weights.raw_dim());
    let mut grad_b = Array1::zeros(filters);
    let mut grad_in = Array4::zeros(padded.raw_dim());

    for b in 0..n {
        for f in 0..filters {
            for i in 0..oh {
                for j in 0..ow {
                    let g = dz[[b, f, i, j]];
                    if g == 0.0 {
                        continue;
                    }
                    grad_b[f] += g;
                    for c in 0..in_c {
                        for ki in 0..kh {
                            for kj in 0..kw {
                                grad_w[[f, c, ki, kj]] += padded[[b, c, i + ki, j + kj]] * g;
                                grad_in[[b, c, i + ki, j + kj]] += weights[[f, c, ki, kj]] * g;
                            }
                        }
                    }
                }
            }
        }
    }
    (grad_w, grad_b, grad_in)
}

/// Pool spatial windows of `(ph, pw)` with stride `(sh, sw)`
///
/// For max pooling the flat `i * width + j` index of each window's argmax is
/// recorded so the backward pass can route gradients.
pub(crate) fn pool_forward(
    input: &Array4<f32>,
    shape: (usize, usize),
    stride: (usize, usize),
    kind: PoolType,
) -> (Array4<f32>, Array4<usize>) {
    let (n, c, h, w) = input.dim();
    let (ph, pw) = shape;
    let (sh, sw) = stride;
    let (oh, ow) = ((h - ph) / sh + 1, (w - pw) / sw + 1);

    let mut out = Array4::zeros((n, c, oh, ow));
    let mut argmax = Array4::zeros((n, c, oh, ow));
    let window = (ph * pw) as f32;

    for b in 0..n {
        for ch in 0..c {
            for i in 0..oh {
                for j in 0..ow {
                    match kind {
                        PoolType::Max => {
                            let mut best = f32::NEG_INFINITY;
                            let mut best_idx = 0;
                            for wi in 0..ph {
                                for wj in 0..pw {
                                    let (y, x) = (i * sh + wi, j * sw + wj);
                                    let v = input[[b, ch, y, x]];
                                    if v > best {
                                        best = v;
                                        best_idx = y * w + x;
                                    }
                                }
                            }
                            out[[b, ch, i, j]] = best;
                            argmax[[b, ch, i, j]] = best_idx;
                        }
                        PoolType::Mean => {
                            let mut acc = 0.0;
                            for wi in 0..ph {
                                for wj in 0..pw {
                                    acc += input[[b, ch, i * sh + wi, j * sw + wj]];
                                }
                            }
                            out[[b, ch, i, j]] = acc / window;
                        }
                    }
                }
            }
        }
    }
    (out, argmax)
}

/// Backward pass of [`pool_forward`]
pub(crate) fn pool_backward(
    grad_out: &Array4<f32>,
    input_dim: (usize, usize, usize, usize),
    shape: (usize, usize),
    stride: (usize, usize),
    kind: PoolType,
    argmax: &Array4<usize>,
) -> Array4<f32> {
    let (_, _, _, w) = input_dim;
    let (ph, pw) = shape;
    let (sh, sw) = stride;
    let (n, c, oh, ow) = grad_out.dim();
    let window = (ph * pw) as f32;

    let mut grad_in = Array4::zeros(input_dim);
    for b in 0..n {
        for ch in 0..c {
            for i in 0..oh {
                for j in 0..ow {
                    let g = grad_out[[b, ch, i, j]];
                    match kind {
                        PoolType::Max => {
                            let idx = argmax[[b, ch, i, j]];
                            grad_in[[b, ch, idx / w, idx % w]] += g;
                        }
                        PoolType::Mean => {
                            let spread = g / window;
                            for wi in 0..ph {
                                for wj in 0..pw {
                                    grad_in[[b, ch, i * sh + wi, j * sw + wj]] += spread;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    grad_in
}
