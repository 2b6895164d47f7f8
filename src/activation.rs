//! Activation resolution and evaluation
//!
//! Layer specs carry their nonlinearity as a symbolic name; [`resolve`] maps
//! it onto one of the supported activations or fails naming the offending
//! layer. The resolved [`Activation`] evaluates a whole batch at once and
//! maps output gradients back to pre-activation gradients.

use ndarray::{Array2, Axis};

use crate::error::{Error, Result};

/// Supported nonlinearities
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Rectifier,
    Sigmoid,
    Tanh,
    Softmax,
    Linear,
}

/// Map a layer's symbolic activation name onto a concrete activation
///
/// Fails with [`Error::UnsupportedActivation`] for any name outside
/// {Rectifier, Sigmoid, Tanh, Softmax, Linear}.
pub fn resolve(layer: &str, activation: &str) -> Result<Activation> {
    match activation {
        "Rectifier" => Ok(Activation::Rectifier),
        "Sigmoid" => Ok(Activation::Sigmoid),
        "Tanh" => Ok(Activation::Tanh),
        "Softmax" => Ok(Activation::Softmax),
        "Linear" => Ok(Activation::Linear),
        other => Err(Error::UnsupportedActivation {
            layer: layer.to_string(),
            activation: other.to_string(),
        }),
    }
}

impl Activation {
    /// Apply the activation to a batch of pre-activations
    pub fn apply(&self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Linear => z.clone(),
            Activation::Rectifier => z.mapv(|x| x.max(0.0)),
            Activation::Sigmoid => z.mapv(sigmoid),
            Activation::Tanh => z.mapv(f32::tanh),
            Activation::Softmax => {
                let mut out = z.clone();
                for mut row in out.axis_iter_mut(Axis(0)) {
                    let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
                    row.mapv_inplace(|x| (x - max).exp());
                    let sum = row.sum();
                    row.mapv_inplace(|x| x / sum);
                }
                out
            }
        }
    }

    /// Map a gradient w.r.t. the output back to a gradient w.r.t. the
    /// pre-activation, given the cached forward values
    ///
    /// `z` is the pre-activation, `a = apply(z)` the output. Softmax uses the
    /// full per-row Jacobian-vector product since the task loss here is MSE
    /// rather than cross-entropy.
    pub fn grad(&self, z: &Array2<f32>, a: &Array2<f32>, grad_out: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Linear => grad_out.clone(),
            Activation::Rectifier => {
                grad_out * &z.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 })
            }
            Activation::Sigmoid => grad_out * &a.mapv(|s| s * (1.0 - s)),
            Activation::Tanh => grad_out * &a.mapv(|t| 1.0 - t * t),
            Activation::Softmax => {
                // dL/dz_i = s_i * (g_i - Σ_j g_j s_j), row by row
                let mut out = Array2::zeros(grad_out.raw_dim());
                for ((s_row, g_row), mut o_row) in a
                    .axis_iter(Axis(0))
                    .zip(grad_out.axis_iter(Axis(0)))
                    .zip(out.axis_iter_mut(Axis(0)))
                {
                    let dot = s_row.iter().zip(g_row.iter()).map(|(s, g)| s * g).sum::<f32>();
                    for ((o, &s), &g) in o_row.iter_mut().zip(s_row.iter()).zip(g_row.iter()) {
                        *o = s * (g - dot);
                    }
                }
                out
            }
        }
    }

    /// Elementwise forward, used by the spatial (convolution) path
    ///
    /// Softmax has no elementwise form; the builder rejects it on
    /// convolution layers before this can be reached.
    pub fn apply_elem(&self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::Rectifier => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            Activation::Softmax => unreachable!("softmax is not elementwise"),
        }
    }

    /// Elementwise derivative from the cached forward values
    pub fn grad_elem(&self, z: f32, a: f32) -> f32 {
        match self {
            Activation::Linear => 1.0,
            Activation::Rectifier => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => a * (1.0 - a),
            Activation::Tanh => 1.0 - a * a,
            Activation::Softmax => unreachable!("softmax is not elementwise"),
        }
    }

    /// Whether the activation has an elementwise form usable on feature maps
    pub fn is_elementwise(&self) -> bool {
        !matches!(self, Activation::Softmax)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
