//! Training-objective composition
//!
//! [`compose`] aggregates the per-layer regularization settings into a
//! [`CostConfig`] while enforcing that dropout and weight decay never both
//! contribute to the same objective. The base cost is always mean squared
//! error; when a weight-decay mode is active, the per-layer penalty term and
//! its gradient are added around the backward pass.

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2};

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::spec::{LayerSpec, Regularize};

const DEFAULT_DROPOUT_RATE: f32 = 0.5;
const DEFAULT_WEIGHT_DECAY: f32 = 1e-4;

/// Weight-decay penalty variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Penalty {
    /// `coeff * Σ |w|` per layer
    L1,
    /// `coeff * Σ w²` per layer
    L2,
}

/// Aggregated regularization settings for one training run
///
/// Exactly one of the dropout maps and the decay map is non-trivial; the
/// composed objective never carries both. Dropout has no cost-side term —
/// its runtime effect is the zeroing transform wired into the graph — so the
/// dropout maps here are bookkeeping that documents the effective rates.
#[derive(Clone, Debug, Default)]
pub struct CostConfig {
    /// Inclusion probability per layer name
    pub dropout_prob: HashMap<String, f32>,
    /// Inverse inclusion probability per layer name
    pub dropout_scale: HashMap<String, f32>,
    /// Uniform `(probability, scale)` used when the dropout mode is set
    /// globally without per-layer rates
    pub default_dropout: Option<(f32, f32)>,
    /// Decay coefficient per layer name
    pub layer_decay: HashMap<String, f32>,
    /// Which penalty the decay coefficients feed
    pub penalty: Option<Penalty>,
}

impl CostConfig {
    /// Scalar weight-decay penalty for the graph's current weights
    pub fn penalty_value(&self, graph: &Graph) -> f32 {
        let Some(penalty) = self.penalty else {
            return 0.0;
        };
        let mut total = 0.0;
        for node in graph.nodes() {
            if let Some(&coeff) = self.layer_decay.get(node.name()) {
                let sum: f32 = match penalty {
                    Penalty::L1 => node.weights().iter().map(|w| w.abs()).sum(),
                    Penalty::L2 => node.weights().iter().map(|w| w * w).sum(),
                };
                total += coeff * sum;
            }
        }
        total
    }

    /// Add the penalty gradient into each layer's weight-gradient buffer
    ///
    /// Must run after the backward pass and before the optimizer step.
    pub fn accumulate_decay_grads(&self, graph: &mut Graph) {
        let Some(penalty) = self.penalty else {
            return;
        };
        for node in graph.nodes_mut() {
            let Some(&coeff) = self.layer_decay.get(node.name()) else {
                continue;
            };
            if let Some((w, grad)) = node.weight_grad_pair_mut() {
                match penalty {
                    Penalty::L1 => {
                        for (g, &w) in grad.iter_mut().zip(w.iter()) {
                            *g += coeff * w.signum();
                        }
                    }
                    Penalty::L2 => {
                        for (g, &w) in grad.iter_mut().zip(w.iter()) {
                            *g += 2.0 * coeff * w;
                        }
                    }
                }
            }
        }
    }
}

/// Compose the regularization configuration for the given layers and mode
///
/// Fails with [`Error::ConfigurationConflict`] whenever per-layer settings
/// contradict the global mode, or when dropout and weight decay would both
/// end up active.
pub fn compose(
    layers: &[LayerSpec],
    regularize: Option<Regularize>,
    dropout_rate: Option<f32>,
    weight_decay: Option<f32>,
) -> Result<CostConfig> {
    let mut config = CostConfig::default();

    // Aggregate per-layer dropout into shared maps
    for layer in layers {
        if let Some(rate) = layer.dropout() {
            let incl = 1.0 - rate;
            config.dropout_prob.insert(layer.name().to_string(), incl);
            config
                .dropout_scale
                .insert(layer.name().to_string(), 1.0 / incl);
        }
    }
    let mut effective = regularize;
    if !config.dropout_prob.is_empty() {
        match effective {
            None => effective = Some(Regularize::Dropout),
            Some(Regularize::Dropout) => {}
            Some(_) => {
                return Err(Error::ConfigurationConflict(
                    "per-layer dropout requires the dropout regularization mode".to_string(),
                ));
            }
        }
    }
    if effective == Some(Regularize::Dropout) && config.dropout_prob.is_empty() {
        let incl = 1.0 - dropout_rate.unwrap_or(DEFAULT_DROPOUT_RATE);
        config.default_dropout = Some((incl, 1.0 / incl));
    }

    // Aggregate weight-decay coefficients
    let mode_is_decay = matches!(effective, Some(Regularize::L1) | Some(Regularize::L2));
    let any_layer_decay = layers.iter().any(|l| l.weight_decay().is_some());
    if mode_is_decay {
        let wd = weight_decay.unwrap_or(DEFAULT_WEIGHT_DECAY);
        for layer in layers {
            config
                .layer_decay
                .insert(layer.name().to_string(), layer.weight_decay().unwrap_or(wd));
        }
    } else if any_layer_decay {
        if effective == Some(Regularize::Dropout) {
            return Err(Error::ConfigurationConflict(
                "per-layer weight decay cannot be combined with dropout".to_string(),
            ));
        }
        for layer in layers {
            if let Some(wd) = layer.weight_decay() {
                config.layer_decay.insert(layer.name().to_string(), wd);
            }
        }
        if effective.is_none() {
            effective = Some(Regularize::L2);
        }
    }

    // Dropout and weight decay are mutually exclusive in effect
    if !config.dropout_prob.is_empty() && !config.layer_decay.is_empty() {
        return Err(Error::ConfigurationConflict(
            "dropout and weight decay cannot both contribute to the cost".to_string(),
        ));
    }

    config.penalty = match effective {
        Some(Regularize::L1) => Some(Penalty::L1),
        Some(Regularize::L2) if !config.layer_decay.is_empty() => Some(Penalty::L2),
        _ => None,
    };
    Ok(config)
}

/// Mean squared error over all output elements
pub fn mse(predictions: &ArrayView2<f32>, targets: &ArrayView2<f32>) -> f32 {
    debug_assert_eq!(predictions.dim(), targets.dim());
    let diff = predictions - targets;
    let n = diff.len() as f32;
    diff.iter().map(|d| d * d).sum::<f32>() / n
}

/// Gradient of [`mse`] w.r.t. the predictions
pub fn mse_grad(predictions: &ArrayView2<f32>, targets: &ArrayView2<f32>) -> Array2<f32> {
    let n = predictions.len() as f32;
    (predictions - targets) * (2.0 / n)
}
