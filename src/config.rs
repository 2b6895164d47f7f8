//! Network configuration surface
//!
//! [`NetConfig`] gathers everything the outer estimator supplies: the layer
//! sequence, regularization policy, learning rule and its hyperparameters,
//! and the training-loop bounds. Validation happens up front so that
//! configuration mistakes surface before any numeric work begins.

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::graph::InputShape;
use crate::spec::{LayerSpec, Regularize};

/// Complete configuration for one network
#[derive(Clone, Debug)]
pub struct NetConfig {
    /// Ordered layer descriptions, input side first
    pub layers: Vec<LayerSpec>,
    /// Global regularization mode; `None` lets per-layer settings decide
    pub regularize: Option<Regularize>,
    /// Global dropout rate used when the mode is dropout but no layer
    /// declares its own rate (defaults to 0.5)
    pub dropout_rate: Option<f32>,
    /// Global weight-decay coefficient (defaults to 1e-4)
    pub weight_decay: Option<f32>,
    /// Learning rule name: sgd, momentum, nesterov, adagrad, adadelta,
    /// rmsprop or adam
    pub learning_rule: String,
    pub learning_rate: f32,
    /// Required by the momentum and nesterov rules, unused otherwise
    pub learning_momentum: Option<f32>,
    /// Mini-batch size; trailing samples that do not fill a batch are
    /// dropped each epoch
    pub batch_size: usize,
    /// Epoch bound; `None` trains until another policy terminates
    pub n_iter: Option<usize>,
    /// Early-stopping window: terminate once the best error has not
    /// improved for this many consecutive epochs
    pub patience: Option<usize>,
    /// Fraction of the training data carved out as a validation set;
    /// mutually exclusive with `valid_set`
    pub valid_size: f32,
    /// Explicit validation set; mutually exclusive with `valid_size`
    pub valid_set: Option<(Array2<f32>, Array2<f32>)>,
    /// Seed for weight init, dropout masks, shuffling and the split
    pub random_state: Option<u64>,
    /// Input geometry; defaults to a flat shape taken from the data, but
    /// must be spatial when the first layer is a convolution
    pub input_shape: Option<InputShape>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            regularize: None,
            dropout_rate: None,
            weight_decay: None,
            learning_rule: "sgd".to_string(),
            learning_rate: 0.01,
            learning_momentum: None,
            batch_size: 1,
            n_iter: None,
            patience: None,
            valid_size: 0.0,
            valid_set: None,
            random_state: None,
            input_shape: None,
        }
    }
}

impl NetConfig {
    pub fn new(layers: Vec<LayerSpec>) -> Self {
        Self {
            layers,
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>, learning_rate: f32) -> Self {
        self.learning_rule = rule.into();
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.learning_momentum = Some(momentum);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = Some(n_iter);
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = Some(patience);
        self
    }

    pub fn with_regularize(mut self, mode: Regularize) -> Self {
        self.regularize = Some(mode);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Validate everything that can be checked without data
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::config("layers", "at least one layer is required"));
        }
        for layer in &self.layers {
            layer.validate()?;
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if self.layers[..i].iter().any(|l| l.name() == layer.name()) {
                return Err(Error::config(
                    layer.name(),
                    "layer names must be unique".to_string(),
                ));
            }
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size", "must be greater than zero"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::config("learning_rate", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.valid_size) {
            return Err(Error::config("valid_size", "must lie in [0, 1)"));
        }
        if self.valid_size > 0.0 && self.valid_set.is_some() {
            return Err(Error::ConfigurationConflict(
                "`valid_size` and `valid_set` cannot both be specified".to_string(),
            ));
        }
        if let Some(rate) = self.dropout_rate {
            if !(0.0..1.0).contains(&rate) {
                return Err(Error::config("dropout_rate", "must lie in [0, 1)"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn one_layer() -> Vec<LayerSpec> {
        vec![LayerSpec::dense("out", 2, "Linear")]
    }

    #[test]
    fn test_default_is_valid_with_layers() {
        let config = NetConfig::new(one_layer());
        assert!(config.validate().is_ok());
        assert_eq!(config.learning_rule, "sgd");
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_empty_layers_rejected() {
        let config = NetConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_size_and_valid_set_conflict() {
        let mut config = NetConfig::new(one_layer());
        config.valid_size = 0.2;
        config.valid_set = Some((Array2::zeros((4, 3)), Array2::zeros((4, 2))));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigurationConflict(_)));
    }

    #[test]
    fn test_duplicate_layer_names_rejected() {
        let config = NetConfig::new(vec![
            LayerSpec::dense("h", 4, "Tanh"),
            LayerSpec::dense("h", 2, "Linear"),
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = NetConfig::new(one_layer()).with_batch_size(0);
        assert!(config.validate().is_err());
    }
}
