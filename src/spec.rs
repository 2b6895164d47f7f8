//! Declarative layer descriptions
//!
//! A network is configured as an ordered sequence of [`LayerSpec`] values.
//! The specs are immutable descriptions owned by the model configuration;
//! the graph builder turns them into live nodes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the edges of the input are treated by a convolution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorderMode {
    /// No padding; output shrinks by `kernel - 1`
    #[default]
    Valid,
    /// Zero-pad so the output matches the input size
    Same,
    /// Zero-pad by `kernel - 1` on each side; output grows
    Full,
}

/// Pooling operator applied after a convolution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolType {
    #[default]
    Max,
    Mean,
}

/// Global regularization policy
///
/// Dropout and weight decay are mutually exclusive: at most one of them may
/// contribute to the composed training objective in a given run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regularize {
    Dropout,
    L1,
    L2,
}

/// Description of one network layer
///
/// The activation is kept as a free-form string and resolved against the
/// supported set when the graph is built, so misspelled names are reported
/// with the offending layer rather than failing to parse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LayerSpec {
    Dense {
        name: String,
        units: usize,
        activation: String,
        /// Stochastic zeroing rate applied to this layer's *input* during
        /// training; `None` disables dropout for the layer.
        dropout: Option<f32>,
        /// Per-layer weight-decay coefficient overriding the global one
        weight_decay: Option<f32>,
    },
    Convolution {
        name: String,
        channels: usize,
        kernel_shape: (usize, usize),
        /// Stride of the pooling stage; defaults to `pool_shape`
        kernel_stride: Option<(usize, usize)>,
        border_mode: Option<BorderMode>,
        /// `(1, 1)` or `None` disables pooling
        pool_shape: Option<(usize, usize)>,
        pool_type: Option<PoolType>,
        activation: String,
    },
}

impl LayerSpec {
    /// Shorthand for a dense layer without regularization
    pub fn dense(name: impl Into<String>, units: usize, activation: impl Into<String>) -> Self {
        LayerSpec::Dense {
            name: name.into(),
            units,
            activation: activation.into(),
            dropout: None,
            weight_decay: None,
        }
    }

    /// Shorthand for a plain convolution layer without pooling
    pub fn convolution(
        name: impl Into<String>,
        channels: usize,
        kernel_shape: (usize, usize),
        activation: impl Into<String>,
    ) -> Self {
        LayerSpec::Convolution {
            name: name.into(),
            channels,
            kernel_shape,
            kernel_stride: None,
            border_mode: None,
            pool_shape: None,
            pool_type: None,
            activation: activation.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            LayerSpec::Dense { name, .. } | LayerSpec::Convolution { name, .. } => name,
        }
    }

    pub fn activation(&self) -> &str {
        match self {
            LayerSpec::Dense { activation, .. } | LayerSpec::Convolution { activation, .. } => {
                activation
            }
        }
    }

    /// Per-layer dropout rate, if declared
    pub fn dropout(&self) -> Option<f32> {
        match self {
            LayerSpec::Dense { dropout, .. } => *dropout,
            LayerSpec::Convolution { .. } => None,
        }
    }

    /// Per-layer weight-decay coefficient, if declared
    pub fn weight_decay(&self) -> Option<f32> {
        match self {
            LayerSpec::Dense { weight_decay, .. } => *weight_decay,
            LayerSpec::Convolution { .. } => None,
        }
    }

    /// Check field values for the layer kind
    ///
    /// The enum makes structurally missing fields unrepresentable, so the
    /// required-field contract reduces to rejecting zero-sized or
    /// out-of-range values.
    pub fn validate(&self) -> Result<()> {
        match self {
            LayerSpec::Dense {
                name,
                units,
                dropout,
                weight_decay,
                ..
            } => {
                if *units == 0 {
                    return Err(Error::config(name, "`units` must be greater than zero"));
                }
                if let Some(rate) = dropout {
                    if !(0.0..1.0).contains(rate) {
                        return Err(Error::config(name, "`dropout` must lie in [0, 1)"));
                    }
                }
                if let Some(wd) = weight_decay {
                    if *wd < 0.0 {
                        return Err(Error::config(name, "`weight_decay` must be non-negative"));
                    }
                }
            }
            LayerSpec::Convolution {
                name,
                channels,
                kernel_shape,
                pool_shape,
                ..
            } => {
                if *channels == 0 {
                    return Err(Error::config(name, "`channels` must be greater than zero"));
                }
                if kernel_shape.0 == 0 || kernel_shape.1 == 0 {
                    return Err(Error::config(name, "`kernel_shape` must be non-zero"));
                }
                if let Some((ph, pw)) = pool_shape {
                    if *ph == 0 || *pw == 0 {
                        return Err(Error::config(name, "`pool_shape` must be non-zero"));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_shorthand() {
        let spec = LayerSpec::dense("hidden0", 32, "Rectifier");
        assert_eq!(spec.name(), "hidden0");
        assert_eq!(spec.activation(), "Rectifier");
        assert!(spec.dropout().is_none());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_zero_units_rejected() {
        let spec = LayerSpec::dense("bad", 0, "Linear");
        let err = spec.validate().unwrap_err();
        assert!(format!("{err}").contains("units"));
        assert!(format!("{err}").contains("bad"));
    }

    #[test]
    fn test_dropout_range() {
        let spec = LayerSpec::Dense {
            name: "d".to_string(),
            units: 4,
            activation: "Tanh".to_string(),
            dropout: Some(1.0),
            weight_decay: None,
        };
        assert!(spec.validate().is_err());

        let spec = LayerSpec::Dense {
            name: "d".to_string(),
            units: 4,
            activation: "Tanh".to_string(),
            dropout: Some(0.5),
            weight_decay: None,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_convolution_validation() {
        let spec = LayerSpec::convolution("conv0", 8, (3, 3), "Rectifier");
        assert!(spec.validate().is_ok());

        let spec = LayerSpec::convolution("conv0", 0, (3, 3), "Rectifier");
        assert!(spec.validate().is_err());

        let spec = LayerSpec::convolution("conv0", 8, (0, 3), "Rectifier");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_spec_serde_roundtrip() {
        let spec = LayerSpec::Convolution {
            name: "conv0".to_string(),
            channels: 4,
            kernel_shape: (3, 3),
            kernel_stride: Some((2, 2)),
            border_mode: Some(BorderMode::Same),
            pool_shape: Some((2, 2)),
            pool_type: Some(PoolType::Max),
            activation: "Rectifier".to_string(),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: LayerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
