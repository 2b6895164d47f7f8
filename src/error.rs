//! Error types

use thiserror::Error;

/// Errors raised while validating configuration, building the graph, or
/// round-tripping parameters.
///
/// All configuration errors surface before any numeric work begins; only
/// `ShapeMismatch` can appear later, at parameter-injection time.
#[derive(Debug, Error)]
pub enum Error {
    /// A layer or trainer field has a missing or invalid value
    #[error("Invalid configuration for `{context}`: {reason}")]
    Configuration { context: String, reason: String },

    /// Two mutually exclusive options were both set
    #[error("Conflicting configuration: {0}")]
    ConfigurationConflict(String),

    /// Activation name outside the supported set
    #[error("Activation `{activation}` is not supported for layer `{layer}`")]
    UnsupportedActivation { layer: String, activation: String },

    /// Learning rule name outside the supported set
    #[error("Learning rule `{0}` is not supported")]
    UnsupportedOptimizer(String),

    /// Injected parameter arrays do not match the live layer shapes
    #[error("{what} shape mismatch for layer `{layer}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        layer: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An operation that needs a built graph ran before initialization
    #[error("Network has not been initialized yet")]
    NotInitialized,
}

impl Error {
    pub(crate) fn config(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for all fallible operations in this crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("hidden0", "units must be greater than zero");
        assert!(format!("{err}").contains("hidden0"));

        let err = Error::UnsupportedActivation {
            layer: "out".to_string(),
            activation: "Swish".to_string(),
        };
        assert!(format!("{err}").contains("Swish"));
        assert!(format!("{err}").contains("out"));

        let err = Error::UnsupportedOptimizer("lbfgs".to_string());
        assert!(format!("{err}").contains("lbfgs"));

        let err = Error::ShapeMismatch {
            what: "weights",
            layer: "hidden0".to_string(),
            expected: vec![4, 8],
            actual: vec![8, 4],
        };
        let msg = format!("{err}");
        assert!(msg.contains("[4, 8]"));
        assert!(msg.contains("[8, 4]"));
    }
}
