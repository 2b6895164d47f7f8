//! Feed-forward network training backend
//!
//! This crate turns a declarative layer configuration into a trainable
//! network: it builds a computational graph from [`LayerSpec`] values,
//! composes the training objective with mutually exclusive dropout or
//! weight-decay regularization, dispatches one of seven gradient-based
//! learning rules, and drives a mini-batch training loop with epoch and
//! patience stopping policies. Parameters round-trip through plain
//! serializable snapshots.
//!
//! # Example
//!
//! ```
//! use telar::{LayerSpec, MlpBackend, NetConfig};
//! use ndarray::array;
//!
//! let config = NetConfig::new(vec![
//!     LayerSpec::dense("hidden0", 8, "Rectifier"),
//!     LayerSpec::dense("output", 1, "Linear"),
//! ])
//! .with_rule("sgd", 0.05)
//! .with_batch_size(2)
//! .with_n_iter(10)
//! .with_seed(42);
//!
//! let mut net = MlpBackend::new(config)?;
//! let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
//! let y = array![[0.0], [1.0], [1.0], [0.0]];
//! let report = net.fit(x.view(), y.view())?;
//! assert_eq!(report.epochs, 10);
//!
//! let predictions = net.predict(x.view())?;
//! assert_eq!(predictions.dim(), (4, 1));
//! # Ok::<(), telar::Error>(())
//! ```

pub mod activation;
pub mod backend;
pub mod config;
pub mod cost;
pub mod error;
pub mod graph;
pub mod optim;
pub mod params;
pub mod spec;
pub mod train;

pub use backend::{GraphState, MlpBackend};
pub use config::NetConfig;
pub use error::{Error, Result};
pub use graph::{Graph, InputShape};
pub use params::{LayerParams, ParameterSnapshot};
pub use spec::{BorderMode, LayerSpec, PoolType, Regularize};
pub use train::{EventSink, LogSink, NullSink, TrainEvent, TrainReport};
