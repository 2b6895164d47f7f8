//! Network backend facade
//!
//! [`MlpBackend`] ties the pieces together: it validates the configuration
//! up front, builds the graph lazily once the input width is known, and
//! exposes fit/predict plus parameter round-tripping. The build lifecycle is
//! explicit in [`GraphState`]; operations that need a live graph fail with
//! [`Error::NotInitialized`] instead of guessing.

use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::NetConfig;
use crate::cost::{self, CostConfig};
use crate::error::{Error, Result};
use crate::graph::{Graph, InputShape};
use crate::optim;
use crate::params::{self, ParameterSnapshot};
use crate::spec::LayerSpec;
use crate::train::{EventSink, LogSink, Step, TrainReport, TrainingLoop};

/// Build lifecycle of the backend's graph
#[derive(Debug)]
pub enum GraphState {
    /// No data seen yet; only configuration exists
    Unbuilt,
    /// Graph built and parameters initialized
    Built(Graph),
}

/// Training backend for one configured network
#[derive(Debug)]
pub struct MlpBackend {
    config: NetConfig,
    cost: CostConfig,
    state: GraphState,
    /// Parameters supplied before the graph existed, applied at build time
    pending: Option<ParameterSnapshot>,
    rng: StdRng,
}

impl MlpBackend {
    /// Validate the configuration and set up an unbuilt backend
    ///
    /// Everything checkable without data fails here: layer values, the
    /// regularization composition, and the learning-rule dispatch.
    pub fn new(config: NetConfig) -> Result<Self> {
        config.validate()?;
        let cost = cost::compose(
            &config.layers,
            config.regularize,
            config.dropout_rate,
            config.weight_decay,
        )?;
        // Dispatch once now so a bad rule name or missing momentum fails
        // before any training data is involved
        optim::build_rule(
            &config.learning_rule,
            config.learning_rate,
            config.learning_momentum,
        )?;
        TrainingLoop::new(config.batch_size, config.n_iter, config.patience)?;

        let rng = match config.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            cost,
            state: GraphState::Unbuilt,
            pending: None,
            rng,
        })
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, GraphState::Built(_))
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// The built graph, once it exists
    pub fn graph(&self) -> Option<&Graph> {
        match &self.state {
            GraphState::Built(graph) => Some(graph),
            GraphState::Unbuilt => None,
        }
    }

    /// Build the graph for `n_features` input columns
    ///
    /// Idempotent: a second call on a built backend does nothing. Any
    /// parameters staged through [`set_params`](Self::set_params) before
    /// this point are injected into the fresh graph.
    pub fn initialize(&mut self, n_features: usize) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let input_shape = self
            .config
            .input_shape
            .unwrap_or(InputShape::Flat(n_features));
        if input_shape.flat_len() != n_features {
            return Err(Error::config(
                "input_shape",
                format!(
                    "configured shape covers {} features but the data has {n_features}",
                    input_shape.flat_len()
                ),
            ));
        }

        let specs = self.effective_specs();
        let mut graph = Graph::build(&specs, input_shape, &mut self.rng)?;
        if let Some(snapshot) = self.pending.take() {
            params::inject(&mut graph, &snapshot)?;
        }
        self.state = GraphState::Built(graph);
        Ok(())
    }

    /// Train on `x`/`y`, logging progress through the `log` crate
    pub fn fit(&mut self, x: ArrayView2<f32>, y: ArrayView2<f32>) -> Result<TrainReport> {
        self.fit_with(x, y, &mut LogSink)
    }

    /// Train on `x`/`y`, reporting progress to `sink`
    ///
    /// Builds the graph on first use. When `valid_size` is set, a shuffled
    /// fraction of the data is held out and evaluated after every epoch; an
    /// explicit `valid_set` is used as-is.
    pub fn fit_with(
        &mut self,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        sink: &mut dyn EventSink,
    ) -> Result<TrainReport> {
        if x.nrows() != y.nrows() {
            return Err(Error::config(
                "y",
                format!("{} samples in x but {} targets in y", x.nrows(), y.nrows()),
            ));
        }
        self.initialize(x.ncols())?;

        let GraphState::Built(graph) = &mut self.state else {
            return Err(Error::NotInitialized);
        };
        if y.ncols() != graph.output_width() {
            return Err(Error::config(
                "y",
                format!(
                    "network produces {} outputs but y has {} columns",
                    graph.output_width(),
                    y.ncols()
                ),
            ));
        }

        let rule = optim::build_rule(
            &self.config.learning_rule,
            self.config.learning_rate,
            self.config.learning_momentum,
        )?;
        let mut step = Step::new(rule, self.cost.clone());
        let looper =
            TrainingLoop::new(self.config.batch_size, self.config.n_iter, self.config.patience)?;

        let (train_x, train_y, valid) = split_validation(
            x,
            y,
            self.config.valid_size,
            self.config.valid_set.as_ref(),
            &mut self.rng,
        );

        sink.on_graph(graph);
        looper.run(
            graph,
            &mut step,
            train_x.view(),
            train_y.view(),
            valid.as_ref().map(|(vx, vy)| (vx.view(), vy.view())),
            sink,
            &mut self.rng,
        )
    }

    /// Deterministic forward pass over `x`
    ///
    /// Builds the graph on first use, so predicting before any training
    /// runs the freshly initialized network.
    pub fn predict(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.initialize(x.ncols())?;
        let GraphState::Built(graph) = &self.state else {
            return Err(Error::NotInitialized);
        };
        if x.ncols() != graph.input_shape().flat_len() {
            return Err(Error::config(
                "x",
                format!(
                    "network expects {} features but x has {} columns",
                    graph.input_shape().flat_len(),
                    x.ncols()
                ),
            ));
        }
        Ok(graph.forward_infer(x))
    }

    /// Snapshot the live parameters
    pub fn get_params(&self) -> Result<ParameterSnapshot> {
        match &self.state {
            GraphState::Built(graph) => Ok(params::extract(graph)),
            GraphState::Unbuilt => Err(Error::NotInitialized),
        }
    }

    /// Overwrite the network parameters
    ///
    /// Before the graph exists the snapshot is staged and applied at build
    /// time; afterwards it is injected immediately with full shape checks.
    pub fn set_params(&mut self, snapshot: ParameterSnapshot) -> Result<()> {
        match &mut self.state {
            GraphState::Built(graph) => params::inject(graph, &snapshot),
            GraphState::Unbuilt => {
                self.pending = Some(snapshot);
                Ok(())
            }
        }
    }

    /// Layer specs with the global dropout rate materialized
    ///
    /// When the dropout mode is active without per-layer rates, every dense
    /// layer inherits the shared rate; layer-specific rates always win.
    fn effective_specs(&self) -> Vec<LayerSpec> {
        let Some((incl, _)) = self.cost.default_dropout else {
            return self.config.layers.clone();
        };
        let rate = 1.0 - incl;
        self.config
            .layers
            .iter()
            .cloned()
            .map(|mut spec| {
                if let LayerSpec::Dense { dropout, .. } = &mut spec {
                    if dropout.is_none() {
                        *dropout = Some(rate);
                    }
                }
                spec
            })
            .collect()
    }
}

/// Carve a validation set out of the training data, or pass through the
/// explicit one
fn split_validation(
    x: ArrayView2<f32>,
    y: ArrayView2<f32>,
    valid_size: f32,
    valid_set: Option<&(Array2<f32>, Array2<f32>)>,
    rng: &mut StdRng,
) -> (Array2<f32>, Array2<f32>, Option<(Array2<f32>, Array2<f32>)>) {
    if let Some((vx, vy)) = valid_set {
        return (x.to_owned(), y.to_owned(), Some((vx.clone(), vy.clone())));
    }
    let n = x.nrows();
    let n_valid = (n as f32 * valid_size).floor() as usize;
    if n_valid == 0 || n_valid >= n {
        return (x.to_owned(), y.to_owned(), None);
    }
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let (valid_idx, train_idx) = indices.split_at(n_valid);
    (
        x.select(Axis(0), train_idx),
        y.select(Axis(0), train_idx),
        Some((x.select(Axis(0), valid_idx), y.select(Axis(0), valid_idx))),
    )
}
