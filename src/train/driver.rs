//! Epoch loop and stopping policies

use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use super::events::{EventSink, TrainEvent};
use super::Step;
use crate::cost;
use crate::error::{Error, Result};
use crate::graph::Graph;

/// Outcome of a completed training run
#[derive(Clone, Debug)]
pub struct TrainReport {
    /// Number of epochs actually run
    pub epochs: usize,
    /// Number of gradient steps actually run
    pub steps: usize,
    /// Lowest epoch error observed
    pub best_error: f32,
    /// Error of the last epoch
    pub final_error: f32,
    /// Whether the patience policy terminated the run before the epoch bound
    pub stopped_early: bool,
    /// Per-epoch average batch errors, in order
    pub epoch_errors: Vec<f32>,
}

/// Drives shuffled mini-batch epochs until a stopping policy fires
///
/// Each epoch shuffles the sample indices, walks them in contiguous batches
/// of `batch_size`, and drops the trailing samples that do not fill a batch.
/// The run ends when `n_iter` epochs have completed, or when the best error
/// has not improved for `patience` consecutive epochs.
#[derive(Debug)]
pub struct TrainingLoop {
    batch_size: usize,
    n_iter: Option<usize>,
    patience: Option<usize>,
}

impl TrainingLoop {
    pub fn new(batch_size: usize, n_iter: Option<usize>, patience: Option<usize>) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("batch_size", "must be greater than zero"));
        }
        if n_iter.is_none() && patience.is_none() {
            return Err(Error::config(
                "n_iter",
                "either `n_iter` or `patience` must bound the training run",
            ));
        }
        if n_iter == Some(0) {
            return Err(Error::config("n_iter", "must be greater than zero"));
        }
        if patience == Some(0) {
            return Err(Error::config("patience", "must be greater than zero"));
        }
        Ok(Self {
            batch_size,
            n_iter,
            patience,
        })
    }

    /// Run the loop to completion
    ///
    /// `valid` is only evaluated for reporting; the stopping policies watch
    /// the training error.
    pub fn run(
        &self,
        graph: &mut Graph,
        step: &mut Step,
        x: ArrayView2<f32>,
        y: ArrayView2<f32>,
        valid: Option<(ArrayView2<f32>, ArrayView2<f32>)>,
        sink: &mut dyn EventSink,
        rng: &mut StdRng,
    ) -> Result<TrainReport> {
        let samples = x.nrows();
        if samples < self.batch_size {
            return Err(Error::config(
                "batch_size",
                format!(
                    "batch size {} exceeds the {samples} training samples",
                    self.batch_size
                ),
            ));
        }

        sink.emit(&TrainEvent::Started {
            samples,
            batch_size: self.batch_size,
            n_iter: self.n_iter,
        });

        let mut indices: Vec<usize> = (0..samples).collect();
        let mut report = TrainReport {
            epochs: 0,
            steps: 0,
            best_error: f32::INFINITY,
            final_error: f32::INFINITY,
            stopped_early: false,
            epoch_errors: Vec::new(),
        };
        let mut epochs_without_improvement = 0;

        loop {
            if let Some(bound) = self.n_iter {
                if report.epochs >= bound {
                    break;
                }
            }

            indices.shuffle(rng);
            let mut epoch_cost = 0.0;
            let mut batches = 0;
            for chunk in indices.chunks_exact(self.batch_size) {
                let xb = x.select(Axis(0), chunk);
                let yb = y.select(Axis(0), chunk);
                epoch_cost += step.run(graph, xb.view(), yb.view(), rng);
                batches += 1;
            }
            let error = epoch_cost / batches as f32;

            report.epochs += 1;
            report.steps += batches;
            report.final_error = error;
            report.epoch_errors.push(error);

            let improved = error < report.best_error;
            if improved {
                report.best_error = error;
                epochs_without_improvement = 0;
            } else {
                epochs_without_improvement += 1;
            }

            let valid_error = valid.map(|(vx, vy)| {
                let out = graph.forward_infer(vx);
                cost::mse(&out.view(), &vy)
            });
            sink.emit(&TrainEvent::EpochCompleted {
                epoch: report.epochs,
                error,
                best_error: report.best_error,
                improved,
                valid_error,
            });

            if let Some(patience) = self.patience {
                if epochs_without_improvement >= patience {
                    report.stopped_early = true;
                    break;
                }
            }
        }

        sink.emit(&TrainEvent::Finished {
            epochs: report.epochs,
            best_error: report.best_error,
            stopped_early: report.stopped_early,
        });
        Ok(report)
    }
}
