//! Training progress events
//!
//! The training loop reports progress through an injected [`EventSink`]
//! instead of writing to a global logger, so callers decide whether events
//! go to `log`, to a collector, or nowhere.

use crate::graph::Graph;

/// One observable moment in a training run
#[derive(Clone, Debug, PartialEq)]
pub enum TrainEvent {
    /// Emitted once before the first epoch
    Started {
        samples: usize,
        batch_size: usize,
        /// Epoch bound, when one is configured
        n_iter: Option<usize>,
    },
    /// Emitted after every epoch
    EpochCompleted {
        /// 1-based epoch index
        epoch: usize,
        /// Average batch cost over the epoch
        error: f32,
        /// Lowest epoch error seen so far, this epoch included
        best_error: f32,
        /// Whether this epoch set a new best
        improved: bool,
        /// Mean squared error on the validation set, when one exists
        valid_error: Option<f32>,
    },
    /// Emitted once when the loop terminates
    Finished {
        epochs: usize,
        best_error: f32,
        stopped_early: bool,
    },
}

/// Receiver for [`TrainEvent`]s
pub trait EventSink {
    fn emit(&mut self, event: &TrainEvent);

    /// Called once after the graph is built, before training begins
    ///
    /// The default implementation ignores it; sinks that want to report the
    /// network structure can override.
    fn on_graph(&mut self, _graph: &Graph) {}
}

/// Sink that forwards events to the `log` crate
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: &TrainEvent) {
        match event {
            TrainEvent::Started {
                samples,
                batch_size,
                n_iter,
            } => match n_iter {
                Some(n) => log::info!(
                    "training on {samples} samples, batch size {batch_size}, up to {n} epochs"
                ),
                None => log::info!("training on {samples} samples, batch size {batch_size}"),
            },
            TrainEvent::EpochCompleted {
                epoch,
                error,
                best_error,
                improved,
                valid_error,
            } => {
                let marker = if *improved { "*" } else { " " };
                match valid_error {
                    Some(v) => log::info!(
                        "epoch {epoch:>4}: error {error:.6}{marker} (best {best_error:.6}, valid {v:.6})"
                    ),
                    None => log::info!(
                        "epoch {epoch:>4}: error {error:.6}{marker} (best {best_error:.6})"
                    ),
                }
            }
            TrainEvent::Finished {
                epochs,
                best_error,
                stopped_early,
            } => {
                if *stopped_early {
                    log::info!("stopped early after {epochs} epochs, best error {best_error:.6}");
                } else {
                    log::info!("finished after {epochs} epochs, best error {best_error:.6}");
                }
            }
        }
    }

    fn on_graph(&mut self, graph: &Graph) {
        log::debug!("built graph with {} layers", graph.len());
        for node in graph.nodes() {
            log::debug!("  {}: weights {:?}", node.name(), node.weight_shape());
        }
    }
}

/// Sink that discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &TrainEvent) {}
}

/// Sink that records every event, for inspection after a run
#[derive(Clone, Debug, Default)]
pub struct CollectSink {
    pub events: Vec<TrainEvent>,
}

impl EventSink for CollectSink {
    fn emit(&mut self, event: &TrainEvent) {
        self.events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_sink_records_in_order() {
        let mut sink = CollectSink::default();
        sink.emit(&TrainEvent::Started {
            samples: 10,
            batch_size: 2,
            n_iter: Some(5),
        });
        sink.emit(&TrainEvent::Finished {
            epochs: 5,
            best_error: 0.1,
            stopped_early: false,
        });
        assert_eq!(sink.events.len(), 2);
        assert!(matches!(sink.events[0], TrainEvent::Started { .. }));
        assert!(matches!(sink.events[1], TrainEvent::Finished { .. }));
    }

    #[test]
    fn test_null_sink_accepts_events() {
        let mut sink = NullSink;
        sink.emit(&TrainEvent::Finished {
            epochs: 1,
            best_error: 0.0,
            stopped_early: false,
        });
    }
}
