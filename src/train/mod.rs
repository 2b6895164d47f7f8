//! Training machinery
//!
//! [`Step`] performs one gradient update on a mini-batch; [`TrainingLoop`]
//! drives epochs of shuffled batches over a [`Step`] and applies the
//! stopping policies. Progress is reported through the [`EventSink`]
//! injected by the caller.

mod driver;
mod events;

pub use driver::{TrainReport, TrainingLoop};
pub use events::{CollectSink, EventSink, LogSink, NullSink, TrainEvent};

use ndarray::ArrayView2;
use rand::rngs::StdRng;

use crate::cost::{self, CostConfig};
use crate::graph::Graph;
use crate::optim::UpdateRule;

/// One mini-batch gradient step
///
/// Owns the update rule (and with it the optimizer state) and the composed
/// cost configuration. The graph stays outside so the caller keeps control
/// of its lifecycle.
#[derive(Debug)]
pub struct Step {
    rule: Box<dyn UpdateRule>,
    cost: CostConfig,
}

impl Step {
    pub fn new(rule: Box<dyn UpdateRule>, cost: CostConfig) -> Self {
        Self { rule, cost }
    }

    /// Forward, cost, backward, decay gradients, parameter update
    ///
    /// Returns the batch cost, penalty term included, measured before the
    /// update is applied.
    pub fn run(
        &mut self,
        graph: &mut Graph,
        xb: ArrayView2<f32>,
        yb: ArrayView2<f32>,
        rng: &mut StdRng,
    ) -> f32 {
        let out = graph.forward_train(xb, rng);
        let loss = cost::mse(&out.view(), &yb) + self.cost.penalty_value(graph);

        let grad = cost::mse_grad(&out.view(), &yb);
        graph.backward(grad);
        self.cost.accumulate_decay_grads(graph);
        graph.apply_updates(self.rule.as_mut());
        loss
    }
}
