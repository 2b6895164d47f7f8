//! Learning rules and their dispatcher
//!
//! [`build_rule`] maps a learning-rule name and its hyperparameters onto a
//! boxed [`UpdateRule`]. Rules keep per-parameter state (velocities,
//! accumulators, moments) in lazily allocated slots, one per parameter
//! tensor, indexed by the caller.

use ndarray::Array1;

use crate::error::{Error, Result};

/// A parameter-update rule
///
/// `update` performs one optimizer step on a single flat parameter slice.
/// `slot` identifies the parameter tensor so the rule can keep per-tensor
/// state across calls; the same slot must always carry the same length.
pub trait UpdateRule: std::fmt::Debug {
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]);

    fn learning_rate(&self) -> f32;
}

/// Build the update rule for a learning-rule name
///
/// `sgd`, `adagrad`, `adadelta`, `rmsprop` and `adam` use only the learning
/// rate; `momentum` and `nesterov` additionally require `momentum`. Any
/// other name fails with [`Error::UnsupportedOptimizer`].
pub fn build_rule(
    rule: &str,
    learning_rate: f32,
    momentum: Option<f32>,
) -> Result<Box<dyn UpdateRule>> {
    match rule {
        "sgd" => Ok(Box::new(Sgd { lr: learning_rate })),
        "adagrad" => Ok(Box::new(Adagrad::new(learning_rate))),
        "adadelta" => Ok(Box::new(Adadelta::new(learning_rate))),
        "rmsprop" => Ok(Box::new(RmsProp::new(learning_rate))),
        "adam" => Ok(Box::new(Adam::new(learning_rate))),
        "momentum" | "nesterov" => {
            let momentum = momentum.ok_or_else(|| {
                Error::config(
                    "learning_momentum",
                    format!("momentum required for the `{rule}` learning rule"),
                )
            })?;
            Ok(Box::new(Momentum {
                lr: learning_rate,
                momentum,
                nesterov: rule == "nesterov",
                velocities: SlotState::default(),
            }))
        }
        other => Err(Error::UnsupportedOptimizer(other.to_string())),
    }
}

/// Lazily allocated per-slot state buffers
#[derive(Debug, Default)]
struct SlotState {
    buffers: Vec<Option<Array1<f32>>>,
}

impl SlotState {
    /// Get the buffer for `slot`, zero-initialized on first use
    fn get(&mut self, slot: usize, len: usize) -> &mut Array1<f32> {
        if slot >= self.buffers.len() {
            self.buffers.resize(slot + 1, None);
        }
        self.buffers[slot].get_or_insert_with(|| Array1::zeros(len))
    }
}

/// Plain stochastic gradient descent
#[derive(Debug)]
struct Sgd {
    lr: f32,
}

impl UpdateRule for Sgd {
    fn update(&mut self, _slot: usize, param: &mut [f32], grad: &[f32]) {
        for (p, g) in param.iter_mut().zip(grad) {
            *p -= self.lr * g;
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Classical and Nesterov momentum
#[derive(Debug)]
struct Momentum {
    lr: f32,
    momentum: f32,
    nesterov: bool,
    velocities: SlotState,
}

impl UpdateRule for Momentum {
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]) {
        let v = self.velocities.get(slot, param.len());
        let v = v.as_slice_mut().expect("state buffer is contiguous");
        for ((p, g), v) in param.iter_mut().zip(grad).zip(v.iter_mut()) {
            *v = self.momentum * *v - self.lr * g;
            if self.nesterov {
                *p += self.momentum * *v - self.lr * g;
            } else {
                *p += *v;
            }
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Adagrad: per-weight rates shrinking with accumulated squared gradients
#[derive(Debug)]
struct Adagrad {
    lr: f32,
    epsilon: f32,
    accum: SlotState,
}

impl Adagrad {
    fn new(lr: f32) -> Self {
        Self {
            lr,
            epsilon: 1e-6,
            accum: SlotState::default(),
        }
    }
}

impl UpdateRule for Adagrad {
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]) {
        let acc = self.accum.get(slot, param.len());
        let acc = acc.as_slice_mut().expect("state buffer is contiguous");
        for ((p, g), a) in param.iter_mut().zip(grad).zip(acc.iter_mut()) {
            *a += g * g;
            *p -= self.lr * g / (a.sqrt() + self.epsilon);
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Adadelta with the conventional ρ = 0.95
#[derive(Debug)]
struct Adadelta {
    lr: f32,
    rho: f32,
    epsilon: f32,
    accum: SlotState,
    delta_accum: SlotState,
}

impl Adadelta {
    fn new(lr: f32) -> Self {
        Self {
            lr,
            rho: 0.95,
            epsilon: 1e-6,
            accum: SlotState::default(),
            delta_accum: SlotState::default(),
        }
    }
}

impl UpdateRule for Adadelta {
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]) {
        let acc = self.accum.get(slot, param.len());
        let acc = acc.as_slice_mut().expect("state buffer is contiguous");
        let dacc = self.delta_accum.get(slot, param.len());
        let dacc = dacc.as_slice_mut().expect("state buffer is contiguous");
        for (((p, g), a), d) in param.iter_mut().zip(grad).zip(acc.iter_mut()).zip(dacc.iter_mut())
        {
            *a = self.rho * *a + (1.0 - self.rho) * g * g;
            let step = g * ((*d + self.epsilon).sqrt() / (*a + self.epsilon).sqrt());
            *p -= self.lr * step;
            *d = self.rho * *d + (1.0 - self.rho) * step * step;
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// RMSprop with the conventional ρ = 0.9
#[derive(Debug)]
struct RmsProp {
    lr: f32,
    rho: f32,
    epsilon: f32,
    accum: SlotState,
}

impl RmsProp {
    fn new(lr: f32) -> Self {
        Self {
            lr,
            rho: 0.9,
            epsilon: 1e-6,
            accum: SlotState::default(),
        }
    }
}

impl UpdateRule for RmsProp {
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]) {
        let acc = self.accum.get(slot, param.len());
        let acc = acc.as_slice_mut().expect("state buffer is contiguous");
        for ((p, g), a) in param.iter_mut().zip(grad).zip(acc.iter_mut()) {
            *a = self.rho * *a + (1.0 - self.rho) * g * g;
            *p -= self.lr * g / (a.sqrt() + self.epsilon);
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Adam with β₁ = 0.9, β₂ = 0.999
#[derive(Debug)]
struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    m: SlotState,
    v: SlotState,
    /// Per-slot step counters for bias correction
    t: Vec<u64>,
}

impl Adam {
    fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            m: SlotState::default(),
            v: SlotState::default(),
            t: Vec::new(),
        }
    }
}

impl UpdateRule for Adam {
    fn update(&mut self, slot: usize, param: &mut [f32], grad: &[f32]) {
        if slot >= self.t.len() {
            self.t.resize(slot + 1, 0);
        }
        self.t[slot] += 1;
        let t = self.t[slot] as i32;
        let lr_t = self.lr * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));

        let m = self.m.get(slot, param.len());
        let m = m.as_slice_mut().expect("state buffer is contiguous");
        let v = self.v.get(slot, param.len());
        let v = v.as_slice_mut().expect("state buffer is contiguous");
        for (((p, g), m), v) in param.iter_mut().zip(grad).zip(m.iter_mut()).zip(v.iter_mut()) {
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + self.epsilon);
        }
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dispatch_known_rules() {
        for rule in ["sgd", "adagrad", "adadelta", "rmsprop", "adam"] {
            let built = build_rule(rule, 0.01, None);
            assert!(built.is_ok(), "{rule} should build without momentum");
            assert_abs_diff_eq!(built.unwrap().learning_rate(), 0.01);
        }
        for rule in ["momentum", "nesterov"] {
            assert!(build_rule(rule, 0.01, Some(0.9)).is_ok());
        }
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let err = build_rule("lbfgs", 0.01, None).unwrap_err();
        match err {
            Error::UnsupportedOptimizer(name) => assert_eq!(name, "lbfgs"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_momentum_requires_momentum() {
        for rule in ["momentum", "nesterov"] {
            let err = build_rule(rule, 0.01, None).unwrap_err();
            assert!(
                format!("{err}").contains("momentum required"),
                "{rule} must demand momentum"
            );
        }
    }

    #[test]
    fn test_sgd_step() {
        let mut rule = build_rule("sgd", 0.1, None).unwrap();
        let mut param = [1.0, 2.0, 3.0];
        rule.update(0, &mut param, &[0.5, 1.0, 1.5]);
        assert_abs_diff_eq!(param[0], 0.95, epsilon = 1e-6);
        assert_abs_diff_eq!(param[1], 1.9, epsilon = 1e-6);
        assert_abs_diff_eq!(param[2], 2.85, epsilon = 1e-6);
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let mut rule = build_rule("momentum", 0.1, Some(0.9)).unwrap();
        let mut param = [0.0_f32];
        // First step: v = -0.1, p = -0.1
        rule.update(0, &mut param, &[1.0]);
        assert_abs_diff_eq!(param[0], -0.1, epsilon = 1e-6);
        // Second step: v = 0.9 * -0.1 - 0.1 = -0.19, p = -0.29
        rule.update(0, &mut param, &[1.0]);
        assert_abs_diff_eq!(param[0], -0.29, epsilon = 1e-6);
    }

    #[test]
    fn test_nesterov_differs_from_momentum() {
        let mut classic = build_rule("momentum", 0.1, Some(0.9)).unwrap();
        let mut nesterov = build_rule("nesterov", 0.1, Some(0.9)).unwrap();
        let mut p1 = [0.0_f32];
        let mut p2 = [0.0_f32];
        classic.update(0, &mut p1, &[1.0]);
        nesterov.update(0, &mut p2, &[1.0]);
        // Nesterov applies the look-ahead correction on the very first step
        assert_abs_diff_eq!(p2[0], -0.19, epsilon = 1e-6);
        assert!(p2[0] < p1[0]);
    }

    #[test]
    fn test_slots_keep_independent_state() {
        let mut rule = build_rule("adagrad", 0.1, None).unwrap();
        let mut a = [1.0_f32];
        let mut b = [1.0_f32];
        rule.update(0, &mut a, &[1.0]);
        rule.update(1, &mut b, &[1.0]);
        // Identical first steps because the accumulators are per slot
        assert_abs_diff_eq!(a[0], b[0], epsilon = 1e-9);
    }

    #[test]
    fn test_adaptive_rules_descend_a_quadratic() {
        // Minimize f(x) = x² from x = 1; every rule must make progress
        for rule_name in ["sgd", "adagrad", "adadelta", "rmsprop", "adam"] {
            let mut rule = build_rule(rule_name, 0.1, None).unwrap();
            let mut param = [1.0_f32];
            for _ in 0..100 {
                let grad = [2.0 * param[0]];
                rule.update(0, &mut param, &grad);
            }
            assert!(
                param[0].abs() < 1.0,
                "{rule_name} failed to reduce |x| (got {})",
                param[0]
            );
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn sgd_moves_against_the_gradient(p in -10.0f32..10.0, g in 0.01f32..10.0) {
                let mut rule = build_rule("sgd", 0.1, None).unwrap();
                let mut param = [p];
                rule.update(0, &mut param, &[g]);
                prop_assert!(param[0] < p);
            }

            #[test]
            fn zero_gradient_leaves_sgd_params_alone(p in -10.0f32..10.0) {
                let mut rule = build_rule("sgd", 0.1, None).unwrap();
                let mut param = [p];
                rule.update(0, &mut param, &[0.0]);
                prop_assert_eq!(param[0], p);
            }
        }
    }

    #[test]
    fn test_adam_bias_correction_first_step() {
        let mut rule = build_rule("adam", 0.001, None).unwrap();
        let mut param = [0.0_f32];
        rule.update(0, &mut param, &[10.0]);
        // With bias correction the first step has magnitude ≈ lr
        assert_abs_diff_eq!(param[0], -0.001, epsilon = 1e-5);
    }
}
