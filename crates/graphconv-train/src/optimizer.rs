//! Momentum gradient descent and the staircase learning-rate schedule.

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::error::{TrainError, TrainResult};
use crate::params::Parameters;

/// Gradient descent with momentum.
///
/// `v ← μv + g; θ ← θ − ηv`. With `μ = 0` this is plain gradient descent.
#[derive(Debug, Clone)]
pub struct MomentumOptimizer {
    momentum: f64,
    velocity: Option<Parameters>,
}

impl MomentumOptimizer {
    /// Create an optimizer with momentum `μ`.
    pub fn new(momentum: f64) -> Self {
        Self { momentum, velocity: None }
    }

    /// Momentum coefficient.
    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    /// Apply one update with learning rate `lr`.
    pub fn step(&mut self, params: &mut Parameters, grads: &Parameters, lr: f64) -> TrainResult<()> {
        let shapes = |p: &Parameters| p.tensors().iter().map(|(t, _)| t.shape().to_vec()).collect::<Vec<_>>();
        let expected = shapes(params);
        let actual = shapes(grads);
        if expected != actual {
            return Err(TrainError::shape_mismatch(
                expected.iter().map(Vec::len).collect(),
                actual.iter().map(Vec::len).collect(),
            ));
        }

        let mu = self.momentum;
        let velocity = self.velocity.get_or_insert_with(|| params.zeros_like());
        for (((mut p, _), (mut v, _)), (g, _)) in params
            .tensors_mut()
            .into_iter()
            .zip(velocity.tensors_mut())
            .zip(grads.tensors())
        {
            Zip::from(&mut p).and(&mut v).and(&g).for_each(|p, v, &g| {
                *v = mu * *v + g;
                *p -= lr * *v;
            });
        }
        Ok(())
    }

    /// Forget the accumulated velocity.
    pub fn reset(&mut self) {
        self.velocity = None;
    }
}

/// Staircase exponential decay:
/// `η = η₀ · rate^⌊consumed_samples / period⌋`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialDecay {
    initial: f64,
    rate: f64,
    period: usize,
}

impl ExponentialDecay {
    /// `period` is the number of consumed samples between decays (clamped to 1).
    pub fn new(initial: f64, rate: f64, period: usize) -> Self {
        Self { initial, rate, period: period.max(1) }
    }

    /// Learning rate after `consumed_samples` training samples.
    pub fn learning_rate(&self, consumed_samples: usize) -> f64 {
        let decays = (consumed_samples / self.period) as i32;
        self.initial * self.rate.powi(decays)
    }

    /// Initial learning rate.
    pub fn initial(&self) -> f64 {
        self.initial
    }
}
