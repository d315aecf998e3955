//! Trainable parameters of a [`SpectralConvModel`](crate::model::SpectralConvModel).

use ndarray::{Array1, Array2, Array3, ArrayViewD, ArrayViewMutD};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Standard deviation of the weight initialisation.
pub const INIT_STD: f64 = 0.1;

/// Initial value of every bias.
pub const INIT_BIAS: f64 = 0.1;

/// One graph convolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvParams {
    /// Filter coefficients `(K, fin, fout)`.
    pub weights: Array3<f64>,
    /// `(1, fout)` for `b1relu`, `(n, fout)` for `b2relu`.
    pub bias: Array2<f64>,
}

/// One fully-connected layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseParams {
    /// `(in, out)`.
    pub weights: Array2<f64>,
    /// `(out)`.
    pub bias: Array1<f64>,
}

/// All parameters, convolutions first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Convolution layers.
    pub conv: Vec<ConvParams>,
    /// Dense layers, output layer last.
    pub dense: Vec<DenseParams>,
}

impl Parameters {
    /// Same shapes, all zeros.
    pub fn zeros_like(&self) -> Self {
        Parameters {
            conv: self
                .conv
                .iter()
                .map(|c| ConvParams {
                    weights: Array3::zeros(c.weights.raw_dim()),
                    bias: Array2::zeros(c.bias.raw_dim()),
                })
                .collect(),
            dense: self
                .dense
                .iter()
                .map(|d| DenseParams {
                    weights: Array2::zeros(d.weights.raw_dim()),
                    bias: Array1::zeros(d.bias.raw_dim()),
                })
                .collect(),
        }
    }

    /// Every tensor in a fixed order, flagged `true` for weights (which are
    /// regularized) and `false` for biases.
    pub fn tensors(&self) -> Vec<(ArrayViewD<'_, f64>, bool)> {
        let mut out = Vec::with_capacity(2 * (self.conv.len() + self.dense.len()));
        for c in &self.conv {
            out.push((c.weights.view().into_dyn(), true));
            out.push((c.bias.view().into_dyn(), false));
        }
        for d in &self.dense {
            out.push((d.weights.view().into_dyn(), true));
            out.push((d.bias.view().into_dyn(), false));
        }
        out
    }

    /// Mutable counterpart of [`tensors`](Self::tensors), same order.
    pub fn tensors_mut(&mut self) -> Vec<(ArrayViewMutD<'_, f64>, bool)> {
        let mut out = Vec::with_capacity(2 * (self.conv.len() + self.dense.len()));
        for c in &mut self.conv {
            out.push((c.weights.view_mut().into_dyn(), true));
            out.push((c.bias.view_mut().into_dyn(), false));
        }
        for d in &mut self.dense {
            out.push((d.weights.view_mut().into_dyn(), true));
            out.push((d.bias.view_mut().into_dyn(), false));
        }
        out
    }

    /// `Σ ½‖W‖²` over weights (biases excluded).
    pub fn l2_penalty(&self) -> f64 {
        self.tensors()
            .into_iter()
            .filter(|(_, regularized)| *regularized)
            .map(|(t, _)| 0.5 * t.iter().map(|w| w * w).sum::<f64>())
            .sum()
    }

    /// Add `scale · W` to every weight gradient in `self`, biases untouched.
    pub(crate) fn add_weight_decay(&mut self, params: &Parameters, scale: f64) {
        for (g, p) in self.conv.iter_mut().zip(&params.conv) {
            g.weights.scaled_add(scale, &p.weights);
        }
        for (g, p) in self.dense.iter_mut().zip(&params.dense) {
            g.weights.scaled_add(scale, &p.weights);
        }
    }

    /// Total number of scalars.
    pub fn n_parameters(&self) -> usize {
        self.tensors().iter().map(|(t, _)| t.len()).sum()
    }

    /// True when no entry is NaN or infinite.
    pub fn all_finite(&self) -> bool {
        self.tensors().iter().all(|(t, _)| t.iter().all(|v| v.is_finite()))
    }
}

/// Weights from `N(0, INIT_STD)` truncated at two standard deviations
/// (values outside are re-drawn).
pub(crate) fn truncated_normal<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<f64> {
    // Mean and std are constants, construction cannot fail.
    let normal = match Normal::new(0.0, INIT_STD) {
        Ok(n) => n,
        Err(_) => return vec![0.0; len],
    };
    (0..len)
        .map(|_| loop {
            let v: f64 = normal.sample(rng);
            if v.abs() <= 2.0 * INIT_STD {
                break v;
            }
        })
        .collect()
}
