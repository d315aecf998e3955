//! Spectral graph filters.
//!
//! A filter maps `fin` input feature maps to `fout` output maps over the
//! vertices of one coarsening level. Inputs and outputs are `(batch, n, f)`
//! tensors; weights are `(K, fin, fout)` for every family:
//!
//! | Family    | `K` indexes                   | Cost per application |
//! |-----------|-------------------------------|----------------------|
//! | Fourier   | the `K` lowest graph frequencies | `O(n²)`           |
//! | Spline    | B-spline control points       | `O(n²)`              |
//! | Chebyshev | polynomial terms `T_k(L̃)`     | `O(K·|E|)`           |
//!
//! Internally signals are laid out as `(n, batch·f)` matrices so a sparse
//! Laplacian product filters every sample and feature map at once.

use std::sync::Arc;

use graphconv_graph::LevelOperator;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use tracing::warn;

use crate::config::FilterKind;
use crate::error::{TrainError, TrainResult};

/// Values saved by [`GraphFilter::forward`] for the backward pass.
#[derive(Debug, Clone)]
pub enum FilterCache {
    /// `T_0 x … T_{K−1} x`, each `(n, batch·fin)`.
    Chebyshev {
        /// Recurrence terms.
        terms: Vec<Array2<f64>>,
    },
    /// Input projected on the retained eigenvectors.
    Spectral {
        /// `Uᵀ x`, shape `(K, batch·fin)`.
        projected: Array2<f64>,
        /// Per-frequency weights expanded from spline coefficients.
        expanded: Option<Array3<f64>>,
    },
}

/// A learnable spectral filter bound to one level of the hierarchy.
#[derive(Debug, Clone)]
pub enum GraphFilter {
    /// Independent coefficients on the `k` lowest frequencies.
    Fourier {
        /// Level operators.
        level: Arc<LevelOperator>,
        /// Retained frequencies.
        k: usize,
    },
    /// Frequency response interpolated by a B-spline with `k` control points.
    Spline {
        /// Level operators.
        level: Arc<LevelOperator>,
        /// Control points.
        k: usize,
        /// Spline basis evaluated at every eigenvalue, `(n, k)`.
        basis: Array2<f64>,
    },
    /// Order-`k` Chebyshev polynomial of the rescaled Laplacian.
    Chebyshev {
        /// Level operators.
        level: Arc<LevelOperator>,
        /// Polynomial terms.
        k: usize,
    },
}

impl GraphFilter {
    /// Build a filter of family `kind` and order `k` on `level`.
    ///
    /// Fourier and spline orders above the vertex count are clamped.
    pub fn new(kind: FilterKind, level: Arc<LevelOperator>, k: usize) -> Self {
        let n = level.n();
        match kind {
            FilterKind::Chebyshev => GraphFilter::Chebyshev { level, k },
            FilterKind::Fourier => {
                let k = clamp_order(k, n, kind);
                GraphFilter::Fourier { level, k }
            }
            FilterKind::Spline => {
                let k = clamp_order(k, n, kind);
                let basis = bspline_basis(k, level.basis().eigenvalues());
                GraphFilter::Spline { level, k, basis }
            }
        }
    }

    /// Filter family.
    pub fn kind(&self) -> FilterKind {
        match self {
            GraphFilter::Fourier { .. } => FilterKind::Fourier,
            GraphFilter::Spline { .. } => FilterKind::Spline,
            GraphFilter::Chebyshev { .. } => FilterKind::Chebyshev,
        }
    }

    /// Effective order: leading dimension of the weight tensor.
    pub fn order(&self) -> usize {
        match self {
            GraphFilter::Fourier { k, .. }
            | GraphFilter::Spline { k, .. }
            | GraphFilter::Chebyshev { k, .. } => *k,
        }
    }

    /// Vertices of the level this filter operates on.
    pub fn n_vertices(&self) -> usize {
        self.level().n()
    }

    fn level(&self) -> &LevelOperator {
        match self {
            GraphFilter::Fourier { level, .. }
            | GraphFilter::Spline { level, .. }
            | GraphFilter::Chebyshev { level, .. } => level.as_ref(),
        }
    }

    /// Apply the filter: `x` is `(batch, n, fin)`, `weights` is
    /// `(K, fin, fout)`, the result is `(batch, n, fout)`.
    pub fn forward(
        &self,
        x: &Array3<f64>,
        weights: &Array3<f64>,
    ) -> TrainResult<(Array3<f64>, FilterCache)> {
        let (batch, n, fin) = x.dim();
        self.check_shapes(n, fin, weights)?;
        let fout = weights.dim().2;

        match self {
            GraphFilter::Chebyshev { level, k } => {
                let op = level.rescaled();
                let mut terms: Vec<Array2<f64>> = Vec::with_capacity(*k);
                terms.push(to_signals(x));
                if *k > 1 {
                    let t1 = op.mul_dense(&terms[0].view())?;
                    terms.push(t1);
                }
                for j in 2..*k {
                    let next = 2.0 * op.mul_dense(&terms[j - 1].view())? - &terms[j - 2];
                    terms.push(next);
                }

                let mut y = Array2::<f64>::zeros((batch * n, fout));
                for (j, t) in terms.iter().enumerate() {
                    let rows = signals_to_rows(t, batch, fin);
                    y += &rows.dot(&weights.index_axis(Axis(0), j));
                }
                Ok((rows_to_batch(&y, batch, n), FilterCache::Chebyshev { terms }))
            }
            GraphFilter::Fourier { level, k } => {
                let u = level.basis().eigenvectors().slice(s![.., ..*k]);
                let (y, projected) = spectral_forward(u, x, weights);
                Ok((y, FilterCache::Spectral { projected, expanded: None }))
            }
            GraphFilter::Spline { level, basis, .. } => {
                let expanded = expand_spline(basis, weights);
                let u = level.basis().eigenvectors().view();
                let (y, projected) = spectral_forward(u, x, &expanded);
                Ok((y, FilterCache::Spectral { projected, expanded: Some(expanded) }))
            }
        }
    }

    /// Back-propagate `grad_y` (`(batch, n, fout)`) through the filter.
    ///
    /// Returns `(∂L/∂x, ∂L/∂weights)`.
    pub fn backward(
        &self,
        cache: &FilterCache,
        weights: &Array3<f64>,
        grad_y: &Array3<f64>,
    ) -> TrainResult<(Array3<f64>, Array3<f64>)> {
        let (batch, n, fout) = grad_y.dim();
        let (_, fin, w_fout) = weights.dim();
        if w_fout != fout || n != self.n_vertices() {
            return Err(TrainError::shape_mismatch(
                vec![batch, self.n_vertices(), w_fout],
                vec![batch, n, fout],
            ));
        }

        match (self, cache) {
            (GraphFilter::Chebyshev { level, .. }, FilterCache::Chebyshev { terms }) => {
                let g_rows = batch_to_rows(grad_y);
                let mut grad_w = Array3::<f64>::zeros(weights.raw_dim());
                let mut grad_terms: Vec<Array2<f64>> = Vec::with_capacity(terms.len());
                for (j, t) in terms.iter().enumerate() {
                    let t_rows = signals_to_rows(t, batch, fin);
                    grad_w.index_axis_mut(Axis(0), j).assign(&t_rows.t().dot(&g_rows));
                    let w_j = weights.index_axis(Axis(0), j);
                    grad_terms.push(rows_to_signals(&g_rows.dot(&w_j.t()), n));
                }
                let grad_x = clenshaw(level, &grad_terms)?;
                Ok((from_signals(&grad_x, batch, fin), grad_w))
            }
            (GraphFilter::Fourier { level, k }, FilterCache::Spectral { projected, .. }) => {
                let u = level.basis().eigenvectors().slice(s![.., ..*k]);
                Ok(spectral_backward(u, projected, weights, grad_y))
            }
            (
                GraphFilter::Spline { level, basis, .. },
                FilterCache::Spectral { projected, expanded: Some(expanded) },
            ) => {
                let u = level.basis().eigenvectors().view();
                let (grad_x, grad_full) = spectral_backward(u, projected, expanded, grad_y);
                Ok((grad_x, contract_spline(basis, &grad_full)))
            }
            _ => Err(TrainError::shape_mismatch(vec![self.order()], vec![0])),
        }
    }

    fn check_shapes(&self, n: usize, fin: usize, weights: &Array3<f64>) -> TrainResult<()> {
        if n != self.n_vertices() {
            return Err(TrainError::shape_mismatch(vec![self.n_vertices()], vec![n]));
        }
        let (k, w_fin, _) = weights.dim();
        if k != self.order() || w_fin != fin {
            return Err(TrainError::shape_mismatch(
                vec![self.order(), fin, weights.dim().2],
                vec![k, w_fin, weights.dim().2],
            ));
        }
        Ok(())
    }
}

fn clamp_order(k: usize, n: usize, kind: FilterKind) -> usize {
    if k > n {
        warn!(?kind, requested = k, vertices = n, "filter order exceeds vertex count, clamping");
        n
    } else {
        k
    }
}

// ---------------------------------------------------------------------------
// Spectral (Fourier / spline) kernels
// ---------------------------------------------------------------------------

/// `y = U · diag_k(W_k) · Uᵀ x` per sample; returns `(y, Uᵀx)`.
fn spectral_forward(
    u: ArrayView2<f64>,
    x: &Array3<f64>,
    weights: &Array3<f64>,
) -> (Array3<f64>, Array2<f64>) {
    let (batch, _, fin) = x.dim();
    let (k, _, fout) = weights.dim();

    let projected = u.t().dot(&to_signals(x));
    let mut filtered = Array2::<f64>::zeros((k, batch * fout));
    for j in 0..k {
        let xj = coefficient_block(&projected, j, batch, fin);
        let yj = xj.dot(&weights.index_axis(Axis(0), j));
        filtered.row_mut(j).assign(&Array1::from_iter(yj.iter().copied()));
    }
    let y = u.dot(&filtered);
    (from_signals(&y, batch, fout), projected)
}

fn spectral_backward(
    u: ArrayView2<f64>,
    projected: &Array2<f64>,
    weights: &Array3<f64>,
    grad_y: &Array3<f64>,
) -> (Array3<f64>, Array3<f64>) {
    let (batch, _, fout) = grad_y.dim();
    let (k, fin, _) = weights.dim();

    let grad_hat = u.t().dot(&to_signals(grad_y));
    let mut grad_w = Array3::<f64>::zeros(weights.raw_dim());
    let mut grad_proj = Array2::<f64>::zeros((k, batch * fin));
    for j in 0..k {
        let xj = coefficient_block(projected, j, batch, fin);
        let gj = coefficient_block(&grad_hat, j, batch, fout);
        grad_w.index_axis_mut(Axis(0), j).assign(&xj.t().dot(&gj));
        let dxj = gj.dot(&weights.index_axis(Axis(0), j).t());
        grad_proj.row_mut(j).assign(&Array1::from_iter(dxj.iter().copied()));
    }
    let grad_x = u.dot(&grad_proj);
    (from_signals(&grad_x, batch, fin), grad_w)
}

/// Per-frequency weights `W[λ] = Σ_c B[λ, c] C[c]`, shape `(n, fin, fout)`.
fn expand_spline(basis: &Array2<f64>, coeffs: &Array3<f64>) -> Array3<f64> {
    let (k, fin, fout) = coeffs.dim();
    let flat = Array2::from_shape_fn((k, fin * fout), |(c, m)| coeffs[[c, m / fout, m % fout]]);
    let full = basis.dot(&flat);
    Array3::from_shape_fn((basis.nrows(), fin, fout), |(l, i, o)| full[[l, i * fout + o]])
}

/// Adjoint of [`expand_spline`]: `∂C[c] = Σ_λ B[λ, c] ∂W[λ]`.
fn contract_spline(basis: &Array2<f64>, grad_full: &Array3<f64>) -> Array3<f64> {
    let (n, fin, fout) = grad_full.dim();
    let flat = Array2::from_shape_fn((n, fin * fout), |(l, m)| grad_full[[l, m / fout, m % fout]]);
    let coeffs = basis.t().dot(&flat);
    Array3::from_shape_fn((basis.ncols(), fin, fout), |(c, i, o)| coeffs[[c, i * fout + o]])
}

/// Clamped uniform B-spline basis evaluated at `x` (ascending).
///
/// Degree is `min(3, k − 1)`. Returns an `(len(x), k)` matrix whose rows sum
/// to one. A degenerate range (all `x` equal) yields a constant first column.
pub fn bspline_basis(k: usize, x: &Array1<f64>) -> Array2<f64> {
    let n = x.len();
    let mut basis = Array2::<f64>::zeros((n, k));
    if n == 0 || k == 0 {
        return basis;
    }
    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi - lo < 1e-12 {
        basis.column_mut(0).fill(1.0);
        return basis;
    }

    let degree = 3.min(k - 1);
    let inner = k - degree + 1;
    let mut knots = vec![lo; degree];
    knots.extend((0..inner).map(|j| lo + (hi - lo) * j as f64 / (inner - 1) as f64));
    knots.extend(std::iter::repeat(hi).take(degree));

    for (r, &xv) in x.iter().enumerate() {
        for c in 0..k {
            basis[[r, c]] = cox_de_boor(&knots, c, degree, xv);
        }
    }
    // Intervals are half-open, so the right end needs its last function set.
    let last = x.iter().enumerate().fold(0, |best, (i, &v)| if v >= x[best] { i } else { best });
    basis.row_mut(last).fill(0.0);
    basis[[last, k - 1]] = 1.0;
    basis
}

fn cox_de_boor(knots: &[f64], i: usize, d: usize, x: f64) -> f64 {
    if d == 0 {
        return if knots[i] <= x && x < knots[i + 1] { 1.0 } else { 0.0 };
    }
    let mut value = 0.0;
    let left = knots[i + d] - knots[i];
    if left > 0.0 {
        value += (x - knots[i]) / left * cox_de_boor(knots, i, d - 1, x);
    }
    let right = knots[i + d + 1] - knots[i + 1];
    if right > 0.0 {
        value += (knots[i + d + 1] - x) / right * cox_de_boor(knots, i + 1, d - 1, x);
    }
    value
}

// ---------------------------------------------------------------------------
// Chebyshev adjoint
// ---------------------------------------------------------------------------

/// `Σ_k T_k(L̃) g_k` by the reverse recurrence
/// `b_k = g_k + 2L̃ b_{k+1} − b_{k+2}`, `S = g_0 + L̃ b_1 − b_2`.
fn clenshaw(level: &LevelOperator, grads: &[Array2<f64>]) -> TrainResult<Array2<f64>> {
    let op = level.rescaled();
    let shape = grads[0].raw_dim();
    let mut b1 = Array2::<f64>::zeros(shape.clone());
    let mut b2 = Array2::<f64>::zeros(shape);
    for g in grads.iter().skip(1).rev() {
        let b0 = g + &(2.0 * op.mul_dense(&b1.view())?) - &b2;
        b2 = b1;
        b1 = b0;
    }
    Ok(&grads[0] + &op.mul_dense(&b1.view())? - &b2)
}

// ---------------------------------------------------------------------------
// Layout helpers
// ---------------------------------------------------------------------------

/// `(batch, n, f)` → `(n, batch·f)`; column `b·f + i` is map `i` of sample `b`.
pub(crate) fn to_signals(x: &Array3<f64>) -> Array2<f64> {
    let (batch, n, f) = x.dim();
    Array2::from_shape_fn((n, batch * f), |(v, c)| x[[c / f, v, c % f]])
}

/// Inverse of [`to_signals`].
pub(crate) fn from_signals(s: &Array2<f64>, batch: usize, f: usize) -> Array3<f64> {
    Array3::from_shape_fn((batch, s.nrows(), f), |(b, v, i)| s[[v, b * f + i]])
}

/// `(n, batch·f)` → `(batch·n, f)`, row `b·n + v`.
fn signals_to_rows(s: &Array2<f64>, batch: usize, f: usize) -> Array2<f64> {
    let n = s.nrows();
    Array2::from_shape_fn((batch * n, f), |(r, i)| s[[r % n, (r / n) * f + i]])
}

/// `(batch·n, f)` → `(n, batch·f)`.
fn rows_to_signals(rows: &Array2<f64>, n: usize) -> Array2<f64> {
    let (bn, f) = rows.dim();
    let batch = bn / n;
    Array2::from_shape_fn((n, batch * f), |(v, c)| rows[[(c / f) * n + v, c % f]])
}

fn batch_to_rows(x: &Array3<f64>) -> Array2<f64> {
    let (batch, n, f) = x.dim();
    Array2::from_shape_fn((batch * n, f), |(r, i)| x[[r / n, r % n, i]])
}

fn rows_to_batch(rows: &Array2<f64>, batch: usize, n: usize) -> Array3<f64> {
    Array3::from_shape_fn((batch, n, rows.ncols()), |(b, v, o)| rows[[b * n + v, o]])
}

/// Row `j` of `(K, batch·f)` as a `(batch, f)` block.
fn coefficient_block(s: &Array2<f64>, j: usize, batch: usize, f: usize) -> Array2<f64> {
    Array2::from_shape_fn((batch, f), |(b, i)| s[[j, b * f + i]])
}
