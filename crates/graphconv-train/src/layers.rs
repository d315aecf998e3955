//! Non-spectral building blocks: bias + ReLU, graph pooling, dense layers,
//! dropout and the softmax cross-entropy head.
//!
//! Every forward function returns whatever its backward counterpart needs;
//! nothing is stored on the layer itself, so one model can run any number of
//! read-only evaluations concurrently with its own training state.

use ndarray::{Array1, Array2, Array3, Axis};
use rand::Rng;

use crate::config::PoolKind;

// ---------------------------------------------------------------------------
// Bias + ReLU
// ---------------------------------------------------------------------------

/// `relu(x + bias)`. `bias` has one row (shared by all vertices) or one row
/// per vertex.
pub fn bias_relu(x: &Array3<f64>, bias: &Array2<f64>) -> Array3<f64> {
    let shared = bias.nrows() == 1;
    let mut out = x.clone();
    for mut sample in out.outer_iter_mut() {
        for (v, mut row) in sample.outer_iter_mut().enumerate() {
            let b = bias.row(if shared { 0 } else { v });
            row.zip_mut_with(&b, |y, &bv| *y = (*y + bv).max(0.0));
        }
    }
    out
}

/// Gradient of [`bias_relu`] given its output. Returns `(∂x, ∂bias)`.
pub fn bias_relu_backward(
    output: &Array3<f64>,
    grad: &Array3<f64>,
    bias_rows: usize,
) -> (Array3<f64>, Array2<f64>) {
    let n = grad.dim().1;
    let mut grad_x = grad.clone();
    grad_x.zip_mut_with(output, |g, &y| {
        if y <= 0.0 {
            *g = 0.0;
        }
    });
    let per_vertex = grad_x.sum_axis(Axis(0));
    let grad_b = if bias_rows == 1 {
        per_vertex.sum_axis(Axis(0)).insert_axis(Axis(0))
    } else {
        debug_assert_eq!(bias_rows, n);
        per_vertex
    };
    (grad_x, grad_b)
}

// ---------------------------------------------------------------------------
// Pooling
// ---------------------------------------------------------------------------

/// What [`pool`] remembers for [`pool_backward`].
#[derive(Debug, Clone)]
pub enum PoolCache {
    /// `p == 1`, nothing to undo.
    Identity,
    /// Winning vertex of every `(sample, window, feature)`.
    Max(Array3<usize>),
    /// Averaging needs only the factor.
    Average,
}

/// Pool windows of `p` consecutive vertices: `(batch, n, f)` → `(batch, n/p, f)`.
pub fn pool(x: &Array3<f64>, p: usize, kind: PoolKind) -> (Array3<f64>, PoolCache) {
    if p <= 1 {
        return (x.clone(), PoolCache::Identity);
    }
    let (batch, n, f) = x.dim();
    let m = n / p;
    match kind {
        PoolKind::Max => {
            let mut out = Array3::<f64>::zeros((batch, m, f));
            let mut arg = Array3::<usize>::zeros((batch, m, f));
            for b in 0..batch {
                for w in 0..m {
                    for i in 0..f {
                        let mut best = w * p;
                        for v in (w * p + 1)..(w * p + p) {
                            if x[[b, v, i]] > x[[b, best, i]] {
                                best = v;
                            }
                        }
                        out[[b, w, i]] = x[[b, best, i]];
                        arg[[b, w, i]] = best;
                    }
                }
            }
            (out, PoolCache::Max(arg))
        }
        PoolKind::Average => {
            let scale = 1.0 / p as f64;
            let out = Array3::from_shape_fn((batch, m, f), |(b, w, i)| {
                (w * p..w * p + p).map(|v| x[[b, v, i]]).sum::<f64>() * scale
            });
            (out, PoolCache::Average)
        }
    }
}

/// Route `grad` (`(batch, n/p, f)`) back to `(batch, n, f)`.
pub fn pool_backward(grad: &Array3<f64>, p: usize, n: usize, cache: &PoolCache) -> Array3<f64> {
    let (batch, m, f) = grad.dim();
    match cache {
        PoolCache::Identity => grad.clone(),
        PoolCache::Max(arg) => {
            let mut out = Array3::<f64>::zeros((batch, n, f));
            for ((b, w, i), &g) in grad.indexed_iter() {
                out[[b, arg[[b, w, i]], i]] += g;
            }
            out
        }
        PoolCache::Average => {
            let scale = 1.0 / p as f64;
            Array3::from_shape_fn((batch, n, f), |(b, v, i)| {
                let w = v / p;
                if w < m {
                    grad[[b, w, i]] * scale
                } else {
                    0.0
                }
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Flatten
// ---------------------------------------------------------------------------

/// `(batch, n, f)` → `(batch, n·f)`, vertex-major.
pub fn flatten(x: &Array3<f64>) -> Array2<f64> {
    let (batch, n, f) = x.dim();
    Array2::from_shape_fn((batch, n * f), |(b, c)| x[[b, c / f, c % f]])
}

/// Inverse of [`flatten`].
pub fn unflatten(x: &Array2<f64>, n: usize, f: usize) -> Array3<f64> {
    Array3::from_shape_fn((x.nrows(), n, f), |(b, v, i)| x[[b, v * f + i]])
}

// ---------------------------------------------------------------------------
// Dense
// ---------------------------------------------------------------------------

/// `x · W + b`.
pub fn dense(x: &Array2<f64>, weights: &Array2<f64>, bias: &Array1<f64>) -> Array2<f64> {
    let mut y = x.dot(weights);
    y += bias;
    y
}

/// Gradients of [`dense`]: `(∂x, ∂W, ∂b)`.
pub fn dense_backward(
    x: &Array2<f64>,
    weights: &Array2<f64>,
    grad: &Array2<f64>,
) -> (Array2<f64>, Array2<f64>, Array1<f64>) {
    (grad.dot(&weights.t()), x.t().dot(grad), grad.sum_axis(Axis(0)))
}

/// Inverted dropout mask: each entry is `1/keep` with probability `keep`,
/// otherwise `0`.
pub fn dropout_mask<R: Rng + ?Sized>(shape: (usize, usize), keep: f64, rng: &mut R) -> Array2<f64> {
    if keep >= 1.0 {
        return Array2::ones(shape);
    }
    let scale = 1.0 / keep;
    Array2::from_shape_simple_fn(shape, || if rng.gen::<f64>() < keep { scale } else { 0.0 })
}

// ---------------------------------------------------------------------------
// Softmax cross-entropy
// ---------------------------------------------------------------------------

/// Row-wise softmax.
pub fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut probs = logits.clone();
    for mut row in probs.outer_iter_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probs
}

/// Mean cross-entropy of `labels` under `softmax(logits)` and its gradient
/// with respect to the logits.
pub fn softmax_cross_entropy(logits: &Array2<f64>, labels: &[usize]) -> (f64, Array2<f64>) {
    let batch = logits.nrows();
    let mut grad = softmax(logits);
    let mut loss = 0.0;
    for (b, &label) in labels.iter().enumerate() {
        let row = logits.row(b);
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let log_sum = row.iter().map(|v| (v - max).exp()).sum::<f64>().ln() + max;
        loss += log_sum - row[label];
        grad[[b, label]] -= 1.0;
    }
    let scale = 1.0 / batch.max(1) as f64;
    grad.mapv_inplace(|g| g * scale);
    (loss * scale, grad)
}

/// Index of the largest entry of every row.
pub fn argmax_rows(x: &Array2<f64>) -> Vec<usize> {
    x.outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}
