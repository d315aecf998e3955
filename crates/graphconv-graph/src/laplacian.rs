//! Graph Laplacians.
//!
//! | Variant        | Formula                 | Eigenvalue range |
//! |----------------|-------------------------|------------------|
//! | Combinatorial  | `L = D − A`             | `[0, 2 d_max]`   |
//! | Normalized     | `L = I − D^{−½} A D^{−½}` | `[0, 2]`       |
//!
//! For the normalized variant `D^{−½}_{ii} = 0` when vertex `i` is isolated,
//! so its row of `L` is the identity row.
//!
//! Chebyshev filtering needs the spectrum mapped into `[−1, 1]`:
//!
//! ```text
//! L̃ = 2L / λ_max − I
//! ```
//!
//! The normalized Laplacian uses the analytic bound `λ_max = 2`; the
//! combinatorial Laplacian uses a power-iteration estimate.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GraphResult;
use crate::graph::{Graph, SYMMETRY_TOLERANCE};
use crate::sparse::SparseMatrix;

/// Upper bound on the spectrum of a normalized Laplacian.
pub const NORMALIZED_LAMBDA_MAX: f64 = 2.0;

/// Cap on power-iteration steps when estimating `λ_max` of a combinatorial Laplacian.
const POWER_ITERATIONS: usize = 1000;

/// Relative change in the Rayleigh quotient at which power iteration stops.
const POWER_TOLERANCE: f64 = 1e-10;

/// Power iteration approaches `λ_max` from below; the estimate is inflated by
/// this factor so the rescaled spectrum stays inside `[-1, 1]`.
pub const LAMBDA_MAX_MARGIN: f64 = 1.01;

/// Which Laplacian to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LaplacianKind {
    /// `L = I − D^{−½} A D^{−½}`
    #[default]
    Normalized,
    /// `L = D − A`
    Combinatorial,
}

impl LaplacianKind {
    /// `Normalized` when `normalized` is true, `Combinatorial` otherwise.
    pub fn from_flag(normalized: bool) -> Self {
        if normalized {
            LaplacianKind::Normalized
        } else {
            LaplacianKind::Combinatorial
        }
    }
}

/// Build the Laplacian of `graph`.
///
/// # Errors
///
/// [`GraphError::Configuration`](crate::GraphError::Configuration) when the
/// graph is empty, has negative weights, or is asymmetric beyond tolerance.
pub fn laplacian(graph: &Graph, normalized: bool) -> GraphResult<SparseMatrix> {
    Laplacian::from_graph(graph, LaplacianKind::from_flag(normalized)).map(|l| l.matrix)
}

/// A Laplacian together with the spectral bound used for rescaling.
#[derive(Debug, Clone)]
pub struct Laplacian {
    matrix: SparseMatrix,
    kind: LaplacianKind,
    lambda_max: f64,
}

impl Laplacian {
    /// Build the Laplacian of `graph`.
    pub fn from_graph(graph: &Graph, kind: LaplacianKind) -> GraphResult<Self> {
        graph.validate()?;
        let adj = graph.adjacency();
        let n = graph.n_vertices();
        let degree = adj.row_sums();

        let mut triplets: Vec<(usize, usize, f64)> = Vec::with_capacity(adj.nnz() + n);
        match kind {
            LaplacianKind::Combinatorial => {
                for (i, &d) in degree.iter().enumerate() {
                    triplets.push((i, i, d));
                }
                triplets.extend(adj.triplets().map(|(r, c, w)| (r, c, -w)));
            }
            LaplacianKind::Normalized => {
                let inv_sqrt: Vec<f64> = degree
                    .iter()
                    .map(|&d| if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 })
                    .collect();
                triplets.extend((0..n).map(|i| (i, i, 1.0)));
                triplets.extend(
                    adj.triplets().map(|(r, c, w)| (r, c, -w * inv_sqrt[r] * inv_sqrt[c])),
                );
            }
        }
        let mut matrix = SparseMatrix::from_triplets(n, triplets)?;

        let asym = matrix.max_asymmetry();
        if asym > 0.0 {
            debug!(asym, "symmetrizing Laplacian");
            matrix = matrix.symmetrized();
        }
        debug_assert!(matrix.max_asymmetry() <= SYMMETRY_TOLERANCE * matrix.max_abs().max(1.0));

        let lambda_max = match kind {
            LaplacianKind::Normalized => NORMALIZED_LAMBDA_MAX,
            LaplacianKind::Combinatorial => estimate_lambda_max(&matrix, POWER_ITERATIONS),
        };

        Ok(Self { matrix, kind, lambda_max })
    }

    /// The Laplacian matrix.
    #[inline]
    pub fn matrix(&self) -> &SparseMatrix {
        &self.matrix
    }

    /// Laplacian variant.
    #[inline]
    pub fn kind(&self) -> LaplacianKind {
        self.kind
    }

    /// Upper bound on the spectrum used for rescaling.
    #[inline]
    pub fn lambda_max(&self) -> f64 {
        self.lambda_max
    }

    /// Number of vertices.
    #[inline]
    pub fn n(&self) -> usize {
        self.matrix.n()
    }

    /// `L̃ = 2L/λ_max − I`, eigenvalues in `[−1, 1]`.
    pub fn rescaled(&self) -> SparseMatrix {
        let scale = 2.0 / self.lambda_max;
        let n = self.n();
        let triplets = self
            .matrix
            .triplets()
            .map(|(r, c, v)| (r, c, scale * v))
            .chain((0..n).map(|i| (i, i, -1.0)))
            .collect::<Vec<_>>();
        SparseMatrix::from_triplets(n, triplets).unwrap_or_else(|_| SparseMatrix::identity(n))
    }
}

/// Estimate the largest eigenvalue of a symmetric PSD matrix by power
/// iteration.
///
/// Iterates until the Rayleigh quotient changes by less than a relative
/// tolerance or `max_iters` steps have run. The returned bound is the final
/// quotient times [`LAMBDA_MAX_MARGIN`], so it never sits below the true
/// `λ_max` once iteration has converged.
pub fn estimate_lambda_max(matrix: &SparseMatrix, max_iters: usize) -> f64 {
    let n = matrix.n();
    if n == 0 {
        return 1.0;
    }
    // A non-uniform start avoids stalling on the constant null vector.
    let mut x: Vec<f64> = (0..n).map(|i| 1.0 + (i as f64 * 0.618_033_988_7).fract()).collect();
    let norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
    x.iter_mut().for_each(|v| *v /= norm);

    let mut lambda = 0.0_f64;
    let mut steps = 0;
    for _ in 0..max_iters {
        steps += 1;
        let y: Vec<f64> = (0..n).map(|i| matrix.row(i).map(|(j, v)| v * x[j]).sum()).collect();
        let next = x.iter().zip(&y).map(|(a, b)| a * b).sum::<f64>();
        let norm = y.iter().map(|v| v * v).sum::<f64>().sqrt();
        let converged = (next - lambda).abs() <= POWER_TOLERANCE * next.abs().max(1e-12);
        lambda = next;
        if norm < 1e-15 || converged {
            break;
        }
        x = y.into_iter().map(|v| v / norm).collect();
    }
    debug!(lambda, steps, "power iteration finished");

    if lambda.abs() < 1e-12 {
        // Edgeless graph: L = 0, any positive bound works.
        1.0
    } else {
        lambda.abs() * LAMBDA_MAX_MARGIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn path3() -> Graph {
        Graph::from_edges(3, &[(0, 1, 1.0), (1, 2, 1.0)]).unwrap()
    }

    #[test]
    fn combinatorial_rows_sum_to_zero() {
        let l = laplacian(&path3(), false).unwrap();
        for s in l.row_sums() {
            assert_abs_diff_eq!(s, 0.0, epsilon = 1e-12);
        }
        assert_eq!(l.get(1, 1), 2.0);
        assert_eq!(l.get(0, 1), -1.0);
    }

    #[test]
    fn normalized_has_unit_diagonal() {
        let l = laplacian(&path3(), true).unwrap();
        for d in l.diagonal() {
            assert_abs_diff_eq!(d, 1.0, epsilon = 1e-12);
        }
        let expected = -1.0 / (1.0f64 * 2.0).sqrt();
        assert_abs_diff_eq!(l.get(0, 1), expected, epsilon = 1e-12);
    }

    #[test]
    fn isolated_vertex_row_is_identity() {
        let g = Graph::from_edges(3, &[(0, 1, 1.0)]).unwrap();
        let l = laplacian(&g, true).unwrap();
        assert_eq!(l.get(2, 2), 1.0);
        assert_eq!(l.row(2).count(), 1);
    }

    #[test]
    fn negative_weights_are_configuration_errors() {
        let adj = SparseMatrix::from_triplets(2, vec![(0, 1, -1.0), (1, 0, -1.0)]).unwrap();
        assert!(laplacian(&Graph::from_adjacency(adj), true).is_err());
    }

    #[test]
    fn power_iteration_finds_path_spectrum_top() {
        // Combinatorial Laplacian of P3 has eigenvalues {0, 1, 3}.
        let l = Laplacian::from_graph(&path3(), LaplacianKind::Combinatorial).unwrap();
        assert_relative_eq!(l.lambda_max(), 3.0 * LAMBDA_MAX_MARGIN, max_relative = 1e-6);
    }

    #[test]
    fn rescaled_normalized_laplacian_shifts_diagonal() {
        let l = Laplacian::from_graph(&path3(), LaplacianKind::Normalized).unwrap();
        let r = l.rescaled();
        // 2 * 1 / 2 - 1 = 0 on the diagonal.
        for d in r.diagonal() {
            assert_abs_diff_eq!(d, 0.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(r.get(0, 1), l.matrix().get(0, 1), epsilon = 1e-12);
    }

    #[test]
    fn lambda_max_bound_is_never_below_the_spectrum() {
        // Star K1,4: combinatorial eigenvalues {0, 1, 1, 1, 5}.
        let g = Graph::from_edges(5, &[(0, 1, 1.0), (0, 2, 1.0), (0, 3, 1.0), (0, 4, 1.0)]).unwrap();
        let l = laplacian(&g, false).unwrap();
        let bound = estimate_lambda_max(&l, POWER_ITERATIONS);
        assert!(bound >= 5.0, "bound {bound} below the top eigenvalue");
        assert_relative_eq!(bound, 5.0 * LAMBDA_MAX_MARGIN, max_relative = 1e-6);
    }

    #[test]
    fn edgeless_graph_gets_a_unit_bound() {
        let l = laplacian(&Graph::empty(3), false).unwrap();
        assert_abs_diff_eq!(estimate_lambda_max(&l, POWER_ITERATIONS), 1.0, epsilon = 1e-12);
    }
}
