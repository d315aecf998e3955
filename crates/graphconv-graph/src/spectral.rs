//! Graph Fourier basis.
//!
//! The eigenvectors of a Laplacian play the role of Fourier modes on the
//! graph; eigenvalues are the associated frequencies. The decomposition is
//! dense and costs `O(N³)`, so it is computed at most once per coarsening
//! level and only for the Fourier and spline filter families.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::sparse::SparseMatrix;

/// Eigendecomposition `L = U Λ Uᵀ` with eigenvalues ascending.
#[derive(Debug, Clone)]
pub struct SpectralBasis {
    eigenvalues: Array1<f64>,
    /// Column `k` is the eigenvector of `eigenvalues[k]`.
    eigenvectors: Array2<f64>,
}

impl SpectralBasis {
    /// Decompose a symmetric matrix.
    pub fn from_laplacian(laplacian: &SparseMatrix) -> Self {
        let n = laplacian.n();
        let mut dense = DMatrix::<f64>::zeros(n, n);
        for (r, c, v) in laplacian.triplets() {
            dense[(r, c)] = v;
        }
        let eigen = SymmetricEigen::new(dense);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[a]
                .partial_cmp(&eigen.eigenvalues[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let eigenvalues = Array1::from_iter(order.iter().map(|&k| eigen.eigenvalues[k]));
        let eigenvectors =
            Array2::from_shape_fn((n, n), |(i, k)| eigen.eigenvectors[(i, order[k])]);
        debug!(n, "computed graph Fourier basis");

        Self { eigenvalues, eigenvectors }
    }

    /// Eigenvalues, ascending.
    #[inline]
    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    /// Eigenvectors as columns, ordered like [`eigenvalues`](Self::eigenvalues).
    #[inline]
    pub fn eigenvectors(&self) -> &Array2<f64> {
        &self.eigenvectors
    }

    /// Dimension of the underlying graph.
    #[inline]
    pub fn n(&self) -> usize {
        self.eigenvalues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use approx::assert_abs_diff_eq;
    use crate::laplacian::laplacian;

    #[test]
    fn eigenvalues_are_sorted_and_reconstruct_matrix() {
        let g = Graph::from_edges(4, &[(0, 1, 1.0), (1, 2, 2.0), (2, 3, 1.0), (3, 0, 0.5)]).unwrap();
        let l = laplacian(&g, false).unwrap();
        let basis = SpectralBasis::from_laplacian(&l);

        let ev = basis.eigenvalues();
        for k in 1..ev.len() {
            assert!(ev[k - 1] <= ev[k]);
        }
        // The combinatorial Laplacian always has a zero eigenvalue.
        assert_abs_diff_eq!(ev[0], 0.0, epsilon = 1e-10);

        let u = basis.eigenvectors();
        let lambda = Array2::from_diag(ev);
        let rebuilt = u.dot(&lambda).dot(&u.t());
        let dense = l.to_dense();
        for (a, b) in rebuilt.iter().zip(dense.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
    }
}
