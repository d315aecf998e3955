//! Weighted undirected graphs.
//!
//! A [`Graph`] wraps a symmetric, non-negative [`SparseMatrix`] adjacency.
//! Construction via [`Graph::from_edges`] always produces a valid graph;
//! [`Graph::from_adjacency`] accepts any square matrix and leaves validation
//! to [`Graph::validate`], which the Laplacian constructors call.

use crate::error::{GraphError, GraphResult};
use crate::sparse::SparseMatrix;

/// Relative tolerance used when checking adjacency symmetry.
pub const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Weighted undirected graph over `n` vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    adjacency: SparseMatrix,
}

impl Graph {
    /// Wrap an adjacency matrix as-is.
    pub fn from_adjacency(adjacency: SparseMatrix) -> Self {
        Self { adjacency }
    }

    /// Build from undirected `(u, v, w)` edges.
    ///
    /// Each edge contributes `w` to both `(u, v)` and `(v, u)`; repeated
    /// edges are summed. Self-loops are ignored and negative weights are
    /// rejected.
    pub fn from_edges(n: usize, edges: &[(usize, usize, f64)]) -> GraphResult<Self> {
        let mut triplets = Vec::with_capacity(edges.len() * 2);
        for &(u, v, w) in edges {
            if w < 0.0 || !w.is_finite() {
                return Err(GraphError::configuration(format!(
                    "edge ({u}, {v}) has invalid weight {w}"
                )));
            }
            if u == v {
                continue;
            }
            triplets.push((u, v, w));
            triplets.push((v, u, w));
        }
        Ok(Self { adjacency: SparseMatrix::from_triplets(n, triplets)? })
    }

    /// Graph with `n` vertices and no edges.
    pub fn empty(n: usize) -> Self {
        Self { adjacency: SparseMatrix::zeros(n) }
    }

    /// Number of vertices.
    #[inline]
    pub fn n_vertices(&self) -> usize {
        self.adjacency.n()
    }

    /// Underlying adjacency matrix.
    #[inline]
    pub fn adjacency(&self) -> &SparseMatrix {
        &self.adjacency
    }

    /// Number of undirected edges, self-loops excluded.
    pub fn n_edges(&self) -> usize {
        self.adjacency.triplets().filter(|&(r, c, _)| r < c).count()
    }

    /// Neighbours of `i` as `(vertex, weight)`, self-loop excluded.
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.adjacency.row(i).filter(move |&(j, _)| j != i)
    }

    /// Weight of edge `(i, j)`.
    pub fn weight(&self, i: usize, j: usize) -> f64 {
        self.adjacency.get(i, j)
    }

    /// Weighted degree of every vertex, self-loops excluded.
    pub fn degrees(&self) -> Vec<f64> {
        (0..self.n_vertices()).map(|i| self.neighbors(i).map(|(_, w)| w).sum()).collect()
    }

    /// Sum of all adjacency entries (each undirected edge counted twice,
    /// self-loops once).
    pub fn total_weight(&self) -> f64 {
        self.adjacency.sum()
    }

    /// Sum of self-loop weights.
    pub fn self_loop_weight(&self) -> f64 {
        self.adjacency.diagonal().iter().sum()
    }

    /// Copy with self-loops removed.
    pub fn without_self_loops(&self) -> Self {
        Self { adjacency: self.adjacency.without_diagonal() }
    }

    /// Check the adjacency invariants: non-empty, non-negative, finite and
    /// symmetric within [`SYMMETRY_TOLERANCE`] (relative to the largest
    /// weight).
    pub fn validate(&self) -> GraphResult<()> {
        if self.n_vertices() == 0 {
            return Err(GraphError::configuration("graph has no vertices"));
        }
        if let Some((r, c, w)) = self
            .adjacency
            .triplets()
            .find(|&(_, _, w)| w < 0.0 || !w.is_finite())
        {
            return Err(GraphError::configuration(format!(
                "adjacency entry ({r}, {c}) has invalid weight {w}"
            )));
        }
        let asym = self.adjacency.max_asymmetry();
        let scale = self.adjacency.max_abs().max(1.0);
        if asym > SYMMETRY_TOLERANCE * scale {
            return Err(GraphError::configuration(format!(
                "adjacency is not symmetric (max |a_ij - a_ji| = {asym:.3e})"
            )));
        }
        Ok(())
    }
}
