//! One Laplacian per coarsening level, shared across models.

use std::sync::{Arc, OnceLock};

use crate::coarsening::Coarsening;
use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;
use crate::laplacian::{Laplacian, LaplacianKind};
use crate::sparse::SparseMatrix;
use crate::spectral::SpectralBasis;

/// Operators of a single level.
///
/// The eigendecomposition is computed on first use and cached; Chebyshev
/// filtering never touches it.
#[derive(Debug)]
pub struct LevelOperator {
    laplacian: Laplacian,
    rescaled: SparseMatrix,
    basis: OnceLock<SpectralBasis>,
}

impl LevelOperator {
    /// Build the operators of `graph`.
    pub fn new(graph: &Graph, kind: LaplacianKind) -> GraphResult<Self> {
        let laplacian = Laplacian::from_graph(graph, kind)?;
        let rescaled = laplacian.rescaled();
        Ok(Self { laplacian, rescaled, basis: OnceLock::new() })
    }

    /// Number of vertices at this level.
    #[inline]
    pub fn n(&self) -> usize {
        self.laplacian.n()
    }

    /// The Laplacian.
    #[inline]
    pub fn laplacian(&self) -> &Laplacian {
        &self.laplacian
    }

    /// `2L/λ_max − I`.
    #[inline]
    pub fn rescaled(&self) -> &SparseMatrix {
        &self.rescaled
    }

    /// Full eigendecomposition, computed once.
    pub fn basis(&self) -> &SpectralBasis {
        self.basis.get_or_init(|| SpectralBasis::from_laplacian(self.laplacian.matrix()))
    }

    /// True once [`basis`](Self::basis) has been computed.
    pub fn has_basis(&self) -> bool {
        self.basis.get().is_some()
    }
}

/// Laplacians of every coarsening level, finest first.
///
/// Cloning is cheap: levels are reference-counted and immutable, so one
/// hierarchy can back any number of models.
#[derive(Debug, Clone)]
pub struct LaplacianHierarchy {
    levels: Vec<Arc<LevelOperator>>,
}

impl LaplacianHierarchy {
    /// Build operators for `graphs` (finest first).
    pub fn new(graphs: &[Graph], kind: LaplacianKind) -> GraphResult<Self> {
        if graphs.is_empty() {
            return Err(GraphError::configuration("hierarchy needs at least one graph"));
        }
        let levels = graphs
            .iter()
            .map(|g| LevelOperator::new(g, kind).map(Arc::new))
            .collect::<GraphResult<Vec<_>>>()?;
        Ok(Self { levels })
    }

    /// Build operators for every level of a coarsening.
    pub fn from_coarsening(coarsening: &Coarsening, kind: LaplacianKind) -> GraphResult<Self> {
        Self::new(coarsening.graphs(), kind)
    }

    /// Number of levels (coarsening steps + 1).
    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Always false for a constructed hierarchy.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Coarsening steps available below the finest level.
    #[inline]
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Operators of level `l`.
    pub fn level(&self, l: usize) -> GraphResult<&Arc<LevelOperator>> {
        self.levels
            .get(l)
            .ok_or(GraphError::IndexOutOfBounds { index: l, n: self.levels.len() })
    }

    /// Vertex count of every level.
    pub fn sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.n()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarsening::coarsen;

    #[test]
    fn hierarchy_matches_coarsening_sizes() {
        let edges: Vec<_> = (0..7).map(|i| (i, i + 1, 1.0)).collect();
        let g = Graph::from_edges(8, &edges).unwrap();
        let c = coarsen(&g, 2, false).unwrap();
        let h = LaplacianHierarchy::from_coarsening(&c, LaplacianKind::Normalized).unwrap();
        assert_eq!(h.len(), 3);
        assert_eq!(h.depth(), 2);
        assert_eq!(h.sizes(), c.graphs().iter().map(Graph::n_vertices).collect::<Vec<_>>());
    }

    #[test]
    fn basis_is_lazy_and_shared() {
        let g = Graph::from_edges(3, &[(0, 1, 1.0), (1, 2, 1.0)]).unwrap();
        let h = LaplacianHierarchy::new(&[g], LaplacianKind::Normalized).unwrap();
        let clone = h.clone();
        let level = h.level(0).unwrap();
        assert!(!level.has_basis());
        assert_eq!(level.basis().n(), 3);
        assert!(clone.level(0).unwrap().has_basis());
    }

    #[test]
    fn missing_level_is_out_of_bounds() {
        let g = Graph::from_edges(2, &[(0, 1, 1.0)]).unwrap();
        let h = LaplacianHierarchy::new(&[g], LaplacianKind::Normalized).unwrap();
        assert!(h.level(1).is_err());
    }
}
