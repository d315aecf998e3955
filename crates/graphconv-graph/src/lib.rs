//! Graph plumbing for spectral graph convolutions.
//!
//! This crate turns vertex features into a similarity graph, coarsens it
//! into a pooling hierarchy and builds the per-level Laplacians the
//! convolution layers operate on.
//!
//! ```text
//! features ─► GraphBuilder ─► Graph ─► Coarsener ─► (graphs, Permutation)
//!                                                        │
//!                                LaplacianHierarchy ◄────┘
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use graphconv_graph::{coarsen, Graph, LaplacianHierarchy, LaplacianKind};
//! use ndarray::array;
//!
//! let g = Graph::from_edges(4, &[(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0)]).unwrap();
//! let c = coarsen(&g, 1, false).unwrap();
//! let h = LaplacianHierarchy::from_coarsening(&c, LaplacianKind::Normalized).unwrap();
//! assert_eq!(h.len(), 2);
//!
//! let x = array![[1.0, 2.0, 3.0, 4.0]];
//! let px = c.permutation().apply(&x.view()).unwrap();
//! assert_eq!(px.ncols(), c.permutation().len());
//! ```

#![warn(missing_docs)]

pub mod builder;
pub mod coarsening;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod laplacian;
pub mod sparse;
pub mod spectral;

pub use builder::{gaussian_adjacency, grid_coordinates, knn, prune_weak_edges, replace_random_edges};
pub use builder::{GraphBuilder, GraphConfig, Metric};
pub use coarsening::{coarsen, Coarsener, Coarsening, MatchingOrder, MatchingScore, Permutation};
pub use error::{GraphError, GraphResult};
pub use graph::Graph;
pub use hierarchy::{LaplacianHierarchy, LevelOperator};
pub use laplacian::{estimate_lambda_max, laplacian, Laplacian, LaplacianKind, LAMBDA_MAX_MARGIN};
pub use sparse::SparseMatrix;
pub use spectral::SpectralBasis;
