//! Error types for graph construction, Laplacians and coarsening.

use thiserror::Error;

/// Result alias used throughout `graphconv-graph`.
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors produced while building or transforming graphs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// The graph or a request made against it is malformed: negative
    /// weights, asymmetric adjacency, empty graph, out-of-range parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A feature matrix or vector does not match the expected vertex count.
    #[error("Shape mismatch: expected {expected} columns, got {actual}")]
    ShapeMismatch {
        /// Expected size along the vertex axis.
        expected: usize,
        /// Size actually supplied.
        actual: usize,
    },

    /// A vertex index points outside the graph.
    #[error("Vertex index {index} out of bounds for graph of {n} vertices")]
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Number of vertices.
        n: usize,
    },
}

impl GraphError {
    /// Construct a [`GraphError::Configuration`].
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        GraphError::Configuration(msg.into())
    }

    /// Construct a [`GraphError::ShapeMismatch`].
    pub fn shape_mismatch(expected: usize, actual: usize) -> Self {
        GraphError::ShapeMismatch { expected, actual }
    }
}
