//! Similarity-graph construction.
//!
//! Turns a feature matrix (one row per vertex) into a weighted k-nearest
//! neighbour graph:
//!
//! ```text
//! features ──► knn(k, metric) ──► gaussian_adjacency ──► replace_random_edges
//!              (dist, idx)         w = exp(−d²/σ²)        (robustness noise)
//! ```
//!
//! `σ` is the mean distance from each vertex to its k-th neighbour. The
//! resulting weight matrix is symmetrized with `max(W, Wᵀ)` so that an edge
//! exists whenever either endpoint lists the other among its neighbours.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;
use crate::sparse::SparseMatrix;

/// Distance between feature vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// `‖a − b‖₂`
    #[default]
    Euclidean,
    /// `1 − cos(a, b)`; a zero vector is at distance 1 from everything.
    Cosine,
}

impl Metric {
    fn distance(self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            Metric::Euclidean => {
                a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
            }
            Metric::Cosine => {
                let na = a.dot(&a).sqrt();
                let nb = b.dot(&b).sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    (1.0 - a.dot(&b) / (na * nb)).max(0.0)
                }
            }
        }
    }
}

/// Coordinates of an `m × m` grid on `[0, 1]²`, x varying fastest.
///
/// Pixel `(row, col)` of an image maps to vertex `row * m + col`.
pub fn grid_coordinates(m: usize) -> Array2<f64> {
    let step = if m > 1 { 1.0 / (m - 1) as f64 } else { 0.0 };
    Array2::from_shape_fn((m * m, 2), |(v, axis)| {
        if axis == 0 {
            (v % m) as f64 * step
        } else {
            (v / m) as f64 * step
        }
    })
}

/// Brute-force k nearest neighbours of every row, excluding the row itself.
///
/// Returns `(distances, indices)`, both `n × k`, sorted by increasing
/// distance (ties by lower index).
pub fn knn(
    features: &ArrayView2<f64>,
    k: usize,
    metric: Metric,
) -> GraphResult<(Array2<f64>, Array2<usize>)> {
    let n = features.nrows();
    if n == 0 {
        return Err(GraphError::configuration("cannot build a k-NN graph from zero vertices"));
    }
    if k == 0 || k >= n {
        return Err(GraphError::configuration(format!(
            "number of neighbours must be in [1, {}), got {k}",
            n
        )));
    }

    let mut dist = Array2::<f64>::zeros((n, k));
    let mut idx = Array2::<usize>::zeros((n, k));
    let mut row: Vec<(f64, usize)> = Vec::with_capacity(n - 1);
    for i in 0..n {
        row.clear();
        let a = features.row(i);
        row.extend((0..n).filter(|&j| j != i).map(|j| (metric.distance(a, features.row(j)), j)));
        row.sort_by(|x, y| {
            x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal).then(x.1.cmp(&y.1))
        });
        for (slot, &(d, j)) in row.iter().take(k).enumerate() {
            dist[[i, slot]] = d;
            idx[[i, slot]] = j;
        }
    }
    Ok((dist, idx))
}

/// Gaussian-kernel weights on a k-NN structure.
pub fn gaussian_adjacency(dist: &Array2<f64>, idx: &Array2<usize>) -> GraphResult<Graph> {
    let (n, k) = dist.dim();
    if idx.dim() != (n, k) {
        return Err(GraphError::shape_mismatch(n * k, idx.len()));
    }
    if k == 0 {
        return Ok(Graph::empty(n));
    }

    let sigma = dist.column(k - 1).mean().unwrap_or(0.0);
    let sigma2 = if sigma > 0.0 { sigma * sigma } else { 1.0 };

    // max(W, Wᵀ): collect both orientations and keep the larger weight.
    let mut best: std::collections::HashMap<(usize, usize), f64> =
        std::collections::HashMap::with_capacity(2 * n * k);
    for i in 0..n {
        for s in 0..k {
            let j = idx[[i, s]];
            if j >= n {
                return Err(GraphError::IndexOutOfBounds { index: j, n });
            }
            if j == i {
                continue;
            }
            let w = (-dist[[i, s]] * dist[[i, s]] / sigma2).exp();
            for key in [(i, j), (j, i)] {
                let slot = best.entry(key).or_insert(0.0);
                if w > *slot {
                    *slot = w;
                }
            }
        }
    }
    let adjacency = SparseMatrix::from_triplets(n, best.into_iter().map(|((r, c), w)| (r, c, w)))?;
    Ok(Graph::from_adjacency(adjacency))
}

/// Replace a fraction of the edges with random ones.
///
/// Exactly `floor(noise_level × n_edges)` distinct undirected edges are
/// chosen uniformly. Each is moved to a pair of endpoints drawn uniformly
/// from `[0, n)` and given a weight drawn from `U(0, 1)`. The result is
/// symmetrized by summing with its transpose (replacements landing on the
/// same pair add up) and self-loops are dropped.
pub fn replace_random_edges<R: Rng + ?Sized>(
    graph: &Graph,
    noise_level: f64,
    rng: &mut R,
) -> GraphResult<Graph> {
    if !(0.0..=1.0).contains(&noise_level) {
        return Err(GraphError::configuration(format!(
            "noise level must be in [0, 1], got {noise_level}"
        )));
    }
    let n = graph.n_vertices();
    let upper: Vec<(usize, usize, f64)> =
        graph.adjacency().triplets().filter(|&(r, c, _)| r < c).collect();
    let n_replace = (noise_level * upper.len() as f64).floor() as usize;
    if n_replace == 0 {
        return Ok(graph.clone());
    }

    let mut edges = upper;
    for slot in sample(rng, edges.len(), n_replace).into_iter() {
        let u = rng.gen_range(0..n);
        let v = rng.gen_range(0..n);
        let w: f64 = rng.gen_range(0.0..1.0);
        edges[slot] = (u, v, w);
    }
    debug!(replaced = n_replace, total = edges.len(), "replaced random edges");

    let triplets = edges
        .into_iter()
        .filter(|&(u, v, _)| u != v)
        .flat_map(|(u, v, w)| [(u, v, w), (v, u, w)])
        .collect::<Vec<_>>();
    Ok(Graph::from_adjacency(SparseMatrix::from_triplets(n, triplets)?))
}

/// Drop every edge lighter than `max_weight / ratio`.
///
/// On a uniform grid with 8 neighbours this keeps only the vertical and
/// horizontal connections, leaving corner vertices with two neighbours.
pub fn prune_weak_edges(graph: &Graph, ratio: f64) -> GraphResult<Graph> {
    if !(ratio.is_finite() && ratio >= 1.0) {
        return Err(GraphError::configuration(format!("prune ratio must be >= 1, got {ratio}")));
    }
    let threshold = graph.adjacency().max_abs() / ratio;
    let kept = graph
        .adjacency()
        .triplets()
        .filter(|&(_, _, w)| w >= threshold)
        .collect::<Vec<_>>();
    let pruned = Graph::from_adjacency(SparseMatrix::from_triplets(graph.n_vertices(), kept)?);
    debug!(before = graph.n_edges(), after = pruned.n_edges(), "pruned weak edges");
    Ok(pruned)
}

/// Weight ratio below which grid edges are dropped when `corners` is set.
const CORNER_PRUNE_RATIO: f64 = 1.5;

/// Parameters of the k-NN graph construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Neighbours per vertex (`k`). Default: **8**.
    pub number_edges: usize,
    /// Distance between vertex features. Default: **euclidean**.
    pub metric: Metric,
    /// Fraction of edges replaced by random ones. Default: **0.0**.
    pub noise_level: f64,
    /// Seed for the noise RNG. Default: **42**.
    pub seed: u64,
    /// Grid graphs only: keep just the strongest (axis-aligned) edges, so
    /// corner vertices end up with two neighbours. Default: **false**.
    pub corners: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            number_edges: 8,
            metric: Metric::Euclidean,
            noise_level: 0.0,
            seed: 42,
            corners: false,
        }
    }
}

/// Builds similarity graphs from vertex features according to a [`GraphConfig`].
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    config: GraphConfig,
}

impl GraphBuilder {
    /// Create a builder.
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// k-NN graph over the rows of `features`, with optional edge noise.
    pub fn build(&self, features: &ArrayView2<f64>) -> GraphResult<Graph> {
        let graph = self.similarity(features)?;
        self.add_noise(&graph)
    }

    /// k-NN graph over an `m × m` pixel grid.
    ///
    /// With [`GraphConfig::corners`] set, weak edges are pruned before noise
    /// is added.
    pub fn grid(&self, m: usize) -> GraphResult<Graph> {
        let coords = grid_coordinates(m);
        let mut graph = self.similarity(&coords.view())?;
        if self.config.corners {
            graph = prune_weak_edges(&graph, CORNER_PRUNE_RATIO)?;
        }
        self.add_noise(&graph)
    }

    fn similarity(&self, features: &ArrayView2<f64>) -> GraphResult<Graph> {
        let (dist, idx) = knn(features, self.config.number_edges, self.config.metric)?;
        let graph = gaussian_adjacency(&dist, &idx)?;
        info!(
            vertices = graph.n_vertices(),
            edges = graph.n_edges(),
            min_edges = self.config.number_edges * graph.n_vertices() / 2,
            "built k-NN graph"
        );
        Ok(graph)
    }

    fn add_noise(&self, graph: &Graph) -> GraphResult<Graph> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        replace_random_edges(graph, self.config.noise_level, &mut rng)
    }
}
