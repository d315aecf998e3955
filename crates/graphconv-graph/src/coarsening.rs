//! Multilevel graph coarsening.
//!
//! Each level contracts a greedy matching of the previous graph: every vertex
//! is paired with at most one neighbour, so a level at most halves the vertex
//! count. After `L` levels the matching forest is flattened into a single
//! [`Permutation`] with the binary-tree property:
//!
//! ```text
//! level L   :  [   a   ][   b   ]            one coarse vertex
//! level L-1 :  [ a0][ a1][ b0][ pad]         per 2^(L-l) positions
//! level 0   :  [..][..][..][..][..][..][..]
//! ```
//!
//! Positions `2i` and `2i+1` at level `l` are the two constituents of
//! position `i` at level `l+1`. A vertex that found no partner gets a padding
//! sibling. Pooling by 2 over the permuted vertex axis therefore follows the
//! contraction exactly.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;
use crate::sparse::SparseMatrix;

/// Vertex visiting order for the matching.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MatchingOrder {
    /// Ascending weighted degree, ties by lowest id, at every level.
    #[default]
    Degree,
    /// Explicit order for the first level, degree order afterwards.
    Supplied(Vec<usize>),
}

/// How a candidate neighbour is scored during matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchingScore {
    /// Edge weight `w_ij`.
    #[default]
    HeavyEdge,
    /// `w_ij (1/d_i + 1/d_j)`, favouring edges between low-degree vertices.
    NormalizedCut,
}

/// Vertex placement produced by coarsening.
///
/// `order()[pos]` is the original vertex stored at padded position `pos`;
/// values `>= n_original()` mark padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    order: Vec<usize>,
    position: Vec<usize>,
    n_original: usize,
}

impl Permutation {
    /// Identity over `n` vertices, no padding.
    pub fn identity(n: usize) -> Self {
        Self { order: (0..n).collect(), position: (0..n).collect(), n_original: n }
    }

    fn from_order(order: Vec<usize>, n_original: usize) -> GraphResult<Self> {
        let mut position = vec![usize::MAX; n_original];
        for (pos, &v) in order.iter().enumerate() {
            if v < n_original {
                if position[v] != usize::MAX {
                    return Err(GraphError::configuration(format!(
                        "vertex {v} placed twice in permutation"
                    )));
                }
                position[v] = pos;
            }
        }
        if let Some(v) = position.iter().position(|&p| p == usize::MAX) {
            return Err(GraphError::configuration(format!("vertex {v} missing from permutation")));
        }
        Ok(Self { order, position, n_original })
    }

    /// Padded size.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when the permutation covers no positions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of real vertices.
    #[inline]
    pub fn n_original(&self) -> usize {
        self.n_original
    }

    /// Position → vertex table.
    #[inline]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Padded position of original vertex `v`.
    pub fn position_of(&self, v: usize) -> GraphResult<usize> {
        self.position
            .get(v)
            .copied()
            .ok_or(GraphError::IndexOutOfBounds { index: v, n: self.n_original })
    }

    /// True when position `pos` holds a padding vertex.
    #[inline]
    pub fn is_padding(&self, pos: usize) -> bool {
        self.order.get(pos).map_or(true, |&v| v >= self.n_original)
    }

    /// Reorder the columns of a `samples × N` matrix into
    /// `samples × len()`, padding columns set to zero.
    pub fn apply(&self, features: &ArrayView2<f64>) -> GraphResult<Array2<f64>> {
        let (rows, cols) = features.dim();
        if cols != self.n_original {
            return Err(GraphError::shape_mismatch(self.n_original, cols));
        }
        let mut out = Array2::<f64>::zeros((rows, self.len()));
        for (pos, &v) in self.order.iter().enumerate() {
            if v < self.n_original {
                out.column_mut(pos).assign(&features.column(v));
            }
        }
        Ok(out)
    }

    /// Inverse of [`apply`](Self::apply): drop padding columns and restore
    /// the original vertex order.
    pub fn invert(&self, permuted: &ArrayView2<f64>) -> GraphResult<Array2<f64>> {
        let (rows, cols) = permuted.dim();
        if cols != self.len() {
            return Err(GraphError::shape_mismatch(self.len(), cols));
        }
        let mut out = Array2::<f64>::zeros((rows, self.n_original));
        for (v, &pos) in self.position.iter().enumerate() {
            out.column_mut(v).assign(&permuted.column(pos));
        }
        Ok(out)
    }

    /// Reorder a single signal.
    pub fn apply_vec(&self, signal: &[f64]) -> GraphResult<Vec<f64>> {
        if signal.len() != self.n_original {
            return Err(GraphError::shape_mismatch(self.n_original, signal.len()));
        }
        Ok(self
            .order
            .iter()
            .map(|&v| if v < self.n_original { signal[v] } else { 0.0 })
            .collect())
    }
}

/// Result of [`coarsen`]: the graph at every level plus the pooling order.
#[derive(Debug, Clone)]
pub struct Coarsening {
    graphs: Vec<Graph>,
    cluster_maps: Vec<Vec<usize>>,
    permutation: Permutation,
}

impl Coarsening {
    /// Graphs from finest (`0`) to coarsest (`levels()`).
    ///
    /// Every level but the last is re-indexed into pooling order and padded
    /// with isolated vertices, so `graphs()[l]` has `permutation().len() / 2^l`
    /// vertices.
    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }

    /// `cluster_maps()[l][v]` is the level `l+1` vertex that level `l`
    /// vertex `v` was contracted into (unpermuted ids).
    pub fn cluster_maps(&self) -> &[Vec<usize>] {
        &self.cluster_maps
    }

    /// Pooling order of the original vertices.
    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    /// Number of contraction steps.
    pub fn levels(&self) -> usize {
        self.cluster_maps.len()
    }

    /// Split into `(graphs, permutation)`.
    pub fn into_parts(self) -> (Vec<Graph>, Permutation) {
        (self.graphs, self.permutation)
    }
}

/// Configurable multilevel coarsener.
#[derive(Debug, Clone, Default)]
pub struct Coarsener {
    order: MatchingOrder,
    score: MatchingScore,
    allow_self_connections: bool,
}

impl Coarsener {
    /// Degree-ordered heavy-edge matching, intra-pair weight dropped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first-level visiting order.
    pub fn with_order(mut self, order: MatchingOrder) -> Self {
        self.order = order;
        self
    }

    /// Set the neighbour score.
    pub fn with_score(mut self, score: MatchingScore) -> Self {
        self.score = score;
        self
    }

    /// Keep the weight of contracted pairs as self-loops.
    pub fn with_self_connections(mut self, allow: bool) -> Self {
        self.allow_self_connections = allow;
        self
    }

    /// Coarsen `graph` `levels` times.
    ///
    /// # Errors
    ///
    /// [`GraphError::Configuration`] for an empty or malformed graph or a
    /// supplied order that is not a permutation of the vertices.
    pub fn coarsen(&self, graph: &Graph, levels: usize) -> GraphResult<Coarsening> {
        graph.validate()?;
        let n = graph.n_vertices();

        if levels == 0 {
            return Ok(Coarsening {
                graphs: vec![graph.clone()],
                cluster_maps: Vec::new(),
                permutation: Permutation::identity(n),
            });
        }

        let mut internal: Vec<Graph> = vec![graph.clone()];
        let mut cluster_maps: Vec<Vec<usize>> = Vec::with_capacity(levels);
        for level in 0..levels {
            let current = &internal[level];
            let order = match (&self.order, level) {
                (MatchingOrder::Supplied(order), 0) => {
                    check_order(order, current.n_vertices())?;
                    order.clone()
                }
                _ => degree_order(current),
            };
            let (cluster, n_coarse) = match_vertices(current, &order, self.score);
            let coarse = contract(current, &cluster, n_coarse, self.allow_self_connections)?;
            debug!(
                level = level + 1,
                vertices = n_coarse,
                edges = coarse.n_edges(),
                "contracted level"
            );
            cluster_maps.push(cluster);
            internal.push(coarse);
        }

        let level_orders = pooling_orders(&cluster_maps, internal[levels].n_vertices());
        let permutation = Permutation::from_order(level_orders[0].clone(), n)?;

        let mut graphs = Vec::with_capacity(levels + 1);
        for (l, g) in internal.iter().enumerate() {
            if l == levels {
                graphs.push(g.clone());
                continue;
            }
            let mut new_index = vec![0usize; g.n_vertices()];
            for (pos, &v) in level_orders[l].iter().enumerate() {
                if v < g.n_vertices() {
                    new_index[v] = pos;
                }
            }
            let adjacency = g.adjacency().relabel(&new_index, level_orders[l].len())?;
            graphs.push(Graph::from_adjacency(adjacency));
        }

        info!(
            levels,
            sizes = ?graphs.iter().map(Graph::n_vertices).collect::<Vec<_>>(),
            padded = permutation.len(),
            "coarsened graph"
        );
        Ok(Coarsening { graphs, cluster_maps, permutation })
    }
}

/// Coarsen with degree-ordered heavy-edge matching.
///
/// Shorthand for `Coarsener::new().with_self_connections(..).coarsen(..)`.
pub fn coarsen(
    graph: &Graph,
    levels: usize,
    allow_self_connections: bool,
) -> GraphResult<Coarsening> {
    Coarsener::new().with_self_connections(allow_self_connections).coarsen(graph, levels)
}

fn check_order(order: &[usize], n: usize) -> GraphResult<()> {
    if order.len() != n {
        return Err(GraphError::configuration(format!(
            "matching order has {} entries for {n} vertices",
            order.len()
        )));
    }
    let mut seen = vec![false; n];
    for &v in order {
        if v >= n {
            return Err(GraphError::IndexOutOfBounds { index: v, n });
        }
        if std::mem::replace(&mut seen[v], true) {
            return Err(GraphError::configuration(format!("vertex {v} repeated in matching order")));
        }
    }
    Ok(())
}

/// Vertices by ascending weighted degree, ties by id.
fn degree_order(graph: &Graph) -> Vec<usize> {
    let degree = graph.degrees();
    let mut order: Vec<usize> = (0..graph.n_vertices()).collect();
    order.sort_by(|&a, &b| {
        degree[a].partial_cmp(&degree[b]).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
    });
    order
}

/// Greedy matching. Returns the cluster id of every vertex and the number
/// of clusters.
fn match_vertices(graph: &Graph, order: &[usize], score: MatchingScore) -> (Vec<usize>, usize) {
    let n = graph.n_vertices();
    let degree = graph.degrees();
    let mut cluster = vec![usize::MAX; n];
    let mut next = 0;

    for &i in order {
        if cluster[i] != usize::MAX {
            continue;
        }
        let mut best: Option<usize> = None;
        let mut best_score = 0.0;
        // Rows iterate by ascending column, so strict `>` keeps the lowest id on ties.
        for (j, w) in graph.neighbors(i) {
            if cluster[j] != usize::MAX {
                continue;
            }
            let s = match score {
                MatchingScore::HeavyEdge => w,
                MatchingScore::NormalizedCut => w * (1.0 / degree[i] + 1.0 / degree[j]),
            };
            if s > best_score {
                best_score = s;
                best = Some(j);
            }
        }
        cluster[i] = next;
        if let Some(j) = best {
            cluster[j] = next;
        }
        next += 1;
    }
    (cluster, next)
}

/// Sum edge weights over clusters. Intra-cluster weight lands on the
/// diagonal and is kept only when `keep_self_loops` is set.
fn contract(
    graph: &Graph,
    cluster: &[usize],
    n_coarse: usize,
    keep_self_loops: bool,
) -> GraphResult<Graph> {
    let triplets = graph
        .adjacency()
        .triplets()
        .map(|(r, c, w)| (cluster[r], cluster[c], w))
        .filter(|&(r, c, _)| keep_self_loops || r != c)
        .collect::<Vec<_>>();
    Ok(Graph::from_adjacency(SparseMatrix::from_triplets(n_coarse, triplets)?))
}

/// Position → vertex tables for every level, finest first.
///
/// Built from the coarsest level down: the children of the vertex at
/// position `i` go to positions `2i` and `2i+1`. Missing children are fake
/// vertices numbered from the level size upwards.
fn pooling_orders(cluster_maps: &[Vec<usize>], n_coarsest: usize) -> Vec<Vec<usize>> {
    let mut orders: Vec<Vec<usize>> = vec![(0..n_coarsest).collect()];
    let mut n_coarse = n_coarsest;

    for parent in cluster_maps.iter().rev() {
        let n_fine = parent.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::with_capacity(2); n_coarse];
        for (v, &c) in parent.iter().enumerate() {
            children[c].push(v);
        }

        let coarse_order = &orders[orders.len() - 1];
        let mut fine_order = Vec::with_capacity(2 * coarse_order.len());
        let mut fake = n_fine;
        for &id in coarse_order {
            let kids: &[usize] = if id < n_coarse { &children[id] } else { &[] };
            match kids {
                [a, b] => fine_order.extend([*a, *b]),
                [a] => {
                    fine_order.extend([*a, fake]);
                    fake += 1;
                }
                _ => {
                    fine_order.extend([fake, fake + 1]);
                    fake += 2;
                }
            }
        }
        orders.push(fine_order);
        n_coarse = n_fine;
    }

    orders.reverse();
    orders
}
