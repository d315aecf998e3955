//! Integration tests for [`graphconv_train::filter`] and graph pooling.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use graphconv_graph::{coarsen, Graph, LaplacianHierarchy, LaplacianKind, LevelOperator};
use graphconv_train::config::{FilterKind, PoolKind};
use graphconv_train::filter::GraphFilter;
use graphconv_train::layers::pool;
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn grid_graph(m: usize) -> Graph {
    let mut edges = Vec::new();
    for r in 0..m {
        for c in 0..m {
            let v = r * m + c;
            if c + 1 < m {
                edges.push((v, v + 1, 1.0));
            }
            if r + 1 < m {
                edges.push((v, v + m, 1.0));
            }
        }
    }
    Graph::from_edges(m * m, &edges).expect("grid edges are valid")
}

fn level(graph: &Graph) -> Arc<LevelOperator> {
    Arc::new(LevelOperator::new(graph, LaplacianKind::Normalized).unwrap())
}

fn random_signal(batch: usize, n: usize, f: usize, seed: u64) -> Array3<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_simple_fn((batch, n, f), || rng.gen_range(-1.0..1.0))
}

/// `K = 1` keeps only `T_0 = I`: the output is the input times the coefficient.
#[test]
fn chebyshev_order_one_scales_the_input() {
    let op = level(&grid_graph(4));
    let filter = GraphFilter::new(FilterKind::Chebyshev, op, 1);
    let x = random_signal(3, 16, 1, 0);
    let w = Array3::from_elem((1, 1, 1), 2.5);

    let (y, _) = filter.forward(&x, &w).unwrap();
    for (a, b) in y.iter().zip(x.iter()) {
        assert_abs_diff_eq!(*a, 2.5 * b, epsilon = 1e-12);
    }
}

/// `K = 2` is `c0·x + c1·L̃x`.
#[test]
fn chebyshev_order_two_matches_rescaled_laplacian() {
    let op = level(&grid_graph(4));
    let filter = GraphFilter::new(FilterKind::Chebyshev, op.clone(), 2);
    let x = random_signal(1, 16, 1, 1);
    let (c0, c1) = (0.7, -1.3);
    let mut w = Array3::zeros((2, 1, 1));
    w[[0, 0, 0]] = c0;
    w[[1, 0, 0]] = c1;

    let (y, _) = filter.forward(&x, &w).unwrap();

    let column = Array2::from_shape_fn((16, 1), |(v, _)| x[[0, v, 0]]);
    let lx = op.rescaled().mul_dense(&column.view()).unwrap();
    for v in 0..16 {
        let expected = c0 * x[[0, v, 0]] + c1 * lx[[v, 0]];
        assert_abs_diff_eq!(y[[0, v, 0]], expected, epsilon = 1e-12);
    }
}

/// Each input map is filtered independently and summed into every output.
#[test]
fn chebyshev_mixes_feature_maps_linearly() {
    let op = level(&grid_graph(3));
    let filter = GraphFilter::new(FilterKind::Chebyshev, op, 3);
    let x = random_signal(2, 9, 2, 2);
    let w = Array3::from_shape_fn((3, 2, 4), |(k, i, o)| (k + 2 * i + o) as f64 * 0.1);

    let (y, _) = filter.forward(&x, &w).unwrap();
    let (y2, _) = filter.forward(&(&x * 2.0), &w).unwrap();
    assert_eq!(y.dim(), (2, 9, 4));
    for (a, b) in y.iter().zip(y2.iter()) {
        assert_abs_diff_eq!(2.0 * a, *b, epsilon = 1e-10);
    }
}

/// Pooling the finest output by `2^L` gives the vertex count of level `L`.
#[test]
fn pooled_dimensions_follow_the_hierarchy() {
    let c = coarsen(&grid_graph(6), 3, false).unwrap();
    let h = LaplacianHierarchy::from_coarsening(&c, LaplacianKind::Normalized).unwrap();
    let sizes = h.sizes();
    let x = random_signal(2, sizes[0], 1, 3);

    for family in [FilterKind::Chebyshev, FilterKind::Fourier, FilterKind::Spline] {
        let fine = GraphFilter::new(family, h.level(0).unwrap().clone(), 3);
        let w = Array3::from_elem((3, 1, 2), 0.5);
        let (y, _) = fine.forward(&x, &w).unwrap();

        for l in 1..h.len() {
            let p = 1 << l;
            let (pooled, _) = pool(&y, p, PoolKind::Max);

            let coarse = GraphFilter::new(family, h.level(l).unwrap().clone(), 3);
            let xc = random_signal(2, sizes[l], 1, 4);
            let (yc, _) = coarse.forward(&xc, &w).unwrap();
            assert_eq!(pooled.dim().1, yc.dim().1, "{family:?} at level {l}");
        }
    }
}

/// Chebyshev filtering leaves the eigendecomposition uncomputed.
#[test]
fn chebyshev_never_needs_the_eigenbasis() {
    let op = level(&grid_graph(5));
    let filter = GraphFilter::new(FilterKind::Chebyshev, op.clone(), 4);
    let x = random_signal(1, 25, 1, 5);
    filter.forward(&x, &Array3::from_elem((4, 1, 1), 1.0)).unwrap();
    assert!(!op.has_basis());

    let _ = GraphFilter::new(FilterKind::Spline, op.clone(), 4);
    assert!(op.has_basis());
}

/// A constant spline response equals the same constant on every frequency.
#[test]
fn constant_spline_equals_scaled_identity() {
    let op = level(&grid_graph(4));
    let spline = GraphFilter::new(FilterKind::Spline, op, 5);
    let x = random_signal(2, 16, 1, 6);
    let w = Array3::from_elem((5, 1, 1), 3.0);

    let (y, _) = spline.forward(&x, &w).unwrap();
    for (a, b) in y.iter().zip(x.iter()) {
        assert_abs_diff_eq!(*a, 3.0 * b, epsilon = 1e-8);
    }
}
