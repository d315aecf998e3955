//! Integration tests for Laplacians, spectral bases and graph construction.

use graphconv_graph::{
    laplacian, Graph, GraphBuilder, GraphConfig, Laplacian, LaplacianKind, Metric, SparseMatrix,
    SpectralBasis, LAMBDA_MAX_MARGIN,
};
use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_graph(n: usize, p: f64, seed: u64) -> Graph {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut edges = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if rng.gen_bool(p) {
                edges.push((i, j, rng.gen_range(0.01..5.0)));
            }
        }
    }
    Graph::from_edges(n, &edges).expect("random edges are valid")
}

// ---------------------------------------------------------------------------
// Spectrum bounds
// ---------------------------------------------------------------------------

/// Normalized Laplacian eigenvalues lie in [0, 2].
#[test]
fn normalized_spectrum_in_zero_two() {
    for seed in 0..8 {
        let g = random_graph(20, 0.25, seed);
        let l = laplacian(&g, true).unwrap();
        let basis = SpectralBasis::from_laplacian(&l);
        for &ev in basis.eigenvalues() {
            assert!((-1e-9..=2.0 + 1e-9).contains(&ev), "seed {seed}: eigenvalue {ev}");
        }
    }
}

/// The rescaled operator has its spectrum in [-1, 1] for both variants.
#[test]
fn rescaled_spectrum_in_unit_interval() {
    for seed in 0..6 {
        for kind in [LaplacianKind::Normalized, LaplacianKind::Combinatorial] {
            let g = random_graph(15, 0.3, 40 + seed);
            let l = Laplacian::from_graph(&g, kind).unwrap();
            let basis = SpectralBasis::from_laplacian(&l.rescaled());
            for &ev in basis.eigenvalues() {
                assert!(
                    (-1.0 - 1e-9..=1.0 + 1e-9).contains(&ev),
                    "{kind:?}/{seed}: eigenvalue {ev} outside [-1, 1]"
                );
            }
        }
    }
}

/// The combinatorial bound sits at or just above the true top eigenvalue.
#[test]
fn combinatorial_lambda_max_bounds_the_spectrum() {
    for seed in 0..6 {
        let g = random_graph(25, 0.2, seed);
        let l = Laplacian::from_graph(&g, LaplacianKind::Combinatorial).unwrap();
        let basis = SpectralBasis::from_laplacian(l.matrix());
        let top = basis.eigenvalues().iter().copied().fold(f64::MIN, f64::max);
        assert!(l.lambda_max() >= top, "seed {seed}: bound {} < {top}", l.lambda_max());
        assert_relative_eq!(l.lambda_max(), top * LAMBDA_MAX_MARGIN, max_relative = 1e-3);
    }
}

/// The constant vector is in the null space of the combinatorial Laplacian.
#[test]
fn combinatorial_annihilates_constants() {
    let g = random_graph(12, 0.4, 1);
    let l = laplacian(&g, false).unwrap();
    let y = l.mul_vec(&vec![1.0; 12]).unwrap();
    for v in y {
        assert_abs_diff_eq!(v, 0.0, epsilon = 1e-12);
    }
}

/// A hand-built asymmetric adjacency is rejected.
#[test]
fn asymmetric_adjacency_is_rejected() {
    let adj = SparseMatrix::from_triplets(3, vec![(0, 1, 1.0), (1, 0, 1.5), (1, 2, 1.0), (2, 1, 1.0)])
        .unwrap();
    assert!(laplacian(&Graph::from_adjacency(adj), true).is_err());
}

/// Eigenvectors are orthonormal.
#[test]
fn eigenvectors_are_orthonormal() {
    let g = random_graph(10, 0.5, 7);
    let basis = SpectralBasis::from_laplacian(&laplacian(&g, true).unwrap());
    let u = basis.eigenvectors();
    let gram = u.t().dot(u);
    let eye = Array2::<f64>::eye(10);
    for (a, b) in gram.iter().zip(eye.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
    }
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// A k-NN graph over random points is symmetric and every vertex has at
/// least `k` neighbours (symmetrization only adds edges).
#[test]
fn knn_graph_has_at_least_k_neighbours() {
    let mut rng = StdRng::seed_from_u64(3);
    let features = Array2::from_shape_fn((30, 4), |_| rng.gen_range(-1.0..1.0));
    for metric in [Metric::Euclidean, Metric::Cosine] {
        let builder = GraphBuilder::new(GraphConfig { number_edges: 5, metric, ..Default::default() });
        let g = builder.build(&features.view()).unwrap();
        g.validate().unwrap();
        for i in 0..30 {
            assert!(g.neighbors(i).count() >= 5, "{metric:?}: vertex {i} has too few neighbours");
        }
    }
}

/// Noise keeps a valid graph and is reproducible from the seed.
#[test]
fn noisy_graph_is_seeded() {
    let config = GraphConfig { number_edges: 4, noise_level: 0.3, seed: 9, ..Default::default() };
    let a = GraphBuilder::new(config.clone()).grid(6).unwrap();
    let b = GraphBuilder::new(config).grid(6).unwrap();
    a.validate().unwrap();
    assert_eq!(a, b);
    assert_eq!(a.self_loop_weight(), 0.0);
}

/// With `corners` the 28 × 28 grid keeps only its 4-neighbour lattice.
#[test]
fn corners_option_leaves_axis_aligned_grid() {
    let m = 28;
    let full = GraphBuilder::new(GraphConfig::default()).grid(m).unwrap();
    let pruned = GraphBuilder::new(GraphConfig { corners: true, ..Default::default() }).grid(m).unwrap();
    pruned.validate().unwrap();

    assert_eq!(pruned.n_edges(), 2 * m * (m - 1));
    assert!(pruned.n_edges() < full.n_edges());
    for corner in [0, m - 1, m * (m - 1), m * m - 1] {
        assert_eq!(pruned.neighbors(corner).count(), 2, "corner {corner}");
    }
    // Interior vertex: its four axis neighbours, no diagonals.
    let v = m + 1;
    let mut around: Vec<usize> = pruned.neighbors(v).map(|(j, _)| j).collect();
    around.sort_unstable();
    assert_eq!(around, vec![1, m, m + 2, 2 * m + 1]);
}

/// Builder configuration survives a JSON round trip.
#[test]
fn graph_config_json_round_trip() {
    let config =
        GraphConfig { number_edges: 16, metric: Metric::Cosine, noise_level: 0.1, seed: 5, corners: true };
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"cosine\""));
    let back: GraphConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}
