//! Integration tests for [`graphconv_train::model::SpectralConvModel`].
//!
//! Gradients are checked against central finite differences of the
//! regularized loss for every filter family and both bias layouts.

use approx::assert_relative_eq;
use graphconv_graph::{coarsen, Graph, LaplacianHierarchy, LaplacianKind};
use graphconv_train::config::{BiasRelu, FilterKind, ModelConfig, PoolKind};
use graphconv_train::error::TrainError;
use graphconv_train::model::{ModelState, SpectralConvModel};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn hierarchy() -> LaplacianHierarchy {
    // Two triangles joined by a bridge, plus a pendant vertex.
    let edges = [
        (0, 1, 1.0),
        (1, 2, 0.5),
        (0, 2, 2.0),
        (2, 3, 0.3),
        (3, 4, 1.0),
        (4, 5, 1.5),
        (3, 5, 0.7),
        (5, 6, 0.9),
    ];
    let g = Graph::from_edges(7, &edges).unwrap();
    let c = coarsen(&g, 2, false).unwrap();
    LaplacianHierarchy::from_coarsening(&c, LaplacianKind::Normalized).unwrap()
}

fn config(filter: FilterKind, brelu: BiasRelu, pool: PoolKind) -> ModelConfig {
    ModelConfig {
        filter,
        brelu,
        pool,
        filters: vec![3, 2],
        orders: vec![3, 2],
        pooling: vec![2, 1],
        dense: vec![5, 3],
        regularization: 1e-2,
        batch_size: 4,
        seed: 3,
        ..ModelConfig::default()
    }
}

fn batch(n: usize, rows: usize, seed: u64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_simple_fn((rows, n), || rng.gen_range(-1.0..1.0));
    let y = (0..rows).map(|i| i % 3).collect();
    (x, y)
}

fn check_gradients(cfg: ModelConfig) {
    let h = hierarchy();
    let mut model = SpectralConvModel::new(cfg, &h).unwrap();
    let (x, y) = batch(model.input_dim(), 4, 11);
    let (_, grads) = model.gradients(&x.view(), &y).unwrap();
    let analytic: Vec<Vec<f64>> =
        grads.tensors().iter().map(|(t, _)| t.iter().copied().collect()).collect();

    let eps = 1e-6;
    for (t, expected) in analytic.iter().enumerate() {
        for (i, &g) in expected.iter().enumerate() {
            let nudge = |model: &mut SpectralConvModel, delta: f64| {
                let mut tensors = model.parameters_mut().unwrap().tensors_mut();
                if let Some(v) = tensors[t].0.iter_mut().nth(i) {
                    *v += delta;
                }
            };
            nudge(&mut model, eps);
            let plus = model.loss(&x.view(), &y).unwrap();
            nudge(&mut model, -2.0 * eps);
            let minus = model.loss(&x.view(), &y).unwrap();
            nudge(&mut model, eps);

            let numeric = (plus - minus) / (2.0 * eps);
            assert_relative_eq!(numeric, g, epsilon = 3e-5, max_relative = 3e-5);
        }
    }
}

#[test]
fn chebyshev_gradients_match_finite_differences() {
    check_gradients(config(FilterKind::Chebyshev, BiasRelu::B1relu, PoolKind::Max));
}

#[test]
fn fourier_gradients_match_finite_differences() {
    check_gradients(config(FilterKind::Fourier, BiasRelu::B2relu, PoolKind::Average));
}

#[test]
fn spline_gradients_match_finite_differences() {
    check_gradients(config(FilterKind::Spline, BiasRelu::B1relu, PoolKind::Average));
}

#[test]
fn softmax_only_gradients_match_finite_differences() {
    let cfg = ModelConfig {
        filters: vec![],
        orders: vec![],
        pooling: vec![],
        ..config(FilterKind::Chebyshev, BiasRelu::B1relu, PoolKind::Max)
    };
    check_gradients(cfg);
}

/// Construction rejects models that pool below the coarsest level.
#[test]
fn pooling_beyond_the_hierarchy_is_rejected() {
    let cfg = ModelConfig {
        pooling: vec![4, 2],
        ..config(FilterKind::Chebyshev, BiasRelu::B1relu, PoolKind::Max)
    };
    let err = SpectralConvModel::new(cfg, &hierarchy()).unwrap_err();
    assert!(matches!(err, TrainError::Config(_)), "got {err}");
}

/// Labels outside `0..n_classes` and ragged batches fail before any update.
#[test]
fn bad_inputs_are_rejected() {
    let mut model =
        SpectralConvModel::new(config(FilterKind::Chebyshev, BiasRelu::B1relu, PoolKind::Max), &hierarchy())
            .unwrap();
    let (x, _) = batch(model.input_dim(), 2, 0);
    assert!(matches!(model.train_step(&x.view(), &[0, 7], 0.1), Err(TrainError::Config(_))));
    assert!(matches!(model.train_step(&x.view(), &[0], 0.1), Err(TrainError::ShapeMismatch { .. })));
    assert_eq!(model.state(), ModelState::Built);
    assert_eq!(model.steps(), 0);
}

/// A training step lowers the loss on the same batch.
#[test]
fn one_step_reduces_the_loss() {
    let cfg = ModelConfig {
        dropout: 1.0,
        momentum: 0.0,
        ..config(FilterKind::Chebyshev, BiasRelu::B1relu, PoolKind::Max)
    };
    let mut model = SpectralConvModel::new(cfg, &hierarchy()).unwrap();
    let (x, y) = batch(model.input_dim(), 6, 4);
    let before = model.loss(&x.view(), &y).unwrap();
    model.train_step(&x.view(), &y, 0.05).unwrap();
    let after = model.loss(&x.view(), &y).unwrap();
    assert!(after < before, "loss went from {before} to {after}");
}

/// Evaluation is read-only and repeatable in every state.
#[test]
fn evaluation_does_not_change_parameters() {
    let h = hierarchy();
    let mut model =
        SpectralConvModel::new(config(FilterKind::Spline, BiasRelu::B2relu, PoolKind::Max), &h).unwrap();
    let (x, y) = batch(model.input_dim(), 5, 9);
    model.train_step(&x.view(), &y, 0.01).unwrap();
    let snapshot = model.parameters().clone();

    let first = model.evaluate(&x.view(), &y).unwrap();
    let second = model.evaluate(&x.view(), &y).unwrap();
    assert_eq!(first, second);
    assert_eq!(model.parameters(), &snapshot);

    model.freeze();
    assert_eq!(model.state(), ModelState::Evaluated);
    assert_eq!(model.predict(&x.view()).unwrap(), first.predictions);
    assert_eq!(model.into_parameters(), snapshot);
}
