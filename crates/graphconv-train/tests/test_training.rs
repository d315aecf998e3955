//! End-to-end tests of [`graphconv_train::harness`] and the experiment
//! pipeline on small graphs.

use approx::assert_abs_diff_eq;
use graphconv_graph::{coarsen, Graph, LaplacianHierarchy, LaplacianKind};
use graphconv_train::config::{ExperimentConfig, FilterKind, ModelConfig};
use graphconv_train::dataset::{synthetic_communities, DatasetFile, Split, Splits, SyntheticConfig};
use graphconv_train::error::TrainError;
use graphconv_train::experiment::{default_roster, Experiment};
use graphconv_train::harness::{ModelPerf, Trainer};
use graphconv_train::model::SpectralConvModel;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Two disconnected 4-cliques: vertices `0..4` and `4..8`.
fn two_cliques() -> Graph {
    let mut edges = Vec::new();
    for base in [0, 4] {
        for i in 0..4 {
            for j in (i + 1)..4 {
                edges.push((base + i, base + j, 1.0));
            }
        }
    }
    Graph::from_edges(8, &edges).unwrap()
}

/// Class `c` puts `amplitude` on clique `c`, plus Gaussian noise.
fn clique_split(n: usize, amplitude: f64, seed: u64, constant_label: bool) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.2).unwrap();
    let labels: Vec<usize> = (0..n).map(|i| if constant_label { 0 } else { i % 2 }).collect();
    let data = Array2::from_shape_fn((n, 8), |(s, v)| {
        let on = (v / 4) == labels[s];
        (if on { amplitude } else { 0.0 }) + noise.sample(&mut rng)
    });
    Split::new(data, labels).unwrap()
}

fn clique_setup(constant_label: bool, amplitude: f64) -> (LaplacianHierarchy, Splits) {
    let c = coarsen(&two_cliques(), 2, false).unwrap();
    let h = LaplacianHierarchy::from_coarsening(&c, LaplacianKind::Normalized).unwrap();
    let splits = Splits {
        train: clique_split(100, amplitude, 1, constant_label),
        validation: clique_split(40, amplitude, 2, constant_label),
        test: clique_split(40, amplitude, 3, constant_label),
    }
    .permuted(c.permutation())
    .unwrap();
    (h, splits)
}

fn clique_config() -> ModelConfig {
    ModelConfig {
        filter: FilterKind::Chebyshev,
        filters: vec![4],
        orders: vec![3],
        pooling: vec![2],
        dense: vec![2],
        num_epochs: 50,
        batch_size: 10,
        eval_frequency: 100,
        learning_rate: 0.05,
        decay_rate: 0.95,
        momentum: 0.9,
        dropout: 1.0,
        regularization: 0.0,
        ..ModelConfig::default()
    }
}

/// The two communities are separable; the classifier must find that out.
#[test]
fn two_cliques_are_classified() {
    let (h, splits) = clique_setup(false, 1.0);
    let cfg = clique_config();
    let mut model = SpectralConvModel::new(cfg.clone(), &h).unwrap();
    let report = Trainer::new(cfg).fit(&mut model, &splits.train, &splits.validation).unwrap();

    assert_eq!(report.num_steps, 500);
    assert_eq!(report.steps, 500);
    assert_eq!(report.points.len(), 5);
    assert_eq!(report.last().unwrap().step, 500);

    let test = model.evaluate(&splits.test.view(), &splits.test.labels).unwrap();
    assert!(test.accuracy >= 0.95, "test accuracy {}", test.accuracy);
}

/// The eigenbasis filters learn the same problem: the two lowest
/// frequencies of two disjoint cliques are exactly the class indicators.
#[test]
fn fourier_and_spline_filters_classify_two_cliques() {
    let (h, splits) = clique_setup(false, 1.0);
    for filter in [FilterKind::Fourier, FilterKind::Spline] {
        let cfg = ModelConfig { filter, ..clique_config() };
        let mut model = SpectralConvModel::new(cfg.clone(), &h).unwrap();
        let report = Trainer::new(cfg).fit(&mut model, &splits.train, &splits.validation).unwrap();

        let first = report.points[0].train_loss;
        let last = report.last().unwrap().train_loss;
        assert!(last < first, "{filter:?}: train loss went from {first} to {last}");

        let test = model.evaluate(&splits.test.view(), &splits.test.labels).unwrap();
        assert!(test.accuracy >= 0.9, "{filter:?}: test accuracy {}", test.accuracy);
    }
}

/// With one label everywhere the loss collapses and every prediction is right.
#[test]
fn constant_labels_drive_loss_to_zero() {
    let (h, splits) = clique_setup(true, 1.0);
    let cfg = ModelConfig { num_epochs: 20, ..clique_config() };
    let mut model = SpectralConvModel::new(cfg.clone(), &h).unwrap();
    Trainer::new(cfg).fit(&mut model, &splits.train, &splits.validation).unwrap();

    let test = model.evaluate(&splits.test.view(), &splits.test.labels).unwrap();
    assert_eq!(test.accuracy, 1.0);
    assert!(test.loss < 0.1, "loss {}", test.loss);
}

/// An absurd learning rate overflows; the partial report survives.
#[test]
fn divergence_returns_partial_report() {
    let (h, splits) = clique_setup(false, 10.0);
    let cfg = ModelConfig {
        filters: vec![],
        orders: vec![],
        pooling: vec![],
        learning_rate: 1e308,
        eval_frequency: 1,
        ..clique_config()
    };
    let mut model = SpectralConvModel::new(cfg.clone(), &h).unwrap();
    match Trainer::new(cfg.clone()).fit(&mut model, &splits.train, &splits.validation) {
        Err(TrainError::Diverged { step, loss, partial }) => {
            assert!(!loss.is_finite());
            assert!(step >= 2);
            assert_eq!(partial.steps, step - 1);
            assert_eq!(partial.points.len(), step - 1);
        }
        other => panic!("expected divergence, got {other:?}"),
    }

    let mut perf = ModelPerf::new();
    let record = perf.test("exploding", &cfg, &h, &splits).unwrap();
    assert!(record.diverged_at.is_some());
    assert!(perf.to_string().contains("(diverged)"));
}

/// Learning-rate points follow the staircase schedule, one decay per epoch.
#[test]
fn learning_rate_decays_per_epoch() {
    let (h, splits) = clique_setup(false, 1.0);
    let cfg = ModelConfig { num_epochs: 3, eval_frequency: 10, ..clique_config() };
    let mut model = SpectralConvModel::new(cfg.clone(), &h).unwrap();
    let report = Trainer::new(cfg).fit(&mut model, &splits.train, &splits.validation).unwrap();

    // 10 steps of 10 samples per epoch; point k is at step 10k.
    let rates: Vec<f64> = report.points.iter().map(|p| p.learning_rate).collect();
    assert_eq!(rates.len(), 3);
    assert_abs_diff_eq!(rates[0], 0.05, epsilon = 1e-12);
    assert_abs_diff_eq!(rates[1], 0.05 * 0.95, epsilon = 1e-12);
    assert_abs_diff_eq!(rates[2], 0.05 * 0.95 * 0.95, epsilon = 1e-12);
    assert_abs_diff_eq!(report.points[2].epoch, 3.0, epsilon = 1e-12);
}

/// Empty splits and mis-sized data fail before training starts.
#[test]
fn fit_validates_inputs() {
    let (h, splits) = clique_setup(false, 1.0);
    let cfg = clique_config();
    let mut model = SpectralConvModel::new(cfg.clone(), &h).unwrap();
    let trainer = Trainer::new(cfg);

    let empty = Split::new(Array2::zeros((0, splits.train.n_features())), vec![]).unwrap();
    assert!(matches!(
        trainer.fit(&mut model, &empty, &splits.validation),
        Err(TrainError::EmptyDataset("train"))
    ));

    let narrow = Split::new(Array2::zeros((3, 5)), vec![0, 1, 0]).unwrap();
    assert!(matches!(
        trainer.fit(&mut model, &narrow, &splits.validation),
        Err(TrainError::ShapeMismatch { .. })
    ));
    assert_eq!(model.steps(), 0);
}

/// A mis-sized test split is rejected before any training step runs.
#[test]
fn model_perf_checks_every_split_before_training() {
    let (h, mut splits) = clique_setup(false, 1.0);
    splits.test = Split::new(Array2::zeros((40, 5)), vec![0; 40]).unwrap();
    // Far too many steps to finish if training ran first.
    let cfg = ModelConfig { num_epochs: 1_000_000, ..clique_config() };

    let mut perf = ModelPerf::new();
    let err = perf.test("wide", &cfg, &h, &splits).unwrap_err();
    assert!(matches!(err, TrainError::ShapeMismatch { .. }), "got {err}");
    assert!(perf.records().is_empty());
}

/// Out-of-range labels in any split fail up front, not at the first checkpoint.
#[test]
fn out_of_range_labels_fail_before_training() {
    let (h, mut splits) = clique_setup(false, 1.0);
    splits.validation.labels[0] = 5;
    let cfg = ModelConfig { num_epochs: 1_000_000, ..clique_config() };

    let mut model = SpectralConvModel::new(cfg.clone(), &h).unwrap();
    let err = Trainer::new(cfg.clone()).fit(&mut model, &splits.train, &splits.validation).unwrap_err();
    assert!(matches!(err, TrainError::Config(_)), "got {err}");
    assert_eq!(model.steps(), 0);

    let err = ModelPerf::new().test("labels", &cfg, &h, &splits).unwrap_err();
    assert!(matches!(err, TrainError::Config(_)), "got {err}");
}

/// The whole pipeline runs on the synthetic dataset and writes JSON.
#[test]
fn experiment_runs_default_roster() {
    let dir = tempfile::tempdir().unwrap();
    let (source, splits) = synthetic_communities(60, &SyntheticConfig::default()).unwrap();

    let data_path = dir.path().join("data").join("synthetic.json");
    DatasetFile::save(&data_path, &source, &splits).unwrap();
    let (source, splits) = DatasetFile::load(&data_path).unwrap();

    let mut models = default_roster(4, 3);
    for m in &mut models {
        m.config.num_epochs = 2;
    }
    let cfg = ExperimentConfig { coarsening_levels: 2, models, ..ExperimentConfig::default() };
    let perf = Experiment::new(cfg).unwrap().run(&source, &splits).unwrap();

    assert_eq!(perf.records().len(), 4);
    let table = perf.to_string();
    for name in ["softmax", "fgconv_softmax", "sgconv_softmax", "cgconv_softmax"] {
        assert!(table.contains(name), "missing row {name}:\n{table}");
    }

    let out = dir.path().join("out").join("perf.json");
    perf.to_json(&out).unwrap();
    let back: ModelPerf = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(back.records().len(), 4);
    assert_eq!(back.records()[3].name, "cgconv_softmax");
}

/// Models whose output layer is narrower than the label set are rejected.
#[test]
fn experiment_rejects_too_few_classes() {
    let (source, splits) = synthetic_communities(30, &SyntheticConfig::default()).unwrap();
    let cfg = ExperimentConfig { coarsening_levels: 1, models: default_roster(2, 3), ..ExperimentConfig::default() };
    let err = Experiment::new(cfg).unwrap().run(&source, &splits).unwrap_err();
    assert!(matches!(err, TrainError::Config(_)), "got {err}");
}
