//! Labelled splits, mini-batch sampling and dataset files.
//!
//! - [`Split`]: one labelled matrix, one row per sample and one column per
//!   graph vertex.
//! - [`Splits`]: train / validation / test.
//! - [`WrappingBatcher`]: seeded shuffled batches that wrap across epochs.
//! - [`DatasetFile`]: the JSON layout read by the `train` binary.
//! - [`synthetic_communities`]: a deterministic toy problem for `--dry-run`.
//!
//! # Dataset file layout
//!
//! ```json
//! {
//!   "grid_side": 28,
//!   "train": { "data": [[0.0, 0.1, ...], ...], "labels": [3, ...] },
//!   "val":   { "data": [...], "labels": [...] },
//!   "test":  { "data": [...], "labels": [...] }
//! }
//! ```
//!
//! Instead of `grid_side`, a file may carry `vertex_features` (one row per
//! vertex) from which a k-NN graph is built.

use std::collections::VecDeque;
use std::path::Path;

use graphconv_graph::Permutation;
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, TrainError, TrainResult};

// ---------------------------------------------------------------------------
// Split
// ---------------------------------------------------------------------------

/// Samples and their class labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// `(samples, vertices)`.
    pub data: Array2<f64>,
    /// One label per row of `data`.
    pub labels: Vec<usize>,
}

impl Split {
    /// Pair a data matrix with its labels.
    ///
    /// # Errors
    ///
    /// [`TrainError::ShapeMismatch`] when the label count differs from the
    /// number of rows.
    pub fn new(data: Array2<f64>, labels: Vec<usize>) -> TrainResult<Self> {
        if data.nrows() != labels.len() {
            return Err(TrainError::shape_mismatch(vec![data.nrows()], vec![labels.len()]));
        }
        Ok(Self { data, labels })
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// `true` when the split has no samples.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of columns (vertices).
    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Largest label plus one, `0` when empty.
    pub fn n_classes(&self) -> usize {
        self.labels.iter().max().map_or(0, |m| m + 1)
    }

    /// Read-only view of the data.
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Rows `indices` and their labels.
    pub fn batch(&self, indices: &[usize]) -> (Array2<f64>, Vec<usize>) {
        let data = self.data.select(Axis(0), indices);
        let labels = indices.iter().map(|&i| self.labels[i]).collect();
        (data, labels)
    }

    /// Reorder the columns into coarsening order, zero-filling fake vertices.
    pub fn permuted(&self, permutation: &Permutation) -> TrainResult<Self> {
        Ok(Self { data: permutation.apply(&self.data.view())?, labels: self.labels.clone() })
    }
}

/// The three splits of one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Splits {
    /// Optimised on.
    pub train: Split,
    /// Monitored during training.
    pub validation: Split,
    /// Reported once at the end.
    pub test: Split,
}

impl Splits {
    /// Check that every split is non-empty and all have the same width.
    pub fn validate(&self) -> TrainResult<()> {
        for (name, split) in self.named() {
            if split.is_empty() {
                return Err(TrainError::EmptyDataset(name));
            }
        }
        let width = self.train.n_features();
        for (_, split) in self.named() {
            if split.n_features() != width {
                return Err(TrainError::shape_mismatch(vec![width], vec![split.n_features()]));
            }
        }
        Ok(())
    }

    /// [`validate`](Self::validate), then check that every split fits a model
    /// with `input_dim` columns and `n_classes` outputs.
    ///
    /// # Errors
    ///
    /// [`TrainError::ShapeMismatch`] on a width other than `input_dim`;
    /// [`TrainError::Config`] on a label `>= n_classes`.
    pub fn check_compatible(&self, input_dim: usize, n_classes: usize) -> TrainResult<()> {
        self.validate()?;
        for (name, split) in self.named() {
            if split.n_features() != input_dim {
                return Err(TrainError::shape_mismatch(
                    vec![split.len(), input_dim],
                    vec![split.len(), split.n_features()],
                ));
            }
            if let Some(&bad) = split.labels.iter().find(|&&l| l >= n_classes) {
                return Err(ConfigError::invalid_value(
                    "labels",
                    format!("{name} label {bad} out of range for {n_classes} classes"),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Apply `permutation` to every split.
    pub fn permuted(&self, permutation: &Permutation) -> TrainResult<Self> {
        Ok(Self {
            train: self.train.permuted(permutation)?,
            validation: self.validation.permuted(permutation)?,
            test: self.test.permuted(permutation)?,
        })
    }

    /// Number of classes seen in any split.
    pub fn n_classes(&self) -> usize {
        self.named().iter().map(|(_, s)| s.n_classes()).max().unwrap_or(0)
    }

    fn named(&self) -> [(&'static str, &Split); 3] {
        [("train", &self.train), ("validation", &self.validation), ("test", &self.test)]
    }
}

// ---------------------------------------------------------------------------
// WrappingBatcher
// ---------------------------------------------------------------------------

/// Draws mini-batches from a queue of shuffled indices.
///
/// Whenever fewer than `batch_size` indices remain, a fresh permutation of
/// `0..n` is appended, so the last batch of an epoch is completed with the
/// first indices of the next one and every batch is full.
#[derive(Debug, Clone)]
pub struct WrappingBatcher {
    n: usize,
    batch_size: usize,
    queue: VecDeque<usize>,
    rng: StdRng,
}

impl WrappingBatcher {
    /// Create a batcher over `n` samples.
    ///
    /// # Errors
    ///
    /// - [`TrainError::EmptyDataset`] when `n == 0`.
    /// - [`TrainError::Config`] when `batch_size == 0`.
    pub fn new(n: usize, batch_size: usize, seed: u64) -> TrainResult<Self> {
        if n == 0 {
            return Err(TrainError::EmptyDataset("train"));
        }
        if batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0").into());
        }
        Ok(Self { n, batch_size, queue: VecDeque::new(), rng: StdRng::seed_from_u64(seed) })
    }

    /// Indices of the next batch.
    pub fn next_batch(&mut self) -> Vec<usize> {
        while self.queue.len() < self.batch_size {
            let mut order: Vec<usize> = (0..self.n).collect();
            order.shuffle(&mut self.rng);
            self.queue.extend(order);
        }
        self.queue.drain(..self.batch_size).collect()
    }
}

// ---------------------------------------------------------------------------
// DatasetFile
// ---------------------------------------------------------------------------

/// Row-major split as stored in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitFile {
    /// One inner vector per sample.
    pub data: Vec<Vec<f64>>,
    /// One label per sample.
    pub labels: Vec<usize>,
}

impl SplitFile {
    fn into_split(self, name: &'static str) -> TrainResult<Split> {
        let width = self.data.first().map_or(0, Vec::len);
        if let Some(row) = self.data.iter().find(|r| r.len() != width) {
            return Err(ConfigError::invalid_value(
                "data",
                format!("ragged `{name}` split: rows of {width} and {} values", row.len()),
            )
            .into());
        }
        let rows = self.data.len();
        let flat: Vec<f64> = self.data.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((rows, width), flat)
            .map_err(|_| TrainError::shape_mismatch(vec![rows, width], vec![]))?;
        Split::new(data, self.labels)
    }

    fn from_split(split: &Split) -> Self {
        Self {
            data: split.data.outer_iter().map(|r| r.to_vec()).collect(),
            labels: split.labels.clone(),
        }
    }
}

/// Where the graph of a dataset comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphSource {
    /// Vertices are the pixels of an `m × m` grid.
    Grid(usize),
    /// One feature row per vertex; a k-NN graph is built over them.
    Features(Array2<f64>),
}

/// A dataset on disk: three splits plus the graph source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetFile {
    /// Side of a square pixel grid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_side: Option<usize>,
    /// Per-vertex features for k-NN graph construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_features: Option<Vec<Vec<f64>>>,
    /// Training split.
    pub train: SplitFile,
    /// Validation split.
    pub val: SplitFile,
    /// Test split.
    pub test: SplitFile,
}

impl DatasetFile {
    /// Read a dataset from JSON.
    pub fn load(path: &Path) -> TrainResult<(GraphSource, Splits)> {
        let contents = std::fs::read_to_string(path).map_err(|e| TrainError::io(path, e))?;
        let file: DatasetFile = serde_json::from_str(&contents)?;
        let (source, splits) = file.into_parts()?;
        info!(
            path = %path.display(),
            train = splits.train.len(),
            validation = splits.validation.len(),
            test = splits.test.len(),
            "loaded dataset"
        );
        Ok((source, splits))
    }

    /// Write a dataset as JSON, creating parent directories.
    pub fn save(path: &Path, source: &GraphSource, splits: &Splits) -> TrainResult<()> {
        let (grid_side, vertex_features) = match source {
            GraphSource::Grid(m) => (Some(*m), None),
            GraphSource::Features(f) => (None, Some(f.outer_iter().map(|r| r.to_vec()).collect())),
        };
        let file = DatasetFile {
            grid_side,
            vertex_features,
            train: SplitFile::from_split(&splits.train),
            val: SplitFile::from_split(&splits.validation),
            test: SplitFile::from_split(&splits.test),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrainError::io(parent, e))?;
        }
        let json = serde_json::to_string(&file)?;
        std::fs::write(path, json).map_err(|e| TrainError::io(path, e))
    }

    /// Convert into a graph source and validated splits.
    pub fn into_parts(self) -> TrainResult<(GraphSource, Splits)> {
        let source = match (self.grid_side, self.vertex_features) {
            (Some(m), None) => GraphSource::Grid(m),
            (None, Some(rows)) => {
                let features = SplitFile { labels: vec![0; rows.len()], data: rows }
                    .into_split("vertex_features")?
                    .data;
                GraphSource::Features(features)
            }
            _ => {
                return Err(ConfigError::invalid_value(
                    "grid_side",
                    "exactly one of `grid_side` and `vertex_features` is required",
                )
                .into())
            }
        };
        let splits = Splits {
            train: self.train.into_split("train")?,
            validation: self.val.into_split("val")?,
            test: self.test.into_split("test")?,
        };
        splits.validate()?;

        let expected = match &source {
            GraphSource::Grid(m) => m * m,
            GraphSource::Features(f) => f.nrows(),
        };
        if splits.train.n_features() != expected {
            return Err(TrainError::shape_mismatch(vec![expected], vec![splits.train.n_features()]));
        }
        Ok((source, splits))
    }
}

// ---------------------------------------------------------------------------
// Synthetic communities
// ---------------------------------------------------------------------------

/// Parameters of [`synthetic_communities`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Side of the pixel grid. Default: **8**.
    pub grid_side: usize,
    /// Number of classes, each owning one horizontal band of the grid.
    /// Default: **4**.
    pub n_classes: usize,
    /// Standard deviation of the additive noise. Default: **0.3**.
    pub noise_std: f64,
    /// Seed. Default: **7**.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig { grid_side: 8, n_classes: 4, noise_std: 0.3, seed: 7 }
    }
}

/// Signals on an `m × m` grid whose class is the band of rows carrying the
/// energy: sample `s` of class `c` is `1` on the rows of band `c`, `0`
/// elsewhere, plus Gaussian noise. Labels cycle through the classes and the
/// samples are split 60 / 20 / 20.
pub fn synthetic_communities(n_samples: usize, config: &SyntheticConfig) -> TrainResult<(GraphSource, Splits)> {
    let m = config.grid_side;
    let c = config.n_classes;
    if m == 0 || c == 0 || c > m {
        return Err(ConfigError::invalid_value("n_classes", format!("need 0 < n_classes ≤ grid_side, got {c} and {m}")).into());
    }
    if n_samples < 5 {
        return Err(TrainError::EmptyDataset("synthetic"));
    }
    let noise = Normal::new(0.0, config.noise_std)
        .map_err(|e| ConfigError::invalid_value("noise_std", e.to_string()))?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let n = m * m;
    let labels: Vec<usize> = (0..n_samples).map(|s| s % c).collect();
    let data = Array2::from_shape_fn((n_samples, n), |(s, v)| {
        let row = v / m;
        let band = row * c / m;
        let signal = if band == labels[s] { 1.0 } else { 0.0 };
        signal + noise.sample(&mut rng)
    });

    let n_train = n_samples * 3 / 5;
    let n_val = (n_samples - n_train) / 2;
    let take = |range: std::ops::Range<usize>| -> TrainResult<Split> {
        let idx: Vec<usize> = range.collect();
        let (d, l) = (data.select(Axis(0), &idx), idx.iter().map(|&i| labels[i]).collect());
        Split::new(d, l)
    };
    let splits = Splits {
        train: take(0..n_train)?,
        validation: take(n_train..n_train + n_val)?,
        test: take(n_train + n_val..n_samples)?,
    };
    debug!(n_samples, grid_side = m, classes = c, "generated synthetic communities");
    Ok((GraphSource::Grid(m), splits))
}
