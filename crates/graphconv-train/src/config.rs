//! Model and experiment configuration.
//!
//! [`ModelConfig`] describes one classifier: filter family, per-layer
//! feature maps (`F`), filter orders (`K`), pooling factors (`p`), dense
//! widths (`M`) and optimisation hyper-parameters. [`ExperimentConfig`]
//! adds the graph construction and coarsening settings plus a roster of
//! named models compared against the same graph hierarchy.
//!
//! Both are serializable via [`serde`]; the JSON field names follow the
//! usual short notation (`"F"`, `"K"`, `"p"`, `"M"`).
//!
//! # Example
//!
//! ```rust
//! use graphconv_train::config::{FilterKind, ModelConfig};
//!
//! let cfg = ModelConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.filter, FilterKind::Chebyshev);
//! assert_eq!(cfg.levels_required(), 4);
//! ```

use std::collections::HashSet;
use std::path::Path;

use graphconv_graph::GraphConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Layer options
// ---------------------------------------------------------------------------

/// Spectral filter family used by every convolution of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    /// Non-parametric filter on the `K` lowest graph frequencies.
    #[serde(rename = "fourier")]
    Fourier,
    /// Smooth filter: `K` cubic B-spline control points over the spectrum.
    #[serde(rename = "spline")]
    Spline,
    /// Order-`K` Chebyshev polynomial of the rescaled Laplacian.
    #[serde(rename = "chebyshev5")]
    Chebyshev,
}

/// Bias placement before the ReLU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiasRelu {
    /// One bias per output feature map.
    B1relu,
    /// One bias per vertex and feature map.
    B2relu,
}

/// Graph pooling operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    /// Max over windows of `p` consecutive vertices.
    #[serde(rename = "mpool1")]
    Max,
    /// Mean over windows of `p` consecutive vertices.
    #[serde(rename = "apool1")]
    Average,
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// Architecture and optimisation settings of one classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    // -----------------------------------------------------------------------
    // Architecture
    // -----------------------------------------------------------------------
    /// Filter family. Default: **chebyshev5**.
    pub filter: FilterKind,

    /// Bias flavour. Default: **b1relu**.
    pub brelu: BiasRelu,

    /// Pooling operator. Default: **mpool1**.
    pub pool: PoolKind,

    /// Output feature maps of each convolution layer. Default: **[32, 64]**.
    #[serde(rename = "F")]
    pub filters: Vec<usize>,

    /// Filter order (Chebyshev), retained frequencies (Fourier) or control
    /// points (spline) of each convolution layer. Default: **[25, 25]**.
    #[serde(rename = "K")]
    pub orders: Vec<usize>,

    /// Pooling factor after each convolution layer, a power of two (`1`
    /// disables pooling). Default: **[4, 4]**.
    #[serde(rename = "p")]
    pub pooling: Vec<usize>,

    /// Widths of the fully-connected layers; the last one is the number of
    /// classes. Default: **[512, 10]**.
    #[serde(rename = "M")]
    pub dense: Vec<usize>,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Passes over the training set. Default: **20**.
    pub num_epochs: usize,

    /// Mini-batch size. Default: **100**.
    pub batch_size: usize,

    /// Evaluate on the validation split every N steps. Default: **200**.
    pub eval_frequency: usize,

    /// Initial learning rate. Default: **0.02**.
    pub learning_rate: f64,

    /// Multiplicative learning-rate decay, in `(0, 1]`. Default: **0.95**.
    pub decay_rate: f64,

    /// Consumed training samples between two decays. `None` decays once per
    /// epoch. Default: **None**.
    pub decay_steps: Option<usize>,

    /// Momentum `μ` in `[0, 1)`; `0` is plain gradient descent. Default: **0.9**.
    pub momentum: f64,

    /// Keep probability of dropout in the dense layers, in `(0, 1]`.
    /// Default: **0.5**.
    pub dropout: f64,

    /// L2 weight on filter and dense weights. Default: **5e-4**.
    pub regularization: f64,

    /// Seed for initialisation, dropout and batch shuffling. Default: **42**.
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            filter: FilterKind::Chebyshev,
            brelu: BiasRelu::B1relu,
            pool: PoolKind::Max,
            filters: vec![32, 64],
            orders: vec![25, 25],
            pooling: vec![4, 4],
            dense: vec![512, 10],
            num_epochs: 20,
            batch_size: 100,
            eval_frequency: 200,
            learning_rate: 0.02,
            decay_rate: 0.95,
            decay_steps: None,
            momentum: 0.9,
            dropout: 0.5,
            regularization: 5e-4,
            seed: 42,
        }
    }
}

impl ModelConfig {
    /// Load and validate a [`ModelConfig`] from a JSON file.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let cfg: ModelConfig = read_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// Number of convolution layers.
    pub fn conv_layers(&self) -> usize {
        self.filters.len()
    }

    /// Number of output classes (width of the last dense layer).
    pub fn n_classes(&self) -> usize {
        self.dense.last().copied().unwrap_or(0)
    }

    /// Coarsening levels consumed by the pooling layers, `Σ log2 p`.
    pub fn levels_required(&self) -> usize {
        self.pooling.iter().map(|p| p.trailing_zeros() as usize).sum()
    }

    /// Validate all fields and return an error describing the first problem
    /// found.
    ///
    /// # Validated invariants
    ///
    /// - `F`, `K` and `p` have the same length, with positive entries.
    /// - Every pooling factor is a power of two.
    /// - `M` is non-empty, positive, and ends with at least two classes.
    /// - `num_epochs`, `batch_size`, `eval_frequency` are positive.
    /// - `learning_rate > 0`, `decay_rate ∈ (0, 1]`, `decay_steps > 0`.
    /// - `momentum ∈ [0, 1)`, `dropout ∈ (0, 1]`, `regularization >= 0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Convolution layers
        if self.orders.len() != self.filters.len() {
            return Err(ConfigError::invalid_value(
                "K",
                format!("has {} entries but F has {}", self.orders.len(), self.filters.len()),
            ));
        }
        if self.pooling.len() != self.filters.len() {
            return Err(ConfigError::invalid_value(
                "p",
                format!("has {} entries but F has {}", self.pooling.len(), self.filters.len()),
            ));
        }
        if self.filters.iter().any(|&f| f == 0) {
            return Err(ConfigError::invalid_value("F", "feature map counts must be > 0"));
        }
        if self.orders.iter().any(|&k| k == 0) {
            return Err(ConfigError::invalid_value("K", "filter orders must be > 0"));
        }
        if let Some(&p) = self.pooling.iter().find(|p| !p.is_power_of_two()) {
            return Err(ConfigError::invalid_value(
                "p",
                format!("pooling factor {p} is not a power of two"),
            ));
        }

        // Dense layers
        if self.dense.is_empty() {
            return Err(ConfigError::invalid_value("M", "needs at least the output layer"));
        }
        if self.dense.iter().any(|&m| m == 0) {
            return Err(ConfigError::invalid_value("M", "layer widths must be > 0"));
        }
        if self.n_classes() < 2 {
            return Err(ConfigError::invalid_value("M", "the last layer needs at least 2 classes"));
        }

        // Optimisation
        if self.num_epochs == 0 {
            return Err(ConfigError::invalid_value("num_epochs", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if self.eval_frequency == 0 {
            return Err(ConfigError::invalid_value("eval_frequency", "must be > 0"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ConfigError::invalid_value("learning_rate", "must be finite and > 0.0"));
        }
        if !(self.decay_rate > 0.0 && self.decay_rate <= 1.0) {
            return Err(ConfigError::invalid_value("decay_rate", "must be in (0.0, 1.0]"));
        }
        if self.decay_steps == Some(0) {
            return Err(ConfigError::invalid_value("decay_steps", "must be > 0"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::invalid_value("momentum", "must be in [0.0, 1.0)"));
        }
        if !(self.dropout > 0.0 && self.dropout <= 1.0) {
            return Err(ConfigError::invalid_value("dropout", "must be in (0.0, 1.0]"));
        }
        if !(self.regularization >= 0.0 && self.regularization.is_finite()) {
            return Err(ConfigError::invalid_value("regularization", "must be finite and >= 0.0"));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ExperimentConfig
// ---------------------------------------------------------------------------

/// A model configuration with a display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedModel {
    /// Row label in the comparison table.
    pub name: String,
    /// The model settings.
    pub config: ModelConfig,
}

impl NamedModel {
    /// Pair a name with a configuration.
    pub fn new(name: impl Into<String>, config: ModelConfig) -> Self {
        Self { name: name.into(), config }
    }
}

/// Graph, coarsening and model roster of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// k-NN graph construction.
    pub graph: GraphConfig,

    /// Use `I − D^{-½}AD^{-½}` instead of `D − A`. Default: **true**.
    pub normalized_laplacian: bool,

    /// Coarsening steps below the input graph. Default: **4**.
    pub coarsening_levels: usize,

    /// Keep contracted-pair weight as self-loops. Default: **false**.
    pub allow_self_connections: bool,

    /// Models compared on the same hierarchy.
    pub models: Vec<NamedModel>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            graph: GraphConfig::default(),
            normalized_laplacian: true,
            coarsening_levels: 4,
            allow_self_connections: false,
            models: Vec::new(),
        }
    }
}

impl ExperimentConfig {
    /// Load and validate an [`ExperimentConfig`] from a JSON file.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let cfg: ExperimentConfig = read_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// Validate the graph settings and every model.
    ///
    /// Models may not pool through more levels than are coarsened, and
    /// their names must be unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.graph.number_edges == 0 {
            return Err(ConfigError::invalid_value("graph.number_edges", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.graph.noise_level) {
            return Err(ConfigError::invalid_value("graph.noise_level", "must be in [0.0, 1.0]"));
        }
        if self.models.is_empty() {
            return Err(ConfigError::invalid_value("models", "at least one model is required"));
        }

        let mut names = HashSet::new();
        for model in &self.models {
            if !names.insert(model.name.as_str()) {
                return Err(ConfigError::invalid_value(
                    "models",
                    format!("duplicate model name `{}`", model.name),
                ));
            }
            model.config.validate()?;
            if model.config.levels_required() > self.coarsening_levels {
                return Err(ConfigError::invalid_value(
                    "coarsening_levels",
                    format!(
                        "model `{}` pools through {} levels but only {} are coarsened",
                        model.name,
                        model.config.levels_required(),
                        self.coarsening_levels
                    ),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::FileRead { path: path.to_path_buf(), source })?;
    serde_json::from_str(&contents)
        .map_err(|source| ConfigError::ParseError { path: path.to_path_buf(), source })
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| ConfigError::FileRead { path: parent.to_path_buf(), source })?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
    std::fs::write(path, json)
        .map_err(|source| ConfigError::FileRead { path: path.to_path_buf(), source })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        ModelConfig::default().validate().expect("default config should be valid");
    }

    #[test]
    fn softmax_only_model_is_valid() {
        let cfg = ModelConfig {
            filters: vec![],
            orders: vec![],
            pooling: vec![],
            dense: vec![3],
            ..ModelConfig::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.levels_required(), 0);
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("model.json");
        let original = ModelConfig { filter: FilterKind::Spline, decay_steps: Some(500), ..Default::default() };
        original.to_json(&path).unwrap();
        let loaded = ModelConfig::from_json(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn short_field_names_are_used() {
        let json = serde_json::to_value(ModelConfig::default()).unwrap();
        for key in ["F", "K", "p", "M"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(json["filter"], "chebyshev5");
        assert_eq!(json["pool"], "mpool1");
    }

    #[test]
    fn mismatched_layer_lists_are_rejected() {
        let cfg = ModelConfig { orders: vec![25], ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { field: "K", .. })));
    }

    #[test]
    fn parse_error_carries_path() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ModelConfig::from_json(&path), Err(ConfigError::ParseError { .. })));
    }
}
