//! # graphconv training
//!
//! Spectral graph-convolution classifiers and the pipeline that trains and
//! compares them. Graphs, coarsening and Laplacians come from
//! [`graphconv_graph`].
//!
//! ## Architecture
//!
//! ```text
//! ExperimentConfig ──► Experiment ──► LaplacianHierarchy
//!       │                   │
//!       │               ModelPerf ──► Trainer ──► SpectralConvModel
//!       │                                │              │
//!       │                         WrappingBatcher   GraphFilter (Fourier | Spline | Chebyshev)
//!       │
//!       └──► ModelConfig (F, K, p, M, optimisation)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graphconv_train::config::ExperimentConfig;
//! use graphconv_train::dataset::{synthetic_communities, SyntheticConfig};
//! use graphconv_train::experiment::{default_roster, Experiment};
//!
//! let (source, splits) = synthetic_communities(200, &SyntheticConfig::default()).unwrap();
//! let config = ExperimentConfig {
//!     coarsening_levels: 2,
//!     models: default_roster(4, 5),
//!     ..ExperimentConfig::default()
//! };
//! let perf = Experiment::new(config).unwrap().run(&source, &splits).unwrap();
//! println!("{perf}");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod filter;
pub mod harness;
pub mod layers;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod params;

// Convenient re-exports at the crate root.
pub use config::{BiasRelu, ExperimentConfig, FilterKind, ModelConfig, NamedModel, PoolKind};
pub use dataset::{DatasetFile, GraphSource, Split, Splits, SyntheticConfig, WrappingBatcher};
pub use error::{ConfigError, TrainError, TrainResult};
pub use experiment::{default_roster, Experiment, Prepared};
pub use filter::GraphFilter;
pub use harness::{FitReport, MetricPoint, ModelPerf, PerfRecord, Trainer};
pub use metrics::Evaluation;
pub use model::{ModelState, SpectralConvModel};
pub use params::Parameters;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
