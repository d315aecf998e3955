//! End-to-end pipeline: graph → coarsening → Laplacians → models.
//!
//! ```text
//! GraphSource ─► GraphBuilder ─► Coarsener ─► LaplacianHierarchy
//!                                   │
//! Splits ──── Permutation::apply ◄──┘ ─► ModelPerf::test × models
//! ```

use graphconv_graph::{
    Coarsener, Graph, GraphBuilder, LaplacianHierarchy, LaplacianKind, Permutation,
};
use tracing::info;

use crate::config::{ExperimentConfig, FilterKind, ModelConfig, NamedModel};
use crate::dataset::{GraphSource, Splits};
use crate::error::{ConfigError, TrainError, TrainResult};
use crate::harness::ModelPerf;

/// Graph, hierarchy and permuted data, ready for training.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// The input graph before coarsening.
    pub graph: Graph,
    /// Laplacians of every level.
    pub hierarchy: LaplacianHierarchy,
    /// Input vertex → position mapping.
    pub permutation: Permutation,
    /// Splits with columns in coarsening order.
    pub splits: Splits,
}

/// One experiment: a graph, its hierarchy and a roster of models.
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
}

impl Experiment {
    /// Validate `config` and create the experiment.
    pub fn new(config: ExperimentConfig) -> TrainResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration.
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Build the input graph (with noise, if configured).
    pub fn build_graph(&self, source: &GraphSource) -> TrainResult<Graph> {
        let builder = GraphBuilder::new(self.config.graph.clone());
        let graph = match source {
            GraphSource::Grid(m) => builder.grid(*m)?,
            GraphSource::Features(features) => builder.build(&features.view())?,
        };
        Ok(graph)
    }

    /// Build the graph, coarsen it and permute every split.
    pub fn prepare(&self, source: &GraphSource, splits: &Splits) -> TrainResult<Prepared> {
        splits.validate()?;
        let graph = self.build_graph(source)?;
        if splits.train.n_features() != graph.n_vertices() {
            return Err(TrainError::shape_mismatch(
                vec![graph.n_vertices()],
                vec![splits.train.n_features()],
            ));
        }

        let coarsening = Coarsener::new()
            .with_self_connections(self.config.allow_self_connections)
            .coarsen(&graph, self.config.coarsening_levels)?;
        let kind = LaplacianKind::from_flag(self.config.normalized_laplacian);
        let hierarchy = LaplacianHierarchy::from_coarsening(&coarsening, kind)?;
        let permutation = coarsening.permutation().clone();
        let splits = splits.permuted(&permutation)?;

        info!(
            vertices = graph.n_vertices(),
            padded = permutation.len(),
            sizes = ?hierarchy.sizes(),
            "prepared hierarchy"
        );
        Ok(Prepared { graph, hierarchy, permutation, splits })
    }

    /// Run every model of the roster and return the comparison.
    pub fn run(&self, source: &GraphSource, splits: &Splits) -> TrainResult<ModelPerf> {
        let prepared = self.prepare(source, splits)?;
        let classes = prepared.splits.n_classes();
        let mut perf = ModelPerf::new();
        for model in &self.config.models {
            if model.config.n_classes() < classes {
                return Err(ConfigError::invalid_value(
                    "M",
                    format!(
                        "model `{}` outputs {} classes, data has {classes}",
                        model.name,
                        model.config.n_classes()
                    ),
                )
                .into());
            }
            perf.test(&model.name, &model.config, &prepared.hierarchy, &prepared.splits)?;
        }
        Ok(perf)
    }
}

/// Softmax baseline plus one single-layer model per filter family.
///
/// `n_classes` sets the output width; `k` the filter order.
pub fn default_roster(n_classes: usize, k: usize) -> Vec<NamedModel> {
    let base = ModelConfig {
        filters: vec![],
        orders: vec![],
        pooling: vec![],
        dense: vec![n_classes],
        num_epochs: 10,
        batch_size: 20,
        eval_frequency: 30,
        learning_rate: 0.02,
        dropout: 1.0,
        ..ModelConfig::default()
    };
    let conv = |filter: FilterKind| ModelConfig {
        filter,
        filters: vec![8],
        orders: vec![k],
        pooling: vec![2],
        ..base.clone()
    };
    vec![
        NamedModel::new("softmax", base.clone()),
        NamedModel::new("fgconv_softmax", conv(FilterKind::Fourier)),
        NamedModel::new("sgconv_softmax", conv(FilterKind::Spline)),
        NamedModel::new("cgconv_softmax", conv(FilterKind::Chebyshev)),
    ]
}
