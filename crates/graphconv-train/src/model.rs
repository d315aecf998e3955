//! Spectral graph-convolution classifier.
//!
//! ```text
//! x (batch, n₀) ─► [ GraphFilter ─► bias+ReLU ─► pool(p) ] × len(F)
//!               ─► flatten ─► [ dense ─► ReLU ─► dropout ] × (len(M) − 1)
//!               ─► dense ─► softmax cross-entropy
//! ```
//!
//! Convolution `i` runs on hierarchy level `Σ_{j<i} log2 p_j`; pooling by
//! `p` moves the next convolution `log2 p` levels down. Gradients are
//! computed by hand for every layer, so the whole model is plain `ndarray`.
//!
//! # Lifecycle
//!
//! ```text
//! Built ──train_step──► Training ──freeze──► Evaluated ──into_parameters──► (dropped)
//!   └──────────────────────freeze──────────────┘
//! ```
//!
//! Evaluation and prediction borrow the model immutably and are allowed in
//! every state; `train_step` after `freeze` fails with
//! [`TrainError::ModelFrozen`].

use graphconv_graph::LaplacianHierarchy;
use ndarray::{Array1, Array2, Array3, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::config::{BiasRelu, ModelConfig};
use crate::error::{ConfigError, TrainError, TrainResult};
use crate::filter::{FilterCache, GraphFilter};
use crate::layers::{
    argmax_rows, bias_relu, bias_relu_backward, dense, dense_backward, dropout_mask, flatten,
    pool, pool_backward, softmax_cross_entropy, unflatten, PoolCache,
};
use crate::metrics::Evaluation;
use crate::optimizer::MomentumOptimizer;
use crate::params::{truncated_normal, ConvParams, DenseParams, Parameters, INIT_BIAS};

/// Lifecycle stage of a [`SpectralConvModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// Parameters initialised, no update yet.
    Built,
    /// At least one training step taken.
    Training,
    /// Frozen for evaluation; parameters are read-only from here on.
    Evaluated,
}

/// One convolution block.
#[derive(Debug, Clone)]
struct ConvLayer {
    filter: GraphFilter,
    level: usize,
    pool: usize,
}

impl ConvLayer {
    fn n_vertices(&self) -> usize {
        self.filter.n_vertices()
    }
}

/// Forward-pass values kept for back-propagation.
struct ConvTrace {
    filter: FilterCache,
    activation: Array3<f64>,
    pool: PoolCache,
}

struct DenseTrace {
    input: Array2<f64>,
    /// ReLU output before dropout (hidden layers only).
    activation: Option<Array2<f64>>,
    mask: Option<Array2<f64>>,
}

struct Trace {
    conv: Vec<ConvTrace>,
    dense: Vec<DenseTrace>,
}

/// The immutable part of a model: layer structure and graph operators.
#[derive(Debug, Clone)]
struct Network {
    config: ModelConfig,
    layers: Vec<ConvLayer>,
    input_dim: usize,
    /// `(vertices, feature maps)` entering the flatten.
    flat_shape: (usize, usize),
}

impl Network {
    fn forward(
        &self,
        params: &Parameters,
        x: &ArrayView2<f64>,
        mut rng: Option<&mut StdRng>,
    ) -> TrainResult<(Array2<f64>, Trace)> {
        let batch = x.nrows();
        let mut h = Array3::from_shape_fn((batch, self.input_dim, 1), |(b, v, _)| x[[b, v]]);
        let mut trace = Trace { conv: Vec::with_capacity(self.layers.len()), dense: Vec::new() };

        for (layer, p) in self.layers.iter().zip(&params.conv) {
            let (y, filter) = layer.filter.forward(&h, &p.weights)?;
            let activation = bias_relu(&y, &p.bias);
            let (pooled, pool_cache) = pool(&activation, layer.pool, self.config.pool);
            trace.conv.push(ConvTrace { filter, activation, pool: pool_cache });
            h = pooled;
        }

        let mut z = flatten(&h);
        let last = params.dense.len().saturating_sub(1);
        for (i, d) in params.dense.iter().enumerate() {
            let mut out = dense(&z, &d.weights, &d.bias);
            let input = std::mem::replace(&mut z, Array2::zeros((0, 0)));
            if i == last {
                trace.dense.push(DenseTrace { input, activation: None, mask: None });
                z = out;
                break;
            }
            out.mapv_inplace(|v| v.max(0.0));
            let activation = out.clone();
            let mask = match rng.as_deref_mut() {
                Some(r) if self.config.dropout < 1.0 => {
                    let m = dropout_mask(out.dim(), self.config.dropout, r);
                    out *= &m;
                    Some(m)
                }
                _ => None,
            };
            trace.dense.push(DenseTrace { input, activation: Some(activation), mask });
            z = out;
        }
        Ok((z, trace))
    }

    fn backward(
        &self,
        params: &Parameters,
        trace: &Trace,
        grad_logits: Array2<f64>,
    ) -> TrainResult<Parameters> {
        let mut grads = params.zeros_like();

        let mut g = grad_logits;
        for (i, t) in trace.dense.iter().enumerate().rev() {
            if let Some(mask) = &t.mask {
                g *= mask;
            }
            if let Some(act) = &t.activation {
                g.zip_mut_with(act, |gv, &a| {
                    if a <= 0.0 {
                        *gv = 0.0;
                    }
                });
            }
            let (gx, gw, gb) = dense_backward(&t.input, &params.dense[i].weights, &g);
            grads.dense[i].weights = gw;
            grads.dense[i].bias = gb;
            g = gx;
        }

        let (n, f) = self.flat_shape;
        let mut gh = unflatten(&g, n, f);
        for (i, (layer, t)) in self.layers.iter().zip(&trace.conv).enumerate().rev() {
            let g_act = pool_backward(&gh, layer.pool, layer.n_vertices(), &t.pool);
            let (g_y, g_b) = bias_relu_backward(&t.activation, &g_act, params.conv[i].bias.nrows());
            let (g_x, g_w) = layer.filter.backward(&t.filter, &params.conv[i].weights, &g_y)?;
            grads.conv[i].weights = g_w;
            grads.conv[i].bias = g_b;
            gh = g_x;
        }
        Ok(grads)
    }

    /// Regularized loss and its gradient.
    fn objective(
        &self,
        params: &Parameters,
        x: &ArrayView2<f64>,
        labels: &[usize],
        rng: Option<&mut StdRng>,
    ) -> TrainResult<(f64, Parameters)> {
        let (logits, trace) = self.forward(params, x, rng)?;
        let (data_loss, grad_logits) = softmax_cross_entropy(&logits, labels);
        let mut grads = self.backward(params, &trace, grad_logits)?;
        let reg = self.config.regularization;
        if reg > 0.0 {
            grads.add_weight_decay(params, reg);
        }
        Ok((data_loss + reg * params.l2_penalty(), grads))
    }

    fn check_input(&self, x: &ArrayView2<f64>, labels: Option<&[usize]>) -> TrainResult<()> {
        if x.ncols() != self.input_dim {
            return Err(TrainError::shape_mismatch(
                vec![x.nrows(), self.input_dim],
                vec![x.nrows(), x.ncols()],
            ));
        }
        if let Some(labels) = labels {
            if labels.len() != x.nrows() {
                return Err(TrainError::shape_mismatch(vec![x.nrows()], vec![labels.len()]));
            }
            let n_classes = self.config.n_classes();
            if let Some(&bad) = labels.iter().find(|&&l| l >= n_classes) {
                return Err(ConfigError::invalid_value(
                    "labels",
                    format!("label {bad} out of range for {n_classes} classes"),
                )
                .into());
            }
        }
        Ok(())
    }
}

/// Graph-convolutional classifier over one Laplacian hierarchy.
#[derive(Debug, Clone)]
pub struct SpectralConvModel {
    network: Network,
    params: Parameters,
    optimizer: MomentumOptimizer,
    rng: StdRng,
    state: ModelState,
    steps: usize,
}

impl SpectralConvModel {
    /// Build a model and initialise its parameters.
    ///
    /// # Errors
    ///
    /// - [`TrainError::Config`] if the configuration is invalid or pools
    ///   through more levels than `hierarchy` holds.
    /// - [`TrainError::ShapeMismatch`] if a level cannot be pooled by its
    ///   factor.
    pub fn new(config: ModelConfig, hierarchy: &LaplacianHierarchy) -> TrainResult<Self> {
        config.validate()?;
        if config.levels_required() > hierarchy.depth() {
            return Err(ConfigError::invalid_value(
                "p",
                format!(
                    "pooling needs {} coarsening levels, hierarchy has {}",
                    config.levels_required(),
                    hierarchy.depth()
                ),
            )
            .into());
        }

        let input_dim = hierarchy.level(0)?.n();
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut layers = Vec::with_capacity(config.conv_layers());
        let mut conv_params = Vec::with_capacity(config.conv_layers());
        let mut level = 0usize;
        let mut fin = 1usize;
        let mut flat_shape = (input_dim, 1);
        for i in 0..config.conv_layers() {
            let op = hierarchy.level(level)?.clone();
            let n = op.n();
            let p = config.pooling[i];
            if n % p != 0 {
                return Err(TrainError::shape_mismatch(vec![n - n % p], vec![n]));
            }
            let fout = config.filters[i];
            let filter = GraphFilter::new(config.filter, op, config.orders[i]);
            let k = filter.order();

            let weights = Array3::from_shape_vec((k, fin, fout), truncated_normal(k * fin * fout, &mut rng))
                .map_err(|_| TrainError::shape_mismatch(vec![k, fin, fout], vec![]))?;
            let bias_rows = match config.brelu {
                BiasRelu::B1relu => 1,
                BiasRelu::B2relu => n,
            };
            conv_params.push(ConvParams { weights, bias: Array2::from_elem((bias_rows, fout), INIT_BIAS) });
            layers.push(ConvLayer { filter, level, pool: p });

            debug!(layer = i, level, vertices = n, k, fin, fout, pool = p, "conv layer");
            level += p.trailing_zeros() as usize;
            fin = fout;
            flat_shape = (n / p, fout);
        }

        let mut dense_params = Vec::with_capacity(config.dense.len());
        let mut width = flat_shape.0 * flat_shape.1;
        for &m in &config.dense {
            let weights = Array2::from_shape_vec((width, m), truncated_normal(width * m, &mut rng))
                .map_err(|_| TrainError::shape_mismatch(vec![width, m], vec![]))?;
            dense_params.push(DenseParams { weights, bias: Array1::from_elem(m, INIT_BIAS) });
            width = m;
        }

        let params = Parameters { conv: conv_params, dense: dense_params };
        debug!(parameters = params.n_parameters(), "model built");

        Ok(Self {
            optimizer: MomentumOptimizer::new(config.momentum),
            network: Network { config, layers, input_dim, flat_shape },
            params,
            rng,
            state: ModelState::Built,
            steps: 0,
        })
    }

    /// The configuration this model was built from.
    pub fn config(&self) -> &ModelConfig {
        &self.network.config
    }

    /// Current lifecycle stage.
    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Expected number of columns of the input (padded vertex count).
    pub fn input_dim(&self) -> usize {
        self.network.input_dim
    }

    /// Number of output classes.
    pub fn n_classes(&self) -> usize {
        self.network.config.n_classes()
    }

    /// Hierarchy level of every convolution layer.
    pub fn conv_levels(&self) -> Vec<usize> {
        self.network.layers.iter().map(|l| l.level).collect()
    }

    /// Training steps taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Read-only view of the parameters.
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Mutable access to the parameters.
    ///
    /// # Errors
    ///
    /// [`TrainError::ModelFrozen`] once the model has been frozen.
    pub fn parameters_mut(&mut self) -> TrainResult<&mut Parameters> {
        if self.state == ModelState::Evaluated {
            return Err(TrainError::ModelFrozen);
        }
        Ok(&mut self.params)
    }

    /// Regularized loss and gradients without dropout.
    pub fn gradients(&self, x: &ArrayView2<f64>, labels: &[usize]) -> TrainResult<(f64, Parameters)> {
        self.network.check_input(x, Some(labels))?;
        self.network.objective(&self.params, x, labels, None)
    }

    /// Regularized loss without dropout.
    pub fn loss(&self, x: &ArrayView2<f64>, labels: &[usize]) -> TrainResult<f64> {
        self.network.check_input(x, Some(labels))?;
        let (logits, _) = self.network.forward(&self.params, x, None)?;
        let (data_loss, _) = softmax_cross_entropy(&logits, labels);
        Ok(data_loss + self.network.config.regularization * self.params.l2_penalty())
    }

    /// One optimisation step on a mini-batch with learning rate `lr`.
    ///
    /// Returns the batch loss (with dropout active). A non-finite loss or
    /// gradient is returned without updating the parameters so the caller
    /// can report divergence.
    pub fn train_step(&mut self, x: &ArrayView2<f64>, labels: &[usize], lr: f64) -> TrainResult<f64> {
        if self.state == ModelState::Evaluated {
            return Err(TrainError::ModelFrozen);
        }
        self.network.check_input(x, Some(labels))?;
        self.state = ModelState::Training;

        let (loss, grads) = self.network.objective(&self.params, x, labels, Some(&mut self.rng))?;
        if !loss.is_finite() {
            return Ok(loss);
        }
        if !grads.all_finite() {
            return Ok(f64::NAN);
        }
        self.optimizer.step(&mut self.params, &grads, lr)?;
        self.steps += 1;
        Ok(loss)
    }

    /// Class scores (pre-softmax) for every row of `x`.
    pub fn logits(&self, x: &ArrayView2<f64>) -> TrainResult<Array2<f64>> {
        self.network.check_input(x, None)?;
        let batch = self.network.config.batch_size;
        let mut out = Array2::<f64>::zeros((x.nrows(), self.n_classes()));
        let mut start = 0;
        while start < x.nrows() {
            let end = (start + batch).min(x.nrows());
            let chunk = x.slice(ndarray::s![start..end, ..]);
            let (logits, _) = self.network.forward(&self.params, &chunk, None)?;
            out.slice_mut(ndarray::s![start..end, ..]).assign(&logits);
            start = end;
        }
        Ok(out)
    }

    /// Predicted class of every row of `x`.
    pub fn predict(&self, x: &ArrayView2<f64>) -> TrainResult<Vec<usize>> {
        Ok(argmax_rows(&self.logits(x)?))
    }

    /// Loss, accuracy and weighted F1 on a labelled set.
    ///
    /// # Errors
    ///
    /// [`TrainError::EmptyDataset`] when `x` has no rows.
    pub fn evaluate(&self, x: &ArrayView2<f64>, labels: &[usize]) -> TrainResult<Evaluation> {
        if x.nrows() == 0 {
            return Err(TrainError::EmptyDataset("evaluation"));
        }
        self.network.check_input(x, Some(labels))?;
        let logits = self.logits(x)?;
        let (data_loss, _) = softmax_cross_entropy(&logits, labels);
        let loss = data_loss + self.network.config.regularization * self.params.l2_penalty();
        Ok(Evaluation::from_predictions(argmax_rows(&logits), labels, loss))
    }

    /// Stop training; parameters become read-only.
    pub fn freeze(&mut self) {
        self.state = ModelState::Evaluated;
    }

    /// Consume the model and return its parameters.
    pub fn into_parameters(self) -> Parameters {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterKind;
    use graphconv_graph::{coarsen, Graph, LaplacianKind};

    fn hierarchy() -> LaplacianHierarchy {
        let edges: Vec<_> = (0..7).map(|i| (i, i + 1, 1.0)).collect();
        let g = Graph::from_edges(8, &edges).unwrap();
        let c = coarsen(&g, 2, false).unwrap();
        LaplacianHierarchy::from_coarsening(&c, LaplacianKind::Normalized).unwrap()
    }

    fn config() -> ModelConfig {
        ModelConfig {
            filter: FilterKind::Chebyshev,
            filters: vec![2, 3],
            orders: vec![3, 2],
            pooling: vec![2, 2],
            dense: vec![4, 2],
            batch_size: 4,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn layers_walk_down_the_hierarchy() {
        let h = hierarchy();
        let model = SpectralConvModel::new(config(), &h).unwrap();
        assert_eq!(model.conv_levels(), vec![0, 1]);
        assert_eq!(model.input_dim(), h.sizes()[0]);
        let p = model.parameters();
        assert_eq!(p.conv[0].weights.dim(), (3, 1, 2));
        assert_eq!(p.conv[1].weights.dim(), (2, 2, 3));
        assert_eq!(p.dense[0].weights.nrows(), h.sizes()[2] * 3);
    }

    #[test]
    fn too_much_pooling_is_rejected() {
        let cfg = ModelConfig { pooling: vec![4, 2], ..config() };
        assert!(matches!(SpectralConvModel::new(cfg, &hierarchy()), Err(TrainError::Config(_))));
    }

    #[test]
    fn frozen_model_refuses_training_but_evaluates() {
        let h = hierarchy();
        let mut model = SpectralConvModel::new(config(), &h).unwrap();
        let x = Array2::<f64>::ones((2, model.input_dim()));
        model.train_step(&x.view(), &[0, 1], 0.01).unwrap();
        assert_eq!(model.state(), ModelState::Training);
        model.freeze();
        assert!(matches!(model.train_step(&x.view(), &[0, 1], 0.01), Err(TrainError::ModelFrozen)));
        assert!(model.parameters_mut().is_err());
        assert_eq!(model.evaluate(&x.view(), &[0, 1]).unwrap().num_samples, 2);
    }

    #[test]
    fn wrong_input_width_is_a_shape_error() {
        let model = SpectralConvModel::new(config(), &hierarchy()).unwrap();
        let x = Array2::<f64>::zeros((1, 3));
        assert!(matches!(model.predict(&x.view()), Err(TrainError::ShapeMismatch { .. })));
    }

    #[test]
    fn same_seed_same_parameters() {
        let h = hierarchy();
        let a = SpectralConvModel::new(config(), &h).unwrap();
        let b = SpectralConvModel::new(config(), &h).unwrap();
        assert_eq!(a.parameters(), b.parameters());
    }
}
