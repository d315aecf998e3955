//! Training loop and model comparison.
//!
//! [`Trainer::fit`] runs mini-batch momentum SGD with a staircase learning
//! rate and periodic validation. [`ModelPerf`] trains several
//! configurations on the same hierarchy and tabulates the results.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use graphconv_graph::LaplacianHierarchy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::dataset::{Split, Splits, WrappingBatcher};
use crate::error::{ConfigError, TrainError, TrainResult};
use crate::metrics::Evaluation;
use crate::model::SpectralConvModel;
use crate::optimizer::ExponentialDecay;

// ---------------------------------------------------------------------------
// FitReport
// ---------------------------------------------------------------------------

/// One validation checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Step just completed (1-based).
    pub step: usize,
    /// Fractional epochs consumed.
    pub epoch: f64,
    /// Learning rate used at this step.
    pub learning_rate: f64,
    /// Mean training loss since the previous point.
    pub train_loss: f64,
    /// Validation metrics.
    pub validation: Evaluation,
    /// Seconds since `fit` started.
    pub elapsed_secs: f64,
}

/// Everything recorded by [`Trainer::fit`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Validation checkpoints in step order.
    pub points: Vec<MetricPoint>,
    /// Steps completed.
    pub steps: usize,
    /// Steps planned.
    pub num_steps: usize,
    /// Wall time of the whole fit.
    pub elapsed_secs: f64,
}

impl FitReport {
    /// Latest checkpoint.
    pub fn last(&self) -> Option<&MetricPoint> {
        self.points.last()
    }

    /// Best validation accuracy over all checkpoints.
    pub fn best_validation_accuracy(&self) -> Option<f64> {
        self.points.iter().map(|p| p.validation.accuracy).reduce(f64::max)
    }

    /// Training loss at every checkpoint.
    pub fn loss_curve(&self) -> Vec<(usize, f64)> {
        self.points.iter().map(|p| (p.step, p.train_loss)).collect()
    }

    /// Mean wall time per completed step, in milliseconds.
    pub fn ms_per_step(&self) -> f64 {
        if self.steps == 0 {
            0.0
        } else {
            1000.0 * self.elapsed_secs / self.steps as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Runs the optimisation loop for one [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct Trainer {
    config: ModelConfig,
}

impl Trainer {
    /// Create a trainer.
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// `⌊num_epochs × n_train / batch_size⌋`.
    pub fn num_steps(&self, n_train: usize) -> usize {
        self.config.num_epochs * n_train / self.config.batch_size.max(1)
    }

    /// Train `model` on `train`, validating on `validation`.
    ///
    /// # Errors
    ///
    /// - [`TrainError::EmptyDataset`], [`TrainError::ShapeMismatch`] or an
    ///   out-of-range label ([`TrainError::Config`]) before the first step.
    /// - [`TrainError::Diverged`] when a batch loss or gradient is not
    ///   finite; the error carries the report up to that step.
    pub fn fit(
        &self,
        model: &mut SpectralConvModel,
        train: &Split,
        validation: &Split,
    ) -> TrainResult<FitReport> {
        if train.is_empty() {
            return Err(TrainError::EmptyDataset("train"));
        }
        if validation.is_empty() {
            return Err(TrainError::EmptyDataset("validation"));
        }
        let n_classes = model.n_classes();
        for (name, split) in [("train", train), ("validation", validation)] {
            if split.n_features() != model.input_dim() {
                return Err(TrainError::shape_mismatch(
                    vec![split.len(), model.input_dim()],
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

        let cfg = &self.config;
        let n_train = train.len();
        let num_steps = self.num_steps(n_train);
        let schedule = ExponentialDecay::new(
            cfg.learning_rate,
            cfg.decay_rate,
            cfg.decay_steps.unwrap_or(n_train),
        );
        let mut batcher = WrappingBatcher::new(n_train, cfg.batch_size, cfg.seed)?;
        let eval_frequency = cfg.eval_frequency.max(1);

        info!(
            steps = num_steps,
            n_train,
            batch_size = cfg.batch_size,
            learning_rate = cfg.learning_rate,
            "starting training"
        );

        let start = Instant::now();
        let mut report = FitReport { num_steps, ..FitReport::default() };
        let mut loss_sum = 0.0;
        let mut loss_count = 0usize;

        for step in 1..=num_steps {
            let lr = schedule.learning_rate((step - 1) * cfg.batch_size);
            let (x, y) = train.batch(&batcher.next_batch());
            let loss = model.train_step(&x.view(), &y, lr)?;
            if !loss.is_finite() {
                report.elapsed_secs = start.elapsed().as_secs_f64();
                warn!(step, loss, "training diverged");
                return Err(TrainError::Diverged { step, loss, partial: Box::new(report) });
            }
            report.steps = step;
            loss_sum += loss;
            loss_count += 1;

            if step % eval_frequency == 0 || step == num_steps {
                let validation = model.evaluate(&validation.view(), &validation.labels)?;
                let point = MetricPoint {
                    step,
                    epoch: (step * cfg.batch_size) as f64 / n_train as f64,
                    learning_rate: lr,
                    train_loss: loss_sum / loss_count as f64,
                    elapsed_secs: start.elapsed().as_secs_f64(),
                    validation,
                };
                info!(
                    "step {step}/{num_steps} (epoch {:.2}): lr={lr:.2e} train_loss={:.2e} | validation {}",
                    point.epoch,
                    point.train_loss,
                    point.validation.summary()
                );
                report.points.push(point);
                loss_sum = 0.0;
                loss_count = 0;
            }
        }

        report.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// ModelPerf
// ---------------------------------------------------------------------------

/// Results of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfRecord {
    /// Row label.
    pub name: String,
    /// Configuration that produced the row.
    pub config: ModelConfig,
    /// Metrics on the training split.
    pub train: Evaluation,
    /// Metrics on the validation split.
    pub validation: Evaluation,
    /// Metrics on the test split.
    pub test: Evaluation,
    /// Training history.
    pub fit: FitReport,
    /// Step at which training diverged, if it did.
    pub diverged_at: Option<usize>,
    /// Number of trainable scalars.
    pub n_parameters: usize,
    /// Wall time of build, fit and evaluation.
    pub wall_secs: f64,
}

/// Comparison of several configurations trained on the same hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPerf {
    records: Vec<PerfRecord>,
}

impl ModelPerf {
    /// Empty comparison.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows recorded so far.
    pub fn records(&self) -> &[PerfRecord] {
        &self.records
    }

    /// Build, fit and evaluate one configuration, appending its row.
    ///
    /// Every split is checked against the model's input width and class
    /// count before the first step. A diverged fit still produces a row with
    /// the partial history and the metrics of the last finite parameters.
    /// Any other error aborts.
    pub fn test(
        &mut self,
        name: &str,
        config: &ModelConfig,
        hierarchy: &LaplacianHierarchy,
        splits: &Splits,
    ) -> TrainResult<&PerfRecord> {
        let start = Instant::now();
        info!(model = name, "building model");
        let mut model = SpectralConvModel::new(config.clone(), hierarchy)?;
        splits.check_compatible(model.input_dim(), model.n_classes())?;
        let trainer = Trainer::new(config.clone());

        let (fit, diverged_at) = match trainer.fit(&mut model, &splits.train, &splits.validation) {
            Ok(report) => (report, None),
            Err(TrainError::Diverged { step, loss, partial }) => {
                warn!(model = name, step, loss, "recording diverged run");
                (*partial, Some(step))
            }
            Err(e) => return Err(e),
        };

        model.freeze();
        let train = model.evaluate(&splits.train.view(), &splits.train.labels)?;
        let validation = model.evaluate(&splits.validation.view(), &splits.validation.labels)?;
        let test = model.evaluate(&splits.test.view(), &splits.test.labels)?;
        info!(model = name, "train {}", train.summary());
        info!(model = name, "test  {}", test.summary());

        let record = PerfRecord {
            name: name.to_string(),
            config: config.clone(),
            n_parameters: model.parameters().n_parameters(),
            train,
            validation,
            test,
            fit,
            diverged_at,
            wall_secs: start.elapsed().as_secs_f64(),
        };
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Pretty-printed JSON.
    pub fn to_json_string(&self) -> TrainResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the comparison as JSON, creating parent directories.
    pub fn to_json(&self, path: &Path) -> TrainResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrainError::io(parent, e))?;
        }
        std::fs::write(path, self.to_json_string()?).map_err(|e| TrainError::io(path, e))
    }
}

impl fmt::Display for ModelPerf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  accuracy (train / val / test)   F1 (test)   loss (train / test)   time / step    name")?;
        for r in &self.records {
            writeln!(
                f,
                "{:>7.2} {:>7.2} {:>7.2}          {:>6.2}      {:>8.2e} {:>8.2e}   {:>8.1} ms    {}{}",
                100.0 * r.train.accuracy,
                100.0 * r.validation.accuracy,
                100.0 * r.test.accuracy,
                100.0 * r.test.f1,
                r.train.loss,
                r.test.loss,
                r.fit.ms_per_step(),
                r.name,
                if r.diverged_at.is_some() { " (diverged)" } else { "" }
            )?;
        }
        Ok(())
    }
}
