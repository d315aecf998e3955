//! Classification metrics.
//!
//! | Metric      | Definition                                              |
//! |-------------|---------------------------------------------------------|
//! | accuracy    | fraction of samples whose predicted class is correct    |
//! | weighted F1 | per-class F1 averaged with weights = true class support |
//!
//! Classes with no predicted samples get precision 0 (and likewise recall 0
//! for classes never seen), so such classes contribute `F1 = 0` instead of
//! raising an error.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Result of evaluating a model on one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Mean cross-entropy plus the L2 term.
    pub loss: f64,
    /// Fraction of correct predictions (0-1 scale).
    pub accuracy: f64,
    /// Support-weighted F1 score (0-1 scale).
    pub f1: f64,
    /// Number of samples evaluated.
    pub num_samples: usize,
    /// Predicted class per sample.
    #[serde(skip)]
    pub predictions: Vec<usize>,
}

impl Evaluation {
    /// Build from predictions and ground truth.
    pub fn from_predictions(predictions: Vec<usize>, labels: &[usize], loss: f64) -> Self {
        Evaluation {
            loss,
            accuracy: accuracy(&predictions, labels),
            f1: weighted_f1(&predictions, labels),
            num_samples: labels.len(),
            predictions,
        }
    }

    /// A human-readable summary line suitable for logging.
    pub fn summary(&self) -> String {
        format!(
            "accuracy={:.2}% ({} samples)  f1={:.2}  loss={:.2e}",
            100.0 * self.accuracy,
            self.num_samples,
            100.0 * self.f1,
            self.loss
        )
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Fraction of positions where `predictions` and `labels` agree.
///
/// Returns `0.0` for empty input.
pub fn accuracy(predictions: &[usize], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = predictions.iter().zip(labels).filter(|(p, t)| p == t).count();
    correct as f64 / labels.len() as f64
}

/// Per-class `(precision, recall, f1, support)` for classes `0..n_classes`.
pub fn per_class_scores(
    predictions: &[usize],
    labels: &[usize],
    n_classes: usize,
) -> Vec<(f64, f64, f64, usize)> {
    let mut tp = vec![0usize; n_classes];
    let mut predicted = vec![0usize; n_classes];
    let mut support = vec![0usize; n_classes];
    for (&p, &t) in predictions.iter().zip(labels) {
        if p < n_classes {
            predicted[p] += 1;
        }
        if t < n_classes {
            support[t] += 1;
        }
        if p == t && t < n_classes {
            tp[t] += 1;
        }
    }

    (0..n_classes)
        .map(|c| {
            let precision = ratio(tp[c], predicted[c]);
            let recall = ratio(tp[c], support[c]);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            (precision, recall, f1, support[c])
        })
        .collect()
}

/// F1 averaged over classes, weighted by the number of true samples per class.
pub fn weighted_f1(predictions: &[usize], labels: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let n_classes = predictions.iter().chain(labels).copied().max().map_or(0, |m| m + 1);
    let scores = per_class_scores(predictions, labels, n_classes);
    let total: usize = scores.iter().map(|s| s.3).sum();
    scores.iter().map(|&(_, _, f1, support)| f1 * support as f64).sum::<f64>() / total as f64
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn perfect_predictions() {
        let y = [0, 1, 2, 1];
        assert_eq!(accuracy(&y, &y), 1.0);
        assert_abs_diff_eq!(weighted_f1(&y, &y), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn weighted_f1_matches_hand_computation() {
        let truth = [0, 0, 0, 1];
        let pred = [0, 0, 1, 1];
        // class 0: p = 1, r = 2/3, f1 = 0.8, support 3
        // class 1: p = 1/2, r = 1, f1 = 2/3, support 1
        let expected = (0.8 * 3.0 + 2.0 / 3.0) / 4.0;
        assert_abs_diff_eq!(weighted_f1(&pred, &truth), expected, epsilon = 1e-12);
        assert_eq!(accuracy(&pred, &truth), 0.75);
    }

    #[test]
    fn class_never_predicted_scores_zero() {
        let scores = per_class_scores(&[0, 0], &[0, 1], 2);
        assert_eq!(scores[1], (0.0, 0.0, 0.0, 1));
    }

    #[test]
    fn empty_inputs_give_zero() {
        assert_eq!(accuracy(&[], &[]), 0.0);
        assert_eq!(weighted_f1(&[], &[]), 0.0);
    }
}
