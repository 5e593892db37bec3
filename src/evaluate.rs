// Accuracy of the trained model, averaged uniformly over the eight outputs.
use linfa::prelude::*;
use ndarray::{Array2, Axis};

use crate::error::LayoutError;
use crate::model::{targets_matrix, LayoutModel};
use crate::preprocess::TrainingRow;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub mae: f64,
    pub r2: f64,
}

/// Training-partition scores overstate how well the model generalizes;
/// `test` is the held-out check when a holdout was requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationReport {
    pub train: Metrics,
    pub test: Option<Metrics>,
}

/// Per-output MAE and R² against the ground truth, then the mean of each.
/// An output that is constant in the truth scores R² 1 when predicted exactly, else 0.
pub fn score(truth: &Array2<f64>, pred: &Array2<f64>) -> Result<Metrics, LayoutError> {
    if truth.dim() != pred.dim() || truth.nrows() == 0 {
        return Err(LayoutError::InvalidInput(format!(
            "cannot score predictions of shape {:?} against truth of shape {:?}",
            pred.dim(),
            truth.dim()
        )));
    }

    let mut mae = 0.0;
    let mut r2 = 0.0;
    for (t, p) in truth.axis_iter(Axis(1)).zip(pred.axis_iter(Axis(1))) {
        let (t, p) = (t.to_owned(), p.to_owned());
        mae += p.mean_absolute_error(&t)?;

        let mean = t.mean().unwrap_or(0.0);
        let spread = t.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        r2 += if spread > 0.0 {
            p.r2(&t)?
        } else if p.iter().zip(&t).all(|(a, b)| (a - b).abs() < 1e-12) {
            1.0
        } else {
            0.0
        };
    }
    let k = truth.ncols() as f64;
    Ok(Metrics {
        mae: mae / k,
        r2: r2 / k,
    })
}

pub fn evaluate(model: &LayoutModel, train: &[TrainingRow], test: &[TrainingRow]) -> Result<EvaluationReport, LayoutError> {
    let train_metrics = score(&targets_matrix(train), &model.predict_rows(train))?;
    let test_metrics = if test.is_empty() {
        None
    } else {
        Some(score(&targets_matrix(test), &model.predict_rows(test))?)
    };
    Ok(EvaluationReport {
        train: train_metrics,
        test: test_metrics,
    })
}
