/// Train the multi-output layout model and predict raw ratios for one project.
use linfa::prelude::*;
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::encoder::{FeatureSchema, PredictionInput};
use crate::error::LayoutError;
use crate::forest::{RandomForest, RandomForestParams};
use crate::preprocess::{Shares, TrainingRow, N_TARGETS};

pub const OUTPUT_NAMES: [&str; N_TARGETS] = [
    "public_ratio",
    "saleable_ratio",
    "green_ratio",
    "units_per_rai",
    "townhome_share",
    "semi_detached_share",
    "detached_share",
    "commercial_share",
];

/// The model's eight outputs for one project, in [`OUTPUT_NAMES`] order.
/// The four shares are not normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrediction(pub [f64; N_TARGETS]);

impl RawPrediction {
    fn from_row(row: ArrayView1<f64>) -> Self {
        let mut out = [0.0; N_TARGETS];
        for (o, v) in out.iter_mut().zip(row) {
            *o = *v;
        }
        Self(out)
    }

    pub fn public_ratio(&self) -> f64 {
        self.0[0]
    }

    pub fn saleable_ratio(&self) -> f64 {
        self.0[1]
    }

    pub fn green_ratio(&self) -> f64 {
        self.0[2]
    }

    pub fn units_per_rai(&self) -> f64 {
        self.0[3]
    }

    pub fn unit_shares(&self) -> Shares {
        [self.0[4], self.0[5], self.0[6], self.0[7]]
    }
}

/// Shuffles rows with a fixed seed and holds out `holdout` of them for testing.
/// A holdout of zero trains on everything; at least one row always stays in training.
pub fn split_rows(mut rows: Vec<TrainingRow>, holdout: f64, seed: u64) -> (Vec<TrainingRow>, Vec<TrainingRow>) {
    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);
    let n_test = ((rows.len() as f64 * holdout.clamp(0.0, 1.0)).ceil() as usize)
        .min(rows.len().saturating_sub(1));
    let test = rows.split_off(rows.len() - n_test);
    (rows, test)
}

pub fn targets_matrix(rows: &[TrainingRow]) -> Array2<f64> {
    let mut y = Array2::zeros((rows.len(), N_TARGETS));
    for (i, r) in rows.iter().enumerate() {
        for (j, v) in r.targets.iter().enumerate() {
            y[(i, j)] = *v;
        }
    }
    y
}

/// A trained forest together with the feature schema it was trained against.
#[derive(Debug, Clone)]
pub struct LayoutModel {
    schema: FeatureSchema,
    forest: RandomForest,
}

impl LayoutModel {
    pub fn train(rows: &[TrainingRow], params: &RandomForestParams) -> Result<Self, LayoutError> {
        if rows.is_empty() {
            return Err(LayoutError::EmptyDataset);
        }
        let schema = FeatureSchema::fit(rows.iter().map(|r| &r.input));
        let x = schema.encode_all(rows.iter().map(|r| &r.input));
        let y = targets_matrix(rows);

        let ds = DatasetBase::new(x, y);
        let forest = params.fit(&ds)?;
        log::info!(
            "Trained {} trees on {} rows, {} feature columns",
            forest.n_trees(),
            rows.len(),
            forest.n_features()
        );
        Ok(Self { schema, forest })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn predict(&self, input: &PredictionInput) -> RawPrediction {
        let row = self.schema.encode(input);
        let raw = RawPrediction::from_row(self.forest.predict_row(row.view()).view());
        for (name, v) in OUTPUT_NAMES.iter().zip(raw.0) {
            log::debug!("raw {name} = {v:.4}");
        }
        raw
    }

    /// Predicts every row at once, one output row per training row.
    pub fn predict_rows(&self, rows: &[TrainingRow]) -> Array2<f64> {
        let x = self.schema.encode_all(rows.iter().map(|r| &r.input));
        self.forest.predict(&x)
    }

    /// (feature, importance) pairs, most important first.
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        let mut vec: Vec<(String, f64)> = self
            .schema
            .columns()
            .iter()
            .cloned()
            .zip(self.forest.feature_importances().iter().copied())
            .collect();
        vec.sort_by(|a, b| b.1.total_cmp(&a.1));
        vec
    }
}
