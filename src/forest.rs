//! Multi-output random forest regression.
//!
//! Each tree is grown on a bootstrap sample and splits on the threshold that
//! most reduces the summed squared error over all outputs. Leaves store the
//! mean target vector of their samples; the forest averages its trees.
//!
//! Fitting and prediction go through linfa's `Fit` and `PredictInplace`
//! traits, so the forest is used like any other linfa estimator:
//!
//! ```ignore
//! let forest = RandomForestParams::new().n_trees(50).fit(&dataset)?;
//! let y = forest.predict(&x);
//! ```

use linfa::traits::{Fit, PredictInplace};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("not enough samples to fit a forest")]
    NotEnoughSamples,
    #[error("records have {records} rows but targets have {targets}")]
    ShapeMismatch { records: usize, targets: usize },
    #[error("invalid forest parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Linfa(#[from] linfa::Error),
}

/// Hyperparameters for [`RandomForest`].
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForestParams {
    n_trees: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    bootstrap: bool,
    seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl RandomForestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_trees(mut self, n: usize) -> Self {
        self.n_trees = n;
        self
    }

    pub fn max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn bootstrap(mut self, on: bool) -> Self {
        self.bootstrap = on;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn check(&self) -> Result<(), ForestError> {
        if self.n_trees == 0 {
            return Err(ForestError::InvalidParams("n_trees must be at least 1".into()));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidParams(
                "min_samples_split must be at least 2".into(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        value: Array1<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict_row(&self, row: ArrayView1<f64>) -> &Array1<f64> {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Sum of squared deviations over all outputs, from running sums.
fn sse(sum: &Array1<f64>, sum_sq: &Array1<f64>, n: usize) -> f64 {
    let n = n as f64;
    sum.iter()
        .zip(sum_sq)
        .map(|(s, sq)| sq - s * s / n)
        .sum()
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView2<'a, f64>,
    params: &'a RandomForestParams,
    nodes: Vec<Node>,
    importances: Array1<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn new(x: ArrayView2<'a, f64>, y: ArrayView2<'a, f64>, params: &'a RandomForestParams) -> Self {
        Self {
            x,
            y,
            params,
            nodes: Vec::new(),
            importances: Array1::zeros(x.ncols()),
        }
    }

    fn leaf_value(&self, indices: &[usize]) -> Array1<f64> {
        let mut value = Array1::zeros(self.y.ncols());
        for &i in indices {
            value += &self.y.row(i);
        }
        value / indices.len() as f64
    }

    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let value = self.leaf_value(&indices);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        let depth_ok = self.params.max_depth.map_or(true, |d| depth < d);
        if !depth_ok || indices.len() < self.params.min_samples_split {
            return id;
        }
        let Some(split) = self.best_split(&indices) else {
            return id;
        };

        let x = self.x;
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[[i, split.feature]] <= split.threshold);
        self.importances[split.feature] += split.gain;

        let left = self.grow(left, depth + 1);
        let right = self.grow(right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, indices: &[usize]) -> Option<Split> {
        let n = indices.len();
        let k = self.y.ncols();
        let min_leaf = self.params.min_samples_leaf;

        let mut total = Array1::<f64>::zeros(k);
        let mut total_sq = Array1::<f64>::zeros(k);
        for &i in indices {
            let row = self.y.row(i);
            total += &row;
            total_sq += &row.mapv(|v| v * v);
        }
        let parent = sse(&total, &total_sq, n);

        let mut best: Option<Split> = None;
        let mut order = indices.to_vec();
        for f in 0..self.x.ncols() {
            order.sort_by(|&a, &b| self.x[[a, f]].total_cmp(&self.x[[b, f]]));

            let mut left = Array1::<f64>::zeros(k);
            let mut left_sq = Array1::<f64>::zeros(k);
            for pos in 0..n - 1 {
                let row = self.y.row(order[pos]);
                left += &row;
                left_sq += &row.mapv(|v| v * v);

                let here = self.x[[order[pos], f]];
                let next = self.x[[order[pos + 1], f]];
                let n_left = pos + 1;
                if here >= next || n_left < min_leaf || n - n_left < min_leaf {
                    continue;
                }

                let right = &total - &left;
                let right_sq = &total_sq - &left_sq;
                let gain = parent - sse(&left, &left_sq, n_left) - sse(&right, &right_sq, n - n_left);
                if gain > best.as_ref().map_or(1e-12, |b| b.gain) {
                    best = Some(Split {
                        feature: f,
                        threshold: (here + next) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// A fitted forest of regression trees.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    n_targets: usize,
    importances: Array1<f64>,
}

impl RandomForest {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Mean over trees of each feature's share of the tree's impurity decrease.
    pub fn feature_importances(&self) -> &Array1<f64> {
        &self.importances
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_targets);
        for tree in &self.trees {
            out += tree.predict_row(row);
        }
        out / self.trees.len() as f64
    }
}

impl Fit<Array2<f64>, Array2<f64>, ForestError> for RandomForestParams {
    type Object = RandomForest;

    fn fit(&self, dataset: &DatasetBase<Array2<f64>, Array2<f64>>) -> Result<RandomForest, ForestError> {
        self.check()?;
        let x = dataset.records.view();
        let y = dataset.targets.view();
        if x.nrows() != y.nrows() {
            return Err(ForestError::ShapeMismatch {
                records: x.nrows(),
                targets: y.nrows(),
            });
        }
        let n = x.nrows();
        if n == 0 || y.ncols() == 0 {
            return Err(ForestError::NotEnoughSamples);
        }

        let mut trees = Vec::with_capacity(self.n_trees);
        let mut importances = Array1::<f64>::zeros(x.ncols());
        for t in 0..self.n_trees {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(t as u64));
            let indices: Vec<usize> = if self.bootstrap {
                (0..n).map(|_| rng.random_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let mut builder = TreeBuilder::new(x, y, self);
            builder.grow(indices, 0);
            let total = builder.importances.sum();
            if total > 0.0 {
                importances += &(builder.importances / total);
            }
            trees.push(RegressionTree {
                nodes: builder.nodes,
            });
        }

        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }
        log::debug!(
            "Fitted {} trees on {n} rows x {} features, {} outputs",
            trees.len(),
            x.ncols(),
            y.ncols()
        );

        Ok(RandomForest {
            trees,
            n_features: x.ncols(),
            n_targets: y.ncols(),
            importances,
        })
    }
}

impl PredictInplace<Array2<f64>, Array2<f64>> for RandomForest {
    fn predict_inplace(&self, x: &Array2<f64>, y: &mut Array2<f64>) {
        assert_eq!(
            x.ncols(),
            self.n_features,
            "number of features must match the fitted forest"
        );
        for (row, mut out) in x.axis_iter(Axis(0)).zip(y.axis_iter_mut(Axis(0))) {
            out.assign(&self.predict_row(row));
        }
    }

    fn default_target(&self, x: &Array2<f64>) -> Array2<f64> {
        Array2::zeros((x.nrows(), self.n_targets))
    }
}
