// Error types shared by the loader, the model and the command line.
use thiserror::Error;

use crate::forest::ForestError;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The dataset header lacks columns the pipeline cannot run without.
    #[error("dataset is missing required column(s): {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("dataset contains no usable project records")]
    EmptyDataset,

    #[error("model error: {0}")]
    Model(#[from] ForestError),

    #[error("metric error: {0}")]
    Metrics(#[from] linfa::Error),

    #[error("invalid policy file: {0}")]
    Policy(#[from] toml::de::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
