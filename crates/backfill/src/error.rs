use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Invalid backfill range: {0}")]
    InvalidRange(String),

    #[error("Failed to write history file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode history row: {0}")]
    Csv(#[from] csv::Error),
}
