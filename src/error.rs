use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SsweError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not parse sentiment '{value}' in record {record}")]
    SentimentParse { record: u64, value: String },

    #[error("Record {record} has no '{column}' column")]
    MissingColumn { record: u64, column: String },

    #[error("Vocabulary of size {0} is too small, negative sampling needs at least 2 entries")]
    VocabularyTooSmall(usize),

    #[error("Token '{0}' appears more than once in the vocabulary")]
    DuplicateToken(String),

    #[error("No checkpoint found in {}", .0.display())]
    NoCheckpoint(PathBuf),

    #[error("Invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reading npy failed: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("Writing npy failed: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, SsweError>;
