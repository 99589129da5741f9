
pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod embedding;
pub mod error;
pub mod loss;
pub mod model;
pub mod optim;
pub mod pipeline;
pub mod sample;
pub mod tokenize;
pub mod train;
pub mod vocab;

pub use config::{files_handling, Config, Params, TrainParams};
pub use embedding::Embedding;
pub use error::{Result, SsweError};
pub use pipeline::{Pipeline, PipelineOutput};
pub use train::{Mode, StepOutput, Train};
pub use vocab::Vocabulary;
