//! Batched LLM classification of flattened formula rows.
//!
//! A run loads an identifier list and a flattened dataset, keeps the rows
//! carrying the target column marker, sends one completion request per row
//! in rate-limited batches, and writes the dataset back out with a
//! classification column appended.

pub mod client;
pub mod dispatch;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod types;

use thiserror::Error;

use crate::config::ConfigError;
use crate::dataset::DatasetError;

pub use client::{ClientError, CompletionClient, OpenAiClient, API_KEY_ENV};
pub use dispatch::{BatchDispatcher, CancellationHandle, DispatchStats};
pub use pipeline::{ClassificationPipeline, PipelineRun};
pub use prompt::build_prompt;
pub use report::print_summary;
pub use types::*;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} environment variable is not set")]
    MissingCredential(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}
