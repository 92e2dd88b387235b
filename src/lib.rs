//! Tools for working with GUID-tagged financial statement workbooks:
//! flattening workbooks to one CSV record per cell, extracting rows by
//! GUID, and classifying formula text with a language model.

pub mod classify;
pub mod config;
pub mod dataset;
pub mod excel;
pub mod logging;

pub use classify::{ClassificationPipeline, CompletionClient, OpenAiClient, PipelineError, PipelineSummary};
pub use config::ClassifierConfig;
