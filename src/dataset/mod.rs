//! CSV inputs and outputs: identifier lists, identifier-to-sheet mappings,
//! flattened datasets and classified output tables.

pub mod reader;
pub mod writer;

use std::path::PathBuf;
use thiserror::Error;

pub use reader::{load_identifier_mappings, load_identifiers, validate_mappings, CsvTable, GUID_COLUMN, SHEET_NAME_COLUMN};
pub use writer::{default_output_path, write_identifier_template, write_table, TemplateKind};

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("File is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} is missing required columns: {}", .path.display(), .columns.join(", "))]
    MissingColumns { path: PathBuf, columns: Vec<String> },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
