//! Excel module for reading and flattening workbooks.
//!
//! This module provides:
//! - Loading every sheet of a workbook (values and formula text) via calamine
//! - Flattening a workbook into one record per cell
//! - Locating identifiers in column A and extracting row ranges

pub mod types;
pub mod reader;
pub mod flatten;
pub mod locator;

// Re-export commonly used types and functions
pub use types::*;
pub use reader::{column_index_to_letter, compute_checksum, validate_workbook_path, CellSource, SheetData, Workbook};
pub use flatten::{default_flattened_path, flatten, flatten_workbook, write_flatten_metadata, write_flattened_csv, FlattenResult};
pub use locator::{column_headers, extract_identifier_rows, extract_row_range, find_identifier_row, write_extraction_csv};
