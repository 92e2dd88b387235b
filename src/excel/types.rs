use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Represents a cell value with type information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    Empty,
    String(String),
    Number(f64),
    Boolean(bool),
    DateTime(String), // ISO 8601 format
    Error(String),    // Excel error literal, e.g. "#N/A"
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

/// Renders the value the way it lands in a CSV field.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::String(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::DateTime(dt) => f.write_str(dt),
            CellValue::Error(e) => f.write_str(e),
        }
    }
}

/// Coarse type tag attached to every flattened cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Formula,
    Number,
    String,
    Bool,
    Date,
    Other,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Formula => "formula",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Date => "date",
            ValueType::Other => "other",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One spreadsheet cell as a flat record.
///
/// `row` is 1-based and `column_ref` is the column letter (A, B, ..., AA).
/// `formula_text` is empty for anything that is not a formula cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatCellRecord {
    pub sheet: String,
    pub row: u32,
    pub column_ref: String,
    pub formula_text: String,
    pub value: CellValue,
    pub value_type: ValueType,
}

/// Options for flattening a workbook
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlattenOptions {
    pub include_empty_cells: bool,
}

/// Metadata describing a flattening run
#[derive(Debug, Clone, Serialize)]
pub struct FlattenSummary {
    pub total_cells: usize,
    pub sheets_processed: usize,
    pub value_types: BTreeMap<ValueType, usize>,
    pub input_path: String,
    pub output_path: Option<String>,
    pub checksum: String,
}

/// Identifier and the sheet it is expected to live on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub identifier: String,
    pub target_sheet: String,
}

/// A row pulled out of a workbook by identifier lookup
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedRow {
    pub sheet: String,
    pub identifier: String,
    pub row: u32,
    pub values: Vec<CellValue>,
}

/// Counters for an identifier extraction run
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub rows_extracted: usize,
    pub identifiers_processed: usize,
    pub identifiers_found: usize,
    pub identifiers_not_found: Vec<String>,
    pub sheets_processed: Vec<String>,
    pub column_range: String,
    pub input_path: String,
    pub output_path: Option<String>,
}

/// Result of an identifier extraction run
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub rows: Vec<ExtractedRow>,
    pub start_col: u32,
    pub end_col: u32,
    pub summary: ExtractionSummary,
}

/// Excel-specific errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcelError {
    pub message: String,
    pub error_type: ExcelErrorType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExcelErrorType {
    FileNotFound,
    InvalidFormat,
    ReadError,
    WriteError,
    InvalidRange,
}

impl std::fmt::Display for ExcelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExcelError {}

impl ExcelError {
    pub fn new(message: impl Into<String>, error_type: ExcelErrorType) -> Self {
        ExcelError {
            message: message.into(),
            error_type,
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        ExcelError::new(format!("File not found: {}", path), ExcelErrorType::FileNotFound)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::InvalidFormat)
    }

    pub fn read_error(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::ReadError)
    }

    pub fn write_error(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::WriteError)
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        ExcelError::new(message, ExcelErrorType::InvalidRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_display() {
        assert_eq!(CellValue::Number(12345678.0).to_string(), "12345678");
        assert_eq!(CellValue::Number(1.5).to_string(), "1.5");
        assert_eq!(CellValue::Boolean(true).to_string(), "TRUE");
        assert_eq!(CellValue::Empty.to_string(), "");
        assert_eq!(CellValue::Error("#DIV/0!".into()).to_string(), "#DIV/0!");
    }
}
