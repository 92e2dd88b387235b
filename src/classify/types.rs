use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::PipelineError;
use crate::config::{IdentifierMode, InputColumns};
use crate::dataset::CsvTable;

/// Classification placed on rows that never received a result
pub const NOT_PROCESSED: &str = "Not_Processed";

/// Error text for requests that were never sent because the run was cancelled
pub const CANCELLED: &str = "cancelled";

/// One prompt's worth of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRequest {
    pub identifier: String,
    pub sheet: String,
    pub row: u32,
    pub formula_text: String,
    pub cell_value: String,
    pub instruction_text: String,
    /// Named ranges mentioned by the formula, with their descriptions
    pub reference_glossary: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub identifier: String,
    pub classification_text: String,
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn success(identifier: impl Into<String>, classification_text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            classification_text: classification_text.into(),
            error: None,
        }
    }

    pub fn failure(
        identifier: impl Into<String>,
        default_classification: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            classification_text: default_classification.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Column positions in the flattened dataset, resolved once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndex {
    /// `None` only when identifiers are optional and the column is absent
    pub identifier: Option<usize>,
    pub sheet: usize,
    pub row: usize,
    pub col_ref: usize,
    pub formula: usize,
    pub cell_value: usize,
}

impl ColumnIndex {
    pub fn resolve(table: &CsvTable, columns: &InputColumns, mode: IdentifierMode) -> Result<Self, PipelineError> {
        let positions = table
            .require_columns(&[
                columns.sheet.as_str(),
                columns.row.as_str(),
                columns.col_ref.as_str(),
                columns.formula.as_str(),
                columns.cell_value.as_str(),
            ])
            .map_err(|missing| missing_columns(table, &missing))?;

        let identifier = match (table.column_position(&columns.identifier), mode) {
            (Some(position), _) => Some(position),
            (None, IdentifierMode::Optional) => None,
            (None, IdentifierMode::Required) => {
                return Err(missing_columns(table, &[columns.identifier.as_str()]));
            }
        };

        Ok(Self {
            identifier,
            sheet: positions[0],
            row: positions[1],
            col_ref: positions[2],
            formula: positions[3],
            cell_value: positions[4],
        })
    }
}

fn missing_columns(table: &CsvTable, missing: &[&str]) -> PipelineError {
    PipelineError::Validation(format!(
        "{} is missing required columns: {}",
        table.path().display(),
        missing.join(", ")
    ))
}

/// A flattened row that carries the target column marker
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub identifier: String,
    pub sheet: String,
    /// 1-based row number, 0 when the field could not be parsed
    pub row: u32,
    pub col_ref: String,
    pub formula_text: String,
    pub cell_value: String,
    /// The untouched input record, written back on output
    pub record: StringRecord,
}

impl CandidateRow {
    pub fn from_record(record: &StringRecord, index: &ColumnIndex) -> Self {
        let field = |position: usize| record.get(position).unwrap_or_default();

        let sheet = field(index.sheet).to_string();
        let col_ref = field(index.col_ref).trim().to_string();
        let row_text = field(index.row).trim();
        let row = row_text.parse::<u32>().unwrap_or_else(|_| {
            debug!(value = %row_text, "Unparsable row number");
            0
        });

        // Without an identifier column, fall back to the cell address
        let identifier = match index.identifier {
            Some(position) => field(position).trim().to_string(),
            None => format!("{}!{}{}", sheet, col_ref, row),
        };

        Self {
            identifier,
            sheet,
            row,
            col_ref,
            formula_text: field(index.formula).to_string(),
            cell_value: field(index.cell_value).to_string(),
            record: record.clone(),
        }
    }
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub identifiers_processed: usize,
    pub identifiers_found: usize,
    pub identifiers_classified: usize,
    pub api_calls_made: usize,
    pub identifiers_not_found: Vec<String>,
    pub errors: Vec<String>,
    pub guid_file: String,
    pub flattened_file: String,
    pub output_file: Option<String>,
}
