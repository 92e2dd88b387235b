use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::reader::{CellSource, Workbook};
use super::types::*;

/// Column A, where identifiers live
const IDENTIFIER_COLUMN: u32 = 1;

/// Find the first row whose column A value equals `identifier`.
///
/// Both sides are trimmed; comparison is otherwise exact. A read failure on
/// any row ends the search with `None`.
pub fn find_identifier_row<S: CellSource + ?Sized>(sheet: &S, identifier: &str) -> Option<u32> {
    let target = identifier.trim();
    if target.is_empty() {
        return None;
    }

    for row in 1..=sheet.max_row() {
        let value = match sheet.read_cell(row, IDENTIFIER_COLUMN) {
            Ok(value) => value,
            Err(e) => {
                error!(identifier = %target, sheet = %sheet.name(), row, error = %e, "Error searching for identifier");
                return None;
            }
        };

        if !value.is_empty() && value.to_string().trim() == target {
            debug!(identifier = %target, row, "Found identifier");
            return Some(row);
        }
    }

    warn!(identifier = %target, sheet = %sheet.name(), "Identifier not found in column A");
    None
}

/// Values of `row` for the inclusive 1-based column range `[start_col, end_col]`.
///
/// A cell that cannot be read becomes `CellValue::Empty`.
pub fn extract_row_range<S: CellSource + ?Sized>(
    sheet: &S,
    row: u32,
    start_col: u32,
    end_col: u32,
) -> Vec<CellValue> {
    (start_col..=end_col)
        .map(|col| match sheet.read_cell(row, col) {
            Ok(value) => value,
            Err(e) => {
                warn!(row, col, error = %e, "Error reading cell");
                CellValue::Empty
            }
        })
        .collect()
}

/// Headers like `Col124`, `Col125`, ... for an inclusive column range
pub fn column_headers(start_col: u32, end_col: u32) -> Vec<String> {
    (start_col..=end_col).map(|i| format!("Col{}", i)).collect()
}

/// Locate every mapped identifier on its sheet and pull out the column range
pub fn extract_identifier_rows(
    workbook: &Workbook,
    mappings: &[IdentifierMapping],
    start_col: u32,
    end_col: u32,
) -> Result<ExtractionResult, ExcelError> {
    if start_col == 0 || end_col < start_col {
        return Err(ExcelError::invalid_range(format!(
            "Invalid column range {}-{}: columns start at 1 and the end must not precede the start",
            start_col, end_col
        )));
    }

    info!(mappings = mappings.len(), start_col, end_col, "Processing identifier mappings");

    let mut rows = Vec::new();
    let mut not_found = Vec::new();
    let mut sheets_processed = BTreeSet::new();

    for mapping in mappings {
        let Some(sheet) = workbook.sheet(&mapping.target_sheet) else {
            warn!(
                identifier = %mapping.identifier,
                sheet = %mapping.target_sheet,
                "Sheet not found in workbook"
            );
            not_found.push(mapping.identifier.clone());
            continue;
        };
        sheets_processed.insert(mapping.target_sheet.clone());

        let Some(row) = find_identifier_row(sheet, &mapping.identifier) else {
            not_found.push(mapping.identifier.clone());
            continue;
        };

        let values = extract_row_range(sheet, row, start_col, end_col);
        debug!(identifier = %mapping.identifier, row, "Extracted row");

        rows.push(ExtractedRow {
            sheet: mapping.target_sheet.clone(),
            identifier: mapping.identifier.clone(),
            row,
            values,
        });
    }

    info!(found = rows.len(), total = mappings.len(), "Extraction complete");

    let summary = ExtractionSummary {
        rows_extracted: rows.len(),
        identifiers_processed: mappings.len(),
        identifiers_found: rows.len(),
        identifiers_not_found: not_found,
        sheets_processed: sheets_processed.into_iter().collect(),
        column_range: format!("{}-{}", start_col, end_col),
        input_path: workbook.path().display().to_string(),
        output_path: None,
    };

    Ok(ExtractionResult {
        rows,
        start_col,
        end_col,
        summary,
    })
}

/// Write extracted rows as `SheetName, GUID, RowNum, Col<start>..Col<end>`
pub fn write_extraction_csv(result: &mut ExtractionResult, output: &Path) -> Result<PathBuf, ExcelError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ExcelError::write_error(format!("Failed to create output directory: {}", e)))?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(output)
        .map_err(|e| ExcelError::write_error(format!("Failed to create {}: {}", output.display(), e)))?;

    let mut header = vec!["SheetName".to_string(), "GUID".to_string(), "RowNum".to_string()];
    header.extend(column_headers(result.start_col, result.end_col));
    writer
        .write_record(&header)
        .map_err(|e| ExcelError::write_error(format!("Failed to write CSV header: {}", e)))?;

    for row in &result.rows {
        let mut record = vec![row.sheet.clone(), row.identifier.clone(), row.row.to_string()];
        record.extend(row.values.iter().map(|v| v.to_string()));
        writer
            .write_record(&record)
            .map_err(|e| ExcelError::write_error(format!("Failed to write CSV row: {}", e)))?;
    }

    writer
        .flush()
        .map_err(|e| ExcelError::write_error(format!("Failed to flush CSV: {}", e)))?;

    info!(rows = result.rows.len(), path = %output.display(), "Saved extracted rows");

    result.summary.output_path = Some(output.display().to_string());
    Ok(output.to_path_buf())
}
