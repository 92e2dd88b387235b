use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::reader::{
    column_index_to_letter, compute_checksum, value_type_of, CellSource, SheetData, Workbook,
};
use super::types::*;

/// Flattened cells plus the metadata of the run
#[derive(Debug, Clone)]
pub struct FlattenResult {
    pub records: Vec<FlatCellRecord>,
    pub summary: FlattenSummary,
}

impl Workbook {
    /// Every emitted cell in sheet, row, then column order.
    ///
    /// Each call starts a fresh pass over the loaded sheets.
    pub fn cells<'a>(
        &'a self,
        options: &FlattenOptions,
    ) -> impl Iterator<Item = FlatCellRecord> + 'a {
        let include_empty = options.include_empty_cells;
        self.sheets()
            .iter()
            .flat_map(move |sheet| sheet_cells(sheet, include_empty))
    }
}

fn sheet_cells(sheet: &SheetData, include_empty: bool) -> impl Iterator<Item = FlatCellRecord> + '_ {
    debug!(sheet = %sheet.name(), "Flattening sheet");

    sheet
        .bounds()
        .into_iter()
        .map(move |((first_row, first_col), end)| {
            // Empty cells are emitted from A1, not from the first populated cell
            if include_empty {
                ((0, 0), end)
            } else {
                ((first_row, first_col), end)
            }
        })
        .flat_map(|((first_row, first_col), (last_row, last_col))| {
            (first_row..=last_row)
                .flat_map(move |row| (first_col..=last_col).map(move |col| (row, col)))
        })
        .filter_map(move |(row, col)| cell_record(sheet, row, col, include_empty))
}

fn cell_record(sheet: &SheetData, row: u32, col: u32, include_empty: bool) -> Option<FlatCellRecord> {
    let formula = sheet.formula_at(row, col);
    let value = sheet.value_at(row, col);

    if value.is_empty() && formula.is_none() && !include_empty {
        return None;
    }

    let value_type = match formula {
        Some(_) => ValueType::Formula,
        None => value_type_of(sheet.data_at(row, col)),
    };

    Some(FlatCellRecord {
        sheet: sheet.name().to_string(),
        row: row + 1,
        column_ref: column_index_to_letter(col),
        formula_text: formula.unwrap_or_default(),
        value,
        value_type,
    })
}

/// Collect the records of an opened workbook and compute run metadata
pub fn flatten(workbook: &Workbook, options: &FlattenOptions, checksum: String) -> FlattenResult {
    let records: Vec<FlatCellRecord> = workbook.cells(options).collect();

    let mut value_types: BTreeMap<ValueType, usize> = BTreeMap::new();
    let mut sheets: HashSet<&str> = HashSet::new();
    for record in &records {
        *value_types.entry(record.value_type).or_insert(0) += 1;
        sheets.insert(record.sheet.as_str());
    }

    let summary = FlattenSummary {
        total_cells: records.len(),
        sheets_processed: sheets.len(),
        value_types,
        input_path: workbook.path().display().to_string(),
        output_path: None,
        checksum,
    };

    FlattenResult { records, summary }
}

/// Open a workbook from disk and flatten all of its sheets
pub fn flatten_workbook(path: impl AsRef<Path>, options: &FlattenOptions) -> Result<FlattenResult, ExcelError> {
    let path = path.as_ref();
    let workbook = Workbook::open(path)?;
    let checksum = compute_checksum(path)?;

    let result = flatten(&workbook, options, checksum);

    info!(
        cells = result.summary.total_cells,
        sheets = result.summary.sheets_processed,
        "Flattened workbook"
    );

    Ok(result)
}

#[derive(Serialize)]
struct FlatCsvRow<'a> {
    #[serde(rename = "Sheet")]
    sheet: &'a str,
    #[serde(rename = "RowNum")]
    row: u32,
    #[serde(rename = "ColRef")]
    column_ref: &'a str,
    #[serde(rename = "Formula Text")]
    formula_text: &'a str,
    #[serde(rename = "CellValue")]
    value: String,
    #[serde(rename = "Value Type")]
    value_type: &'static str,
}

/// `<dir>/<stem>_flattened.csv` next to the input workbook
pub fn default_flattened_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("workbook");
    input.with_file_name(format!("{}_flattened.csv", stem))
}

/// Write flattened records as CSV and record the output path in the summary
pub fn write_flattened_csv(result: &mut FlattenResult, output: Option<&Path>) -> Result<PathBuf, ExcelError> {
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => default_flattened_path(Path::new(&result.summary.input_path)),
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ExcelError::write_error(format!("Failed to create output directory: {}", e)))?;
    }

    let mut writer = csv::Writer::from_path(&output)
        .map_err(|e| ExcelError::write_error(format!("Failed to create {}: {}", output.display(), e)))?;

    // Headers come from the first serialized row; write them explicitly for empty workbooks.
    if result.records.is_empty() {
        writer
            .write_record(["Sheet", "RowNum", "ColRef", "Formula Text", "CellValue", "Value Type"])
            .map_err(|e| ExcelError::write_error(format!("Failed to write CSV header: {}", e)))?;
    }

    for record in &result.records {
        writer
            .serialize(FlatCsvRow {
                sheet: &record.sheet,
                row: record.row,
                column_ref: &record.column_ref,
                formula_text: &record.formula_text,
                value: record.value.to_string(),
                value_type: record.value_type.as_str(),
            })
            .map_err(|e| ExcelError::write_error(format!("Failed to write CSV row: {}", e)))?;
    }

    writer
        .flush()
        .map_err(|e| ExcelError::write_error(format!("Failed to flush CSV: {}", e)))?;

    info!(rows = result.records.len(), path = %output.display(), "Saved flattened data");

    result.summary.output_path = Some(output.display().to_string());
    Ok(output)
}

/// Write the run metadata as pretty JSON next to the CSV
pub fn write_flatten_metadata(summary: &FlattenSummary, output: &Path) -> Result<(), ExcelError> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| ExcelError::write_error(format!("Failed to serialize metadata: {}", e)))?;
    std::fs::write(output, json)
        .map_err(|e| ExcelError::write_error(format!("Failed to write {}: {}", output.display(), e)))
}
