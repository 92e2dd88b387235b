use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::*;

/// Workbook formats calamine can open
const SUPPORTED_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Read access to a single sheet, addressed with 1-based row and column numbers.
///
/// This is the only surface the identifier locator and row-range extractor
/// need, which keeps them independent of the workbook backend.
pub trait CellSource {
    fn name(&self) -> &str;

    /// Last populated row (1-based), or 0 for an empty sheet
    fn max_row(&self) -> u32;

    fn read_cell(&self, row: u32, col: u32) -> Result<CellValue, ExcelError>;
}

/// Cached values and formula text of one worksheet
#[derive(Debug, Clone)]
pub struct SheetData {
    name: String,
    values: Range<Data>,
    formulas: Range<String>,
}

impl SheetData {
    pub fn new(name: impl Into<String>, values: Range<Data>, formulas: Range<String>) -> Self {
        Self {
            name: name.into(),
            values,
            formulas,
        }
    }

    /// Absolute 0-based bounding box covering both values and formulas
    pub(crate) fn bounds(&self) -> Option<((u32, u32), (u32, u32))> {
        let ranges = [
            self.values.start().zip(self.values.end()),
            self.formulas.start().zip(self.formulas.end()),
        ];

        ranges.into_iter().flatten().reduce(|(a_start, a_end), (b_start, b_end)| {
            (
                (a_start.0.min(b_start.0), a_start.1.min(b_start.1)),
                (a_end.0.max(b_end.0), a_end.1.max(b_end.1)),
            )
        })
    }

    /// Cached value at a 0-based absolute position
    pub(crate) fn value_at(&self, row: u32, col: u32) -> CellValue {
        convert_cell_value(self.values.get_value((row, col)))
    }

    /// Raw value at a 0-based absolute position
    pub(crate) fn data_at(&self, row: u32, col: u32) -> Option<&Data> {
        self.values.get_value((row, col))
    }

    /// Formula text at a 0-based absolute position, with the leading `=`
    pub(crate) fn formula_at(&self, row: u32, col: u32) -> Option<String> {
        let formula = self.formulas.get_value((row, col))?;
        if formula.is_empty() {
            return None;
        }
        if formula.starts_with('=') {
            Some(formula.clone())
        } else {
            Some(format!("={}", formula))
        }
    }
}

impl CellSource for SheetData {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_row(&self) -> u32 {
        self.bounds().map(|(_, end)| end.0 + 1).unwrap_or(0)
    }

    fn read_cell(&self, row: u32, col: u32) -> Result<CellValue, ExcelError> {
        if row == 0 || col == 0 {
            return Err(ExcelError::invalid_range(format!(
                "Cell ({}, {}) is outside the sheet; rows and columns start at 1",
                row, col
            )));
        }
        Ok(self.value_at(row - 1, col - 1))
    }
}

/// An opened workbook with every sheet loaded into memory
#[derive(Debug, Clone)]
pub struct Workbook {
    path: PathBuf,
    sheets: Vec<SheetData>,
}

impl Workbook {
    /// Open a workbook and load the values and formulas of all sheets
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ExcelError> {
        let path = validate_workbook_path(path.as_ref())?;

        info!(path = %path.display(), "Loading workbook");

        let mut workbook: Sheets<_> = open_workbook_auto(&path)
            .map_err(|e| ExcelError::read_error(format!("Failed to open workbook: {}", e)))?;

        let sheet_names = workbook.sheet_names().to_vec();
        let mut sheets = Vec::with_capacity(sheet_names.len());

        for name in sheet_names {
            let values = workbook.worksheet_range(&name).map_err(|e| {
                ExcelError::read_error(format!("Failed to read sheet '{}': {}", name, e))
            })?;

            // Not every format exposes formulas; fall back to values only.
            let formulas = match workbook.worksheet_formula(&name) {
                Ok(range) => range,
                Err(e) => {
                    debug!(sheet = %name, error = %e, "No formula data for sheet");
                    Range::empty()
                }
            };

            sheets.push(SheetData::new(name, values, formulas));
        }

        Ok(Self { path, sheets })
    }

    /// Build a workbook from already loaded sheets
    pub fn from_sheets(path: impl Into<PathBuf>, sheets: Vec<SheetData>) -> Self {
        Self {
            path: path.into(),
            sheets,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheets(&self) -> &[SheetData] {
        &self.sheets
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetData> {
        self.sheets.iter().find(|s| s.name == name)
    }
}

/// Check that a path exists and has a workbook extension
pub fn validate_workbook_path(path: &Path) -> Result<PathBuf, ExcelError> {
    if !path.exists() {
        return Err(ExcelError::file_not_found(&path.display().to_string()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ExcelError::invalid_format(format!(
            "File must be an Excel workbook ({}), got: {}",
            SUPPORTED_EXTENSIONS.join(", "),
            path.display()
        )));
    }

    Ok(path.to_path_buf())
}

/// Convert calamine Data to our CellValue
pub(crate) fn convert_cell_value(cell: Option<&Data>) -> CellValue {
    match cell {
        None => CellValue::Empty,
        Some(data) => match data {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::String(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Boolean(*b),
            Data::DateTime(dt) => CellValue::DateTime(format_excel_datetime(dt.as_f64())),
            Data::DateTimeIso(s) => CellValue::DateTime(s.clone()),
            Data::DurationIso(s) => CellValue::String(s.clone()),
            Data::Error(e) => CellValue::Error(e.to_string()),
        },
    }
}

/// Type tag for a non-formula cell
pub(crate) fn value_type_of(cell: Option<&Data>) -> ValueType {
    match cell {
        Some(Data::Float(_)) | Some(Data::Int(_)) => ValueType::Number,
        Some(Data::String(_)) => ValueType::String,
        Some(Data::Bool(_)) => ValueType::Bool,
        Some(Data::DateTime(_)) | Some(Data::DateTimeIso(_)) => ValueType::Date,
        _ => ValueType::Other,
    }
}

/// Format Excel datetime (days since 1899-12-30) to ISO 8601
fn format_excel_datetime(value: f64) -> String {
    let Some(epoch) = chrono::NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return value.to_string();
    };

    // Round the whole serial so 23:59:59.9 carries into the next date
    let total_seconds = (value * 86400.0).round() as i64;
    let datetime = epoch.and_time(chrono::NaiveTime::MIN) + chrono::Duration::seconds(total_seconds);

    datetime.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Convert column index (0-based) to Excel column letter (A, B, ..., Z, AA, AB, ...)
pub fn column_index_to_letter(index: u32) -> String {
    let mut result = String::new();
    let mut n = index + 1;

    while n > 0 {
        n -= 1;
        let c = (b'A' + (n % 26) as u8) as char;
        result.insert(0, c);
        n /= 26;
    }

    result
}

/// Compute SHA-256 checksum of a file
pub fn compute_checksum(path: &Path) -> Result<String, ExcelError> {
    let mut file = File::open(path)
        .map_err(|e| ExcelError::read_error(format!("Failed to open file for checksum: {}", e)))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ExcelError::read_error(format!("Failed to read file for checksum: {}", e)))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
