use csv::StringRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::DatasetError;
use crate::excel::IdentifierMapping;

pub const GUID_COLUMN: &str = "GUID";
pub const SHEET_NAME_COLUMN: &str = "SheetName";

/// Nominal identifier width
const IDENTIFIER_LENGTH: usize = 8;

/// A CSV file held in memory with its header row
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl CsvTable {
    /// Read a headed CSV file fully into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|source| DatasetError::Csv { path: path.to_path_buf(), source })?;

        let headers = reader
            .headers()
            .map_err(|source| DatasetError::Csv { path: path.to_path_buf(), source })?
            .clone();

        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(DatasetError::Empty(path.to_path_buf()));
        }

        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| DatasetError::Csv { path: path.to_path_buf(), source })?;

        info!(rows = rows.len(), path = %path.display(), "Loaded CSV");

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    /// Build a table from in-memory parts
    pub fn from_parts(path: impl Into<PathBuf>, headers: StringRecord, rows: Vec<StringRecord>) -> Self {
        Self {
            path: path.into(),
            headers,
            rows,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn rows(&self) -> &[StringRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a header, matched exactly
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Positions for every name, or the list of names that are absent
    pub fn require_columns<'a>(&self, names: &[&'a str]) -> Result<Vec<usize>, Vec<&'a str>> {
        let mut positions = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.column_position(name) {
                Some(position) => positions.push(position),
                None => missing.push(*name),
            }
        }
        if missing.is_empty() {
            Ok(positions)
        } else {
            Err(missing)
        }
    }

    /// Trimmed, non-empty values of one column
    fn column_values(&self, position: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(position))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Load the identifiers to process.
///
/// Accepts a `GUID` column (with or without `SheetName`) or a file with a
/// single column of any name.
pub fn load_identifiers(path: impl AsRef<Path>) -> Result<Vec<String>, DatasetError> {
    let table = CsvTable::load(path)?;

    let identifiers = if let Some(position) = table.column_position(GUID_COLUMN) {
        table.column_values(position)
    } else if table.headers().len() == 1 {
        table.column_values(0)
    } else {
        return Err(DatasetError::MissingColumns {
            path: table.path().to_path_buf(),
            columns: vec![GUID_COLUMN.to_string()],
        });
    };

    info!(count = identifiers.len(), path = %table.path().display(), "Loaded identifiers");
    Ok(identifiers)
}

/// Load `GUID,SheetName` mappings
pub fn load_identifier_mappings(path: impl AsRef<Path>) -> Result<Vec<IdentifierMapping>, DatasetError> {
    let table = CsvTable::load(path)?;

    let positions = table
        .require_columns(&[GUID_COLUMN, SHEET_NAME_COLUMN])
        .map_err(|missing| DatasetError::MissingColumns {
            path: table.path().to_path_buf(),
            columns: missing.into_iter().map(str::to_string).collect(),
        })?;
    let (guid_pos, sheet_pos) = (positions[0], positions[1]);

    let mappings: Vec<IdentifierMapping> = table
        .rows()
        .iter()
        .map(|row| IdentifierMapping {
            identifier: row.get(guid_pos).unwrap_or_default().trim().to_string(),
            target_sheet: row.get(sheet_pos).unwrap_or_default().trim().to_string(),
        })
        .filter(|mapping| !mapping.identifier.is_empty())
        .collect();

    info!(count = mappings.len(), path = %table.path().display(), "Loaded identifier mappings");
    Ok(mappings)
}

/// Warnings for duplicate identifiers, odd identifier widths and blank sheet names
pub fn validate_mappings(mappings: &[IdentifierMapping]) -> Vec<String> {
    let mut warnings = Vec::new();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for mapping in mappings {
        *counts.entry(mapping.identifier.as_str()).or_insert(0) += 1;
    }
    let mut duplicates: Vec<&str> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(identifier, _)| identifier)
        .collect();
    if !duplicates.is_empty() {
        duplicates.sort_unstable();
        warnings.push(format!("Duplicate GUIDs found: {}", duplicates.join(", ")));
    }

    for mapping in mappings {
        if mapping.identifier.chars().count() != IDENTIFIER_LENGTH {
            warnings.push(format!(
                "GUID '{}' is not {} characters long",
                mapping.identifier, IDENTIFIER_LENGTH
            ));
        }
    }

    let empty_sheets: Vec<&str> = mappings
        .iter()
        .filter(|m| m.target_sheet.trim().is_empty())
        .map(|m| m.identifier.as_str())
        .collect();
    if !empty_sheets.is_empty() {
        warnings.push(format!("Empty sheet names for GUIDs: {}", empty_sheets.join(", ")));
    }

    for warning in &warnings {
        warn!("{}", warning);
    }

    warnings
}
