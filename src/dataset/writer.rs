use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::reader::{GUID_COLUMN, SHEET_NAME_COLUMN};
use super::DatasetError;

/// Sample identifiers written into input templates
const TEMPLATE_GUIDS: [&str; 4] = ["00CAC489", "12345678", "87654321", "ABCD1234"];
const TEMPLATE_SHEETS: [&str; 4] = ["SoCI", "PL", "BS", "BS"];

/// Which input file a template is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    /// `GUID` only, for the classifier
    GuidList,
    /// `GUID,SheetName`, for the extractor
    GuidMapping,
}

/// `<dir>/<stem><suffix>.csv`, next to the input unless `output_dir` is given
pub fn default_output_path(input: &Path, suffix: &str, output_dir: Option<&Path>) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let file_name = format!("{}{}.csv", stem, suffix);
    match output_dir {
        Some(dir) => dir.join(file_name),
        None => input.with_file_name(file_name),
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write a header row followed by data rows
pub fn write_table(path: &Path, headers: &StringRecord, rows: &[StringRecord]) -> Result<(), DatasetError> {
    ensure_parent_dir(path)?;

    let to_error = |source: csv::Error| DatasetError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(to_error)?;

    writer.write_record(headers).map_err(to_error)?;
    for row in rows {
        writer.write_record(row).map_err(to_error)?;
    }
    writer.flush()?;

    info!(rows = rows.len(), path = %path.display(), "Saved CSV");
    Ok(())
}

/// Write a sample input file for the given template kind
pub fn write_identifier_template(kind: TemplateKind, path: &Path) -> Result<(), DatasetError> {
    let (headers, rows): (StringRecord, Vec<StringRecord>) = match kind {
        TemplateKind::GuidList => (
            StringRecord::from(vec![GUID_COLUMN]),
            TEMPLATE_GUIDS.iter().map(|g| StringRecord::from(vec![*g])).collect(),
        ),
        TemplateKind::GuidMapping => (
            StringRecord::from(vec![GUID_COLUMN, SHEET_NAME_COLUMN]),
            TEMPLATE_GUIDS
                .iter()
                .zip(TEMPLATE_SHEETS.iter())
                .take(3)
                .map(|(g, s)| StringRecord::from(vec![*g, *s]))
                .collect(),
        ),
    };

    write_table(path, &headers, &rows)
}
