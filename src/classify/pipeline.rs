use chrono::Utc;
use csv::StringRecord;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use super::client::CompletionClient;
use super::dispatch::{BatchDispatcher, CancellationHandle, DispatchStats};
use super::prompt::referenced_ranges;
use super::types::*;
use super::PipelineError;
use crate::config::ClassifierConfig;
use crate::dataset::{default_output_path, load_identifiers, write_table, CsvTable};

const OUTPUT_SUFFIX: &str = "_classified_formulas";

/// In-memory outcome of classifying one flattened table
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
    pub results: Vec<ClassificationResult>,
    pub stats: DispatchStats,
    pub identifiers_found: usize,
    pub identifiers_not_found: Vec<String>,
}

impl PipelineRun {
    pub fn classified(&self) -> usize {
        self.results.iter().filter(|r| !r.is_error()).count()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("GUID {}: {}", r.identifier, e)))
            .collect()
    }
}

pub struct ClassificationPipeline<C> {
    config: ClassifierConfig,
    client: C,
    dispatcher: BatchDispatcher,
}

impl<C: CompletionClient> ClassificationPipeline<C> {
    pub fn new(config: ClassifierConfig, client: C) -> Self {
        let dispatcher = BatchDispatcher::from_config(&config);
        Self {
            config,
            client,
            dispatcher,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.dispatcher.cancellation_handle()
    }

    /// Classify the listed identifiers' formulas and write the merged table.
    ///
    /// Output defaults to `<guid stem>_classified_formulas.csv` next to the GUID file.
    pub async fn run(
        &self,
        guid_path: &Path,
        flattened_path: &Path,
        output: Option<&Path>,
    ) -> Result<PipelineSummary, PipelineError> {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            guid_file = %guid_path.display(),
            flattened_file = %flattened_path.display(),
            "Starting classification run"
        );

        let identifiers = load_identifiers(guid_path)?;
        if identifiers.is_empty() {
            return Err(PipelineError::Validation(format!(
                "No GUIDs found in {}",
                guid_path.display()
            )));
        }

        let table = CsvTable::load(flattened_path)?;
        let run = self.classify_table(&identifiers, &table).await?;

        let output_path = match output {
            Some(path) => path.to_path_buf(),
            None => default_output_path(guid_path, OUTPUT_SUFFIX, None),
        };
        write_table(&output_path, &run.headers, &run.rows)?;

        let summary = PipelineSummary {
            run_id,
            started_at,
            identifiers_processed: identifiers.len(),
            identifiers_found: run.identifiers_found,
            identifiers_classified: run.classified(),
            api_calls_made: run.stats.requests_sent,
            identifiers_not_found: run.identifiers_not_found.clone(),
            errors: run.error_messages(),
            guid_file: guid_path.display().to_string(),
            flattened_file: flattened_path.display().to_string(),
            output_file: Some(output_path.display().to_string()),
        };

        info!(
            %run_id,
            classified = summary.identifiers_classified,
            errors = summary.errors.len(),
            output = %output_path.display(),
            "Classification run complete"
        );

        Ok(summary)
    }

    /// Filter, classify and merge one flattened table without touching the filesystem
    pub async fn classify_table(&self, identifiers: &[String], table: &CsvTable) -> Result<PipelineRun, PipelineError> {
        let index = ColumnIndex::resolve(table, &self.config.columns, self.config.identifier_mode)?;

        let marker_rows = select_marker_rows(table, &index, &self.config.target_column);
        info!(count = marker_rows.len(), column = %self.config.target_column, "Found marker rows");
        if marker_rows.is_empty() {
            return Err(PipelineError::Validation(format!(
                "No rows with {} = '{}' in {}",
                self.config.columns.col_ref,
                self.config.target_column,
                table.path().display()
            )));
        }

        let (candidates, identifiers_found, identifiers_not_found) = if index.identifier.is_some() {
            let candidates = filter_by_identifier(marker_rows, identifiers);
            let (found, not_found) = identifier_coverage(identifiers, &candidates);
            (candidates, found, not_found)
        } else {
            warn!(
                column = %self.config.columns.identifier,
                "No identifier column found, classifying every marker row"
            );
            (marker_rows, 0, Vec::new())
        };
        info!(count = candidates.len(), "Filtered rows matching target GUIDs");

        let (prepared, requests) = prepare_requests(candidates, &self.config);
        let (results, stats) = self.dispatcher.dispatch(&self.client, &requests).await;
        let (headers, rows) = merge_results(table.headers(), &prepared, &results, &self.config);

        Ok(PipelineRun {
            headers,
            rows,
            results,
            stats,
            identifiers_found,
            identifiers_not_found,
        })
    }
}

/// Rows whose column reference equals the target marker
pub fn select_marker_rows(table: &CsvTable, index: &ColumnIndex, target_column: &str) -> Vec<CandidateRow> {
    let target = target_column.trim();
    table
        .rows()
        .iter()
        .filter(|record| record.get(index.col_ref).map(str::trim) == Some(target))
        .map(|record| CandidateRow::from_record(record, index))
        .collect()
}

/// Keep rows whose identifier appears in the list
pub fn filter_by_identifier(rows: Vec<CandidateRow>, identifiers: &[String]) -> Vec<CandidateRow> {
    let wanted: HashSet<&str> = identifiers.iter().map(String::as_str).collect();
    rows.into_iter()
        .filter(|row| wanted.contains(row.identifier.as_str()))
        .collect()
}

/// Count of distinct listed identifiers present in `rows`, plus the absent ones in list order
fn identifier_coverage(identifiers: &[String], rows: &[CandidateRow]) -> (usize, Vec<String>) {
    let present: HashSet<&str> = rows.iter().map(|row| row.identifier.as_str()).collect();
    let mut seen = HashSet::new();
    let mut found = 0;
    let mut not_found = Vec::new();

    for identifier in identifiers {
        if !seen.insert(identifier.as_str()) {
            continue;
        }
        if present.contains(identifier.as_str()) {
            found += 1;
        } else {
            not_found.push(identifier.clone());
        }
    }

    (found, not_found)
}

/// Drop rows with blank or overlong formula text, build one request per remaining row
pub fn prepare_requests(
    rows: Vec<CandidateRow>,
    config: &ClassifierConfig,
) -> (Vec<CandidateRow>, Vec<ClassificationRequest>) {
    let mut prepared = Vec::with_capacity(rows.len());
    let mut requests = Vec::with_capacity(rows.len());

    for row in rows {
        if row.formula_text.trim().is_empty() {
            warn!(identifier = %row.identifier, "Skipping GUID with no formula text");
            continue;
        }

        let length = row.formula_text.chars().count();
        if length > config.max_formula_length {
            warn!(
                identifier = %row.identifier,
                length,
                max = config.max_formula_length,
                "Skipping GUID with formula text too long"
            );
            continue;
        }

        requests.push(ClassificationRequest {
            identifier: row.identifier.clone(),
            sheet: row.sheet.clone(),
            row: row.row,
            formula_text: row.formula_text.clone(),
            cell_value: row.cell_value.clone(),
            instruction_text: config.instruction_text.clone(),
            reference_glossary: referenced_ranges(&row.formula_text, &config.named_ranges),
        });
        prepared.push(row);
    }

    info!(count = requests.len(), "Prepared records for classification");
    (prepared, requests)
}

/// Append the classification (and, if any request failed, the error) to every prepared row.
///
/// Results are matched by identifier; repeated identifiers take their results in order.
pub fn merge_results(
    headers: &StringRecord,
    rows: &[CandidateRow],
    results: &[ClassificationResult],
    config: &ClassifierConfig,
) -> (StringRecord, Vec<StringRecord>) {
    let mut by_identifier: HashMap<&str, VecDeque<&ClassificationResult>> = HashMap::new();
    for result in results {
        by_identifier
            .entry(result.identifier.as_str())
            .or_default()
            .push_back(result);
    }

    let with_errors = results.iter().any(ClassificationResult::is_error);

    let mut output_headers = headers.clone();
    output_headers.push_field(&config.classification_column);
    if with_errors {
        output_headers.push_field(&config.error_column);
    }

    let output_rows = rows
        .iter()
        .map(|row| {
            let result = by_identifier
                .get_mut(row.identifier.as_str())
                .and_then(VecDeque::pop_front);

            let mut record = row.record.clone();
            match result {
                Some(result) => {
                    record.push_field(&result.classification_text);
                    if with_errors {
                        record.push_field(result.error.as_deref().unwrap_or_default());
                    }
                }
                None => {
                    record.push_field(NOT_PROCESSED);
                    if with_errors {
                        record.push_field("");
                    }
                }
            }
            record
        })
        .collect();

    (output_headers, output_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::dispatch::tests::{Reply, ScriptedClient};
    use crate::config::{ConfigError, IdentifierMode};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const HEADERS: [&str; 7] = ["Sheet", "RowNum", "ColRef", "Formula Text", "CellValue", "Value Type", "GUID"];

    fn flat_table(rows: &[[&str; 7]]) -> CsvTable {
        CsvTable::from_parts(
            "flat.csv",
            StringRecord::from(HEADERS.to_vec()),
            rows.iter().map(|r| StringRecord::from(r.to_vec())).collect(),
        )
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            delay_between_batches_seconds: 0.0,
            ..Default::default()
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn candidate(identifier: &str, formula: &str) -> CandidateRow {
        CandidateRow {
            identifier: identifier.into(),
            sheet: "PL".into(),
            row: 3,
            col_ref: "D".into(),
            formula_text: formula.into(),
            cell_value: String::new(),
            record: StringRecord::from(vec![identifier, formula]),
        }
    }

    #[test]
    fn test_marker_and_identifier_filter() {
        let table = flat_table(&[
            ["PL", "3", "D", "text1", "", "formula", "A1"],
            ["PL", "3", "E", "text2", "", "formula", "A1"],
            ["PL", "4", "D", "text3", "", "formula", "B2"],
        ]);
        let index = ColumnIndex::resolve(&table, &Default::default(), IdentifierMode::Required).unwrap();

        let marker = select_marker_rows(&table, &index, "D");
        assert_eq!(marker.len(), 2);

        let filtered = filter_by_identifier(marker, &ids(&["A1"]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].formula_text, "text1");
    }

    #[test]
    fn test_identifier_coverage() {
        let rows = vec![candidate("A1", "=1"), candidate("A1", "=2")];
        let (found, not_found) = identifier_coverage(&ids(&["A1", "Z9", "A1", "Z9", "B2"]), &rows);
        assert_eq!(found, 1);
        assert_eq!(not_found, vec!["Z9", "B2"]);
    }

    #[test]
    fn test_prepare_requests_length_boundary() {
        let config = ClassifierConfig {
            max_formula_length: 5,
            ..Default::default()
        };
        let rows = vec![
            candidate("A", "=A1+1"),
            candidate("B", "=A1+12"),
            candidate("C", "   "),
            candidate("D", ""),
            candidate("E", "=é+1"),
        ];

        let (prepared, requests) = prepare_requests(rows, &config);

        let kept: Vec<_> = requests.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(kept, vec!["A", "E"]);
        assert_eq!(prepared.len(), requests.len());
        assert_eq!(requests[0].instruction_text, config.instruction_text);
    }

    #[test]
    fn test_prepare_requests_attaches_referenced_ranges() {
        let mut config = ClassifierConfig::default();
        config.named_ranges.insert("TurnoverTotal".into(), "Total turnover".into());
        config.named_ranges.insert("StaffCosts".into(), "Staff costs".into());

        let (_, requests) = prepare_requests(vec![candidate("A", "=TurnoverTotal*0.2")], &config);
        assert_eq!(requests[0].reference_glossary.keys().collect::<Vec<_>>(), vec!["TurnoverTotal"]);
    }

    #[test]
    fn test_merge_without_errors_has_no_error_column() {
        let headers = StringRecord::from(vec!["GUID", "Formula Text"]);
        let rows = vec![candidate("A", "=1"), candidate("B", "=2")];
        let results = vec![
            ClassificationResult::success("A", "Section 23"),
            ClassificationResult::success("B", "Section 11"),
        ];

        let (out_headers, out_rows) = merge_results(&headers, &rows, &results, &ClassifierConfig::default());

        assert_eq!(out_headers, StringRecord::from(vec!["GUID", "Formula Text", "FRS102_Classification"]));
        assert_eq!(out_rows[1], StringRecord::from(vec!["B", "=2", "Section 11"]));
    }

    #[test]
    fn test_merge_duplicates_and_missing_results() {
        let headers = StringRecord::from(vec!["GUID", "Formula Text"]);
        let rows = vec![candidate("A", "=1"), candidate("A", "=2"), candidate("C", "=3")];
        let results = vec![
            ClassificationResult::success("A", "first"),
            ClassificationResult::failure("A", "ERROR_CLASSIFICATION", "timed out"),
        ];

        let (out_headers, out_rows) = merge_results(&headers, &rows, &results, &ClassifierConfig::default());

        assert_eq!(out_headers.len(), 4);
        assert_eq!(&out_headers[3], "Classification_Error");
        assert_eq!(out_rows.len(), 3);
        assert_eq!(out_rows[0], StringRecord::from(vec!["A", "=1", "first", ""]));
        assert_eq!(out_rows[1], StringRecord::from(vec!["A", "=2", "ERROR_CLASSIFICATION", "timed out"]));
        assert_eq!(out_rows[2], StringRecord::from(vec!["C", "=3", NOT_PROCESSED, ""]));
    }

    #[tokio::test]
    async fn test_classify_table_end_to_end() {
        let table = flat_table(&[
            ["SoCI", "2", "A", "", "00CAC489", "string", "00CAC489"],
            ["SoCI", "2", "D", "=IF(B2>0,\"Revenue\",\"\")", "Revenue", "formula", "00CAC489"],
            ["SoCI", "3", "D", "=C3", "Staff", "formula", "12345678"],
            ["SoCI", "4", "D", "", "", "other", "87654321"],
            ["PL", "9", "D", "=X9", "1", "formula", "FFFFFFFF"],
        ]);
        let client = ScriptedClient::with(&[
            ("00CAC489", Reply::Text("FRS102 Section 23 - Revenue".into())),
            ("12345678", Reply::Fail),
        ]);
        let pipeline = ClassificationPipeline::new(config(), client);

        let run = pipeline
            .classify_table(&ids(&["00CAC489", "12345678", "87654321", "ABCD1234"]), &table)
            .await
            .unwrap();

        assert_eq!(run.results.len(), 2);
        assert_eq!(run.rows.len(), 2);
        assert_eq!(run.identifiers_found, 3);
        assert_eq!(run.identifiers_not_found, vec!["ABCD1234"]);
        assert_eq!(run.classified(), 1);
        assert_eq!(run.stats.requests_sent, 2);
        assert_eq!(run.headers.len(), HEADERS.len() + 2);
        assert_eq!(&run.rows[0][7], "FRS102 Section 23 - Revenue");
        assert_eq!(&run.rows[1][7], "ERROR_CLASSIFICATION");
        assert!(run.error_messages()[0].starts_with("GUID 12345678: API error"));
    }

    #[tokio::test]
    async fn test_classify_table_rejects_missing_marker() {
        let table = flat_table(&[["PL", "1", "E", "=1", "1", "formula", "A1"]]);
        let pipeline = ClassificationPipeline::new(config(), ScriptedClient::default());

        let err = pipeline.classify_table(&ids(&["A1"]), &table).await.unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(pipeline.client.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_classify_table_optional_identifier_column() {
        let table = CsvTable::from_parts(
            "flat.csv",
            StringRecord::from(HEADERS[..6].to_vec()),
            vec![
                StringRecord::from(vec!["PL", "1", "D", "=1", "1", "formula"]),
                StringRecord::from(vec!["PL", "2", "D", "=2", "2", "formula"]),
            ],
        );
        let config = ClassifierConfig {
            identifier_mode: IdentifierMode::Optional,
            ..config()
        };
        let pipeline = ClassificationPipeline::new(config, ScriptedClient::default());

        let run = pipeline.classify_table(&ids(&["A1"]), &table).await.unwrap();

        assert_eq!(run.rows.len(), 2);
        assert_eq!(&run.rows[1][6], "Section for PL!D2");
        assert!(run.identifiers_not_found.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_writes_output_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let guids = dir.path().join("guids.csv");
        std::fs::write(&guids, "GUID\n00CAC489\nABCD1234\n").unwrap();
        let flat = dir.path().join("flat.csv");
        std::fs::write(
            &flat,
            "Sheet,RowNum,ColRef,Formula Text,CellValue,Value Type,GUID\n\
             SoCI,2,D,\"=IF(B2>0,\"\"Revenue\"\",\"\"\"\")\",Revenue,formula,00CAC489\n",
        )
        .unwrap();

        let config = ClassifierConfig {
            request_timeout_seconds: 5,
            ..Default::default()
        };
        let pipeline = ClassificationPipeline::new(config, ScriptedClient::default());

        let start = tokio::time::Instant::now();
        let summary = pipeline.run(&guids, &flat, None).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));

        let output = dir.path().join("guids_classified_formulas.csv");
        assert_eq!(summary.output_file.as_deref(), Some(output.display().to_string().as_str()));
        assert_eq!(summary.identifiers_processed, 2);
        assert_eq!(summary.identifiers_found, 1);
        assert_eq!(summary.identifiers_classified, 1);
        assert_eq!(summary.api_calls_made, 1);
        assert_eq!(summary.identifiers_not_found, vec!["ABCD1234"]);
        assert!(summary.errors.is_empty());

        let written = CsvTable::load(&output).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(&written.headers()[7], "FRS102_Classification");
        assert_eq!(&written.rows()[0][3], "=IF(B2>0,\"Revenue\",\"\")");
        assert_eq!(&written.rows()[0][7], "Section for 00CAC489");
    }

    #[tokio::test]
    async fn test_run_rejects_empty_guid_list() {
        let dir = tempfile::tempdir().unwrap();
        let guids = dir.path().join("guids.csv");
        std::fs::write(&guids, "GUID\n\n").unwrap();
        let pipeline = ClassificationPipeline::new(config(), ScriptedClient::default());

        let err = pipeline.run(&guids, &dir.path().join("flat.csv"), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config_before_reading_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClassifierConfig {
            batch_size: 0,
            ..config()
        };
        let pipeline = ClassificationPipeline::new(config, ScriptedClient::default());

        let err = pipeline
            .run(&dir.path().join("missing.csv"), &dir.path().join("flat.csv"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(ConfigError::Invalid(_))));
        assert_eq!(pipeline.client().calls.load(Ordering::SeqCst), 0);
    }
}
