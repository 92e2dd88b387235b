use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use guid_tools::classify::{ClassificationPipeline, ClientError, CompletionClient, PipelineError};
use guid_tools::config::{ClassifierConfig, IdentifierMode};
use guid_tools::dataset::CsvTable;
use guid_tools::excel::{flatten_workbook, write_flattened_csv, FlattenOptions, ValueType};

/// Fixed-label client that records its prompts; prompts containing `#FAIL` get a 429
#[derive(Default)]
struct RecordingClient {
    prompts: Mutex<Vec<String>>,
}

impl CompletionClient for RecordingClient {
    async fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.contains("#FAIL") {
            return Err(ClientError::Status {
                status: 429,
                body: "rate limited".into(),
            });
        }
        Ok("FRS102 Section 23 - Revenue".to_string())
    }
}

fn write(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
}

fn fast_config() -> ClassifierConfig {
    ClassifierConfig {
        batch_size: 2,
        delay_between_batches_seconds: 0.5,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn classifies_listed_guids_and_reports_errors() {
    let dir = tempfile::tempdir().unwrap();
    let guids = dir.path().join("guids.csv");
    write(&guids, "GUID,SheetName\nAAAA0001,SoCI\nAAAA0002,SoCI\nAAAA0003,PL\nMISSING1,PL\n");

    let flat = dir.path().join("flat.csv");
    write(
        &flat,
        "GUID,Sheet,RowNum,ColRef,Formula Text,CellValue,Value Type\n\
         AAAA0001,SoCI,2,A,,AAAA0001,string\n\
         AAAA0001,SoCI,2,D,=B2*2,10,formula\n\
         AAAA0002,SoCI,3,D,=B3#FAIL,x,formula\n\
         AAAA0003,PL,4,D,=TurnoverTotal/12,5,formula\n\
         OTHER001,PL,5,D,=B5,1,formula\n",
    );

    let mut config = fast_config();
    config
        .named_ranges
        .insert("TurnoverTotal".into(), "Total turnover for the period".into());
    let pipeline = ClassificationPipeline::new(config, RecordingClient::default());

    let output = dir.path().join("results").join("classified.csv");
    let start = tokio::time::Instant::now();
    let summary = pipeline.run(&guids, &flat, Some(&output)).await.unwrap();

    // Three requests in batches of two: one pause
    assert_eq!(start.elapsed(), Duration::from_millis(500));

    assert_eq!(summary.identifiers_processed, 4);
    assert_eq!(summary.identifiers_found, 3);
    assert_eq!(summary.identifiers_classified, 2);
    assert_eq!(summary.api_calls_made, 3);
    assert_eq!(summary.identifiers_not_found, vec!["MISSING1"]);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].contains("AAAA0002"));

    let written = CsvTable::load(&output).unwrap();
    assert_eq!(written.len(), 3);
    assert_eq!(&written.headers()[7], "FRS102_Classification");
    assert_eq!(&written.headers()[8], "Classification_Error");
    assert_eq!(&written.rows()[1][7], "ERROR_CLASSIFICATION");
    assert!(written.rows()[1][8].contains("429"));
    assert_eq!(&written.rows()[2][8], "");

    let prompts = pipeline_prompts(&pipeline);
    let turnover = prompts.iter().find(|p| p.contains("AAAA0003")).unwrap();
    assert!(turnover.contains("- TurnoverTotal: Total turnover for the period"));
}

fn pipeline_prompts(pipeline: &ClassificationPipeline<RecordingClient>) -> Vec<String> {
    pipeline.client().prompts.lock().unwrap().clone()
}

#[tokio::test]
async fn missing_marker_rows_fail_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let guids = dir.path().join("guids.csv");
    write(&guids, "GUID\nAAAA0001\n");
    let flat = dir.path().join("flat.csv");
    write(&flat, "GUID,Sheet,RowNum,ColRef,Formula Text,CellValue\nAAAA0001,SoCI,2,E,=1,1\n");

    let pipeline = ClassificationPipeline::new(fast_config(), RecordingClient::default());
    let err = pipeline.run(&guids, &flat, None).await.unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(pipeline_prompts(&pipeline).is_empty());
    assert!(!dir.path().join("guids_classified_formulas.csv").exists());
}

#[tokio::test]
async fn missing_input_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = ClassificationPipeline::new(fast_config(), RecordingClient::default());

    let err = pipeline
        .run(&dir.path().join("nope.csv"), &dir.path().join("flat.csv"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Dataset(_)));
}

#[tokio::test]
async fn flattened_workbook_feeds_classifier_in_optional_mode() {
    let dir = tempfile::tempdir().unwrap();
    let workbook = dir.path().join("frs.xlsx");
    let mut book = umya_spreadsheet::new_file();
    let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
    sheet.get_cell_mut((1, 2)).set_value_string("AAAA0001");
    sheet.get_cell_mut((4, 2)).set_value_string("Revenue is recognised on delivery");
    sheet.get_cell_mut((4, 3)).set_value_string("Leases are expensed");
    umya_spreadsheet::writer::xlsx::write(&book, &workbook).unwrap();

    let mut flattened = flatten_workbook(&workbook, &FlattenOptions::default()).unwrap();
    let flat = write_flattened_csv(&mut flattened, None).unwrap();

    let guids = dir.path().join("guids.csv");
    write(&guids, "GUID\nAAAA0001\n");

    let config = ClassifierConfig {
        identifier_mode: IdentifierMode::Optional,
        ..fast_config()
    };
    let pipeline = ClassificationPipeline::new(config, RecordingClient::default());
    let summary = pipeline.run(&guids, &flat, None).await.unwrap();

    // Value cells carry no formula text, so nothing is sent
    assert_eq!(summary.api_calls_made, 0);
    let written = CsvTable::load(dir.path().join("guids_classified_formulas.csv")).unwrap();
    assert!(written.is_empty());
    assert_eq!(&written.headers()[6], "FRS102_Classification");
}

#[tokio::test]
async fn workbook_formula_cell_is_flattened_and_classified() {
    let dir = tempfile::tempdir().unwrap();
    let workbook = dir.path().join("soci.xlsx");
    let mut book = umya_spreadsheet::new_file();
    let sheet = book.get_sheet_by_name_mut("Sheet1").unwrap();
    sheet.get_cell_mut((1, 2)).set_value_string("AAAA0001");
    sheet.get_cell_mut((2, 2)).set_value_number(21.0);
    sheet.get_cell_mut((4, 2)).set_formula("B2*2");
    sheet.get_cell_mut((4, 3)).set_value_string("Leases are expensed");
    umya_spreadsheet::writer::xlsx::write(&book, &workbook).unwrap();

    let mut flattened = flatten_workbook(&workbook, &FlattenOptions::default()).unwrap();
    let formula = flattened
        .records
        .iter()
        .find(|r| r.row == 2 && r.column_ref == "D")
        .unwrap();
    assert_eq!(formula.formula_text, "=B2*2");
    assert_eq!(formula.value_type, ValueType::Formula);

    let flat = write_flattened_csv(&mut flattened, None).unwrap();
    let table = CsvTable::load(&flat).unwrap();
    let row = table.rows().iter().find(|r| &r[1] == "2" && &r[2] == "D").unwrap();
    assert_eq!(&row[3], "=B2*2");
    assert_eq!(&row[5], "formula");

    let guids = dir.path().join("guids.csv");
    write(&guids, "GUID\nAAAA0001\n");
    let config = ClassifierConfig {
        identifier_mode: IdentifierMode::Optional,
        ..fast_config()
    };
    let pipeline = ClassificationPipeline::new(config, RecordingClient::default());
    let summary = pipeline.run(&guids, &flat, None).await.unwrap();

    assert_eq!(summary.api_calls_made, 1);
    assert_eq!(summary.identifiers_classified, 1);

    let prompts = pipeline_prompts(&pipeline);
    assert!(prompts[0].contains("=B2*2"));
    assert!(prompts[0].contains("Sheet1"));

    let written = CsvTable::load(dir.path().join("guids_classified_formulas.csv")).unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(&written.rows()[0][3], "=B2*2");
    assert_eq!(&written.rows()[0][6], "FRS102 Section 23 - Revenue");
}
