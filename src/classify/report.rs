use std::fmt::Write;

use super::types::PipelineSummary;

const NOT_FOUND_SHOWN: usize = 10;
const ERRORS_SHOWN: usize = 5;

/// Human-readable run summary
pub fn format_summary(summary: &PipelineSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "GUID Formula Processing Summary:");
    let _ = writeln!(out, "  Input GUID file:        {}", summary.guid_file);
    let _ = writeln!(out, "  Flattened data file:    {}", summary.flattened_file);
    if let Some(output) = &summary.output_file {
        let _ = writeln!(out, "  Output file:            {}", output);
    }
    let _ = writeln!(out, "  GUIDs processed:        {}", summary.identifiers_processed);
    let _ = writeln!(out, "  GUIDs found in data:    {}", summary.identifiers_found);
    let _ = writeln!(out, "  GUIDs classified:       {}", summary.identifiers_classified);
    let _ = writeln!(out, "  API calls made:         {}", summary.api_calls_made);
    let _ = writeln!(out, "  GUIDs not found:        {}", summary.identifiers_not_found.len());
    let _ = writeln!(out, "  Classification errors:  {}", summary.errors.len());

    write_truncated(&mut out, "GUIDs not found in flattened data:", &summary.identifiers_not_found, NOT_FOUND_SHOWN);
    write_truncated(&mut out, "Classification errors:", &summary.errors, ERRORS_SHOWN);

    out
}

fn write_truncated(out: &mut String, title: &str, items: &[String], limit: usize) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{}", title);
    for item in items.iter().take(limit) {
        let _ = writeln!(out, "    - {}", item);
    }
    if items.len() > limit {
        let _ = writeln!(out, "    ... and {} more", items.len() - limit);
    }
}

pub fn print_summary(summary: &PipelineSummary) {
    print!("{}", format_summary(summary));
}
