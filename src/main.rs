use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use guid_tools::classify::{print_summary, ClassificationPipeline, OpenAiClient};
use guid_tools::config::ClassifierConfig;
use guid_tools::dataset::{
    default_output_path, load_identifier_mappings, validate_mappings, write_identifier_template, TemplateKind,
};
use guid_tools::excel::{
    extract_identifier_rows, flatten_workbook, write_extraction_csv, write_flatten_metadata, write_flattened_csv,
    FlattenOptions, Workbook,
};
use guid_tools::logging;

#[derive(Parser)]
#[command(name = "guid-tools", version, about = "Flatten workbooks, extract GUID rows and classify formulas.")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr.
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Flatten workbooks into one CSV record per cell.
    Flatten {
        /// Workbook paths or glob patterns.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output CSV (single input only).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also emit empty cells.
        #[arg(long)]
        include_empty: bool,

        /// Write `<stem>_metadata.json` next to each CSV.
        #[arg(long)]
        metadata: bool,
    },

    /// Extract a column range from the rows holding each mapped GUID.
    Extract {
        /// Workbook to search.
        workbook: PathBuf,

        /// CSV with `GUID` and `SheetName` columns.
        mapping: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// First column to extract (1-based, inclusive).
        #[arg(long, default_value_t = 124)]
        start_col: u32,

        /// Last column to extract (1-based, inclusive).
        #[arg(long, default_value_t = 200)]
        end_col: u32,
    },

    /// Classify the formula text of listed GUIDs in a flattened dataset.
    Classify {
        /// CSV listing the GUIDs to classify.
        guids: PathBuf,

        /// Flattened dataset CSV.
        flattened: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the classification instruction.
        #[arg(long)]
        instruction: Option<String>,

        /// JSON configuration file.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Write an input template CSV.
    Template {
        #[arg(value_enum)]
        kind: TemplateArg,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TemplateArg {
    GuidList,
    GuidMapping,
}

impl From<TemplateArg> for TemplateKind {
    fn from(arg: TemplateArg) -> Self {
        match arg {
            TemplateArg::GuidList => TemplateKind::GuidList,
            TemplateArg::GuidMapping => TemplateKind::GuidMapping,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Failed to initialise logging: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Flatten {
            inputs,
            output,
            include_empty,
            metadata,
        } => flatten(&inputs, output.as_deref(), include_empty, metadata),
        Command::Extract {
            workbook,
            mapping,
            output,
            start_col,
            end_col,
        } => extract(&workbook, &mapping, output.as_deref(), start_col, end_col),
        Command::Classify {
            guids,
            flattened,
            output,
            instruction,
            config,
        } => classify(&guids, &flattened, output.as_deref(), instruction, config.as_deref()),
        Command::Template { kind, output } => template(kind.into(), output),
    }
}

fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matches: Vec<PathBuf> = glob::glob(pattern)
            .with_context(|| format!("invalid input pattern {pattern}"))?
            .filter_map(|entry| entry.ok())
            .collect();

        if matches.is_empty() {
            // Not a pattern, or nothing matched; let the reader report it
            paths.push(PathBuf::from(pattern));
        } else {
            paths.extend(matches);
        }
    }
    Ok(paths)
}

fn flatten(inputs: &[String], output: Option<&Path>, include_empty: bool, metadata: bool) -> Result<()> {
    let paths = expand_inputs(inputs)?;
    if output.is_some() && paths.len() > 1 {
        bail!("--output can only be used with a single input file ({} given)", paths.len());
    }

    let options = FlattenOptions {
        include_empty_cells: include_empty,
    };

    for path in &paths {
        let mut result =
            flatten_workbook(path, &options).with_context(|| format!("failed to flatten {}", path.display()))?;
        let csv_path = write_flattened_csv(&mut result, output)?;

        if metadata {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("workbook");
            let metadata_path = csv_path.with_file_name(format!("{stem}_metadata.json"));
            write_flatten_metadata(&result.summary, &metadata_path)?;
        }

        let summary = &result.summary;
        println!("Flattened {}", path.display());
        println!("  Output:           {}", csv_path.display());
        println!("  Total cells:      {}", summary.total_cells);
        println!("  Sheets processed: {}", summary.sheets_processed);
        for (value_type, count) in &summary.value_types {
            println!("    {value_type}: {count}");
        }
    }

    Ok(())
}

fn extract(workbook_path: &Path, mapping: &Path, output: Option<&Path>, start_col: u32, end_col: u32) -> Result<()> {
    if start_col == 0 || end_col == 0 {
        bail!("column indices must be positive");
    }
    if start_col >= end_col {
        bail!("start column ({start_col}) must be less than end column ({end_col})");
    }

    let mappings = load_identifier_mappings(mapping)?;
    validate_mappings(&mappings);

    let workbook = Workbook::open(workbook_path)
        .with_context(|| format!("failed to open {}", workbook_path.display()))?;
    let mut result = extract_identifier_rows(&workbook, &mappings, start_col, end_col)?;

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => default_output_path(workbook_path, "_guid_extracted", None),
    };
    write_extraction_csv(&mut result, &output)?;

    let summary = &result.summary;
    println!("GUID Extraction Summary:");
    println!("  Output:          {}", output.display());
    println!("  GUIDs processed: {}", summary.identifiers_processed);
    println!("  GUIDs found:     {}", summary.identifiers_found);
    println!("  Column range:    {}", summary.column_range);
    println!("  Sheets:          {}", summary.sheets_processed.join(", "));
    if !summary.identifiers_not_found.is_empty() {
        println!("  Not found:       {}", summary.identifiers_not_found.join(", "));
    }

    Ok(())
}

fn classify(
    guids: &Path,
    flattened: &Path,
    output: Option<&Path>,
    instruction: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = ClassifierConfig::load(config_path).context("failed to load configuration")?;
    if let Some(instruction) = instruction {
        config.instruction_text = instruction;
    }

    // Fail on a missing key before reading any input
    let client = OpenAiClient::from_env(&config)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let pipeline = ClassificationPipeline::new(config, client);
    let summary = runtime.block_on(pipeline.run(guids, flattened, output))?;

    print_summary(&summary);
    Ok(())
}

fn template(kind: TemplateKind, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| match kind {
        TemplateKind::GuidList => PathBuf::from("guid_list_template.csv"),
        TemplateKind::GuidMapping => PathBuf::from("guid_mapping_template.csv"),
    });

    write_identifier_template(kind, &output)?;
    println!("Template written to {}", output.display());
    Ok(())
}
