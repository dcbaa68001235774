//! Batch command - extract many payload files concurrently.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use fapiao_core::{CanonicalInvoiceResult, ExtractionEngine, InvoiceExtractor, InvoiceTaxonomy};

use super::output::{OutputFormat, format_failure, format_result, load_config};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Glob pattern matching payload files (e.g. "payloads/*.json")
    #[arg(required = true)]
    input: String,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Force the invoice type for every file
    #[arg(long)]
    hint: Option<InvoiceTaxonomy>,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of parallel workers
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Outcome of extracting a single file.
struct FileResult {
    path: PathBuf,
    outcome: Outcome,
    processing_time_ms: u64,
}

enum Outcome {
    Extracted(Box<CanonicalInvoiceResult>),
    /// The engine rejected the payload; the envelope is written out.
    Rejected { code: &'static str, message: String, envelope: String },
    /// The file could not be read, or its extraction task aborted.
    Failed(String),
}

impl Outcome {
    fn error(&self) -> Option<&str> {
        match self {
            Outcome::Extracted(_) => None,
            Outcome::Rejected { message, .. } | Outcome::Failed(message) => Some(message),
        }
    }
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = load_config(config_path)?;
    let engine = Arc::new(ExtractionEngine::with_config(config)?);

    // Expand glob pattern
    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            ext.eq_ignore_ascii_case("json")
        })
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    // Each file is extracted on the blocking pool, at most `jobs` at a time
    let permits = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut handles = Vec::with_capacity(files.len());

    for path in files {
        let engine = Arc::clone(&engine);
        let permits = Arc::clone(&permits);
        let progress = progress.clone();
        let hint = args.hint;

        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await?;
            let task_path = path.clone();
            let result = tokio::task::spawn_blocking(move || extract_file(&engine, task_path, hint))
                .await
                .unwrap_or_else(|e| FileResult {
                    path,
                    outcome: Outcome::Failed(format!("extraction aborted: {}", e)),
                    processing_time_ms: 0,
                });
            progress.inc(1);
            anyhow::Ok(result)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await??);
    }

    progress.finish_and_clear();

    for result in &results {
        match &result.outcome {
            Outcome::Extracted(_) => {}
            Outcome::Rejected { code, message, .. } => {
                warn!("Failed to process {}: {} {}", result.path.display(), code, message);
            }
            Outcome::Failed(message) => {
                warn!("Failed to process {}: {}", result.path.display(), message);
            }
        }
    }

    if let Some(output_dir) = &args.output_dir {
        for result in &results {
            write_file_output(output_dir, result, args.format)?;
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let failed: Vec<&FileResult> = results.iter().filter(|r| r.outcome.error().is_some()).collect();
    let successful = results.len() - failed.len();

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} failed",
        style(successful).green(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in &failed {
            println!(
                "  - {}: {}",
                result.path.display(),
                result.outcome.error().unwrap_or("unknown error")
            );
        }

        if !args.continue_on_error {
            error!("{} files failed", failed.len());
            anyhow::bail!("Processing failed for {} of {} files", failed.len(), results.len());
        }
    }

    Ok(())
}

fn extract_file(engine: &ExtractionEngine, path: PathBuf, hint: Option<InvoiceTaxonomy>) -> FileResult {
    let file_start = Instant::now();

    let outcome = match fs::read_to_string(&path) {
        Ok(payload) => match engine.extract_str(&payload, hint) {
            Ok(result) => Outcome::Extracted(Box::new(result)),
            Err(e) => Outcome::Rejected {
                code: e.code(),
                message: e.reason().to_string(),
                envelope: format_failure(&e, true).unwrap_or_else(|_| e.to_string()),
            },
        },
        Err(e) => Outcome::Failed(e.to_string()),
    };

    let processing_time_ms = file_start.elapsed().as_millis() as u64;
    debug!("Processed {} in {}ms", path.display(), processing_time_ms);

    FileResult {
        path,
        outcome,
        processing_time_ms,
    }
}

fn write_file_output(output_dir: &Path, result: &FileResult, format: OutputFormat) -> anyhow::Result<()> {
    let stem = result
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("invoice");

    let (output_path, content) = match &result.outcome {
        Outcome::Extracted(record) => (
            output_dir.join(format!("{}.{}", stem, format.extension())),
            format_result(record, format, true)?,
        ),
        Outcome::Rejected { envelope, .. } => (
            output_dir.join(format!("{}.error.json", stem)),
            envelope.clone(),
        ),
        Outcome::Failed(_) => return Ok(()),
    };

    fs::write(&output_path, content)?;
    debug!("Wrote output to {}", output_path.display());
    Ok(())
}

fn write_summary(path: &Path, results: &[FileResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "invoice_type",
        "invoice_number",
        "invoice_date",
        "total_amount",
        "confidence",
        "completeness",
        "valid",
        "processing_time_ms",
        "error",
    ])?;

    for result in results {
        let filename = result.path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        let elapsed = result.processing_time_ms.to_string();

        match &result.outcome {
            Outcome::Extracted(record) => {
                let value = |key: &str| {
                    record
                        .value(key)
                        .map(|v| v.display())
                        .unwrap_or_default()
                };
                wtr.write_record([
                    filename,
                    "success",
                    record.taxonomy().as_str(),
                    &value("invoice_number"),
                    &value("invoice_date"),
                    &value("total_amount"),
                    &format!("{:.2}", record.overall_confidence()),
                    &record.validation().completeness_score.to_string(),
                    if record.validation().is_valid { "true" } else { "false" },
                    &elapsed,
                    "",
                ])?;
            }
            Outcome::Rejected { code, message, .. } => {
                wtr.write_record([
                    filename,
                    "error",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    "",
                    &elapsed,
                    &format!("{}: {}", code, message),
                ])?;
            }
            Outcome::Failed(message) => {
                wtr.write_record([
                    filename, "error", "", "", "", "", "", "", "", &elapsed, message,
                ])?;
            }
        }
    }

    wtr.flush()?;
    Ok(())
}
