//! Extract command - turn a single provider payload into a canonical record.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use console::style;
use tracing::{debug, info};

use fapiao_core::{ExtractionEngine, InvoiceExtractor, InvoiceTaxonomy};

use super::output::{OutputFormat, format_failure, format_result, load_config};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Payload file (OCR response or LLM completion JSON), `-` for stdin
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Force the invoice type (e.g. train_ticket)
    #[arg(long)]
    hint: Option<InvoiceTaxonomy>,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Show extraction confidence summary
    #[arg(long)]
    show_confidence: bool,

    /// Fail when the record does not pass validation
    #[arg(long)]
    strict: bool,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = load_config(config_path)?;
    let engine = ExtractionEngine::with_config(config)?;

    let payload = read_input(&args.input)?;
    info!("Extracting {}", args.input.display());

    let result = match engine.extract_str(&payload, args.hint) {
        Ok(result) => result,
        Err(e) => {
            write_output(&args, &format_failure(&e, args.pretty)?)?;
            anyhow::bail!("Extraction failed ({}): {}", e.code(), e.reason());
        }
    };

    let validation = result.validation();
    if !validation.is_valid || !validation.warnings.is_empty() {
        eprintln!("{}", style("Validation issues:").yellow());
        for issue in validation.errors.iter().chain(&validation.warnings) {
            eprintln!("  - {}", issue);
        }
    }

    let output = format_result(&result, args.format, args.pretty)?;
    write_output(&args, &output)?;

    if args.show_confidence {
        eprintln!();
        eprintln!(
            "{} Extraction confidence: {:.1}%",
            style("ℹ").blue(),
            result.overall_confidence() * 100.0
        );
        if let Some(provider) = result.confidence().provider_overall {
            eprintln!(
                "{} Provider reported: {:.1}%",
                style("ℹ").blue(),
                provider * 100.0
            );
        }
        eprintln!(
            "{} Completeness: {}%",
            style("ℹ").blue(),
            validation.completeness_score
        );
    }

    debug!("Total processing time: {:?}", start.elapsed());

    if args.strict && !validation.is_valid {
        anyhow::bail!(
            "Validation failed: {}",
            validation.errors.join("; ")
        );
    }

    Ok(())
}

fn read_input(input: &Path) -> anyhow::Result<String> {
    if input.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }

    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    Ok(fs::read_to_string(input)?)
}

fn write_output(args: &ExtractArgs, content: &str) -> anyhow::Result<()> {
    if let Some(output_path) = &args.output {
        fs::write(output_path, content)?;
        eprintln!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", content);
    }
    Ok(())
}
