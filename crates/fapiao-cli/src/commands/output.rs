//! Output formatting shared by the extract and batch commands.

use std::path::Path;

use fapiao_core::models::config::FapiaoConfig;
use fapiao_core::{CanonicalInvoiceResult, ExtractionError};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output, one row per field
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

/// Load the configuration named by `--config`, or defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<FapiaoConfig> {
    match config_path {
        Some(path) => Ok(FapiaoConfig::from_file(Path::new(path))?),
        None => Ok(FapiaoConfig::default()),
    }
}

pub fn format_result(
    result: &CanonicalInvoiceResult,
    format: OutputFormat,
    pretty: bool,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json if pretty => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Json => Ok(serde_json::to_string(result)?),
        OutputFormat::Csv => format_csv(result),
        OutputFormat::Text => Ok(format_text(result)),
    }
}

/// The failure envelope as JSON. Always JSON regardless of format.
pub fn format_failure(error: &ExtractionError, pretty: bool) -> anyhow::Result<String> {
    let report = error.report();
    if pretty {
        Ok(serde_json::to_string_pretty(&report)?)
    } else {
        Ok(serde_json::to_string(&report)?)
    }
}

fn format_csv(result: &CanonicalInvoiceResult) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "invoice_type",
        "field",
        "value",
        "raw_value",
        "confidence",
        "source_key",
        "derived",
    ])?;

    for (key, field) in result.fields() {
        wtr.write_record([
            result.taxonomy().as_str(),
            key.as_str(),
            &field.typed_value.display(),
            &field.raw_value,
            &format!("{:.2}", field.confidence),
            &field.source_key,
            if field.derived { "true" } else { "false" },
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_text(result: &CanonicalInvoiceResult) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Type: {} ({})\n",
        result.taxonomy().display_name(),
        result.taxonomy()
    ));
    output.push_str(&format!("Source: {}\n", result.source()));
    output.push_str(&format!(
        "Confidence: {:.1}%\n",
        result.overall_confidence() * 100.0
    ));
    output.push('\n');

    output.push_str("Fields:\n");
    let width = result.fields().keys().map(|k| k.as_str().len()).max().unwrap_or(0);
    for (key, field) in result.fields() {
        output.push_str(&format!(
            "  {:width$}  {}  ({:.0}%{})\n",
            key.as_str(),
            field.typed_value.display(),
            field.confidence * 100.0,
            if field.derived { ", derived" } else { "" },
            width = width
        ));
    }

    if !result.line_items().is_empty() {
        output.push('\n');
        output.push_str("Line items:\n");
        for (i, item) in result.line_items().iter().enumerate() {
            output.push_str(&format!(
                "  {}. {}  x{}  {:.2}\n",
                i + 1,
                item.goods_name,
                item.quantity.normalize(),
                item.amount
            ));
        }
    }

    let validation = result.validation();
    output.push('\n');
    output.push_str(&format!(
        "Validation: {} (completeness {}%)\n",
        if validation.is_valid { "valid" } else { "invalid" },
        validation.completeness_score
    ));
    for error in &validation.errors {
        output.push_str(&format!("  error: {}\n", error));
    }
    for warning in &validation.warnings {
        output.push_str(&format!("  warning: {}\n", warning));
    }

    output
}
