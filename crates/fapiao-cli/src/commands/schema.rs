//! Schema command - describe the canonical vocabulary and taxonomies.

use clap::Args;
use console::style;
use serde_json::{Map, Value, json};

use fapiao_core::invoice::rules::{CoercionKind, KeyTable, QuantityDefault};
use fapiao_core::{CanonicalKey, ExtractionTables, InvoiceTaxonomy};

/// Arguments for the schema command.
#[derive(Args)]
pub struct SchemaArgs {
    /// Only show the requirements of one invoice type
    #[arg(long)]
    taxonomy: Option<InvoiceTaxonomy>,

    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Also list the built-in provider labels
    #[arg(long)]
    labels: bool,
}

pub async fn run(args: SchemaArgs) -> anyhow::Result<()> {
    let tables = ExtractionTables::standard();

    let taxonomies: Vec<InvoiceTaxonomy> = match args.taxonomy {
        Some(taxonomy) => vec![taxonomy],
        None => InvoiceTaxonomy::ALL.to_vec(),
    };

    if args.json {
        let schema = schema_json(&tables, &taxonomies, args.labels);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    if args.taxonomy.is_none() {
        println!("{}", style("Canonical fields:").bold());
        let keys: Vec<CanonicalKey> = CanonicalKey::vocabulary().collect();
        let width = keys.iter().map(|k| k.as_str().len()).max().unwrap_or(0);
        for key in &keys {
            println!(
                "  {:width$}  {}",
                key.as_str(),
                kind_label(tables.coercions.kind_of(key)),
                width = width
            );
        }
        println!();
    }

    for taxonomy in &taxonomies {
        println!(
            "{} ({})",
            style(taxonomy.display_name()).bold(),
            taxonomy.as_str()
        );
        println!("  required:   {}", join_keys(tables.requirements.required(*taxonomy)));
        println!("  applicable: {}", join_keys(tables.requirements.applicable(*taxonomy)));
    }

    if args.labels {
        println!();
        println!("{}", style("Provider labels:").bold());
        for (label, key) in KeyTable::standard_entries() {
            println!("  {} -> {}", label, key);
        }
    }

    Ok(())
}

fn schema_json(tables: &ExtractionTables, taxonomies: &[InvoiceTaxonomy], labels: bool) -> Value {
    let fields: Map<String, Value> = CanonicalKey::vocabulary()
        .map(|key| {
            let kind = kind_label(tables.coercions.kind_of(&key));
            (key.as_str().to_string(), Value::String(kind))
        })
        .collect();

    let types: Map<String, Value> = taxonomies
        .iter()
        .map(|taxonomy| {
            (
                taxonomy.as_str().to_string(),
                json!({
                    "name": taxonomy.display_name(),
                    "required": tables.requirements.required(*taxonomy),
                    "applicable": tables.requirements.applicable(*taxonomy),
                }),
            )
        })
        .collect();

    let mut schema = json!({ "fields": fields, "taxonomies": types });
    if labels {
        let entries: Map<String, Value> = KeyTable::standard_entries()
            .iter()
            .map(|(label, key)| (label.to_string(), Value::String(key.to_string())))
            .collect();
        schema["labels"] = Value::Object(entries);
    }
    schema
}

fn kind_label(kind: CoercionKind) -> String {
    match kind {
        CoercionKind::Date => "date".to_string(),
        CoercionKind::Money => "money".to_string(),
        CoercionKind::Quantity { default: QuantityDefault::One } => "quantity (default 1)".to_string(),
        CoercionKind::Quantity { default: QuantityDefault::Zero } => "quantity (default 0)".to_string(),
        CoercionKind::Percentage => "percentage".to_string(),
        CoercionKind::Text => "text".to_string(),
    }
}

fn join_keys(keys: &[CanonicalKey]) -> String {
    if keys.is_empty() {
        return "-".to_string();
    }
    keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
}
