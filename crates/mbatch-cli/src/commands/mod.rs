pub mod check;
pub mod reindex;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use mbatch_engine::config::types::PipelineConfig;
use mbatch_engine::config::{parse_pipeline, validate_pipeline};
use mbatch_types::{BatchKey, ReportNote, Severity};

/// Parse and validate the pipeline file shared by every subcommand.
fn load_pipeline(pipeline_path: &Path) -> Result<PipelineConfig> {
    let config = parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    validate_pipeline(&config)?;
    Ok(config)
}

/// Print collected notes, warnings first, then errors.
fn print_notes(notes: &[ReportNote]) {
    for severity in [Severity::Warning, Severity::Error] {
        let matching: Vec<_> = notes.iter().filter(|n| n.severity == severity).collect();
        if matching.is_empty() {
            continue;
        }
        let label = match severity {
            Severity::Warning => "Warnings",
            Severity::Error => "Errors",
        };
        println!("\n{label} ({}):", matching.len());
        for note in matching {
            println!("  {note}");
        }
    }
}

fn print_keys(label: &str, keys: &[BatchKey]) {
    if keys.is_empty() {
        return;
    }
    println!("  {label}:");
    for key in keys {
        println!("    {key}");
    }
}
