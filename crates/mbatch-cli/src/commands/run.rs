use std::path::Path;

use anyhow::Result;

use mbatch_engine::execute_pipeline;

use super::{load_pipeline, print_keys, print_notes};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;

    tracing::info!(
        pipeline = config.pipeline,
        run_source = %config.run.source,
        run_version = %config.run.version,
        source_root = %config.source.root.display(),
        "Pipeline validated"
    );

    let result = execute_pipeline(&config).await?;

    println!(
        "Pipeline '{}' finished ({} {}).",
        config.pipeline, result.run_source, result.run_version
    );
    println!("  Batches scanned: {}", result.scanned);
    println!("  Unchanged:       {}", result.unchanged);
    println!("  Processed:       {}", result.processed.len());
    println!("  Failed:          {}", result.failed.len());
    println!("  Adopted:         {}", result.adopted.len());
    println!("  Unusable:        {}", result.unusable.len());
    println!("  Stale:           {}", result.stale.len());
    if !result.revived.is_empty() {
        println!("  Revived:         {}", result.revived.len());
    }
    println!("  Duration:        {:.2}s", result.duration_secs);
    print_keys("Failed batches", &result.failed);

    print_notes(&result.notes);
    Ok(())
}
