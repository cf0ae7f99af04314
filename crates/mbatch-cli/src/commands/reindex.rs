use std::path::Path;

use anyhow::Result;

use mbatch_engine::reindex_pipeline;

use super::{load_pipeline, print_notes};

/// Execute the `reindex` command: rebuild the index files from the results tree.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;

    let result = reindex_pipeline(&config).await?;

    println!(
        "Rebuilt index for {} from {}.",
        result.run_source,
        config.results.root.display()
    );
    println!("  Batches:         {}", result.batches);
    println!("  History entries: {}", result.entries);
    for backup in &result.backups {
        println!("  Previous index:  {}", backup.display());
    }

    print_notes(&result.notes);
    Ok(())
}
