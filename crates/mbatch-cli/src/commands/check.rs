use std::path::Path;

use anyhow::Result;

use mbatch_engine::check_pipeline;

use super::{load_pipeline, print_keys, print_notes};

/// Execute the `check` command: validate the pipeline and report pending work
/// without dispatching or writing anything.
pub async fn execute(pipeline_path: &Path) -> Result<()> {
    let config = load_pipeline(pipeline_path)?;
    println!("Pipeline structure: OK");

    let result = check_pipeline(&config).await?;

    match &result.endpoint {
        Some(url) => println!("Analysis service:   {url}"),
        None => println!("Analysis service:   UNAVAILABLE"),
    }
    println!("Index catalogue:    OK");
    println!("Batches scanned:    {}", result.scanned);

    let rec = &result.reconciliation;
    print_keys("New", &rec.new);
    print_keys("Changed", &rec.changed);
    print_keys("Would become stale", &rec.stale);
    print_keys("Unusable (not dispatched)", &result.unusable);
    println!(
        "\n{} batch(es) would be dispatched, {} unchanged.",
        rec.new.len() + rec.changed.len() - result.unusable.len(),
        rec.unchanged.len()
    );

    print_notes(&result.notes);
    if result.endpoint.is_none() {
        anyhow::bail!("One or more checks failed");
    }
    Ok(())
}
