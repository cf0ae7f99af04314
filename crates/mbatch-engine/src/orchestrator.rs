//! Pipeline orchestrator: scans, reconciles, dispatches, archives, and keeps
//! the catalogue current.
//!
//! The catalogue is only touched on this task. Dispatch and archiving run
//! in a bounded `JoinSet`; each finished batch is upserted and the
//! catalogue saved before the next result is taken, and a batch becomes
//! PROCESSED only after its archive is in place.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use mbatch_state::{FileIndexStore, IndexCatalogue, IndexStore};
use mbatch_types::{Batch, BatchKey, EntryStatus, Fingerprint, IndexEntry};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::archive::{find_existing, ArchivedBatch, ResultArchiver};
use crate::config::types::PipelineConfig;
use crate::config::validator::validate_pipeline;
use crate::dispatch::{
    AnalysisService, DispatchResult, Dispatcher, HttpAnalysisService, PollPolicy,
};
use crate::endpoint::read_endpoint;
use crate::errors::{PipelineError, RetryPolicy};
use crate::lock::RunLock;
use crate::reconcile::reconcile;
use crate::reindex;
use crate::report::RunReport;
use crate::result::{CheckResult, ReindexResult, RunOutcome};
use crate::scanner::SourceScanner;

/// Diagnostic recorded for batches whose matrix is too small to analyse.
pub const INSUFFICIENT_DATA: &str = "insufficient data";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Run blocking filesystem work off the async runtime.
async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        PipelineError::Infrastructure(anyhow::anyhow!("{what} task panicked: {e}"))
    })
}

async fn scan_source(config: &PipelineConfig, report: &mut RunReport) -> Result<Vec<Batch>, PipelineError> {
    let scanner = SourceScanner::new(
        config.source.root.clone(),
        config.source.id_column.clone(),
        config.run.source.clone(),
        config.source.fingerprint,
    );
    let (scanned, stage_report) = blocking("scan", move || {
        let mut stage_report = RunReport::new();
        let scanned = scanner.scan(&mut stage_report);
        (scanned, stage_report)
    })
    .await?;
    // Notes from a failed scan are discarded along with its batches.
    let batches = scanned?;
    report.merge(stage_report);
    Ok(batches)
}

/// Load the catalogue, moving any tolerated store problems into `report`.
/// Returns `true` alongside the catalogue when the persisted form needs
/// rewriting.
async fn load_catalogue(
    store: &Arc<dyn IndexStore>,
    report: &mut RunReport,
) -> Result<(IndexCatalogue, bool), PipelineError> {
    let loader = Arc::clone(store);
    let catalogue = blocking("index load", move || loader.load()).await??;
    let warnings = store.take_warnings();
    let needs_repair = !warnings.is_empty();
    for warning in warnings {
        report.warning(warning, None);
    }
    Ok((catalogue, needs_repair))
}

async fn save_catalogue(store: &Arc<dyn IndexStore>, catalogue: &IndexCatalogue) -> Result<(), PipelineError> {
    let store = Arc::clone(store);
    let snapshot = catalogue.clone();
    blocking("index save", move || store.save(&snapshot))
        .await?
        .map_err(|e| PipelineError::Infrastructure(anyhow::Error::new(e).context("Failed to save index")))
}

fn processed_entry(batch_key: BatchKey, fingerprint: Fingerprint, archived: ArchivedBatch) -> IndexEntry {
    IndexEntry {
        batch_key,
        run_version: archived.manifest.run_version,
        status: EntryStatus::Processed,
        result_location: Some(archived.location),
        content_fingerprint: fingerprint,
        sample_count: Some(archived.manifest.sample_count),
        feature_count: archived.manifest.feature_count,
        last_processed_at: archived.manifest.archived_at,
        diagnostic: None,
    }
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Run the pipeline against the analysis service named by the endpoint file.
///
/// # Errors
///
/// Returns a fatal [`PipelineError`]; per-batch failures are reported in
/// the returned [`RunOutcome`] instead.
pub async fn execute_pipeline(config: &PipelineConfig) -> Result<RunOutcome, PipelineError> {
    validate_pipeline(config).map_err(PipelineError::Config)?;
    let endpoint = read_endpoint(&config.service.endpoint_file).map_err(PipelineError::Config)?;
    let service = HttpAnalysisService::new(
        endpoint,
        Duration::from_secs(config.service.request_timeout_secs),
    )
    .map_err(|e| PipelineError::Config(anyhow::Error::new(e)))?;
    execute_pipeline_with(config, Arc::new(service)).await
}

/// Run the pipeline against `service`, with the file-backed index.
///
/// # Errors
///
/// See [`execute_pipeline`].
pub async fn execute_pipeline_with<S>(
    config: &PipelineConfig,
    service: Arc<S>,
) -> Result<RunOutcome, PipelineError>
where
    S: AnalysisService + 'static,
{
    let store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::new(
        config.index.paths(),
        config.run.source.clone(),
    ));
    execute_pipeline_with_store(config, service, store).await
}

/// Run the pipeline against `service` and `store`.
///
/// # Errors
///
/// See [`execute_pipeline`].
#[allow(clippy::too_many_lines)]
pub async fn execute_pipeline_with_store<S>(
    config: &PipelineConfig,
    service: Arc<S>,
    store: Arc<dyn IndexStore>,
) -> Result<RunOutcome, PipelineError>
where
    S: AnalysisService + 'static,
{
    validate_pipeline(config).map_err(PipelineError::Config)?;
    let start = Instant::now();
    let run_source = config.run.source.clone();
    let run_version = config.run.version.clone();
    tracing::info!(
        pipeline = config.pipeline,
        run_source = %run_source,
        run_version = %run_version,
        service = %service.describe(),
        index = %store.describe(),
        "Starting pipeline run"
    );

    let _lock = RunLock::acquire(&config.results.root, &run_source, &run_version)?;
    let mut report = RunReport::new();
    let mut outcome = RunOutcome::new(run_source.clone(), run_version.clone());

    let (loaded, needs_repair) = load_catalogue(&store, &mut report).await?;
    if let Some(latest) = loaded.latest_run_version() {
        if &run_version < latest {
            return Err(PipelineError::Config(anyhow::anyhow!(
                "run version '{run_version}' is older than '{latest}', the newest run in the catalogue"
            )));
        }
    }
    let batches = scan_source(config, &mut report).await?;
    let reconciliation = reconcile(&batches, &loaded);
    outcome.scanned = batches.len();
    outcome.unchanged = reconciliation.unchanged.len();
    tracing::info!(
        new = reconciliation.new.len(),
        changed = reconciliation.changed.len(),
        unchanged = reconciliation.unchanged.len(),
        stale = reconciliation.stale.len(),
        "Reconciled scan against catalogue"
    );

    let mut catalogue = loaded.clone();
    let by_key: BTreeMap<BatchKey, Batch> = batches
        .into_iter()
        .map(|b| (b.batch_key.clone(), b))
        .collect();

    for key in &reconciliation.stale {
        if catalogue.mark_stale(key) {
            report.warning("no longer present in source tree; marked STALE", Some(key));
            outcome.stale.push(key.clone());
        }
    }

    for key in &reconciliation.unchanged {
        if catalogue.set_current_status(key, EntryStatus::Processed) {
            tracing::info!(batch_key = %key, "Batch reappeared unchanged; restored to PROCESSED");
            outcome.revived.push(key.clone());
        }
    }

    let now = now_rfc3339();
    let mut to_dispatch: Vec<(Batch, Option<IndexEntry>)> = Vec::new();
    for key in reconciliation.pending() {
        let Some(batch) = by_key.get(key) else {
            continue;
        };
        let current = catalogue.lookup(key).cloned();

        if !batch.usable {
            let recorded = current.as_ref().is_some_and(|e| {
                e.status == EntryStatus::Failed
                    && e.content_fingerprint == batch.content_fingerprint
                    && e.diagnostic.as_deref() == Some(INSUFFICIENT_DATA)
            });
            if !recorded {
                catalogue.upsert(IndexEntry {
                    batch_key: key.clone(),
                    run_version: run_version.clone(),
                    status: EntryStatus::Failed,
                    result_location: None,
                    content_fingerprint: batch.content_fingerprint.clone(),
                    sample_count: None,
                    feature_count: None,
                    last_processed_at: now.clone(),
                    diagnostic: Some(INSUFFICIENT_DATA.to_string()),
                });
                report.warning(
                    "insufficient data (needs more than one sample and feature); not dispatched",
                    Some(key),
                );
            }
            outcome.unusable.push(key.clone());
            continue;
        }

        if let Some(archived) = find_existing(&config.results.root, &run_source, batch) {
            let not_older = current
                .as_ref()
                .is_none_or(|e| archived.manifest.run_version >= e.run_version);
            if not_older {
                report.warning(
                    format!(
                        "already archived at {}; indexed without dispatch",
                        archived.location.display()
                    ),
                    Some(key),
                );
                catalogue.upsert(processed_entry(
                    key.clone(),
                    batch.content_fingerprint.clone(),
                    archived,
                ));
                outcome.adopted.push(key.clone());
                continue;
            }
        }

        catalogue.upsert(IndexEntry {
            batch_key: key.clone(),
            run_version: run_version.clone(),
            status: EntryStatus::New,
            result_location: None,
            content_fingerprint: batch.content_fingerprint.clone(),
            sample_count: None,
            feature_count: None,
            last_processed_at: now.clone(),
            diagnostic: None,
        });
        to_dispatch.push((batch.clone(), current));
    }

    if needs_repair || catalogue != loaded {
        save_catalogue(&store, &catalogue).await?;
    }

    if !to_dispatch.is_empty() {
        dispatch_all(config, service, &store, &mut catalogue, to_dispatch, &mut report, &mut outcome).await?;
    }

    outcome.notes = report.drain();
    outcome.duration_secs = start.elapsed().as_secs_f64();
    tracing::info!(
        processed = outcome.processed.len(),
        failed = outcome.failed.len(),
        adopted = outcome.adopted.len(),
        unusable = outcome.unusable.len(),
        duration_secs = outcome.duration_secs,
        "Pipeline run finished"
    );
    Ok(outcome)
}

enum BatchCompletion {
    Archived(ArchivedBatch),
    Failed(String),
}

async fn dispatch_all<S>(
    config: &PipelineConfig,
    service: Arc<S>,
    store: &Arc<dyn IndexStore>,
    catalogue: &mut IndexCatalogue,
    batches: Vec<(Batch, Option<IndexEntry>)>,
    report: &mut RunReport,
    outcome: &mut RunOutcome,
) -> Result<(), PipelineError>
where
    S: AnalysisService + 'static,
{
    let dispatcher = Dispatcher::new(
        service,
        RetryPolicy {
            max_retries: config.resources.max_retries,
            backoff_base_ms: config.resources.backoff_base_ms,
            backoff_max_ms: config.resources.backoff_max_ms,
        },
        PollPolicy {
            interval: Duration::from_millis(config.service.poll_interval_ms),
            max_polls: config.service.max_polls,
        },
        config.run.version.clone(),
        config.service.util_dir.clone(),
    );
    let archiver = ResultArchiver::new(
        config.results.root.clone(),
        config.run.source.clone(),
        config.run.version.clone(),
    );
    let parallelism = usize::try_from(config.resources.parallelism.max(1)).unwrap_or(1);
    let permits = Arc::new(Semaphore::new(parallelism));
    tracing::info!(batches = batches.len(), parallelism, "Dispatching batches");

    let mut join_set: JoinSet<(BatchKey, Fingerprint, BatchCompletion)> = JoinSet::new();
    for (batch, current) in batches {
        let dispatcher = dispatcher.clone();
        let archiver = archiver.clone();
        let permits = Arc::clone(&permits);
        join_set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let key = batch.batch_key.clone();
            let fingerprint = batch.content_fingerprint.clone();
            let result = dispatcher.dispatch(&batch, current.as_ref()).await;
            let completion = match result {
                DispatchResult::Failure { diagnostic, .. } => {
                    BatchCompletion::Failed(format!("dispatch failed: {diagnostic}"))
                }
                result => {
                    match tokio::task::spawn_blocking(move || archiver.archive(&batch, &result)).await {
                        Ok(Ok(archived)) => BatchCompletion::Archived(archived),
                        Ok(Err(e)) => BatchCompletion::Failed(format!("archive failed: {e}")),
                        Err(e) => BatchCompletion::Failed(format!("archive task panicked: {e}")),
                    }
                }
            };
            (key, fingerprint, completion)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        let (key, fingerprint, completion) = joined.map_err(|e| {
            PipelineError::Infrastructure(anyhow::anyhow!("dispatch task panicked: {e}"))
        })?;
        match completion {
            BatchCompletion::Archived(archived) => {
                catalogue.upsert(processed_entry(key.clone(), fingerprint, archived));
                outcome.processed.push(key);
            }
            BatchCompletion::Failed(diagnostic) => {
                report.error(diagnostic.clone(), Some(&key));
                catalogue.upsert(IndexEntry {
                    batch_key: key.clone(),
                    run_version: config.run.version.clone(),
                    status: EntryStatus::Failed,
                    result_location: None,
                    content_fingerprint: fingerprint,
                    sample_count: None,
                    feature_count: None,
                    last_processed_at: now_rfc3339(),
                    diagnostic: Some(diagnostic),
                });
                outcome.failed.push(key);
            }
        }
        save_catalogue(store, catalogue).await?;
    }

    outcome.processed.sort();
    outcome.failed.sort();
    Ok(())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

/// Scan and reconcile without dispatching, locking, or writing anything.
///
/// # Errors
///
/// Returns a fatal [`PipelineError`] for bad configuration, a failed scan,
/// or a corrupt index.
pub async fn check_pipeline(config: &PipelineConfig) -> Result<CheckResult, PipelineError> {
    validate_pipeline(config).map_err(PipelineError::Config)?;
    tracing::info!(
        pipeline = config.pipeline,
        run_source = %config.run.source,
        "Checking pipeline"
    );

    let mut report = RunReport::new();
    let endpoint = match read_endpoint(&config.service.endpoint_file) {
        Ok(url) => Some(url.to_string()),
        Err(e) => {
            report.warning(format!("analysis service unavailable: {e:#}"), None);
            None
        }
    };

    let batches = scan_source(config, &mut report).await?;
    let store: Arc<dyn IndexStore> = Arc::new(FileIndexStore::new(
        config.index.paths(),
        config.run.source.clone(),
    ));
    let (catalogue, _) = load_catalogue(&store, &mut report).await?;
    let reconciliation = reconcile(&batches, &catalogue);
    let unusable = batches
        .iter()
        .filter(|b| !b.usable)
        .map(|b| b.batch_key.clone())
        .filter(|k| reconciliation.pending().any(|p| p == k))
        .collect();

    Ok(CheckResult {
        run_source: config.run.source.clone(),
        scanned: batches.len(),
        reconciliation,
        unusable,
        endpoint,
        notes: report.drain(),
    })
}

// ---------------------------------------------------------------------------
// reindex
// ---------------------------------------------------------------------------

/// Rebuild the index for the configured run source from the results tree.
///
/// # Errors
///
/// Returns a fatal [`PipelineError`] if the `reindex` section is missing,
/// the results tree is locked, or the rebuilt index cannot be installed.
pub async fn reindex_pipeline(config: &PipelineConfig) -> Result<ReindexResult, PipelineError> {
    validate_pipeline(config).map_err(PipelineError::Config)?;
    let reindex_config = config.reindex.clone().ok_or_else(|| {
        PipelineError::Config(anyhow::anyhow!("reindex requires a 'reindex' section with temp_dir"))
    })?;
    let run_source = config.run.source.clone();
    tracing::info!(
        pipeline = config.pipeline,
        run_source = %run_source,
        results = %config.results.root.display(),
        "Rebuilding index from results tree"
    );

    let _lock = RunLock::acquire(&config.results.root, &run_source, &config.run.version)?;
    let suffix = reindex_config.effective_suffix(&config.run.version);
    let results_root = config.results.root.clone();
    let live = config.index.paths();

    let (installed, mut report) = blocking("reindex", move || {
        let mut report = RunReport::new();
        let installed = reindex::rebuild(
            &results_root,
            &run_source,
            &live,
            &reindex_config.temp_dir,
            &suffix,
            &mut report,
        );
        (installed, report)
    })
    .await?;
    let (catalogue, swap) = installed?;

    Ok(ReindexResult {
        run_source: config.run.source.clone(),
        batches: catalogue.len(),
        entries: catalogue.all_entries().count(),
        backups: swap.backups,
        notes: report.drain(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use mbatch_state::MemoryIndexStore;
    use mbatch_types::wire::{JobAck, JobRequest, JobStatusReport};

    use crate::config::parser::parse_pipeline_str;
    use crate::dispatch::DispatchError;

    struct RefusingService;

    impl AnalysisService for RefusingService {
        async fn submit(&self, _request: &JobRequest) -> Result<JobAck, DispatchError> {
            Err(DispatchError::status(400, "rejected"))
        }

        async fn status(&self, _job_id: &str) -> Result<JobStatusReport, DispatchError> {
            Err(DispatchError::status(404, "unknown job"))
        }

        fn describe(&self) -> String {
            "refusing".into()
        }
    }

    fn config(root: &Path) -> PipelineConfig {
        let yaml = format!(
            r#"
version: "1.0"
pipeline: unit
run:
  version: "2024_01_01"
  source: GDC
source:
  root: {root}/src
  id_column: aliquot_barcode
results:
  root: {root}/results
index:
  tabular: {root}/idx/index.tsv
  catalogue: {root}/idx/catalogue.json
service:
  endpoint_file: {root}/server.txt
  poll_interval_ms: 0
resources:
  max_retries: 0
  backoff_base_ms: 0
  backoff_max_ms: 0
"#,
            root = root.display()
        );
        parse_pipeline_str(&yaml).unwrap()
    }

    fn write_batch(root: &Path, key: &str, matrix: &str) {
        let dir = root.join("src").join(key);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("matrix.tsv"), matrix).unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_saved_through_store() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(dir.path(), "A", "g\ts1\ts2\nx\t1\t2\ny\t3\t4\n");
        let store = Arc::new(MemoryIndexStore::new(mbatch_types::RunSource::new("GDC")));

        let outcome = execute_pipeline_with_store(
            &config(dir.path()),
            Arc::new(RefusingService),
            Arc::clone(&store) as Arc<dyn IndexStore>,
        )
        .await
        .unwrap();

        assert_eq!(outcome.failed, [BatchKey::new("A")]);
        assert_eq!(outcome.notes.len(), 1);
        // Pre-dispatch NEW mark, then the FAILED result.
        assert_eq!(store.save_count(), 2);
        let entry = store.load().unwrap().lookup(&BatchKey::new("A")).cloned().unwrap();
        assert_eq!(entry.status, EntryStatus::Failed);
        assert!(entry.diagnostic.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_unusable_batch_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        write_batch(dir.path(), "tiny", "g\ts1\nx\t1\n");
        let store = Arc::new(MemoryIndexStore::new(mbatch_types::RunSource::new("GDC")));
        let cfg = config(dir.path());

        let first = execute_pipeline_with_store(&cfg, Arc::new(RefusingService), Arc::clone(&store) as Arc<dyn IndexStore>)
            .await
            .unwrap();
        let second = execute_pipeline_with_store(&cfg, Arc::new(RefusingService), Arc::clone(&store) as Arc<dyn IndexStore>)
            .await
            .unwrap();

        assert_eq!(first.unusable, [BatchKey::new("tiny")]);
        assert_eq!(first.notes.len(), 1);
        assert!(second.notes.is_empty());
        assert_eq!(store.save_count(), 1);
        let entry = store.load().unwrap().lookup(&BatchKey::new("tiny")).cloned().unwrap();
        assert_eq!(entry.diagnostic.as_deref(), Some(INSUFFICIENT_DATA));
    }

    #[tokio::test]
    async fn test_reindex_without_section_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = reindex_pipeline(&config(dir.path())).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
