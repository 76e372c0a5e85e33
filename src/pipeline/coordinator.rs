//! C — pipeline coordinator: drives P1, then a bounded worker pool running
//! P2 → P3 → P4 per publication, with per-stage deadlines, idempotent
//! restart, and an adaptive source policy. Generalizes the teacher's
//! `MetaSearchClient::search` semaphore-bounded task-group pattern
//! (`client/meta_search.rs`) from one fan-out round to the full four-stage
//! pipeline.

use crate::cache::Cache;
use crate::config::Config;
use crate::extraction::extract_for_publication;
use crate::http_client::HttpClient;
use crate::model::{AttemptStatus, Dataset, PipelineEvent, Publication, Relationship};
use crate::pipeline::{citation_discovery, pdf_acquisition, url_collection};
use crate::sources::{catalog::CatalogClient, pmid_metadata::PmidMetadataClient, CitationSource, UrlSource};
use crate::store::Store;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Rolling per-source success tracker for the adaptive policy (§4.10):
/// a source with a below-20% success rate over its last 20 calls is
/// deprioritized, unless its priority class is CRITICAL.
#[derive(Default)]
pub struct SourceHealthTracker {
    windows: Mutex<HashMap<String, std::collections::VecDeque<bool>>>,
}

const WINDOW_SIZE: usize = 20;
const LOW_RELIABILITY_THRESHOLD: f64 = 0.20;

impl SourceHealthTracker {
    pub fn record(&self, source: &str, success: bool) {
        let mut windows = self.windows.lock().unwrap();
        let window = windows.entry(source.to_string()).or_default();
        window.push_back(success);
        if window.len() > WINDOW_SIZE {
            window.pop_front();
        }
    }

    pub fn is_low_reliability(&self, source: &str) -> bool {
        let windows = self.windows.lock().unwrap();
        match windows.get(source) {
            Some(window) if window.len() >= WINDOW_SIZE => {
                let successes = window.iter().filter(|s| **s).count();
                (successes as f64 / window.len() as f64) < LOW_RELIABILITY_THRESHOLD
            }
            _ => false,
        }
    }

    /// Drop citation sources the policy has deprioritized, except CRITICAL
    /// ones, which always run regardless of their recent reliability (§4.10,
    /// Open Question 2 in DESIGN.md).
    fn active_citation_sources(&self, sources: &[Arc<dyn CitationSource>]) -> Vec<Arc<dyn CitationSource>> {
        sources
            .iter()
            .filter(|s| s.priority() == crate::model::SourcePriority::Critical || !self.is_low_reliability(s.name()))
            .cloned()
            .collect()
    }

    fn active_url_sources(&self, sources: &[Arc<dyn UrlSource>]) -> Vec<Arc<dyn UrlSource>> {
        sources
            .iter()
            .filter(|s| s.priority() == crate::model::SourcePriority::Critical || !self.is_low_reliability(s.name()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    /// Correlates every log line and `PipelineEvent` emitted by one
    /// `run_for_dataset` call, the way the teacher tags each download with a
    /// `download_id` (`tools/download.rs`).
    pub run_id: String,
    pub dataset_id: String,
    pub publications_discovered: usize,
    pub urls_collected: usize,
    pub pdfs_acquired: usize,
    pub pdfs_extracted: usize,
    pub stage_errors: Vec<String>,
}

pub struct Coordinator {
    store: Arc<Store>,
    cache: Arc<Cache>,
    http: Arc<HttpClient>,
    config: Config,
    citation_sources: Vec<Arc<dyn CitationSource>>,
    url_sources: Vec<Arc<dyn UrlSource>>,
    health: Arc<SourceHealthTracker>,
}

impl Coordinator {
    pub fn new(store: Arc<Store>, cache: Arc<Cache>, http: Arc<HttpClient>, config: Config) -> Self {
        let citation_sources = crate::sources::citation_sources(http.clone(), &config);
        let url_sources = crate::sources::url_sources(http.clone(), &config);
        Self {
            store,
            cache,
            http,
            config,
            citation_sources,
            url_sources,
            health: Arc::new(SourceHealthTracker::default()),
        }
    }

    /// Run the full pipeline for one dataset. Never propagates panics or
    /// per-publication errors — those fold into `RunSummary.stage_errors`.
    /// An `Error::Invariant` is the one case that does propagate (§4.7).
    pub async fn run_for_dataset(&self, dataset_id: &str, cancel: CancellationToken) -> Result<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut summary = RunSummary {
            run_id: run_id.clone(),
            dataset_id: dataset_id.to_string(),
            ..Default::default()
        };
        debug!(run_id = %run_id, dataset_id, "starting pipeline run");

        let catalog = CatalogClient::new(self.http.clone(), self.config.ncbi_api_key.clone());
        let record = catalog.fetch(dataset_id).await?;

        let pmid_client = PmidMetadataClient::new(self.http.clone(), self.config.ncbi_api_key.clone());
        let seeds = pmid_client.fetch_batch(&record.pmids).await.unwrap_or_default();

        let mut tx = self.store.begin().await?;
        tx.upsert_dataset(&record.dataset).await?;
        let mut publication_index = 0i64;
        let mut seed_ids = Vec::new();
        for seed in &seeds {
            let id = tx.upsert_publication(seed).await?;
            tx.link(dataset_id, id, Relationship::Original, Some("catalog_pmid"), publication_index).await?;
            publication_index += 1;
            seed_ids.push(id);
        }
        tx.commit().await?;
        summary.publications_discovered += seeds.len();

        for seed in &seeds {
            if cancel.is_cancelled() {
                break;
            }
            let deadline = Duration::from_secs(self.config.timeouts.citation_discovery_secs);
            let active = self.health.active_citation_sources(&self.citation_sources);
            let outcome = citation_discovery::discover_citations(&active, seed, deadline).await;

            for (source, count, ok) in &outcome.per_source {
                self.health.record(source, *ok);
                let mut tx = self.store.begin().await?;
                tx.upsert_source_metric(source, *ok, 0.0, *count as i64, *count as i64, false).await?;
                tx.commit().await?;
            }

            summary.publications_discovered += outcome.citing.len();

            let mut tx = self.store.begin().await?;
            for (idx, citing) in outcome.citing.iter().enumerate() {
                let id = tx.upsert_publication(citing).await?;
                tx.link(dataset_id, id, Relationship::Citing, None, publication_index + idx as i64).await?;
            }
            tx.append_event(&PipelineEvent {
                id: None,
                dataset_id: dataset_id.to_string(),
                publication_id: None,
                stage: "citation_discovery".to_string(),
                event_type: "completed".to_string(),
                message: format!("found {} citing publications", outcome.citing.len()),
                duration_ms: None,
                error_detail: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            }).await?;
            tx.commit().await?;
        }

        let view = self.store.get_complete_view(dataset_id).await?.ok_or_else(|| {
            Error::Invariant(format!("dataset {dataset_id} vanished mid-run"))
        })?;
        let mut all_publications: Vec<(i64, Publication, Relationship)> = Vec::new();
        for p in &view.original {
            all_publications.push((p.id.expect("persisted"), p.clone(), Relationship::Original));
        }
        for p in &view.citing {
            all_publications.push((p.id.expect("persisted"), p.clone(), Relationship::Citing));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_publications));
        let active_url_sources = self.health.active_url_sources(&self.url_sources);
        let mut tasks = Vec::new();
        for (publication_id, publication, relationship) in all_publications {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let http = self.http.clone();
            let url_sources = active_url_sources.clone();
            let health = self.health.clone();
            let config = self.config.clone();
            let dataset_id = dataset_id.to_string();
            let cancel = cancel.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                if cancel.is_cancelled() {
                    return PublicationOutcome::default();
                }
                run_publication(&store, &http, &url_sources, &health, &config, &dataset_id, publication_id, &publication, relationship).await
            }));
        }

        for task in tasks {
            match task.await {
                Ok(outcome) => {
                    summary.urls_collected += outcome.urls_collected;
                    summary.pdfs_acquired += usize::from(outcome.pdf_acquired);
                    summary.pdfs_extracted += usize::from(outcome.extracted);
                    summary.stage_errors.extend(outcome.errors);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "publication worker panicked");
                    summary.stage_errors.push(join_err.to_string());
                }
            }
        }

        let mut tx = self.store.begin().await?;
        tx.bump_counters(dataset_id).await?;
        tx.commit().await?;
        self.cache.invalidate(dataset_id);

        info!(dataset_id, ?summary, "pipeline run complete");
        Ok(summary)
    }
}

#[derive(Default)]
struct PublicationOutcome {
    urls_collected: usize,
    pdf_acquired: bool,
    extracted: bool,
    /// Per-stage storage failures for this publication, folded into
    /// `RunSummary.stage_errors` by the caller instead of being swallowed.
    errors: Vec<String>,
}

/// Append one `PipelineEvent` in its own transaction. A failure to persist
/// the event itself is logged, not retried — the stage it describes already
/// happened or failed, and re-entering this function would double the
/// audit trail rather than fix it.
async fn emit_event(
    store: &Store,
    dataset_id: &str,
    publication_id: Option<i64>,
    stage: &str,
    event_type: &str,
    message: String,
    duration_ms: Option<i64>,
    error_detail: Option<String>,
) {
    let event = PipelineEvent {
        id: None,
        dataset_id: dataset_id.to_string(),
        publication_id,
        stage: stage.to_string(),
        event_type: event_type.to_string(),
        message,
        duration_ms,
        error_detail,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    let result: Result<()> = async {
        let mut tx = store.begin().await?;
        tx.append_event(&event).await?;
        tx.commit().await
    }
    .await;
    if let Err(e) = result {
        warn!(dataset_id, stage, event_type, error = %e, "failed to persist pipeline event");
    }
}

async fn run_publication(
    store: &Store,
    http: &HttpClient,
    url_sources: &[Arc<dyn UrlSource>],
    health: &SourceHealthTracker,
    config: &Config,
    dataset_id: &str,
    publication_id: i64,
    publication: &Publication,
    relationship: Relationship,
) -> PublicationOutcome {
    let mut outcome = PublicationOutcome::default();

    let already_downloaded = store
        .most_recent_successful_attempt(publication_id)
        .await
        .ok()
        .flatten()
        .is_some();

    // P2 — URL collection.
    if url_collection::should_skip(already_downloaded) {
        debug!(publication_id, "skipping url collection, already has a successful download");
    } else {
        let stage_start = Instant::now();
        let deadline = Duration::from_secs(config.timeouts.url_collection_secs);
        let url_outcome = url_collection::collect_urls(url_sources, publication, deadline).await;
        outcome.urls_collected = url_outcome.urls.len();
        for (source, _count, ok) in &url_outcome.per_source {
            health.record(source, *ok);
        }

        let persisted: Result<()> = async {
            let mut tx = store.begin().await?;
            tx.append_url_list(publication_id, &url_outcome.urls).await?;
            tx.commit().await
        }
        .await;
        let duration_ms = stage_start.elapsed().as_millis() as i64;

        match persisted {
            Ok(()) => {
                emit_event(
                    store, dataset_id, Some(publication_id), "url_collection", "success",
                    format!("collected {} urls", outcome.urls_collected), Some(duration_ms), None,
                )
                .await;
            }
            Err(e) => {
                warn!(publication_id, error = %e, "failed to persist collected url list");
                outcome.errors.push(format!("url_collection: {e}"));
                emit_event(
                    store, dataset_id, Some(publication_id), "url_collection", "failure",
                    "failed to persist collected url list".to_string(), Some(duration_ms), Some(e.to_string()),
                )
                .await;
            }
        }
    }

    // P3 — PDF acquisition. Skipped when a successful attempt already
    // exists (spec §4.9); otherwise walk the accumulated URL list.
    let mut pdf_path: Option<String> = None;
    if already_downloaded {
        outcome.pdf_acquired = true;
        if let Ok(Some(existing)) = store.most_recent_successful_attempt(publication_id).await {
            pdf_path = existing.file_path;
        }
    } else if let Ok(Some(view)) = store.get_complete_view(dataset_id).await {
        if let Some(per_pub) = view.per_publication.get(&publication_id) {
            let stage_start = Instant::now();
            let universal_id = publication.universal_id();
            let deadline = Duration::from_secs(config.timeouts.pdf_acquisition_secs / 2);
            let acquisition = pdf_acquisition::acquire_pdf(
                http,
                &config.pdfs_root,
                dataset_id,
                relationship,
                &universal_id,
                &per_pub.urls,
                deadline,
                config.retry.max_attempts_per_publication as usize,
            )
            .await;

            outcome.pdf_acquired = acquisition.succeeded;
            if acquisition.succeeded {
                pdf_path = acquisition
                    .attempts
                    .iter()
                    .find(|a| a.status == AttemptStatus::Success)
                    .and_then(|a| a.file_path.clone());
            }

            let persisted: Result<()> = async {
                let mut tx = store.begin().await?;
                for record in &acquisition.attempts {
                    tx.append_download_attempt(
                        publication_id,
                        &record.url,
                        &record.source,
                        record.status,
                        record.file_path.as_deref(),
                        record.file_size,
                        record.error_message.as_deref(),
                    )
                    .await?;
                }
                tx.commit().await
            }
            .await;
            let duration_ms = stage_start.elapsed().as_millis() as i64;

            match persisted {
                Ok(()) if acquisition.succeeded => {
                    emit_event(
                        store, dataset_id, Some(publication_id), "pdf_acquisition", "success",
                        format!("acquired pdf after {} attempt(s)", acquisition.attempts.len()),
                        Some(duration_ms), None,
                    )
                    .await;
                }
                Ok(()) => {
                    emit_event(
                        store, dataset_id, Some(publication_id), "pdf_acquisition", "failure",
                        "exhausted all urls without a valid pdf".to_string(), Some(duration_ms), None,
                    )
                    .await;
                }
                Err(e) => {
                    warn!(publication_id, error = %e, "failed to persist download attempts");
                    outcome.errors.push(format!("pdf_acquisition: {e}"));
                    emit_event(
                        store, dataset_id, Some(publication_id), "pdf_acquisition", "failure",
                        "failed to persist download attempts".to_string(), Some(duration_ms), Some(e.to_string()),
                    )
                    .await;
                }
            }
        }
    }

    // P4 — content extraction. Skipped only when a `ContentExtraction`
    // already exists for this (dataset, publication) and the PDF on disk
    // still hashes to the same SHA-256 (spec §4.9) — not merely because
    // some earlier download succeeded.
    if let Some(path) = pdf_path {
        let should_extract = match std::fs::read(&path) {
            Ok(bytes) => {
                let current_sha256 = crate::ids::sha256_hex(&bytes);
                match store.get_extraction(dataset_id, publication_id).await {
                    Ok(Some(existing)) => existing.pdf_sha256 != current_sha256,
                    _ => true,
                }
            }
            Err(_) => true,
        };

        if !should_extract {
            debug!(publication_id, "skipping content extraction, unchanged extraction already recorded");
            outcome.extracted = true;
        } else {
            let stage_start = Instant::now();
            let extraction = extract_for_publication(
                dataset_id.to_string(),
                publication_id,
                std::path::PathBuf::from(&path),
                config.extraction_weights.clone(),
            )
            .await;
            let quality_score = extraction.quality_score;
            outcome.extracted = quality_score > 0.0;

            let persisted: Result<()> = async {
                let mut tx = store.begin().await?;
                tx.put_extraction(&extraction).await?;
                tx.commit().await
            }
            .await;
            let duration_ms = stage_start.elapsed().as_millis() as i64;

            match persisted {
                Ok(()) if quality_score > 0.0 => {
                    emit_event(
                        store, dataset_id, Some(publication_id), "content_extraction", "success",
                        format!("quality score {quality_score:.2}"), Some(duration_ms), None,
                    )
                    .await;
                }
                Ok(()) => {
                    emit_event(
                        store, dataset_id, Some(publication_id), "content_extraction", "failure",
                        "parser produced a zero-quality extraction".to_string(), Some(duration_ms), None,
                    )
                    .await;
                }
                Err(e) => {
                    warn!(publication_id, error = %e, "failed to persist content extraction");
                    outcome.errors.push(format!("content_extraction: {e}"));
                    emit_event(
                        store, dataset_id, Some(publication_id), "content_extraction", "failure",
                        "failed to persist content extraction".to_string(), Some(duration_ms), Some(e.to_string()),
                    )
                    .await;
                }
            }
        }
    }

    outcome
}
