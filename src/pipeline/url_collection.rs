//! P2 — URL collection: fan out to every [`UrlSource`] for one publication,
//! classify and prioritize results, merge into the publication's existing
//! URL list. Generalizes the same concurrent-fan-out shape as P1.

use crate::model::{Publication, UrlDescriptor};
use crate::resilience::TimeoutExt;
use crate::sources::{base_priority, SourceOutcome, UrlSource};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct UrlCollectionOutcome {
    pub urls: Vec<UrlDescriptor>,
    pub per_source: Vec<(String, usize, bool)>,
}

/// Skip condition: a publication already has a successful `DownloadAttempt`
/// doesn't need URL collection re-run (§4.9 idempotent restart).
pub fn should_skip(already_has_successful_download: bool) -> bool {
    already_has_successful_download
}

pub async fn collect_urls(
    sources: &[Arc<dyn UrlSource>],
    publication: &Publication,
    per_source_deadline: Duration,
) -> UrlCollectionOutcome {
    let mut tasks = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.clone();
        let publication = publication.clone();
        tasks.push(tokio::spawn(async move {
            let name = source.name().to_string();
            let result = source.get_urls(&publication).with_timeout_duration(per_source_deadline).await;
            (name, result)
        }));
    }

    let mut collected: Vec<UrlDescriptor> = Vec::new();
    let mut per_source = Vec::with_capacity(sources.len());

    for task in tasks {
        let (name, result) = match task.await {
            Ok(pair) => pair,
            Err(join_err) => {
                warn!(error = %join_err, "url source task panicked");
                continue;
            }
        };

        match result {
            Ok(SourceOutcome::Ok(urls)) => {
                per_source.push((name, urls.len(), true));
                collected.extend(urls);
            }
            Ok(SourceOutcome::Skipped { reason }) => {
                debug!(source = %name, reason, "url source skipped");
                per_source.push((name, 0, true));
            }
            Ok(SourceOutcome::Failed { reason }) => {
                warn!(source = %name, reason, "url source failed");
                per_source.push((name, 0, false));
            }
            Err(_elapsed) => {
                warn!(source = %name, "url source timed out");
                per_source.push((name, 0, false));
            }
        }
    }

    dedup_by_url(&mut collected);
    collected.sort_by_key(|u| u.priority);
    collected.truncate(64);

    UrlCollectionOutcome {
        urls: collected,
        per_source,
    }
}

fn dedup_by_url(urls: &mut Vec<UrlDescriptor>) {
    let mut seen = std::collections::HashSet::new();
    urls.retain(|u| seen.insert(u.url.clone()));
}
