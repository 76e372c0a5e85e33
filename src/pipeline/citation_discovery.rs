//! P1 — citation discovery: fan out to every configured [`CitationSource`]
//! concurrently, dedup by canonical identifier, merge fields preferring the
//! higher-priority source. Generalizes the teacher's `MetaSearchClient::search`
//! concurrent task-group pattern (`client/meta_search.rs`) from "search
//! several mirrors for one paper" to "ask several providers who cites this
//! paper".

use crate::model::{Publication, SourcePriority};
use crate::resilience::TimeoutExt;
use crate::sources::{CitationSource, SourceOutcome};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct CitationDiscoveryOutcome {
    /// The seed publication plus every newly discovered citing publication,
    /// in canonical-identifier order.
    pub citing: Vec<Publication>,
    /// `(source_name, papers_returned, succeeded)` per source, for `SourceMetric`.
    pub per_source: Vec<(String, usize, bool)>,
}

/// Run P1 for one seed publication against every source in `sources`,
/// each bounded by `per_source_deadline`.
pub async fn discover_citations(
    sources: &[Arc<dyn CitationSource>],
    seed: &Publication,
    per_source_deadline: Duration,
) -> CitationDiscoveryOutcome {
    let mut tasks = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.clone();
        let seed = seed.clone();
        tasks.push(tokio::spawn(async move {
            let name = source.name().to_string();
            let result = source.get_citations(&seed).with_timeout_duration(per_source_deadline).await;
            (name, result)
        }));
    }

    let mut by_key: HashMap<String, Publication> = HashMap::new();
    let mut priority_won: HashMap<String, SourcePriority> = HashMap::new();
    let mut per_source = Vec::with_capacity(sources.len());

    for (task, source) in tasks.into_iter().zip(sources.iter()) {
        let name = source.name().to_string();
        let priority = source.priority();

        let outcome = match task.await {
            Ok((_, Ok(outcome))) => outcome,
            Ok((_, Err(_elapsed))) => {
                warn!(source = %name, "citation source timed out");
                per_source.push((name, 0, false));
                continue;
            }
            Err(join_err) => {
                warn!(source = %name, error = %join_err, "citation source task panicked");
                per_source.push((name, 0, false));
                continue;
            }
        };

        match outcome {
            SourceOutcome::Ok(publications) => {
                let count = publications.len();
                for publication in publications {
                    merge_publication(&mut by_key, &mut priority_won, publication, priority);
                }
                per_source.push((name, count, true));
            }
            SourceOutcome::Skipped { reason } => {
                debug!(source = %name, reason, "citation source skipped");
                per_source.push((name, 0, true));
            }
            SourceOutcome::Failed { reason } => {
                warn!(source = %name, reason, "citation source failed");
                per_source.push((name, 0, false));
            }
        }
    }

    let mut citing: Vec<Publication> = by_key.into_values().collect();
    citing.sort_by(|a, b| a.dedup_key().cmp(&b.dedup_key()));

    CitationDiscoveryOutcome { citing, per_source }
}

/// Insert or merge `incoming` into the dedup index. When a key already has a
/// publication, keep whichever fields are missing from the higher-priority
/// source's record, but only replace the record's "owning" source if the
/// incoming one outranks it (§4.6: field merge prefers higher priority).
fn merge_publication(
    by_key: &mut HashMap<String, Publication>,
    priority_won: &mut HashMap<String, SourcePriority>,
    incoming: Publication,
    source_priority: SourcePriority,
) {
    let key = incoming.dedup_key();
    match by_key.get_mut(&key) {
        None => {
            by_key.insert(key.clone(), incoming);
            priority_won.insert(key, source_priority);
        }
        Some(existing) => {
            let current_best = priority_won.get(&key).copied().unwrap_or(SourcePriority::Fallback);
            if source_priority > current_best {
                fill_missing(existing, &incoming);
                *existing = merge_preferring(incoming, existing.clone());
                priority_won.insert(key, source_priority);
            } else {
                fill_missing(existing, &incoming);
            }
        }
    }
}

/// Fill any `None`/empty fields in `target` from `source`, without
/// overwriting what's already there.
fn fill_missing(target: &mut Publication, source: &Publication) {
    if target.doi.is_none() {
        target.doi = source.doi.clone();
    }
    if target.pmid.is_none() {
        target.pmid = source.pmid.clone();
    }
    if target.pmc.is_none() {
        target.pmc = source.pmc.clone();
    }
    if target.arxiv.is_none() {
        target.arxiv = source.arxiv.clone();
    }
    if target.title.is_none() {
        target.title = source.title.clone();
    }
    if target.journal.is_none() {
        target.journal = source.journal.clone();
    }
    if target.year.is_none() {
        target.year = source.year;
    }
    if target.authors.is_empty() {
        target.authors = source.authors.clone();
    }
}

/// Build the merged record when `winner` outranks `loser`: winner's
/// identifying fields take precedence, loser backfills what winner lacks.
fn merge_preferring(mut winner: Publication, loser: Publication) -> Publication {
    fill_missing(&mut winner, &loser);
    winner
}
