//! Source-client traits (L3), generalizing a single `SourceProvider` interface
//! into the two capabilities spec §4.2 actually needs.

use crate::model::{Publication, SourcePriority, UrlDescriptor};
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a single source call: either it ran (with a result), or its
/// prerequisites were missing, which is a `skip`, not a failure (§4.2, §7).
#[derive(Debug, Clone)]
pub enum SourceOutcome<T> {
    Ok(T),
    Skipped { reason: String },
    Failed { reason: String },
}

/// A source that can discover publications citing a seed (P1).
#[async_trait]
pub trait CitationSource: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> SourcePriority;
    fn base_delay(&self) -> Duration {
        Duration::from_millis(1000)
    }

    /// Fetch publications citing `seed`. Returns normalized stubs carrying at
    /// least one of PMID/DOI plus whatever raw metadata was available.
    async fn get_citations(&self, seed: &Publication) -> SourceOutcome<Vec<Publication>>;
}

/// A source that can produce candidate URLs for a known publication (P2).
#[async_trait]
pub trait UrlSource: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> SourcePriority;

    async fn get_urls(&self, publication: &Publication) -> SourceOutcome<Vec<UrlDescriptor>>;
}

/// Base numeric priority used by P2's `base_priority(source) + shape_adjustment`
/// formula (§4.6). Lower is better; this only sets the *source* component.
pub fn base_priority(priority: SourcePriority) -> i32 {
    match priority {
        SourcePriority::Critical => 0,
        SourcePriority::High => 10,
        SourcePriority::Medium => 20,
        SourcePriority::Low => 30,
        SourcePriority::Fallback => 40,
    }
}
