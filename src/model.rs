//! Core domain types shared across the store, sources, and pipeline (spec §3).

use serde::{Deserialize, Serialize};

/// Priority class used by the coordinator's adaptive source policy (§4.9, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourcePriority {
    Fallback,
    Low,
    Medium,
    High,
    Critical,
}

/// A dataset's relationship to one of its publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Original,
    Citing,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Original => "original",
            Relationship::Citing => "citing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "original" => Some(Relationship::Original),
            "citing" => Some(Relationship::Citing),
            _ => None,
        }
    }
}

/// Outcome of a single PDF download try (spec §3 `DownloadAttempt.status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    Retry,
    Skipped,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Retry => "retry",
            AttemptStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(AttemptStatus::Success),
            "failed" => Some(AttemptStatus::Failed),
            "retry" => Some(AttemptStatus::Retry),
            "skipped" => Some(AttemptStatus::Skipped),
            _ => None,
        }
    }
}

/// Dataset row (spec §3 `Dataset`). Primary key is the external catalog id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: String,
    pub title: Option<String>,
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub sample_count: Option<i64>,
    pub submission_date: Option<String>,
    pub publication_count: i64,
    pub pdfs_acquired: i64,
    pub pdfs_extracted: i64,
    pub status: String,
    pub provider_raw: serde_json::Value,
}

impl Dataset {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            title: None,
            organism: None,
            platform: None,
            sample_count: None,
            submission_date: None,
            publication_count: 0,
            pdfs_acquired: 0,
            pdfs_extracted: 0,
            status: "new".to_string(),
            provider_raw: serde_json::Value::Null,
        }
    }
}

/// Publication row (spec §3 `Publication`). Surrogate-keyed once persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Publication {
    pub id: Option<i64>,
    pub pmid: Option<String>,
    pub doi: Option<String>,
    pub pmc: Option<String>,
    pub arxiv: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub provider_raw: serde_json::Value,
    pub urls: Vec<UrlDescriptor>,
}

impl Publication {
    /// The canonical dedup key per §4.5: DOI lowercased, else PMID, else a
    /// normalized-title hash.
    pub fn dedup_key(&self) -> String {
        if let Some(doi) = &self.doi {
            return format!("doi:{}", doi.to_lowercase());
        }
        if let Some(pmid) = &self.pmid {
            return format!("pmid:{pmid}");
        }
        if let Some(title) = &self.title {
            let normalized: String = title
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            return format!("title:{}", crate::ids::sha256_hex(normalized.as_bytes()));
        }
        format!("anon:{}", crate::ids::sha256_hex(format!("{self:?}").as_bytes()))
    }

    /// Filesystem-safe identifier used for the PDF filename (spec §4.7).
    /// Falls back to a SHA-256 of the title (or, lacking even that, the
    /// struct's `Debug` form) so two identifier-less publications never
    /// collide on the same path — mirrors [`Self::dedup_key`]'s fallback.
    pub fn universal_id(&self) -> String {
        let content_hash = crate::ids::sha256_hex(self.content_fingerprint().as_bytes());
        crate::ids::universal_id(
            self.pmid.as_deref(),
            self.doi.as_deref(),
            self.pmc.as_deref(),
            self.arxiv.as_deref(),
            &content_hash,
        )
    }

    fn content_fingerprint(&self) -> String {
        match &self.title {
            Some(title) => title.to_lowercase(),
            None => format!("{self:?}"),
        }
    }
}

/// URL descriptor embedded in a publication's URL list (spec §3 `URLDescriptor`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlDescriptor {
    pub url: String,
    pub source: String,
    pub priority: i32,
    pub shape: crate::ids::UrlShape,
    pub confidence: f64,
    pub requires_auth: bool,
    pub metadata: serde_json::Value,
}

/// A `DownloadAttempt` row (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadAttempt {
    pub id: Option<i64>,
    pub publication_id: i64,
    pub url: String,
    pub source: String,
    pub status: AttemptStatus,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub attempt_number: i32,
    pub created_at: String,
}

/// A `ContentExtraction` row, keyed by (dataset_id, publication_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentExtraction {
    pub dataset_id: String,
    pub publication_id: i64,
    pub sections: serde_json::Value,
    pub tables: serde_json::Value,
    pub references: serde_json::Value,
    pub page_count: i32,
    pub word_count: i32,
    pub quality_score: f64,
    pub quality_grade: String,
    pub pdf_sha256: String,
}

/// A `PipelineEvent` row (append-only audit log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: Option<i64>,
    pub dataset_id: String,
    pub publication_id: Option<i64>,
    pub stage: String,
    pub event_type: String,
    pub message: String,
    pub duration_ms: Option<i64>,
    pub error_detail: Option<String>,
    pub created_at: String,
}

/// Running per-source counters, persisted across runs (spec §3 `SourceMetric`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMetric {
    pub source: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub total_response_time_secs: f64,
    pub total_papers_returned: i64,
    pub unique_papers_after_dedup: i64,
    pub batch_capable: bool,
}

impl SourceMetric {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }
}
