//! P3 — PDF acquisition: walk a publication's URL list in priority order,
//! downloading and validating each candidate until one succeeds or the
//! per-publication attempt cap is spent. Landing-page rescue mirrors the
//! teacher's `sci_hub::parse_sci_hub_response` scraping pattern
//! (`client/sci_hub.rs`): look for a link that smells like a PDF and retry
//! once against it.

use crate::http_client::HttpClient;
use crate::ids;
use crate::model::{AttemptStatus, Relationship, UrlDescriptor};
use crate::resilience::TimeoutExt;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub struct DownloadRecord {
    pub url: String,
    pub source: String,
    pub status: AttemptStatus,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
}

pub struct AcquisitionOutcome {
    pub attempts: Vec<DownloadRecord>,
    pub succeeded: bool,
}

/// Try each URL in priority order (the list must already be sorted by
/// `UrlDescriptor::priority` ascending) until one succeeds or the attempt
/// cap is reached.
pub async fn acquire_pdf(
    http: &HttpClient,
    pdfs_root: &Path,
    dataset_id: &str,
    relationship: Relationship,
    universal_id: &str,
    urls: &[UrlDescriptor],
    per_url_deadline: Duration,
    attempt_cap: usize,
) -> AcquisitionOutcome {
    let mut attempts = Vec::new();
    let mut succeeded = false;

    for descriptor in urls.iter().take(attempt_cap) {
        let records = try_one(http, pdfs_root, dataset_id, relationship, universal_id, descriptor, per_url_deadline).await;
        let ok = records.last().is_some_and(|r| r.status == AttemptStatus::Success);
        attempts.extend(records);
        if ok {
            succeeded = true;
            break;
        }
    }

    AcquisitionOutcome { attempts, succeeded }
}

/// Try one URL. Returns one record normally, or two when a landing-page
/// rescue is attempted: the original failed fetch (attempt N) and the
/// rescued fetch against the discovered PDF link (attempt N+1), per
/// spec.md §4.7 step 3 — both are persisted, not just the rescue.
async fn try_one(
    http: &HttpClient,
    pdfs_root: &Path,
    dataset_id: &str,
    relationship: Relationship,
    universal_id: &str,
    descriptor: &UrlDescriptor,
    deadline: Duration,
) -> Vec<DownloadRecord> {
    let headers = HashMap::new();
    let fetch = http
        .get(&descriptor.url, &headers, descriptor.requires_auth)
        .with_timeout_duration(deadline)
        .await;

    let bytes = match fetch {
        Ok(Ok((bytes, _final_url))) => bytes,
        Ok(Err(http_err)) => {
            return vec![failed_record(descriptor, format!("http error: {http_err}"))];
        }
        Err(_elapsed) => {
            return vec![failed_record(descriptor, "deadline exceeded".to_string())];
        }
    };

    match ids::validate_pdf_bytes(&bytes) {
        Ok(()) => vec![write_success(pdfs_root, dataset_id, relationship, universal_id, descriptor, bytes)],
        Err(validation_err) if looks_like_html(&bytes) => {
            debug!(url = %descriptor.url, error = %validation_err, "not a pdf, body looks like html, attempting landing-page rescue");
            let original_failure = failed_record(descriptor, format!("not a pdf, body looks like html: {validation_err}"));

            match rescue_from_landing_page(&bytes) {
                Some(pdf_url) => {
                    let rescue_source = format!("{}_rescue", descriptor.source);
                    let headers = HashMap::new();
                    let rescue_record = match http
                        .get(&pdf_url, &headers, descriptor.requires_auth)
                        .with_timeout_duration(deadline)
                        .await
                    {
                        Ok(Ok((rescued_bytes, _))) => match ids::validate_pdf_bytes(&rescued_bytes) {
                            Ok(()) => write_success_for(
                                pdfs_root, dataset_id, relationship, universal_id, &pdf_url, &rescue_source, rescued_bytes,
                            ),
                            Err(e) => failed_record_for(&pdf_url, &rescue_source, format!("rescued link was not a pdf: {e}")),
                        },
                        Ok(Err(e)) => failed_record_for(&pdf_url, &rescue_source, format!("rescue fetch failed: {e}")),
                        Err(_) => failed_record_for(&pdf_url, &rescue_source, "rescue fetch deadline exceeded".to_string()),
                    };
                    vec![original_failure, rescue_record]
                }
                None => vec![failed_record(descriptor, format!("not a pdf and no rescue link found: {validation_err}"))],
            }
        }
        Err(validation_err) => vec![failed_record(descriptor, format!("pdf validation failed: {validation_err}"))],
    }
}

/// Spec.md §4.7 step 3: gate the rescue on the actual response body, not a
/// pre-fetch URL-shape guess — a `pdf_direct`-classified URL can still serve
/// an HTML interstitial, and a `landing_page`-classified one can serve a PDF
/// straight away.
fn looks_like_html(bytes: &[u8]) -> bool {
    let prefix: Vec<u8> = bytes.iter().take(512).copied().collect();
    let text = String::from_utf8_lossy(&prefix).to_ascii_lowercase();
    let trimmed = text.trim_start();
    trimmed.starts_with("<!doctype") || trimmed.starts_with("<html")
}

fn failed_record_for(url: &str, source: &str, error_message: String) -> DownloadRecord {
    DownloadRecord {
        url: url.to_string(),
        source: source.to_string(),
        status: AttemptStatus::Failed,
        file_path: None,
        file_size: None,
        error_message: Some(error_message),
    }
}

fn failed_record(descriptor: &UrlDescriptor, error_message: String) -> DownloadRecord {
    failed_record_for(&descriptor.url, &descriptor.source, error_message)
}

#[allow(clippy::too_many_arguments)]
fn write_success_for(
    pdfs_root: &Path,
    dataset_id: &str,
    relationship: Relationship,
    universal_id: &str,
    url: &str,
    source: &str,
    bytes: Vec<u8>,
) -> DownloadRecord {
    let dir = pdfs_root.join(dataset_id).join(relationship.as_str());
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return failed_record_for(url, source, format!("failed to create pdf directory: {e}"));
    }
    let path: PathBuf = dir.join(format!("{}.pdf", ids::sanitize_filename(universal_id)));
    let size = bytes.len() as i64;
    match std::fs::write(&path, &bytes) {
        Ok(()) => DownloadRecord {
            url: url.to_string(),
            source: source.to_string(),
            status: AttemptStatus::Success,
            file_path: Some(path.display().to_string()),
            file_size: Some(size),
            error_message: None,
        },
        Err(e) => failed_record_for(url, source, format!("failed to write pdf: {e}")),
    }
}

fn write_success(
    pdfs_root: &Path,
    dataset_id: &str,
    relationship: Relationship,
    universal_id: &str,
    descriptor: &UrlDescriptor,
    bytes: Vec<u8>,
) -> DownloadRecord {
    write_success_for(pdfs_root, dataset_id, relationship, universal_id, &descriptor.url, &descriptor.source, bytes)
}

/// Scan a landing-page's HTML for a link that smells like a PDF download.
fn rescue_from_landing_page(html_bytes: &[u8]) -> Option<String> {
    let html = String::from_utf8_lossy(html_bytes);
    let document = Html::parse_document(&html);
    let selector = Selector::parse("a[href*='.pdf'], a[href*='/pdf/'], meta[name='citation_pdf_url']").ok()?;

    document.select(&selector).find_map(|element| {
        element
            .value()
            .attr("content")
            .or_else(|| element.value().attr("href"))
            .map(|s| normalize_rescued_url(s))
    })
}

fn normalize_rescued_url(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else if let Some(stripped) = raw.strip_prefix("//") {
        format!("https://{stripped}")
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescue_finds_pdf_anchor() {
        let html = br#"<html><body><a href="/files/paper.pdf">Download</a></body></html>"#;
        assert_eq!(rescue_from_landing_page(html), Some("/files/paper.pdf".to_string()));
    }

    #[test]
    fn rescue_prefers_citation_pdf_meta_tag() {
        let html = br#"<html><head><meta name="citation_pdf_url" content="https://x.org/a.pdf"></head></html>"#;
        assert_eq!(rescue_from_landing_page(html), Some("https://x.org/a.pdf".to_string()));
    }

    #[test]
    fn rescue_returns_none_when_nothing_matches() {
        let html = br#"<html><body><p>No links here</p></body></html>"#;
        assert_eq!(rescue_from_landing_page(html), None);
    }

    #[test]
    fn normalize_protocol_relative_url() {
        assert_eq!(normalize_rescued_url("//cdn.example.org/a.pdf"), "https://cdn.example.org/a.pdf");
    }

    #[test]
    fn looks_like_html_ignores_leading_whitespace_and_case() {
        assert!(looks_like_html(b"  \n<!DOCTYPE html><html></html>"));
        assert!(looks_like_html(b"<HTML><body>hi</body></html>"));
        assert!(!looks_like_html(b"%PDF-1.4\n..."));
    }
}
