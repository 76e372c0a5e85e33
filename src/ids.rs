//! Identifier parsing/normalization and URL classification (L1).

use sha2::{Digest, Sha256};
use std::fmt;

/// A publication identifier in one of the forms the pipeline accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PublicationId {
    Pmid(String),
    Doi(String),
    Pmc(String),
    Arxiv(String),
}

impl PublicationId {
    /// Parse a DOI, stripping common `doi:`/resolver-URL prefixes and lowercasing.
    pub fn doi(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_start_matches("doi:")
            .trim_start_matches("https://doi.org/")
            .trim_start_matches("http://doi.org/")
            .to_lowercase();
        if cleaned.is_empty() || !cleaned.contains('/') {
            return None;
        }
        Some(PublicationId::Doi(cleaned))
    }

    /// Parse a PMID, accepting a bare number or a `PMID:`-prefixed string.
    pub fn pmid(raw: &str) -> Option<Self> {
        let cleaned = raw.trim().trim_start_matches("PMID:").trim();
        if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(PublicationId::Pmid(cleaned.to_string()))
    }

    /// Parse a PMC id, normalizing the `PMC` prefix to uppercase.
    pub fn pmc(raw: &str) -> Option<Self> {
        let cleaned = raw.trim();
        let digits = cleaned
            .strip_prefix("PMC")
            .or_else(|| cleaned.strip_prefix("pmc"))
            .unwrap_or(cleaned);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(PublicationId::Pmc(format!("PMC{digits}")))
    }

    /// Parse an arXiv id, stripping the `arXiv:` prefix if present.
    pub fn arxiv(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_start_matches("arXiv:")
            .trim_start_matches("arxiv:");
        if cleaned.is_empty() {
            return None;
        }
        Some(PublicationId::Arxiv(cleaned.to_string()))
    }

    /// A stable key usable for deduplication: DOI beats PMID beats PMC beats arXiv.
    pub fn dedup_key(&self) -> String {
        match self {
            PublicationId::Doi(d) => format!("doi:{d}"),
            PublicationId::Pmid(p) => format!("pmid:{p}"),
            PublicationId::Pmc(p) => format!("pmc:{p}"),
            PublicationId::Arxiv(a) => format!("arxiv:{}", normalize_arxiv_version(a)),
        }
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicationId::Doi(d) => write!(f, "{d}"),
            PublicationId::Pmid(p) => write!(f, "{p}"),
            PublicationId::Pmc(p) => write!(f, "{p}"),
            PublicationId::Arxiv(a) => write!(f, "{a}"),
        }
    }
}

/// Strip a trailing `vN` version suffix from an arXiv id so that `2301.00001v2`
/// and `2301.00001v1` dedup to the same publication.
fn normalize_arxiv_version(id: &str) -> String {
    if let Some(pos) = id.rfind('v') {
        let (base, suffix) = id.split_at(pos);
        if suffix[1..].chars().all(|c| c.is_ascii_digit()) && !suffix[1..].is_empty() {
            return base.to_string();
        }
    }
    id.to_string()
}

/// Coarse classification of what a collected URL is likely to resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlShape {
    PdfDirect,
    HtmlFulltext,
    LandingPage,
    DoiResolver,
    Unknown,
}

impl UrlShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlShape::PdfDirect => "pdf_direct",
            UrlShape::HtmlFulltext => "html_fulltext",
            UrlShape::LandingPage => "landing_page",
            UrlShape::DoiResolver => "doi_resolver",
            UrlShape::Unknown => "unknown",
        }
    }
}

/// Classify a URL by inspecting its string form only (idempotent, no network access).
pub fn classify_url(url: &str) -> UrlShape {
    let lower = url.to_lowercase();

    if lower.contains("doi.org/") {
        return UrlShape::DoiResolver;
    }
    if lower.ends_with(".pdf") || lower.contains("/pdf/") || lower.contains("pdf.php") {
        return UrlShape::PdfDirect;
    }
    if lower.contains("/fulltext") || lower.contains("format=html") || lower.contains("/html") {
        return UrlShape::HtmlFulltext;
    }
    if lower.contains("/article/") || lower.contains("/content/") || lower.contains("/abs/") {
        return UrlShape::LandingPage;
    }
    UrlShape::Unknown
}

/// Errors from validating candidate PDF bytes before writing them to disk.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PdfValidationError {
    #[error("file too small ({0} bytes)")]
    TooSmall(usize),
    #[error("file too large ({0} bytes)")]
    TooLarge(usize),
    #[error("missing %PDF magic header")]
    MissingMagic,
}

const MIN_PDF_BYTES: usize = 1024;
const MAX_PDF_BYTES: usize = 100 * 1024 * 1024;

/// Validate that `bytes` look like a plausible PDF: size bounds plus magic header.
pub fn validate_pdf_bytes(bytes: &[u8]) -> Result<(), PdfValidationError> {
    if bytes.len() < MIN_PDF_BYTES {
        return Err(PdfValidationError::TooSmall(bytes.len()));
    }
    if bytes.len() > MAX_PDF_BYTES {
        return Err(PdfValidationError::TooLarge(bytes.len()));
    }
    if !bytes.starts_with(b"%PDF") {
        return Err(PdfValidationError::MissingMagic);
    }
    Ok(())
}

/// Replace characters unsafe for filesystem paths with underscores, and
/// truncate to a sane length.
pub fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.chars().take(200).collect()
}

/// SHA-256 hex digest of `bytes`, used for content-addressed PDF filenames.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A filesystem-safe identifier for a publication, preferring the most
/// specific identifier available: PMID, then DOI, then PMC, then arXiv, then
/// a SHA-256 prefix of `content_hash` (spec.md §4.7) so two identifier-less
/// publications in the same dataset never collide on the same filename.
/// `content_hash` is the full hex digest; only a 16-character prefix is kept
/// in the filename.
pub fn universal_id(
    pmid: Option<&str>,
    doi: Option<&str>,
    pmc: Option<&str>,
    arxiv: Option<&str>,
    content_hash: &str,
) -> String {
    if let Some(p) = pmid {
        return sanitize_filename(&format!("pmid_{p}"));
    }
    if let Some(d) = doi {
        return sanitize_filename(&format!("doi_{d}"));
    }
    if let Some(p) = pmc {
        return sanitize_filename(&format!("pmc_{p}"));
    }
    if let Some(a) = arxiv {
        return sanitize_filename(&format!("arxiv_{a}"));
    }
    let prefix: String = content_hash.chars().take(16).collect();
    sanitize_filename(&format!("sha256_{prefix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_normalization_strips_prefixes_and_lowercases() {
        assert_eq!(
            PublicationId::doi("https://doi.org/10.1038/ABC.123"),
            Some(PublicationId::Doi("10.1038/abc.123".to_string()))
        );
        assert_eq!(
            PublicationId::doi("doi:10.1038/abc.123"),
            Some(PublicationId::Doi("10.1038/abc.123".to_string()))
        );
    }

    #[test]
    fn doi_without_slash_is_rejected() {
        assert_eq!(PublicationId::doi("not-a-doi"), None);
    }

    #[test]
    fn pmc_prefix_is_normalized() {
        assert_eq!(
            PublicationId::pmc("pmc1234567"),
            Some(PublicationId::Pmc("PMC1234567".to_string()))
        );
        assert_eq!(
            PublicationId::pmc("PMC1234567"),
            Some(PublicationId::Pmc("PMC1234567".to_string()))
        );
    }

    #[test]
    fn arxiv_versions_dedup_to_same_key() {
        let a = PublicationId::arxiv("2301.00001v1").unwrap();
        let b = PublicationId::arxiv("2301.00001v2").unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn classify_url_recognizes_shapes() {
        assert_eq!(
            classify_url("https://doi.org/10.1038/abc"),
            UrlShape::DoiResolver
        );
        assert_eq!(
            classify_url("https://example.org/content/123/pdf/paper.pdf"),
            UrlShape::PdfDirect
        );
        assert_eq!(classify_url("https://example.org/unknown/thing"), UrlShape::Unknown);
    }

    #[test]
    fn classify_url_is_idempotent() {
        let url = "https://example.org/article/42";
        assert_eq!(classify_url(url), classify_url(url));
    }

    #[test]
    fn validate_pdf_bytes_rejects_too_small() {
        let bytes = vec![b'%', b'P', b'D', b'F'];
        assert!(matches!(
            validate_pdf_bytes(&bytes),
            Err(PdfValidationError::TooSmall(_))
        ));
    }

    #[test]
    fn validate_pdf_bytes_rejects_missing_magic() {
        let bytes = vec![0u8; MIN_PDF_BYTES + 1];
        assert!(matches!(
            validate_pdf_bytes(&bytes),
            Err(PdfValidationError::MissingMagic)
        ));
    }

    #[test]
    fn validate_pdf_bytes_accepts_plausible_pdf() {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(MIN_PDF_BYTES + 10, 0);
        assert!(validate_pdf_bytes(&bytes).is_ok());
    }

    #[test]
    fn sanitize_filename_replaces_unsafe_chars() {
        assert_eq!(sanitize_filename("a/b c:d"), "a_b_c_d");
    }

    #[test]
    fn universal_id_prefers_pmid_over_doi() {
        assert_eq!(
            universal_id(Some("123"), Some("10.1/x"), None, None, "deadbeef"),
            "pmid_123"
        );
    }

    #[test]
    fn universal_id_falls_back_to_content_hash_prefix() {
        let hash = sha256_hex(b"an identifier-less publication");
        assert_eq!(
            universal_id(None, None, None, None, &hash),
            format!("sha256_{}", &hash[..16])
        );
    }

    #[test]
    fn universal_id_content_hash_fallback_disambiguates_anonymous_publications() {
        let hash_a = sha256_hex(b"publication a");
        let hash_b = sha256_hex(b"publication b");
        assert_ne!(
            universal_id(None, None, None, None, &hash_a),
            universal_id(None, None, None, None, &hash_b),
        );
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `classify_url` never consults the network, so calling it twice on
        /// the same string must land on the same shape.
        #[test]
        fn classify_url_is_always_idempotent(url in "[a-zA-Z0-9:/_.%-]{0,120}") {
            prop_assert_eq!(classify_url(&url), classify_url(&url));
        }

        /// Re-normalizing an already-normalized DOI must be a no-op.
        #[test]
        fn doi_normalization_is_idempotent(prefix in "[a-zA-Z0-9.]{1,20}", suffix in "[a-zA-Z0-9./_-]{1,40}") {
            let raw = format!("{prefix}/{suffix}");
            if let Some(PublicationId::Doi(normalized)) = PublicationId::doi(&raw) {
                let reparsed = PublicationId::doi(&normalized);
                prop_assert_eq!(reparsed, Some(PublicationId::Doi(normalized)));
            }
        }

        /// The output of `sanitize_filename` is already made of only safe
        /// characters and is within the length cap, so sanitizing it again
        /// must be a fixed point.
        #[test]
        fn sanitize_filename_is_a_projection(raw in ".{0,250}") {
            let sanitized = sanitize_filename(&raw);
            prop_assert_eq!(sanitize_filename(&sanitized.clone()), sanitized);
        }
    }
}
