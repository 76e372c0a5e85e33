//! URL/PDF sources from §4.2: pmc, unpaywall, core, openalex_oa,
//! biorxiv/arxiv, crossref, institutional, scihub, libgen.

use crate::http_client::HttpClient;
use crate::ids::classify_url;
use crate::model::{Publication, SourcePriority, UrlDescriptor};
use crate::sources::traits::{base_priority, UrlSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

fn descriptor(url: &str, source: &str, priority_class: SourcePriority) -> UrlDescriptor {
    let shape = classify_url(url);
    let adjustment = match shape {
        crate::ids::UrlShape::PdfDirect => -1,
        crate::ids::UrlShape::DoiResolver => 2,
        crate::ids::UrlShape::LandingPage => 1,
        _ => 0,
    };
    UrlDescriptor {
        url: url.to_string(),
        source: source.to_string(),
        priority: base_priority(priority_class) + adjustment,
        shape,
        confidence: 0.8,
        requires_auth: false,
        metadata: serde_json::Value::Null,
    }
}

fn empty_headers() -> HashMap<String, String> {
    HashMap::new()
}

/// PMC full-text by PMC ID: the direct article view plus a PDF link resolved
/// from the PMC Open Access Web Service, whose `ftp://` href is rewritten to
/// `https://` (NCBI serves the same OA tree over both protocols, and the
/// pipeline never does FTP). When a publication carries a PMID but no PMC
/// ID, one is resolved first through the NCBI ID Converter API — a
/// PMID-only publication is no longer unconditionally skipped here.
pub struct PmcUrlSource {
    http: Arc<HttpClient>,
}

impl PmcUrlSource {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl UrlSource for PmcUrlSource {
    fn name(&self) -> &str {
        "pmc"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::High
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;

        let pmc = match &publication.pmc {
            Some(pmc) => pmc.clone(),
            None => {
                let Some(pmid) = &publication.pmid else {
                    return SourceOutcome::Skipped {
                        reason: "no pmc id and no pmid to resolve one from".to_string(),
                    };
                };
                match self.resolve_pmcid(pmid).await {
                    Ok(Some(resolved)) => resolved,
                    Ok(None) => {
                        return SourceOutcome::Skipped {
                            reason: format!("pmid {pmid} has no pmc full text"),
                        };
                    }
                    Err(e) => {
                        return SourceOutcome::Failed {
                            reason: format!("id converter lookup failed: {e}"),
                        };
                    }
                }
            }
        };

        let mut urls = vec![
            descriptor(
                &format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmc}/pdf/"),
                "pmc",
                self.priority(),
            ),
            descriptor(
                &format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{pmc}/"),
                "pmc",
                self.priority(),
            ),
        ];

        if let Some(ftp_link) = self.resolve_oa_pdf_link(&pmc).await {
            urls.push(descriptor(&rewrite_ftp_to_https(&ftp_link), "pmc", self.priority()));
        }

        SourceOutcome::Ok(urls)
    }
}

impl PmcUrlSource {
    async fn resolve_pmcid(&self, pmid: &str) -> Result<Option<String>, crate::http_client::HttpError> {
        let url = format!("https://www.ncbi.nlm.nih.gov/pmc/utils/idconv/v1.0/?ids={pmid}&format=json");
        let (bytes, _) = self.http.get(&url, &empty_headers(), false).await?;
        Ok(parse_id_converter_pmcid(&bytes))
    }

    /// Best-effort: an OA lookup failure still leaves the two direct article
    /// URLs above, so errors here are swallowed rather than surfaced.
    async fn resolve_oa_pdf_link(&self, pmc: &str) -> Option<String> {
        let url = format!("https://www.ncbi.nlm.nih.gov/pmc/utils/oa/oa.fcgi?id={pmc}");
        let (bytes, _) = self.http.get(&url, &empty_headers(), false).await.ok()?;
        parse_oa_pdf_ftp_link(&bytes)
    }
}

fn parse_id_converter_pmcid(bytes: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    value["records"]
        .as_array()?
        .iter()
        .find_map(|record| record["pmcid"].as_str().map(str::to_string))
}

fn parse_oa_pdf_ftp_link(bytes: &[u8]) -> Option<String> {
    let xml = String::from_utf8_lossy(bytes);
    let document = roxmltree::Document::parse(&xml).ok()?;
    document
        .descendants()
        .find(|node| node.has_tag_name("link") && node.attribute("format") == Some("pdf"))
        .and_then(|node| node.attribute("href"))
        .map(str::to_string)
}

fn rewrite_ftp_to_https(url: &str) -> String {
    match url.strip_prefix("ftp://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

/// Unpaywall: by DOI, `best_oa_location` plus every `oa_locations[*].url_for_pdf`.
pub struct UnpaywallSource {
    http: Arc<HttpClient>,
    email: Option<String>,
}

impl UnpaywallSource {
    pub fn new(http: Arc<HttpClient>, email: Option<String>) -> Self {
        Self { http, email }
    }
}

#[async_trait]
impl UrlSource for UnpaywallSource {
    fn name(&self) -> &str {
        "unpaywall"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::High
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;
        let Some(doi) = &publication.doi else {
            return SourceOutcome::Skipped {
                reason: "no doi".to_string(),
            };
        };
        let Some(email) = &self.email else {
            return SourceOutcome::Skipped {
                reason: "UNPAYWALL_EMAIL not configured".to_string(),
            };
        };
        let url = format!("https://api.unpaywall.org/v2/{doi}?email={email}");
        match self.http.get(&url, &empty_headers(), false).await {
            Ok((bytes, _)) => match parse_unpaywall_response(&bytes, self.priority()) {
                Ok(urls) => SourceOutcome::Ok(urls),
                Err(e) => SourceOutcome::Failed { reason: e.to_string() },
            },
            Err(e) => SourceOutcome::Failed { reason: e.to_string() },
        }
    }
}

fn parse_unpaywall_response(bytes: &[u8], priority: SourcePriority) -> crate::Result<Vec<UrlDescriptor>> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let mut push = |u: Option<&str>| {
        if let Some(u) = u {
            if seen.insert(u.to_string()) {
                out.push(descriptor(u, "unpaywall", priority));
            }
        }
    };

    push(value["best_oa_location"]["url_for_pdf"].as_str());
    push(value["best_oa_location"]["url"].as_str());
    for loc in value["oa_locations"].as_array().into_iter().flatten() {
        push(loc["url_for_pdf"].as_str());
    }
    Ok(out)
}

/// CORE aggregator: returns zero or more candidate PDF URLs by DOI.
pub struct CoreSource {
    http: Arc<HttpClient>,
    api_key: Option<String>,
}

impl CoreSource {
    pub fn new(http: Arc<HttpClient>, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }
}

#[async_trait]
impl UrlSource for CoreSource {
    fn name(&self) -> &str {
        "core"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Medium
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;
        let Some(doi) = &publication.doi else {
            return SourceOutcome::Skipped {
                reason: "no doi".to_string(),
            };
        };
        let Some(key) = &self.api_key else {
            return SourceOutcome::Skipped {
                reason: "CORE api key not configured".to_string(),
            };
        };
        let url = format!("https://api.core.ac.uk/v3/search/works?q=doi:{doi}&api_key={key}");
        match self.http.get(&url, &empty_headers(), false).await {
            Ok((bytes, _)) => match parse_core_response(&bytes, self.priority()) {
                Ok(urls) => SourceOutcome::Ok(urls),
                Err(e) => SourceOutcome::Failed { reason: e.to_string() },
            },
            Err(e) => SourceOutcome::Failed { reason: e.to_string() },
        }
    }
}

fn parse_core_response(bytes: &[u8], priority: SourcePriority) -> crate::Result<Vec<UrlDescriptor>> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let mut out = Vec::new();
    for hit in value["results"].as_array().into_iter().flatten() {
        if let Some(url) = hit["downloadUrl"].as_str() {
            out.push(descriptor(url, "core", priority));
        }
    }
    Ok(out)
}

/// OpenAlex's own open-access location for a work, found by DOI.
pub struct OpenAlexOaSource {
    http: Arc<HttpClient>,
}

impl OpenAlexOaSource {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl UrlSource for OpenAlexOaSource {
    fn name(&self) -> &str {
        "openalex_oa"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Medium
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;
        let Some(doi) = &publication.doi else {
            return SourceOutcome::Skipped {
                reason: "no doi".to_string(),
            };
        };
        let url = format!("https://api.openalex.org/works/https://doi.org/{doi}");
        match self.http.get(&url, &empty_headers(), false).await {
            Ok((bytes, _)) => {
                let value: serde_json::Value = match serde_json::from_slice(&bytes) {
                    Ok(v) => v,
                    Err(e) => return SourceOutcome::Failed { reason: e.to_string() },
                };
                let mut out = Vec::new();
                if let Some(u) = value["open_access"]["oa_url"].as_str() {
                    out.push(descriptor(u, "openalex_oa", self.priority()));
                }
                SourceOutcome::Ok(out)
            }
            Err(e) => SourceOutcome::Failed { reason: e.to_string() },
        }
    }
}

/// Preprint-server direct PDFs: bioRxiv by DOI, arXiv by arXiv id.
pub struct PreprintSource;

#[async_trait]
impl UrlSource for PreprintSource {
    fn name(&self) -> &str {
        "biorxiv_arxiv"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Medium
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;
        let mut out = Vec::new();
        if let Some(arxiv) = &publication.arxiv {
            out.push(descriptor(
                &format!("https://arxiv.org/pdf/{arxiv}.pdf"),
                "arxiv",
                self.priority(),
            ));
        }
        if let Some(doi) = &publication.doi {
            if doi.contains("10.1101") {
                out.push(descriptor(
                    &format!("https://www.biorxiv.org/content/{doi}v1.full.pdf"),
                    "biorxiv",
                    self.priority(),
                ));
            }
        }
        if out.is_empty() {
            SourceOutcome::Skipped {
                reason: "no preprint identifier".to_string(),
            }
        } else {
            SourceOutcome::Ok(out)
        }
    }
}

/// DOI resolver, always classified `doi_resolver`.
pub struct CrossrefSource;

#[async_trait]
impl UrlSource for CrossrefSource {
    fn name(&self) -> &str {
        "crossref"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Low
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;
        let Some(doi) = &publication.doi else {
            return SourceOutcome::Skipped {
                reason: "no doi".to_string(),
            };
        };
        SourceOutcome::Ok(vec![descriptor(
            &format!("https://doi.org/{doi}"),
            "crossref",
            self.priority(),
        )])
    }
}

/// HTTP proxy rewrite for a known DOI, enabled when an institutional proxy
/// base URL is configured.
pub struct InstitutionalSource {
    proxy_base: Option<String>,
}

impl InstitutionalSource {
    pub fn new(proxy_base: Option<String>) -> Self {
        Self { proxy_base }
    }
}

#[async_trait]
impl UrlSource for InstitutionalSource {
    fn name(&self) -> &str {
        "institutional"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Low
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;
        let (Some(proxy), Some(doi)) = (&self.proxy_base, &publication.doi) else {
            return SourceOutcome::Skipped {
                reason: "no institutional proxy configured or no doi".to_string(),
            };
        };
        let target = format!("https://doi.org/{doi}");
        let rewritten = format!("{proxy}/login?url={}", urlencoding::encode(&target));
        let mut d = descriptor(&rewritten, "institutional", self.priority());
        d.requires_auth = true;
        SourceOutcome::Ok(vec![d])
    }
}

/// Gray-area fallback, enabled only by configuration (§4.2 notes this is a
/// fallback, not a default-on source).
pub struct GrayAreaMirrorSource {
    name: &'static str,
    mirror_base: String,
    enabled: bool,
}

impl GrayAreaMirrorSource {
    pub fn scihub(enabled: bool) -> Self {
        Self {
            name: "scihub",
            mirror_base: "https://sci-hub.se".to_string(),
            enabled,
        }
    }

    pub fn libgen(enabled: bool) -> Self {
        Self {
            name: "libgen",
            mirror_base: "https://libgen.is/scimag".to_string(),
            enabled,
        }
    }
}

#[async_trait]
impl UrlSource for GrayAreaMirrorSource {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Fallback
    }

    async fn get_urls(&self, publication: &Publication) -> crate::sources::traits::SourceOutcome<Vec<UrlDescriptor>> {
        use crate::sources::traits::SourceOutcome;
        if !self.enabled {
            return SourceOutcome::Skipped {
                reason: format!("{} disabled by configuration", self.name),
            };
        }
        let Some(doi) = &publication.doi else {
            return SourceOutcome::Skipped {
                reason: "no doi".to_string(),
            };
        };
        SourceOutcome::Ok(vec![descriptor(
            &format!("{}/{}", self.mirror_base, doi),
            self.name,
            self.priority(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unpaywall_dedups_urls() {
        let body = serde_json::json!({
            "best_oa_location": {"url_for_pdf": "https://x.org/a.pdf", "url": "https://x.org/a.pdf"},
            "oa_locations": [{"url_for_pdf": "https://x.org/b.pdf"}]
        });
        let urls = parse_unpaywall_response(body.to_string().as_bytes(), SourcePriority::High).unwrap();
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn parses_core_results() {
        let body = serde_json::json!({"results": [{"downloadUrl": "https://core.example/a.pdf"}]});
        let urls = parse_core_response(body.to_string().as_bytes(), SourcePriority::Medium).unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].shape, crate::ids::UrlShape::PdfDirect);
    }

    #[tokio::test]
    async fn institutional_source_skips_without_doi() {
        let source = InstitutionalSource::new(Some("https://proxy.example.edu".to_string()));
        let publication = Publication::default();
        let outcome = source.get_urls(&publication).await;
        assert!(matches!(outcome, crate::sources::traits::SourceOutcome::Skipped { .. }));
    }

    #[test]
    fn parses_id_converter_pmcid() {
        let body = serde_json::json!({"records": [{"pmid": "12345", "pmcid": "PMC6789"}]});
        assert_eq!(parse_id_converter_pmcid(body.to_string().as_bytes()), Some("PMC6789".to_string()));
    }

    #[test]
    fn id_converter_response_without_pmcid_is_none() {
        let body = serde_json::json!({"records": [{"pmid": "12345", "status": "error"}]});
        assert_eq!(parse_id_converter_pmcid(body.to_string().as_bytes()), None);
    }

    #[test]
    fn parses_oa_pdf_ftp_link() {
        let xml = br#"<OA><records><record id="PMC6789"><link format="tgz" href="ftp://ftp.ncbi.nlm.nih.gov/pub/pmc/a.tar.gz"/><link format="pdf" href="ftp://ftp.ncbi.nlm.nih.gov/pub/pmc/a.pdf"/></record></records></OA>"#;
        assert_eq!(
            parse_oa_pdf_ftp_link(xml),
            Some("ftp://ftp.ncbi.nlm.nih.gov/pub/pmc/a.pdf".to_string())
        );
    }

    #[test]
    fn rewrites_ftp_scheme_to_https() {
        assert_eq!(
            rewrite_ftp_to_https("ftp://ftp.ncbi.nlm.nih.gov/pub/pmc/a.pdf"),
            "https://ftp.ncbi.nlm.nih.gov/pub/pmc/a.pdf"
        );
        assert_eq!(rewrite_ftp_to_https("https://already.https/a.pdf"), "https://already.https/a.pdf");
    }

    #[tokio::test]
    async fn gray_area_source_respects_enabled_flag() {
        let source = GrayAreaMirrorSource::scihub(false);
        let publication = Publication {
            doi: Some("10.1/x".to_string()),
            ..Default::default()
        };
        let outcome = source.get_urls(&publication).await;
        assert!(matches!(outcome, crate::sources::traits::SourceOutcome::Skipped { .. }));
    }
}
