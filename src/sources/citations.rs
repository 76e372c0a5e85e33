//! The five citation-discovery sources from §4.2: OpenAlex, Semantic Scholar,
//! Europe PMC, OpenCitations Meta, and PubMed elink.

use crate::http_client::HttpClient;
use crate::model::{Publication, SourcePriority};
use crate::sources::traits::{CitationSource, SourceOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

fn empty_headers() -> HashMap<String, String> {
    HashMap::new()
}

fn source_err(source_name: &str, e: impl std::fmt::Display) -> crate::Error {
    crate::Error::Source {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    }
}

/// Citations by DOI via OpenAlex's `filter=cites:W...`. Paged via OpenAlex's
/// cursor pagination (`cursor=*` then `meta.next_cursor`), bounded by
/// `max_pages` (spec.md §4.2/§6 list this source as paged).
pub struct OpenAlexCitations {
    http: Arc<HttpClient>,
    max_pages: u32,
}

impl OpenAlexCitations {
    pub fn new(http: Arc<HttpClient>, max_pages: u32) -> Self {
        Self { http, max_pages }
    }
}

#[async_trait]
impl CitationSource for OpenAlexCitations {
    fn name(&self) -> &str {
        "openalex"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::High
    }

    async fn get_citations(&self, seed: &Publication) -> SourceOutcome<Vec<Publication>> {
        let Some(doi) = &seed.doi else {
            return SourceOutcome::Skipped {
                reason: "no doi on seed publication".to_string(),
            };
        };

        let mut citing = Vec::new();
        let mut cursor = "*".to_string();
        for _ in 0..self.max_pages.max(1) {
            let url = format!(
                "https://api.openalex.org/works?filter=cites:https://doi.org/{}&per-page=100&cursor={}",
                urlencoding::encode(doi),
                urlencoding::encode(&cursor)
            );
            let page = match self.http.get(&url, &empty_headers(), false).await {
                Ok((bytes, _)) => match parse_openalex_page(&bytes) {
                    Ok(page) => page,
                    Err(e) => {
                        return SourceOutcome::Failed {
                            reason: source_err("openalex", e).to_string(),
                        }
                    }
                },
                Err(e) => return SourceOutcome::Failed { reason: e.to_string() },
            };

            let page_len = page.items.len();
            citing.extend(page.items);
            match page.next_cursor {
                Some(next) if page_len > 0 => cursor = next,
                _ => break,
            }
        }

        SourceOutcome::Ok(citing)
    }
}

struct OpenAlexPage {
    items: Vec<Publication>,
    next_cursor: Option<String>,
}

fn parse_openalex_page(bytes: &[u8]) -> crate::Result<OpenAlexPage> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let items = parse_openalex_results(&value);
    let next_cursor = value["meta"]["next_cursor"].as_str().map(str::to_string);
    Ok(OpenAlexPage { items, next_cursor })
}

fn parse_openalex_results(value: &serde_json::Value) -> Vec<Publication> {
    let mut out = Vec::new();
    for item in value["results"].as_array().into_iter().flatten() {
        let doi = item["doi"]
            .as_str()
            .map(|d| d.trim_start_matches("https://doi.org/").to_string());
        let title = item["title"].as_str().map(str::to_string);
        let year = item["publication_year"].as_i64().map(|y| y as i32);
        let authors = item["authorships"]
            .as_array()
            .map(|authors| {
                authors
                    .iter()
                    .filter_map(|a| a["author"]["display_name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        out.push(Publication {
            doi,
            title,
            year,
            authors,
            provider_raw: item.clone(),
            ..Default::default()
        });
    }
    out
}

/// Citations by DOI or PMID via Semantic Scholar's citations endpoint. Paged
/// via `offset`/`limit`, following the response's `next` offset, bounded by
/// `max_pages`.
pub struct SemanticScholarCitations {
    http: Arc<HttpClient>,
    api_key: Option<String>,
    max_pages: u32,
}

impl SemanticScholarCitations {
    pub fn new(http: Arc<HttpClient>, api_key: Option<String>, max_pages: u32) -> Self {
        Self { http, api_key, max_pages }
    }
}

#[async_trait]
impl CitationSource for SemanticScholarCitations {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::High
    }

    async fn get_citations(&self, seed: &Publication) -> SourceOutcome<Vec<Publication>> {
        let id = seed
            .doi
            .as_ref()
            .map(|d| format!("DOI:{d}"))
            .or_else(|| seed.pmid.as_ref().map(|p| format!("PMID:{p}")));
        let Some(id) = id else {
            return SourceOutcome::Skipped {
                reason: "seed has neither doi nor pmid".to_string(),
            };
        };

        let mut headers = empty_headers();
        if let Some(key) = &self.api_key {
            headers.insert("x-api-key".to_string(), key.clone());
        }

        let mut citing = Vec::new();
        let mut offset = 0u64;
        for _ in 0..self.max_pages.max(1) {
            let url = format!(
                "https://api.semanticscholar.org/graph/v1/paper/{id}/citations?fields=title,year,authors,externalIds&limit=100&offset={offset}"
            );
            let page = match self.http.get(&url, &headers, false).await {
                Ok((bytes, _)) => match parse_semantic_scholar_page(&bytes) {
                    Ok(page) => page,
                    Err(e) => {
                        return SourceOutcome::Failed {
                            reason: source_err("semantic_scholar", e).to_string(),
                        }
                    }
                },
                Err(e) => return SourceOutcome::Failed { reason: e.to_string() },
            };

            let page_len = page.items.len();
            citing.extend(page.items);
            match page.next_offset {
                Some(next) if page_len > 0 => offset = next,
                _ => break,
            }
        }

        SourceOutcome::Ok(citing)
    }
}

struct SemanticScholarPage {
    items: Vec<Publication>,
    next_offset: Option<u64>,
}

fn parse_semantic_scholar_page(bytes: &[u8]) -> crate::Result<SemanticScholarPage> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let items = parse_semantic_scholar_results(&value);
    let next_offset = value["next"].as_u64();
    Ok(SemanticScholarPage { items, next_offset })
}

fn parse_semantic_scholar_results(value: &serde_json::Value) -> Vec<Publication> {
    let mut out = Vec::new();
    for edge in value["data"].as_array().into_iter().flatten() {
        let paper = &edge["citingPaper"];
        let external_ids = &paper["externalIds"];
        out.push(Publication {
            doi: external_ids["DOI"].as_str().map(str::to_string),
            pmid: external_ids["PubMed"].as_str().map(str::to_string),
            title: paper["title"].as_str().map(str::to_string),
            year: paper["year"].as_i64().map(|y| y as i32),
            authors: paper["authors"]
                .as_array()
                .map(|a| a.iter().filter_map(|x| x["name"].as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            provider_raw: paper.clone(),
            ..Default::default()
        });
    }
    out
}

const EUROPE_PMC_PAGE_SIZE: usize = 100;

/// Citations by DOI or PMID via Europe PMC. Paged via the `page` query
/// parameter; a page shorter than [`EUROPE_PMC_PAGE_SIZE`] means it was the
/// last one, otherwise pagination continues up to `max_pages`.
pub struct EuropePmcCitations {
    http: Arc<HttpClient>,
    max_pages: u32,
}

impl EuropePmcCitations {
    pub fn new(http: Arc<HttpClient>, max_pages: u32) -> Self {
        Self { http, max_pages }
    }
}

#[async_trait]
impl CitationSource for EuropePmcCitations {
    fn name(&self) -> &str {
        "europe_pmc"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::High
    }

    async fn get_citations(&self, seed: &Publication) -> SourceOutcome<Vec<Publication>> {
        let (source, ext_id) = if let Some(pmid) = &seed.pmid {
            ("MED", pmid.clone())
        } else if let Some(doi) = &seed.doi {
            ("DOI", doi.clone())
        } else {
            return SourceOutcome::Skipped {
                reason: "seed has neither pmid nor doi".to_string(),
            };
        };

        let mut citing = Vec::new();
        for page_num in 1..=self.max_pages.max(1) {
            let url = format!(
                "https://www.ebi.ac.uk/europepmc/webservices/rest/{source}/{ext_id}/citations?format=json&pageSize={EUROPE_PMC_PAGE_SIZE}&page={page_num}"
            );
            let page = match self.http.get(&url, &empty_headers(), false).await {
                Ok((bytes, _)) => match parse_europe_pmc_response(&bytes) {
                    Ok(pubs) => pubs,
                    Err(e) => {
                        return SourceOutcome::Failed {
                            reason: source_err("europe_pmc", e).to_string(),
                        }
                    }
                },
                Err(e) => return SourceOutcome::Failed { reason: e.to_string() },
            };

            let page_len = page.len();
            citing.extend(page);
            if page_len < EUROPE_PMC_PAGE_SIZE {
                break;
            }
        }

        SourceOutcome::Ok(citing)
    }
}

fn parse_europe_pmc_response(bytes: &[u8]) -> crate::Result<Vec<Publication>> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let mut out = Vec::new();
    for item in value["citationList"]["citation"].as_array().into_iter().flatten() {
        out.push(Publication {
            pmid: item["id"].as_str().map(str::to_string),
            title: item["title"].as_str().map(str::to_string),
            journal: item["journalAbbreviation"].as_str().map(str::to_string),
            year: item["pubYear"].as_str().and_then(|y| y.parse().ok()),
            provider_raw: item.clone(),
            ..Default::default()
        });
    }
    Ok(out)
}

/// Citations by DOI via OpenCitations Meta; supports batch (10 DOIs/request).
pub struct OpenCitationsMeta {
    http: Arc<HttpClient>,
}

impl OpenCitationsMeta {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CitationSource for OpenCitationsMeta {
    fn name(&self) -> &str {
        "opencitations_meta"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Medium
    }

    async fn get_citations(&self, seed: &Publication) -> SourceOutcome<Vec<Publication>> {
        let Some(doi) = &seed.doi else {
            return SourceOutcome::Skipped {
                reason: "no doi on seed publication".to_string(),
            };
        };
        let url = format!("https://opencitations.net/index/api/v2/citations/doi:{doi}");
        match self.http.get(&url, &empty_headers(), false).await {
            Ok((bytes, _)) => match parse_opencitations_response(&bytes) {
                Ok(pubs) => SourceOutcome::Ok(pubs),
                Err(e) => SourceOutcome::Failed {
                    reason: source_err("opencitations_meta", e).to_string(),
                },
            },
            Err(e) => SourceOutcome::Failed { reason: e.to_string() },
        }
    }
}

fn parse_opencitations_response(bytes: &[u8]) -> crate::Result<Vec<Publication>> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let mut out = Vec::new();
    for item in value.as_array().into_iter().flatten() {
        let Some(citing) = item["citing"].as_str() else {
            continue;
        };
        out.push(Publication {
            doi: Some(citing.trim_start_matches("doi:").to_string()),
            provider_raw: item.clone(),
            ..Default::default()
        });
    }
    Ok(out)
}

/// Citations by PMID via `linkname=pubmed_pubmed_citedin`, batched through
/// `efetch` (up to 100 citing PMIDs per call).
pub struct PubmedElinkCitations {
    http: Arc<HttpClient>,
    metadata: crate::sources::pmid_metadata::PmidMetadataClient,
}

impl PubmedElinkCitations {
    pub fn new(http: Arc<HttpClient>, api_key: Option<String>) -> Self {
        let metadata = crate::sources::pmid_metadata::PmidMetadataClient::new(http.clone(), api_key);
        Self { http, metadata }
    }
}

#[async_trait]
impl CitationSource for PubmedElinkCitations {
    fn name(&self) -> &str {
        "pubmed_elink"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::High
    }

    async fn get_citations(&self, seed: &Publication) -> SourceOutcome<Vec<Publication>> {
        let Some(pmid) = &seed.pmid else {
            return SourceOutcome::Skipped {
                reason: "no pmid on seed publication".to_string(),
            };
        };
        let url = format!(
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/elink.fcgi?dbfrom=pubmed&db=pubmed&linkname=pubmed_pubmed_citedin&id={pmid}&retmode=json"
        );
        let citing_pmids = match self.http.get(&url, &empty_headers(), false).await {
            Ok((bytes, _)) => match parse_elink_response(&bytes) {
                Ok(pmids) => pmids,
                Err(e) => {
                    return SourceOutcome::Failed {
                        reason: source_err("pubmed_elink", e).to_string(),
                    }
                }
            },
            Err(e) => return SourceOutcome::Failed { reason: e.to_string() },
        };

        if citing_pmids.is_empty() {
            return SourceOutcome::Ok(Vec::new());
        }

        match self.metadata.fetch_batch(&citing_pmids).await {
            Ok(pubs) => SourceOutcome::Ok(pubs),
            Err(e) => SourceOutcome::Failed { reason: e.to_string() },
        }
    }
}

fn parse_elink_response(bytes: &[u8]) -> crate::Result<Vec<String>> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let mut out = Vec::new();
    for linkset in value["linksets"].as_array().into_iter().flatten() {
        for db in linkset["linksetdbs"].as_array().into_iter().flatten() {
            for id in db["links"].as_array().into_iter().flatten() {
                if let Some(s) = id.as_str() {
                    out.push(s.to_string());
                } else if let Some(n) = id.as_i64() {
                    out.push(n.to_string());
                }
            }
        }
    }
    out.truncate(100);
    Ok(out)
}
