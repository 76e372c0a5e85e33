//! Source client set (L3): one client per external provider, normalizing
//! into the common publication/URL shapes in [`crate::model`].

pub mod catalog;
pub mod citations;
pub mod pmid_metadata;
pub mod traits;
pub mod urls;

pub use traits::{base_priority, CitationSource, SourceOutcome, UrlSource};

use crate::config::Config;
use crate::http_client::HttpClient;
use std::sync::Arc;

/// Every configured citation source, in the order P1 fans them out.
pub fn citation_sources(http: Arc<HttpClient>, config: &Config) -> Vec<Arc<dyn CitationSource>> {
    let max_pages = config.citation_pagination_max_pages;
    vec![
        Arc::new(citations::OpenAlexCitations::new(http.clone(), max_pages)),
        Arc::new(citations::SemanticScholarCitations::new(http.clone(), None, max_pages)),
        Arc::new(citations::EuropePmcCitations::new(http.clone(), max_pages)),
        Arc::new(citations::OpenCitationsMeta::new(http.clone())),
        Arc::new(citations::PubmedElinkCitations::new(
            http,
            config.ncbi_api_key.clone(),
        )),
    ]
}

/// Every configured URL source, in the order P2 fans them out.
pub fn url_sources(http: Arc<HttpClient>, config: &Config) -> Vec<Arc<dyn UrlSource>> {
    vec![
        Arc::new(urls::PmcUrlSource::new(http.clone())),
        Arc::new(urls::UnpaywallSource::new(http.clone(), config.unpaywall_email.clone())),
        Arc::new(urls::CoreSource::new(http.clone(), None)),
        Arc::new(urls::OpenAlexOaSource::new(http)),
        Arc::new(urls::PreprintSource),
        Arc::new(urls::CrossrefSource),
        Arc::new(urls::InstitutionalSource::new(config.institutional_proxy_url.clone())),
        Arc::new(urls::GrayAreaMirrorSource::scihub(false)),
        Arc::new(urls::GrayAreaMirrorSource::libgen(false)),
    ]
}
