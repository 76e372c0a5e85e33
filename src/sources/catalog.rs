//! Dataset catalog metadata client: given a dataset id (e.g. `GSE189158`),
//! fetches title/organism/platform/sample-count/submission-date and the
//! PMIDs associated with the dataset (§4.2).

use crate::http_client::HttpClient;
use crate::model::Dataset;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct CatalogClient {
    http: Arc<HttpClient>,
    base_url: String,
    api_key: Option<String>,
}

/// Result of a catalog lookup: dataset metadata plus the PMIDs that should
/// seed citation discovery.
pub struct CatalogRecord {
    pub dataset: Dataset,
    pub pmids: Vec<String>,
}

impl CatalogClient {
    pub fn new(http: Arc<HttpClient>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi".to_string(),
            api_key,
        }
    }

    pub async fn fetch(&self, dataset_id: &str) -> crate::Result<CatalogRecord> {
        let mut headers = HashMap::new();
        if let Some(key) = &self.api_key {
            headers.insert("api-key".to_string(), key.clone());
        }

        let url = format!("{}?acc={}&targ=self&form=text&view=quick", self.base_url, dataset_id);
        let (bytes, _final_url) = self
            .http
            .get(&url, &headers, false)
            .await
            .map_err(|e| crate::Error::Source {
                source_name: "catalog".to_string(),
                reason: e.to_string(),
            })?;

        let text = String::from_utf8_lossy(&bytes);
        debug!(dataset_id, bytes = text.len(), "fetched catalog record");
        Ok(parse_catalog_text(dataset_id, &text))
    }
}

/// Parse the GEO `form=text` key-value record into a [`CatalogRecord`].
/// Unknown/missing fields are left `None` rather than failing the whole call.
fn parse_catalog_text(dataset_id: &str, text: &str) -> CatalogRecord {
    let mut dataset = Dataset::new(dataset_id);
    let mut pmids = Vec::new();

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_start_matches('!').trim_start_matches("Series_");
        let value = value.trim();
        match key {
            "title" => dataset.title = Some(value.to_string()),
            "organism_ch1" | "organism" => dataset.organism = Some(value.to_string()),
            "platform_id" => dataset.platform = Some(value.to_string()),
            "submission_date" => dataset.submission_date = Some(value.to_string()),
            "sample_id" => {
                dataset.sample_count = Some(dataset.sample_count.unwrap_or(0) + 1);
            }
            "pubmed_id" => pmids.push(value.to_string()),
            _ => {}
        }
    }

    dataset.provider_raw = serde_json::json!({ "raw_text_len": text.len() });
    CatalogRecord { dataset, pmids }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_organism_and_pmids() {
        let text = "!Series_title = A study\n!Series_organism_ch1 = Homo sapiens\n!Series_pubmed_id = 12345\n!Series_pubmed_id = 67890\n";
        let record = parse_catalog_text("GSE1", text);
        assert_eq!(record.dataset.title.as_deref(), Some("A study"));
        assert_eq!(record.dataset.organism.as_deref(), Some("Homo sapiens"));
        assert_eq!(record.pmids, vec!["12345", "67890"]);
    }

    #[test]
    fn missing_fields_default_to_none() {
        let record = parse_catalog_text("GSE2", "");
        assert!(record.dataset.title.is_none());
        assert!(record.pmids.is_empty());
    }
}
