//! PMID metadata client: batch-fetches title/authors/journal/year/DOI/PMC for
//! up to 200 PMIDs per call via NCBI `efetch` (§4.2).

use crate::http_client::HttpClient;
use crate::model::Publication;
use std::collections::HashMap;
use std::sync::Arc;

pub const MAX_BATCH: usize = 200;

pub struct PmidMetadataClient {
    http: Arc<HttpClient>,
    base_url: String,
    api_key: Option<String>,
}

impl PmidMetadataClient {
    pub fn new(http: Arc<HttpClient>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi".to_string(),
            api_key,
        }
    }

    pub async fn fetch_batch(&self, pmids: &[String]) -> crate::Result<Vec<Publication>> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for chunk in pmids.chunks(MAX_BATCH) {
            out.extend(self.fetch_chunk(chunk).await?);
        }
        Ok(out)
    }

    async fn fetch_chunk(&self, pmids: &[String]) -> crate::Result<Vec<Publication>> {
        let mut headers = HashMap::new();
        if let Some(key) = &self.api_key {
            headers.insert("api-key".to_string(), key.clone());
        }
        let url = format!(
            "{}?db=pubmed&id={}&rettype=abstract&retmode=xml",
            self.base_url,
            pmids.join(",")
        );
        let (bytes, _) = self
            .http
            .get(&url, &headers, false)
            .await
            .map_err(|e| crate::Error::Source {
                source_name: "pmid_metadata".to_string(),
                reason: e.to_string(),
            })?;
        let text = String::from_utf8_lossy(&bytes);
        parse_pubmed_xml(&text)
    }
}

/// Parse a PubMed `efetch` `PubmedArticleSet` document into publication stubs.
fn parse_pubmed_xml(xml: &str) -> crate::Result<Vec<Publication>> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| crate::Error::Parse {
        context: "pmid_metadata".to_string(),
        message: e.to_string(),
    })?;

    let mut out = Vec::new();
    for article in doc.descendants().filter(|n| n.has_tag_name("PubmedArticle")) {
        let mut publication = Publication::default();

        if let Some(pmid_node) = article.descendants().find(|n| n.has_tag_name("PMID")) {
            publication.pmid = pmid_node.text().map(str::to_string);
        }
        if let Some(title_node) = article.descendants().find(|n| n.has_tag_name("ArticleTitle")) {
            publication.title = title_node.text().map(str::to_string);
        }
        if let Some(journal_node) = article.descendants().find(|n| n.has_tag_name("Title")) {
            publication.journal = journal_node.text().map(str::to_string);
        }
        if let Some(year_node) = article
            .descendants()
            .find(|n| n.has_tag_name("PubDate"))
            .and_then(|pd| pd.descendants().find(|n| n.has_tag_name("Year")))
        {
            publication.year = year_node.text().and_then(|t| t.parse().ok());
        }
        for author in article.descendants().filter(|n| n.has_tag_name("Author")) {
            let last = author
                .descendants()
                .find(|n| n.has_tag_name("LastName"))
                .and_then(|n| n.text());
            let fore = author
                .descendants()
                .find(|n| n.has_tag_name("ForeName"))
                .and_then(|n| n.text());
            if let Some(last) = last {
                let name = match fore {
                    Some(fore) => format!("{fore} {last}"),
                    None => last.to_string(),
                };
                publication.authors.push(name);
            }
        }
        for id_node in article.descendants().filter(|n| n.has_tag_name("ArticleId")) {
            match id_node.attribute("IdType") {
                Some("doi") => publication.doi = id_node.text().map(str::to_string),
                Some("pmc") => publication.pmc = id_node.text().map(str::to_string),
                _ => {}
            }
        }

        if publication.pmid.is_some() {
            out.push(publication);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>12345</PMID>
      <Article>
        <Journal><Title>Nature</Title></Journal>
        <ArticleTitle>A study of things</ArticleTitle>
        <AuthorList>
          <Author><LastName>Smith</LastName><ForeName>Jane</ForeName></Author>
        </AuthorList>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="doi">10.1038/abc</ArticleId>
        <ArticleId IdType="pmc">PMC1234567</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn parses_pmid_title_doi_and_pmc() {
        let pubs = parse_pubmed_xml(SAMPLE).unwrap();
        assert_eq!(pubs.len(), 1);
        assert_eq!(pubs[0].pmid.as_deref(), Some("12345"));
        assert_eq!(pubs[0].doi.as_deref(), Some("10.1038/abc"));
        assert_eq!(pubs[0].pmc.as_deref(), Some("PMC1234567"));
        assert_eq!(pubs[0].authors, vec!["Jane Smith"]);
    }

    #[test]
    fn articles_without_pmid_are_dropped() {
        let pubs = parse_pubmed_xml("<PubmedArticleSet></PubmedArticleSet>").unwrap();
        assert!(pubs.is_empty());
    }
}
