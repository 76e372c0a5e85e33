//! End-to-end scenario tests exercising the pipeline stages against a real
//! SQLite-backed `Store`, a real `sled`-backed `Cache`, and a real
//! `HttpClient` pointed at a `wiremock` server. Citation/URL sources are
//! stubbed in-process (no network for P1/P2); P3's HTTP fetch and P4's PDF
//! parse run against real bytes.

use async_trait::async_trait;
use genomics_corpus::http_client::{HttpClient, HttpClientConfig};
use genomics_corpus::ids::UrlShape;
use genomics_corpus::model::{AttemptStatus, Publication, Relationship, SourcePriority, UrlDescriptor};
use genomics_corpus::pipeline::{citation_discovery, pdf_acquisition, url_collection};
use genomics_corpus::sources::{CitationSource, SourceOutcome, UrlSource};
use genomics_corpus::{extraction, Cache, Store};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StubCitationSource {
    name: &'static str,
    priority: SourcePriority,
    citing: Vec<Publication>,
}

#[async_trait]
impl CitationSource for StubCitationSource {
    fn name(&self) -> &str {
        self.name
    }
    fn priority(&self) -> SourcePriority {
        self.priority
    }
    async fn get_citations(&self, _seed: &Publication) -> SourceOutcome<Vec<Publication>> {
        SourceOutcome::Ok(self.citing.clone())
    }
}

struct StubUrlSource {
    name: &'static str,
    priority: SourcePriority,
    urls: Vec<UrlDescriptor>,
}

#[async_trait]
impl UrlSource for StubUrlSource {
    fn name(&self) -> &str {
        self.name
    }
    fn priority(&self) -> SourcePriority {
        self.priority
    }
    async fn get_urls(&self, _publication: &Publication) -> SourceOutcome<Vec<UrlDescriptor>> {
        SourceOutcome::Ok(self.urls.clone())
    }
}

struct RequiresDoiUrlSource;

#[async_trait]
impl UrlSource for RequiresDoiUrlSource {
    fn name(&self) -> &str {
        "unpaywall"
    }
    fn priority(&self) -> SourcePriority {
        SourcePriority::High
    }
    async fn get_urls(&self, publication: &Publication) -> SourceOutcome<Vec<UrlDescriptor>> {
        match &publication.doi {
            Some(_) => SourceOutcome::Ok(vec![]),
            None => SourceOutcome::Skipped { reason: "no doi".to_string() },
        }
    }
}

fn citing_publication(pmid: &str, doi: &str, title: &str) -> Publication {
    Publication {
        pmid: Some(pmid.to_string()),
        doi: Some(doi.to_string()),
        title: Some(title.to_string()),
        ..Default::default()
    }
}

fn url_descriptor(url: &str, priority: i32, shape: UrlShape) -> UrlDescriptor {
    UrlDescriptor {
        url: url.to_string(),
        source: "test".to_string(),
        priority,
        shape,
        confidence: 0.9,
        requires_auth: false,
        metadata: serde_json::Value::Null,
    }
}

/// A byte-valid PDF lopdf can both write and re-parse, padded past the
/// minimum size `ids::validate_pdf_bytes` enforces.
fn build_test_pdf(body_lines: &[&str]) -> Vec<u8> {
    use lopdf::dictionary;
    use lopdf::{Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut content = String::new();
    content.push_str("BT /F1 12 Tf 72 720 Td\n");
    for line in body_lines {
        content.push_str(&format!("({}) Tj 0 -14 Td\n", line.replace('(', "").replace(')', "")));
    }
    content.push_str("ET");

    let content_stream = Stream::new(dictionary! {}, content.into_bytes());
    let content_id = doc.add_object(content_stream);

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![Object::Reference(page_id)],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("lopdf can serialize this document");
    while bytes.len() < 1100 {
        bytes.extend_from_slice(b"\n% padding to clear the minimum pdf size\n");
    }
    bytes
}

#[tokio::test]
async fn s1_known_good_dataset_discovers_and_acquires() {
    let server = MockServer::start().await;
    let pdf_bytes = build_test_pdf(&["Abstract", "This dataset links a spatial transcriptomics study."]);
    Mock::given(method("GET"))
        .and(path("/original.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_bytes))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let store = Store::open(&tmp.path().join("corpus.sqlite3")).await.unwrap();

    let seed = citing_publication("36927507", "10.1186/s13059-023-02889-x", "Spatial atlas of the tissue");
    let citing: Vec<Publication> = (0..7)
        .map(|i| citing_publication(&format!("4000000{i}"), &format!("10.1/citing-{i}"), &format!("Citing paper {i}")))
        .collect();

    let citation_sources: Vec<Arc<dyn CitationSource>> = vec![
        Arc::new(StubCitationSource { name: "europe_pmc", priority: SourcePriority::High, citing: citing.clone() }),
        Arc::new(StubCitationSource { name: "pubmed_elink", priority: SourcePriority::Critical, citing: vec![] }),
    ];
    let outcome = citation_discovery::discover_citations(&citation_sources, &seed, Duration::from_secs(5)).await;
    assert!(outcome.citing.len() >= 7, "expected at least 7 citing papers, got {}", outcome.citing.len());

    let mut tx = store.begin().await.unwrap();
    let dataset = genomics_corpus::model::Dataset::new("GSE189158");
    tx.upsert_dataset(&dataset).await.unwrap();
    let seed_id = tx.upsert_publication(&seed).await.unwrap();
    tx.link("GSE189158", seed_id, Relationship::Original, Some("catalog_pmid"), 0).await.unwrap();
    for (idx, citing_pub) in outcome.citing.iter().enumerate() {
        let id = tx.upsert_publication(citing_pub).await.unwrap();
        tx.link("GSE189158", id, Relationship::Citing, None, (idx + 1) as i64).await.unwrap();
    }
    tx.commit().await.unwrap();

    let pdf_url = format!("{}/original.pdf", server.uri());
    let url_sources: Vec<Arc<dyn UrlSource>> = vec![Arc::new(StubUrlSource {
        name: "pmc",
        priority: SourcePriority::High,
        urls: vec![url_descriptor(&pdf_url, 0, UrlShape::PdfDirect)],
    })];
    let url_outcome = url_collection::collect_urls(&url_sources, &seed, Duration::from_secs(5)).await;
    assert_eq!(url_outcome.urls.len(), 1);

    let http = HttpClient::new(HttpClientConfig::default(), 50.0).unwrap();
    let acquisition = pdf_acquisition::acquire_pdf(
        &http,
        tmp.path(),
        "GSE189158",
        Relationship::Original,
        &seed.universal_id(),
        &url_outcome.urls,
        Duration::from_secs(10),
        5,
    )
    .await;
    assert!(acquisition.succeeded);

    let mut tx = store.begin().await.unwrap();
    for record in &acquisition.attempts {
        tx.append_download_attempt(
            seed_id,
            &record.url,
            &record.source,
            record.status,
            record.file_path.as_deref(),
            record.file_size,
            record.error_message.as_deref(),
        )
        .await
        .unwrap();
    }
    tx.bump_counters("GSE189158").await.unwrap();
    tx.commit().await.unwrap();

    let view = store.get_complete_view("GSE189158").await.unwrap().unwrap();
    assert_eq!(view.original.len(), 1);
    assert!(view.citing.len() >= 7);
    assert!(view.dataset.pdfs_acquired >= 1);
}

#[tokio::test]
async fn s2_doi_less_seed_still_yields_citing_papers_and_skips_unpaywall() {
    let seed = Publication {
        pmid: Some("11111111".to_string()),
        title: Some("A paper with no DOI on record".to_string()),
        ..Default::default()
    };
    let citation_sources: Vec<Arc<dyn CitationSource>> = vec![Arc::new(StubCitationSource {
        name: "pubmed_elink",
        priority: SourcePriority::Critical,
        citing: vec![citing_publication("22222222", "10.1/cites-it", "Cites the DOI-less paper")],
    })];
    let outcome = citation_discovery::discover_citations(&citation_sources, &seed, Duration::from_secs(5)).await;
    assert_eq!(outcome.citing.len(), 1);

    let url_sources: Vec<Arc<dyn UrlSource>> = vec![Arc::new(RequiresDoiUrlSource)];
    let url_outcome = url_collection::collect_urls(&url_sources, &seed, Duration::from_secs(5)).await;
    assert!(url_outcome.urls.is_empty());
    let (_name, _count, ok) = &url_outcome.per_source[0];
    assert!(*ok, "a skip due to missing prerequisites is not a failure");
}

#[tokio::test]
async fn s3_paywalled_citing_paper_records_failed_attempts_no_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paywall"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let http = HttpClient::new(HttpClientConfig::default(), 50.0).unwrap();
    let publication = Publication {
        doi: Some("10.1/paywalled".to_string()),
        ..Default::default()
    };
    let urls = vec![url_descriptor(&format!("{}/paywall", server.uri()), 20, UrlShape::DoiResolver)];

    let acquisition = pdf_acquisition::acquire_pdf(
        &http,
        tmp.path(),
        "GSE1",
        Relationship::Citing,
        &publication.universal_id(),
        &urls,
        Duration::from_secs(5),
        5,
    )
    .await;

    assert!(!acquisition.succeeded);
    assert_eq!(acquisition.attempts.len(), 1);
    assert_eq!(acquisition.attempts[0].status, AttemptStatus::Failed);
}

#[tokio::test]
async fn s4_restart_skips_already_acquired_publications() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Store::open(&tmp.path().join("corpus.sqlite3")).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let dataset = genomics_corpus::model::Dataset::new("GSE1");
    tx.upsert_dataset(&dataset).await.unwrap();
    let publication = Publication { doi: Some("10.1/already-got-it".to_string()), ..Default::default() };
    let publication_id = tx.upsert_publication(&publication).await.unwrap();
    tx.link("GSE1", publication_id, Relationship::Original, None, 0).await.unwrap();
    tx.append_download_attempt(
        publication_id,
        "https://example.org/already.pdf",
        "pmc",
        AttemptStatus::Success,
        Some(&tmp.path().join("already.pdf").display().to_string()),
        Some(2048),
        None,
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let already_downloaded = store.most_recent_successful_attempt(publication_id).await.unwrap().is_some();
    assert!(already_downloaded);
    assert!(url_collection::should_skip(already_downloaded));

    let downloads_before = store.get_complete_view("GSE1").await.unwrap().unwrap().per_publication[&publication_id]
        .downloads
        .len();
    assert_eq!(downloads_before, 1, "a second run must not create a duplicate DownloadAttempt");
}

#[tokio::test]
async fn s5_cache_reflects_writes_after_invalidation() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Store::open(&tmp.path().join("corpus.sqlite3")).await.unwrap();
    let cache = Cache::open(&tmp.path().join("cache.sled"), Duration::from_secs(3600));

    let mut tx = store.begin().await.unwrap();
    tx.upsert_dataset(&genomics_corpus::model::Dataset::new("GSE1")).await.unwrap();
    let first = Publication { doi: Some("10.1/first".to_string()), ..Default::default() };
    let first_id = tx.upsert_publication(&first).await.unwrap();
    tx.link("GSE1", first_id, Relationship::Original, None, 0).await.unwrap();
    tx.commit().await.unwrap();

    let first_view = cache.get_or_load(&store, "GSE1").await.unwrap().unwrap();
    let first_count = first_view.original.len() + first_view.citing.len();

    let mut tx = store.begin().await.unwrap();
    let second = Publication { doi: Some("10.1/second".to_string()), ..Default::default() };
    let second_id = tx.upsert_publication(&second).await.unwrap();
    tx.link("GSE1", second_id, Relationship::Citing, None, 1).await.unwrap();
    tx.commit().await.unwrap();

    cache.invalidate("GSE1");
    let second_view = cache.get_or_load(&store, "GSE1").await.unwrap().unwrap();
    let second_count = second_view.original.len() + second_view.citing.len();

    assert!(second_count > first_count, "invalidated cache must reflect the new linked publication");
}

#[tokio::test]
async fn s6_flapping_source_still_lets_other_sources_complete_citation_discovery() {
    use genomics_corpus::pipeline::coordinator::SourceHealthTracker;

    let health = SourceHealthTracker::default();
    // Simulate Europe PMC returning 503 on most of its last 20 calls, well
    // past the 20%-success-rate floor the adaptive policy enforces.
    for i in 0..20 {
        health.record("europe_pmc", i == 0);
    }
    assert!(health.is_low_reliability("europe_pmc"));

    let citation_sources: Vec<Arc<dyn CitationSource>> = vec![
        Arc::new(StubCitationSource {
            name: "europe_pmc",
            priority: SourcePriority::High,
            citing: vec![citing_publication("1", "10.1/a", "A")],
        }),
        Arc::new(StubCitationSource {
            name: "openalex",
            priority: SourcePriority::High,
            citing: vec![
                citing_publication("2", "10.1/b", "B"),
                citing_publication("3", "10.1/c", "C"),
            ],
        }),
    ];
    let active: Vec<Arc<dyn CitationSource>> = citation_sources
        .into_iter()
        .filter(|s| s.priority() == SourcePriority::Critical || !health.is_low_reliability(s.name()))
        .collect();
    assert_eq!(active.len(), 1, "the flapping HIGH source is dropped, the healthy HIGH source stays");

    let seed = Publication::default();
    let outcome = citation_discovery::discover_citations(&active, &seed, Duration::from_secs(5)).await;
    assert_eq!(outcome.citing.len(), 2, "P1 still succeeds using the remaining healthy source");
}

#[tokio::test]
async fn content_extraction_round_trips_through_a_real_pdf() {
    let tmp = tempfile::tempdir().unwrap();
    let pdf_path = tmp.path().join("paper.pdf");
    let bytes = build_test_pdf(&[
        "Abstract",
        "We describe a pipeline for dataset-linked publication acquisition.",
        "References",
        "1. Smith et al. 2021.",
    ]);
    std::fs::write(&pdf_path, &bytes).unwrap();

    let extraction = extraction::extract_for_publication(
        "GSE1".to_string(),
        1,
        pdf_path,
        genomics_corpus::config::ExtractionWeights::default(),
    )
    .await;

    assert!(extraction.quality_score > 0.0);
    assert_ne!(extraction.quality_grade, "F");
    assert!(extraction.page_count >= 1);
}
