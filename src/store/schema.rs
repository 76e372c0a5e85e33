//! Embedded schema DDL. Executed once, idempotently, at [`super::Store::open`].
//! There is exactly one schema version; a migration runner would be
//! unjustified weight for a store this size.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    dataset_id TEXT PRIMARY KEY,
    title TEXT,
    organism TEXT,
    platform TEXT,
    sample_count INTEGER,
    submission_date TEXT,
    publication_count INTEGER NOT NULL DEFAULT 0,
    pdfs_acquired INTEGER NOT NULL DEFAULT 0,
    pdfs_extracted INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'new',
    provider_raw TEXT NOT NULL DEFAULT 'null'
);

CREATE TABLE IF NOT EXISTS publications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pmid TEXT UNIQUE,
    doi TEXT,
    pmc TEXT,
    arxiv TEXT,
    title TEXT,
    authors TEXT NOT NULL DEFAULT '[]',
    journal TEXT,
    year INTEGER,
    provider_raw TEXT NOT NULL DEFAULT 'null',
    urls TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_publications_pmid ON publications(pmid);
CREATE INDEX IF NOT EXISTS idx_publications_doi ON publications(doi);

CREATE TABLE IF NOT EXISTS dataset_publications (
    dataset_id TEXT NOT NULL REFERENCES datasets(dataset_id),
    publication_id INTEGER NOT NULL REFERENCES publications(id),
    relationship TEXT NOT NULL,
    strategy TEXT,
    publication_index INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (dataset_id, publication_id)
);
CREATE INDEX IF NOT EXISTS idx_dataset_publications_dataset ON dataset_publications(dataset_id);
CREATE INDEX IF NOT EXISTS idx_dataset_publications_relationship ON dataset_publications(relationship);

CREATE TABLE IF NOT EXISTS download_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    publication_id INTEGER NOT NULL REFERENCES publications(id),
    url TEXT NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL,
    file_path TEXT,
    file_size INTEGER,
    error_message TEXT,
    attempt_number INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_download_attempts_publication ON download_attempts(publication_id);
CREATE INDEX IF NOT EXISTS idx_download_attempts_status ON download_attempts(status);

CREATE TABLE IF NOT EXISTS content_extractions (
    dataset_id TEXT NOT NULL,
    publication_id INTEGER NOT NULL,
    sections TEXT NOT NULL,
    tables TEXT NOT NULL,
    "references" TEXT NOT NULL,
    page_count INTEGER NOT NULL,
    word_count INTEGER NOT NULL,
    quality_score REAL NOT NULL,
    quality_grade TEXT NOT NULL,
    pdf_sha256 TEXT NOT NULL,
    PRIMARY KEY (dataset_id, publication_id)
);

CREATE TABLE IF NOT EXISTS pipeline_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset_id TEXT NOT NULL,
    publication_id INTEGER,
    stage TEXT NOT NULL,
    event_type TEXT NOT NULL,
    message TEXT NOT NULL,
    duration_ms INTEGER,
    error_detail TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pipeline_events_dataset ON pipeline_events(dataset_id);

CREATE TABLE IF NOT EXISTS source_metrics (
    source TEXT PRIMARY KEY,
    total_requests INTEGER NOT NULL DEFAULT 0,
    successful_requests INTEGER NOT NULL DEFAULT 0,
    failed_requests INTEGER NOT NULL DEFAULT 0,
    total_response_time_secs REAL NOT NULL DEFAULT 0.0,
    total_papers_returned INTEGER NOT NULL DEFAULT 0,
    unique_papers_after_dedup INTEGER NOT NULL DEFAULT 0,
    batch_capable INTEGER NOT NULL DEFAULT 0
);
"#;
