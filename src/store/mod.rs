//! Unified store (L4): one SQLite file, a transactional writer API, and the
//! aggregate-view reader. Grounded on the runtime-checked `sqlx::query`/
//! `query_as` style (never the compile-time `query!` macros, since no live
//! database is available to check against while building this crate).

pub mod schema;

use crate::model::{
    AttemptStatus, ContentExtraction, Dataset, DownloadAttempt, PipelineEvent, Publication,
    Relationship, SourceMetric, UrlDescriptor,
};
use crate::{Error, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await?;
        sqlx::query(schema::SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Transaction<'_>> {
        let tx = self.pool.begin().await?;
        Ok(Transaction { tx })
    }

    /// The aggregate-view reader (§4.3 `get_complete_geo_data`). Returns
    /// `Ok(None)` when the dataset has never been upserted.
    pub async fn get_complete_view(&self, dataset_id: &str) -> Result<Option<AggregateView>> {
        let Some(dataset_row) = sqlx::query(
            "SELECT dataset_id, title, organism, platform, sample_count, submission_date, \
             publication_count, pdfs_acquired, pdfs_extracted, status, provider_raw \
             FROM datasets WHERE dataset_id = ?1",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let dataset = dataset_from_row(&dataset_row)?;

        let pub_rows = sqlx::query(
            "SELECT p.id, p.pmid, p.doi, p.pmc, p.arxiv, p.title, p.authors, p.journal, p.year, \
             p.provider_raw, p.urls, dp.relationship \
             FROM publications p JOIN dataset_publications dp ON dp.publication_id = p.id \
             WHERE dp.dataset_id = ?1 ORDER BY dp.publication_index ASC",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;

        let mut original = Vec::new();
        let mut citing = Vec::new();
        let mut per_publication = std::collections::HashMap::new();

        for row in &pub_rows {
            let publication = publication_from_row(row)?;
            let relationship: String = row.try_get("relationship")?;
            let publication_id = publication.id.expect("persisted publication has an id");

            let downloads = self.downloads_for_publication(publication_id).await?;
            let extraction = self.extraction_for(dataset_id, publication_id).await?;

            per_publication.insert(
                publication_id,
                PerPublicationView {
                    urls: publication.urls.clone(),
                    downloads,
                    extraction,
                },
            );

            match Relationship::from_str(&relationship) {
                Some(Relationship::Original) => original.push(publication),
                _ => citing.push(publication),
            }
        }

        Ok(Some(AggregateView {
            dataset,
            original,
            citing,
            per_publication,
        }))
    }

    async fn downloads_for_publication(&self, publication_id: i64) -> Result<Vec<DownloadAttempt>> {
        let rows = sqlx::query(
            "SELECT id, publication_id, url, source, status, file_path, file_size, \
             error_message, attempt_number, created_at FROM download_attempts \
             WHERE publication_id = ?1 ORDER BY attempt_number ASC",
        )
        .bind(publication_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(download_attempt_from_row).collect()
    }

    async fn extraction_for(
        &self,
        dataset_id: &str,
        publication_id: i64,
    ) -> Result<Option<ContentExtraction>> {
        let row = sqlx::query(
            "SELECT dataset_id, publication_id, sections, tables, \"references\", page_count, \
             word_count, quality_score, quality_grade, pdf_sha256 FROM content_extractions \
             WHERE dataset_id = ?1 AND publication_id = ?2",
        )
        .bind(dataset_id)
        .bind(publication_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(content_extraction_from_row).transpose()
    }

    pub async fn get_source_metric(&self, source: &str) -> Result<SourceMetric> {
        let row = sqlx::query(
            "SELECT source, total_requests, successful_requests, failed_requests, \
             total_response_time_secs, total_papers_returned, unique_papers_after_dedup, \
             batch_capable FROM source_metrics WHERE source = ?1",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => source_metric_from_row(&row)?,
            None => SourceMetric {
                source: source.to_string(),
                ..Default::default()
            },
        })
    }

    /// Existing extraction for `(dataset_id, publication_id)`, if P4 has
    /// already run for it — backs the coordinator's restart skip-gate
    /// (spec §4.9: skip P4 only when one exists with a matching PDF SHA-256).
    pub async fn get_extraction(
        &self,
        dataset_id: &str,
        publication_id: i64,
    ) -> Result<Option<ContentExtraction>> {
        self.extraction_for(dataset_id, publication_id).await
    }

    pub async fn most_recent_successful_attempt(
        &self,
        publication_id: i64,
    ) -> Result<Option<DownloadAttempt>> {
        let row = sqlx::query(
            "SELECT id, publication_id, url, source, status, file_path, file_size, \
             error_message, attempt_number, created_at FROM download_attempts \
             WHERE publication_id = ?1 AND status = 'success' ORDER BY id DESC LIMIT 1",
        )
        .bind(publication_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(download_attempt_from_row).transpose()
    }
}

/// Complete subtree for one dataset, matching the wire shape in spec §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AggregateView {
    pub dataset: Dataset,
    pub original: Vec<Publication>,
    pub citing: Vec<Publication>,
    pub per_publication: std::collections::HashMap<i64, PerPublicationView>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PerPublicationView {
    pub urls: Vec<UrlDescriptor>,
    pub downloads: Vec<DownloadAttempt>,
    pub extraction: Option<ContentExtraction>,
}

/// Coordinator-facing transactional writer (§4.3). The coordinator is the
/// sole writer; every mutation the pipeline performs goes through one of
/// these operations inside a single `begin..commit` span.
pub struct Transaction<'c> {
    tx: sqlx::Transaction<'c, sqlx::Sqlite>,
}

impl<'c> Transaction<'c> {
    pub async fn upsert_dataset(&mut self, dataset: &Dataset) -> Result<()> {
        sqlx::query(
            "INSERT INTO datasets (dataset_id, title, organism, platform, sample_count, \
             submission_date, status, provider_raw) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(dataset_id) DO UPDATE SET \
             title = excluded.title, organism = excluded.organism, platform = excluded.platform, \
             sample_count = excluded.sample_count, submission_date = excluded.submission_date, \
             provider_raw = excluded.provider_raw",
        )
        .bind(&dataset.dataset_id)
        .bind(&dataset.title)
        .bind(&dataset.organism)
        .bind(&dataset.platform)
        .bind(dataset.sample_count)
        .bind(&dataset.submission_date)
        .bind(&dataset.status)
        .bind(dataset.provider_raw.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Upsert a publication, matching on PMID when present, else inserting a
    /// new row. Returns the persisted row's surrogate key.
    pub async fn upsert_publication(&mut self, publication: &Publication) -> Result<i64> {
        if let Some(pmid) = &publication.pmid {
            if let Some(existing) = sqlx::query("SELECT id FROM publications WHERE pmid = ?1")
                .bind(pmid)
                .fetch_optional(&mut *self.tx)
                .await?
            {
                let id: i64 = existing.try_get("id")?;
                self.merge_publication_fields(id, publication).await?;
                return Ok(id);
            }
        } else if let Some(doi) = &publication.doi {
            if let Some(existing) = sqlx::query("SELECT id FROM publications WHERE doi = ?1")
                .bind(doi)
                .fetch_optional(&mut *self.tx)
                .await?
            {
                let id: i64 = existing.try_get("id")?;
                self.merge_publication_fields(id, publication).await?;
                return Ok(id);
            }
        }

        let row = sqlx::query(
            "INSERT INTO publications (pmid, doi, pmc, arxiv, title, authors, journal, year, \
             provider_raw, urls) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) RETURNING id",
        )
        .bind(&publication.pmid)
        .bind(&publication.doi)
        .bind(&publication.pmc)
        .bind(&publication.arxiv)
        .bind(&publication.title)
        .bind(serde_json::to_string(&publication.authors)?)
        .bind(&publication.journal)
        .bind(publication.year)
        .bind(publication.provider_raw.to_string())
        .bind(serde_json::to_string(&publication.urls)?)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Fill in identifiers/fields a richer source has now supplied, without
    /// discarding what's already there.
    async fn merge_publication_fields(&mut self, id: i64, incoming: &Publication) -> Result<()> {
        sqlx::query(
            "UPDATE publications SET \
             doi = COALESCE(doi, ?2), pmc = COALESCE(pmc, ?3), arxiv = COALESCE(arxiv, ?4), \
             title = COALESCE(title, ?5), journal = COALESCE(journal, ?6), year = COALESCE(year, ?7) \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(&incoming.doi)
        .bind(&incoming.pmc)
        .bind(&incoming.arxiv)
        .bind(&incoming.title)
        .bind(&incoming.journal)
        .bind(incoming.year)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn link(
        &mut self,
        dataset_id: &str,
        publication_id: i64,
        relationship: Relationship,
        strategy: Option<&str>,
        publication_index: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO dataset_publications (dataset_id, publication_id, relationship, \
             strategy, publication_index) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(dataset_id, publication_id) DO NOTHING",
        )
        .bind(dataset_id)
        .bind(publication_id)
        .bind(relationship.as_str())
        .bind(strategy)
        .bind(publication_index)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Merge `new_urls` into the publication's URL list: dedup by url,
    /// priority set to min(old, new), shape upgraded from `unknown` (§4.3).
    pub async fn append_url_list(&mut self, publication_id: i64, new_urls: &[UrlDescriptor]) -> Result<()> {
        let row = sqlx::query("SELECT urls FROM publications WHERE id = ?1")
            .bind(publication_id)
            .fetch_one(&mut *self.tx)
            .await?;
        let existing_json: String = row.try_get("urls")?;
        let mut existing: Vec<UrlDescriptor> = serde_json::from_str(&existing_json)?;

        for incoming in new_urls {
            if let Some(slot) = existing.iter_mut().find(|u| u.url == incoming.url) {
                slot.priority = slot.priority.min(incoming.priority);
                if slot.shape == crate::ids::UrlShape::Unknown {
                    slot.shape = incoming.shape;
                }
            } else {
                existing.push(incoming.clone());
            }
        }
        existing.sort_by_key(|u| u.priority);
        existing.truncate(64);

        sqlx::query("UPDATE publications SET urls = ?2 WHERE id = ?1")
            .bind(publication_id)
            .bind(serde_json::to_string(&existing)?)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Append a `DownloadAttempt` row, computing the next `attempt_number`
    /// for this (publication, url) pair.
    pub async fn append_download_attempt(
        &mut self,
        publication_id: i64,
        url: &str,
        source: &str,
        status: AttemptStatus,
        file_path: Option<&str>,
        file_size: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(attempt_number), 0) as n FROM download_attempts \
             WHERE publication_id = ?1 AND url = ?2",
        )
        .bind(publication_id)
        .bind(url)
        .fetch_one(&mut *self.tx)
        .await?;
        let attempt_number: i64 = row.try_get("n")?;

        sqlx::query(
            "INSERT INTO download_attempts (publication_id, url, source, status, file_path, \
             file_size, error_message, attempt_number, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(publication_id)
        .bind(url)
        .bind(source)
        .bind(status.as_str())
        .bind(file_path)
        .bind(file_size)
        .bind(error_message)
        .bind(attempt_number + 1)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn put_extraction(&mut self, extraction: &ContentExtraction) -> Result<()> {
        sqlx::query(
            "INSERT INTO content_extractions (dataset_id, publication_id, sections, tables, \
             \"references\", page_count, word_count, quality_score, quality_grade, pdf_sha256) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(dataset_id, publication_id) DO UPDATE SET \
             sections = excluded.sections, tables = excluded.tables, \
             \"references\" = excluded.\"references\", page_count = excluded.page_count, \
             word_count = excluded.word_count, quality_score = excluded.quality_score, \
             quality_grade = excluded.quality_grade, pdf_sha256 = excluded.pdf_sha256",
        )
        .bind(&extraction.dataset_id)
        .bind(extraction.publication_id)
        .bind(extraction.sections.to_string())
        .bind(extraction.tables.to_string())
        .bind(extraction.references.to_string())
        .bind(extraction.page_count)
        .bind(extraction.word_count)
        .bind(extraction.quality_score)
        .bind(&extraction.quality_grade)
        .bind(&extraction.pdf_sha256)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn append_event(&mut self, event: &PipelineEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO pipeline_events (dataset_id, publication_id, stage, event_type, \
             message, duration_ms, error_detail, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&event.dataset_id)
        .bind(event.publication_id)
        .bind(&event.stage)
        .bind(&event.event_type)
        .bind(&event.message)
        .bind(event.duration_ms)
        .bind(&event.error_detail)
        .bind(&event.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Recompute `datasets.{publication_count,pdfs_acquired,pdfs_extracted}`
    /// from the underlying rows (§3 invariant (e): counters are a
    /// materialized cache, recomputable from truth).
    pub async fn bump_counters(&mut self, dataset_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE datasets SET \
             publication_count = (SELECT COUNT(*) FROM dataset_publications WHERE dataset_id = ?1), \
             pdfs_acquired = (SELECT COUNT(DISTINCT da.publication_id) FROM download_attempts da \
                JOIN dataset_publications dp ON dp.publication_id = da.publication_id \
                WHERE dp.dataset_id = ?1 AND da.status = 'success'), \
             pdfs_extracted = (SELECT COUNT(*) FROM content_extractions WHERE dataset_id = ?1) \
             WHERE dataset_id = ?1",
        )
        .bind(dataset_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn upsert_source_metric(
        &mut self,
        source: &str,
        success: bool,
        elapsed_secs: f64,
        papers_returned: i64,
        unique_papers: i64,
        batch_capable: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO source_metrics (source, total_requests, successful_requests, \
             failed_requests, total_response_time_secs, total_papers_returned, \
             unique_papers_after_dedup, batch_capable) VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(source) DO UPDATE SET \
             total_requests = total_requests + 1, \
             successful_requests = successful_requests + ?2, \
             failed_requests = failed_requests + ?3, \
             total_response_time_secs = total_response_time_secs + ?4, \
             total_papers_returned = total_papers_returned + ?5, \
             unique_papers_after_dedup = unique_papers_after_dedup + ?6",
        )
        .bind(source)
        .bind(i64::from(success))
        .bind(i64::from(!success))
        .bind(elapsed_secs)
        .bind(papers_returned)
        .bind(unique_papers)
        .bind(batch_capable)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn dataset_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Dataset> {
    let provider_raw: String = row.try_get("provider_raw")?;
    Ok(Dataset {
        dataset_id: row.try_get("dataset_id")?,
        title: row.try_get("title")?,
        organism: row.try_get("organism")?,
        platform: row.try_get("platform")?,
        sample_count: row.try_get("sample_count")?,
        submission_date: row.try_get("submission_date")?,
        publication_count: row.try_get("publication_count")?,
        pdfs_acquired: row.try_get("pdfs_acquired")?,
        pdfs_extracted: row.try_get("pdfs_extracted")?,
        status: row.try_get("status")?,
        provider_raw: serde_json::from_str(&provider_raw).unwrap_or(serde_json::Value::Null),
    })
}

fn publication_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Publication> {
    let authors_json: String = row.try_get("authors")?;
    let provider_raw: String = row.try_get("provider_raw")?;
    let urls_json: String = row.try_get("urls")?;
    Ok(Publication {
        id: Some(row.try_get("id")?),
        pmid: row.try_get("pmid")?,
        doi: row.try_get("doi")?,
        pmc: row.try_get("pmc")?,
        arxiv: row.try_get("arxiv")?,
        title: row.try_get("title")?,
        authors: serde_json::from_str(&authors_json).unwrap_or_default(),
        journal: row.try_get("journal")?,
        year: row.try_get("year")?,
        provider_raw: serde_json::from_str(&provider_raw).unwrap_or(serde_json::Value::Null),
        urls: serde_json::from_str(&urls_json).unwrap_or_default(),
    })
}

fn download_attempt_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DownloadAttempt> {
    let status: String = row.try_get("status")?;
    Ok(DownloadAttempt {
        id: Some(row.try_get("id")?),
        publication_id: row.try_get("publication_id")?,
        url: row.try_get("url")?,
        source: row.try_get("source")?,
        status: AttemptStatus::from_str(&status).ok_or_else(|| Error::Invariant(format!("unknown attempt status {status}")))?,
        file_path: row.try_get("file_path")?,
        file_size: row.try_get("file_size")?,
        error_message: row.try_get("error_message")?,
        attempt_number: row.try_get("attempt_number")?,
        created_at: row.try_get("created_at")?,
    })
}

fn content_extraction_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ContentExtraction> {
    let sections: String = row.try_get("sections")?;
    let tables: String = row.try_get("tables")?;
    let references: String = row.try_get("references")?;
    Ok(ContentExtraction {
        dataset_id: row.try_get("dataset_id")?,
        publication_id: row.try_get("publication_id")?,
        sections: serde_json::from_str(&sections).unwrap_or(serde_json::Value::Null),
        tables: serde_json::from_str(&tables).unwrap_or(serde_json::Value::Null),
        references: serde_json::from_str(&references).unwrap_or(serde_json::Value::Null),
        page_count: row.try_get("page_count")?,
        word_count: row.try_get("word_count")?,
        quality_score: row.try_get("quality_score")?,
        quality_grade: row.try_get("quality_grade")?,
        pdf_sha256: row.try_get("pdf_sha256")?,
    })
}

fn source_metric_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SourceMetric> {
    Ok(SourceMetric {
        source: row.try_get("source")?,
        total_requests: row.try_get("total_requests")?,
        successful_requests: row.try_get("successful_requests")?,
        failed_requests: row.try_get("failed_requests")?,
        total_response_time_secs: row.try_get("total_response_time_secs")?,
        total_papers_returned: row.try_get("total_papers_returned")?,
        unique_papers_after_dedup: row.try_get("unique_papers_after_dedup")?,
        batch_capable: row.try_get::<i64, _>("batch_capable")? != 0,
    })
}
