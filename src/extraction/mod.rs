//! P4 — content extraction: pull text/structure out of a downloaded PDF via
//! `lopdf`, detect sections/tables/references with lexicon heuristics, and
//! score the result deterministically. Grounded on the
//! `pdf_parser::parse_pdf_sections` heading-lexicon pattern from the
//! ferrumyx-ingestion example (section markers, next-marker windowing),
//! adapted to this crate's `ContentExtraction` row shape and quality
//! scoring (spec.md §4.8).

use crate::config::ExtractionWeights;
use crate::model::ContentExtraction;
use std::path::Path;

const SECTION_MARKERS: &[&str] = &[
    "abstract",
    "introduction",
    "methods",
    "materials and methods",
    "results",
    "discussion",
    "conclusion",
    "references",
];

#[derive(Debug, Clone)]
pub struct ExtractedSection {
    pub heading: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub full_text: String,
    pub page_count: i32,
    /// Pages `lopdf` could not extract text from (encrypted stream, broken
    /// content operators). Feeds the parse-error-rate quality signal.
    pub pages_failed: i32,
    pub sections: Vec<ExtractedSection>,
    pub tables: Vec<String>,
    pub references: Vec<String>,
}

/// Parse raw PDF bytes synchronously. Intended to run inside
/// `tokio::task::spawn_blocking`, wrapped in `std::panic::catch_unwind` by
/// the caller — `lopdf` can panic on malformed input.
pub fn parse_pdf(bytes: &[u8]) -> Result<ExtractedDocument, String> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;

    let mut full_text = String::new();
    let mut page_count = 0i32;
    let mut pages_failed = 0i32;
    for (page_num, _) in document.get_pages() {
        page_count += 1;
        match document.extract_text(&[page_num]) {
            Ok(text) => {
                full_text.push_str(&text);
                full_text.push('\n');
            }
            Err(_) => pages_failed += 1,
        }
    }

    let sections = detect_sections(&full_text);
    let tables = detect_tables(&full_text);
    let references = split_references(&full_text, &sections);

    Ok(ExtractedDocument {
        full_text,
        page_count,
        pages_failed,
        sections,
        tables,
        references,
    })
}

/// Find each section marker's position, slicing text up to the next marker.
fn detect_sections(text: &str) -> Vec<ExtractedSection> {
    let lower = text.to_lowercase();
    let mut hits: Vec<(usize, &str)> = SECTION_MARKERS
        .iter()
        .filter_map(|marker| lower.find(marker).map(|pos| (pos, *marker)))
        .collect();
    hits.sort_by_key(|(pos, _)| *pos);

    let mut sections = Vec::new();
    for (i, (pos, marker)) in hits.iter().enumerate() {
        let end = hits.get(i + 1).map(|(next_pos, _)| *next_pos).unwrap_or(text.len());
        if *pos < text.len() && end <= text.len() && end > *pos {
            sections.push(ExtractedSection {
                heading: marker.to_string(),
                text: text[*pos..end].trim().to_string(),
            });
        }
    }
    if sections.is_empty() && !text.trim().is_empty() {
        sections.push(ExtractedSection {
            heading: "other".to_string(),
            text: text.trim().to_string(),
        });
    }
    sections
}

/// Light table detector: lines with multiple tab/multi-space-aligned columns.
fn detect_tables(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| {
            let columns = line.split('\t').count();
            columns >= 3 || line.matches("  ").count() >= 3
        })
        .map(|line| line.to_string())
        .collect()
}

fn split_references(text: &str, sections: &[ExtractedSection]) -> Vec<String> {
    let references_section = sections.iter().find(|s| s.heading == "references");
    let block = match references_section {
        Some(section) => &section.text,
        None => return Vec::new(),
    };

    block
        .lines()
        .skip(1)
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect()
}

/// Below this many characters per page the document reads as mostly
/// un-extracted (scans, figures); above it the page is implausibly dense
/// for a single-column research paper.
const CHARS_PER_PAGE_BAND: (f64, f64) = (1200.0, 6000.0);

/// Deterministic quality scoring per spec.md §4.8: a weighted sum of four
/// signals, each normalized to `[0, 1]`.
///
/// (a) `section_coverage` — fraction of the section lexicon detected.
/// (b) `char_density` — extracted character count per page against
///     [`CHARS_PER_PAGE_BAND`], scored 1.0 inside the band and falling off
///     linearly outside it.
/// (c) `reference_presence` — binary: did we find at least one reference.
/// (d) `parse_reliability` — `1 - (pages_failed / page_count)`.
pub fn score_quality(document: &ExtractedDocument, weights: &ExtractionWeights) -> f64 {
    let section_coverage = (document.sections.len() as f64 / SECTION_MARKERS.len() as f64).min(1.0);

    let char_density = if document.page_count > 0 {
        let chars_per_page = document.full_text.chars().count() as f64 / f64::from(document.page_count);
        band_score(chars_per_page, CHARS_PER_PAGE_BAND.0, CHARS_PER_PAGE_BAND.1)
    } else {
        0.0
    };

    let reference_presence = if document.references.is_empty() { 0.0 } else { 1.0 };

    let parse_reliability = if document.page_count > 0 {
        1.0 - (f64::from(document.pages_failed) / f64::from(document.page_count))
    } else {
        0.0
    };

    (section_coverage * weights.section_coverage
        + char_density * weights.char_density
        + reference_presence * weights.reference_presence
        + parse_reliability * weights.parse_reliability)
        .clamp(0.0, 1.0)
}

/// 1.0 inside `[low, high]`, decaying toward 0 the further outside it `value` lands.
fn band_score(value: f64, low: f64, high: f64) -> f64 {
    if value >= low && value <= high {
        1.0
    } else if value < low {
        if low <= 0.0 {
            0.0
        } else {
            (value / low).clamp(0.0, 1.0)
        }
    } else {
        (high / value).clamp(0.0, 1.0)
    }
}

pub fn quality_grade(score: f64) -> &'static str {
    if score >= 0.85 {
        "A"
    } else if score >= 0.70 {
        "B"
    } else if score >= 0.55 {
        "C"
    } else if score >= 0.40 {
        "D"
    } else {
        "F"
    }
}

/// Run extraction for one PDF, on `spawn_blocking`, catching parser panics
/// and turning them into a failed (quality 0.0) result rather than
/// propagating the panic (spec.md §7).
pub async fn extract_for_publication(
    dataset_id: String,
    publication_id: i64,
    pdf_path: std::path::PathBuf,
    weights: ExtractionWeights,
) -> ContentExtraction {
    let outcome = tokio::task::spawn_blocking(move || {
        let bytes = match std::fs::read(&pdf_path) {
            Ok(b) => b,
            Err(e) => return Err(e.to_string()),
        };
        let pdf_sha256 = crate::ids::sha256_hex(&bytes);
        let parse_result = std::panic::catch_unwind(|| parse_pdf(&bytes));
        match parse_result {
            Ok(Ok(document)) => Ok((document, pdf_sha256)),
            Ok(Err(e)) => Err(e),
            Err(_panic) => Err("pdf parser panicked".to_string()),
        }
    })
    .await;

    match outcome {
        Ok(Ok((document, pdf_sha256))) => {
            let score = score_quality(&document, &weights);
            ContentExtraction {
                dataset_id,
                publication_id,
                sections: sections_to_json(&document.sections),
                tables: serde_json::Value::Array(
                    document.tables.iter().map(|t| serde_json::Value::String(t.clone())).collect(),
                ),
                references: serde_json::Value::Array(
                    document.references.iter().map(|r| serde_json::Value::String(r.clone())).collect(),
                ),
                page_count: document.page_count,
                word_count: document.full_text.split_whitespace().count() as i32,
                quality_score: score,
                quality_grade: quality_grade(score).to_string(),
                pdf_sha256,
            }
        }
        Ok(Err(reason)) => extraction_failed(dataset_id, publication_id, reason),
        Err(join_err) => extraction_failed(dataset_id, publication_id, join_err.to_string()),
    }
}

fn sections_to_json(sections: &[ExtractedSection]) -> serde_json::Value {
    serde_json::Value::Array(
        sections
            .iter()
            .map(|s| {
                serde_json::json!({
                    "heading": s.heading,
                    "text": s.text,
                })
            })
            .collect(),
    )
}

fn extraction_failed(dataset_id: String, publication_id: i64, reason: String) -> ContentExtraction {
    ContentExtraction {
        dataset_id,
        publication_id,
        sections: serde_json::Value::Array(Vec::new()),
        tables: serde_json::Value::Array(Vec::new()),
        references: serde_json::Value::Array(Vec::new()),
        page_count: 0,
        word_count: 0,
        quality_score: 0.0,
        quality_grade: "F".to_string(),
        pdf_sha256: format!("extraction_failed:{reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> ExtractionWeights {
        ExtractionWeights::default()
    }

    #[test]
    fn detects_known_sections_in_order() {
        let text = "Abstract\nThis is the abstract.\nIntroduction\nBackground text.\nReferences\n1. A paper.";
        let sections = detect_sections(text);
        let headings: Vec<&str> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert_eq!(headings, vec!["abstract", "introduction", "references"]);
    }

    #[test]
    fn references_split_skips_heading_line() {
        let text = "References\n1. First paper.\n2. Second paper.";
        let sections = detect_sections(text);
        let refs = split_references(text, &sections);
        assert_eq!(refs, vec!["1. First paper.".to_string(), "2. Second paper.".to_string()]);
    }

    #[test]
    fn quality_grade_boundaries() {
        assert_eq!(quality_grade(0.9), "A");
        assert_eq!(quality_grade(0.7), "B");
        assert_eq!(quality_grade(0.55), "C");
        assert_eq!(quality_grade(0.4), "D");
        assert_eq!(quality_grade(0.1), "F");
    }

    #[test]
    fn score_is_bounded() {
        let document = ExtractedDocument {
            full_text: "word ".repeat(5000),
            page_count: 10,
            pages_failed: 0,
            sections: SECTION_MARKERS
                .iter()
                .map(|m| ExtractedSection { heading: m.to_string(), text: String::new() })
                .collect(),
            tables: vec!["a\tb\tc".to_string()],
            references: (0..30).map(|i| format!("ref {i}")).collect(),
        };
        let score = score_quality(&document, &weights());
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(quality_grade(score), "A");
    }

    #[test]
    fn failed_pages_lower_parse_reliability() {
        let clean = ExtractedDocument {
            full_text: "word ".repeat(3000),
            page_count: 10,
            pages_failed: 0,
            sections: vec![ExtractedSection { heading: "abstract".to_string(), text: String::new() }],
            tables: vec![],
            references: vec!["1. A paper.".to_string()],
        };
        let mut damaged = clean.clone();
        damaged.pages_failed = 8;
        assert!(score_quality(&damaged, &weights()) < score_quality(&clean, &weights()));
    }

    #[test]
    fn reference_presence_is_binary_not_count_scaled() {
        let base = ExtractedDocument {
            full_text: "word ".repeat(3000),
            page_count: 10,
            pages_failed: 0,
            sections: vec![],
            tables: vec![],
            references: vec!["1. A paper.".to_string()],
        };
        let mut many_refs = base.clone();
        many_refs.references = (0..50).map(|i| format!("ref {i}")).collect();
        assert!((score_quality(&base, &weights()) - score_quality(&many_refs, &weights())).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_file_produces_failed_extraction_not_a_panic() {
        let extraction = extract_for_publication(
            "GSE1".to_string(),
            1,
            std::path::PathBuf::from("/nonexistent/path.pdf"),
            weights(),
        )
        .await;
        assert_eq!(extraction.quality_score, 0.0);
        assert_eq!(extraction.quality_grade, "F");
    }
}
