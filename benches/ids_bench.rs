use criterion::{black_box, criterion_group, criterion_main, Criterion};
use genomics_corpus::ids::{classify_url, sha256_hex, universal_id, PublicationId};

fn benchmark_url_classification(c: &mut Criterion) {
    let urls = [
        "https://doi.org/10.1038/s41586-021-03819-2",
        "https://example.org/content/123/pdf/paper.pdf",
        "https://example.org/article/42",
        "https://example.org/unrecognized/thing",
    ];
    c.bench_function("classify_url", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(classify_url(url));
            }
        });
    });
}

fn benchmark_doi_normalization(c: &mut Criterion) {
    c.bench_function("publication_id_doi", |b| {
        b.iter(|| black_box(PublicationId::doi("https://doi.org/10.1038/S41586-021-03819-2")));
    });
}

fn benchmark_content_hash(c: &mut Criterion) {
    let bytes = vec![0u8; 2 * 1024 * 1024];
    c.bench_function("sha256_hex_2mb", |b| {
        b.iter(|| black_box(sha256_hex(&bytes)));
    });
}

fn benchmark_universal_id(c: &mut Criterion) {
    c.bench_function("universal_id", |b| {
        b.iter(|| {
            black_box(universal_id(
                Some("12345678"),
                Some("10.1038/x"),
                None,
                None,
                "abcdef0123456789",
            ))
        });
    });
}

criterion_group!(
    benches,
    benchmark_url_classification,
    benchmark_doi_normalization,
    benchmark_content_hash,
    benchmark_universal_id,
);
criterion_main!(benches);
