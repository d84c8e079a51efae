use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sysdump::archive::{ArchiveReader, ReportArchiveWriter};
use sysdump::collector::{DryRunCollector, DryRunService};
use sysdump::sections::{parse_bytes, parse_reader};
use std::io::Cursor;

fn sample_text() -> String {
    let services = (0..200)
        .map(|i| DryRunService::new(format!("service{i}"), 250))
        .collect();
    DryRunCollector::default()
        .with_services(services)
        .render_main_text("bench", Utc::now(), |_| {})
}

fn bench_parse(c: &mut Criterion) {
    let text = sample_text();

    c.bench_function("parse_bytes_3mb", |b| b.iter(|| parse_bytes(black_box(text.as_bytes()))));
    c.bench_function("parse_reader_3mb", |b| {
        b.iter(|| parse_reader(Cursor::new(black_box(text.as_bytes()))).unwrap())
    });
}

fn bench_extract_main_text(c: &mut Criterion) {
    let text = sample_text();
    let mut ar = ReportArchiveWriter::new(Cursor::new(Vec::new()));
    ar.add_main_text("bugreport-bench.txt", text.as_bytes()).unwrap();
    let bytes = ar.finish().unwrap().into_inner();

    c.bench_function("extract_and_parse_main_text", |b| {
        b.iter(|| {
            let mut reader = ArchiveReader::from_reader(Cursor::new(black_box(&bytes[..]))).unwrap();
            parse_bytes(&reader.extract_main_text().unwrap())
        })
    });
}

criterion_group!(benches, bench_parse, bench_extract_main_text);
criterion_main!(benches);
