use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use cloudpipe::diff::diff;
use cloudpipe::infer::{InferenceRules, infer_type};
use cloudpipe::payload::Table;
use cloudpipe::sanitize::{SanitizeRules, sanitize_headers};
use encoding_rs::UTF_8;

fn export_labels(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match i % 4 {
            0 => format!("Field #{i} (Amount $)"),
            1 => format!("Install Date {i}"),
            2 => format!("  \"Owner Name\" {i} "),
            _ => "select".to_string(),
        })
        .collect()
}

fn generate_projects(rows: usize) -> Vec<u8> {
    let mut csv = String::from("Scoop ID,Install Date,Contract Amount,Is Active,Notes\n");
    for i in 0..rows {
        let day = (i % 28) + 1;
        let active = if i % 2 == 0 { "true" } else { "false" };
        csv.push_str(&format!(
            "{i},2024-01-{day:02},{}.{:02},{active},note number {i}\n",
            i * 7,
            i % 100
        ));
    }
    csv.into_bytes()
}

fn bench_sanitize(c: &mut Criterion) {
    let labels = export_labels(400);
    let rules = SanitizeRules::default();
    c.bench_function("sanitize_headers_400", |b| {
        b.iter(|| sanitize_headers(&labels, &rules))
    });
}

fn bench_infer(c: &mut Criterion) {
    let bytes = generate_projects(20_000);
    let sanitize_rules = SanitizeRules::default();
    let rules = InferenceRules::default();
    c.bench_function("infer_20k_rows", |b| {
        b.iter_batched(
            || Table::from_bytes(&bytes, b',', UTF_8).expect("parse csv"),
            |mut table| {
                let identifiers = table.sanitize_headers(&sanitize_rules);
                identifiers
                    .iter()
                    .enumerate()
                    .map(|(idx, id)| infer_type(id, &table.column_values(idx), &rules))
                    .collect::<Vec<_>>()
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_diff(c: &mut Criterion) {
    let rules = SanitizeRules::default();
    let target = sanitize_headers(&export_labels(300), &rules);
    let incoming = sanitize_headers(&export_labels(320)[20..], &rules);
    c.bench_function("diff_300_columns", |b| b.iter(|| diff(&target, &incoming)));
}

criterion_group!(benches, bench_sanitize, bench_infer, bench_diff);
criterion_main!(benches);
