//! Benchmarks for the DOCX layout pipeline.
//!
//! Run with: cargo bench --package gdoc-fixer-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gdoc_fixer_core::images::{extract_and_replace_with_placeholders, restore_placeholders};
use gdoc_fixer_core::sanitize::sanitize_for_docx;
use gdoc_fixer_core::{InlineStyleSource, TranspileConfig, Transpiler};
use std::time::Duration;

fn sample_document(sections: usize) -> String {
    let mut body = String::new();
    for i in 0..sections {
        body.push_str(&format!(
            r#"<div style="display:flex;gap:16px;width:640px;border:1px solid #ccc">
                <div style="width:200px"><img src="data:image/png;base64,iVBORw0KGgo{i}"></div>
                <div style="flex-grow:1"><h2>Section {i}</h2><p>Body text for section {i}.</p></div>
            </div>
            <div style="display:grid;grid-template-columns:repeat(3, 1fr);gap:8px;width:640px">
                <div>one</div><div>two</div><div>three</div><div>four</div>
            </div>"#
        ));
    }
    format!("<html><body>{body}</body></html>")
}

fn benchmark_transpile(c: &mut Criterion) {
    let transpiler = Transpiler::new(TranspileConfig::default());
    let source = InlineStyleSource::new();

    let mut group = c.benchmark_group("transpile");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for sections in [1, 10, 50] {
        let html = sample_document(sections);
        group.bench_with_input(BenchmarkId::from_parameter(sections), &html, |b, html| {
            b.iter(|| {
                let (shielded, map) = extract_and_replace_with_placeholders(black_box(html));
                let transpiled = transpiler.transpile_html(&shielded, &source).unwrap();
                let sanitized = sanitize_for_docx(&transpiled, 640);
                black_box(restore_placeholders(&sanitized, &map))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_transpile);
criterion_main!(benches);
