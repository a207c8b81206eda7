//! Normalization hot-path benchmarks: provider detection, content
//! redaction and stream reassembly.
//!
//! ```bash
//! cargo bench --bench normalize_bench
//! ```

use std::hint::black_box;
use std::time::Duration;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use oisp_normalize::fingerprint::{detect_request, Headers};
use oisp_normalize::registry::RegistrySnapshot;
use oisp_normalize::security::{redact, RedactionPolicy};
use oisp_normalize::streaming::StreamManager;

fn bench_detection(c: &mut Criterion) {
    let registry = RegistrySnapshot::builtin().expect("builtin registry");
    let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
    let mut headers = Headers::new();
    headers.insert("x-api-key", "sk-ant-xxxxxxxx");

    let cases = [
        ("exact_domain", "api.openai.com", "/v1/chat/completions"),
        ("wildcard_domain", "contoso.openai.azure.com", "/openai/deployments/gpt-4o/chat/completions"),
        ("path_model", "generativelanguage.googleapis.com", "/v1beta/models/gemini-1.5-pro:generateContent"),
        ("unknown_host", "llm-gateway.corp.example", "/v1/messages"),
    ];

    let mut group = c.benchmark_group("detect");
    for (name, host, path) in cases {
        group.bench_function(name, |b| {
            b.iter(|| {
                detect_request(
                    &registry,
                    black_box(host),
                    black_box(path),
                    "POST",
                    &headers,
                    Some(&body),
                )
            })
        });
    }
    group.finish();
}

fn bench_redaction(c: &mut Criterion) {
    let clean = "Summarize the quarterly report in three short paragraphs. ".repeat(40);
    let with_pii = format!(
        "{} Contact jane.doe@example.com or 555-867-5309, key sk-proj-abcdefghijklmnopqrstuvwx.",
        clean
    );
    let policy = RedactionPolicy::default();
    let preview_policy = RedactionPolicy {
        include_preview: true,
        ..RedactionPolicy::default()
    };

    let mut group = c.benchmark_group("redact");
    for (name, content) in [("clean", &clean), ("pii", &with_pii)] {
        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(BenchmarkId::new("default", name), content, |b, content| {
            b.iter(|| redact(black_box(content), &policy))
        });
        group.bench_with_input(BenchmarkId::new("preview", name), content, |b, content| {
            b.iter(|| redact(black_box(content), &preview_policy))
        });
    }
    group.finish();
}

fn openai_stream(chunks: usize) -> Vec<String> {
    let mut frames: Vec<String> = (0..chunks)
        .map(|i| {
            format!(
                "data: {}\n\n",
                json!({"choices": [{"index": 0, "delta": {"content": format!("tok{} ", i)}}]})
            )
        })
        .collect();
    frames.push(format!(
        "data: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [], "usage": {"prompt_tokens": 120, "completion_tokens": chunks}})
    ));
    frames
}

fn bench_stream_assembly(c: &mut Criterion) {
    let registry = RegistrySnapshot::builtin().expect("builtin registry");
    let rules = registry.provider("openai").map(|p| &p.extraction);
    let manager = StreamManager::new(Duration::from_secs(30));

    let mut group = c.benchmark_group("stream");
    for chunks in [10usize, 100, 500] {
        let frames = openai_stream(chunks);
        group.throughput(Throughput::Elements(chunks as u64));
        group.bench_with_input(BenchmarkId::new("assemble", chunks), &frames, |b, frames| {
            b.iter(|| {
                let now = Utc::now();
                manager.open("bench", Some("openai"), rules, now).expect("open");
                for frame in frames {
                    manager.add_chunk("bench", frame, now).expect("chunk");
                }
                manager.finalize("bench", now).expect("finalize")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_detection, bench_redaction, bench_stream_assembly);
criterion_main!(benches);
