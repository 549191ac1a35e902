//! Performance benchmarks for structured output parsing

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use simdrive::generation::{FieldKind, RawPayload, SchemaAdapter, SchemaDescriptor};
use std::hint::black_box;
use std::time::Duration;

fn action_schema() -> SchemaDescriptor {
    SchemaDescriptor::new("next_action")
        .field("action", FieldKind::String)
        .field("location", FieldKind::String)
}

fn wide_schema(fields: usize) -> SchemaDescriptor {
    (0..fields).fold(SchemaDescriptor::new("wide"), |schema, i| {
        let kind = match i % 4 {
            0 => FieldKind::String,
            1 => FieldKind::Integer,
            2 => FieldKind::Float,
            _ => FieldKind::Boolean,
        };
        schema.field(format!("field_{}", i), kind)
    })
}

fn wide_payload(fields: usize) -> String {
    let body: Vec<String> = (0..fields)
        .map(|i| match i % 4 {
            0 => format!("\"field_{}\": \"value {}\"", i, i),
            1 => format!("\"field_{}\": \"{}\"", i, i),
            2 => format!("\"field_{}\": {}.5", i, i),
            _ => format!("\"field_{}\": \"true\"", i),
        })
        .collect();
    format!("{{{}}}", body.join(", "))
}

fn bench_action_payloads(c: &mut Criterion) {
    let schema = action_schema();
    let clean = RawPayload::Text(r#"{"action": "reading", "location": "library"}"#.to_string());
    let chatty = RawPayload::Text(
        "Sure! Here is the next action for Klaus:\n```json\n{\"action\": \"reading\", \"location\": \"library\"}\n```\nLet me know if you need anything else."
            .to_string(),
    );
    let structured = RawPayload::Structured(serde_json::json!({
        "action": "reading",
        "location": "library",
    }));

    c.benchmark_group("schema_action")
        .warm_up_time(Duration::from_secs(1))
        .measurement_time(Duration::from_secs(3))
        .bench_function("clean_text", |b| {
            b.iter(|| black_box(SchemaAdapter::parse(&schema, black_box(&clean))))
        })
        .bench_function("wrapped_text", |b| {
            b.iter(|| black_box(SchemaAdapter::parse(&schema, black_box(&chatty))))
        })
        .bench_function("structured", |b| {
            b.iter(|| black_box(SchemaAdapter::parse(&schema, black_box(&structured))))
        });
}

fn bench_wide_schemas(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_width");
    for fields in [4, 16, 64] {
        let schema = wide_schema(fields);
        let payload = RawPayload::Text(wide_payload(fields));
        group.bench_with_input(BenchmarkId::from_parameter(fields), &fields, |b, _| {
            b.iter(|| black_box(SchemaAdapter::parse(&schema, black_box(&payload))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_action_payloads, bench_wide_schemas);
criterion_main!(benches);
