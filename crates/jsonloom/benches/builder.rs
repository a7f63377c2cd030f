//! Benchmark – `jsonloom::ValueBuilder`
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use jsonloom::{BuilderOptions, MonotonicResource, StaticResource, Storage, ValueBuilder};

/// Feed the builder an array of `rows` objects, each with a few scalar
/// members and a string that is `string_len` bytes long, delivered in
/// `parts` pieces. Returns the number of top-level elements built.
fn build_rows(builder: &mut ValueBuilder, rows: usize, string_len: usize, parts: usize) -> usize {
    let text = "x".repeat(string_len);
    let chunk = string_len.div_ceil(parts).max(1);

    builder.reset();
    builder.begin_array().unwrap();
    for i in 0..rows {
        builder.begin_object().unwrap();
        builder.insert_key("id").unwrap();
        builder.insert_uint64(i as u64).unwrap();
        builder.insert_key("ok").unwrap();
        builder.insert_bool(i % 2 == 0).unwrap();
        builder.insert_key("score").unwrap();
        builder.insert_double(i as f64 * 0.5).unwrap();
        builder.insert_key("text").unwrap();
        let mut pieces = text.as_bytes().chunks(chunk).peekable();
        while let Some(piece) = pieces.next() {
            if pieces.peek().is_some() {
                builder.insert_string_part(piece).unwrap();
            } else {
                builder.insert_string(piece).unwrap();
            }
        }
        if text.is_empty() {
            builder.insert_string("").unwrap();
        }
        builder.end_object(4).unwrap();
    }
    builder.end_array(rows).unwrap();
    let value = builder.release().unwrap();
    value.as_array().map_or(0, |a| a.len())
}

fn bench_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("ValueBuilder");

    for &rows in &[100usize, 10_000] {
        group.throughput(Throughput::Elements(rows as u64));

        for &(string_len, parts) in &[(8usize, 1usize), (64, 1), (64, 8)] {
            let id = format!("rows{rows}_str{string_len}_parts{parts}");

            group.bench_with_input(BenchmarkId::new("heap", &id), &rows, |b, &rows| {
                let mut builder = ValueBuilder::new(Storage::default());
                b.iter(|| black_box(build_rows(&mut builder, rows, string_len, parts)));
            });

            group.bench_with_input(BenchmarkId::new("arena", &id), &rows, |b, &rows| {
                b.iter(|| {
                    let mr = MonotonicResource::new();
                    // SAFETY: `mr` outlives the builder and the value.
                    let sp = unsafe { Storage::borrowed(&mr) };
                    let mut builder = ValueBuilder::new(sp);
                    black_box(build_rows(&mut builder, rows, string_len, parts))
                });
            });

            group.bench_with_input(BenchmarkId::new("fixed", &id), &rows, |b, &rows| {
                let mut value_buf = vec![0u8; rows * (1024 + 2 * string_len) + 4096];
                let mut stack_buf = vec![0u8; rows * 256 + 64 * 1024];
                b.iter(|| {
                    let values = StaticResource::new(&mut value_buf);
                    let stacks = StaticResource::new(&mut stack_buf);
                    // SAFETY: both resources outlive the builder and the value.
                    let (sp, stack) =
                        unsafe { (Storage::borrowed(&values), Storage::borrowed(&stacks)) };
                    let mut builder =
                        ValueBuilder::with_stack_storage(sp, stack, BuilderOptions::default());
                    black_box(build_rows(&mut builder, rows, string_len, parts))
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_builder);
criterion_main!(benches);
