//! Benchmarks for the catdoc host.
//!
//! Run with: cargo bench
//!
//! The `real_module` group requires assets/catdoc.wasm and tests/test.doc.
//! The others run against a small inline module.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime as TokioRuntime;

use catdoc_sandbox_rs::prelude::*;
use catdoc_sandbox_rs::{Prepared, Runtime};

/// Echoes `/input_file` for `get_text`, prints a banner for `get_version`.
const ECHO_MODULE: &str = r#"
(module
  (import "wasi_snapshot_preview1" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "fd_read" (func $fd_read (param i32 i32 i32 i32) (result i32)))
  (import "wasi_snapshot_preview1" "path_open"
    (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) ".")
  (data (i32.const 128) "Catdoc Version 0.95\n")

  (func $write (param $ptr i32) (param $len i32)
    (i32.store (i32.const 56) (local.get $ptr))
    (i32.store (i32.const 60) (local.get $len))
    (drop (call $fd_write (i32.const 1) (i32.const 56) (i32.const 1) (i32.const 64))))

  (func (export "get_version")
    (call $write (i32.const 128) (i32.const 20)))

  (func (export "get_text")
    (drop (call $path_open (i32.const 3) (i32.const 0) (i32.const 16) (i32.const 1)
      (i32.const 0) (i64.const 2) (i64.const 0) (i32.const 0) (i32.const 32)))
    (i32.store (i32.const 40) (i32.const 1024))
    (i32.store (i32.const 44) (i32.const 4096))
    (drop (call $fd_read (i32.load (i32.const 32)) (i32.const 40) (i32.const 1) (i32.const 48)))
    (call $write (i32.const 1024) (i32.load (i32.const 48))))
)
"#;

fn echo_config() -> CatdocConfig {
    CatdocConfig::builder()
        .module(ECHO_MODULE)
        .no_charsets_dir()
        .timeout(Duration::from_secs(30))
        .build()
}

fn document(size: usize) -> Cursor<Vec<u8>> {
    Cursor::new(vec![b'a'; size])
}

/// Engine, compilation and linking from scratch.
fn bench_cold_start(c: &mut Criterion) {
    let config = echo_config();

    let mut group = c.benchmark_group("cold_start");
    group.sample_size(10);

    group.bench_function("prepare_runtime", |b| {
        b.iter(|| black_box(Prepared::build(&config).unwrap()));
    });

    group.finish();
}

/// Per-call cost once the runtime is prepared.
fn bench_warm_calls(c: &mut Criterion) {
    let catdoc = Catdoc::new(echo_config()).unwrap();
    catdoc.version().unwrap();

    let mut group = c.benchmark_group("warm_calls");

    group.bench_function("version", |b| {
        b.iter(|| black_box(catdoc.version().unwrap()));
    });

    for size in [64usize, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("text", size), &size, |b, &size| {
            b.iter(|| black_box(catdoc.text(document(size)).unwrap()));
        });
    }

    group.finish();
}

/// Calls through the blocking pool with the epoch ticker running.
fn bench_async_calls(c: &mut Criterion) {
    let rt = TokioRuntime::new().unwrap();
    let catdoc = Catdoc::new(echo_config()).unwrap();
    catdoc.version().unwrap();

    let mut group = c.benchmark_group("async_calls");

    group.bench_function("text_with_timeout", |b| {
        b.iter(|| {
            let input = SingleFileFs::new(document(1024)).unwrap();
            let result = rt.block_on(catdoc.run_async(Operation::Text, Some(input)));
            black_box(result.unwrap())
        });
    });

    group.finish();
}

/// Concurrent calls sharing one runtime.
fn bench_concurrent_calls(c: &mut Criterion) {
    let rt = TokioRuntime::new().unwrap();
    let runtime = Arc::new(Runtime::new(echo_config()));
    runtime.prepared().unwrap();

    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    for concurrency in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("calls", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    rt.block_on(async {
                        let mut handles = Vec::new();

                        for _ in 0..concurrency {
                            let catdoc = Catdoc::from_runtime(Arc::clone(&runtime));
                            handles.push(tokio::spawn(async move {
                                let input = SingleFileFs::new(document(1024)).unwrap();
                                catdoc.run_async(Operation::Text, Some(input)).await.unwrap()
                            }));
                        }

                        for handle in handles {
                            black_box(handle.await.unwrap());
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

/// Extraction from a real document.
fn bench_real_module(c: &mut Criterion) {
    let wasm = std::path::Path::new("assets/catdoc.wasm");
    let doc = std::path::Path::new("tests/test.doc");
    if !wasm.exists() || !doc.exists() {
        eprintln!("Skipping real_module benchmark: catdoc.wasm or test.doc not found");
        return;
    }

    let catdoc = Catdoc::new(
        CatdocConfig::builder()
            .module_path(wasm)
            .charsets_dir("assets/charsets")
            .build(),
    )
    .unwrap();
    let bytes = std::fs::read(doc).unwrap();

    let mut group = c.benchmark_group("real_module");

    group.bench_function("text", |b| {
        b.iter(|| black_box(catdoc.text(Cursor::new(bytes.clone())).unwrap()));
    });

    group.bench_function("title", |b| {
        b.iter(|| black_box(catdoc.title(Cursor::new(bytes.clone())).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cold_start,
    bench_warm_calls,
    bench_async_calls,
    bench_concurrent_calls,
    bench_real_module,
);

criterion_main!(benches);
