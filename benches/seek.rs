//! Seek and scan benchmarks for cell files.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench seek              # run all benchmarks
//! cargo bench --bench seek -- reseek    # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};

use cellfile::{
    Cell, CellFileReader, CellFileWriter, CellKey, DataBlockEncoding, ReaderConfig, WriterConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Rows in every benchmark file.
const ROWS: u64 = 50_000;

/// Value payload (100 bytes).
const VALUE: &[u8; 100] = &[0xAB; 100];

fn make_row(i: u64) -> String {
    format!("row-{i:012}")
}

/// Builds an in-memory file of `ROWS` single-cell rows.
fn build_file(encoding: DataBlockEncoding, index_block_entries: usize) -> Vec<u8> {
    let mut writer = CellFileWriter::in_memory(WriterConfig {
        encoding,
        block_size: 4 * 1024,
        index_block_entries,
        expected_rows: ROWS as usize,
        ..WriterConfig::default()
    })
    .unwrap();
    for i in 0..ROWS {
        writer
            .append(Cell::put(make_row(i), "f", "q", 1, VALUE.as_slice()))
            .unwrap();
    }
    writer.finish_to_vec().unwrap()
}

fn open(bytes: &[u8], cache_capacity_bytes: usize) -> CellFileReader {
    CellFileReader::open_bytes(
        bytes.to_vec(),
        ReaderConfig {
            cache_capacity_bytes,
            ..ReaderConfig::default()
        },
    )
    .unwrap()
}

fn random_keys(count: usize) -> Vec<CellKey> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count)
        .map(|_| CellKey::first_on_row(make_row(rng.random_range(0..ROWS))))
        .collect()
}

// ================================================================================================
// Seek benchmarks
// ================================================================================================

/// Random `seek_to_row` across encodings.
///
/// **What it measures:** Index descent, block fetch and decode, and the
/// in-block binary search. Without a cache every seek decodes a block, so the
/// encodings differ by their decode cost.
fn bench_seek(c: &mut Criterion) {
    let mut group = c.benchmark_group("seek");
    let keys = random_keys(1024);

    for encoding in DataBlockEncoding::SUPPORTED {
        let bytes = build_file(encoding, 128);
        for (label, cache) in [("uncached", 0), ("cached", 64 << 20)] {
            let reader = open(&bytes, cache);
            let mut scanner = reader.new_scanner();
            let mut i = 0usize;
            group.bench_function(BenchmarkId::new(label, encoding), |b| {
                b.iter(|| {
                    let key = &keys[i % keys.len()];
                    i += 1;
                    black_box(scanner.seek_to_row(black_box(&key.row)).unwrap())
                });
            });
        }
    }

    group.finish();
}

/// Random seeks against one-, two- and three-level indexes.
///
/// **What it measures:** The cost of each extra index level. Lower levels
/// are fetched through the cache, so deeper indexes pay a lookup per level.
fn bench_index_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_depth");
    let keys = random_keys(1024);

    for fan_out in [4096, 64, 16] {
        let bytes = build_file(DataBlockEncoding::Prefix, fan_out);
        let reader = open(&bytes, 64 << 20);
        let levels = reader.index().levels();
        let mut i = 0usize;
        group.bench_function(BenchmarkId::new("levels", levels), |b| {
            b.iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                black_box(reader.index().locate_data_block(&key.key_ref()).unwrap())
            });
        });
    }

    group.finish();
}

/// Sorted reseeks versus fresh seeks over the same key sequence.
///
/// **What it measures:** How much `reseek_to` saves when consecutive targets
/// usually fall into the current block.
fn bench_reseek(c: &mut Criterion) {
    let mut group = c.benchmark_group("reseek");
    let bytes = build_file(DataBlockEncoding::Diff, 128);
    let reader = open(&bytes, 64 << 20);
    let keys: Vec<CellKey> = (0..ROWS)
        .step_by(7)
        .map(|i| CellKey::first_on_row(make_row(i)))
        .collect();
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("reseek_to", |b| {
        b.iter_batched(
            || reader.new_scanner(),
            |mut scanner| {
                for key in &keys {
                    black_box(scanner.reseek_to(&key.key_ref()).unwrap());
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("seek_to", |b| {
        b.iter_batched(
            || reader.new_scanner(),
            |mut scanner| {
                for key in &keys {
                    black_box(scanner.seek_to(&key.key_ref()).unwrap());
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ================================================================================================
// Scan benchmarks
// ================================================================================================

/// Full sequential scan of every cell.
///
/// **What it measures:** Per-cell iteration cost including block crossings.
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(ROWS));

    for encoding in DataBlockEncoding::SUPPORTED {
        let bytes = build_file(encoding, 128);
        let reader = open(&bytes, 0);
        group.bench_function(BenchmarkId::new("full", encoding), |b| {
            b.iter(|| {
                let mut scanner = reader.new_scanner();
                let mut n = u64::from(scanner.seek_to_first().unwrap());
                while let Some(cell) = scanner.next().unwrap() {
                    black_box(cell);
                    n += 1;
                }
                assert_eq!(n, ROWS);
            });
        });
    }

    group.finish();
}

// ================================================================================================
// Write benchmarks
// ================================================================================================

/// Building a complete in-memory file.
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    group.sample_size(10);
    group.throughput(Throughput::Elements(ROWS));

    for encoding in DataBlockEncoding::SUPPORTED {
        group.bench_function(BenchmarkId::new("build", encoding), |b| {
            b.iter(|| black_box(build_file(encoding, 128)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_seek,
    bench_index_depth,
    bench_reseek,
    bench_scan,
    bench_write
);
criterion_main!(benches);
