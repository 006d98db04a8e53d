//! Fan-out and assignment throughput benchmarks.
//!
//! - **fan_out**: rewrite a synthetic mentions table into 1, 4, and 16
//!   partitions. Measures rows read per second, including parquet decode and
//!   gzip encode of the matching rows.
//! - **assign**: draw partitions for a million eligible papers.
//!
//! # Running
//!
//! ```sh
//! cargo bench --bench fanout_throughput
//! ```

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, DictionaryArray, Float64Array, StringArray, UInt16Array, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, UInt8Type};
use arrow::record_batch::RecordBatch;
use criterion::{BenchmarkId, Criterion, Throughput};
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use subsample::assign::{PartitionAssigner, PartitionMap, PartitionSpec};
use subsample::fanout::{FanoutOptions, fan_out};

const NUM_PAPERS: u32 = 50_000;
const MAX_MENTIONS_PER_PAPER: u32 = 8;

// ============================================================================
// Test data generators
// ============================================================================

/// Write a mentions-shaped table with a random number of mentions per paper.
/// Returns the number of rows written.
fn write_mentions(path: &Path) -> usize {
    let mut rng = StdRng::seed_from_u64(0);
    let mut paper_ids = Vec::new();
    let mut indices = Vec::new();
    let mut software = Vec::new();
    let mut scores = Vec::new();
    for id in 0..NUM_PAPERS {
        let n = rng.random_range(0..=MAX_MENTIONS_PER_PAPER);
        for m in 0..n {
            paper_ids.push(id);
            indices.push(m as u16);
            software.push(format!("software-{}", rng.random_range(0..5_000u32)));
            scores.push(rng.random::<f64>());
        }
    }
    let num_rows = paper_ids.len();
    let source_types: DictionaryArray<UInt8Type> = (0..num_rows)
        .map(|i| Some(if i % 3 == 0 { "xml" } else { "pdf" }))
        .collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("paper_id", DataType::UInt32, false),
        Field::new(
            "source_file_type",
            DataType::Dictionary(Box::new(DataType::UInt8), Box::new(DataType::Utf8)),
            false,
        ),
        Field::new("mention_index", DataType::UInt16, false),
        Field::new("software_raw", DataType::Utf8, false),
        Field::new("certainty_score", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from(paper_ids)),
        Arc::new(source_types),
        Arc::new(UInt16Array::from(indices)),
        Arc::new(StringArray::from(software)),
        Arc::new(Float64Array::from(scores)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();

    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    num_rows
}

/// Assign 6% of papers across `num_partitions` equal partitions.
fn partition_map(num_partitions: usize) -> PartitionMap {
    let fractions = vec![0.06 / num_partitions as f64; num_partitions];
    let spec = PartitionSpec::from_fractions(&fractions).unwrap();
    let mut assigner = PartitionAssigner::seeded(spec, 42);
    for id in 0..NUM_PAPERS {
        assigner.observe(id, true);
    }
    assigner.finish()
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("mentions.pdf.parquet");
    let num_rows = write_mentions(&source);

    let mut group = c.benchmark_group("fan_out");
    group.sample_size(10);
    group.throughput(Throughput::Elements(num_rows as u64));

    for num_partitions in [1, 4, 16] {
        let partitions = partition_map(num_partitions);
        let destination = dir.path().join(format!("out_{num_partitions}.parquet"));
        group.bench_with_input(
            BenchmarkId::new("partitions", num_partitions),
            &partitions,
            |b, partitions| {
                b.iter(|| {
                    fan_out(&source, &destination, partitions, &FanoutOptions::default()).unwrap()
                });
            },
        );
    }
    group.finish();
}

fn bench_assign(c: &mut Criterion) {
    let num_papers = 1_000_000u32;
    let spec = PartitionSpec::from_fractions(&[0.01, 0.05]).unwrap();

    let mut group = c.benchmark_group("assign");
    group.throughput(Throughput::Elements(num_papers as u64));
    group.bench_function("observe", |b| {
        b.iter(|| {
            let mut assigner = PartitionAssigner::seeded(spec.clone(), 7);
            for id in 0..num_papers {
                assigner.observe(id, id % 5 != 0);
            }
            let map = assigner.finish();
            let all: HashSet<u32> = (0..map.len()).flat_map(|p| map.members(p).iter().copied()).collect();
            all.len()
        });
    });
    group.finish();
}

// ============================================================================
// Criterion main
// ============================================================================

fn main() {
    let mut criterion = Criterion::default()
        .warm_up_time(std::time::Duration::from_secs(3))
        .measurement_time(std::time::Duration::from_secs(15))
        .configure_from_args();

    bench_fan_out(&mut criterion);
    bench_assign(&mut criterion);

    criterion.final_summary();
}
