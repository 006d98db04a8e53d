//! Inspect a directory of parquet tables: row counts, row groups, and arrow
//! schema of every file, read from the parquet footers.
//!
//! Works on input datasets and on subsample outputs alike. With `--ids`, each
//! table carrying a `paper_id` column is scanned to count distinct papers,
//! which is the quickest way to check a partition against its papers file.
//!
//! ## Usage
//!
//! ```sh
//! cargo run --release --bin inspect -- --dir data/sample
//! cargo run --release --bin inspect -- --dir data/sample --ids
//! ```

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::array::AsArray;
use arrow::datatypes::{DataType, UInt32Type};
use clap::Parser;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use subsample::common::{DEFAULT_BATCH_SIZE, PaperId};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(about = "Inspect the parquet tables of a dataset directory")]
struct Args {
    /// Directory of parquet files.
    #[arg(long)]
    dir: PathBuf,

    /// Also count distinct paper ids per table (scans the id column).
    #[arg(long, default_value_t = false)]
    ids: bool,

    /// Paper identifier column used by `--ids`.
    #[arg(long, default_value = tables::PAPER_ID_FIELD)]
    id_column: String,
}

fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let mut files: Vec<PathBuf> = fs::read_dir(&args.dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(tables::PARQUET_EXT)
        })
        .collect();
    files.sort();

    let num_outputs = files
        .iter()
        .filter(|path| tables::is_partition_output(path))
        .count();

    // ── Overview ──────────────────────────────────────────────────────────
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  Directory: {}", args.dir.display());
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Tables:     {:>10}", files.len());
    println!("║  Partitions: {num_outputs:>10} files");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // ── Tables ────────────────────────────────────────────────────────────
    for path in &files {
        inspect_table(path, &args)?;
        println!();
    }
    Ok(())
}

fn inspect_table(path: &Path, args: &Args) -> Result<(), BoxError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let metadata = builder.metadata().clone();
    let schema = builder.schema().clone();
    let file_metadata = metadata.file_metadata();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("┌─ {name}");
    println!(
        "│  {} rows, {} row groups, {} columns",
        file_metadata.num_rows(),
        metadata.num_row_groups(),
        schema.fields().len()
    );
    if let Some(created_by) = file_metadata.created_by() {
        println!("│  created by {created_by}");
    }

    for (i, field) in schema.fields().iter().enumerate() {
        let nullable = if field.is_nullable() { "null" } else { "not null" };
        println!(
            "│  [{i:>2}] {:<28} {:<36} {nullable}",
            field.name(),
            field.data_type().to_string()
        );
    }

    if args.ids {
        match schema.field_with_name(&args.id_column) {
            Ok(field) if field.data_type() == &DataType::UInt32 => {
                let distinct = distinct_ids(path, &args.id_column)?;
                println!("│  distinct {}: {distinct}", args.id_column);
            }
            Ok(field) => println!(
                "│  {} is {}, not UInt32; skipped",
                args.id_column,
                field.data_type()
            ),
            Err(_) => println!("│  no {} column", args.id_column),
        }
    }
    println!("└─");
    Ok(())
}

/// Number of distinct non-null values of a `UInt32` column.
fn distinct_ids(path: &Path, column: &str) -> Result<usize, BoxError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let index = builder.schema().index_of(column)?;
    let mask = ProjectionMask::roots(builder.parquet_schema(), [index]);
    let reader = builder
        .with_projection(mask)
        .with_batch_size(DEFAULT_BATCH_SIZE)
        .build()?;

    let mut ids: HashSet<PaperId> = HashSet::new();
    for batch in reader {
        let batch = batch?;
        ids.extend(batch.column(0).as_primitive::<UInt32Type>().iter().flatten());
    }
    Ok(ids.len())
}
