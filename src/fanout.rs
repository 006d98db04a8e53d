//! Streaming fan-out: rewrite one table into one output table per partition.
//!
//! The source is read in record batches. Each row's foreign key is looked up
//! in the [`PartitionMap`]; matching rows are copied column by column into that
//! partition's [`RowBuilder`], and rows matching no partition are dropped. Only
//! the builders hold rows in memory, and a builder is written out as soon as it
//! reaches `flush_rows`, so memory stays bounded regardless of source size.
//!
//! Every partition gets an output file, even one that receives no rows.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, SchemaRef, UInt32Type};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use tracing::{debug, info};

use crate::assign::PartitionMap;
use crate::columns::{ColumnKind, RowBuilder, batch_readers, column_kinds};
use crate::common::{
    DEFAULT_BATCH_SIZE, Result, SubsampleError, partition_path, require_column,
};

/// Gzip level used for partition outputs unless overridden.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct FanoutOptions {
    /// `UInt32` foreign-key column referencing the paper.
    pub key_column: String,
    /// Rows per record batch read from the source.
    pub batch_size: usize,
    /// A partition's pending rows are written once they reach this count.
    pub flush_rows: usize,
    /// Gzip compression level (0-9) of the output files.
    pub compression_level: u32,
}

impl Default for FanoutOptions {
    fn default() -> Self {
        Self {
            key_column: tables::PAPER_ID_FIELD.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_rows: DEFAULT_BATCH_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl FanoutOptions {
    fn writer_properties(&self) -> Result<WriterProperties> {
        if self.batch_size == 0 || self.flush_rows == 0 {
            return Err(SubsampleError::InvalidOption(
                "batch size and flush rows must be positive".into(),
            ));
        }
        let level = GzipLevel::try_new(self.compression_level).map_err(|e| {
            SubsampleError::InvalidOption(format!(
                "compression level {}: {e}",
                self.compression_level
            ))
        })?;
        Ok(WriterProperties::builder()
            .set_compression(Compression::GZIP(level))
            .set_max_row_group_size(self.flush_rows)
            .build())
    }
}

// ============================================================================
// Report
// ============================================================================

/// Outcome of fanning out one table.
#[derive(Debug, Clone)]
pub struct FanoutReport {
    pub source: PathBuf,
    /// Rows read from the source.
    pub rows_read: u64,
    /// Rows written to each partition, by partition index.
    pub rows_written: Vec<u64>,
    /// Output file of each partition, by partition index.
    pub outputs: Vec<PathBuf>,
}

impl FanoutReport {
    /// Rows that matched no partition.
    pub fn rows_dropped(&self) -> u64 {
        self.rows_read - self.rows_written.iter().sum::<u64>()
    }
}

// ============================================================================
// Partition sink
// ============================================================================

/// One partition's output file and its pending rows.
struct PartitionSink {
    path: PathBuf,
    writer: ArrowWriter<File>,
    rows: RowBuilder,
    written: u64,
}

impl PartitionSink {
    fn create(
        path: PathBuf,
        schema: &SchemaRef,
        kinds: &[ColumnKind],
        props: WriterProperties,
    ) -> Result<Self> {
        let file = File::create(&path).map_err(|e| SubsampleError::io(&path, e))?;
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .map_err(|e| SubsampleError::parquet(&path, e))?;
        Ok(Self {
            rows: RowBuilder::new(schema.clone(), kinds),
            path,
            writer,
            written: 0,
        })
    }

    fn flush(&mut self) -> Result<()> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let batch = self
            .rows
            .finish()
            .map_err(|e| SubsampleError::arrow(&self.path, e))?;
        self.writer
            .write(&batch)
            .map_err(|e| SubsampleError::parquet(&self.path, e))?;
        self.written += batch.num_rows() as u64;
        debug!("Flushed {} rows to {}", batch.num_rows(), self.path.display());
        Ok(())
    }

    /// Write pending rows and end the current row group, so the next rows
    /// start with empty dictionaries.
    fn end_row_group(&mut self) -> Result<()> {
        self.flush()?;
        self.writer
            .flush()
            .map_err(|e| SubsampleError::parquet(&self.path, e))
    }

    /// Write any pending rows and the file footer.
    fn close(mut self) -> Result<(PathBuf, u64)> {
        self.flush()?;
        self.writer
            .close()
            .map_err(|e| SubsampleError::parquet(&self.path, e))?;
        Ok((self.path, self.written))
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Rewrite the table at `source` into `partitions.len()` tables named after
/// `destination` (see [`partition_path`]), each holding exactly the rows whose
/// key is a member of that partition.
///
/// The source schema is validated before any output is created: the key
/// column must exist with type `UInt32`, and every column must have a copy
/// rule. If the run fails part-way, outputs already created are left behind.
pub fn fan_out(
    source: &Path,
    destination: &Path,
    partitions: &PartitionMap,
    options: &FanoutOptions,
) -> Result<FanoutReport> {
    let start = Instant::now();
    let props = options.writer_properties()?;

    let file = File::open(source).map_err(|e| SubsampleError::io(source, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| SubsampleError::parquet(source, e))?;
    let schema = builder.schema().clone();

    let key_index = require_column(source, &schema, &options.key_column, &DataType::UInt32)?;
    let kinds = column_kinds(&schema).map_err(|field| SubsampleError::UnsupportedType {
        path: source.to_path_buf(),
        column: field.name().clone(),
        data_type: field.data_type().clone(),
    })?;

    let reader = builder
        .with_batch_size(options.batch_size)
        .build()
        .map_err(|e| SubsampleError::parquet(source, e))?;

    let mut sinks = Vec::with_capacity(partitions.len());
    for i in 0..partitions.len() {
        let path = partition_path(destination, i);
        sinks.push(PartitionSink::create(path, &schema, &kinds, props.clone())?);
    }

    info!(
        "Fanning out {} into {} partitions ({} columns)",
        source.display(),
        sinks.len(),
        kinds.len()
    );

    let mut rows_read = 0u64;
    for batch in reader {
        let batch = batch.map_err(|e| SubsampleError::arrow(source, e))?;
        let keys = batch
            .column(key_index)
            .as_primitive_opt::<UInt32Type>()
            .ok_or_else(|| {
                SubsampleError::schema(source, &options.key_column, "is not UInt32 in batch")
            })?;
        let readers = batch_readers(&batch, &kinds).map_err(|e| SubsampleError::arrow(source, e))?;

        for row in 0..batch.num_rows() {
            if keys.is_null(row) {
                continue;
            }
            let Some(p) = partitions.partition_of(keys.value(row)) else {
                continue;
            };
            let sink = &mut sinks[p];
            if !sink.rows.has_room(&readers, row) {
                debug!("{}: dictionary full, starting a new row group", sink.path.display());
                sink.end_row_group()?;
            }
            sink.rows
                .append_row(&readers, row)
                .map_err(|e| SubsampleError::arrow(source, e))?;
            if sink.rows.len() >= options.flush_rows {
                sink.flush()?;
            }
        }

        rows_read += batch.num_rows() as u64;
        debug!("{}: {} rows read", source.display(), rows_read);
    }

    let mut rows_written = Vec::with_capacity(sinks.len());
    let mut outputs = Vec::with_capacity(sinks.len());
    for sink in sinks {
        let (path, written) = sink.close()?;
        rows_written.push(written);
        outputs.push(path);
    }

    info!(
        "{}: {} rows read, written per partition: {:?} ({:.1?})",
        source.display(),
        rows_read,
        rows_written,
        start.elapsed()
    );

    Ok(FanoutReport {
        source: source.to_path_buf(),
        rows_read,
        rows_written,
        outputs,
    })
}
