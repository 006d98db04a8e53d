//! Small papers / mentions tables written to real parquet files for tests.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, UInt8Type, UInt32Type};
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

pub(crate) fn dict_type() -> DataType {
    DataType::Dictionary(Box::new(DataType::UInt8), Box::new(DataType::Utf8))
}

/// Number of mentions extracted for a paper. Papers with `id % 4 == 0` have
/// none, and their `has_mentions` flag is false.
pub(crate) fn mentions_per_paper(id: u32) -> u32 {
    id % 4
}

pub(crate) fn papers_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("paper_id", DataType::UInt32, false),
        Field::new("softcite_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, true),
        Field::new("published_year", DataType::UInt16, true),
        Field::new("published_date", DataType::Date32, true),
        Field::new("genre", dict_type(), true),
        Field::new("has_mentions", DataType::Boolean, false),
    ]))
}

pub(crate) fn papers_batch(num_papers: u32) -> RecordBatch {
    let ids: Vec<u32> = (0..num_papers).collect();
    let softcite_ids: Vec<String> = ids.iter().map(|id| format!("sc-{id:06}")).collect();
    let titles: Vec<Option<String>> = ids
        .iter()
        .map(|id| (id % 5 != 0).then(|| format!("Paper {id}")))
        .collect();
    let years: Vec<Option<u16>> = ids
        .iter()
        .map(|id| (id % 7 != 0).then_some(1990 + (id % 30) as u16))
        .collect();
    let dates: Vec<Option<i32>> = ids
        .iter()
        .map(|id| (id % 6 != 0).then_some(7000 + *id as i32))
        .collect();
    let genres: DictionaryArray<UInt8Type> = ids
        .iter()
        .map(|id| match id % 3 {
            0 => Some("journal-article"),
            1 => Some("book-chapter"),
            _ => None,
        })
        .collect();
    let has_mentions: Vec<bool> = ids.iter().map(|&id| mentions_per_paper(id) > 0).collect();

    RecordBatch::try_new(
        papers_schema(),
        vec![
            Arc::new(UInt32Array::from(ids)),
            Arc::new(StringArray::from(softcite_ids)),
            Arc::new(StringArray::from(titles)),
            Arc::new(UInt16Array::from(years)),
            Arc::new(Date32Array::from(dates)),
            Arc::new(genres),
            Arc::new(BooleanArray::from(has_mentions)),
        ],
    )
    .unwrap()
}

pub(crate) fn mentions_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("software_mention_id", DataType::Utf8, false),
        Field::new("paper_id", DataType::UInt32, false),
        Field::new("source_file_type", dict_type(), false),
        Field::new("mention_index", DataType::UInt16, false),
        Field::new("software_raw", DataType::Utf8, false),
        Field::new("version_raw", DataType::Utf8, true),
        Field::new("certainty_score", DataType::Float64, true),
    ]))
}

pub(crate) fn mentions_batch(num_papers: u32) -> RecordBatch {
    let mut mention_ids = Vec::new();
    let mut paper_ids = Vec::new();
    let mut indices = Vec::new();
    let mut software = Vec::new();
    let mut versions = Vec::new();
    let mut scores = Vec::new();
    for id in 0..num_papers {
        for m in 0..mentions_per_paper(id) {
            mention_ids.push(format!("{id}.pdf.{m}"));
            paper_ids.push(id);
            indices.push(m as u16);
            software.push(format!("tool-{}", (id + m) % 11));
            versions.push((m % 2 == 0).then(|| format!("{m}.0")));
            scores.push((m != 2).then_some(f64::from(m) / 4.0));
        }
    }
    let source_types: DictionaryArray<UInt8Type> =
        paper_ids.iter().map(|_| Some("pdf")).collect();

    RecordBatch::try_new(
        mentions_schema(),
        vec![
            Arc::new(StringArray::from(mention_ids)),
            Arc::new(UInt32Array::from(paper_ids)),
            Arc::new(source_types),
            Arc::new(UInt16Array::from(indices)),
            Arc::new(StringArray::from(software)),
            Arc::new(StringArray::from(versions)),
            Arc::new(Float64Array::from(scores)),
        ],
    )
    .unwrap()
}

pub(crate) fn write_parquet(path: &Path, batch: &RecordBatch) {
    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

/// Schema and batches of a parquet file, read back through the arrow reader.
pub(crate) fn read_parquet(path: &Path) -> (SchemaRef, Vec<RecordBatch>) {
    let file = File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();
    let schema = reader.schema();
    let batches = reader.collect::<Result<Vec<_>, _>>().unwrap();
    (schema, batches)
}

/// Values of a `UInt32` column across all batches.
pub(crate) fn u32_column(batches: &[RecordBatch], name: &str) -> Vec<u32> {
    batches
        .iter()
        .flat_map(|b| {
            b.column_by_name(name)
                .unwrap()
                .as_primitive::<UInt32Type>()
                .values()
                .to_vec()
        })
        .collect()
}

/// Values of a `Utf8` column across all batches.
pub(crate) fn string_column(batches: &[RecordBatch], name: &str) -> Vec<Option<String>> {
    batches
        .iter()
        .flat_map(|b| {
            b.column_by_name(name)
                .unwrap()
                .as_string::<i32>()
                .iter()
                .map(|v| v.map(str::to_string))
                .collect::<Vec<_>>()
        })
        .collect()
}

pub(crate) fn num_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}
