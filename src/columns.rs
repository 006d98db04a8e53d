//! Typed, per-row column copy.
//!
//! Arrow exposes typed arrays rather than a uniform value interface, so copying
//! one row out of a record batch means dispatching on each column's type. The
//! set of supported types is closed: [`ColumnKind`] enumerates them, and a
//! schema containing anything else is rejected once, before any row is read.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::*;
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Date32Type, Field, Float32Type, Float64Type, Int32Type, Int64Type,
    Schema, SchemaRef, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

// ============================================================================
// Column kinds
// ============================================================================

/// Column types the rewriter knows how to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Boolean,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int32,
    Int64,
    Float32,
    Float64,
    Date32,
    Utf8,
    LargeUtf8,
    /// `Dictionary(UInt8, Utf8)`, used for low-cardinality string columns.
    DictionaryUtf8,
}

impl ColumnKind {
    /// Kind of a declared Arrow type, or `None` if there is no copy rule for it.
    pub fn of(data_type: &DataType) -> Option<Self> {
        let kind = match data_type {
            DataType::Boolean => ColumnKind::Boolean,
            DataType::UInt8 => ColumnKind::UInt8,
            DataType::UInt16 => ColumnKind::UInt16,
            DataType::UInt32 => ColumnKind::UInt32,
            DataType::UInt64 => ColumnKind::UInt64,
            DataType::Int32 => ColumnKind::Int32,
            DataType::Int64 => ColumnKind::Int64,
            DataType::Float32 => ColumnKind::Float32,
            DataType::Float64 => ColumnKind::Float64,
            DataType::Date32 => ColumnKind::Date32,
            DataType::Utf8 => ColumnKind::Utf8,
            DataType::LargeUtf8 => ColumnKind::LargeUtf8,
            DataType::Dictionary(key, value)
                if **key == DataType::UInt8 && **value == DataType::Utf8 =>
            {
                ColumnKind::DictionaryUtf8
            }
            _ => return None,
        };
        Some(kind)
    }
}

/// Resolve the kind of every field in `schema`. On failure, returns the first
/// field without a copy rule.
pub fn column_kinds(schema: &Schema) -> Result<Vec<ColumnKind>, &Field> {
    schema
        .fields()
        .iter()
        .map(|f| ColumnKind::of(f.data_type()).ok_or(f.as_ref()))
        .collect()
}

// ============================================================================
// Readers
// ============================================================================

/// Typed view of one source column within one record batch.
#[derive(Debug, Clone, Copy)]
pub enum ColumnReader<'a> {
    Boolean(&'a BooleanArray),
    UInt8(&'a UInt8Array),
    UInt16(&'a UInt16Array),
    UInt32(&'a UInt32Array),
    UInt64(&'a UInt64Array),
    Int32(&'a Int32Array),
    Int64(&'a Int64Array),
    Float32(&'a Float32Array),
    Float64(&'a Float64Array),
    Date32(&'a Date32Array),
    Utf8(&'a StringArray),
    LargeUtf8(&'a LargeStringArray),
    DictionaryUtf8 {
        keys: &'a UInt8Array,
        values: &'a StringArray,
    },
}

impl<'a> ColumnReader<'a> {
    /// Downcast `array` according to `kind`. Returns `None` if the array's
    /// physical type disagrees with the kind.
    pub fn new(kind: ColumnKind, array: &'a dyn Array) -> Option<Self> {
        let reader = match kind {
            ColumnKind::Boolean => ColumnReader::Boolean(array.as_boolean_opt()?),
            ColumnKind::UInt8 => ColumnReader::UInt8(array.as_primitive_opt::<UInt8Type>()?),
            ColumnKind::UInt16 => ColumnReader::UInt16(array.as_primitive_opt::<UInt16Type>()?),
            ColumnKind::UInt32 => ColumnReader::UInt32(array.as_primitive_opt::<UInt32Type>()?),
            ColumnKind::UInt64 => ColumnReader::UInt64(array.as_primitive_opt::<UInt64Type>()?),
            ColumnKind::Int32 => ColumnReader::Int32(array.as_primitive_opt::<Int32Type>()?),
            ColumnKind::Int64 => ColumnReader::Int64(array.as_primitive_opt::<Int64Type>()?),
            ColumnKind::Float32 => {
                ColumnReader::Float32(array.as_primitive_opt::<Float32Type>()?)
            }
            ColumnKind::Float64 => {
                ColumnReader::Float64(array.as_primitive_opt::<Float64Type>()?)
            }
            ColumnKind::Date32 => ColumnReader::Date32(array.as_primitive_opt::<Date32Type>()?),
            ColumnKind::Utf8 => ColumnReader::Utf8(array.as_string_opt::<i32>()?),
            ColumnKind::LargeUtf8 => ColumnReader::LargeUtf8(array.as_string_opt::<i64>()?),
            ColumnKind::DictionaryUtf8 => {
                let dict = array.as_dictionary_opt::<UInt8Type>()?;
                ColumnReader::DictionaryUtf8 {
                    keys: dict.keys(),
                    values: dict.values().as_string_opt::<i32>()?,
                }
            }
        };
        Some(reader)
    }
}

/// Typed readers for every column of `batch`, in schema order.
pub fn batch_readers<'a>(
    batch: &'a RecordBatch,
    kinds: &[ColumnKind],
) -> Result<Vec<ColumnReader<'a>>, ArrowError> {
    batch
        .columns()
        .iter()
        .zip(kinds)
        .enumerate()
        .map(|(i, (array, &kind))| {
            ColumnReader::new(kind, array.as_ref()).ok_or_else(|| {
                ArrowError::SchemaError(format!(
                    "column {i} has type {} but schema declares {kind:?}",
                    array.data_type()
                ))
            })
        })
        .collect()
}

// ============================================================================
// Builders
// ============================================================================

fn copy_primitive<T: ArrowPrimitiveType>(
    builder: &mut PrimitiveBuilder<T>,
    source: &PrimitiveArray<T>,
    row: usize,
) {
    if source.is_null(row) {
        builder.append_null();
    } else {
        builder.append_value(source.value(row));
    }
}

fn copy_string<O: OffsetSizeTrait>(
    builder: &mut GenericStringBuilder<O>,
    source: &GenericStringArray<O>,
    row: usize,
) {
    if source.is_null(row) {
        builder.append_null();
    } else {
        builder.append_value(source.value(row));
    }
}

/// Distinct values a `UInt8`-keyed dictionary can hold.
const MAX_DICTIONARY_VALUES: usize = u8::MAX as usize + 1;

/// Value of a dictionary-encoded row, or `None` if the row is null.
fn dictionary_value<'a>(keys: &UInt8Array, values: &'a StringArray, row: usize) -> Option<&'a str> {
    if keys.is_null(row) {
        return None;
    }
    let key = keys.value(row) as usize;
    (!values.is_null(key)).then(|| values.value(key))
}

/// `UInt8`-keyed string dictionary that tracks its distinct values, so a row
/// can be checked for a free key before anything is appended.
pub struct DictionaryColumn {
    builder: StringDictionaryBuilder<UInt8Type>,
    distinct: HashSet<String>,
}

impl DictionaryColumn {
    fn new() -> Self {
        Self {
            builder: StringDictionaryBuilder::new(),
            distinct: HashSet::new(),
        }
    }

    fn has_room(&self, value: &str) -> bool {
        self.distinct.len() < MAX_DICTIONARY_VALUES || self.distinct.contains(value)
    }

    fn append(&mut self, value: Option<&str>) -> Result<(), ArrowError> {
        match value {
            Some(v) => {
                self.builder.append(v)?;
                if !self.distinct.contains(v) {
                    self.distinct.insert(v.to_string());
                }
            }
            None => self.builder.append_null(),
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.builder.len()
    }

    /// Take the accumulated values. The dictionary starts over empty.
    fn finish(&mut self) -> ArrayRef {
        self.distinct.clear();
        Arc::new(self.builder.finish())
    }
}

/// In-progress output column, one variant per [`ColumnKind`].
pub enum ColumnBuilder {
    Boolean(BooleanBuilder),
    UInt8(UInt8Builder),
    UInt16(UInt16Builder),
    UInt32(UInt32Builder),
    UInt64(UInt64Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Date32(Date32Builder),
    Utf8(StringBuilder),
    LargeUtf8(LargeStringBuilder),
    DictionaryUtf8(DictionaryColumn),
}

impl ColumnBuilder {
    pub fn new(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Boolean => ColumnBuilder::Boolean(BooleanBuilder::new()),
            ColumnKind::UInt8 => ColumnBuilder::UInt8(UInt8Builder::new()),
            ColumnKind::UInt16 => ColumnBuilder::UInt16(UInt16Builder::new()),
            ColumnKind::UInt32 => ColumnBuilder::UInt32(UInt32Builder::new()),
            ColumnKind::UInt64 => ColumnBuilder::UInt64(UInt64Builder::new()),
            ColumnKind::Int32 => ColumnBuilder::Int32(Int32Builder::new()),
            ColumnKind::Int64 => ColumnBuilder::Int64(Int64Builder::new()),
            ColumnKind::Float32 => ColumnBuilder::Float32(Float32Builder::new()),
            ColumnKind::Float64 => ColumnBuilder::Float64(Float64Builder::new()),
            ColumnKind::Date32 => ColumnBuilder::Date32(Date32Builder::new()),
            ColumnKind::Utf8 => ColumnBuilder::Utf8(StringBuilder::new()),
            ColumnKind::LargeUtf8 => ColumnBuilder::LargeUtf8(LargeStringBuilder::new()),
            ColumnKind::DictionaryUtf8 => ColumnBuilder::DictionaryUtf8(DictionaryColumn::new()),
        }
    }

    /// Whether the value at `row` of `source` can be appended. Only a
    /// dictionary column with every key taken by other values is full.
    pub fn has_room(&self, source: &ColumnReader<'_>, row: usize) -> bool {
        match (self, source) {
            (ColumnBuilder::DictionaryUtf8(b), ColumnReader::DictionaryUtf8 { keys, values }) => {
                dictionary_value(keys, values, row).is_none_or(|v| b.has_room(v))
            }
            _ => true,
        }
    }

    /// Append the value at `row` of `source`, preserving nulls.
    ///
    /// Fails if `source` is a different kind than this builder, or if a
    /// dictionary column runs out of `u8` keys (see [`Self::has_room`]).
    pub fn append_from(&mut self, source: &ColumnReader<'_>, row: usize) -> Result<(), ArrowError> {
        match (self, source) {
            (ColumnBuilder::Boolean(b), ColumnReader::Boolean(a)) => {
                if a.is_null(row) {
                    b.append_null();
                } else {
                    b.append_value(a.value(row));
                }
            }
            (ColumnBuilder::UInt8(b), ColumnReader::UInt8(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::UInt16(b), ColumnReader::UInt16(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::UInt32(b), ColumnReader::UInt32(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::UInt64(b), ColumnReader::UInt64(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::Int32(b), ColumnReader::Int32(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::Int64(b), ColumnReader::Int64(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::Float32(b), ColumnReader::Float32(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::Float64(b), ColumnReader::Float64(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::Date32(b), ColumnReader::Date32(a)) => copy_primitive(b, a, row),
            (ColumnBuilder::Utf8(b), ColumnReader::Utf8(a)) => copy_string(b, a, row),
            (ColumnBuilder::LargeUtf8(b), ColumnReader::LargeUtf8(a)) => copy_string(b, a, row),
            (ColumnBuilder::DictionaryUtf8(b), ColumnReader::DictionaryUtf8 { keys, values }) => {
                b.append(dictionary_value(keys, values, row))?;
            }
            (builder, _) => {
                return Err(ArrowError::SchemaError(format!(
                    "source column does not match {} builder",
                    builder.kind_name()
                )));
            }
        }
        Ok(())
    }

    fn kind_name(&self) -> &'static str {
        match self {
            ColumnBuilder::Boolean(_) => "Boolean",
            ColumnBuilder::UInt8(_) => "UInt8",
            ColumnBuilder::UInt16(_) => "UInt16",
            ColumnBuilder::UInt32(_) => "UInt32",
            ColumnBuilder::UInt64(_) => "UInt64",
            ColumnBuilder::Int32(_) => "Int32",
            ColumnBuilder::Int64(_) => "Int64",
            ColumnBuilder::Float32(_) => "Float32",
            ColumnBuilder::Float64(_) => "Float64",
            ColumnBuilder::Date32(_) => "Date32",
            ColumnBuilder::Utf8(_) => "Utf8",
            ColumnBuilder::LargeUtf8(_) => "LargeUtf8",
            ColumnBuilder::DictionaryUtf8(_) => "DictionaryUtf8",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnBuilder::Boolean(b) => b.len(),
            ColumnBuilder::UInt8(b) => b.len(),
            ColumnBuilder::UInt16(b) => b.len(),
            ColumnBuilder::UInt32(b) => b.len(),
            ColumnBuilder::UInt64(b) => b.len(),
            ColumnBuilder::Int32(b) => b.len(),
            ColumnBuilder::Int64(b) => b.len(),
            ColumnBuilder::Float32(b) => b.len(),
            ColumnBuilder::Float64(b) => b.len(),
            ColumnBuilder::Date32(b) => b.len(),
            ColumnBuilder::Utf8(b) => b.len(),
            ColumnBuilder::LargeUtf8(b) => b.len(),
            ColumnBuilder::DictionaryUtf8(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the accumulated values, leaving the builder empty.
    pub fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Boolean(b) => Arc::new(b.finish()),
            ColumnBuilder::UInt8(b) => Arc::new(b.finish()),
            ColumnBuilder::UInt16(b) => Arc::new(b.finish()),
            ColumnBuilder::UInt32(b) => Arc::new(b.finish()),
            ColumnBuilder::UInt64(b) => Arc::new(b.finish()),
            ColumnBuilder::Int32(b) => Arc::new(b.finish()),
            ColumnBuilder::Int64(b) => Arc::new(b.finish()),
            ColumnBuilder::Float32(b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(b) => Arc::new(b.finish()),
            ColumnBuilder::Date32(b) => Arc::new(b.finish()),
            ColumnBuilder::Utf8(b) => Arc::new(b.finish()),
            ColumnBuilder::LargeUtf8(b) => Arc::new(b.finish()),
            ColumnBuilder::DictionaryUtf8(b) => b.finish(),
        }
    }
}

// ============================================================================
// Row builder
// ============================================================================

/// Accumulates whole rows for one output table.
pub struct RowBuilder {
    schema: SchemaRef,
    columns: Vec<ColumnBuilder>,
    num_rows: usize,
}

impl RowBuilder {
    /// `kinds` must be the result of [`column_kinds`] for `schema`.
    pub fn new(schema: SchemaRef, kinds: &[ColumnKind]) -> Self {
        Self {
            schema,
            columns: kinds.iter().map(|&k| ColumnBuilder::new(k)).collect(),
            num_rows: 0,
        }
    }

    /// Whether row `row` fits without finishing the pending rows first.
    /// A row that does not fit must not be appended, or the columns would
    /// end up with different lengths.
    pub fn has_room(&self, readers: &[ColumnReader<'_>], row: usize) -> bool {
        self.columns
            .iter()
            .zip(readers)
            .all(|(builder, reader)| builder.has_room(reader, row))
    }

    /// Copy row `row` from every reader into the matching column builder.
    pub fn append_row(&mut self, readers: &[ColumnReader<'_>], row: usize) -> Result<(), ArrowError> {
        for (builder, reader) in self.columns.iter_mut().zip(readers) {
            builder.append_from(reader, row)?;
        }
        self.num_rows += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Drain the accumulated rows into a record batch with the output schema.
    pub fn finish(&mut self) -> Result<RecordBatch, ArrowError> {
        let arrays: Vec<ArrayRef> = self.columns.iter_mut().map(ColumnBuilder::finish).collect();
        let options = RecordBatchOptions::new().with_row_count(Some(self.num_rows));
        self.num_rows = 0;
        RecordBatch::try_new_with_options(self.schema.clone(), arrays, &options)
    }
}
