//! Common types shared by partition assignment and the fan-out rewriter.

use std::path::{Path, PathBuf};

use arrow::datatypes::{DataType, Schema};
use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Identifier of a paper. Dense, assigned sequentially by the extraction step.
pub type PaperId = u32;

/// Default number of rows per record batch when streaming a table.
pub const DEFAULT_BATCH_SIZE: usize = 1 << 20;

// ============================================================================
// Error Type
// ============================================================================

/// Coarse classification of a [`SubsampleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Open, read, or write failure.
    Io,
    /// A required column is missing or has the wrong type.
    Schema,
    /// A column type with no copy rule.
    UnsupportedType,
    /// Invalid user-supplied options.
    Config,
}

#[derive(Debug, Error)]
pub enum SubsampleError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet error on {path}: {source}")]
    Parquet {
        path: PathBuf,
        #[source]
        source: ParquetError,
    },

    #[error("arrow error on {path}: {source}")]
    Arrow {
        path: PathBuf,
        #[source]
        source: ArrowError,
    },

    #[error("schema error in {path}: column `{column}` {reason}")]
    Schema {
        path: PathBuf,
        column: String,
        reason: String,
    },

    #[error("unsupported type {data_type} for column `{column}` in {path}")]
    UnsupportedType {
        path: PathBuf,
        column: String,
        data_type: DataType,
    },

    #[error("invalid partitions: {0}")]
    InvalidPartitions(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Dataset(#[from] tables::DatasetError),
}

impl SubsampleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubsampleError::Dataset(tables::DatasetError::InvalidDependent(_)) => ErrorKind::Config,
            SubsampleError::Io { .. }
            | SubsampleError::Parquet { .. }
            | SubsampleError::Arrow { .. }
            | SubsampleError::Dataset(_) => ErrorKind::Io,
            SubsampleError::Schema { .. } => ErrorKind::Schema,
            SubsampleError::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            SubsampleError::InvalidPartitions(_) | SubsampleError::InvalidOption(_) => {
                ErrorKind::Config
            }
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        SubsampleError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parquet(path: &Path, source: ParquetError) -> Self {
        SubsampleError::Parquet {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn arrow(path: &Path, source: ArrowError) -> Self {
        SubsampleError::Arrow {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn schema(path: &Path, column: &str, reason: impl Into<String>) -> Self {
        SubsampleError::Schema {
            path: path.to_path_buf(),
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SubsampleError>;

/// Index of the column `name` in `schema`, which must have type `expected`.
pub(crate) fn require_column(
    path: &Path,
    schema: &Schema,
    name: &str,
    expected: &DataType,
) -> Result<usize> {
    let index = schema
        .index_of(name)
        .map_err(|_| SubsampleError::schema(path, name, "is missing"))?;
    let actual = schema.field(index).data_type();
    if actual != expected {
        return Err(SubsampleError::schema(
            path,
            name,
            format!("has type {actual}, expected {expected}"),
        ));
    }
    Ok(index)
}

// ============================================================================
// Output naming
// ============================================================================

/// Path of partition `index`'s output: `_<index>` inserted before the last
/// extension, so `out/papers.parquet` becomes `out/papers_0.parquet`.
pub fn partition_path(path: &Path, index: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{index}"),
    };
    path.with_file_name(name)
}
