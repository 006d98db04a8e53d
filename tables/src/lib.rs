//! Naming and layout conventions of the SoftCite parquet corpus.
//!
//! The extraction step writes one parquet file per table into a single
//! directory. Papers are the top-level entity; every other table references a
//! paper through a `paper_id` column.
//!
//! ```text
//! <dir>/papers.parquet
//! <dir>/mentions.pdf.parquet
//! <dir>/purpose_assessments.pdf.parquet
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// Names
// ============================================================================

/// Entity table: one row per paper.
pub const PAPERS_NAME: &str = "papers";
/// Software mentions extracted from each paper.
pub const MENTIONS_NAME: &str = "mentions";
/// Purpose assessments attached to each mention.
pub const PURPOSE_ASSESSMENTS_NAME: &str = "purpose_assessments";

/// Dense `u32` identifier of a paper, assigned sequentially during extraction.
/// Dependent tables carry the same column as their foreign key.
pub const PAPER_ID_FIELD: &str = "paper_id";
/// Whether any mentions exist for this paper.
pub const HAS_MENTIONS_FIELD: &str = "has_mentions";

/// Source-file type of tables extracted from PDF parses.
pub const PDF_SOURCE: &str = "pdf";
pub const PARQUET_EXT: &str = "parquet";

/// File name of a table, e.g. `papers.parquet`.
pub fn table_file_name(table: &str) -> String {
    format!("{table}.{PARQUET_EXT}")
}

/// File name of a table extracted from a particular source type, e.g.
/// `mentions.pdf.parquet`.
pub fn source_table_file_name(table: &str, source: &str) -> String {
    format!("{table}.{source}.{PARQUET_EXT}")
}

/// True if the file stem ends in `_<digits>`, the suffix used for partition
/// outputs (`papers_0.parquet`).
pub fn is_partition_output(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    match stem.rsplit_once('_') {
        Some((head, digits)) => {
            !head.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("table {table} not found at {path}")]
    MissingTable { table: String, path: PathBuf },

    #[error("{0} cannot be listed as a dependent table")]
    InvalidDependent(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Dataset
// ============================================================================

/// A directory holding the entity table and any number of dependent tables.
#[derive(Debug, Clone)]
pub struct Dataset {
    dir: PathBuf,
    papers: PathBuf,
    dependents: Vec<PathBuf>,
}

impl Dataset {
    /// Open a dataset directory, discovering every parquet file other than the
    /// entity table as a dependent table. Discovery order is by file name.
    pub fn open(dir: &Path) -> Result<Self, DatasetError> {
        let papers = Self::locate_papers(dir)?;

        let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut dependents = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DatasetError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() || path == papers {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(PARQUET_EXT) {
                continue;
            }
            if is_partition_output(&path) {
                warn!("Skipping {} (looks like a partition output)", path.display());
                continue;
            }
            dependents.push(path);
        }
        dependents.sort();

        debug!(
            "Dataset {}: {} dependent tables",
            dir.display(),
            dependents.len()
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            papers,
            dependents,
        })
    }

    /// Open a dataset directory with an explicit list of dependent table file
    /// names. Each must exist and appear once, and the entity table may not be
    /// listed; order is preserved.
    pub fn with_tables<S: AsRef<str>>(dir: &Path, names: &[S]) -> Result<Self, DatasetError> {
        let papers = Self::locate_papers(dir)?;
        let mut dependents: Vec<PathBuf> = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(name.as_ref());
            if path == papers || dependents.contains(&path) {
                return Err(DatasetError::InvalidDependent(path));
            }
            if !path.is_file() {
                return Err(DatasetError::MissingTable {
                    table: name.as_ref().to_string(),
                    path,
                });
            }
            dependents.push(path);
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            papers,
            dependents,
        })
    }

    fn locate_papers(dir: &Path) -> Result<PathBuf, DatasetError> {
        if !dir.is_dir() {
            return Err(DatasetError::NotADirectory(dir.to_path_buf()));
        }
        let papers = dir.join(table_file_name(PAPERS_NAME));
        if !papers.is_file() {
            return Err(DatasetError::MissingTable {
                table: PAPERS_NAME.to_string(),
                path: papers,
            });
        }
        Ok(papers)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entity table.
    pub fn papers(&self) -> &Path {
        &self.papers
    }

    pub fn dependents(&self) -> &[PathBuf] {
        &self.dependents
    }

    /// Entity table first, then dependents in discovery order.
    pub fn all_tables(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.papers.as_path()).chain(self.dependents.iter().map(PathBuf::as_path))
    }
}
