//! One subsampling run over a dataset directory.
//!
//! 1. **Seed** - use the explicit seed, or derive one from the clock.
//! 2. **Assignment** - scan `papers.parquet` once and assign eligible papers
//!    to partitions.
//! 3. **Fan-out** - rewrite the papers table and then every dependent table
//!    into one file per partition under the output directory.
//!
//! The run stops at the first error. Outputs written before the failure are
//! left in place, so the whole output directory of a failed run is suspect.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tables::Dataset;
use tracing::info;

use crate::assign::{AssignOptions, PartitionMap, PartitionSpec, assign_partitions, resolve_seed};
use crate::common::{DEFAULT_BATCH_SIZE, Result, SubsampleError};
use crate::fanout::{DEFAULT_COMPRESSION_LEVEL, FanoutOptions, FanoutReport, fan_out};

/// Partition fractions used when none are given: a 1% and a 5% sample.
pub const DEFAULT_FRACTIONS: [f64; 2] = [0.01, 0.05];

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a subsampling run.
#[derive(Debug, Clone)]
pub struct SubsampleConfig {
    /// Directory containing `papers.parquet` and the dependent tables.
    pub input_dir: PathBuf,
    /// Directory the partition files are written to. Created if missing.
    pub output_dir: PathBuf,
    /// Fraction of eligible papers per partition.
    pub fractions: Vec<f64>,
    /// Random seed. `None` derives one from the current time.
    pub seed: Option<u64>,
    /// Dependent table file names. `None` uses every parquet file in `input_dir`.
    pub tables: Option<Vec<String>>,
    /// Paper identifier column, in the papers table and every dependent table.
    pub id_column: String,
    /// Eligibility column of the papers table.
    pub eligible_column: String,
    /// Rows per record batch read from each table.
    pub batch_size: usize,
    /// Pending rows per partition before they are written out.
    pub flush_rows: usize,
    /// Gzip level (0-9) of the output files.
    pub compression_level: u32,
}

impl Default for SubsampleConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            fractions: DEFAULT_FRACTIONS.to_vec(),
            seed: None,
            tables: None,
            id_column: tables::PAPER_ID_FIELD.to_string(),
            eligible_column: tables::HAS_MENTIONS_FIELD.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_rows: DEFAULT_BATCH_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl SubsampleConfig {
    fn assign_options(&self) -> AssignOptions {
        AssignOptions {
            id_column: self.id_column.clone(),
            eligible_column: self.eligible_column.clone(),
            batch_size: self.batch_size,
        }
    }

    fn fanout_options(&self) -> FanoutOptions {
        FanoutOptions {
            key_column: self.id_column.clone(),
            batch_size: self.batch_size,
            flush_rows: self.flush_rows,
            compression_level: self.compression_level,
        }
    }
}

// ============================================================================
// Run
// ============================================================================

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The seed actually used; replaying with it reproduces the run.
    pub seed: u64,
    pub partitions: PartitionMap,
    /// One report per table, papers first.
    pub reports: Vec<FanoutReport>,
}

/// A validated run, ready to execute table by table.
pub struct Run {
    config: SubsampleConfig,
    dataset: Dataset,
    spec: PartitionSpec,
    seed: u64,
}

impl Run {
    /// Validate the configuration, open the dataset, and create the output
    /// directory.
    pub fn prepare(config: &SubsampleConfig) -> Result<Self> {
        let spec = PartitionSpec::from_fractions(&config.fractions)?;
        if config.batch_size == 0 {
            return Err(SubsampleError::InvalidOption("batch size must be positive".into()));
        }

        let dataset = match &config.tables {
            Some(names) => Dataset::with_tables(&config.input_dir, names)?,
            None => Dataset::open(&config.input_dir)?,
        };

        fs::create_dir_all(&config.output_dir)
            .map_err(|e| SubsampleError::io(&config.output_dir, e))?;

        let seed = resolve_seed(config.seed);
        info!("Input:      {}", config.input_dir.display());
        info!("Output:     {}", config.output_dir.display());
        info!("Fractions:  {:?} (thresholds {:?})", config.fractions, spec.thresholds());
        info!("Seed:       {seed}");

        Ok(Self {
            config: config.clone(),
            dataset,
            spec,
            seed,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Every table to be rewritten, papers first.
    pub fn tables(&self) -> Vec<&Path> {
        self.dataset.all_tables().collect()
    }

    /// Scan the papers table and assign partitions.
    pub fn assign(&self) -> Result<PartitionMap> {
        let partitions = assign_partitions(
            self.dataset.papers(),
            &self.config.assign_options(),
            &self.spec,
            self.seed,
        )?;
        for (i, size) in partitions.sizes().iter().enumerate() {
            info!("  Partition {i}: {size} papers");
        }
        Ok(partitions)
    }

    /// Rewrite one table of the dataset into per-partition files under the
    /// output directory.
    pub fn fan_out(&self, table: &Path, partitions: &PartitionMap) -> Result<FanoutReport> {
        let file_name = table
            .file_name()
            .ok_or_else(|| SubsampleError::InvalidOption(format!("{} has no file name", table.display())))?;
        let destination = self.config.output_dir.join(file_name);
        fan_out(table, &destination, partitions, &self.config.fanout_options())
    }
}

/// Run the whole pipeline: assign partitions from the papers table, then fan
/// out the papers table and every dependent table.
pub fn run(config: &SubsampleConfig) -> Result<RunSummary> {
    let start = Instant::now();
    let run = Run::prepare(config)?;
    let partitions = run.assign()?;

    let mut reports = Vec::new();
    for table in run.tables() {
        reports.push(run.fan_out(table, &partitions)?);
    }

    info!(
        "Wrote {} tables x {} partitions in {:.1?}",
        reports.len(),
        partitions.len(),
        start.elapsed()
    );

    Ok(RunSummary {
        seed: run.seed(),
        partitions,
        reports,
    })
}
