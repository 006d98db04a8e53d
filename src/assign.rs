//! Partition assignment: weighted random selection of papers into disjoint
//! partitions.
//!
//! Each eligible paper consumes exactly one uniform draw `r` in `[0, 1)` and
//! joins the first partition whose cumulative threshold exceeds `r`. Ineligible
//! papers never consume a draw, so adding or removing them leaves the
//! assignment of every eligible paper unchanged. Draws are consumed in scan
//! order; reordering eligible papers changes the result.
//!
//! Selection is a linear scan over the thresholds, so a full assignment is
//! O(papers × partitions).

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{Array, AsArray, BooleanArray, UInt32Array};
use arrow::datatypes::{DataType, UInt32Type};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::common::{DEFAULT_BATCH_SIZE, PaperId, Result, SubsampleError, require_column};

/// Slack allowed when checking that fractions sum to at most one.
const SUM_TOLERANCE: f64 = 1e-9;

// ============================================================================
// Partition spec
// ============================================================================

/// Ascending cumulative thresholds `t_1 < t_2 < … < t_k`, each in `(0, 1]`.
/// Mass above `t_k` belongs to no partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSpec {
    thresholds: Vec<f64>,
}

impl PartitionSpec {
    /// Prefix-sum per-partition fractions into thresholds. `[0.01, 0.05]`
    /// yields `[0.01, 0.06]`.
    pub fn from_fractions(fractions: &[f64]) -> Result<Self> {
        if fractions.is_empty() {
            return Err(SubsampleError::InvalidPartitions(
                "at least one partition fraction is required".into(),
            ));
        }

        let mut thresholds = Vec::with_capacity(fractions.len());
        let mut sum = 0.0;
        for (i, &fraction) in fractions.iter().enumerate() {
            if !fraction.is_finite() || fraction <= 0.0 {
                return Err(SubsampleError::InvalidPartitions(format!(
                    "fraction {i} is {fraction}, must be positive"
                )));
            }
            sum += fraction;
            thresholds.push(sum);
        }

        if sum > 1.0 + SUM_TOLERANCE {
            return Err(SubsampleError::InvalidPartitions(format!(
                "fractions sum to {sum}, must be at most 1"
            )));
        }
        if let Some(last) = thresholds.last_mut() {
            *last = last.min(1.0);
        }

        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Partition a draw falls into: the first `i` with `r < t_i`.
    #[inline]
    pub fn select(&self, r: f64) -> Option<usize> {
        self.thresholds.iter().position(|&t| r < t)
    }
}

/// The seed to use for a run: the explicit one if given, otherwise derived
/// from the current time.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    })
}

// ============================================================================
// Partition map
// ============================================================================

/// For each partition, the set of paper ids assigned to it. The sets are
/// pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMap {
    members: Vec<HashSet<PaperId>>,
}

impl PartitionMap {
    /// A map with `num_partitions` empty partitions.
    pub fn new(num_partitions: usize) -> Self {
        Self {
            members: vec![HashSet::new(); num_partitions],
        }
    }

    /// Build a map directly from membership sets. The caller is responsible
    /// for keeping them disjoint.
    pub fn from_members(members: Vec<HashSet<PaperId>>) -> Self {
        Self { members }
    }

    /// Number of partitions.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self, partition: usize) -> &HashSet<PaperId> {
        &self.members[partition]
    }

    /// First partition containing `id`, checked in partition order.
    #[inline]
    pub fn partition_of(&self, id: PaperId) -> Option<usize> {
        self.members.iter().position(|m| m.contains(&id))
    }

    /// Number of papers in each partition.
    pub fn sizes(&self) -> Vec<usize> {
        self.members.iter().map(HashSet::len).collect()
    }

    /// Number of papers across all partitions.
    pub fn total(&self) -> usize {
        self.members.iter().map(HashSet::len).sum()
    }
}

// ============================================================================
// Assigner
// ============================================================================

/// Streams `(paper_id, eligible)` pairs through a seeded generator.
pub struct PartitionAssigner<R> {
    spec: PartitionSpec,
    rng: R,
    map: PartitionMap,
    num_seen: u64,
    num_eligible: u64,
}

impl PartitionAssigner<StdRng> {
    /// Assigner drawing from a [`StdRng`] seeded with `seed`.
    pub fn seeded(spec: PartitionSpec, seed: u64) -> Self {
        Self::new(spec, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> PartitionAssigner<R> {
    pub fn new(spec: PartitionSpec, rng: R) -> Self {
        let map = PartitionMap::new(spec.len());
        Self {
            spec,
            rng,
            map,
            num_seen: 0,
            num_eligible: 0,
        }
    }

    /// Record one paper. Returns the partition it joined, if any. A draw is
    /// consumed only when `eligible` is true.
    pub fn observe(&mut self, id: PaperId, eligible: bool) -> Option<usize> {
        self.num_seen += 1;
        if !eligible {
            return None;
        }
        self.num_eligible += 1;

        let r: f64 = self.rng.random();
        let partition = self.spec.select(r)?;
        self.map.members[partition].insert(id);
        Some(partition)
    }

    /// Record every row of a batch. A null eligibility flag counts as false; a
    /// row with a null id is skipped without consuming a draw.
    pub fn observe_batch(&mut self, ids: &UInt32Array, eligible: &BooleanArray) {
        for row in 0..ids.len() {
            let is_eligible = eligible.is_valid(row) && eligible.value(row);
            if is_eligible && ids.is_null(row) {
                self.num_seen += 1;
                continue;
            }
            self.observe(ids.value(row), is_eligible);
        }
    }

    /// Papers seen so far, eligible or not.
    pub fn num_seen(&self) -> u64 {
        self.num_seen
    }

    /// Papers that consumed a draw.
    pub fn num_eligible(&self) -> u64 {
        self.num_eligible
    }

    pub fn finish(self) -> PartitionMap {
        self.map
    }
}

// ============================================================================
// Entity table scan
// ============================================================================

/// Columns and batching used when scanning the entity table.
#[derive(Debug, Clone)]
pub struct AssignOptions {
    /// `UInt32` identifier column.
    pub id_column: String,
    /// `Boolean` eligibility column.
    pub eligible_column: String,
    /// Rows per record batch.
    pub batch_size: usize,
}

impl Default for AssignOptions {
    fn default() -> Self {
        Self {
            id_column: tables::PAPER_ID_FIELD.to_string(),
            eligible_column: tables::HAS_MENTIONS_FIELD.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Scan the entity table at `path`, reading only the id and eligibility
/// columns, and assign every eligible paper to at most one partition.
pub fn assign_partitions(
    path: &Path,
    options: &AssignOptions,
    spec: &PartitionSpec,
    seed: u64,
) -> Result<PartitionMap> {
    let file = File::open(path).map_err(|e| SubsampleError::io(path, e))?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| SubsampleError::parquet(path, e))?;

    let schema = builder.schema().clone();
    let id_index = require_column(path, &schema, &options.id_column, &DataType::UInt32)?;
    let eligible_index =
        require_column(path, &schema, &options.eligible_column, &DataType::Boolean)?;

    let mask = ProjectionMask::roots(builder.parquet_schema(), [id_index, eligible_index]);
    let reader = builder
        .with_projection(mask)
        .with_batch_size(options.batch_size)
        .build()
        .map_err(|e| SubsampleError::parquet(path, e))?;

    debug!(
        "Scanning {} ({} = col {}, {} = col {})",
        path.display(),
        options.id_column,
        id_index,
        options.eligible_column,
        eligible_index
    );

    let mut assigner = PartitionAssigner::seeded(spec.clone(), seed);
    for batch in reader {
        let batch = batch.map_err(|e| SubsampleError::arrow(path, e))?;
        let ids = batch
            .column_by_name(&options.id_column)
            .and_then(|c| c.as_primitive_opt::<UInt32Type>())
            .ok_or_else(|| SubsampleError::schema(path, &options.id_column, "not in batch"))?;
        let eligible = batch
            .column_by_name(&options.eligible_column)
            .and_then(|c| c.as_boolean_opt())
            .ok_or_else(|| SubsampleError::schema(path, &options.eligible_column, "not in batch"))?;
        assigner.observe_batch(ids, eligible);
    }

    info!(
        "Assigned {} of {} eligible papers ({} scanned) to {} partitions",
        assigner.map.total(),
        assigner.num_eligible(),
        assigner.num_seen(),
        spec.len()
    );

    Ok(assigner.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    /// Yields a fixed sequence of uniform draws.
    struct Scripted {
        draws: Vec<f64>,
        next: usize,
    }

    impl Scripted {
        fn new(draws: &[f64]) -> Self {
            Self {
                draws: draws.to_vec(),
                next: 0,
            }
        }
    }

    impl RngCore for Scripted {
        fn next_u32(&mut self) -> u32 {
            (self.next_u64() >> 32) as u32
        }

        // f64 sampling keeps the top 53 bits of a u64.
        fn next_u64(&mut self) -> u64 {
            let r = self.draws[self.next];
            self.next += 1;
            ((r * (1u64 << 53) as f64) as u64) << 11
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            for chunk in dst.chunks_mut(8) {
                let bytes = self.next_u64().to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    fn spec(fractions: &[f64]) -> PartitionSpec {
        PartitionSpec::from_fractions(fractions).unwrap()
    }

    #[test]
    fn test_from_fractions_prefix_sums() {
        let s = spec(&[0.01, 0.05]);
        assert_eq!(s.len(), 2);
        assert!((s.thresholds()[0] - 0.01).abs() < 1e-12);
        assert!((s.thresholds()[1] - 0.06).abs() < 1e-12);

        let full = spec(&[0.5, 0.5]);
        assert_eq!(full.thresholds(), &[0.5, 1.0]);
    }

    #[test]
    fn test_from_fractions_rejects_invalid() {
        for bad in [
            &[][..],
            &[0.0][..],
            &[0.1, -0.2][..],
            &[f64::NAN][..],
            &[f64::INFINITY][..],
            &[0.7, 0.4][..],
        ] {
            let err = PartitionSpec::from_fractions(bad).unwrap_err();
            assert_eq!(err.kind(), crate::common::ErrorKind::Config, "{bad:?}");
        }
    }

    #[test]
    fn test_select_first_match() {
        let s = spec(&[0.1, 0.2]);
        assert_eq!(s.select(0.05), Some(0));
        assert_eq!(s.select(0.2), Some(1));
        assert_eq!(s.select(0.5), None);
        // Thresholds are exclusive upper bounds.
        assert_eq!(s.select(0.1), Some(1));
        assert_eq!(s.select(0.0), Some(0));
    }

    #[test]
    fn test_resolve_seed() {
        assert_eq!(resolve_seed(Some(42)), 42);
        assert_eq!(resolve_seed(Some(0)), 0);
        assert_ne!(resolve_seed(None), 0);
    }

    #[test]
    fn test_observe_skips_draw_for_ineligible() {
        let mut assigner = PartitionAssigner::new(spec(&[0.1, 0.2]), Scripted::new(&[0.05, 0.2, 0.5]));
        assert_eq!(assigner.observe(1, true), Some(0));
        assert_eq!(assigner.observe(2, false), None);
        assert_eq!(assigner.observe(3, true), Some(1));
        assert_eq!(assigner.observe(4, false), None);
        assert_eq!(assigner.observe(5, true), None);
        assert_eq!(assigner.num_seen(), 5);
        assert_eq!(assigner.num_eligible(), 3);

        let map = assigner.finish();
        assert_eq!(map.members(0), &HashSet::from([1]));
        assert_eq!(map.members(1), &HashSet::from([3]));
        assert_eq!(map.partition_of(3), Some(1));
        assert_eq!(map.partition_of(2), None);
        assert_eq!(map.sizes(), vec![1, 1]);
    }

    #[test]
    fn test_observe_batch_nulls() {
        let ids = UInt32Array::from(vec![Some(1), None, Some(3), Some(4)]);
        let eligible = BooleanArray::from(vec![Some(true), Some(true), None, Some(true)]);
        let mut assigner = PartitionAssigner::new(spec(&[1.0]), Scripted::new(&[0.5, 0.5]));
        assigner.observe_batch(&ids, &eligible);
        assert_eq!(assigner.num_seen(), 4);
        assert_eq!(assigner.num_eligible(), 2);
        let map = assigner.finish();
        assert_eq!(map.members(0), &HashSet::from([1, 4]));
    }

    #[test]
    fn test_partitions_disjoint_and_gated() {
        let s = spec(&[0.2, 0.3, 0.1]);
        for seed in 0..20u64 {
            let mut assigner = PartitionAssigner::seeded(s.clone(), seed);
            for id in 0..2_000u32 {
                assigner.observe(id, id % 3 != 0);
            }
            let map = assigner.finish();
            assert_eq!(map.len(), 3);

            let mut seen = HashSet::new();
            for p in 0..map.len() {
                for &id in map.members(p) {
                    assert!(seen.insert(id), "paper {id} in two partitions (seed {seed})");
                    assert_ne!(id % 3, 0, "ineligible paper {id} sampled (seed {seed})");
                }
            }
            assert_eq!(seen.len(), map.total());
        }
    }

    #[test]
    fn test_same_seed_same_partitions() {
        let s = spec(&[0.01, 0.05]);
        let run = |seed| {
            let mut assigner = PartitionAssigner::seeded(s.clone(), seed);
            for id in 0..50_000u32 {
                assigner.observe(id, id % 2 == 0);
            }
            assigner.finish()
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn test_ineligible_papers_do_not_perturb_assignment() {
        let s = spec(&[0.3, 0.3]);

        let mut dense = PartitionAssigner::seeded(s.clone(), 99);
        for id in 0..1_000u32 {
            dense.observe(id, true);
        }

        let mut sparse = PartitionAssigner::seeded(s, 99);
        for id in 0..1_000u32 {
            sparse.observe(10_000 + id, false);
            sparse.observe(id, true);
        }

        assert_eq!(dense.finish(), sparse.finish());
    }

    #[test]
    fn test_fractions_roughly_respected() {
        let s = spec(&[0.1, 0.2]);
        let mut assigner = PartitionAssigner::seeded(s, 1234);
        for id in 0..100_000u32 {
            assigner.observe(id, true);
        }
        let sizes = assigner.finish().sizes();
        assert!((9_000..11_000).contains(&sizes[0]), "{sizes:?}");
        assert!((18_500..21_500).contains(&sizes[1]), "{sizes:?}");
    }
}
