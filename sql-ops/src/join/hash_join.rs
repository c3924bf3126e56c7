// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The hash join orchestrator.
//!
//! A join call passes through the states:
//!
//! ```text
//! Init -> Estimate -> Probe -> (Grow -> Probe)* -> Transpose -> Done
//!                  \-> Empty
//! ```
//!
//! `Init` validates the inputs and builds the hash table over the build side.
//! `Estimate` samples the output size, and short-circuits to `Empty` if no
//! result rows are expected. `Probe` materializes the result rows into an
//! output buffer sized by the estimate. If the buffer was too small, `Grow`
//! doubles the buffer, and the join probes again. `Transpose` splits the row
//! pairs into a left and a right index array.
//!
//! All device memory is owned by the join call, and is released on every
//! exit path.

use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::launch::BlockSize;
use gpu_runtime::runtime::memory::{DeviceBuffer, DeviceCounter};
use tracing::{debug, info, warn};

use super::builder::HashTableBuilder;
use super::concurrent_multimap::{ConcurrentMultimap, DEFAULT_OCCUPANCY_PERCENT};
use super::estimator::{CardinalityEstimate, CardinalityEstimator, DEFAULT_SAMPLE_THRESHOLD};
use super::hasher::{DefaultKeyEq, KeyEq, KeyHasher, MurmurHash3};
use super::join_key::{JoinKey, RowIndex};
use super::probe::{HashTableProber, Materialize};
use super::transpose::pairs_to_decoupled;
use super::{JoinPair, JoinType, KeyColumns};
use crate::error::{ErrorKind, Result};

use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_BLOCK_SIZE: u32 = 128;
pub const DEFAULT_MAX_GROW_RETRIES: u32 = 16;

/// Selects the side over which an inner join builds the hash table.
///
/// Left joins always build over the right side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildSide {
    /// Build over the side with fewer rows.
    Smaller,

    /// Build over the right side.
    Right,
}

/// The states of a join call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinState {
    Init,
    Estimate,
    Probe,
    Grow,
    Transpose,
    Done,
    Empty,
}

impl fmt::Display for JoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Statistics of a join call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinStatistics {
    /// The state in which the join terminated, i.e., `Done` or `Empty`.
    pub final_state: JoinState,

    /// Whether the join built over the left side and swapped the pairs back.
    pub flipped: bool,

    pub hash_table_capacity: usize,

    /// The output size estimate. `None` if the join terminated before
    /// estimating.
    pub estimate: Option<CardinalityEstimate>,

    /// Number of times the output buffer was grown.
    pub grow_retries: u32,

    /// Capacity of the final output buffer in row pairs.
    pub output_capacity: usize,

    pub build_time: Duration,
    pub estimate_time: Duration,
    pub probe_time: Duration,
    pub transpose_time: Duration,
}

impl JoinStatistics {
    fn new() -> Self {
        Self {
            final_state: JoinState::Init,
            flipped: false,
            hash_table_capacity: 0,
            estimate: None,
            grow_retries: 0,
            output_capacity: 0,
            build_time: Duration::default(),
            estimate_time: Duration::default(),
            probe_time: Duration::default(),
            transpose_time: Duration::default(),
        }
    }
}

/// The result of a join call.
///
/// The row indices are stored in one buffer. The first half holds the left
/// row indices, the second half the right row indices.
#[derive(Debug)]
pub struct JoinResult<S> {
    indices: DeviceBuffer<S>,
    len: usize,
    statistics: JoinStatistics,
}

impl<S: RowIndex> JoinResult<S> {
    /// Number of result rows.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn left_indices(&self) -> &[S] {
        &self.indices[..self.len]
    }

    /// The right row indices. A left join sets the index of left rows
    /// without a match to `S::NONE`.
    pub fn right_indices(&self) -> &[S] {
        &self.indices[self.len..]
    }

    /// The right row of result row `i`, or `None` for an unmatched left row.
    pub fn right_index(&self, i: usize) -> Option<S> {
        let index = self.right_indices()[i];
        if index.is_none() {
            None
        } else {
            Some(index)
        }
    }

    /// Iterates over the `(left, right)` row pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (S, S)> + '_ {
        self.left_indices()
            .iter()
            .copied()
            .zip(self.right_indices().iter().copied())
    }

    pub fn statistics(&self) -> &JoinStatistics {
        &self.statistics
    }

    /// Returns the index buffer of length `2 * len()`.
    pub fn into_buffer(self) -> DeviceBuffer<S> {
        self.indices
    }
}

/// Configures a `HashJoin`.
#[derive(Clone, Debug)]
pub struct HashJoinBuilder {
    join_type: JoinType,
    build_side: BuildSide,
    occupancy_percent: u32,
    block_size: BlockSize,
    sample_threshold: usize,
    max_grow_retries: u32,
    max_output_rows: Option<usize>,
}

impl Default for HashJoinBuilder {
    fn default() -> Self {
        Self {
            join_type: JoinType::Inner,
            build_side: BuildSide::Smaller,
            occupancy_percent: DEFAULT_OCCUPANCY_PERCENT,
            block_size: BlockSize::x(DEFAULT_BLOCK_SIZE),
            sample_threshold: DEFAULT_SAMPLE_THRESHOLD,
            max_grow_retries: DEFAULT_MAX_GROW_RETRIES,
            max_output_rows: None,
        }
    }
}

impl HashJoinBuilder {
    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn build_side(mut self, build_side: BuildSide) -> Self {
        self.build_side = build_side;
        self
    }

    /// Hash table occupancy in percent.
    pub fn occupancy(mut self, percent: u32) -> Self {
        self.occupancy_percent = percent;
        self
    }

    pub fn block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sample the probe side if it is more than `factor` times larger than the
    /// build side.
    pub fn sample_threshold(mut self, factor: usize) -> Self {
        self.sample_threshold = factor;
        self
    }

    pub fn max_grow_retries(mut self, retries: u32) -> Self {
        self.max_grow_retries = retries;
        self
    }

    /// Fail joins that produce more than `rows` result rows.
    pub fn max_output_rows(mut self, rows: usize) -> Self {
        self.max_output_rows = Some(rows);
        self
    }

    pub fn build(self) -> Result<HashJoin> {
        if self.occupancy_percent == 0 || self.occupancy_percent > 100 {
            Err(ErrorKind::InvalidArgument(format!(
                "Occupancy must be in the range 1-100%, but is {}%",
                self.occupancy_percent
            )))?;
        }
        if self.block_size.x == 0 {
            Err(ErrorKind::InvalidArgument(
                "Block size must be greater than zero".to_string(),
            ))?;
        }
        if self.sample_threshold == 0 {
            Err(ErrorKind::InvalidArgument(
                "Sample threshold must be greater than zero".to_string(),
            ))?;
        }

        Ok(HashJoin {
            join_type: self.join_type,
            build_side: self.build_side,
            occupancy_percent: self.occupancy_percent,
            block_size: self.block_size,
            sample_threshold: self.sample_threshold,
            max_grow_retries: self.max_grow_retries,
            max_output_rows: self.max_output_rows,
        })
    }
}

/// A hash join with adaptive output buffer sizing.
///
/// A `HashJoin` holds only configuration. Each call to `execute` builds a
/// fresh hash table, thus a `HashJoin` can execute multiple joins
/// concurrently.
#[derive(Clone, Debug)]
pub struct HashJoin {
    join_type: JoinType,
    build_side: BuildSide,
    occupancy_percent: u32,
    block_size: BlockSize,
    sample_threshold: usize,
    max_grow_retries: u32,
    max_output_rows: Option<usize>,
}

impl HashJoin {
    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    /// Joins `left` with `right` using MurmurHash3 and key equality.
    pub fn execute<K, S>(
        &self,
        device: &Device,
        left: &KeyColumns<'_, K>,
        right: &KeyColumns<'_, K>,
    ) -> Result<JoinResult<S>>
    where
        K: JoinKey,
        S: RowIndex,
    {
        self.execute_with(device, left, right, MurmurHash3::default(), DefaultKeyEq)
    }

    /// Joins `left` with `right` using a custom hash and equality function.
    pub fn execute_with<K, S, H, E>(
        &self,
        device: &Device,
        left: &KeyColumns<'_, K>,
        right: &KeyColumns<'_, K>,
        hasher: H,
        key_eq: E,
    ) -> Result<JoinResult<S>>
    where
        K: JoinKey,
        S: RowIndex,
        H: KeyHasher<K>,
        E: KeyEq<K>,
    {
        let mut statistics = JoinStatistics::new();
        let mut state = JoinState::Init;
        debug!(%state, join_type = %self.join_type, left_rows = left.len(), right_rows = right.len());

        left.validate(right)?;
        for side in [left, right].iter() {
            if side.len() >= S::NONE.as_() {
                Err(ErrorKind::InvalidArgument(format!(
                    "Input has {} rows, which exceeds the row index type",
                    side.len()
                )))?;
            }
        }

        let flip = self.join_type == JoinType::Inner
            && self.build_side == BuildSide::Smaller
            && right.len() > left.len();
        let (probe, build) = if flip { (right, left) } else { (left, right) };
        statistics.flipped = flip;

        if probe.is_empty() || (build.is_empty() && self.join_type == JoinType::Inner) {
            return Self::empty(device, statistics);
        }

        let timer = Instant::now();
        let capacity = ConcurrentMultimap::<K, S>::capacity_for(build.len(), self.occupancy_percent)?;
        let table = ConcurrentMultimap::<K, S, H, E>::new(device, capacity, hasher, key_eq)?;
        HashTableBuilder::new(self.block_size).build(device, &table, build.keys())?;
        statistics.hash_table_capacity = table.capacity();
        statistics.build_time = timer.elapsed();

        state = JoinState::Estimate;
        debug!(%state, flip, capacity = table.capacity());

        let timer = Instant::now();
        let estimate = CardinalityEstimator::new(self.join_type, self.block_size, self.sample_threshold)
            .estimate(device, &table, probe, build)?;
        statistics.estimate = Some(estimate);
        statistics.estimate_time = timer.elapsed();

        if estimate.rows == 0 {
            return Self::empty(device, statistics);
        }

        let timer = Instant::now();
        let prober = HashTableProber::new(self.join_type, self.block_size);
        let cursor = DeviceCounter::new(device)?;
        let mut scan_size = self.clamp_to_limit(estimate.rows);

        let (pairs, found) = loop {
            state = JoinState::Probe;
            debug!(%state, scan_size);

            let mut pairs = DeviceBuffer::<JoinPair<S>>::zeroed(device, scan_size)?;
            cursor.reset();
            {
                let output = Materialize::new(&cursor, pairs.as_launchable_mut_slice());
                prober.probe(device, &table, probe, build, probe.len(), &output)?;
            }

            let found = cursor.load() as usize;
            if found <= scan_size {
                break (pairs, found);
            }

            state = JoinState::Grow;
            if let Some(limit) = self.max_output_rows {
                if found > limit {
                    Err(ErrorKind::OutputLimitExceeded(format!(
                        "{} result rows exceed the limit of {} rows",
                        found, limit
                    )))?;
                }
            }
            if statistics.grow_retries == self.max_grow_retries {
                warn!(
                    %state,
                    retries = statistics.grow_retries,
                    scan_size,
                    found,
                    "Output buffer growth limit reached"
                );
                Err(ErrorKind::OutputLimitExceeded(format!(
                    "{} result rows don't fit into {} slots after {} retries",
                    found, scan_size, statistics.grow_retries
                )))?;
            }

            drop(pairs);
            statistics.grow_retries += 1;
            scan_size = self.clamp_to_limit(scan_size.checked_mul(2).ok_or_else(|| {
                ErrorKind::IntegerOverflow("Failed to grow the output buffer".to_string())
            })?);
            warn!(%state, found, scan_size, "Output size underestimated, growing buffer");
        };
        statistics.output_capacity = scan_size;
        statistics.probe_time = timer.elapsed();

        state = JoinState::Transpose;
        debug!(%state, found);

        let timer = Instant::now();
        let indices = pairs_to_decoupled(device, &pairs[..found], flip, self.block_size)?;
        drop(pairs);
        statistics.transpose_time = timer.elapsed();

        statistics.final_state = JoinState::Done;
        info!(
            join_type = %self.join_type,
            rows = found,
            estimate = estimate.rows,
            grow_retries = statistics.grow_retries,
            flipped = flip,
            "Hash join done"
        );

        Ok(JoinResult {
            indices,
            len: found,
            statistics,
        })
    }

    fn clamp_to_limit(&self, rows: usize) -> usize {
        match self.max_output_rows {
            Some(limit) => rows.min(limit),
            None => rows,
        }
    }

    fn empty<S: RowIndex>(device: &Device, mut statistics: JoinStatistics) -> Result<JoinResult<S>> {
        statistics.final_state = JoinState::Empty;
        debug!(state = %statistics.final_state, "No result rows");

        Ok(JoinResult {
            indices: DeviceBuffer::zeroed(device, 0)?,
            len: 0,
            statistics,
        })
    }
}

/// Inner joins `left` with `right` using the default configuration.
pub fn inner_join_hash<K, S>(
    device: &Device,
    left: &KeyColumns<'_, K>,
    right: &KeyColumns<'_, K>,
) -> Result<JoinResult<S>>
where
    K: JoinKey,
    S: RowIndex,
{
    HashJoinBuilder::default()
        .join_type(JoinType::Inner)
        .build()?
        .execute(device, left, right)
}

/// Left joins `left` with `right` using the default configuration.
pub fn left_join_hash<K, S>(
    device: &Device,
    left: &KeyColumns<'_, K>,
    right: &KeyColumns<'_, K>,
) -> Result<JoinResult<S>>
where
    K: JoinKey,
    S: RowIndex,
{
    HashJoinBuilder::default()
        .join_type(JoinType::Left)
        .build()?
        .execute(device, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_runtime::runtime::device::DeviceBuilder;

    #[test]
    fn builder_rejects_invalid_occupancy() {
        assert!(HashJoinBuilder::default().occupancy(0).build().is_err());
        assert!(HashJoinBuilder::default().occupancy(150).build().is_err());
        assert!(HashJoinBuilder::default().occupancy(100).build().is_ok());
    }

    #[test]
    fn builder_rejects_empty_block() {
        assert!(HashJoinBuilder::default()
            .block_size(BlockSize::x(0))
            .build()
            .is_err());
    }

    #[test]
    fn inner_join_swaps_larger_right_side() {
        let device = DeviceBuilder::default().build().unwrap();
        let a = vec![1_i32, 2];
        let b = vec![2_i32, 3, 2, 4];

        let result: JoinResult<u32> =
            inner_join_hash(&device, &KeyColumns::new(&a), &KeyColumns::new(&b)).unwrap();

        let mut pairs: Vec<_> = result.pairs().collect();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(1, 0), (1, 2)]);
        assert!(result.statistics().flipped);
        assert_eq!(result.statistics().final_state, JoinState::Done);
    }

    #[test]
    fn right_build_side_is_not_swapped() {
        let device = DeviceBuilder::default().build().unwrap();
        let a = vec![1_i32, 2];
        let b = vec![2_i32, 3, 2, 4];

        let result: JoinResult<u32> = HashJoinBuilder::default()
            .build_side(BuildSide::Right)
            .build()
            .unwrap()
            .execute(&device, &KeyColumns::new(&a), &KeyColumns::new(&b))
            .unwrap();

        let mut pairs: Vec<_> = result.pairs().collect();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(1, 0), (1, 2)]);
        assert!(!result.statistics().flipped);
    }

    #[test]
    fn left_join_never_swaps() {
        let device = DeviceBuilder::default().build().unwrap();
        let a = vec![1_i64, 2];
        let b = vec![2_i64, 3, 2, 4];

        let result: JoinResult<u64> =
            left_join_hash(&device, &KeyColumns::new(&a), &KeyColumns::new(&b)).unwrap();

        assert!(!result.statistics().flipped);
        assert_eq!(result.len(), 3);
        let unmatched: Vec<usize> = (0..result.len())
            .filter(|&i| result.right_index(i).is_none())
            .collect();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(result.left_indices()[unmatched[0]], 0);
    }

    #[test]
    fn device_memory_is_released() {
        let device = DeviceBuilder::default().build().unwrap();
        let a: Vec<u32> = (0..1000).collect();
        let b: Vec<u32> = (500..1500).collect();

        let result: JoinResult<u32> =
            inner_join_hash(&device, &KeyColumns::new(&a), &KeyColumns::new(&b)).unwrap();

        assert_eq!(result.len(), 500);
        assert_eq!(device.memory_used(), result.into_buffer().size_bytes());
    }
}
