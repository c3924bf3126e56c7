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

//! Estimates the join output size by probing a sample.
//!
//! If the probe side is much larger than the build side, the estimator
//! probes a prefix of the probe side with the build side's length, and
//! extrapolates the count by the size ratio. If the sample finds no match,
//! the sample is doubled and the ratio is halved, until a match is found or
//! the whole probe side has been sampled.

use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::launch::BlockSize;
use gpu_runtime::runtime::memory::DeviceCounter;
use tracing::debug;

use super::concurrent_multimap::ConcurrentMultimap;
use super::hasher::{KeyEq, KeyHasher};
use super::join_key::{JoinKey, RowIndex};
use super::probe::{CountOnly, HashTableProber};
use super::{JoinType, KeyColumns};
use crate::error::{ErrorKind, Result};

/// Sample the probe side if it is this many times larger than the build side.
pub const DEFAULT_SAMPLE_THRESHOLD: usize = 5;

/// An output size estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CardinalityEstimate {
    /// Estimated number of result rows.
    pub rows: usize,

    /// Number of probe rows in the final sample.
    pub sample_len: usize,

    /// Extrapolation factor of the final sample.
    pub size_ratio: usize,

    /// Number of sample probes.
    pub rounds: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct CardinalityEstimator {
    prober: HashTableProber,
    sample_threshold: usize,
}

impl CardinalityEstimator {
    pub fn new(join_type: JoinType, block_size: BlockSize, sample_threshold: usize) -> Self {
        Self {
            prober: HashTableProber::new(join_type, block_size),
            sample_threshold,
        }
    }

    pub fn estimate<K, S, H, E>(
        &self,
        device: &Device,
        table: &ConcurrentMultimap<K, S, H, E>,
        probe: &KeyColumns<'_, K>,
        build: &KeyColumns<'_, K>,
    ) -> Result<CardinalityEstimate>
    where
        K: JoinKey,
        S: RowIndex,
        H: KeyHasher<K>,
        E: KeyEq<K>,
    {
        let probe_len = probe.len();
        let build_len = build.len();
        if probe_len == 0 {
            return Ok(CardinalityEstimate::default());
        }

        let sample = build_len > 0
            && build_len
                .checked_mul(self.sample_threshold)
                .map_or(false, |threshold| probe_len > threshold);
        let (mut sample_len, mut size_ratio) =
            if sample {
                (build_len, probe_len / build_len + 1)
            } else {
                (probe_len, 1)
            };

        let counter = DeviceCounter::new(device)?;
        let mut rounds = 0;

        loop {
            counter.reset();
            self.prober
                .probe(device, table, probe, build, sample_len, &CountOnly::new(&counter))?;
            rounds += 1;

            let rows = (counter.load() as usize)
                .checked_mul(size_ratio)
                .ok_or_else(|| {
                    ErrorKind::IntegerOverflow("Failed to extrapolate the output size".to_string())
                })?;

            debug!(sample_len, size_ratio, rows, "Sampled output size");

            if rows > 0 || sample_len == probe_len {
                return Ok(CardinalityEstimate {
                    rows,
                    sample_len,
                    size_ratio,
                    rounds,
                });
            }

            sample_len = sample_len.saturating_mul(2).min(probe_len);
            size_ratio = (size_ratio / 2).max(1);
        }
    }
}
