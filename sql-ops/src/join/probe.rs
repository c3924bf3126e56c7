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

//! The probe kernels.
//!
//! The probe kernel looks up each probe row in the hash table, and compares
//! the secondary key columns of each candidate. The kernel is generic over
//! its output: `CountOnly` counts the result rows without writing them,
//! `Materialize` additionally writes the row pairs into an output buffer.

use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::launch::{BlockSize, LaunchConfig};
use gpu_runtime::runtime::memory::{DeviceCounter, LaunchableMutSlice};

use super::concurrent_multimap::ConcurrentMultimap;
use super::hasher::{KeyEq, KeyHasher};
use super::join_key::{JoinKey, RowIndex};
use super::{JoinPair, JoinType, KeyColumns};
use crate::error::Result;

/// Receives the result rows of a probe.
pub trait ProbeOutput<S: RowIndex>: Sync {
    /// Emits the result row `(probe_row, build_row)`.
    fn emit(&self, probe_row: usize, build_row: S);
}

/// Counts result rows.
#[derive(Debug)]
pub struct CountOnly<'c> {
    counter: &'c DeviceCounter,
}

impl<'c> CountOnly<'c> {
    pub fn new(counter: &'c DeviceCounter) -> Self {
        Self { counter }
    }
}

impl<'c, S: RowIndex> ProbeOutput<S> for CountOnly<'c> {
    #[inline]
    fn emit(&self, _probe_row: usize, _build_row: S) {
        self.counter.increment();
    }
}

/// Writes result rows into an output buffer.
///
/// Each result row claims a slot with the shared cursor. Rows that claim a
/// slot beyond the buffer are counted, but not written. Thus, after the
/// launch, the cursor holds the exact number of result rows, and the buffer
/// is complete iff the cursor does not exceed its length.
#[derive(Debug)]
pub struct Materialize<'c, 'o, S> {
    cursor: &'c DeviceCounter,
    output: LaunchableMutSlice<'o, JoinPair<S>>,
}

impl<'c, 'o, S: RowIndex> Materialize<'c, 'o, S> {
    pub fn new(cursor: &'c DeviceCounter, output: LaunchableMutSlice<'o, JoinPair<S>>) -> Self {
        Self { cursor, output }
    }
}

impl<'c, 'o, S: RowIndex> ProbeOutput<S> for Materialize<'c, 'o, S> {
    #[inline]
    fn emit(&self, probe_row: usize, build_row: S) {
        let slot = self.cursor.increment() as usize;
        if slot < self.output.len() {
            let pair = JoinPair {
                first: S::from_row(probe_row),
                second: build_row,
            };

            // Safety: the cursor hands out each slot exactly once.
            unsafe { self.output.write(slot, pair) };
        }
    }
}

/// Probes a hash table with the probe-side key columns.
#[derive(Clone, Copy, Debug)]
pub struct HashTableProber {
    join_type: JoinType,
    block_size: BlockSize,
}

impl HashTableProber {
    pub fn new(join_type: JoinType, block_size: BlockSize) -> Self {
        Self {
            join_type,
            block_size,
        }
    }

    /// Probes the first `probe_len` rows of `probe`.
    ///
    /// The kernel launches one thread per probe row. A left join emits
    /// `(i, NONE)` for each probe row `i` without a match.
    pub fn probe<K, S, H, E, O>(
        &self,
        device: &Device,
        table: &ConcurrentMultimap<K, S, H, E>,
        probe: &KeyColumns<'_, K>,
        build: &KeyColumns<'_, K>,
        probe_len: usize,
        output: &O,
    ) -> Result<()>
    where
        K: JoinKey,
        S: RowIndex,
        H: KeyHasher<K>,
        E: KeyEq<K>,
        O: ProbeOutput<S>,
    {
        let probe_len = probe_len.min(probe.len());
        if probe_len == 0 {
            return Ok(());
        }

        let config = LaunchConfig::for_len(probe_len, self.block_size)?;
        let keys = probe.keys();
        let join_type = self.join_type;
        let kernel_name = match join_type {
            JoinType::Inner => "probe_inner_join",
            JoinType::Left => "probe_left_join",
        };

        device.launch(kernel_name, config, |tid| {
            let row = tid.global();
            if row >= probe_len {
                return;
            }

            let mut found = false;
            for build_row in table.find(keys[row]) {
                if probe.secondary_eq(row, build, build_row.as_()) {
                    found = true;
                    output.emit(row, build_row);
                }
            }

            if join_type == JoinType::Left && !found {
                output.emit(row, S::NONE);
            }
        })?;

        Ok(())
    }
}
