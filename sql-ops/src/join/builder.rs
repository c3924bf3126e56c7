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

//! The hash table build kernel.

use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::launch::{BlockSize, LaunchConfig};
use gpu_runtime::runtime::memory::DeviceCounter;
use tracing::debug;

use super::concurrent_multimap::ConcurrentMultimap;
use super::hasher::{KeyEq, KeyHasher};
use super::join_key::{JoinKey, RowIndex};
use crate::error::{ErrorKind, Result};

/// Inserts every build-side row into a hash table.
///
/// The kernel launches one thread per build row. Thread `i` inserts the
/// entry `(keys[i], i)`.
#[derive(Clone, Copy, Debug)]
pub struct HashTableBuilder {
    block_size: BlockSize,
}

impl HashTableBuilder {
    pub fn new(block_size: BlockSize) -> Self {
        Self { block_size }
    }

    pub fn build<K, S, H, E>(
        &self,
        device: &Device,
        table: &ConcurrentMultimap<K, S, H, E>,
        keys: &[K],
    ) -> Result<()>
    where
        K: JoinKey,
        S: RowIndex,
        H: KeyHasher<K>,
        E: KeyEq<K>,
    {
        if keys.len() >= S::NONE.as_() {
            Err(ErrorKind::InvalidArgument(format!(
                "Build side has {} rows, which exceeds the row index type",
                keys.len()
            )))?;
        }
        if keys.is_empty() {
            return Ok(());
        }

        let config = LaunchConfig::for_len(keys.len(), self.block_size)?;
        let sentinel_keys = DeviceCounter::new(device)?;
        let rejected = DeviceCounter::new(device)?;

        device.launch("build_hash_table", config, |tid| {
            let row = tid.global();
            if row >= keys.len() {
                return;
            }

            let key = keys[row];
            if key == K::empty_key() {
                sentinel_keys.increment();
            } else if !table.insert(key, S::from_row(row)) {
                rejected.increment();
            }
        })?;

        if sentinel_keys.load() != 0 {
            Err(ErrorKind::InvalidArgument(format!(
                "{} build keys equal the reserved empty key {}",
                sentinel_keys.load(),
                K::empty_key()
            )))?;
        }
        if rejected.load() != 0 {
            Err(ErrorKind::HashTableFull(table.capacity()))?;
        }

        debug!(
            rows = keys.len(),
            capacity = table.capacity(),
            "Built hash table"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::join::hasher::{DefaultKeyEq, MurmurHash3};
    use gpu_runtime::runtime::device::DeviceBuilder;

    #[test]
    fn builds_every_row() {
        let device = DeviceBuilder::default().workers(4).build().unwrap();
        let keys: Vec<i32> = (0..10_000).map(|i| i % 100).collect();
        let table = ConcurrentMultimap::<i32, u32>::with_occupancy(&device, keys.len(), 50).unwrap();

        HashTableBuilder::new(BlockSize::x(128))
            .build(&device, &table, &keys)
            .unwrap();

        assert_eq!(table.len(), keys.len());
        let mut rows: Vec<u32> = table.find(42).collect();
        rows.sort_unstable();
        assert_eq!(rows, (0..100).map(|i| i * 100 + 42).collect::<Vec<u32>>());
    }

    #[test]
    fn undersized_table_is_full() {
        let device = DeviceBuilder::default().build().unwrap();
        let keys: Vec<u64> = (0..100).collect();
        let table =
            ConcurrentMultimap::<u64, u32, _, _>::new(&device, 10, MurmurHash3::default(), DefaultKeyEq)
                .unwrap();

        let error = HashTableBuilder::new(BlockSize::x(32))
            .build(&device, &table, &keys)
            .unwrap_err();

        match error.kind() {
            ErrorKind::HashTableFull(capacity) => assert_eq!(*capacity, 10),
            other => panic!("Unexpected error: {}", other),
        }
    }

    #[test]
    fn sentinel_key_is_rejected() {
        let device = DeviceBuilder::default().build().unwrap();
        let keys = vec![1_i64, i64::MAX, 3];
        let table = ConcurrentMultimap::<i64, u64>::with_occupancy(&device, keys.len(), 50).unwrap();

        let result = HashTableBuilder::new(BlockSize::x(32)).build(&device, &table, &keys);

        assert!(result.is_err());
    }
}
