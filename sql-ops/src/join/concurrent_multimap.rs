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

//! A concurrent open-addressing multimap.
//!
//! The multimap maps join keys to build-side row indices. Duplicate keys are
//! stored in separate slots, such that a lookup yields all rows of a key.
//!
//! Threads insert concurrently without locks. Each insert claims an empty
//! slot by compare-and-swapping the slot's key from the empty sentinel to the
//! inserted key, and then stores the row index. Collisions are resolved by
//! linear probing. The table must not be read until all inserts have
//! completed, i.e., until the build kernel has finished.

use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::memory::Reservation;

use super::hasher::{DefaultKeyEq, KeyEq, KeyHasher, MurmurHash3};
use super::join_key::{AtomicPrimitive, JoinKey, RowIndex};
use crate::error::{ErrorKind, Result};

use std::cmp;
use std::fmt;

/// Default hash table occupancy in percent.
pub const DEFAULT_OCCUPANCY_PERCENT: u32 = 50;

#[derive(Debug)]
struct Slot<K: AtomicPrimitive, S: AtomicPrimitive> {
    key: K::Atomic,
    value: S::Atomic,
}

impl<K: JoinKey, S: RowIndex> Slot<K, S> {
    fn empty() -> Self {
        Self {
            key: K::new_atomic(K::empty_key()),
            value: S::new_atomic(S::NONE),
        }
    }
}

/// A fixed-capacity concurrent multimap with linear probing.
pub struct ConcurrentMultimap<K, S, H = MurmurHash3, E = DefaultKeyEq>
where
    K: JoinKey,
    S: RowIndex,
{
    slots: Box<[Slot<K, S>]>,
    hasher: H,
    key_eq: E,
    _reservation: Reservation,
}

impl<K: JoinKey, S: RowIndex> ConcurrentMultimap<K, S> {
    /// Creates a multimap sized for `rows` entries at the given occupancy.
    ///
    /// The capacity is `rows * 100 / occupancy_percent`, and at least one
    /// slot.
    pub fn with_occupancy(device: &Device, rows: usize, occupancy_percent: u32) -> Result<Self> {
        let capacity = Self::capacity_for(rows, occupancy_percent)?;
        Self::new(device, capacity, MurmurHash3::default(), DefaultKeyEq)
    }

    /// Computes the capacity for `rows` entries at the given occupancy.
    pub fn capacity_for(rows: usize, occupancy_percent: u32) -> Result<usize> {
        if occupancy_percent == 0 || occupancy_percent > 100 {
            Err(ErrorKind::InvalidArgument(format!(
                "Occupancy must be in the range 1-100%, but is {}%",
                occupancy_percent
            )))?;
        }

        let capacity = rows
            .checked_mul(100)
            .ok_or_else(|| {
                ErrorKind::IntegerOverflow("Failed to compute hash table capacity".to_string())
            })?
            / occupancy_percent as usize;

        Ok(cmp::max(capacity, 1))
    }
}

impl<K, S, H, E> ConcurrentMultimap<K, S, H, E>
where
    K: JoinKey,
    S: RowIndex,
    H: KeyHasher<K>,
    E: KeyEq<K>,
{
    /// Allocates a multimap with `capacity` empty slots on `device`.
    pub fn new(device: &Device, capacity: usize, hasher: H, key_eq: E) -> Result<Self> {
        if capacity == 0 {
            Err(ErrorKind::InvalidArgument(
                "Hash table capacity must be greater than zero".to_string(),
            ))?;
        }

        let reservation = Reservation::for_items::<Slot<K, S>>(device, capacity)?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|_| {
            gpu_runtime::error::Error::from(gpu_runtime::error::ErrorKind::OutOfMemory(
                reservation.bytes(),
                device.memory_available(),
            ))
        })?;
        slots.extend((0..capacity).map(|_| Slot::empty()));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            hasher,
            key_eq,
            _reservation: reservation,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn home_slot(&self, key: K) -> usize {
        self.hasher.hash(key) as usize % self.slots.len()
    }

    /// Inserts a `(key, row)` entry.
    ///
    /// Returns `false` if the table has no empty slot left. Inserting the
    /// empty key sentinel is not supported.
    #[inline]
    pub fn insert(&self, key: K, row: S) -> bool {
        debug_assert!(key != K::empty_key(), "Cannot insert the empty key sentinel");

        let capacity = self.slots.len();
        let mut index = self.home_slot(key);

        for _ in 0..capacity {
            let slot = &self.slots[index];
            if K::atomic_compare_exchange(&slot.key, K::empty_key(), key).is_ok() {
                S::atomic_store(&slot.value, row);
                return true;
            }

            index += 1;
            if index == capacity {
                index = 0;
            }
        }

        false
    }

    /// Returns a cursor over all rows stored for `key`.
    #[inline]
    pub fn find(&self, key: K) -> MultimapCursor<'_, K, S, H, E> {
        MultimapCursor {
            map: self,
            key,
            index: self.home_slot(key),
            remaining: self.slots.len(),
        }
    }

    /// Counts the occupied slots.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| K::atomic_load(&slot.key) != K::empty_key())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, S, H, E> fmt::Debug for ConcurrentMultimap<K, S, H, E>
where
    K: JoinKey,
    S: RowIndex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentMultimap")
            .field("capacity", &self.slots.len())
            .finish()
    }
}

impl<K, S, H, E> fmt::Display for ConcurrentMultimap<K, S, H, E>
where
    K: JoinKey,
    S: RowIndex,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for slot in self.slots.iter() {
            let key = K::atomic_load(&slot.key);
            if key != K::empty_key() {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, S::atomic_load(&slot.value))?;
                first = false;
            }
        }
        write!(f, "]")
    }
}

/// Iterates over the rows stored for a key.
///
/// The cursor walks the probe sequence from the key's home slot until it
/// reaches an empty slot, or until it has visited every slot.
pub struct MultimapCursor<'m, K, S, H, E>
where
    K: JoinKey,
    S: RowIndex,
{
    map: &'m ConcurrentMultimap<K, S, H, E>,
    key: K,
    index: usize,
    remaining: usize,
}

impl<'m, K, S, H, E> Iterator for MultimapCursor<'m, K, S, H, E>
where
    K: JoinKey,
    S: RowIndex,
    H: KeyHasher<K>,
    E: KeyEq<K>,
{
    type Item = S;

    #[inline]
    fn next(&mut self) -> Option<S> {
        let capacity = self.map.slots.len();

        while self.remaining > 0 {
            let slot = &self.map.slots[self.index];
            self.remaining -= 1;
            self.index += 1;
            if self.index == capacity {
                self.index = 0;
            }

            let key = K::atomic_load(&slot.key);
            if key == K::empty_key() {
                self.remaining = 0;
                return None;
            }
            if self.map.key_eq.equal(key, self.key) {
                return Some(S::atomic_load(&slot.value));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::hasher::IdentityHash;
    use gpu_runtime::runtime::device::DeviceBuilder;

    #[test]
    fn capacity_from_occupancy() {
        type Map = ConcurrentMultimap<i32, u32>;

        assert_eq!(Map::capacity_for(1000, 50).unwrap(), 2000);
        assert_eq!(Map::capacity_for(3, 100).unwrap(), 3);
        assert_eq!(Map::capacity_for(0, 50).unwrap(), 1);
        assert!(Map::capacity_for(10, 0).is_err());
        assert!(Map::capacity_for(10, 101).is_err());
    }

    #[test]
    fn find_returns_all_duplicates() {
        let device = DeviceBuilder::default().build().unwrap();
        let map = ConcurrentMultimap::<i64, u32>::with_occupancy(&device, 8, 50).unwrap();

        for (row, &key) in [5_i64, 7, 5, 9, 5].iter().enumerate() {
            assert!(map.insert(key, row as u32));
        }

        let mut rows: Vec<u32> = map.find(5).collect();
        rows.sort_unstable();
        assert_eq!(rows, vec![0, 2, 4]);
        assert_eq!(map.find(7).collect::<Vec<_>>(), vec![1]);
        assert_eq!(map.find(6).count(), 0);
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn probing_wraps_around() {
        let device = DeviceBuilder::default().build().unwrap();
        let map = ConcurrentMultimap::<u32, u32, _, _>::new(&device, 4, IdentityHash, DefaultKeyEq)
            .unwrap();

        // Keys 3 and 7 share the last slot as home slot.
        assert!(map.insert(3, 0));
        assert!(map.insert(7, 1));

        assert_eq!(map.find(7).collect::<Vec<_>>(), vec![1]);
        assert_eq!(format!("{}", map), "[7: 1, 3: 0]");
    }

    #[test]
    fn full_table_rejects_insert() {
        let device = DeviceBuilder::default().build().unwrap();
        let map = ConcurrentMultimap::<u32, u64>::with_occupancy(&device, 2, 100).unwrap();

        assert!(map.insert(1, 0));
        assert!(map.insert(1, 1));
        assert!(!map.insert(2, 2));
        assert_eq!(map.find(1).count(), 2);
        assert_eq!(map.find(2).count(), 0);
    }

    #[test]
    fn table_memory_is_accounted() {
        let device = DeviceBuilder::default().build().unwrap();

        let map = ConcurrentMultimap::<u64, u64>::with_occupancy(&device, 100, 50).unwrap();
        assert_eq!(device.memory_used(), 200 * 16);

        drop(map);
        assert_eq!(device.memory_used(), 0);
    }
}
