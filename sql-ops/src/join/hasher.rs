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

//! Hash and equality functions of the hash table.

use super::join_key::JoinKey;

/// Hashes a join key to a 32-bit hash value.
pub trait KeyHasher<K>: Send + Sync {
    fn hash(&self, key: K) -> u32;
}

/// Compares two join keys for equality.
pub trait KeyEq<K>: Send + Sync {
    fn equal(&self, left: K, right: K) -> bool;
}

/// MurmurHash3 (x86, 32-bit) over the key's little-endian bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MurmurHash3 {
    seed: u32,
}

impl MurmurHash3 {
    pub fn with_seed(seed: u32) -> Self {
        Self { seed }
    }
}

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

impl<K: JoinKey> KeyHasher<K> for MurmurHash3 {
    #[inline]
    fn hash(&self, key: K) -> u32 {
        const C1: u32 = 0xcc9e_2d51;
        const C2: u32 = 0x1b87_3593;

        let bits = key.hash_bits();
        let mut h = self.seed;

        for block in 0..(K::HASH_WIDTH / 4) {
            let mut k = (bits >> (32 * block)) as u32;
            k = k.wrapping_mul(C1);
            k = k.rotate_left(15);
            k = k.wrapping_mul(C2);

            h ^= k;
            h = h.rotate_left(13);
            h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
        }

        h ^= K::HASH_WIDTH as u32;
        fmix32(h)
    }
}

/// Uses the low 32 key bits as hash value.
///
/// Dense keys are placed into consecutive slots, which is fast, but clusters
/// badly for strided keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdentityHash;

impl<K: JoinKey> KeyHasher<K> for IdentityHash {
    #[inline]
    fn hash(&self, key: K) -> u32 {
        key.hash_bits() as u32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultKeyEq;

impl<K: JoinKey> KeyEq<K> for DefaultKeyEq {
    #[inline]
    fn equal(&self, left: K, right: K) -> bool {
        left == right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn murmur3_reference_value() {
        // MurmurHash3_x86_32 of four zero bytes with seed 0
        assert_eq!(KeyHasher::<u32>::hash(&MurmurHash3::default(), 0), 0x2362_f9de);
    }

    #[test]
    fn murmur3_depends_on_seed() {
        let key = 42_i64;

        assert_ne!(
            MurmurHash3::with_seed(1).hash(key),
            MurmurHash3::with_seed(2).hash(key)
        );
    }

    #[test]
    fn murmur3_spreads_dense_keys() {
        let buckets: HashSet<u32> = (0..1024_i32)
            .map(|key| MurmurHash3::default().hash(key) % 1024)
            .collect();

        assert!(buckets.len() > 512);
    }

    #[test]
    fn identity_hash_keeps_low_bits() {
        assert_eq!(IdentityHash.hash(7_u64), 7);
        assert_eq!(IdentityHash.hash(-1_i32), u32::MAX);
    }
}
