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

//! Key and row index types of the hash join.
//!
//! Both domains reserve their maximum value as a sentinel. The hash table
//! marks empty slots with the key sentinel, and left joins mark missing build
//! rows with the row index sentinel. Inputs must not contain keys equal to the
//! sentinel, and row counts must stay below the row index sentinel.

use datagen::relation::KeyAttribute;
use num_traits::{AsPrimitive, Bounded, FromPrimitive};
use paste::paste;

use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// A primitive that has an atomic counterpart for hash table slots.
pub trait AtomicPrimitive: Copy + Eq + Send + Sync + Debug + 'static {
    type Atomic: Send + Sync + Debug;

    fn new_atomic(value: Self) -> Self::Atomic;

    fn atomic_load(atomic: &Self::Atomic) -> Self;

    fn atomic_store(atomic: &Self::Atomic, value: Self);

    /// Stores `new` if the current value equals `current`.
    ///
    /// Returns the previous value, as `Ok` on success and as `Err` on
    /// failure.
    fn atomic_compare_exchange(atomic: &Self::Atomic, current: Self, new: Self)
        -> Result<Self, Self>;
}

/// A join key type.
pub trait JoinKey: AtomicPrimitive + KeyAttribute + Bounded + Hash + Display {
    /// Number of key bytes that are hashed.
    const HASH_WIDTH: usize;

    /// The key marking an empty hash table slot.
    fn empty_key() -> Self {
        Self::max_value()
    }

    /// The key's bits, zero-extended to 64 bits.
    fn hash_bits(self) -> u64;
}

/// A row index type.
pub trait RowIndex:
    AtomicPrimitive + Bounded + Default + Ord + Hash + Display + AsPrimitive<usize> + FromPrimitive
{
    /// The row index marking an absent row.
    const NONE: Self;

    /// Converts a row number, which must be less than `NONE`.
    fn from_row(row: usize) -> Self;

    fn is_none(self) -> bool {
        self == Self::NONE
    }
}

macro_rules! impl_atomic_primitive_for_type {
    ($Type:ty, $Suffix:ident) => {
        paste! {
            impl AtomicPrimitive for $Type {
                type Atomic = [<Atomic $Suffix>];

                #[inline]
                fn new_atomic(value: Self) -> Self::Atomic {
                    [<Atomic $Suffix>]::new(value)
                }

                #[inline]
                fn atomic_load(atomic: &Self::Atomic) -> Self {
                    atomic.load(Ordering::Acquire)
                }

                #[inline]
                fn atomic_store(atomic: &Self::Atomic, value: Self) {
                    atomic.store(value, Ordering::Release)
                }

                #[inline]
                fn atomic_compare_exchange(
                    atomic: &Self::Atomic,
                    current: Self,
                    new: Self,
                ) -> Result<Self, Self> {
                    atomic.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
                }
            }
        }
    };
}

impl_atomic_primitive_for_type!(i32, I32);
impl_atomic_primitive_for_type!(i64, I64);
impl_atomic_primitive_for_type!(u32, U32);
impl_atomic_primitive_for_type!(u64, U64);

macro_rules! impl_join_key_for_type {
    ($Type:ty, $Unsigned:ty) => {
        impl JoinKey for $Type {
            const HASH_WIDTH: usize = std::mem::size_of::<$Type>();

            #[inline]
            fn hash_bits(self) -> u64 {
                self as $Unsigned as u64
            }
        }
    };
}

impl_join_key_for_type!(i32, u32);
impl_join_key_for_type!(i64, u64);
impl_join_key_for_type!(u32, u32);
impl_join_key_for_type!(u64, u64);

macro_rules! impl_row_index_for_type {
    ($Type:ty) => {
        impl RowIndex for $Type {
            const NONE: Self = <$Type>::MAX;

            #[inline]
            fn from_row(row: usize) -> Self {
                debug_assert!(row < <$Type>::MAX as usize);
                row as $Type
            }
        }
    };
}

impl_row_index_for_type!(u32);
impl_row_index_for_type!(u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_max_values() {
        assert_eq!(<i32 as JoinKey>::empty_key(), i32::MAX);
        assert_eq!(<u64 as JoinKey>::empty_key(), u64::MAX);
        assert_eq!(<u32 as RowIndex>::NONE, u32::MAX);
        assert!(u64::MAX.is_none());
    }

    #[test]
    fn negative_keys_hash_their_bits() {
        assert_eq!((-1_i32).hash_bits(), u32::MAX as u64);
        assert_eq!((-1_i64).hash_bits(), u64::MAX);
    }

    #[test]
    fn compare_exchange_claims_once() {
        let atomic = u32::new_atomic(u32::MAX);

        assert_eq!(u32::atomic_compare_exchange(&atomic, u32::MAX, 7), Ok(u32::MAX));
        assert_eq!(u32::atomic_compare_exchange(&atomic, u32::MAX, 8), Err(7));
        assert_eq!(u32::atomic_load(&atomic), 7);
    }
}
