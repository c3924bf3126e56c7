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

//! Hash join on a data-parallel device.
//!
//! `HashJoin` is the entry point. The remaining modules are the building
//! blocks of the join, and can be combined to build other join variants.

pub mod builder;
pub mod concurrent_multimap;
pub mod estimator;
pub mod hash_join;
pub mod hasher;
pub mod join_key;
pub mod probe;
pub mod transpose;

pub use hash_join::{
    inner_join_hash, left_join_hash, BuildSide, HashJoin, HashJoinBuilder, JoinResult,
    JoinState, JoinStatistics,
};
pub use hasher::{DefaultKeyEq, IdentityHash, KeyEq, KeyHasher, MurmurHash3};
pub use join_key::{JoinKey, RowIndex};

use crate::error::{ErrorKind, Result};

use std::fmt;

/// Maximum number of key columns per join side.
pub const MAX_KEY_COLUMNS: usize = 3;

/// Selects the probe behavior for probe rows without a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinType {
    /// Emit only matching row pairs.
    Inner,

    /// Additionally emit `(i, NONE)` for each probe row `i` without a match,
    /// where `NONE` is the row index sentinel.
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "inner"),
            JoinType::Left => write!(f, "left"),
        }
    }
}

/// A joined row pair.
///
/// The probe kernel writes `first` as the probe-side row and `second` as the
/// build-side row. The transposer restores the caller's left/right order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct JoinPair<S> {
    pub first: S,
    pub second: S,
}

/// A secondary key column of a composite key.
#[derive(Clone, Copy, Debug)]
pub enum Column<'a> {
    Int32(&'a [i32]),
    Int64(&'a [i64]),
    UInt32(&'a [u32]),
    UInt64(&'a [u64]),
}

macro_rules! impl_column_from_slice {
    ($Type:ty, $Variant:ident) => {
        impl<'a> From<&'a [$Type]> for Column<'a> {
            fn from(data: &'a [$Type]) -> Self {
                Column::$Variant(data)
            }
        }

        impl<'a> From<&'a Vec<$Type>> for Column<'a> {
            fn from(data: &'a Vec<$Type>) -> Self {
                Column::$Variant(data.as_slice())
            }
        }
    };
}

impl_column_from_slice!(i32, Int32);
impl_column_from_slice!(i64, Int64);
impl_column_from_slice!(u32, UInt32);
impl_column_from_slice!(u64, UInt64);

impl<'a> Column<'a> {
    pub fn len(&self) -> usize {
        match self {
            Column::Int32(data) => data.len(),
            Column::Int64(data) => data.len(),
            Column::UInt32(data) => data.len(),
            Column::UInt64(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Int32(_) => "i32",
            Column::Int64(_) => "i64",
            Column::UInt32(_) => "u32",
            Column::UInt64(_) => "u64",
        }
    }

    /// Compares row `row` with row `other_row` of `other`.
    ///
    /// Columns of different types never compare equal.
    pub fn eq_at(&self, row: usize, other: &Column<'_>, other_row: usize) -> bool {
        match (self, other) {
            (Column::Int32(l), Column::Int32(r)) => l[row] == r[other_row],
            (Column::Int64(l), Column::Int64(r)) => l[row] == r[other_row],
            (Column::UInt32(l), Column::UInt32(r)) => l[row] == r[other_row],
            (Column::UInt64(l), Column::UInt64(r)) => l[row] == r[other_row],
            _ => false,
        }
    }
}

/// The key columns of one join side.
///
/// The primary key column is hashed into the hash table. Secondary key
/// columns are compared after a hash table match, which implements composite
/// keys.
#[derive(Clone, Debug)]
pub struct KeyColumns<'a, K> {
    keys: &'a [K],
    secondary: Vec<Column<'a>>,
}

impl<'a, K> KeyColumns<'a, K> {
    pub fn new(keys: &'a [K]) -> Self {
        Self {
            keys,
            secondary: Vec::new(),
        }
    }

    /// Adds a secondary key column.
    pub fn with_column<C: Into<Column<'a>>>(mut self, column: C) -> Self {
        self.secondary.push(column.into());
        self
    }

    pub fn keys(&self) -> &'a [K] {
        self.keys
    }

    pub fn secondary(&self) -> &[Column<'a>] {
        &self.secondary
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compares the secondary keys of `row` with `other_row` of `other`.
    #[inline]
    pub fn secondary_eq(&self, row: usize, other: &KeyColumns<'_, K>, other_row: usize) -> bool {
        self.secondary
            .iter()
            .zip(other.secondary.iter())
            .all(|(l, r)| l.eq_at(row, r, other_row))
    }

    /// Checks that the columns of both sides are compatible.
    pub fn validate(&self, other: &KeyColumns<'_, K>) -> Result<()> {
        for side in [self, other].iter() {
            if side.secondary.len() + 1 > MAX_KEY_COLUMNS {
                Err(ErrorKind::InvalidArgument(format!(
                    "Composite keys support at most {} columns, but got {}",
                    MAX_KEY_COLUMNS,
                    side.secondary.len() + 1
                )))?;
            }
            if let Some(column) = side.secondary.iter().find(|c| c.len() != side.len()) {
                Err(ErrorKind::InvalidArgument(format!(
                    "Key column of length {} differs from the primary key length {}",
                    column.len(),
                    side.len()
                )))?;
            }
        }

        if self.secondary.len() != other.secondary.len() {
            Err(ErrorKind::InvalidArgument(format!(
                "Left side has {} key columns, but right side has {}",
                self.secondary.len() + 1,
                other.secondary.len() + 1
            )))?;
        }
        if let Some((l, r)) = self
            .secondary
            .iter()
            .zip(other.secondary.iter())
            .find(|(l, r)| l.type_name() != r.type_name())
        {
            Err(ErrorKind::InvalidArgument(format!(
                "Cannot compare {} key column with {} key column",
                l.type_name(),
                r.type_name()
            )))?;
        }

        Ok(())
    }
}
