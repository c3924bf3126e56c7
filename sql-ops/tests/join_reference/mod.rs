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

//! Reference join implementations to verify the device join.

#![allow(dead_code)]

use itertools::iproduct;
use sql_ops::join::{JoinResult, JoinType, RowIndex};
use std::collections::HashMap;
use std::hash::Hash;

/// A result row with the right row set to `None` for unmatched left rows.
pub type RowPair = (usize, Option<usize>);

/// Joins with a host hash map, and returns the sorted result rows.
pub fn host_hash_join<K: Copy + Eq + Hash>(
    left: &[K],
    right: &[K],
    join_type: JoinType,
) -> Vec<RowPair> {
    let mut table: HashMap<K, Vec<usize>> = HashMap::new();
    for (row, key) in right.iter().enumerate() {
        table.entry(*key).or_default().push(row);
    }

    let mut pairs = Vec::new();
    for (row, key) in left.iter().enumerate() {
        match table.get(key) {
            Some(matches) => pairs.extend(matches.iter().map(|&r| (row, Some(r)))),
            None if join_type == JoinType::Left => pairs.push((row, None)),
            None => {}
        }
    }

    pairs.sort_unstable();
    pairs
}

/// Joins two-column composite keys with nested loops.
pub fn nested_loop_join2<K: Copy + Eq, L: Copy + Eq>(
    left: (&[K], &[L]),
    right: (&[K], &[L]),
) -> Vec<RowPair> {
    let mut pairs: Vec<RowPair> = iproduct!(0..left.0.len(), 0..right.0.len())
        .filter(|&(i, j)| left.0[i] == right.0[j] && left.1[i] == right.1[j])
        .map(|(i, j)| (i, Some(j)))
        .collect();

    pairs.sort_unstable();
    pairs
}

/// Collects the sorted result rows of a device join.
pub fn sorted_pairs<S: RowIndex>(result: &JoinResult<S>) -> Vec<RowPair> {
    let mut pairs: Vec<RowPair> = result
        .pairs()
        .map(|(l, r)| {
            let right = if r.is_none() { None } else { Some(r.as_()) };
            (l.as_(), right)
        })
        .collect();

    pairs.sort_unstable();
    pairs
}
