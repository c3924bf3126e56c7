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

//! Builds hashed vocabularies for tests.

#![allow(dead_code)]

use std::collections::HashSet;
use text_ops::vocabulary::{hash_token, universal_hash};
use text_ops::HashedVocabulary;

const OUTER_HASH_A: u64 = 1_000_003;
const OUTER_HASH_B: u64 = 17;
const MAX_BIN_SIZE: usize = 511;

pub const UNK: u32 = 100;
pub const CLS: u32 = 101;
pub const SEP: u32 = 102;

/// A small excerpt of the BERT base uncased vocabulary.
pub const TOKENS: &[(&str, u32)] = &[
    ("[UNK]", UNK),
    ("[CLS]", CLS),
    ("[SEP]", SEP),
    ("hello", 7592),
    ("world", 2088),
    ("token", 19204),
    ("##izer", 17629),
    ("##s", 2015),
    ("!", 999),
    ("the", 1996),
    (",", 1010),
];

/// Finds inner hash parameters that map all keys of a bin to distinct slots.
fn find_inner_hash(keys: &[u64]) -> Option<(u64, u64, u64)> {
    for size in keys.len()..=MAX_BIN_SIZE {
        for a in 1..1000 {
            for b in 0..128 {
                let slots: HashSet<u64> = keys
                    .iter()
                    .map(|&key| universal_hash(a, b, key, size as u64))
                    .collect();
                if slots.len() == keys.len() {
                    return Some((a, b, size as u64));
                }
            }
        }
    }

    None
}

/// Writes `tokens` in the hashed vocabulary file format.
pub fn hashed_vocabulary_file(tokens: &[(&str, u32)]) -> String {
    let num_bins = (tokens.len() / 2).max(1);
    let mut bins: Vec<Vec<(u64, u32)>> = vec![Vec::new(); num_bins];
    for &(token, id) in tokens {
        let key = hash_token(token);
        let bin = universal_hash(OUTER_HASH_A, OUTER_HASH_B, key, num_bins as u64) as usize;
        bins[bin].push((key, id));
    }

    let mut table: Vec<u64> = Vec::new();
    let mut bin_params = Vec::new();
    for bin in &bins {
        let offset = table.len() as u64;
        if bin.is_empty() {
            bin_params.push((0, offset));
            continue;
        }

        let keys: Vec<u64> = bin.iter().map(|&(key, _)| key).collect();
        let (a, b, size) = find_inner_hash(&keys).expect("Failed to find a perfect hash");
        table.resize(table.len() + size as usize, u64::MAX);
        for &(key, id) in bin {
            let slot = offset + universal_hash(a, b, key, size);
            table[slot as usize] = key << 16 | id as u64;
        }
        bin_params.push((a << 16 | b << 9 | size, offset));
    }

    let mut file = format!("{}\n{}\n{}\n", OUTER_HASH_A, OUTER_HASH_B, num_bins);
    for (coefficient, offset) in bin_params {
        file.push_str(&format!("{} {}\n", coefficient, offset));
    }
    file.push_str(&format!("{}\n", table.len()));
    for entry in table {
        file.push_str(&format!("{}\n", entry));
    }
    file.push_str(&format!("{}\n{}\n{}\n", UNK, CLS, SEP));

    file
}

pub fn vocabulary() -> HashedVocabulary {
    hashed_vocabulary_file(TOKENS)
        .parse()
        .expect("Failed to parse test vocabulary")
}

/// Concatenates strings and computes their byte offsets.
pub fn batch(strings: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut bytes = Vec::new();
    let mut offsets = vec![0_u32];
    for s in strings {
        bytes.extend_from_slice(s.as_bytes());
        offsets.push(bytes.len() as u32);
    }

    (bytes, offsets)
}
