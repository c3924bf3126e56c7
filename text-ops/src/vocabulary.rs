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

//! The pre-hashed WordPiece vocabulary.
//!
//! The vocabulary is stored as a two-level perfect hash table. The outer hash
//! function assigns each token to a bin, and each bin has its own inner hash
//! function that maps the tokens of the bin to distinct table slots.
//!
//! The vocabulary file is a text file of whitespace-separated unsigned
//! integers, in order:
//!
//! ```ignore
//! outer_hash_a outer_hash_b num_bins
//! coefficient_0 offset_0
//! ...
//! coefficient_{num_bins-1} offset_{num_bins-1}
//! table_len
//! entry_0
//! ...
//! entry_{table_len-1}
//! unk_token_id
//! cls_token_id
//! sep_token_id
//! ```
//!
//! A bin coefficient packs the inner hash parameters as `a << 16 | b << 9 |
//! bin_size`. A table entry packs a 48-bit token hash and a 16-bit token id as
//! `hash << 16 | id`.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

use crate::error::{Error, ErrorKind, Result, ResultExt};

/// Prime modulus of the universal hash functions.
pub const HASH_PRIME: u64 = 281_474_976_710_677;

/// Bit width of a token hash.
pub const TOKEN_HASH_BITS: u32 = 48;

const TOKEN_HASH_MASK: u64 = (1 << TOKEN_HASH_BITS) - 1;
const TOKEN_ID_BITS: u32 = 16;
const TOKEN_ID_MASK: u64 = (1 << TOKEN_ID_BITS) - 1;
const MAX_BIN_SIZE: u64 = 0x1ff;

/// Prefix that marks a word piece that continues a word.
pub const CONTINUATION_PREFIX: &str = "##";

/// Computes the SDBM hash state after hashing `chars`, starting from `state`.
#[inline]
pub fn sdbm_hash<I>(state: u64, chars: I) -> u64
where
    I: IntoIterator<Item = char>,
{
    chars.into_iter().fold(state, |hash, c| {
        (c as u64)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash)
    })
}

/// Hashes a vocabulary token to its 48-bit key.
///
/// Continuation pieces are written with their `##` prefix, e.g. `##ing`.
pub fn hash_token(token: &str) -> u64 {
    sdbm_hash(0, token.chars()) & TOKEN_HASH_MASK
}

/// The universal hash function `((a * key + b) mod p) mod size`.
#[inline]
pub fn universal_hash(a: u64, b: u64, key: u64, size: u64) -> u64 {
    (a.wrapping_mul(key).wrapping_add(b) % HASH_PRIME) % size
}

/// A vocabulary in the two-level perfect hash table format.
#[derive(Clone, Debug)]
pub struct HashedVocabulary {
    outer_hash_a: u64,
    outer_hash_b: u64,
    bin_coefficients: Vec<u64>,
    bin_offsets: Vec<u64>,
    table: Vec<u64>,
    unk_token_id: u32,
    cls_token_id: u32,
    sep_token_id: u32,
    continuation_state: u64,
}

impl HashedVocabulary {
    /// Loads a hashed vocabulary file.
    ///
    /// The file must be pre-hashed. A plain `vocab.txt` file is rejected with
    /// `InvalidVocabulary`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        contents.parse().chain_err(|| {
            ErrorKind::InvalidVocabulary(format!("Failed to parse {}", path.display()))
        })
    }

    pub fn num_bins(&self) -> usize {
        self.bin_coefficients.len()
    }

    /// Number of slots in the hash table.
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn unk_token_id(&self) -> u32 {
        self.unk_token_id
    }

    pub fn cls_token_id(&self) -> u32 {
        self.cls_token_id
    }

    pub fn sep_token_id(&self) -> u32 {
        self.sep_token_id
    }

    /// Number of 64-bit words occupied on the device.
    pub(crate) fn device_words(&self) -> usize {
        self.table.len() + self.bin_coefficients.len() + self.bin_offsets.len()
    }

    /// Looks up a word piece.
    ///
    /// `chars` is the piece without prefix. A continuation piece is hashed as
    /// if it were prefixed with `##`.
    #[inline]
    pub fn lookup_piece(&self, chars: &[char], is_continuation: bool) -> Option<u32> {
        let state = if is_continuation {
            self.continuation_state
        } else {
            0
        };
        let key = sdbm_hash(state, chars.iter().copied()) & TOKEN_HASH_MASK;

        self.lookup(key)
    }

    /// Looks up a token by its 48-bit hash key.
    ///
    /// Returns `None` if the token is not in the vocabulary.
    pub fn lookup(&self, key: u64) -> Option<u32> {
        let bin = universal_hash(
            self.outer_hash_a,
            self.outer_hash_b,
            key,
            self.bin_coefficients.len() as u64,
        ) as usize;

        let coefficient = *self.bin_coefficients.get(bin)?;
        let bin_size = coefficient & MAX_BIN_SIZE;
        if bin_size == 0 {
            return None;
        }
        let inner_a = coefficient >> 16;
        let inner_b = (coefficient >> 9) & 0x7f;
        let slot = self.bin_offsets[bin] + universal_hash(inner_a, inner_b, key, bin_size);

        let entry = *self.table.get(slot as usize)?;
        if entry >> TOKEN_ID_BITS == key {
            Some((entry & TOKEN_ID_MASK) as u32)
        } else {
            None
        }
    }
}

struct VocabularyTokens<'s> {
    tokens: SplitWhitespace<'s>,
    position: usize,
}

impl<'s> VocabularyTokens<'s> {
    fn next_u64(&mut self, what: &str) -> Result<u64> {
        self.position += 1;
        let token = self.tokens.next().ok_or_else(|| {
            ErrorKind::InvalidVocabulary(format!(
                "Unexpected end of file, expected {} at token {}",
                what, self.position
            ))
        })?;

        token.parse::<u64>().chain_err(|| {
            ErrorKind::InvalidVocabulary(format!(
                "Expected {} at token {}, but found '{}'",
                what, self.position, token
            ))
        })
    }

    fn next_len(&mut self, what: &str) -> Result<usize> {
        let value = self.next_u64(what)?;
        if value > u32::MAX as u64 {
            Err(ErrorKind::InvalidVocabulary(format!(
                "{} is too large: {}",
                what, value
            )))?;
        }

        Ok(value as usize)
    }

    fn next_token_id(&mut self, what: &str) -> Result<u32> {
        let value = self.next_u64(what)?;
        if value > TOKEN_ID_MASK {
            Err(ErrorKind::InvalidVocabulary(format!(
                "{} {} exceeds {} bits",
                what, value, TOKEN_ID_BITS
            )))?;
        }

        Ok(value as u32)
    }
}

impl FromStr for HashedVocabulary {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut tokens = VocabularyTokens {
            tokens: s.split_whitespace(),
            position: 0,
        };

        let outer_hash_a = tokens.next_u64("outer hash parameter a")?;
        let outer_hash_b = tokens.next_u64("outer hash parameter b")?;
        let num_bins = tokens.next_len("number of bins")?;
        if num_bins == 0 {
            Err(ErrorKind::InvalidVocabulary(
                "The hash table must have at least one bin".to_string(),
            ))?;
        }

        // Lengths are read from the file, thus grow the tables as entries arrive
        let mut bin_coefficients = Vec::new();
        let mut bin_offsets = Vec::new();
        for _ in 0..num_bins {
            bin_coefficients.push(tokens.next_u64("bin coefficient")?);
            bin_offsets.push(tokens.next_u64("bin offset")?);
        }

        let table_len = tokens.next_len("hash table length")?;
        let mut table = Vec::new();
        for _ in 0..table_len {
            table.push(tokens.next_u64("hash table entry")?);
        }

        for (bin, (&coefficient, &offset)) in bin_coefficients.iter().zip(&bin_offsets).enumerate() {
            let end = offset
                .checked_add(coefficient & MAX_BIN_SIZE)
                .ok_or_else(|| {
                    ErrorKind::InvalidVocabulary(format!(
                        "Bin {} offset {} overflows the hash table",
                        bin, offset
                    ))
                })?;
            if end > table_len as u64 {
                Err(ErrorKind::InvalidVocabulary(format!(
                    "Bin {} spans slots {}..{}, but the table has {} slots",
                    bin, offset, end, table_len
                )))?;
            }
        }

        let unk_token_id = tokens.next_token_id("unknown token id")?;
        let cls_token_id = tokens.next_token_id("classification token id")?;
        let sep_token_id = tokens.next_token_id("separator token id")?;

        if let Some(trailing) = tokens.tokens.next() {
            Err(ErrorKind::InvalidVocabulary(format!(
                "Unexpected trailing token '{}'",
                trailing
            )))?;
        }

        Ok(Self {
            outer_hash_a,
            outer_hash_b,
            bin_coefficients,
            bin_offsets,
            table,
            unk_token_id,
            cls_token_id,
            sep_token_id,
            continuation_state: sdbm_hash(0, CONTINUATION_PREFIX.chars()),
        })
    }
}
