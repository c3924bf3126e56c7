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

//! The WordPiece tokenizer.
//!
//! Each word is split greedily into the longest word pieces found in the
//! vocabulary. All pieces after the first are continuation pieces (`##`
//! prefix). If any part of a word cannot be matched, the whole word becomes
//! the unknown token.

use gpu_runtime::prefix_scan::GpuPrefixSum;
use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::launch::{BlockSize, LaunchConfig};
use gpu_runtime::runtime::memory::{DeviceBuffer, DeviceCounter, Reservation};
use tracing::debug;

use std::path::Path;

use crate::error::{ErrorKind, Result};
use crate::normalizer::{BasicNormalizer, Normalizer};
use crate::tensor::{self, TensorLayout, TokenizerResult};
use crate::vocabulary::HashedVocabulary;

/// Token ids of a batch of strings.
///
/// The token ids of string `i` are located at
/// `token_ids[offsets[i]..offsets[i + 1]]`.
#[derive(Debug)]
pub struct TokenIds {
    token_ids: DeviceBuffer<u32>,
    offsets: DeviceBuffer<u32>,
}

impl TokenIds {
    pub(crate) fn new(token_ids: DeviceBuffer<u32>, offsets: DeviceBuffer<u32>) -> Self {
        Self { token_ids, offsets }
    }

    pub fn num_strings(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn token_ids(&self) -> &[u32] {
        self.token_ids.as_slice()
    }

    /// Token offsets per string, with a trailing total.
    pub fn offsets(&self) -> &[u32] {
        self.offsets.as_slice()
    }

    /// Returns the token ids of string `i`, or `None` if `i` is out of bounds.
    pub fn string_tokens(&self, i: usize) -> Option<&[u32]> {
        let begin = *self.offsets.get(i)? as usize;
        let end = *self.offsets.get(i + 1)? as usize;
        self.token_ids.get(begin..end)
    }

    /// Returns `(token_ids, token_id_offsets)`.
    pub fn into_parts(self) -> (DeviceBuffer<u32>, DeviceBuffer<u32>) {
        (self.token_ids, self.offsets)
    }
}

#[derive(Clone, Debug)]
pub struct WordPieceTokenizerBuilder {
    max_num_strings: usize,
    max_num_chars: usize,
    max_rows_final_tensor: usize,
    max_sequence_length: usize,
    stride: usize,
    do_truncate: bool,
    do_lower_case: bool,
    max_word_length: usize,
    block_size: BlockSize,
}

impl Default for WordPieceTokenizerBuilder {
    fn default() -> Self {
        Self {
            max_num_strings: 1024,
            max_num_chars: 1 << 20,
            max_rows_final_tensor: 4096,
            max_sequence_length: 64,
            stride: 48,
            do_truncate: false,
            do_lower_case: true,
            max_word_length: 200,
            block_size: BlockSize::x(64),
        }
    }
}

impl WordPieceTokenizerBuilder {
    /// Maximum number of strings per batch.
    pub fn max_num_strings(mut self, max_num_strings: usize) -> Self {
        self.max_num_strings = max_num_strings;
        self
    }

    /// Maximum number of bytes per batch.
    pub fn max_num_chars(mut self, max_num_chars: usize) -> Self {
        self.max_num_chars = max_num_chars;
        self
    }

    /// Maximum number of rows in the output tensor.
    pub fn max_rows_final_tensor(mut self, max_rows: usize) -> Self {
        self.max_rows_final_tensor = max_rows;
        self
    }

    /// Number of token ids per tensor row.
    pub fn max_sequence_length(mut self, max_sequence_length: usize) -> Self {
        self.max_sequence_length = max_sequence_length;
        self
    }

    /// Number of token ids by which consecutive rows of a string advance.
    ///
    /// Each row repeats the last `max_sequence_length - stride` token ids of
    /// the previous row of the same string.
    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    /// Discard token ids beyond `max_sequence_length` instead of continuing
    /// in a new row.
    pub fn do_truncate(mut self, do_truncate: bool) -> Self {
        self.do_truncate = do_truncate;
        self
    }

    /// Lowercase the input and strip accents.
    pub fn do_lower_case(mut self, do_lower_case: bool) -> Self {
        self.do_lower_case = do_lower_case;
        self
    }

    /// Words with more characters map to the unknown token.
    pub fn max_word_length(mut self, max_word_length: usize) -> Self {
        self.max_word_length = max_word_length;
        self
    }

    pub fn block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Loads the vocabulary from a pre-hashed file and builds the tokenizer.
    pub fn build_from_file<'d>(
        self,
        device: &'d Device,
        path: &Path,
    ) -> Result<WordPieceTokenizer<'d>> {
        let vocabulary = HashedVocabulary::from_file(path)?;
        self.build(device, vocabulary)
    }

    pub fn build<'d>(
        self,
        device: &'d Device,
        vocabulary: HashedVocabulary,
    ) -> Result<WordPieceTokenizer<'d>> {
        let max_u32 = u32::MAX as usize;

        if self.max_sequence_length == 0 || self.max_sequence_length > max_u32 {
            Err(ErrorKind::InvalidArgument(format!(
                "Max sequence length must be in 1..={}, but is {}",
                max_u32, self.max_sequence_length
            )))?;
        }
        if self.stride == 0 || self.stride > self.max_sequence_length {
            Err(ErrorKind::InvalidArgument(format!(
                "Stride must be in 1..={}, but is {}",
                self.max_sequence_length, self.stride
            )))?;
        }
        if self.max_num_strings >= max_u32 || self.max_num_chars > max_u32 {
            Err(ErrorKind::InvalidArgument(
                "Max strings and chars must fit into 32-bit offsets".to_string(),
            ))?;
        }
        if self.max_word_length == 0 {
            Err(ErrorKind::InvalidArgument(
                "Max word length must be greater than zero".to_string(),
            ))?;
        }
        self.max_rows_final_tensor
            .checked_mul(self.max_sequence_length)
            .ok_or_else(|| {
                ErrorKind::IntegerOverflow("Tensor size overflows".to_string())
            })?;

        let vocabulary_memory = Reservation::for_items::<u64>(device, vocabulary.device_words())?;

        debug!(
            bins = vocabulary.num_bins(),
            table_len = vocabulary.table_len(),
            max_num_strings = self.max_num_strings,
            max_num_chars = self.max_num_chars,
            "Loaded hashed vocabulary"
        );

        Ok(WordPieceTokenizer {
            device,
            vocabulary,
            normalizer: BasicNormalizer::new(self.do_lower_case),
            max_num_strings: self.max_num_strings,
            max_num_chars: self.max_num_chars,
            max_word_length: self.max_word_length,
            block_size: self.block_size,
            layout: TensorLayout {
                max_sequence_length: self.max_sequence_length,
                stride: self.stride,
                do_truncate: self.do_truncate,
                max_rows: self.max_rows_final_tensor,
            },
            _vocabulary_memory: vocabulary_memory,
        })
    }
}

/// Splits strings into WordPiece token ids on a device.
#[derive(Debug)]
pub struct WordPieceTokenizer<'d> {
    device: &'d Device,
    vocabulary: HashedVocabulary,
    normalizer: BasicNormalizer,
    max_num_strings: usize,
    max_num_chars: usize,
    max_word_length: usize,
    block_size: BlockSize,
    layout: TensorLayout,
    _vocabulary_memory: Reservation,
}

impl<'d> WordPieceTokenizer<'d> {
    pub fn vocabulary(&self) -> &HashedVocabulary {
        &self.vocabulary
    }

    /// Splits the input strings into token ids.
    ///
    /// `strings` contains the UTF-8 encoded strings back to back, and string
    /// `i` spans the bytes `offsets[i]..offsets[i + 1]`. Invalid UTF-8 is
    /// decoded lossily.
    pub fn tokenize(&self, strings: &[u8], offsets: &[u32], num_strings: usize) -> Result<TokenIds> {
        self.check_input(strings, offsets, num_strings)?;

        if num_strings == 0 {
            return Ok(TokenIds::new(
                DeviceBuffer::zeroed(self.device, 0)?,
                DeviceBuffer::zeroed(self.device, 1)?,
            ));
        }

        let string_at = |i: usize| &strings[offsets[i] as usize..offsets[i + 1] as usize];
        let config = LaunchConfig::for_len(num_strings, self.block_size)?;
        let overflow = DeviceCounter::new(self.device)?;

        let mut counts = DeviceBuffer::<u32>::zeroed(self.device, num_strings)?;
        {
            let counts = counts.as_launchable_mut_slice();
            self.device.launch("count_tokens", config, |tid| {
                let i = tid.global();
                if i >= num_strings {
                    return;
                }

                let mut count = 0_usize;
                self.tokenize_string(string_at(i), |_| count += 1);

                if count > u32::MAX as usize {
                    overflow.increment();
                } else {
                    unsafe { counts.write(i, count as u32) };
                }
            })?;
        }

        if overflow.load() != 0 {
            Err(ErrorKind::IntegerOverflow(
                "Token count of a string exceeds 32 bits".to_string(),
            ))?;
        }

        let token_offsets = GpuPrefixSum::default().offsets(self.device, &counts)?;
        drop(counts);

        let total = token_offsets[num_strings] as usize;
        let mut token_ids = DeviceBuffer::<u32>::zeroed(self.device, total)?;
        {
            let token_ids = token_ids.as_launchable_mut_slice();
            let token_offsets = token_offsets.as_slice();
            self.device.launch("write_token_ids", config, |tid| {
                let i = tid.global();
                if i >= num_strings {
                    return;
                }

                let mut position = token_offsets[i] as usize;
                self.tokenize_string(string_at(i), |id| {
                    unsafe { token_ids.write(position, id) };
                    position += 1;
                });
            })?;
        }

        debug!(num_strings, tokens = total, "Tokenized strings");

        Ok(TokenIds::new(token_ids, token_offsets))
    }

    /// Splits the input strings into token ids, and arranges the token ids
    /// into a tensor with `max_sequence_length` columns.
    ///
    /// Strings with more tokens than fit into a row are truncated, or
    /// continued in the next row, depending on `do_truncate`.
    pub fn subword_tokenize(
        &self,
        strings: &[u8],
        offsets: &[u32],
        num_strings: usize,
    ) -> Result<TokenizerResult> {
        let tokens = self.tokenize(strings, offsets, num_strings)?;
        tensor::build_tensor(self.device, self.block_size, &tokens, &self.layout)
    }

    fn check_input(&self, strings: &[u8], offsets: &[u32], num_strings: usize) -> Result<()> {
        if num_strings > self.max_num_strings {
            Err(ErrorKind::InvalidArgument(format!(
                "Got {} strings, but the tokenizer supports at most {}",
                num_strings, self.max_num_strings
            )))?;
        }
        if offsets.len() <= num_strings {
            Err(ErrorKind::InvalidArgument(format!(
                "Expected {} offsets, but got {}",
                num_strings + 1,
                offsets.len()
            )))?;
        }

        let offsets = &offsets[..=num_strings];
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            Err(ErrorKind::InvalidArgument(
                "String offsets must not decrease".to_string(),
            ))?;
        }

        let first = offsets[0] as usize;
        let last = offsets[num_strings] as usize;
        if last > strings.len() {
            Err(ErrorKind::InvalidArgument(format!(
                "String offset {} is beyond the input of {} bytes",
                last,
                strings.len()
            )))?;
        }
        if last - first > self.max_num_chars {
            Err(ErrorKind::InvalidArgument(format!(
                "Got {} bytes, but the tokenizer supports at most {}",
                last - first,
                self.max_num_chars
            )))?;
        }

        Ok(())
    }

    fn tokenize_string<F>(&self, text: &[u8], mut emit: F)
    where
        F: FnMut(u32),
    {
        let text = String::from_utf8_lossy(text);
        let mut normalized = String::with_capacity(text.len());
        self.normalizer.normalize(&text, &mut normalized);

        let mut word = Vec::new();
        let mut pieces = Vec::new();
        for w in normalized.split_whitespace() {
            word.clear();
            word.extend(w.chars());
            self.tokenize_word(&word, &mut pieces, &mut emit);
        }
    }

    fn tokenize_word<F>(&self, word: &[char], pieces: &mut Vec<u32>, emit: &mut F)
    where
        F: FnMut(u32),
    {
        let unk = self.vocabulary.unk_token_id();
        if word.len() > self.max_word_length {
            emit(unk);
            return;
        }

        pieces.clear();
        let mut start = 0;
        while start < word.len() {
            let is_continuation = start > 0;
            let piece = (start + 1..=word.len()).rev().find_map(|end| {
                self.vocabulary
                    .lookup_piece(&word[start..end], is_continuation)
                    .map(|id| (end, id))
            });

            match piece {
                Some((end, id)) => {
                    pieces.push(id);
                    start = end;
                }
                None => {
                    emit(unk);
                    return;
                }
            }
        }

        pieces.iter().for_each(|&id| emit(id));
    }
}

/// Tokenizes strings with a default-configured tokenizer.
///
/// Returns `(token_ids, token_id_offsets)`.
pub fn tokenize(
    device: &Device,
    vocabulary: HashedVocabulary,
    strings: &[u8],
    offsets: &[u32],
    num_strings: usize,
) -> Result<(DeviceBuffer<u32>, DeviceBuffer<u32>)> {
    let tokenizer = WordPieceTokenizerBuilder::default()
        .max_num_strings(num_strings.max(1))
        .max_num_chars(strings.len())
        .build(device, vocabulary)?;

    Ok(tokenizer.tokenize(strings, offsets, num_strings)?.into_parts())
}
