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

//! Arranges token ids into a fixed-width tensor.
//!
//! Each string occupies one or more rows of `max_sequence_length` token ids.
//! Rows are padded with zeros, and the attention mask marks the valid token
//! ids with 1. A string that does not fit into a single row continues in the
//! next row, which starts `stride` tokens after the start of the previous
//! row.
//!
//! The metadata tensor holds three values per row: the index of the string,
//! and the first and last token position within the row that are not
//! duplicated from an overlapping row.

use gpu_runtime::prefix_scan::GpuPrefixSum;
use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::launch::{BlockSize, LaunchConfig};
use gpu_runtime::runtime::memory::DeviceBuffer;
use tracing::debug;

use crate::error::{ErrorKind, Result};
use crate::wordpiece::TokenIds;

/// Number of metadata values per row.
pub const METADATA_COLUMNS: usize = 3;

#[derive(Clone, Copy, Debug)]
pub(crate) struct TensorLayout {
    pub(crate) max_sequence_length: usize,
    pub(crate) stride: usize,
    pub(crate) do_truncate: bool,
    pub(crate) max_rows: usize,
}

impl TensorLayout {
    /// Number of rows occupied by a string with `num_tokens` token ids.
    pub(crate) fn rows_for(&self, num_tokens: usize) -> usize {
        if num_tokens <= self.max_sequence_length || self.do_truncate {
            1
        } else {
            let remaining = num_tokens - self.max_sequence_length;
            1 + (remaining + self.stride - 1) / self.stride
        }
    }
}

/// The tokenizer output in tensor form.
#[derive(Debug)]
pub struct TokenizerResult {
    nrows_tensor: usize,
    sequence_length: usize,
    tensor_token_ids: DeviceBuffer<u32>,
    tensor_attention_mask: DeviceBuffer<u32>,
    tensor_metadata: DeviceBuffer<u32>,
}

impl TokenizerResult {
    pub fn nrows_tensor(&self) -> usize {
        self.nrows_tensor
    }

    /// Number of columns of the token id and attention mask tensors.
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Row-major token ids, `nrows_tensor * sequence_length` values.
    pub fn tensor_token_ids(&self) -> &[u32] {
        self.tensor_token_ids.as_slice()
    }

    pub fn tensor_attention_mask(&self) -> &[u32] {
        self.tensor_attention_mask.as_slice()
    }

    /// Row-major `[string_index, first, last]` triples.
    pub fn tensor_metadata(&self) -> &[u32] {
        self.tensor_metadata.as_slice()
    }

    pub fn row_token_ids(&self, row: usize) -> Option<&[u32]> {
        let begin = row.checked_mul(self.sequence_length)?;
        self.tensor_token_ids
            .get(begin..begin.checked_add(self.sequence_length)?)
    }

    pub fn row_metadata(&self, row: usize) -> Option<&[u32]> {
        let begin = row.checked_mul(METADATA_COLUMNS)?;
        self.tensor_metadata.get(begin..begin + METADATA_COLUMNS)
    }
}

pub(crate) fn build_tensor(
    device: &Device,
    block_size: BlockSize,
    tokens: &TokenIds,
    layout: &TensorLayout,
) -> Result<TokenizerResult> {
    let num_strings = tokens.num_strings();
    let sequence_length = layout.max_sequence_length;
    let stride = layout.stride;
    let token_offsets = tokens.offsets();
    let token_ids = tokens.token_ids();
    let config = LaunchConfig::for_len(num_strings, block_size)?;

    let mut row_counts = DeviceBuffer::<u32>::zeroed(device, num_strings)?;
    {
        let row_counts = row_counts.as_launchable_mut_slice();
        device.launch("count_tensor_rows", config, |tid| {
            let i = tid.global();
            if i >= num_strings {
                return;
            }

            let num_tokens = (token_offsets[i + 1] - token_offsets[i]) as usize;
            unsafe { row_counts.write(i, layout.rows_for(num_tokens) as u32) };
        })?;
    }

    let row_offsets = GpuPrefixSum::default().offsets(device, &row_counts)?;
    drop(row_counts);

    let nrows_tensor = row_offsets[num_strings] as usize;
    if nrows_tensor > layout.max_rows {
        Err(ErrorKind::InvalidArgument(format!(
            "Tensor needs {} rows, but the tokenizer supports at most {}",
            nrows_tensor, layout.max_rows
        )))?;
    }

    let tensor_len = nrows_tensor
        .checked_mul(sequence_length)
        .ok_or_else(|| ErrorKind::IntegerOverflow("Tensor size overflows".to_string()))?;
    let mut tensor_token_ids = DeviceBuffer::<u32>::zeroed(device, tensor_len)?;
    let mut tensor_attention_mask = DeviceBuffer::<u32>::zeroed(device, tensor_len)?;
    let mut tensor_metadata = DeviceBuffer::<u32>::zeroed(device, nrows_tensor * METADATA_COLUMNS)?;
    {
        let ids_out = tensor_token_ids.as_launchable_mut_slice();
        let mask_out = tensor_attention_mask.as_launchable_mut_slice();
        let metadata_out = tensor_metadata.as_launchable_mut_slice();
        let row_offsets = row_offsets.as_slice();

        device.launch("fill_tensor", config, |tid| {
            let i = tid.global();
            if i >= num_strings {
                return;
            }

            let string_tokens =
                &token_ids[token_offsets[i] as usize..token_offsets[i + 1] as usize];
            let num_tokens = string_tokens.len();
            let first_row = row_offsets[i] as usize;
            let num_rows = row_offsets[i + 1] as usize - first_row;

            for r in 0..num_rows {
                let row = first_row + r;
                let start = r * stride;
                let end = (start + sequence_length).min(num_tokens);

                for (j, &id) in string_tokens[start.min(end)..end].iter().enumerate() {
                    unsafe {
                        ids_out.write(row * sequence_length + j, id);
                        mask_out.write(row * sequence_length + j, 1);
                    }
                }

                let first = if r == 0 { 0 } else { sequence_length - stride };
                let last = (end.saturating_sub(start)).saturating_sub(1);
                let metadata = [i as u32, first as u32, last as u32];
                for (k, &value) in metadata.iter().enumerate() {
                    unsafe { metadata_out.write(row * METADATA_COLUMNS + k, value) };
                }
            }
        })?;
    }

    debug!(nrows_tensor, sequence_length, "Built token tensor");

    Ok(TokenizerResult {
        nrows_tensor,
        sequence_length,
        tensor_token_ids,
        tensor_attention_mask,
        tensor_metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_runtime::runtime::device::DeviceBuilder;

    fn layout(max_sequence_length: usize, stride: usize, do_truncate: bool) -> TensorLayout {
        TensorLayout {
            max_sequence_length,
            stride,
            do_truncate,
            max_rows: 100,
        }
    }

    fn token_ids(device: &Device, strings: &[&[u32]]) -> TokenIds {
        let mut offsets = vec![0_u32];
        let mut ids = Vec::new();
        for s in strings {
            ids.extend_from_slice(s);
            offsets.push(ids.len() as u32);
        }

        TokenIds::new(
            DeviceBuffer::from_slice(device, &ids).unwrap(),
            DeviceBuffer::from_slice(device, &offsets).unwrap(),
        )
    }

    #[test]
    fn rows_for_lengths() {
        let continued = layout(4, 2, false);
        assert_eq!(continued.rows_for(0), 1);
        assert_eq!(continued.rows_for(4), 1);
        assert_eq!(continued.rows_for(5), 2);
        assert_eq!(continued.rows_for(6), 2);
        assert_eq!(continued.rows_for(7), 3);

        let truncated = layout(4, 2, true);
        assert_eq!(truncated.rows_for(100), 1);
    }

    #[test]
    fn short_strings_are_padded() {
        let device = DeviceBuilder::default().workers(2).build().unwrap();
        let tokens = token_ids(&device, &[&[1, 2], &[], &[3, 4, 5, 6]]);

        let result = build_tensor(&device, BlockSize::x(2), &tokens, &layout(4, 2, false)).unwrap();

        assert_eq!(result.nrows_tensor(), 3);
        assert_eq!(result.tensor_token_ids(), &[1, 2, 0, 0, 0, 0, 0, 0, 3, 4, 5, 6]);
        assert_eq!(result.tensor_attention_mask(), &[1, 1, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(result.tensor_metadata(), &[0, 0, 1, 1, 0, 0, 2, 0, 3]);
    }

    #[test]
    fn long_strings_overlap_by_stride() {
        let device = DeviceBuilder::default().workers(2).build().unwrap();
        let tokens = token_ids(&device, &[&[1, 2, 3, 4, 5, 6, 7]]);

        let result = build_tensor(&device, BlockSize::x(2), &tokens, &layout(4, 2, false)).unwrap();

        assert_eq!(result.nrows_tensor(), 3);
        assert_eq!(result.row_token_ids(0), Some(&[1, 2, 3, 4][..]));
        assert_eq!(result.row_token_ids(1), Some(&[3, 4, 5, 6][..]));
        assert_eq!(result.row_token_ids(2), Some(&[5, 6, 7, 0][..]));
        assert_eq!(result.row_metadata(0), Some(&[0, 0, 3][..]));
        assert_eq!(result.row_metadata(1), Some(&[0, 2, 3][..]));
        assert_eq!(result.row_metadata(2), Some(&[0, 2, 2][..]));
        assert_eq!(result.row_token_ids(3), None);
    }

    #[test]
    fn truncation_drops_tail() {
        let device = DeviceBuilder::default().workers(2).build().unwrap();
        let tokens = token_ids(&device, &[&[1, 2, 3, 4, 5, 6, 7], &[8]]);

        let result = build_tensor(&device, BlockSize::x(2), &tokens, &layout(4, 2, true)).unwrap();

        assert_eq!(result.nrows_tensor(), 2);
        assert_eq!(result.tensor_token_ids(), &[1, 2, 3, 4, 8, 0, 0, 0]);
        assert_eq!(result.tensor_metadata(), &[0, 0, 3, 1, 0, 0]);
    }

    #[test]
    fn too_many_rows_fail() {
        let device = DeviceBuilder::default().workers(2).build().unwrap();
        let tokens = token_ids(&device, &[&[1, 2, 3, 4, 5, 6, 7]]);
        let mut small = layout(4, 2, false);
        small.max_rows = 2;

        let error = build_tensor(&device, BlockSize::x(2), &tokens, &small).unwrap_err();
        match error.kind() {
            ErrorKind::InvalidArgument(_) => {}
            other => panic!("Unexpected error: {}", other),
        }
    }
}
