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

//! Device-wide exclusive prefix sum.
//!
//! The scan runs in three phases. First, each thread sums a chunk of the
//! input. Second, the host scans the chunk aggregates. Third, each thread
//! scans its chunk starting from the chunk's prefix.

use num_traits::{PrimInt, Unsigned};
use tracing::trace;

use crate::error::{ErrorKind, Result};
use crate::runtime::device::Device;
use crate::runtime::launch::{BlockSize, LaunchConfig};
use crate::runtime::memory::{DeviceBuffer, DeviceCounter, LaunchableMutSlice};

const DEFAULT_BLOCK_SIZE: u32 = 128;
const DEFAULT_ITEMS_PER_THREAD: usize = 256;

#[derive(Clone, Copy, Debug)]
pub struct GpuPrefixSum {
    block_size: BlockSize,
    items_per_thread: usize,
}

impl Default for GpuPrefixSum {
    fn default() -> Self {
        Self {
            block_size: BlockSize::x(DEFAULT_BLOCK_SIZE),
            items_per_thread: DEFAULT_ITEMS_PER_THREAD,
        }
    }
}

impl GpuPrefixSum {
    pub fn new(block_size: BlockSize, items_per_thread: usize) -> Result<Self> {
        if items_per_thread == 0 {
            Err(ErrorKind::InvalidArgument(
                "Items per thread must be greater than zero".to_string(),
            ))?;
        }

        Ok(Self {
            block_size,
            items_per_thread,
        })
    }

    /// Writes the exclusive prefix sum of `input` into `output`.
    ///
    /// Returns the sum of all items.
    pub fn exclusive_scan<T>(&self, device: &Device, input: &[T], output: &mut [T]) -> Result<T>
    where
        T: PrimInt + Unsigned + Default + Send + Sync,
    {
        if input.len() != output.len() {
            Err(ErrorKind::InvalidArgument(format!(
                "Scan input has length {}, but output has length {}",
                input.len(),
                output.len()
            )))?;
        }
        if input.is_empty() {
            return Ok(T::zero());
        }

        let chunk_len = self.items_per_thread;
        let num_chunks = (input.len() + chunk_len - 1) / chunk_len;
        let config = LaunchConfig::for_len(num_chunks, self.block_size)?;
        trace!(len = input.len(), num_chunks, "Prefix scan");

        let overflow = DeviceCounter::new(device)?;
        let mut aggregates = DeviceBuffer::<T>::zeroed(device, num_chunks)?;
        {
            let aggregates = aggregates.as_launchable_mut_slice();
            device.launch("chunk_aggregate", config, |tid| {
                let chunk = tid.global();
                if chunk >= num_chunks {
                    return;
                }
                let begin = chunk * chunk_len;
                let end = (begin + chunk_len).min(input.len());

                let sum = input[begin..end]
                    .iter()
                    .try_fold(T::zero(), |sum, &item| sum.checked_add(&item));
                let sum = sum.unwrap_or_else(|| {
                    overflow.increment();
                    T::zero()
                });

                unsafe { aggregates.write(chunk, sum) };
            })?;
        }

        if overflow.load() != 0 {
            Err(ErrorKind::IntegerOverflow(
                "Prefix sum exceeds the item type".to_string(),
            ))?;
        }

        let mut total = T::zero();
        for aggregate in aggregates.iter_mut() {
            let prefix = total;
            total = total.checked_add(&*aggregate).ok_or_else(|| {
                ErrorKind::IntegerOverflow("Prefix sum exceeds the item type".to_string())
            })?;
            *aggregate = prefix;
        }

        let prefixes = aggregates.as_slice();
        let output = LaunchableMutSlice::new(output);
        device.launch("chunk_exclusive_scan", config, |tid| {
            let chunk = tid.global();
            if chunk >= num_chunks {
                return;
            }
            let begin = chunk * chunk_len;
            let end = (begin + chunk_len).min(input.len());

            let mut sum = prefixes[chunk];
            for i in begin..end {
                unsafe { output.write(i, sum) };
                sum = sum + input[i];
            }
        })?;

        Ok(total)
    }

    /// Scans `counts` into an offsets array of length `counts.len() + 1`.
    ///
    /// The last offset is the total count.
    pub fn offsets<T>(&self, device: &Device, counts: &[T]) -> Result<DeviceBuffer<T>>
    where
        T: PrimInt + Unsigned + Default + Send + Sync,
    {
        let mut offsets = DeviceBuffer::<T>::zeroed(device, counts.len() + 1)?;
        let total = self.exclusive_scan(device, counts, &mut offsets[..counts.len()])?;
        offsets[counts.len()] = total;

        Ok(offsets)
    }
}
