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

//! Transposes row pairs into separate left and right index arrays.

use gpu_runtime::runtime::device::Device;
use gpu_runtime::runtime::launch::{BlockSize, LaunchConfig};
use gpu_runtime::runtime::memory::DeviceBuffer;

use super::join_key::RowIndex;
use super::JoinPair;
use crate::error::Result;

/// Writes `n` pairs into one buffer of length `2 * n`.
///
/// The first half holds the left row indices, the second half the right row
/// indices. If `flip` is set, the pairs store `(right, left)` and are swapped
/// back.
pub fn pairs_to_decoupled<S: RowIndex>(
    device: &Device,
    pairs: &[JoinPair<S>],
    flip: bool,
    block_size: BlockSize,
) -> Result<DeviceBuffer<S>> {
    let len = pairs.len();
    let mut decoupled = DeviceBuffer::<S>::zeroed(device, 2 * len)?;
    if len == 0 {
        return Ok(decoupled);
    }

    let config = LaunchConfig::for_len(len, block_size)?;
    let out = decoupled.as_launchable_mut_slice();

    device.launch("pairs_to_decoupled", config, |tid| {
        let i = tid.global();
        if i >= len {
            return;
        }

        let pair = pairs[i];
        let (left, right) = if flip {
            (pair.second, pair.first)
        } else {
            (pair.first, pair.second)
        };

        // Safety: thread i exclusively owns slots i and i + len.
        unsafe {
            out.write(i, left);
            out.write(i + len, right);
        }
    })?;

    Ok(decoupled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_runtime::runtime::device::DeviceBuilder;

    fn pairs() -> Vec<JoinPair<u32>> {
        vec![
            JoinPair { first: 0, second: 5 },
            JoinPair { first: 1, second: 6 },
            JoinPair { first: 2, second: 7 },
        ]
    }

    #[test]
    fn keeps_order_without_flip() {
        let device = DeviceBuilder::default().build().unwrap();

        let out = pairs_to_decoupled(&device, &pairs(), false, BlockSize::x(2)).unwrap();

        assert_eq!(out.as_slice(), &[0, 1, 2, 5, 6, 7]);
    }

    #[test]
    fn swaps_halves_with_flip() {
        let device = DeviceBuilder::default().build().unwrap();

        let out = pairs_to_decoupled(&device, &pairs(), true, BlockSize::x(2)).unwrap();

        assert_eq!(out.as_slice(), &[5, 6, 7, 0, 1, 2]);
    }

    #[test]
    fn empty_input() {
        let device = DeviceBuilder::default().build().unwrap();

        let out = pairs_to_decoupled::<u64>(&device, &[], true, BlockSize::x(2)).unwrap();

        assert!(out.is_empty());
    }
}
