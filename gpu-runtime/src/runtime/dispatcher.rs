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

use std::cmp;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out ranges of thread blocks to the workers of a device.
///
/// Workers race for the next morsel of blocks, which balances the load when
/// some blocks take longer than others (e.g., probing a skewed key).
pub(super) struct BlockDispatcher {
    offset: AtomicUsize,
    grid_len: usize,
    morsel_len: usize,
}

impl BlockDispatcher {
    pub(super) fn new(grid_len: usize, morsel_len: usize) -> Self {
        let offset = AtomicUsize::new(0);

        Self {
            offset,
            grid_len,
            morsel_len: cmp::max(morsel_len, 1),
        }
    }

    pub(super) fn dispatch(&self) -> Option<Range<usize>> {
        let morsel = self.offset.fetch_add(self.morsel_len, Ordering::Relaxed);
        if morsel >= self.grid_len {
            return None;
        }
        let morsel_len = cmp::min(self.grid_len - morsel, self.morsel_len);

        Some(Range {
            start: morsel,
            end: morsel + morsel_len,
        })
    }
}
