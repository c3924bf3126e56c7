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

//! Launch geometry of a kernel grid.

use std::convert::TryFrom;
use std::fmt;

use crate::error::{ErrorKind, Result};

/// Number of thread blocks in a grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridSize {
    pub x: u32,
}

impl GridSize {
    pub fn x(x: u32) -> Self {
        Self { x }
    }
}

impl From<u32> for GridSize {
    fn from(x: u32) -> Self {
        Self { x }
    }
}

/// Number of threads in a block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockSize {
    pub x: u32,
}

impl BlockSize {
    pub fn x(x: u32) -> Self {
        Self { x }
    }
}

impl From<u32> for BlockSize {
    fn from(x: u32) -> Self {
        Self { x }
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.x)
    }
}

/// Identifies the executing thread inside a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadIndex {
    pub block_idx: u32,
    pub thread_idx: u32,
    pub block_dim: u32,
    pub grid_dim: u32,
}

impl ThreadIndex {
    /// The global thread ID, i.e., `blockIdx.x * blockDim.x + threadIdx.x`.
    pub fn global(&self) -> usize {
        self.block_idx as usize * self.block_dim as usize + self.thread_idx as usize
    }

    /// The total number of threads in the grid.
    pub fn grid_threads(&self) -> usize {
        self.grid_dim as usize * self.block_dim as usize
    }
}

/// The grid and block dimensions of a kernel launch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: GridSize,
    pub block: BlockSize,
}

impl LaunchConfig {
    /// Computes a configuration with one thread per item.
    ///
    /// The grid contains at least one block, so that a launch over zero items
    /// is still well-formed.
    pub fn for_len(len: usize, block: BlockSize) -> Result<Self> {
        if block.x == 0 {
            Err(ErrorKind::InvalidArgument(
                "Block size must be greater than zero".to_string(),
            ))?;
        }

        let blocks = (len + block.x as usize - 1) / block.x as usize;
        let grid = u32::try_from(blocks.max(1)).map_err(|_| {
            ErrorKind::IntegerOverflow(format!("Grid size of {} blocks exceeds u32", blocks))
        })?;

        Ok(Self {
            grid: GridSize::x(grid),
            block,
        })
    }

    /// The total number of threads launched.
    pub fn threads(&self) -> usize {
        self.grid.x as usize * self.block.x as usize
    }
}
