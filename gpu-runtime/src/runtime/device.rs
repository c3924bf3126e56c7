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

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::dispatcher::BlockDispatcher;
use super::launch::{LaunchConfig, ThreadIndex};
use super::memory::MemoryTracker;
use crate::error::{ErrorKind, Result};

/// Number of blocks a worker claims at once.
const DEFAULT_BLOCKS_PER_MORSEL: usize = 4;

/// Configures and creates a `Device`.
///
/// A device without memory capacity limit has an unlimited budget.
#[derive(Clone, Debug)]
pub struct DeviceBuilder {
    ordinal: u16,
    workers: usize,
    memory_capacity: Option<usize>,
    blocks_per_morsel: usize,
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self {
            ordinal: 0,
            workers: 0,
            memory_capacity: None,
            blocks_per_morsel: DEFAULT_BLOCKS_PER_MORSEL,
        }
    }
}

impl DeviceBuilder {
    pub fn ordinal(mut self, ordinal: u16) -> Self {
        self.ordinal = ordinal;
        self
    }

    /// Number of worker threads that execute thread blocks.
    ///
    /// Zero selects one worker per logical core.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Device memory budget in bytes.
    pub fn memory_capacity(mut self, bytes: usize) -> Self {
        self.memory_capacity = Some(bytes);
        self
    }

    pub fn blocks_per_morsel(mut self, blocks: usize) -> Self {
        self.blocks_per_morsel = blocks;
        self
    }

    pub fn build(self) -> Result<Device> {
        if self.blocks_per_morsel == 0 {
            Err(ErrorKind::InvalidArgument(
                "Blocks per morsel must be greater than zero".to_string(),
            ))?;
        }

        let ordinal = self.ordinal;
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(move |index| format!("device-{}-worker-{}", ordinal, index))
            .build()?;
        let memory_capacity = self.memory_capacity.unwrap_or(usize::MAX);

        debug!(
            ordinal,
            workers = thread_pool.current_num_threads(),
            memory_capacity,
            "Initialized device"
        );

        Ok(Device {
            ordinal,
            thread_pool,
            memory: Arc::new(MemoryTracker::new(memory_capacity)),
            blocks_per_morsel: self.blocks_per_morsel,
        })
    }
}

/// A data-parallel device.
///
/// Kernel launches are synchronous: `launch` returns after all threads of the
/// grid have finished. Thus, all device writes of a launch are visible to the
/// host and to subsequent launches.
#[derive(Debug)]
pub struct Device {
    ordinal: u16,
    thread_pool: ThreadPool,
    memory: Arc<MemoryTracker>,
    blocks_per_morsel: usize,
}

impl Device {
    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    pub fn workers(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn memory_used(&self) -> usize {
        self.memory.used()
    }

    pub fn memory_available(&self) -> usize {
        self.memory.capacity() - self.memory.used()
    }

    pub(crate) fn memory_tracker(&self) -> Arc<MemoryTracker> {
        self.memory.clone()
    }

    /// Executes `kernel` once for each thread of the grid.
    ///
    /// Blocks are distributed over the workers in morsels. The threads of a
    /// block run in order on the same worker, however kernels must not rely on
    /// any execution order.
    ///
    /// A panic inside the kernel aborts the launch with `LaunchFailed`.
    pub fn launch<F>(&self, name: &str, config: LaunchConfig, kernel: F) -> Result<()>
    where
        F: Fn(ThreadIndex) + Sync,
    {
        if config.block.x == 0 || config.grid.x == 0 {
            Err(ErrorKind::InvalidArgument(format!(
                "Kernel '{}' launched with empty grid or block",
                name
            )))?;
        }

        trace!(
            kernel = name,
            grid = config.grid.x,
            block = config.block.x,
            "Launching kernel"
        );

        let dispatcher = BlockDispatcher::new(config.grid.x as usize, self.blocks_per_morsel);
        let workers = self.workers().min(config.grid.x as usize).max(1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.thread_pool.scope(|s| {
                for _ in 0..workers {
                    let dispatcher = &dispatcher;
                    let kernel = &kernel;
                    s.spawn(move |_| {
                        while let Some(blocks) = dispatcher.dispatch() {
                            for block_idx in blocks {
                                for thread_idx in 0..config.block.x {
                                    kernel(ThreadIndex {
                                        block_idx: block_idx as u32,
                                        thread_idx,
                                        block_dim: config.block.x,
                                        grid_dim: config.grid.x,
                                    });
                                }
                            }
                        }
                    });
                }
            })
        }));

        result.map_err(|payload| {
            ErrorKind::LaunchFailed(name.to_string(), panic_message(payload.as_ref())).into()
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
