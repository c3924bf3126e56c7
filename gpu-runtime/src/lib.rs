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

//! A data-parallel device runtime.
//!
//! The runtime executes kernels with CUDA semantics (a grid of blocks, each
//! block consisting of threads) on a pool of worker threads. Device memory is
//! modeled as host memory that is accounted against a fixed device budget,
//! such that allocations beyond the budget fail like `cudaMalloc` does.

pub mod error;
pub mod prefix_scan;
pub mod runtime;
