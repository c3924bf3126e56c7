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

//! # The SQL Operator Library
//!
//! `sql-ops` implements a data-parallel hash join for columnar data on a
//! `gpu-runtime` device. The join supports inner and left joins on integer
//! keys, including composite keys of up to three columns.
//!
//! The join proceeds in the phases:
//!
//! 1. Build a concurrent hash table over the build side.
//! 2. Estimate the output size by probing a sample of the probe side.
//! 3. Probe and materialize matching row pairs into an output buffer. If the
//!    estimate was too small, grow the buffer and probe again.
//! 4. Transpose the row pairs into a left and a right index array.
//!
//! # Tuning parameters
//!
//! The hash table occupancy, the block size of kernel launches, and the
//! growth limits are set with `HashJoinBuilder`. The defaults are an
//! occupancy of 50%, a block size of 128 threads, and at most 16 growth
//! retries.

pub mod error;
pub mod join;
