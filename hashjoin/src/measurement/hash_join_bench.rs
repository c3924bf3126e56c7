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

use crate::error::Result;
use crate::relation_file;
use datagen::relation::KeyAttribute;
use gpu_runtime::runtime::device::Device;
use serde::de::DeserializeOwned;
use sql_ops::join::{HashJoin, JoinKey, JoinStatistics, KeyColumns, RowIndex};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

pub type DataGenFn<T> = Box<dyn FnMut(&mut [T], &mut [T]) -> Result<()>>;

/// The relations of a hash join benchmark.
///
/// The inner relation is the build side, and the outer relation is the probe
/// side.
pub struct HashJoinBench<T> {
    pub inner_relation_key: Vec<T>,
    pub outer_relation_key: Vec<T>,
}

pub struct HashJoinBenchBuilder {
    inner_len: usize,
    outer_len: usize,
}

/// Measurements of one join run.
#[derive(Debug, Default)]
pub struct HashJoinPoint {
    pub result_tuples: Option<usize>,
    pub estimated_tuples: Option<usize>,
    pub sample_tuples: Option<usize>,
    pub sample_rounds: Option<u32>,
    pub grow_retries: Option<u32>,
    pub output_capacity: Option<usize>,
    pub hash_table_capacity: Option<usize>,
    pub flipped: Option<bool>,
    pub build_ns: Option<f64>,
    pub estimate_ns: Option<f64>,
    pub probe_ns: Option<f64>,
    pub transpose_ns: Option<f64>,
    pub join_ns: Option<f64>,
}

impl Default for HashJoinBenchBuilder {
    fn default() -> HashJoinBenchBuilder {
        HashJoinBenchBuilder {
            inner_len: 1,
            outer_len: 1,
        }
    }
}

impl HashJoinBenchBuilder {
    pub fn inner_len(&mut self, inner_len: usize) -> &mut Self {
        self.inner_len = inner_len;
        self
    }

    pub fn outer_len(&mut self, outer_len: usize) -> &mut Self {
        self.outer_len = outer_len;
        self
    }

    /// Allocates the relations and fills them with a data generator.
    ///
    /// Returns the benchmark, the allocation time and the generation time.
    pub fn build_with_data_gen<T>(
        &mut self,
        mut data_gen_fn: DataGenFn<T>,
    ) -> Result<(HashJoinBench<T>, Duration, Duration)>
    where
        T: Copy + Default,
    {
        let malloc_timer = Instant::now();
        let mut inner_relation_key = vec![T::default(); self.inner_len];
        let mut outer_relation_key = vec![T::default(); self.outer_len];
        let malloc_time = malloc_timer.elapsed();

        let gen_timer = Instant::now();
        data_gen_fn(&mut inner_relation_key, &mut outer_relation_key)?;
        let gen_time = gen_timer.elapsed();

        Ok((
            HashJoinBench {
                inner_relation_key,
                outer_relation_key,
            },
            malloc_time,
            gen_time,
        ))
    }

    /// Loads the relations from files.
    ///
    /// Returns the benchmark, a zero allocation time and the load time.
    pub fn build_with_files<T: DeserializeOwned>(
        &mut self,
        inner_relation_path: &Path,
        outer_relation_path: &Path,
    ) -> Result<(HashJoinBench<T>, Duration, Duration)> {
        let io_timer = Instant::now();
        let inner_relation_key = relation_file::read_keys(inner_relation_path)?;
        let outer_relation_key = relation_file::read_keys(outer_relation_path)?;
        let io_time = io_timer.elapsed();

        self.inner_len = inner_relation_key.len();
        self.outer_len = outer_relation_key.len();

        Ok((
            HashJoinBench {
                inner_relation_key,
                outer_relation_key,
            },
            Duration::default(),
            io_time,
        ))
    }
}

impl<T> HashJoinBench<T>
where
    T: JoinKey + KeyAttribute,
{
    /// Joins the outer relation (left) with the inner relation (right).
    ///
    /// Row indices are 32-bit wide if both relations fit, and 64-bit wide
    /// otherwise.
    pub fn run(&self, device: &Device, join: &HashJoin) -> Result<HashJoinPoint> {
        let max_len = self
            .inner_relation_key
            .len()
            .max(self.outer_relation_key.len());

        if max_len < u32::MAX as usize {
            self.run_with_index::<u32>(device, join)
        } else {
            self.run_with_index::<u64>(device, join)
        }
    }

    fn run_with_index<S: RowIndex>(&self, device: &Device, join: &HashJoin) -> Result<HashJoinPoint> {
        let left = KeyColumns::new(&self.outer_relation_key);
        let right = KeyColumns::new(&self.inner_relation_key);

        let timer = Instant::now();
        let result = join.execute::<T, S>(device, &left, &right)?;
        let join_time = timer.elapsed();

        debug!(
            tuples = result.len(),
            join_ns = join_time.as_nanos() as u64,
            "Join run finished"
        );

        Ok(HashJoinPoint {
            result_tuples: Some(result.len()),
            join_ns: Some(join_time.as_nanos() as f64),
            ..HashJoinPoint::from(result.statistics())
        })
    }
}

impl From<&JoinStatistics> for HashJoinPoint {
    fn from(statistics: &JoinStatistics) -> Self {
        HashJoinPoint {
            estimated_tuples: statistics.estimate.map(|e| e.rows),
            sample_tuples: statistics.estimate.map(|e| e.sample_len),
            sample_rounds: statistics.estimate.map(|e| e.rounds),
            grow_retries: Some(statistics.grow_retries),
            output_capacity: Some(statistics.output_capacity),
            hash_table_capacity: Some(statistics.hash_table_capacity),
            flipped: Some(statistics.flipped),
            build_ns: Some(statistics.build_time.as_nanos() as f64),
            estimate_ns: Some(statistics.estimate_time.as_nanos() as f64),
            probe_ns: Some(statistics.probe_time.as_nanos() as f64),
            transpose_ns: Some(statistics.transpose_time.as_nanos() as f64),
            ..HashJoinPoint::default()
        }
    }
}
