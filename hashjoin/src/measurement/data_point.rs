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

use super::hash_join_bench::HashJoinBench;
use crate::error::Result;
use crate::types::*;
use crate::CmdOpt;
use gpu_runtime::runtime::device::Device;
use serde_derive::Serialize;
use std::mem::size_of;
use std::string::ToString;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize)]
pub struct DataPoint {
    pub data_set: Option<String>,
    pub hostname: String,
    pub device_workers: Option<usize>,
    pub device_memory_bytes: Option<usize>,
    pub join_type: Option<ArgJoinType>,
    pub build_side: Option<ArgBuildSide>,
    pub key_bytes: Option<ArgKeyBytes>,
    pub occupancy_percent: Option<u32>,
    pub block_size: Option<u32>,
    pub sample_threshold: Option<usize>,
    pub max_grow_retries: Option<u32>,
    pub data_distribution: Option<ArgDataDistribution>,
    pub zipf_exponent: Option<f64>,
    pub selectivity: Option<u32>,
    pub build_tuples: Option<usize>,
    pub build_bytes: Option<usize>,
    pub probe_tuples: Option<usize>,
    pub probe_bytes: Option<usize>,
    pub warm_up: Option<bool>,
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
    pub relation_malloc_ns: Option<f64>,
    pub relation_gen_ns: Option<f64>,
}

impl DataPoint {
    pub fn new() -> Result<DataPoint> {
        let hostname = hostname::get_hostname().ok_or_else(|| "Couldn't get hostname")?;

        let dp = DataPoint {
            hostname,
            ..DataPoint::default()
        };

        Ok(dp)
    }

    pub fn fill_from_cmd_options(&self, cmd: &CmdOpt) -> DataPoint {
        DataPoint {
            data_set: Some(cmd.data_set.to_string()),
            join_type: Some(cmd.join_type),
            build_side: Some(cmd.build_side),
            key_bytes: Some(cmd.key_bytes),
            occupancy_percent: Some(cmd.occupancy),
            block_size: Some(cmd.block_size),
            sample_threshold: Some(cmd.sample_threshold),
            max_grow_retries: Some(cmd.max_grow_retries),
            data_distribution: Some(cmd.data_distribution),
            zipf_exponent: if cmd.data_distribution == ArgDataDistribution::Zipf {
                cmd.zipf_exponent
            } else {
                None
            },
            selectivity: Some(cmd.selectivity),
            ..self.clone()
        }
    }

    pub fn fill_from_device(&self, device: &Device) -> DataPoint {
        DataPoint {
            device_workers: Some(device.workers()),
            device_memory_bytes: if device.memory_capacity() == usize::MAX {
                None
            } else {
                Some(device.memory_capacity())
            },
            ..self.clone()
        }
    }

    pub fn fill_from_hash_join_bench<T>(&self, hjb: &HashJoinBench<T>) -> DataPoint {
        DataPoint {
            build_tuples: Some(hjb.inner_relation_key.len()),
            build_bytes: Some(hjb.inner_relation_key.len() * size_of::<T>()),
            probe_tuples: Some(hjb.outer_relation_key.len()),
            probe_bytes: Some(hjb.outer_relation_key.len() * size_of::<T>()),
            ..self.clone()
        }
    }

    pub fn set_init_time(&self, malloc: Duration, data_gen: Duration) -> DataPoint {
        DataPoint {
            relation_malloc_ns: Some(malloc.as_nanos() as f64),
            relation_gen_ns: Some(data_gen.as_nanos() as f64),
            ..self.clone()
        }
    }
}
