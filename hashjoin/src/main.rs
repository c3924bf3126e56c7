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

mod error;
mod measurement;
mod relation_file;
mod types;

use crate::error::{ErrorKind, Result};
use crate::measurement::data_point::DataPoint;
use crate::measurement::harness;
use crate::measurement::hash_join_bench::{DataGenFn, HashJoinBenchBuilder, HashJoinPoint};
use crate::types::*;

use datagen::popular::{Blanas, Kim, PrefixSkew};
use datagen::relation::{KeyAttribute, UniformRelation, ZipfRelation};

use gpu_runtime::runtime::device::{Device, DeviceBuilder};
use gpu_runtime::runtime::launch::BlockSize;

use serde::de::DeserializeOwned;

use sql_ops::join::{HashJoinBuilder, JoinKey};

use std::path::PathBuf;

use structopt::StructOpt;

use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Log to stderr, such that the CSV output remains machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Parse commandline arguments
    let cmd = CmdOpt::from_args();

    let mut device_builder = DeviceBuilder::default()
        .ordinal(cmd.device_id)
        .workers(cmd.threads);
    if let Some(bytes) = cmd.device_memory_bytes {
        device_builder = device_builder.memory_capacity(bytes);
    }
    let device = device_builder.build()?;

    match cmd.key_bytes {
        ArgKeyBytes::Bytes4 => {
            let (hjc, dp) = args_to_bench::<i32>(&cmd, &device)?;
            harness::measure("hash_join", cmd.repeat, cmd.csv.clone(), dp, hjc)?;
        }
        ArgKeyBytes::Bytes8 => {
            let (hjc, dp) = args_to_bench::<i64>(&cmd, &device)?;
            harness::measure("hash_join", cmd.repeat, cmd.csv.clone(), dp, hjc)?;
        }
    };

    Ok(())
}

#[derive(StructOpt)]
#[structopt(
    name = "hashjoin",
    about = "A benchmark for the hash join with adaptive output estimation"
)]
struct CmdOpt {
    /// Number of times to repeat benchmark
    #[structopt(short = "r", long = "repeat", default_value = "30")]
    repeat: u32,

    /// Output filename for measurement CSV file
    #[structopt(long = "csv", parse(from_os_str))]
    csv: Option<PathBuf>,

    /// Join type
    #[structopt(
        long = "join-type",
        default_value = "Inner",
        possible_values = &ArgJoinType::variants(),
        case_insensitive = true
    )]
    join_type: ArgJoinType,

    /// Build the hash table on the smaller relation, or always on the inner
    /// relation
    ///
    /// Left joins always build on the inner relation.
    #[structopt(
        long = "build-side",
        default_value = "Smaller",
        possible_values = &ArgBuildSide::variants(),
        case_insensitive = true
    )]
    build_side: ArgBuildSide,

    /// Hash table occupancy, in percent
    #[structopt(long = "occupancy", default_value = "50", validator = is_occupancy)]
    occupancy: u32,

    /// Threads per block
    #[structopt(long = "block-size", default_value = "128")]
    block_size: u32,

    /// Sample the probe side if it is this many times larger than the build side
    #[structopt(long = "sample-threshold", default_value = "5")]
    sample_threshold: usize,

    /// Maximum number of output buffer growths
    #[structopt(long = "max-grow-retries", default_value = "16")]
    max_grow_retries: u32,

    /// Maximum number of result tuples
    #[structopt(long = "max-output-tuples")]
    max_output_tuples: Option<usize>,

    /// Use a pre-defined or custom data set.
    //   blanas: Blanas et al. "Main memory hash join algorithms for multi-core CPUs"
    //   kim: Kim et al. "Sort vs. hash revisited"
    //   test: A small data set for testing on the laptop
    //   prefixskew: A data set that defeats prefix sampling
    #[structopt(
        short = "s",
        long = "data-set",
        default_value = "Test",
        possible_values = &ArgDataSet::variants(),
        case_insensitive = true
    )]
    data_set: ArgDataSet,

    /// Outer relation's data distribution
    #[structopt(
        long = "data-distribution",
        default_value = "Uniform",
        possible_values = &ArgDataDistribution::variants(),
        case_insensitive = true
    )]
    data_distribution: ArgDataDistribution,

    /// Zipf exponent for Zipf-sampled outer relations
    #[structopt(long = "zipf-exponent", required_if("data_distribution", "Zipf"))]
    zipf_exponent: Option<f64>,

    /// Selectivity of the join, in percent
    #[structopt(
        long = "selectivity",
        default_value = "100",
        validator = is_percent
    )]
    selectivity: u32,

    /// Load data set from a TSV file with "key value" pairs and automatic gzip decompression
    #[structopt(
        long = "inner-rel-file",
        parse(from_os_str),
        conflicts_with = "data_set",
        requires = "outer_rel_file"
    )]
    inner_rel_file: Option<PathBuf>,

    /// Load data set from a TSV file with "key value" pairs and automatic gzip decompression
    #[structopt(
        long = "outer-rel-file",
        parse(from_os_str),
        conflicts_with = "data_set",
        requires = "inner_rel_file"
    )]
    outer_rel_file: Option<PathBuf>,

    /// Set the key size (bytes)
    #[structopt(
        long = "key-bytes",
        default_value = "Bytes4",
        possible_values = &ArgKeyBytes::variants(),
        case_insensitive = true
    )]
    key_bytes: ArgKeyBytes,

    /// Set the inner relation size (tuples); required for `--data-set Custom`
    #[structopt(long = "inner-rel-tuples", required_if("data_set", "Custom"))]
    inner_rel_tuples: Option<usize>,

    /// Set the outer relation size (tuples); required for `--data-set Custom`
    #[structopt(long = "outer-rel-tuples", required_if("data_set", "Custom"))]
    outer_rel_tuples: Option<usize>,

    #[structopt(short = "i", long = "device-id", default_value = "0")]
    /// Device ordinal
    device_id: u16,

    /// Device memory capacity (bytes); unlimited by default
    #[structopt(long = "device-memory-bytes")]
    device_memory_bytes: Option<usize>,

    /// Device worker threads; 0 uses one thread per core
    #[structopt(short = "t", long = "threads", default_value = "0")]
    threads: usize,
}

fn is_percent(x: String) -> std::result::Result<(), String> {
    x.parse::<i32>()
        .map_err(|_| {
            String::from(
                "Failed to parse integer. The value must be a percentage between [0, 100].",
            )
        })
        .and_then(|x| {
            if 0 <= x && x <= 100 {
                Ok(())
            } else {
                Err(String::from(
                    "The value must be a percentage between [0, 100].",
                ))
            }
        })
}

fn is_occupancy(x: String) -> std::result::Result<(), String> {
    match x.parse::<u32>() {
        Ok(x) if x > 0 && x <= 100 => Ok(()),
        _ => Err(String::from(
            "The occupancy must be a percentage between [1, 100].",
        )),
    }
}

fn args_to_bench<'d, T>(
    cmd: &CmdOpt,
    device: &'d Device,
) -> Result<(Box<dyn FnMut() -> Result<HashJoinPoint> + 'd>, DataPoint)>
where
    T: Default + JoinKey + KeyAttribute + DeserializeOwned + 'static,
{
    let mut join_builder = HashJoinBuilder::default()
        .join_type(cmd.join_type.into())
        .build_side(cmd.build_side.into())
        .occupancy(cmd.occupancy)
        .block_size(BlockSize::x(cmd.block_size))
        .sample_threshold(cmd.sample_threshold)
        .max_grow_retries(cmd.max_grow_retries);
    if let Some(limit) = cmd.max_output_tuples {
        join_builder = join_builder.max_output_rows(limit);
    }
    let join = join_builder.build()?;

    let data_distribution = match cmd.data_distribution {
        ArgDataDistribution::Uniform => DataDistribution::Uniform,
        ArgDataDistribution::Zipf => {
            let exponent = cmd.zipf_exponent.ok_or_else(|| {
                ErrorKind::InvalidArgument(
                    "Zipf exponent must be specified with --zipf-exponent".to_string(),
                )
            })?;
            DataDistribution::Zipf(exponent)
        }
    };

    // Load file or generate data set
    let mut hjb_builder = HashJoinBenchBuilder::default();
    let (hjb, malloc_time, data_gen_time) =
        if let (Some(inner_rel_path), Some(outer_rel_path)) =
            (cmd.inner_rel_file.as_ref(), cmd.outer_rel_file.as_ref())
        {
            hjb_builder.build_with_files(inner_rel_path, outer_rel_path)?
        } else {
            let (inner_relation_len, outer_relation_len, data_gen) = data_gen_fn::<T>(
                cmd.data_set,
                Some(cmd.selectivity),
                data_distribution,
                cmd.inner_rel_tuples,
                cmd.outer_rel_tuples,
            )?;
            hjb_builder
                .inner_len(inner_relation_len)
                .outer_len(outer_relation_len)
                .build_with_data_gen(data_gen)?
        };

    // Construct data point template for CSV
    let dp = DataPoint::new()?
        .fill_from_cmd_options(cmd)
        .fill_from_device(device)
        .fill_from_hash_join_bench(&hjb)
        .set_init_time(malloc_time, data_gen_time);

    // Create closure that wraps a hash join benchmark function
    let hjc: Box<dyn FnMut() -> Result<HashJoinPoint> + 'd> =
        Box::new(move || hjb.run(device, &join));

    Ok((hjc, dp))
}

fn data_gen_fn<T>(
    description: ArgDataSet,
    selectivity: Option<u32>,
    data_distribution: DataDistribution,
    inner_rel_tuples: Option<usize>,
    outer_rel_tuples: Option<usize>,
) -> Result<(usize, usize, DataGenFn<T>)>
where
    T: KeyAttribute + 'static,
{
    let data_set = match description {
        ArgDataSet::Blanas => (
            Blanas::primary_key_len(),
            Blanas::foreign_key_len(),
            Box::new(move |pk_rel: &mut [T], fk_rel: &mut [T]| -> Result<()> {
                Blanas::gen(pk_rel, fk_rel, selectivity)?;
                Ok(())
            }) as DataGenFn<T>,
        ),
        ArgDataSet::Kim => (
            Kim::primary_key_len(),
            Kim::foreign_key_len(),
            Box::new(move |pk_rel: &mut [T], fk_rel: &mut [T]| -> Result<()> {
                Kim::gen(pk_rel, fk_rel, selectivity)?;
                Ok(())
            }) as DataGenFn<T>,
        ),
        ArgDataSet::Test => {
            let gen = move |pk_rel: &mut [T], fk_rel: &mut [T]| -> Result<()> {
                UniformRelation::gen_primary_key(pk_rel, selectivity)?;
                UniformRelation::gen_attr(fk_rel, 1..=pk_rel.len())?;
                Ok(())
            };

            (1000, 1000, Box::new(gen) as DataGenFn<T>)
        }
        ArgDataSet::PrefixSkew => {
            let gen = |pk_rel: &mut [T], fk_rel: &mut [T]| -> Result<()> {
                PrefixSkew::gen(pk_rel, fk_rel)?;
                Ok(())
            };

            (
                inner_rel_tuples.unwrap_or(1 << 10),
                outer_rel_tuples.unwrap_or(1 << 16),
                Box::new(gen) as DataGenFn<T>,
            )
        }
        ArgDataSet::Custom => {
            let gen = move |pk_rel: &mut [T], fk_rel: &mut [T]| -> Result<()> {
                UniformRelation::gen_primary_key_par(pk_rel, selectivity)?;
                match data_distribution {
                    DataDistribution::Uniform => {
                        UniformRelation::gen_attr_par(fk_rel, 1..=pk_rel.len())?
                    }
                    DataDistribution::Zipf(exp) => {
                        ZipfRelation::gen_attr_par(fk_rel, pk_rel.len(), exp)?
                    }
                }
                Ok(())
            };

            let inner_len = inner_rel_tuples.ok_or_else(|| {
                ErrorKind::InvalidArgument(
                    "Couldn't find inner relation size. Did you specify --inner-rel-tuples?"
                        .to_string(),
                )
            })?;
            let outer_len = outer_rel_tuples.ok_or_else(|| {
                ErrorKind::InvalidArgument(
                    "Couldn't find outer relation size. Did you specify --outer-rel-tuples?"
                        .to_string(),
                )
            })?;

            (inner_len, outer_len, Box::new(gen) as DataGenFn<T>)
        }
    };

    Ok(data_set)
}
