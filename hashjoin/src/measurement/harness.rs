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

use super::data_point::DataPoint;
use super::hash_join_bench::HashJoinPoint;
use crate::error::Result;
use error_chain::ensure;
use std::path::PathBuf;
use tracing::info;

/// Runs `func` `repeat` times after a warm-up run, and writes the data
/// points to a CSV file.
pub fn measure<'f>(
    name: &str,
    repeat: u32,
    out_file_name: Option<PathBuf>,
    template: DataPoint,
    mut func: Box<dyn FnMut() -> Result<HashJoinPoint> + 'f>,
) -> Result<()> {
    let measurements = (0..=repeat)
        .zip(std::iter::once(true).chain(std::iter::repeat(false)))
        .map(|(run, warm_up)| {
            func().map(|p| {
                info!(
                    benchmark = name,
                    run,
                    warm_up,
                    tuples = ?p.result_tuples,
                    estimate = ?p.estimated_tuples,
                    grow_retries = ?p.grow_retries,
                    join_ns = ?p.join_ns,
                );

                DataPoint {
                    warm_up: Some(warm_up),
                    relation_malloc_ns: if warm_up {
                        template.relation_malloc_ns
                    } else {
                        None
                    },
                    relation_gen_ns: if warm_up {
                        template.relation_gen_ns
                    } else {
                        None
                    },
                    result_tuples: p.result_tuples,
                    estimated_tuples: p.estimated_tuples,
                    sample_tuples: p.sample_tuples,
                    sample_rounds: p.sample_rounds,
                    grow_retries: p.grow_retries,
                    output_capacity: p.output_capacity,
                    hash_table_capacity: p.hash_table_capacity,
                    flipped: p.flipped,
                    build_ns: p.build_ns,
                    estimate_ns: p.estimate_ns,
                    probe_ns: p.probe_ns,
                    transpose_ns: p.transpose_ns,
                    join_ns: p.join_ns,
                    ..template.clone()
                }
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(ofn) = out_file_name {
        let csv_file = std::fs::File::create(ofn)?;
        let mut csv = csv::Writer::from_writer(csv_file);
        ensure!(
            measurements
                .iter()
                .try_for_each(|row| csv.serialize(row))
                .is_ok(),
            "Couldn't write serialized measurements"
        );
    }

    Ok(())
}
