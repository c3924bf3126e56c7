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

use gpu_runtime::prefix_scan::GpuPrefixSum;
use gpu_runtime::runtime::device::{Device, DeviceBuilder};
use gpu_runtime::runtime::launch::BlockSize;
use once_cell::sync::Lazy;
use proptest::prelude::*;
use rand::{thread_rng, Rng};
use std::error::Error;

static DEVICE: Lazy<Device> = Lazy::new(|| {
    DeviceBuilder::default()
        .workers(4)
        .build()
        .expect("Failed to initialize device")
});

fn host_exclusive_scan(data: &[u64]) -> Vec<u64> {
    data.iter()
        .scan(0, |sum, &item| {
            let old_sum = *sum;
            *sum += item;
            Some(old_sum)
        })
        .collect()
}

fn prefix_sum(data_len: usize, items_per_thread: usize) -> Result<(), Box<dyn Error>> {
    let data: Vec<u64> = (0..data_len)
        .scan(thread_rng(), |rng, _| Some(rng.gen_range(0..1_000_000)))
        .collect();
    let mut result = vec![0; data_len];

    let scan = GpuPrefixSum::new(BlockSize::x(32), items_per_thread)?;
    let total = scan.exclusive_scan(&DEVICE, &data, &mut result)?;

    assert_eq!(result, host_exclusive_scan(&data));
    assert_eq!(total, data.iter().sum::<u64>());

    Ok(())
}

#[test]
fn prefix_sum_empty() -> Result<(), Box<dyn Error>> {
    prefix_sum(0, 16)
}

#[test]
fn prefix_sum_single_chunk() -> Result<(), Box<dyn Error>> {
    prefix_sum(10, 16)
}

#[test]
fn prefix_sum_partial_last_chunk() -> Result<(), Box<dyn Error>> {
    prefix_sum(1000, 16)
}

#[test]
fn prefix_sum_many_blocks() -> Result<(), Box<dyn Error>> {
    prefix_sum(1 << 20, 64)
}

#[test]
fn offsets_end_with_total() -> Result<(), Box<dyn Error>> {
    let counts = [3_u32, 0, 2, 5];

    let offsets = GpuPrefixSum::default().offsets(&DEVICE, &counts)?;

    assert_eq!(offsets.as_slice(), &[0, 3, 3, 5, 10]);
    Ok(())
}

#[test]
fn overflow_is_reported() {
    let counts = [u32::MAX, 1];
    let mut result = [0; 2];

    let scan = GpuPrefixSum::new(BlockSize::x(32), 1).unwrap();

    assert!(scan.exclusive_scan(&DEVICE, &counts, &mut result).is_err());
}

proptest! {
    #[test]
    fn matches_host_scan(data in proptest::collection::vec(0_u64..1 << 32, 0..2000), items in 1_usize..100) {
        let mut result = vec![0; data.len()];
        let scan = GpuPrefixSum::new(BlockSize::x(16), items).unwrap();

        let total = scan.exclusive_scan(&DEVICE, &data, &mut result).unwrap();

        prop_assert_eq!(result, host_exclusive_scan(&data));
        prop_assert_eq!(total, data.iter().sum::<u64>());
    }
}
