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

//! A collection of data set generators for data sets frequently found in
//! published papers, and for workloads that stress the join's output
//! estimation.

use super::relation::{KeyAttribute, UniformRelation};
use crate::error::{ErrorKind, Result};

fn check_lengths(name: &str, pk_len: usize, fk_len: usize, pk: usize, fk: usize) -> Result<()> {
    if pk_len != pk || fk_len != fk {
        Err(ErrorKind::InvalidArgument(format!(
            "The {} data set requires {} primary and {} foreign keys, but got {} and {}",
            name, pk, fk, pk_len, fk_len
        )))?;
    }
    Ok(())
}

/// Generator for the Kim data set.
///
/// The Kim data set is taken from the paper Kim et al. "Sort vs. hash revisited:
/// Fast join implementation on modern multi-core CPUs" in PVLDB 2009.
///
/// The paper uses 4-byte keys / 8-byte tuples.
pub struct Kim;

impl Kim {
    /// Rows in the primary key relation.
    pub fn primary_key_len() -> usize {
        128 * 10_usize.pow(6)
    }

    /// Rows in the foreign key relation.
    pub fn foreign_key_len() -> usize {
        128 * 10_usize.pow(6)
    }

    /// Generate the Kim data set.
    ///
    /// Both slices must have the lengths specified by the primary_key_len()
    /// and foreign_key_len() functions.
    pub fn gen<T: KeyAttribute>(
        pk_attr: &mut [T],
        fk_attr: &mut [T],
        selectivity: Option<u32>,
    ) -> Result<()> {
        check_lengths(
            "Kim",
            pk_attr.len(),
            fk_attr.len(),
            Self::primary_key_len(),
            Self::foreign_key_len(),
        )?;

        UniformRelation::gen_primary_key_par(pk_attr, selectivity)?;
        UniformRelation::gen_attr_par(fk_attr, 1..=pk_attr.len())?;
        Ok(())
    }
}

/// Generator for the Blanas data set.
///
/// The Blanas data set is taken from the paper Blanas et al. "Design and
/// evaluation of main memory hash join algorithms for multi-core CPUs" in
/// SIGMOD 2011.
///
/// The paper uses 8-byte keys / 16-byte tuples.
pub struct Blanas;

impl Blanas {
    pub fn primary_key_len() -> usize {
        16 * 2_usize.pow(20)
    }

    pub fn foreign_key_len() -> usize {
        256 * 2_usize.pow(20)
    }

    pub fn gen<T: KeyAttribute>(
        pk_attr: &mut [T],
        fk_attr: &mut [T],
        selectivity: Option<u32>,
    ) -> Result<()> {
        check_lengths(
            "Blanas",
            pk_attr.len(),
            fk_attr.len(),
            Self::primary_key_len(),
            Self::foreign_key_len(),
        )?;

        UniformRelation::gen_primary_key_par(pk_attr, selectivity)?;
        UniformRelation::gen_attr_par(fk_attr, 1..=pk_attr.len())?;
        Ok(())
    }
}

/// Generator for a data set whose join size is underestimated by sampling a
/// prefix of the probe relation.
///
/// The first half of the build relation contains unique keys, the second half
/// repeats a heavy hitter key. The first `build_len` probe rows reference the
/// unique keys, and all remaining probe rows reference the heavy hitter. Thus,
/// a prefix sample sees only single matches, while each row of the tail
/// matches the whole second half.
pub struct PrefixSkew;

impl PrefixSkew {
    /// Generate the data set.
    ///
    /// The probe relation must be longer than the build relation, and the
    /// build relation must contain at least two rows.
    pub fn gen<T: KeyAttribute>(build_attr: &mut [T], probe_attr: &mut [T]) -> Result<()> {
        let build_len = build_attr.len();
        if build_len < 2 || probe_attr.len() <= build_len {
            Err(ErrorKind::InvalidArgument(format!(
                "PrefixSkew requires 2 <= build_len < probe_len, but got {} and {}",
                build_len,
                probe_attr.len()
            )))?;
        }

        let half = build_len / 2;
        let heavy_hitter = T::try_from_usize(build_len)?;

        for (i, x) in (1..).zip(build_attr[..half].iter_mut()) {
            *x = T::try_from_usize(i)?;
        }
        build_attr[half..]
            .iter_mut()
            .for_each(|x| *x = heavy_hitter);

        for (i, x) in (1..=half).cycle().zip(probe_attr[..build_len].iter_mut()) {
            *x = T::try_from_usize(i)?;
        }
        probe_attr[build_len..]
            .iter_mut()
            .for_each(|x| *x = heavy_hitter);

        Ok(())
    }

    /// The exact number of inner join rows of a generated data set.
    pub fn join_len(build_len: usize, probe_len: usize) -> usize {
        let heavy_dups = build_len - build_len / 2;
        build_len + (probe_len - build_len) * heavy_dups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kim_rejects_wrong_lengths() {
        let mut pk = vec![0_i32; 10];
        let mut fk = vec![0_i32; 10];

        assert!(Kim::gen(&mut pk, &mut fk, None).is_err());
    }

    #[test]
    fn prefix_skew_join_len() {
        let mut build = vec![0_i64; 10];
        let mut probe = vec![0_i64; 100];

        PrefixSkew::gen(&mut build, &mut probe).unwrap();

        let expected: usize = probe
            .iter()
            .map(|p| build.iter().filter(|b| *b == p).count())
            .sum();
        assert_eq!(expected, PrefixSkew::join_len(10, 100));
        assert!(probe[..10].iter().all(|&k| k >= 1 && k <= 5));
    }
}
