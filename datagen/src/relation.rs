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

//! Generators for join key attributes.
//!
//! The generators produce key attributes following a random distribution.
//! Generated keys never take the maximum value of the key type, because hash
//! tables reserve that value to mark empty slots.

use num_traits::Bounded;

use crate::error::{ErrorKind, Result};

use std::convert::TryFrom;
use std::ops::RangeInclusive;

use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use rayon::prelude::*;

use zipf::ZipfDistribution;

pub trait KeyAttribute: Copy + Send + Sync + Sized {
    /// The largest key a generator may produce.
    fn max_key() -> usize;

    fn try_from_usize(x: usize) -> Result<Self>;
}

macro_rules! impl_key_attribute_for_type {
    ($Type:ty) => {
        impl KeyAttribute for $Type {
            fn max_key() -> usize {
                let max = <$Type as Bounded>::max_value() - 1;
                usize::try_from(max).unwrap_or(usize::MAX)
            }

            fn try_from_usize(x: usize) -> Result<Self> {
                if x > Self::max_key() {
                    Err(ErrorKind::IntegerOverflow(format!(
                        "Key {} exceeds the {} key domain",
                        x,
                        stringify!($Type)
                    )))?;
                }
                Self::try_from(x).map_err(|_| {
                    ErrorKind::IntegerOverflow("Failed to convert from usize".to_string()).into()
                })
            }
        }
    };
}

impl_key_attribute_for_type!(i32);
impl_key_attribute_for_type!(i64);
impl_key_attribute_for_type!(u32);
impl_key_attribute_for_type!(u64);

fn check_range<T: KeyAttribute>(range: &RangeInclusive<usize>) -> Result<()> {
    if range.start() > range.end() {
        Err(ErrorKind::InvalidArgument(format!(
            "Empty key range {}..={}",
            range.start(),
            range.end()
        )))?;
    }
    if *range.end() > T::max_key() {
        Err(ErrorKind::IntegerOverflow(format!(
            "Key range ends at {}, but the key type ends at {}",
            range.end(),
            T::max_key()
        )))?;
    }
    Ok(())
}

/// Generator for relations with uniform distribution.
pub struct UniformRelation;

impl UniformRelation {
    /// Generates a primary key attribute.
    ///
    /// The generated keys are unique. Keys are placed at random locations
    /// within the slice.
    ///
    /// `selectivity` specifies the percentage of keys that lie within
    /// 1..=attr.len(), i.e., that match a foreign key generated from the
    /// same range. The remaining keys are taken from above that range. By
    /// default (`None`), the selectivity is 100%.
    pub fn gen_primary_key<T: KeyAttribute>(
        attr: &mut [T],
        selectivity: Option<u32>,
    ) -> Result<()> {
        let selectivity = selectivity.unwrap_or(100);
        let percent = Uniform::from(1..=100);
        let len = attr.len();
        let mut rng = thread_rng();

        for (i, x) in (1..).zip(attr.iter_mut()) {
            let key = if percent.sample(&mut rng) <= selectivity {
                i
            } else {
                i + len
            };
            *x = T::try_from_usize(key)?;
        }

        attr.shuffle(&mut rng);
        Ok(())
    }

    /// Generates a primary key attribute in parallel.
    ///
    /// Keys are unique and shuffled by sorting on a random tag. See
    /// `gen_primary_key` for the meaning of `selectivity`.
    pub fn gen_primary_key_par<T: KeyAttribute>(
        attr: &mut [T],
        selectivity: Option<u32>,
    ) -> Result<()> {
        let selectivity = selectivity.unwrap_or(100);
        let percent = Uniform::from(1..=100);
        let len = attr.len();

        let mut tagged: Vec<(u64, T)> = (1..=len)
            .into_par_iter()
            .map_init(thread_rng, |rng, i| {
                let key = if percent.sample(rng) <= selectivity {
                    i
                } else {
                    i + len
                };
                T::try_from_usize(key).map(|key| (rng.gen(), key))
            })
            .collect::<Result<_>>()?;

        tagged.par_sort_unstable_by_key(|x| x.0);

        attr.par_iter_mut()
            .zip_eq(tagged.into_par_iter())
            .for_each(|(x, (_, key))| *x = key);

        Ok(())
    }

    /// Generates a foreign key attribute based on a primary key attribute.
    ///
    /// Each primary key is repeated in a round-robin fashion, then the
    /// foreign keys are shuffled. If the primary keys are unique, then each
    /// key occurs at most `ceil(fk_attr.len() / pk_attr.len())` times.
    pub fn gen_foreign_key_from_primary_key<T: Copy>(fk_attr: &mut [T], pk_attr: &[T]) {
        let mut rng = thread_rng();

        fk_attr
            .iter_mut()
            .zip(pk_attr.iter().cycle())
            .for_each(|(fk, pk)| *fk = *pk);
        fk_attr.shuffle(&mut rng);
    }

    /// Generates a uniformly distributed attribute.
    ///
    /// The generated values are sampled from `range`.
    pub fn gen_attr<T: KeyAttribute>(attr: &mut [T], range: RangeInclusive<usize>) -> Result<()> {
        check_range::<T>(&range)?;
        let between = Uniform::from(range);
        let mut rng = thread_rng();

        for x in attr.iter_mut() {
            *x = T::try_from_usize(between.sample(&mut rng))?;
        }

        Ok(())
    }

    /// Generates a uniformly distributed attribute in parallel.
    ///
    /// The generated values are sampled from `range`.
    pub fn gen_attr_par<T: KeyAttribute>(
        attr: &mut [T],
        range: RangeInclusive<usize>,
    ) -> Result<()> {
        check_range::<T>(&range)?;
        let between = Uniform::from(range);

        attr.par_iter_mut()
            .map_init(thread_rng, |rng, x| {
                T::try_from_usize(between.sample(rng)).map(|key| *x = key)
            })
            .collect::<Result<()>>()
    }
}

/// Generator for relations with Zipf distribution.
pub struct ZipfRelation;

impl ZipfRelation {
    /// Generates an attribute following the Zipf distribution in parallel.
    ///
    /// The generated values are sampled from 1 to num_elements (inclusive).
    /// Note that the exponent must be greater than 0.
    ///
    /// In the literature, num_elements is also called the alphabet size.
    pub fn gen_attr_par<T: KeyAttribute>(
        attr: &mut [T],
        num_elements: usize,
        exponent: f64,
    ) -> Result<()> {
        check_range::<T>(&(1..=num_elements))?;
        let between = ZipfDistribution::new(num_elements, exponent).map_err(|_| {
            ErrorKind::InvalidArgument(
                "ZipfDistribution requires num_elements and exponent greater than 0".to_string(),
            )
        })?;

        attr.par_iter_mut()
            .map_init(thread_rng, |rng, x| {
                T::try_from_usize(between.sample(rng)).map(|key| *x = key)
            })
            .collect::<Result<()>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn primary_keys_are_unique() {
        let mut attr = vec![0_i32; 1000];

        UniformRelation::gen_primary_key(&mut attr, None).unwrap();

        let keys: HashSet<_> = attr.iter().copied().collect();
        assert_eq!(keys.len(), attr.len());
        assert!(attr.iter().all(|&k| k >= 1 && k <= 1000));
    }

    #[test]
    fn primary_keys_par_are_unique() {
        let mut attr = vec![0_u64; 10_000];

        UniformRelation::gen_primary_key_par(&mut attr, Some(50)).unwrap();

        let keys: HashSet<_> = attr.iter().copied().collect();
        assert_eq!(keys.len(), attr.len());
        assert!(attr.iter().all(|&k| k >= 1 && k <= 20_000));
    }

    #[test]
    fn foreign_keys_reference_primary_keys() {
        let pk: Vec<i64> = (1..=10).collect();
        let mut fk = vec![0_i64; 35];

        UniformRelation::gen_foreign_key_from_primary_key(&mut fk, &pk);

        assert!(fk.iter().all(|k| pk.contains(k)));
    }

    #[test]
    fn attr_excludes_max_value() {
        let mut attr = vec![0_u32; 100];
        let range = (u32::MAX as usize - 10)..=(u32::MAX as usize);

        assert!(UniformRelation::gen_attr(&mut attr, range).is_err());
    }

    #[test]
    fn zipf_attr_in_range() {
        let mut attr = vec![0_i32; 1000];

        ZipfRelation::gen_attr_par(&mut attr, 100, 1.25).unwrap();

        assert!(attr.iter().all(|&k| k >= 1 && k <= 100));
    }
}
