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

use serde_derive::Serialize;
use serde_repr::Serialize_repr;
use sql_ops::join::{BuildSide, JoinType};
use structopt::clap::arg_enum;

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq)]
    pub enum ArgDataSet {
        Blanas,
        Kim,
        Test,
        Custom,
        PrefixSkew,
    }
}

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq, Serialize)]
    pub enum ArgDataDistribution {
        Uniform,
        Zipf,
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DataDistribution {
    Uniform,
    Zipf(f64),
}

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq, Serialize)]
    pub enum ArgJoinType {
        Inner,
        Left,
    }
}

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq, Serialize)]
    pub enum ArgBuildSide {
        Smaller,
        Right,
    }
}

arg_enum! {
    #[derive(Copy, Clone, Debug, PartialEq, Serialize_repr)]
    #[repr(usize)]
    pub enum ArgKeyBytes {
        Bytes4 = 4,
        Bytes8 = 8,
    }
}

impl From<ArgJoinType> for JoinType {
    fn from(join_type: ArgJoinType) -> Self {
        match join_type {
            ArgJoinType::Inner => JoinType::Inner,
            ArgJoinType::Left => JoinType::Left,
        }
    }
}

impl From<ArgBuildSide> for BuildSide {
    fn from(build_side: ArgBuildSide) -> Self {
        match build_side {
            ArgBuildSide::Smaller => BuildSide::Smaller,
            ArgBuildSide::Right => BuildSide::Right,
        }
    }
}
