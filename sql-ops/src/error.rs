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

use error_chain::error_chain;

error_chain! {
    links {
        DataGen(datagen::error::Error, datagen::error::ErrorKind);
        Runtime(gpu_runtime::error::Error, gpu_runtime::error::ErrorKind);
    }

    errors {
        HashTableFull(capacity: usize) {
            description("Hash table is full")
            display("Hash table with {} slots has no empty slot left", capacity)
        }
        IntegerOverflow(msg: String) {
            description("Integer overflow error")
            display("Aborted with: {}", msg)
        }
        InvalidArgument(msg: String) {
            description("Invalid argument error")
            display("Aborted with: {}", msg)
        }
        LogicError(msg: String) {
            description("Logic error")
            display("Aborting with: {}", msg)
        }
        OutputLimitExceeded(msg: String) {
            description("Join output exceeds the configured limit")
            display("Join output limit exceeded: {}", msg)
        }
    }
}
