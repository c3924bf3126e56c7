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
    errors {
        InvalidArgument(msg: String) {
            description("Invalid argument error")
            display("Aborted with: {}", msg)
        }
        IntegerOverflow(msg: String) {
            description("Integer overflow error")
            display("Aborted with: {}", msg)
        }
        LaunchFailed(kernel: String, msg: String) {
            description("Kernel launch failed")
            display("Kernel '{}' failed with: {}", kernel, msg)
        }
        LogicError(msg: String) {
            description("Logic error")
            display("Aborting with: {}", msg)
        }
        OutOfMemory(requested: usize, available: usize) {
            description("Device out of memory")
            display(
                "Out of device memory: requested {} bytes, but only {} bytes are available",
                requested,
                available
            )
        }
    }

    foreign_links {
        Io(::std::io::Error);
        RayonThreadPoolBuild(rayon::ThreadPoolBuildError);
    }
}
