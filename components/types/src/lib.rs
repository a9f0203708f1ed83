// Copyright 2024 chonkfs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod attr;
pub mod context;
pub mod info;

pub type Errno = libc::c_int;

/// Errors which can be reported back to a host expecting POSIX error
/// numbers, e.g. a FUSE adapter.
pub trait ToErrno {
    fn to_errno(&self) -> Errno;
}
