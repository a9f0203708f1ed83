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

//! The byte level view of chonkfs.
//!
//! A [File] turns reads and writes at arbitrary offsets into operations on
//! the chunks of a [StorageFile](chonk_storage::StorageFile), a [Directory]
//! hands out such files over any
//! [StorageDirectory](chonk_storage::StorageDirectory).

mod config;
pub use config::Config;
mod directory;
pub use directory::Directory;
pub mod err;
mod file;
pub use file::File;
