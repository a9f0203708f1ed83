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

use chonk_common::CHUNK_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log every byte level operation with its chunk layout.
    pub debug:              bool,
    /// The chunk size of files created by
    /// [Directory::create_file_default](crate::Directory::create_file_default).
    pub default_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug:              false,
            default_chunk_size: CHUNK_SIZE, // 4KiB
        }
    }
}
