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

use chonk_common::ChunkSize;
use serde::{Deserialize, Serialize};

/// Attributes of a file as seen by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// length of the file in bytes
    pub size:       usize,
    pub chunk_size: ChunkSize,
}

/// The subset of [FileAttributes] a host may change, none means untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetFileAttributes {
    /// Shrinking truncates, growing pads the file with zero bytes.
    pub size: Option<usize>,
}

impl SetFileAttributes {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }
}

/// Reserved, directories carry no attributes yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAttributes {}

/// Options of a byte level write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Write at the current end of the file, the given offset is ignored.
    pub append:   bool,
    /// After writing, cut the file at `offset + data.len()`.
    pub truncate: bool,
}

impl WriteOptions {
    pub fn append() -> Self {
        Self {
            append:   true,
            truncate: false,
        }
    }

    pub fn truncate() -> Self {
        Self {
            append:   false,
            truncate: true,
        }
    }
}
