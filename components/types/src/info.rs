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

use chonk_common::{cal_file_size, ChunkIndex, ChunkSize};
use serde::{Deserialize, Serialize};

/// FileInfo is the geometry of a chunked file.
///
/// All chunks except the last one are exactly `chunk_size` bytes long, the
/// last one is `last_chunk_size` bytes long, with
/// `0 < last_chunk_size <= chunk_size` as soon as the file holds a chunk.
/// An empty file has `chunks_count == 0` and `last_chunk_size == 0`.
///
/// The disk layer persists it as the `.file` sidecar, so the field names
/// are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub chunk_size:      ChunkSize,
    pub chunks_count:    usize,
    pub last_chunk_size: ChunkSize,
}

impl FileInfo {
    /// An empty file with the given chunk size.
    pub fn new(chunk_size: ChunkSize) -> Self {
        Self {
            chunk_size,
            chunks_count: 0,
            last_chunk_size: 0,
        }
    }

    pub fn size(&self) -> usize {
        cal_file_size(self.chunk_size, self.chunks_count, self.last_chunk_size)
    }

    pub fn is_empty(&self) -> bool { self.chunks_count == 0 }

    /// Growing the chunk array is only allowed when this holds.
    pub fn is_last_chunk_full(&self) -> bool {
        self.chunks_count == 0 || self.last_chunk_size == self.chunk_size
    }

    /// The current length of the chunk at `index`, or none if the index is
    /// out of range.
    pub fn chunk_len(&self, index: ChunkIndex) -> Option<usize> {
        if index >= self.chunks_count {
            None
        } else if index + 1 == self.chunks_count {
            Some(self.last_chunk_size)
        } else {
            Some(self.chunk_size)
        }
    }

    /// Whether the geometry satisfies the chunk invariants.
    pub fn is_valid(&self) -> bool {
        if self.chunk_size == 0 {
            return false;
        }
        if self.chunks_count == 0 {
            return self.last_chunk_size == 0;
        }
        self.last_chunk_size > 0 && self.last_chunk_size <= self.chunk_size
    }
}

/// Reserved for directory level metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryInfo {}
