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

pub const MAX_NAME_LENGTH: usize = 255;
pub const DOT: &str = ".";
pub const DOT_DOT: &str = "..";

pub const CHONKFS: &str = "chonkfs";

/// The sidecar holding the geometry of a file stored on a host filesystem.
/// Its presence inside a host directory marks that directory as a chonkfs
/// file.
pub const FILE_INFO_NAME: &str = ".file";

/// Chunk files of the disk layer are named by their zero-padded index.
pub const CHUNK_NAME_WIDTH: usize = 10;

// The default chunk size for files created without an explicit one.
pub const CHUNK_SIZE: usize = 4 << 10; // 4 KiB

// Upper bound on the number of chunks a single file may hold.
pub const MAX_CHUNKS_NB: usize = u32::MAX as usize;

pub fn cal_chunk_idx(offset: usize, chunk_size: usize) -> usize { offset / chunk_size }

pub fn cal_chunk_offset(offset: usize, chunk_size: usize) -> usize { offset % chunk_size }

/// The number of chunks needed to hold `size` bytes.
pub fn cal_chunks_nb(size: usize, chunk_size: usize) -> usize { size.div_ceil(chunk_size) }

/// (chunks_count - 1) * chunk_size + last_chunk_size, or 0 for an empty file.
pub fn cal_file_size(chunk_size: usize, chunks_count: usize, last_chunk_size: usize) -> usize {
    if chunks_count == 0 {
        return 0;
    }
    (chunks_count - 1) * chunk_size + last_chunk_size
}

pub fn chunk_name(index: ChunkIndex) -> String {
    format!("{:0width$}", index, width = CHUNK_NAME_WIDTH)
}

pub type ChunkIndex = usize;
pub type ChunkOffset = usize;
pub type ChunkSize = usize;
pub type FileOffset = usize;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_size() {
        assert_eq!(cal_file_size(4, 0, 0), 0);
        assert_eq!(cal_file_size(4, 1, 3), 3);
        assert_eq!(cal_file_size(4, 3, 2), 10);
        assert_eq!(cal_file_size(4096, 1, 4096), 4096);
    }

    #[test]
    fn chunk_arithmetic() {
        assert_eq!(cal_chunks_nb(0, 4), 0);
        assert_eq!(cal_chunks_nb(4, 4), 1);
        assert_eq!(cal_chunks_nb(5, 4), 2);
        assert_eq!(cal_chunk_idx(9, 4), 2);
        assert_eq!(cal_chunk_offset(9, 4), 1);
    }

    #[test]
    fn chunk_names_are_padded() {
        assert_eq!(chunk_name(0), "0000000000");
        assert_eq!(chunk_name(42), "0000000042");
    }
}
