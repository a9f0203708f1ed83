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

pub mod disk;
pub mod err;
pub mod layered;
pub mod memory;


use std::{any::Any, collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chonk_common::{ChunkIndex, ChunkOffset, ChunkSize, DOT, DOT_DOT, MAX_NAME_LENGTH};
use chonk_types::{
    context::Context,
    info::{DirectoryInfo, FileInfo},
};
use snafu::ensure;

use crate::err::{InvalidNameSnafu, Result};

pub type StorageDirectoryRef = Arc<dyn StorageDirectory>;
pub type StorageFileRef = Arc<dyn StorageFile>;

/// A directory of one storage layer.
///
/// Child directories and child files share a single name space: a name is
/// either a directory, a file, or free. Handles returned by the lookups are
/// live views, changes made through them are visible from the parent.
#[async_trait]
pub trait StorageDirectory: Send + Sync + Debug + 'static {
    async fn create_directory(&self, ctx: &Context, name: &str) -> Result<StorageDirectoryRef>;
    /// Fails with [IsFile](err::Error::IsFile) when the name is a file.
    async fn get_directory(&self, ctx: &Context, name: &str) -> Result<StorageDirectoryRef>;
    async fn list_directories(&self, ctx: &Context)
        -> Result<BTreeMap<String, StorageDirectoryRef>>;
    /// Removes the directory and everything below it.
    async fn remove_directory(&self, ctx: &Context, name: &str) -> Result<()>;
    /// Moves the directory `name` to `new_parent` as `new_name`.
    ///
    /// An existing directory at the destination is replaced unless
    /// `no_replace` is set, an existing file always makes the rename fail.
    /// `new_parent` must come from the same backend.
    async fn rename_directory(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &dyn StorageDirectory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()>;

    /// Creates a file shaped like `info`, chunks are zero filled.
    async fn create_file(&self, ctx: &Context, name: &str, info: FileInfo)
        -> Result<StorageFileRef>;
    /// Fails with [IsDirectory](err::Error::IsDirectory) when the name is a
    /// directory.
    async fn get_file(&self, ctx: &Context, name: &str) -> Result<StorageFileRef>;
    async fn list_files(&self, ctx: &Context) -> Result<BTreeMap<String, StorageFileRef>>;
    async fn remove_file(&self, ctx: &Context, name: &str) -> Result<()>;
    /// The file counterpart of [StorageDirectory::rename_directory]: an
    /// existing file at the destination is replaced unless `no_replace` is
    /// set, an existing directory always makes the rename fail.
    async fn rename_file(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &dyn StorageDirectory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()>;

    async fn info(&self, ctx: &Context) -> Result<DirectoryInfo>;

    /// Used by renames to recover the concrete type of `new_parent`.
    fn as_any(&self) -> &dyn Any;
}

/// A file of one storage layer, an array of chunks.
#[async_trait]
pub trait StorageFile: Send + Sync + Debug + 'static {
    async fn info(&self, ctx: &Context) -> Result<FileInfo>;

    /// Copies `dest.len()` bytes of chunk `index` starting at `offset`.
    /// The whole range must lie inside the chunk.
    async fn read_chunk(
        &self,
        ctx: &Context,
        index: ChunkIndex,
        dest: &mut [u8],
        offset: ChunkOffset,
    ) -> Result<usize>;

    /// Overwrites `data.len()` bytes of chunk `index` starting at `offset`.
    /// The whole range must lie inside the chunk, writes never grow a chunk.
    async fn write_chunk(
        &self,
        ctx: &Context,
        index: ChunkIndex,
        data: &[u8],
        offset: ChunkOffset,
    ) -> Result<usize>;

    /// Appends zero filled full chunks or drops tail chunks until the file
    /// holds `chunks_nb` chunks. Growing requires a full last chunk.
    async fn resize_chunks_nb(&self, ctx: &Context, chunks_nb: usize) -> Result<()>;

    /// Resizes the last chunk to `size` bytes, zero filling on growth.
    /// Returns the signed change of the chunk length.
    async fn resize_last_chunk(&self, ctx: &Context, size: ChunkSize) -> Result<isize>;

    /// Flushes the file to its durable medium, if it has one.
    async fn sync(&self, _ctx: &Context) -> Result<()> { Ok(()) }
}

/// Names are non-empty, at most [MAX_NAME_LENGTH] bytes, and contain neither
/// `/` nor NUL.
pub fn validate_name(name: &str) -> Result<()> {
    ensure!(
        !name.is_empty()
            && name.len() <= MAX_NAME_LENGTH
            && name != DOT
            && name != DOT_DOT
            && !name.contains(['/', '\0']),
        InvalidNameSnafu { name }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert!(validate_name("hello.txt").is_ok());
        assert!(validate_name(".file").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\0b").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
    }
}
