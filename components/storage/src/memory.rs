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

//! The in-memory layer, the reference semantics of [StorageDirectory] and
//! [StorageFile].

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Formatter},
    sync::Arc,
};

use async_trait::async_trait;
use chonk_common::{ChunkIndex, ChunkOffset, ChunkSize, MAX_CHUNKS_NB};
use chonk_types::{
    context::Context,
    info::{DirectoryInfo, FileInfo},
};
use snafu::{ensure, OptionExt};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::trace;

use crate::{
    err::{
        check_cancelled, DirectoryAlreadyExistsSnafu, DirectoryNotFoundSnafu,
        FileAlreadyExistsSnafu, FileNotFoundSnafu, InvalidArgumentSnafu, InvalidChunkNbSnafu,
        InvalidChunkSizeSnafu, InvalidEndOffsetSnafu, InvalidStartOffsetSnafu, IsDirectorySnafu,
        IsFileSnafu, LastChunkNotFullSnafu, NoChunkSnafu, Result,
    },
    validate_name, StorageDirectory, StorageDirectoryRef, StorageFile, StorageFileRef,
};

#[derive(Default)]
struct DirectoryInner {
    directories: HashMap<String, Arc<MemoryDirectory>>,
    files:       HashMap<String, Arc<MemoryFile>>,
}

impl DirectoryInner {
    // the name space is shared by files and directories.
    fn ensure_name_free(&self, name: &str) -> Result<()> {
        ensure!(
            !self.directories.contains_key(name),
            DirectoryAlreadyExistsSnafu { name }
        );
        ensure!(!self.files.contains_key(name), FileAlreadyExistsSnafu { name });
        Ok(())
    }
}

/// MemoryDirectory keeps its children in two maps guarded by one lock, so
/// the uniqueness of a name across both maps is checked atomically.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: RwLock<DirectoryInner>,
}

impl Debug for MemoryDirectory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryDirectory {{ {:p} }}", self)
    }
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    fn downcast(parent: &dyn StorageDirectory) -> Result<&MemoryDirectory> {
        parent
            .as_any()
            .downcast_ref::<MemoryDirectory>()
            .context(InvalidArgumentSnafu {
                reason: "the new parent is not a memory directory",
            })
    }

    /// Locks both directories for writing, always in address order so two
    /// renames in opposite directions cannot deadlock.
    async fn write_pair<'a>(
        &'a self,
        other: &'a MemoryDirectory,
    ) -> (
        RwLockWriteGuard<'a, DirectoryInner>,
        RwLockWriteGuard<'a, DirectoryInner>,
    ) {
        if (self as *const Self) < (other as *const Self) {
            let ours = self.inner.write().await;
            let theirs = other.inner.write().await;
            (ours, theirs)
        } else {
            let theirs = other.inner.write().await;
            let ours = self.inner.write().await;
            (ours, theirs)
        }
    }

    /// Whether `target` is `root` or lives somewhere below it.
    async fn subtree_contains(root: &Arc<MemoryDirectory>, target: &MemoryDirectory) -> bool {
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            if std::ptr::eq(dir.as_ref(), target) {
                return true;
            }
            let inner = dir.inner.read().await;
            stack.extend(inner.directories.values().cloned());
        }
        false
    }
}

#[async_trait]
impl StorageDirectory for MemoryDirectory {
    async fn create_directory(&self, ctx: &Context, name: &str) -> Result<StorageDirectoryRef> {
        check_cancelled(ctx)?;
        validate_name(name)?;
        let mut inner = self.inner.write().await;
        inner.ensure_name_free(name)?;
        let dir = MemoryDirectory::new();
        inner.directories.insert(name.to_string(), dir.clone());
        trace!("memory: created directory {name:?}");
        Ok(dir)
    }

    async fn get_directory(&self, _ctx: &Context, name: &str) -> Result<StorageDirectoryRef> {
        let inner = self.inner.read().await;
        if let Some(dir) = inner.directories.get(name) {
            return Ok(dir.clone());
        }
        ensure!(!inner.files.contains_key(name), IsFileSnafu { name });
        DirectoryNotFoundSnafu { name }.fail()
    }

    async fn list_directories(
        &self,
        _ctx: &Context,
    ) -> Result<BTreeMap<String, StorageDirectoryRef>> {
        let inner = self.inner.read().await;
        Ok(inner
            .directories
            .iter()
            .map(|(name, dir)| (name.clone(), dir.clone() as StorageDirectoryRef))
            .collect())
    }

    async fn remove_directory(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        let mut inner = self.inner.write().await;
        // dropping the handle drops the whole subtree.
        inner
            .directories
            .remove(name)
            .context(DirectoryNotFoundSnafu { name })?;
        trace!("memory: removed directory {name:?}");
        Ok(())
    }

    async fn rename_directory(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &dyn StorageDirectory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        validate_name(new_name)?;
        let target = Self::downcast(new_parent)?;

        let moved = self
            .inner
            .read()
            .await
            .directories
            .get(name)
            .cloned()
            .context(DirectoryNotFoundSnafu { name })?;
        ensure!(
            !Self::subtree_contains(&moved, target).await,
            InvalidArgumentSnafu {
                reason: format!("cannot move directory {name:?} below itself"),
            }
        );

        if std::ptr::eq(self, target) {
            if name == new_name {
                return Ok(());
            }
            let mut inner = self.inner.write().await;
            ensure!(
                !inner.files.contains_key(new_name),
                FileAlreadyExistsSnafu { name: new_name }
            );
            ensure!(
                !(no_replace && inner.directories.contains_key(new_name)),
                DirectoryAlreadyExistsSnafu { name: new_name }
            );
            let dir = inner
                .directories
                .remove(name)
                .context(DirectoryNotFoundSnafu { name })?;
            inner.directories.insert(new_name.to_string(), dir);
        } else {
            let (mut src, mut dst) = self.write_pair(target).await;
            ensure!(
                !dst.files.contains_key(new_name),
                FileAlreadyExistsSnafu { name: new_name }
            );
            ensure!(
                !(no_replace && dst.directories.contains_key(new_name)),
                DirectoryAlreadyExistsSnafu { name: new_name }
            );
            let dir = src
                .directories
                .remove(name)
                .context(DirectoryNotFoundSnafu { name })?;
            dst.directories.insert(new_name.to_string(), dir);
        }
        trace!("memory: renamed directory {name:?} to {new_name:?}");
        Ok(())
    }

    async fn create_file(
        &self,
        ctx: &Context,
        name: &str,
        info: FileInfo,
    ) -> Result<StorageFileRef> {
        check_cancelled(ctx)?;
        validate_name(name)?;
        let file = Arc::new(MemoryFile::with_info(info)?);
        let mut inner = self.inner.write().await;
        inner.ensure_name_free(name)?;
        inner.files.insert(name.to_string(), file.clone());
        trace!("memory: created file {name:?} with {info:?}");
        Ok(file)
    }

    async fn get_file(&self, _ctx: &Context, name: &str) -> Result<StorageFileRef> {
        let inner = self.inner.read().await;
        if let Some(file) = inner.files.get(name) {
            return Ok(file.clone());
        }
        ensure!(
            !inner.directories.contains_key(name),
            IsDirectorySnafu { name }
        );
        FileNotFoundSnafu { name }.fail()
    }

    async fn list_files(&self, _ctx: &Context) -> Result<BTreeMap<String, StorageFileRef>> {
        let inner = self.inner.read().await;
        Ok(inner
            .files
            .iter()
            .map(|(name, file)| (name.clone(), file.clone() as StorageFileRef))
            .collect())
    }

    async fn remove_file(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        let mut inner = self.inner.write().await;
        inner.files.remove(name).context(FileNotFoundSnafu { name })?;
        trace!("memory: removed file {name:?}");
        Ok(())
    }

    async fn rename_file(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &dyn StorageDirectory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        validate_name(new_name)?;
        let target = Self::downcast(new_parent)?;

        if std::ptr::eq(self, target) {
            let mut inner = self.inner.write().await;
            ensure!(inner.files.contains_key(name), FileNotFoundSnafu { name });
            if name == new_name {
                return Ok(());
            }
            ensure!(
                !inner.directories.contains_key(new_name),
                DirectoryAlreadyExistsSnafu { name: new_name }
            );
            ensure!(
                !(no_replace && inner.files.contains_key(new_name)),
                FileAlreadyExistsSnafu { name: new_name }
            );
            let file = inner.files.remove(name).context(FileNotFoundSnafu { name })?;
            inner.files.insert(new_name.to_string(), file);
        } else {
            let (mut src, mut dst) = self.write_pair(target).await;
            ensure!(src.files.contains_key(name), FileNotFoundSnafu { name });
            ensure!(
                !dst.directories.contains_key(new_name),
                DirectoryAlreadyExistsSnafu { name: new_name }
            );
            ensure!(
                !(no_replace && dst.files.contains_key(new_name)),
                FileAlreadyExistsSnafu { name: new_name }
            );
            let file = src.files.remove(name).context(FileNotFoundSnafu { name })?;
            dst.files.insert(new_name.to_string(), file);
        }
        trace!("memory: renamed file {name:?} to {new_name:?}");
        Ok(())
    }

    async fn info(&self, _ctx: &Context) -> Result<DirectoryInfo> { Ok(DirectoryInfo::default()) }

    fn as_any(&self) -> &dyn Any { self }
}

/// MemoryFile stores every chunk in its own buffer, the length of a buffer
/// is the current length of that chunk.
pub struct MemoryFile {
    chunk_size: ChunkSize,
    chunks:     RwLock<Vec<Vec<u8>>>,
}

impl Debug for MemoryFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryFile {{ chunk_size: {} }}", self.chunk_size)
    }
}

impl MemoryFile {
    pub fn new(chunk_size: ChunkSize) -> Result<Self> { Self::with_info(FileInfo::new(chunk_size)) }

    /// Builds a zero filled file shaped like `info`.
    pub fn with_info(info: FileInfo) -> Result<Self> {
        ensure!(
            info.chunk_size > 0,
            InvalidChunkSizeSnafu {
                size: info.chunk_size,
            }
        );
        ensure!(
            info.chunks_count <= MAX_CHUNKS_NB,
            InvalidChunkNbSnafu {
                index: info.chunks_count,
            }
        );
        ensure!(
            info.is_valid(),
            InvalidChunkSizeSnafu {
                size: info.last_chunk_size,
            }
        );
        let mut chunks = vec![vec![0u8; info.chunk_size]; info.chunks_count];
        if let Some(last) = chunks.last_mut() {
            last.truncate(info.last_chunk_size);
        }
        Ok(Self {
            chunk_size: info.chunk_size,
            chunks:     RwLock::new(chunks),
        })
    }
}

fn check_range(chunk_len: usize, offset: ChunkOffset, len: usize) -> Result<()> {
    ensure!(
        offset < chunk_len,
        InvalidStartOffsetSnafu { offset, chunk_len }
    );
    ensure!(
        offset + len <= chunk_len,
        InvalidEndOffsetSnafu {
            offset: offset + len,
            chunk_len,
        }
    );
    Ok(())
}

#[async_trait]
impl StorageFile for MemoryFile {
    async fn info(&self, _ctx: &Context) -> Result<FileInfo> {
        let chunks = self.chunks.read().await;
        Ok(FileInfo {
            chunk_size:      self.chunk_size,
            chunks_count:    chunks.len(),
            last_chunk_size: chunks.last().map_or(0, |c| c.len()),
        })
    }

    async fn read_chunk(
        &self,
        _ctx: &Context,
        index: ChunkIndex,
        dest: &mut [u8],
        offset: ChunkOffset,
    ) -> Result<usize> {
        let chunks = self.chunks.read().await;
        let chunk = chunks.get(index).context(InvalidChunkNbSnafu { index })?;
        check_range(chunk.len(), offset, dest.len())?;
        dest.copy_from_slice(&chunk[offset..offset + dest.len()]);
        Ok(dest.len())
    }

    async fn write_chunk(
        &self,
        ctx: &Context,
        index: ChunkIndex,
        data: &[u8],
        offset: ChunkOffset,
    ) -> Result<usize> {
        check_cancelled(ctx)?;
        let mut chunks = self.chunks.write().await;
        let chunk = chunks
            .get_mut(index)
            .context(InvalidChunkNbSnafu { index })?;
        check_range(chunk.len(), offset, data.len())?;
        chunk[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    async fn resize_chunks_nb(&self, ctx: &Context, chunks_nb: usize) -> Result<()> {
        check_cancelled(ctx)?;
        ensure!(
            chunks_nb <= MAX_CHUNKS_NB,
            InvalidChunkNbSnafu { index: chunks_nb }
        );
        let mut chunks = self.chunks.write().await;
        if chunks_nb > chunks.len() {
            ensure!(
                chunks.last().map_or(true, |c| c.len() == self.chunk_size),
                LastChunkNotFullSnafu
            );
            chunks.resize_with(chunks_nb, || vec![0u8; self.chunk_size]);
        } else {
            chunks.truncate(chunks_nb);
        }
        Ok(())
    }

    async fn resize_last_chunk(&self, ctx: &Context, size: ChunkSize) -> Result<isize> {
        check_cancelled(ctx)?;
        ensure!(size <= self.chunk_size, InvalidChunkSizeSnafu { size });
        let mut chunks = self.chunks.write().await;
        let last = chunks.last_mut().context(NoChunkSnafu)?;
        // an empty chunk would break the geometry, drop it with
        // resize_chunks_nb instead.
        ensure!(size > 0, InvalidChunkSizeSnafu { size });
        let changed = size as isize - last.len() as isize;
        last.resize(size, 0);
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::Error;

    #[tokio::test]
    async fn chunk_geometry() {
        let ctx = Context::background();
        let file = MemoryFile::new(4).unwrap();
        assert_eq!(file.info(&ctx).await.unwrap(), FileInfo::new(4));

        file.resize_chunks_nb(&ctx, 2).await.unwrap();
        let info = file.info(&ctx).await.unwrap();
        assert_eq!((info.chunks_count, info.last_chunk_size), (2, 4));

        assert_eq!(file.resize_last_chunk(&ctx, 1).await.unwrap(), -3);
        assert!(matches!(
            file.resize_chunks_nb(&ctx, 3).await,
            Err(Error::LastChunkNotFull { .. })
        ));
        assert_eq!(file.resize_last_chunk(&ctx, 4).await.unwrap(), 3);
        file.resize_chunks_nb(&ctx, 3).await.unwrap();
        assert_eq!(file.info(&ctx).await.unwrap().size(), 12);

        file.resize_chunks_nb(&ctx, 0).await.unwrap();
        assert!(matches!(
            file.resize_last_chunk(&ctx, 0).await,
            Err(Error::NoChunk { .. })
        ));
    }

    #[tokio::test]
    async fn chunk_io_bounds() {
        let ctx = Context::background();
        let file = MemoryFile::new(4).unwrap();
        file.resize_chunks_nb(&ctx, 1).await.unwrap();
        file.resize_last_chunk(&ctx, 3).await.unwrap();

        assert_eq!(file.write_chunk(&ctx, 0, b"ab", 1).await.unwrap(), 2);
        let mut buf = [0u8; 3];
        assert_eq!(file.read_chunk(&ctx, 0, &mut buf, 0).await.unwrap(), 3);
        assert_eq!(&buf, b"\0ab");

        let mut buf = [0u8; 2];
        assert!(matches!(
            file.read_chunk(&ctx, 0, &mut buf, 2).await,
            Err(Error::InvalidEndOffset { .. })
        ));
        assert!(matches!(
            file.read_chunk(&ctx, 0, &mut buf, 3).await,
            Err(Error::InvalidStartOffset { .. })
        ));
        assert!(matches!(
            file.read_chunk(&ctx, 1, &mut buf, 0).await,
            Err(Error::InvalidChunkNb { .. })
        ));
        assert!(matches!(
            file.write_chunk(&ctx, 0, b"abcd", 0).await,
            Err(Error::InvalidEndOffset { .. })
        ));
    }

    #[tokio::test]
    async fn create_with_info() {
        let info = FileInfo {
            chunk_size:      4,
            chunks_count:    2,
            last_chunk_size: 1,
        };
        let file = MemoryFile::with_info(info).unwrap();
        assert_eq!(file.info(&Context::background()).await.unwrap(), info);

        let broken = FileInfo {
            chunk_size:      4,
            chunks_count:    2,
            last_chunk_size: 0,
        };
        assert!(matches!(
            MemoryFile::with_info(broken),
            Err(Error::InvalidChunkSize { .. })
        ));
    }

    #[tokio::test]
    async fn rename_below_itself_is_rejected() {
        let ctx = Context::background();
        let root = MemoryDirectory::new();
        let a = root.create_directory(&ctx, "a").await.unwrap();
        let b = a.create_directory(&ctx, "b").await.unwrap();
        assert!(matches!(
            root.rename_directory(&ctx, "a", b.as_ref(), "a", false).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            root.rename_directory(&ctx, "a", a.as_ref(), "x", false).await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(root.get_directory(&ctx, "a").await.is_ok());
    }

    #[tokio::test]
    async fn handles_stay_live() {
        let ctx = Context::background();
        let root = MemoryDirectory::new();
        let dir = root.create_directory(&ctx, "d").await.unwrap();
        dir.create_file(&ctx, "f", FileInfo::new(8)).await.unwrap();

        let again = root.get_directory(&ctx, "d").await.unwrap();
        assert!(again.list_files(&ctx).await.unwrap().contains_key("f"));
    }

    #[tokio::test]
    async fn cancelled_mutation() {
        let ctx = Context::background();
        let root = MemoryDirectory::new();
        ctx.cancel();
        assert!(root
            .create_directory(&ctx, "d")
            .await
            .unwrap_err()
            .is_cancelled());
        assert!(root
            .list_directories(&Context::background())
            .await
            .unwrap()
            .is_empty());
    }
}
