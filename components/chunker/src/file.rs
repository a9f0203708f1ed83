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

use std::{
    cmp::min,
    fmt::{Debug, Formatter},
    sync::Arc,
};

use chonk_common::{cal_chunk_idx, cal_chunk_offset, cal_chunks_nb, ChunkSize, FileOffset};
use chonk_storage::StorageFileRef;
use chonk_types::{
    attr::{FileAttributes, SetFileAttributes, WriteOptions},
    context::Context,
    info::FileInfo,
};
use snafu::ensure;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::{
    err::{check_cancelled, ReadEndBeforeReadStartSnafu, Result},
    Config,
};

/// Serialises the byte level operations of every file below one root
/// [Directory](crate::Directory).
pub(crate) type MountLock = Arc<Mutex<()>>;

/// File exposes a chunked storage file as a flat array of bytes.
///
/// Reads, writes, truncates and resizes hold the lock of the mount the file
/// was opened from, so handles opened separately on the same storage file
/// never interleave their chunk sequences.
pub struct File {
    config:     Config,
    storage:    StorageFileRef,
    chunk_size: ChunkSize,
    pub(crate) lock: MountLock,
}

impl Debug for File {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("chunk_size", &self.chunk_size)
            .field("storage", &self.storage)
            .finish()
    }
}

impl File {
    /// Wraps a storage file on its own, the chunk size is read from it
    /// once. Files of a mount are opened through their
    /// [Directory](crate::Directory) instead.
    pub async fn open(ctx: &Context, storage: StorageFileRef, config: Config) -> Result<Self> {
        Self::open_in(ctx, storage, config, MountLock::default()).await
    }

    pub(crate) async fn open_in(
        ctx: &Context,
        storage: StorageFileRef,
        config: Config,
        lock: MountLock,
    ) -> Result<Self> {
        let info = storage.info(ctx).await?;
        Ok(Self {
            config,
            storage,
            chunk_size: info.chunk_size,
            lock,
        })
    }

    pub fn storage(&self) -> &StorageFileRef { &self.storage }

    pub fn chunk_size(&self) -> ChunkSize { self.chunk_size }

    async fn info(&self, ctx: &Context) -> Result<FileInfo> { Ok(self.storage.info(ctx).await?) }

    pub async fn size(&self, ctx: &Context) -> Result<usize> { Ok(self.info(ctx).await?.size()) }

    /// Fills `dest` with the bytes starting at `offset` and returns how many
    /// were copied, less than `dest.len()` only when the end of the file was
    /// reached.
    #[instrument(level = "trace", skip(self, ctx, dest), fields(len = dest.len()))]
    pub async fn read(&self, ctx: &Context, dest: &mut [u8], offset: FileOffset) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let info = self.info(ctx).await?;
        if dest.is_empty() || offset >= info.size() {
            return Ok(0);
        }

        let mut read = 0;
        let mut index = cal_chunk_idx(offset, self.chunk_size);
        let mut chunk_offset = cal_chunk_offset(offset, self.chunk_size);
        while read < dest.len() {
            let Some(chunk_len) = info.chunk_len(index) else {
                break;
            };
            check_cancelled(ctx)?;
            let n = min(chunk_len - chunk_offset, dest.len() - read);
            self.storage
                .read_chunk(ctx, index, &mut dest[read..read + n], chunk_offset)
                .await?;
            read += n;
            index += 1;
            chunk_offset = 0;
        }
        if self.config.debug {
            debug!("read {read} bytes at {offset} of a file sized {}", info.size());
        }
        Ok(read)
    }

    /// Reads the bytes in `[start, end)`, cut short at the end of the file.
    pub async fn read_range(
        &self,
        ctx: &Context,
        start: FileOffset,
        end: FileOffset,
    ) -> Result<Vec<u8>> {
        ensure!(end >= start, ReadEndBeforeReadStartSnafu { start, end });
        let mut buf = vec![0u8; end - start];
        let n = self.read(ctx, &mut buf, start).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Writes `data` at `offset`, growing the file with zero bytes when the
    /// offset lies past its end.
    ///
    /// With `append` the data goes to the current end of the file and
    /// `offset` is ignored. With `truncate` the file is cut at the end of
    /// the written range afterwards.
    #[instrument(level = "trace", skip(self, ctx, data), fields(len = data.len()))]
    pub async fn write(
        &self,
        ctx: &Context,
        data: &[u8],
        offset: FileOffset,
        opts: WriteOptions,
    ) -> Result<usize> {
        check_cancelled(ctx)?;
        let _guard = self.lock.lock().await;

        if opts.append {
            let old_size = self.info(ctx).await?.size();
            self.resize_chunks(ctx, old_size + data.len()).await?;
            let n = self.write_across_chunks(ctx, data, old_size).await?;
            if self.config.debug {
                debug!("appended {n} bytes at {old_size}");
            }
            return Ok(n);
        }

        self.resize_chunks(ctx, offset + data.len()).await?;
        let n = self.write_across_chunks(ctx, data, offset).await?;
        if opts.truncate {
            self.truncate_locked(ctx, offset + data.len()).await?;
        }
        if self.config.debug {
            debug!("wrote {n} bytes at {offset}, truncate: {}", opts.truncate);
        }
        Ok(n)
    }

    async fn write_across_chunks(
        &self,
        ctx: &Context,
        data: &[u8],
        offset: FileOffset,
    ) -> Result<usize> {
        let info = self.info(ctx).await?;
        let mut written = 0;
        let mut index = cal_chunk_idx(offset, self.chunk_size);
        let mut chunk_offset = cal_chunk_offset(offset, self.chunk_size);
        while written < data.len() {
            let Some(chunk_len) = info.chunk_len(index) else {
                break;
            };
            check_cancelled(ctx)?;
            let n = min(chunk_len - chunk_offset, data.len() - written);
            self.storage
                .write_chunk(ctx, index, &data[written..written + n], chunk_offset)
                .await?;
            written += n;
            index += 1;
            chunk_offset = 0;
        }
        Ok(written)
    }

    /// Cuts the file down to `new_size` bytes, larger sizes leave it as is.
    #[instrument(level = "trace", skip(self, ctx))]
    pub async fn truncate(&self, ctx: &Context, new_size: usize) -> Result<()> {
        check_cancelled(ctx)?;
        let _guard = self.lock.lock().await;
        self.truncate_locked(ctx, new_size).await
    }

    async fn truncate_locked(&self, ctx: &Context, new_size: usize) -> Result<()> {
        let info = self.info(ctx).await?;
        let old_size = info.size();
        if new_size >= old_size {
            return Ok(());
        }

        let chunks_nb = cal_chunks_nb(new_size, self.chunk_size);
        if chunks_nb != info.chunks_count {
            check_cancelled(ctx)?;
            self.storage.resize_chunks_nb(ctx, chunks_nb).await?;
        }
        let remainder = cal_chunk_offset(new_size, self.chunk_size);
        if remainder > 0 {
            check_cancelled(ctx)?;
            self.storage.resize_last_chunk(ctx, remainder).await?;
        }
        if self.config.debug {
            debug!("truncated from {old_size} to {new_size} bytes, {chunks_nb} chunks");
        }
        Ok(())
    }

    /// Grows the file with zero bytes up to `new_size`, smaller sizes leave
    /// it as is.
    async fn resize_chunks(&self, ctx: &Context, new_size: usize) -> Result<()> {
        let info = self.info(ctx).await?;
        let old_size = info.size();
        if new_size <= old_size {
            return Ok(());
        }

        if !info.is_last_chunk_full() {
            let last_chunk_size = min(
                self.chunk_size,
                info.last_chunk_size + (new_size - old_size),
            );
            check_cancelled(ctx)?;
            self.storage.resize_last_chunk(ctx, last_chunk_size).await?;
        }

        let chunks_nb = cal_chunks_nb(new_size, self.chunk_size);
        if chunks_nb > info.chunks_count {
            check_cancelled(ctx)?;
            self.storage.resize_chunks_nb(ctx, chunks_nb).await?;
            let remainder = cal_chunk_offset(new_size, self.chunk_size);
            if remainder > 0 {
                check_cancelled(ctx)?;
                self.storage.resize_last_chunk(ctx, remainder).await?;
            }
        }
        Ok(())
    }

    pub async fn get_attributes(&self, ctx: &Context) -> Result<FileAttributes> {
        Ok(FileAttributes {
            size:       self.size(ctx).await?,
            chunk_size: self.chunk_size,
        })
    }

    /// Applies the attributes that are set, a new size either truncates the
    /// file or pads it with zero bytes.
    #[instrument(level = "trace", skip(self, ctx))]
    pub async fn set_attributes(
        &self,
        ctx: &Context,
        attr: SetFileAttributes,
    ) -> Result<FileAttributes> {
        check_cancelled(ctx)?;
        if let Some(size) = attr.size {
            let _guard = self.lock.lock().await;
            if size < self.info(ctx).await?.size() {
                self.truncate_locked(ctx, size).await?;
            } else {
                self.resize_chunks(ctx, size).await?;
            }
        }
        self.get_attributes(ctx).await
    }

    pub async fn sync(&self, ctx: &Context) -> Result<()> { Ok(self.storage.sync(ctx).await?) }
}
