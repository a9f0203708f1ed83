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

//! The on-disk layer.
//!
//! A chonkfs directory is a host directory. A chonkfs file is a host
//! directory holding a `.file` sidecar with its [FileInfo] as JSON, and one
//! host file per chunk named by the zero-padded chunk index.

use std::{
    any::Any,
    collections::BTreeMap,
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chonk_common::{chunk_name, ChunkIndex, ChunkOffset, ChunkSize, FILE_INFO_NAME, MAX_CHUNKS_NB};
use chonk_types::{
    context::Context,
    info::{DirectoryInfo, FileInfo},
};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, trace, warn};

use crate::{
    err::{
        check_cancelled, DirectoryAlreadyExistsSnafu, DirectoryNotFoundSnafu,
        FileAlreadyExistsSnafu, FileInfoCorruptedSnafu, FileNotFoundSnafu, InvalidArgumentSnafu,
        InvalidChunkNbSnafu, InvalidChunkSizeSnafu, InvalidEndOffsetSnafu, InvalidNameSnafu,
        InvalidStartOffsetSnafu, IoSnafu, IsDirectorySnafu, IsFileSnafu, LastChunkNotFullSnafu,
        NoChunkSnafu, Result,
    },
    validate_name, StorageDirectory, StorageDirectoryRef, StorageFile, StorageFileRef,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// The host directory backing the root chonkfs directory.
    pub root:              PathBuf,
    pub create_if_missing: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            root:              PathBuf::from("/tmp/chonkfs.disk"),
            create_if_missing: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
}

fn display(path: &Path) -> String { path.display().to_string() }

fn validate_disk_name(name: &str) -> Result<()> {
    validate_name(name)?;
    ensure!(name != FILE_INFO_NAME, InvalidNameSnafu { name });
    Ok(())
}

async fn exists(path: &Path) -> Result<bool> {
    fs::try_exists(path)
        .await
        .context(IoSnafu { path: display(path) })
}

/// What the host path holds, none for missing paths and for host entries
/// which are not part of the chonkfs tree.
async fn entry_kind(path: &Path) -> Result<Option<EntryKind>> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            if exists(&path.join(FILE_INFO_NAME)).await? {
                Ok(Some(EntryKind::File))
            } else {
                Ok(Some(EntryKind::Directory))
            }
        }
        Ok(_) => Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(IoSnafu { path: display(path) }),
    }
}

#[derive(Debug)]
pub struct DiskDirectory {
    path: PathBuf,
}

impl DiskDirectory {
    pub async fn open(config: &DiskConfig) -> Result<Arc<Self>> {
        if config.create_if_missing {
            fs::create_dir_all(&config.root)
                .await
                .context(IoSnafu {
                    path: display(&config.root),
                })?;
        }
        match entry_kind(&config.root).await? {
            Some(EntryKind::Directory) => {}
            Some(EntryKind::File) => {
                return IsFileSnafu {
                    name: display(&config.root),
                }
                .fail()
            }
            None => {
                return DirectoryNotFoundSnafu {
                    name: display(&config.root),
                }
                .fail()
            }
        }
        debug!("disk layer opened at {}", config.root.display());
        Ok(Arc::new(Self {
            path: config.root.clone(),
        }))
    }

    pub fn path(&self) -> &Path { &self.path }

    fn downcast(parent: &dyn StorageDirectory) -> Result<&DiskDirectory> {
        parent
            .as_any()
            .downcast_ref::<DiskDirectory>()
            .context(InvalidArgumentSnafu {
                reason: "the new parent is not a disk directory",
            })
    }

    async fn ensure_name_free(&self, name: &str) -> Result<()> {
        match entry_kind(&self.path.join(name)).await? {
            Some(EntryKind::Directory) => DirectoryAlreadyExistsSnafu { name }.fail(),
            Some(EntryKind::File) => FileAlreadyExistsSnafu { name }.fail(),
            None => Ok(()),
        }
    }

    async fn list(&self, kind: EntryKind) -> Result<Vec<String>> {
        let mut names = vec![];
        let mut entries = fs::read_dir(&self.path)
            .await
            .context(IoSnafu {
                path: display(&self.path),
            })?;
        while let Some(entry) = entries.next_entry().await.context(IoSnafu {
            path: display(&self.path),
        })? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("skip non utf-8 entry {:?}", entry.path());
                continue;
            };
            if entry_kind(&entry.path()).await? == Some(kind) {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl StorageDirectory for DiskDirectory {
    async fn create_directory(&self, ctx: &Context, name: &str) -> Result<StorageDirectoryRef> {
        check_cancelled(ctx)?;
        validate_disk_name(name)?;
        self.ensure_name_free(name).await?;
        let path = self.path.join(name);
        fs::create_dir(&path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        trace!("disk: created directory {}", path.display());
        Ok(Arc::new(DiskDirectory { path }))
    }

    async fn get_directory(&self, _ctx: &Context, name: &str) -> Result<StorageDirectoryRef> {
        validate_disk_name(name)?;
        let path = self.path.join(name);
        match entry_kind(&path).await? {
            Some(EntryKind::Directory) => Ok(Arc::new(DiskDirectory { path })),
            Some(EntryKind::File) => IsFileSnafu { name }.fail(),
            None => DirectoryNotFoundSnafu { name }.fail(),
        }
    }

    async fn list_directories(
        &self,
        _ctx: &Context,
    ) -> Result<BTreeMap<String, StorageDirectoryRef>> {
        Ok(self
            .list(EntryKind::Directory)
            .await?
            .into_iter()
            .map(|name| {
                let dir: StorageDirectoryRef = Arc::new(DiskDirectory {
                    path: self.path.join(&name),
                });
                (name, dir)
            })
            .collect())
    }

    async fn remove_directory(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        validate_disk_name(name)?;
        let path = self.path.join(name);
        ensure!(
            entry_kind(&path).await? == Some(EntryKind::Directory),
            DirectoryNotFoundSnafu { name }
        );
        fs::remove_dir_all(&path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        trace!("disk: removed directory {}", path.display());
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
        validate_disk_name(name)?;
        validate_disk_name(new_name)?;
        let target = Self::downcast(new_parent)?;
        let from = self.path.join(name);
        let to = target.path.join(new_name);

        ensure!(
            entry_kind(&from).await? == Some(EntryKind::Directory),
            DirectoryNotFoundSnafu { name }
        );
        if from == to {
            return Ok(());
        }
        ensure!(
            !target.path.starts_with(&from),
            InvalidArgumentSnafu {
                reason: format!("cannot move directory {name:?} below itself"),
            }
        );
        match entry_kind(&to).await? {
            Some(EntryKind::File) => return FileAlreadyExistsSnafu { name: new_name }.fail(),
            Some(EntryKind::Directory) => {
                ensure!(!no_replace, DirectoryAlreadyExistsSnafu { name: new_name });
                fs::remove_dir_all(&to)
                    .await
                    .context(IoSnafu { path: display(&to) })?;
            }
            None => {}
        }
        fs::rename(&from, &to)
            .await
            .context(IoSnafu { path: display(&from) })?;
        trace!("disk: renamed directory {} to {}", from.display(), to.display());
        Ok(())
    }

    async fn create_file(
        &self,
        ctx: &Context,
        name: &str,
        info: FileInfo,
    ) -> Result<StorageFileRef> {
        check_cancelled(ctx)?;
        validate_disk_name(name)?;
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
        self.ensure_name_free(name).await?;

        let path = self.path.join(name);
        fs::create_dir(&path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        let file = DiskFile::new(path);
        for index in 0..info.chunks_count {
            let len = info.chunk_len(index).unwrap_or(info.chunk_size);
            file.set_chunk_len(index, len).await?;
        }
        // the sidecar goes last, its presence turns the directory into a file.
        file.store_info(&info).await?;
        trace!("disk: created file {} with {info:?}", file.path.display());
        Ok(Arc::new(file))
    }

    async fn get_file(&self, _ctx: &Context, name: &str) -> Result<StorageFileRef> {
        validate_disk_name(name)?;
        let path = self.path.join(name);
        match entry_kind(&path).await? {
            Some(EntryKind::File) => Ok(Arc::new(DiskFile::new(path))),
            Some(EntryKind::Directory) => IsDirectorySnafu { name }.fail(),
            None => FileNotFoundSnafu { name }.fail(),
        }
    }

    async fn list_files(&self, _ctx: &Context) -> Result<BTreeMap<String, StorageFileRef>> {
        Ok(self
            .list(EntryKind::File)
            .await?
            .into_iter()
            .map(|name| {
                let file: StorageFileRef = Arc::new(DiskFile::new(self.path.join(&name)));
                (name, file)
            })
            .collect())
    }

    async fn remove_file(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        validate_disk_name(name)?;
        let path = self.path.join(name);
        ensure!(
            entry_kind(&path).await? == Some(EntryKind::File),
            FileNotFoundSnafu { name }
        );
        fs::remove_dir_all(&path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        trace!("disk: removed file {}", path.display());
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
        validate_disk_name(name)?;
        validate_disk_name(new_name)?;
        let target = Self::downcast(new_parent)?;
        let from = self.path.join(name);
        let to = target.path.join(new_name);

        ensure!(
            entry_kind(&from).await? == Some(EntryKind::File),
            FileNotFoundSnafu { name }
        );
        if from == to {
            return Ok(());
        }
        match entry_kind(&to).await? {
            Some(EntryKind::Directory) => {
                return DirectoryAlreadyExistsSnafu { name: new_name }.fail()
            }
            Some(EntryKind::File) => {
                ensure!(!no_replace, FileAlreadyExistsSnafu { name: new_name });
                fs::remove_dir_all(&to)
                    .await
                    .context(IoSnafu { path: display(&to) })?;
            }
            None => {}
        }
        fs::rename(&from, &to)
            .await
            .context(IoSnafu { path: display(&from) })?;
        trace!("disk: renamed file {} to {}", from.display(), to.display());
        Ok(())
    }

    async fn info(&self, _ctx: &Context) -> Result<DirectoryInfo> { Ok(DirectoryInfo::default()) }

    fn as_any(&self) -> &dyn Any { self }
}

/// DiskFile reads its sidecar on every call instead of caching it, so
/// several handles on the same file agree with each other.
///
/// The handle addresses the host path it was opened at, renaming the file
/// leaves older handles dangling.
#[derive(Debug)]
pub struct DiskFile {
    path: PathBuf,
    // serialises the sidecar read-modify-write cycles of this handle only,
    // separate handles on one file are serialised by the chunker mount lock.
    resize_lock: Mutex<()>,
}

impl DiskFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            resize_lock: Mutex::new(()),
        }
    }

    fn chunk_path(&self, index: ChunkIndex) -> PathBuf { self.path.join(chunk_name(index)) }

    async fn load_info(&self) -> Result<FileInfo> {
        let path = self.path.join(FILE_INFO_NAME);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return FileNotFoundSnafu {
                    name: display(&self.path),
                }
                .fail()
            }
            Err(e) => return Err(e).context(IoSnafu { path: display(&path) }),
        };
        serde_json::from_slice(&raw).context(FileInfoCorruptedSnafu { path: display(&path) })
    }

    /// Replaces the sidecar atomically through a temporary sibling.
    async fn store_info(&self, info: &FileInfo) -> Result<()> {
        let path = self.path.join(FILE_INFO_NAME);
        let tmp = self.path.join(format!("{FILE_INFO_NAME}.tmp"));
        let raw = serde_json::to_vec(info).context(FileInfoCorruptedSnafu {
            path: display(&path),
        })?;
        fs::write(&tmp, raw)
            .await
            .context(IoSnafu { path: display(&tmp) })?;
        fs::rename(&tmp, &path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        Ok(())
    }

    async fn set_chunk_len(&self, index: ChunkIndex, len: usize) -> Result<()> {
        let path = self.chunk_path(index);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        file.set_len(len as u64)
            .await
            .context(IoSnafu { path: display(&path) })?;
        Ok(())
    }

    async fn checked_chunk_len(
        &self,
        index: ChunkIndex,
        offset: ChunkOffset,
        len: usize,
    ) -> Result<()> {
        let info = self.load_info().await?;
        let chunk_len = info.chunk_len(index).context(InvalidChunkNbSnafu { index })?;
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
}

#[async_trait]
impl StorageFile for DiskFile {
    async fn info(&self, _ctx: &Context) -> Result<FileInfo> { self.load_info().await }

    async fn read_chunk(
        &self,
        _ctx: &Context,
        index: ChunkIndex,
        dest: &mut [u8],
        offset: ChunkOffset,
    ) -> Result<usize> {
        self.checked_chunk_len(index, offset, dest.len()).await?;
        let path = self.chunk_path(index);
        let mut file = fs::File::open(&path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        file.seek(SeekFrom::Start(offset as u64))
            .await
            .context(IoSnafu { path: display(&path) })?;
        file.read_exact(dest)
            .await
            .context(IoSnafu { path: display(&path) })?;
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
        self.checked_chunk_len(index, offset, data.len()).await?;
        let path = self.chunk_path(index);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .context(IoSnafu { path: display(&path) })?;
        file.seek(SeekFrom::Start(offset as u64))
            .await
            .context(IoSnafu { path: display(&path) })?;
        file.write_all(data)
            .await
            .context(IoSnafu { path: display(&path) })?;
        file.flush()
            .await
            .context(IoSnafu { path: display(&path) })?;
        Ok(data.len())
    }

    async fn resize_chunks_nb(&self, ctx: &Context, chunks_nb: usize) -> Result<()> {
        check_cancelled(ctx)?;
        ensure!(
            chunks_nb <= MAX_CHUNKS_NB,
            InvalidChunkNbSnafu { index: chunks_nb }
        );
        let _guard = self.resize_lock.lock().await;
        let mut info = self.load_info().await?;
        if chunks_nb == info.chunks_count {
            return Ok(());
        }
        if chunks_nb > info.chunks_count {
            ensure!(info.is_last_chunk_full(), LastChunkNotFullSnafu);
            for index in info.chunks_count..chunks_nb {
                self.set_chunk_len(index, info.chunk_size).await?;
            }
        } else {
            for index in chunks_nb..info.chunks_count {
                let path = self.chunk_path(index);
                fs::remove_file(&path)
                    .await
                    .context(IoSnafu { path: display(&path) })?;
            }
        }
        // every remaining chunk is full: either the old last one was, or it
        // has been dropped.
        info.chunks_count = chunks_nb;
        info.last_chunk_size = if chunks_nb == 0 { 0 } else { info.chunk_size };
        self.store_info(&info).await
    }

    async fn resize_last_chunk(&self, ctx: &Context, size: ChunkSize) -> Result<isize> {
        check_cancelled(ctx)?;
        let _guard = self.resize_lock.lock().await;
        let mut info = self.load_info().await?;
        ensure!(size <= info.chunk_size, InvalidChunkSizeSnafu { size });
        ensure!(!info.is_empty(), NoChunkSnafu);
        ensure!(size > 0, InvalidChunkSizeSnafu { size });

        let changed = size as isize - info.last_chunk_size as isize;
        self.set_chunk_len(info.chunks_count - 1, size).await?;
        info.last_chunk_size = size;
        self.store_info(&info).await?;
        Ok(changed)
    }

    async fn sync(&self, ctx: &Context) -> Result<()> {
        let info = self.info(ctx).await?;
        let paths = (0..info.chunks_count)
            .map(|index| self.chunk_path(index))
            .chain(std::iter::once(self.path.join(FILE_INFO_NAME)));
        for path in paths {
            let file = fs::File::open(&path)
                .await
                .context(IoSnafu { path: display(&path) })?;
            file.sync_all()
                .await
                .context(IoSnafu { path: display(&path) })?;
        }
        Ok(())
    }
}
