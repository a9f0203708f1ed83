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

//! Two storage layers composed into one.
//!
//! The under layer is authoritative, the upper layer is a lazily populated
//! copy of it: directories are created in upper the first time an operation
//! needs them there, files when they are first looked up, and chunks when
//! they are first read or written.
//!
//! Mutations go to under first and to upper second. When the upper half of
//! a mutation fails the error is returned and the under half is kept, the
//! layers then disagree in favour of under.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use async_trait::async_trait;
use chonk_common::{ChunkIndex, ChunkOffset, ChunkSize};
use chonk_types::{
    context::Context,
    info::{DirectoryInfo, FileInfo},
};
use futures::{future::BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt};
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::{
    err::{
        check_cancelled, DirectoryNotFoundSnafu, InvalidArgumentSnafu, InvalidChunkNbSnafu,
        Result, UnexpectedSnafu,
    },
    StorageDirectory, StorageDirectoryRef, StorageFile, StorageFileRef,
};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LayeredConfig {
    /// Trace every layered operation and every materialisation.
    pub debug: bool,
}

enum UpperState {
    Materialised(StorageDirectoryRef),
    /// Only present in under so far, `name` inside `parent`.
    Pending {
        parent: Arc<UpperSlot>,
        name:   String,
    },
    /// Removed or replaced in under, the upper layer is out of reach.
    Detached { name: String },
}

/// The upper half of a layered directory.
///
/// A slot keeps a registry of the live slots of its child directories, so
/// every handle on one directory shares one slot and renames and removals
/// in under can re-point or detach the handles still held on it.
struct UpperSlot {
    state:    Mutex<UpperState>,
    children: Mutex<HashMap<String, Weak<UpperSlot>>>,
}

impl UpperSlot {
    fn new(state: UpperState) -> Arc<Self> {
        Arc::new(Self {
            state:    Mutex::new(state),
            children: Mutex::new(HashMap::new()),
        })
    }

    fn materialised(upper: StorageDirectoryRef) -> Arc<Self> {
        Self::new(UpperState::Materialised(upper))
    }

    fn pending(parent: Arc<UpperSlot>, name: &str) -> Arc<Self> {
        Self::new(UpperState::Pending {
            parent,
            name: name.to_string(),
        })
    }

    async fn current(&self) -> Option<StorageDirectoryRef> {
        match &*self.state.lock().await {
            UpperState::Materialised(upper) => Some(upper.clone()),
            UpperState::Pending { .. } | UpperState::Detached { .. } => None,
        }
    }

    /// The live slot registered for the child `name`.
    async fn registered(&self, name: &str) -> Option<Arc<UpperSlot>> {
        self.children.lock().await.get(name).and_then(Weak::upgrade)
    }

    /// Registers `slot` for the child `name` unless a live slot is already
    /// there, and returns the registered one.
    async fn register(&self, name: &str, slot: Arc<UpperSlot>) -> Arc<UpperSlot> {
        let mut children = self.children.lock().await;
        if let Some(live) = children.get(name).and_then(Weak::upgrade) {
            return live;
        }
        children.retain(|_, child| child.strong_count() > 0);
        children.insert(name.to_string(), Arc::downgrade(&slot));
        slot
    }

    /// Registers a freshly created child, detaching a stale slot left under
    /// the same name.
    async fn install(&self, name: &str, slot: &Arc<UpperSlot>) {
        let stale = {
            let mut children = self.children.lock().await;
            children.retain(|_, child| child.strong_count() > 0);
            children.insert(name.to_string(), Arc::downgrade(slot))
        };
        if let Some(stale) = stale.as_ref().and_then(Weak::upgrade) {
            stale.detach(name).await;
        }
    }

    async fn detach(&self, name: &str) {
        *self.state.lock().await = UpperState::Detached {
            name: name.to_string(),
        };
    }

    /// Detaches the slot of the child `name`, which is gone from under.
    async fn detach_child(&self, name: &str) {
        let slot = self.children.lock().await.remove(name);
        if let Some(slot) = slot.as_ref().and_then(Weak::upgrade) {
            slot.detach(name).await;
        }
    }

    /// Follows a rename done in under: the slot of `name` moves to
    /// `new_name` inside `target`, and a pending slot now materialises
    /// there. A slot the rename replaced is detached.
    async fn move_child(&self, name: &str, target: &Arc<UpperSlot>, new_name: &str) {
        let moved = self.children.lock().await.remove(name);
        let moved = moved.as_ref().and_then(Weak::upgrade);
        let replaced = target.children.lock().await.remove(new_name);
        if let Some(replaced) = replaced.as_ref().and_then(Weak::upgrade) {
            if !moved.as_ref().is_some_and(|m| Arc::ptr_eq(m, &replaced)) {
                replaced.detach(new_name).await;
            }
        }
        let Some(moved) = moved else {
            return;
        };
        if let UpperState::Pending { parent, name } = &mut *moved.state.lock().await {
            *parent = target.clone();
            *name = new_name.to_string();
        }
        target.register(new_name, moved).await;
    }

    /// Returns the upper directory, creating it and its missing ancestors
    /// in the upper layer first. Slots are always locked child before
    /// parent.
    fn materialise<'a>(
        self: &'a Arc<Self>,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<StorageDirectoryRef>> {
        async move {
            let mut state = self.state.lock().await;
            let (parent, name) = match &*state {
                UpperState::Materialised(upper) => return Ok(upper.clone()),
                UpperState::Pending { parent, name } => (parent.clone(), name.clone()),
                UpperState::Detached { name } => {
                    return DirectoryNotFoundSnafu { name: name.clone() }.fail();
                }
            };
            check_cancelled(ctx)?;
            let parent_upper = parent.materialise(ctx).await?;
            let upper = match parent_upper.get_directory(ctx, &name).await {
                Ok(upper) => upper,
                Err(e) if e.is_directory_not_found() => {
                    debug!("materialise directory {name:?} in the upper layer");
                    parent_upper.create_directory(ctx, &name).await?
                }
                Err(e) => return Err(e),
            };
            *state = UpperState::Materialised(upper.clone());
            Ok(upper)
        }
        .boxed()
    }
}

/// LayeredDirectory couples a directory of the under layer with the same
/// directory of the upper layer, which may not exist yet.
pub struct LayeredDirectory {
    config: LayeredConfig,
    under:  StorageDirectoryRef,
    upper:  Arc<UpperSlot>,
}

impl Debug for LayeredDirectory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredDirectory")
            .field("under", &self.under)
            .finish_non_exhaustive()
    }
}

impl LayeredDirectory {
    /// Couples two root directories.
    pub fn new(
        upper: StorageDirectoryRef,
        under: StorageDirectoryRef,
        config: LayeredConfig,
    ) -> Self {
        Self {
            config,
            under,
            upper: UpperSlot::materialised(upper),
        }
    }

    pub fn under(&self) -> &StorageDirectoryRef { &self.under }

    /// The upper half, none while the directory only lives in under.
    pub async fn upper(&self) -> Option<StorageDirectoryRef> { self.upper.current().await }

    fn child(&self, under: StorageDirectoryRef, upper: Arc<UpperSlot>) -> Arc<LayeredDirectory> {
        Arc::new(LayeredDirectory {
            config: self.config,
            under,
            upper,
        })
    }

    fn downcast(parent: &dyn StorageDirectory) -> Result<&LayeredDirectory> {
        parent
            .as_any()
            .downcast_ref::<LayeredDirectory>()
            .context(InvalidArgumentSnafu {
                reason: "the new parent is not a layered directory",
            })
    }

    /// Builds the layered handle of a child directory known to exist in
    /// under, without touching the upper layer beyond a lookup.
    async fn wrap_directory(
        &self,
        ctx: &Context,
        name: &str,
        under: StorageDirectoryRef,
    ) -> Result<Arc<LayeredDirectory>> {
        if let Some(slot) = self.upper.registered(name).await {
            return Ok(self.child(under, slot));
        }
        let slot = match self.upper.current().await {
            Some(upper) => match upper.get_directory(ctx, name).await {
                Ok(upper) => UpperSlot::materialised(upper),
                Err(e) if e.is_directory_not_found() => {
                    UpperSlot::pending(self.upper.clone(), name)
                }
                Err(e) => return Err(e),
            },
            None => UpperSlot::pending(self.upper.clone(), name),
        };
        let slot = self.upper.register(name, slot).await;
        Ok(self.child(under, slot))
    }

    /// Builds the layered handle of a child file known to exist in under,
    /// creating an empty upper file when upper has none.
    async fn wrap_file(
        &self,
        ctx: &Context,
        name: &str,
        under: StorageFileRef,
    ) -> Result<Arc<LayeredFile>> {
        let upper_dir = self.upper.materialise(ctx).await?;
        let under_info = under.info(ctx).await?;
        let upper = match upper_dir.get_file(ctx, name).await {
            Ok(upper) => {
                let upper_info = upper.info(ctx).await?;
                ensure!(
                    upper_info.chunk_size == under_info.chunk_size,
                    UnexpectedSnafu {
                        reason: format!(
                            "file {name:?} has chunk size {} in upper but {} in under",
                            upper_info.chunk_size, under_info.chunk_size
                        ),
                    }
                );
                upper
            }
            Err(e) if e.is_file_not_found() => {
                if self.config.debug {
                    debug!("materialise file {name:?} in the upper layer");
                }
                // chunks are copied on first access.
                upper_dir
                    .create_file(ctx, name, FileInfo::new(under_info.chunk_size))
                    .await?
            }
            Err(e) => return Err(e),
        };
        Ok(Arc::new(LayeredFile::new(upper, under, self.config)))
    }
}

#[async_trait]
impl StorageDirectory for LayeredDirectory {
    #[instrument(level = "trace", skip(self, ctx))]
    async fn create_directory(&self, ctx: &Context, name: &str) -> Result<StorageDirectoryRef> {
        check_cancelled(ctx)?;
        let under = self.under.create_directory(ctx, name).await?;
        check_cancelled(ctx)?;
        let upper = self.upper.materialise(ctx).await?;
        let upper = upper.create_directory(ctx, name).await.map_err(|e| {
            warn!("directory {name:?} created in under only: {e}");
            e
        })?;
        let slot = UpperSlot::materialised(upper);
        self.upper.install(name, &slot).await;
        Ok(self.child(under, slot))
    }

    async fn get_directory(&self, ctx: &Context, name: &str) -> Result<StorageDirectoryRef> {
        let under = self.under.get_directory(ctx, name).await?;
        let dir: StorageDirectoryRef = self.wrap_directory(ctx, name, under).await?;
        Ok(dir)
    }

    async fn list_directories(
        &self,
        ctx: &Context,
    ) -> Result<BTreeMap<String, StorageDirectoryRef>> {
        let unders = self.under.list_directories(ctx).await?;
        if let Some(upper) = self.upper.current().await {
            for name in upper.list_directories(ctx).await?.keys() {
                if !unders.contains_key(name) {
                    warn!("directory {name:?} only exists in the upper layer, skip it");
                }
            }
        }
        let mut dirs = BTreeMap::new();
        for (name, under) in unders {
            let dir: StorageDirectoryRef = self.wrap_directory(ctx, &name, under).await?;
            dirs.insert(name, dir);
        }
        Ok(dirs)
    }

    #[instrument(level = "trace", skip(self, ctx))]
    async fn remove_directory(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        self.under.remove_directory(ctx, name).await?;
        self.upper.detach_child(name).await;
        check_cancelled(ctx)?;
        let Some(upper) = self.upper.current().await else {
            return Ok(());
        };
        match upper.remove_directory(ctx, name).await {
            Err(e) if e.is_directory_not_found() => {
                trace!("directory {name:?} was only in under");
                Ok(())
            }
            other => other,
        }
    }

    #[instrument(level = "trace", skip(self, ctx, new_parent))]
    async fn rename_directory(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &dyn StorageDirectory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        let target = Self::downcast(new_parent)?;
        self.under
            .rename_directory(ctx, name, target.under.as_ref(), new_name, no_replace)
            .await?;
        self.upper.move_child(name, &target.upper, new_name).await;
        check_cancelled(ctx)?;
        let Some(upper) = self.upper.current().await else {
            return Ok(());
        };
        let target_upper = target.upper.materialise(ctx).await?;
        match upper
            .rename_directory(ctx, name, target_upper.as_ref(), new_name, no_replace)
            .await
        {
            Err(e) if e.is_directory_not_found() => {
                trace!("directory {name:?} was only in under");
                Ok(())
            }
            other => other,
        }
    }

    #[instrument(level = "trace", skip(self, ctx))]
    async fn create_file(
        &self,
        ctx: &Context,
        name: &str,
        info: FileInfo,
    ) -> Result<StorageFileRef> {
        check_cancelled(ctx)?;
        let under = self.under.create_file(ctx, name, info).await?;
        check_cancelled(ctx)?;
        let upper = self.upper.materialise(ctx).await?;
        let upper = upper.create_file(ctx, name, info).await.map_err(|e| {
            warn!("file {name:?} created in under only: {e}");
            e
        })?;
        Ok(Arc::new(LayeredFile::new(upper, under, self.config)))
    }

    async fn get_file(&self, ctx: &Context, name: &str) -> Result<StorageFileRef> {
        let under = self.under.get_file(ctx, name).await?;
        let file: StorageFileRef = self.wrap_file(ctx, name, under).await?;
        Ok(file)
    }

    async fn list_files(&self, ctx: &Context) -> Result<BTreeMap<String, StorageFileRef>> {
        let unders = self.under.list_files(ctx).await?;
        if let Some(upper) = self.upper.current().await {
            for name in upper.list_files(ctx).await?.keys() {
                if !unders.contains_key(name) {
                    warn!("file {name:?} only exists in the upper layer, skip it");
                }
            }
        }
        let mut files = BTreeMap::new();
        for (name, under) in unders {
            let file: StorageFileRef = self.wrap_file(ctx, &name, under).await?;
            files.insert(name, file);
        }
        Ok(files)
    }

    #[instrument(level = "trace", skip(self, ctx))]
    async fn remove_file(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        self.under.remove_file(ctx, name).await?;
        check_cancelled(ctx)?;
        let Some(upper) = self.upper.current().await else {
            return Ok(());
        };
        match upper.remove_file(ctx, name).await {
            Err(e) if e.is_file_not_found() => {
                trace!("file {name:?} was only in under");
                Ok(())
            }
            other => other,
        }
    }

    #[instrument(level = "trace", skip(self, ctx, new_parent))]
    async fn rename_file(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &dyn StorageDirectory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        let target = Self::downcast(new_parent)?;
        self.under
            .rename_file(ctx, name, target.under.as_ref(), new_name, no_replace)
            .await?;
        check_cancelled(ctx)?;
        let Some(upper) = self.upper.current().await else {
            return Ok(());
        };
        let target_upper = target.upper.materialise(ctx).await?;
        match upper
            .rename_file(ctx, name, target_upper.as_ref(), new_name, no_replace)
            .await
        {
            Err(e) if e.is_file_not_found() => {
                trace!("file {name:?} was only in under");
                Ok(())
            }
            other => other,
        }
    }

    async fn info(&self, ctx: &Context) -> Result<DirectoryInfo> { self.under.info(ctx).await }

    fn as_any(&self) -> &dyn Any { self }
}

/// LayeredFile couples a file of the under layer with its upper copy.
///
/// The upper chunks are a prefix of the under chunks: upper never holds
/// more chunks than under, and every chunk it holds equals the under chunk
/// at the same index. Missing chunks are copied over whole on first access.
pub struct LayeredFile {
    config:   LayeredConfig,
    upper:    StorageFileRef,
    under:    StorageFileRef,
    // set once upper holds every chunk of under, layered mutations keep it
    // true from then on.
    mirrored: AtomicBool,
}

impl Debug for LayeredFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredFile")
            .field("upper", &self.upper)
            .field("under", &self.under)
            .field("mirrored", &self.mirrored.load(Ordering::Relaxed))
            .finish()
    }
}

impl LayeredFile {
    pub fn new(upper: StorageFileRef, under: StorageFileRef, config: LayeredConfig) -> Self {
        Self {
            config,
            upper,
            under,
            mirrored: AtomicBool::new(false),
        }
    }

    pub fn upper(&self) -> &StorageFileRef { &self.upper }

    pub fn under(&self) -> &StorageFileRef { &self.under }

    /// Copies the under chunks `upper.chunks_count..=index` into upper.
    async fn materialise_through(&self, ctx: &Context, index: ChunkIndex) -> Result<()> {
        let under_info = self.under.info(ctx).await?;
        let upper_info = self.upper.info(ctx).await?;
        ensure!(index < under_info.chunks_count, InvalidChunkNbSnafu { index });
        if upper_info.chunks_count > index {
            return Ok(());
        }

        let mut buf = vec![0u8; under_info.chunk_size];
        for i in upper_info.chunks_count..=index {
            check_cancelled(ctx)?;
            let len = under_info
                .chunk_len(i)
                .context(InvalidChunkNbSnafu { index: i })?;
            let data = &mut buf[..len];
            self.under.read_chunk(ctx, i, data, 0).await?;
            self.upper.resize_chunks_nb(ctx, i + 1).await?;
            if len < under_info.chunk_size {
                self.upper.resize_last_chunk(ctx, len).await?;
            }
            self.upper.write_chunk(ctx, i, data, 0).await?;
        }
        if self.config.debug {
            debug!(
                "materialised chunks {}..={index} in the upper layer",
                upper_info.chunks_count
            );
        }
        if index + 1 == under_info.chunks_count {
            self.mirrored.store(true, Ordering::Release);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageFile for LayeredFile {
    async fn info(&self, ctx: &Context) -> Result<FileInfo> {
        let upper = match self.upper.info(ctx).await {
            Ok(info) => Some(info),
            Err(e) if e.is_file_not_found() => None,
            Err(e) => return Err(e),
        };
        if let Some(info) = upper {
            if self.mirrored.load(Ordering::Acquire) {
                return Ok(info);
            }
        }
        let under = self.under.info(ctx).await?;
        if upper == Some(under) {
            self.mirrored.store(true, Ordering::Release);
        }
        Ok(under)
    }

    async fn read_chunk(
        &self,
        ctx: &Context,
        index: ChunkIndex,
        dest: &mut [u8],
        offset: ChunkOffset,
    ) -> Result<usize> {
        match self.upper.read_chunk(ctx, index, dest, offset).await {
            Err(e) if e.is_invalid_chunk_nb() => {}
            other => return other,
        }
        let n = self.under.read_chunk(ctx, index, dest, offset).await?;
        check_cancelled(ctx)?;
        self.materialise_through(ctx, index).await?;
        Ok(n)
    }

    async fn write_chunk(
        &self,
        ctx: &Context,
        index: ChunkIndex,
        data: &[u8],
        offset: ChunkOffset,
    ) -> Result<usize> {
        check_cancelled(ctx)?;
        self.under.write_chunk(ctx, index, data, offset).await?;
        check_cancelled(ctx)?;
        match self.upper.write_chunk(ctx, index, data, offset).await {
            Err(e) if e.is_invalid_chunk_nb() => {
                // the chunk is copied from under, which already holds the
                // written bytes.
                self.materialise_through(ctx, index).await?;
                self.upper.write_chunk(ctx, index, data, offset).await
            }
            other => other,
        }
    }

    async fn resize_chunks_nb(&self, ctx: &Context, chunks_nb: usize) -> Result<()> {
        check_cancelled(ctx)?;
        let prior = self.under.info(ctx).await?;
        self.under.resize_chunks_nb(ctx, chunks_nb).await?;
        check_cancelled(ctx)?;
        let upper = self.upper.info(ctx).await?;
        // a lagging upper only has to drop chunks under no longer has.
        if upper.chunks_count >= prior.chunks_count || chunks_nb < upper.chunks_count {
            self.upper.resize_chunks_nb(ctx, chunks_nb).await?;
        }
        Ok(())
    }

    async fn resize_last_chunk(&self, ctx: &Context, size: ChunkSize) -> Result<isize> {
        check_cancelled(ctx)?;
        let prior = self.under.info(ctx).await?;
        let changed = self.under.resize_last_chunk(ctx, size).await?;
        check_cancelled(ctx)?;
        let upper = self.upper.info(ctx).await?;
        // the last chunk only lives in upper when upper holds all of them.
        if upper.chunks_count == prior.chunks_count {
            self.upper.resize_last_chunk(ctx, size).await?;
        }
        Ok(changed)
    }

    async fn sync(&self, ctx: &Context) -> Result<()> {
        self.under.sync(ctx).await?;
        self.upper.sync(ctx).await
    }
}
