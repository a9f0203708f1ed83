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

use std::collections::BTreeMap;

use chonk_common::ChunkSize;
use chonk_storage::StorageDirectoryRef;
use chonk_types::{attr::DirectoryAttributes, context::Context, info::FileInfo};
use tracing::{debug, instrument};

use crate::{
    err::{check_cancelled, from_lookup, Result},
    file::MountLock,
    Config, File,
};

/// Directory hands out byte level [File]s over a storage directory, every
/// call maps onto the storage call of the same name.
///
/// A directory built with [Directory::new] is the root of a mount. Every
/// directory and file reached from it shares the lock of that mount.
#[derive(Debug, Clone)]
pub struct Directory {
    config:  Config,
    storage: StorageDirectoryRef,
    lock:    MountLock,
}

impl Directory {
    pub fn new(storage: StorageDirectoryRef, config: Config) -> Self {
        Self {
            config,
            storage,
            lock: MountLock::default(),
        }
    }

    pub fn storage(&self) -> &StorageDirectoryRef { &self.storage }

    pub fn config(&self) -> &Config { &self.config }

    fn wrap(&self, storage: StorageDirectoryRef) -> Directory {
        Directory {
            config: self.config,
            storage,
            lock: self.lock.clone(),
        }
    }

    #[instrument(level = "trace", skip(self, ctx))]
    pub async fn create_directory(&self, ctx: &Context, name: &str) -> Result<Directory> {
        check_cancelled(ctx)?;
        let dir = self.storage.create_directory(ctx, name).await?;
        if self.config.debug {
            debug!("created directory {name:?}");
        }
        Ok(self.wrap(dir))
    }

    pub async fn get_directory(&self, ctx: &Context, name: &str) -> Result<Directory> {
        let dir = self
            .storage
            .get_directory(ctx, name)
            .await
            .map_err(|e| from_lookup(name, e))?;
        Ok(self.wrap(dir))
    }

    pub async fn list_directories(&self, ctx: &Context) -> Result<BTreeMap<String, Directory>> {
        Ok(self
            .storage
            .list_directories(ctx)
            .await?
            .into_iter()
            .map(|(name, dir)| (name, self.wrap(dir)))
            .collect())
    }

    #[instrument(level = "trace", skip(self, ctx))]
    pub async fn remove_directory(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        self.storage
            .remove_directory(ctx, name)
            .await
            .map_err(|e| from_lookup(name, e))
    }

    #[instrument(level = "trace", skip(self, ctx, new_parent))]
    pub async fn rename_directory(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &Directory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        self.storage
            .rename_directory(ctx, name, new_parent.storage.as_ref(), new_name, no_replace)
            .await
            .map_err(|e| from_lookup(name, e))
    }

    /// Creates an empty file whose chunks hold `chunk_size` bytes.
    #[instrument(level = "trace", skip(self, ctx))]
    pub async fn create_file(
        &self,
        ctx: &Context,
        name: &str,
        chunk_size: ChunkSize,
    ) -> Result<File> {
        check_cancelled(ctx)?;
        let storage = self
            .storage
            .create_file(ctx, name, FileInfo::new(chunk_size))
            .await?;
        if self.config.debug {
            debug!("created file {name:?} with chunks of {chunk_size} bytes");
        }
        File::open_in(ctx, storage, self.config, self.lock.clone()).await
    }

    pub async fn create_file_default(&self, ctx: &Context, name: &str) -> Result<File> {
        self.create_file(ctx, name, self.config.default_chunk_size).await
    }

    pub async fn get_file(&self, ctx: &Context, name: &str) -> Result<File> {
        let storage = self
            .storage
            .get_file(ctx, name)
            .await
            .map_err(|e| from_lookup(name, e))?;
        File::open_in(ctx, storage, self.config, self.lock.clone()).await
    }

    pub async fn list_files(&self, ctx: &Context) -> Result<BTreeMap<String, File>> {
        let mut files = BTreeMap::new();
        for (name, storage) in self.storage.list_files(ctx).await? {
            let file = File::open_in(ctx, storage, self.config, self.lock.clone()).await?;
            files.insert(name, file);
        }
        Ok(files)
    }

    #[instrument(level = "trace", skip(self, ctx))]
    pub async fn remove_file(&self, ctx: &Context, name: &str) -> Result<()> {
        check_cancelled(ctx)?;
        self.storage
            .remove_file(ctx, name)
            .await
            .map_err(|e| from_lookup(name, e))
    }

    #[instrument(level = "trace", skip(self, ctx, new_parent))]
    pub async fn rename_file(
        &self,
        ctx: &Context,
        name: &str,
        new_parent: &Directory,
        new_name: &str,
        no_replace: bool,
    ) -> Result<()> {
        check_cancelled(ctx)?;
        self.storage
            .rename_file(ctx, name, new_parent.storage.as_ref(), new_name, no_replace)
            .await
            .map_err(|e| from_lookup(name, e))
    }

    pub async fn get_attributes(&self, ctx: &Context) -> Result<DirectoryAttributes> {
        self.storage.info(ctx).await?;
        Ok(DirectoryAttributes::default())
    }

    /// Directories have no settable attributes yet, the call only checks
    /// the directory is still reachable.
    pub async fn set_attributes(
        &self,
        ctx: &Context,
        _attr: DirectoryAttributes,
    ) -> Result<DirectoryAttributes> {
        check_cancelled(ctx)?;
        self.get_attributes(ctx).await
    }
}
