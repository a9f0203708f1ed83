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

//! Shared fixtures for the end-to-end tests of the chonkfs core.

#[cfg(test)]
mod scenarios;

use std::sync::Arc;

use chonk_chunker::{Config, Directory};
use chonk_storage::{
    disk::{DiskConfig, DiskDirectory},
    err::{IoSnafu, Result},
    layered::{LayeredConfig, LayeredDirectory},
    memory::MemoryDirectory,
    StorageDirectoryRef,
};
use snafu::ResultExt;
use tempfile::TempDir;

/// The storage stacks a chonkfs root can sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Disk,
    /// memory over memory
    LayeredMemory,
    /// memory over disk
    LayeredDisk,
}

/// A chonkfs root directory, keeping its host directory alive.
pub struct Mount {
    pub root: Directory,
    _temp:    Option<TempDir>,
}

impl Mount {
    pub async fn new(backend: Backend) -> Result<Mount> {
        Self::with_config(backend, Config::default()).await
    }

    pub async fn with_config(backend: Backend, config: Config) -> Result<Mount> {
        chonk_utils::logger::install_fmt_log();
        let (storage, temp) = match backend {
            Backend::Memory => (MemoryDirectory::new() as StorageDirectoryRef, None),
            Backend::Disk => {
                let (dir, temp) = disk().await?;
                (dir, Some(temp))
            }
            Backend::LayeredMemory => (layered(MemoryDirectory::new()), None),
            Backend::LayeredDisk => {
                let (dir, temp) = disk().await?;
                (layered(dir), Some(temp))
            }
        };
        Ok(Mount {
            root:  Directory::new(storage, config),
            _temp: temp,
        })
    }
}

fn layered(under: StorageDirectoryRef) -> StorageDirectoryRef {
    Arc::new(LayeredDirectory::new(
        MemoryDirectory::new(),
        under,
        LayeredConfig { debug: true },
    ))
}

async fn disk() -> Result<(StorageDirectoryRef, TempDir)> {
    let temp = tempfile::Builder::new()
        .prefix(chonk_common::CHONKFS)
        .tempdir()
        .context(IoSnafu { path: "temporary directory" })?;
    let config = DiskConfig {
        root:              temp.path().join("root"),
        create_if_missing: true,
    };
    let dir: StorageDirectoryRef = DiskDirectory::open(&config).await?;
    Ok((dir, temp))
}
