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

use chonk_chunker::err::Error;
use chonk_storage::{
    layered::{LayeredConfig, LayeredDirectory},
    memory::MemoryDirectory,
    StorageDirectory, StorageDirectoryRef,
};
use chonk_types::{attr::WriteOptions, context::Context, info::FileInfo};
use rstest::rstest;

use crate::{Backend, Mount};

async fn mount(backend: Backend) -> Mount { Mount::new(backend).await.unwrap() }

#[rstest]
#[tokio::test]
async fn small_write_read(
    #[values(
        Backend::Memory,
        Backend::Disk,
        Backend::LayeredMemory,
        Backend::LayeredDisk
    )]
    backend: Backend,
) {
    let ctx = Context::background();
    let mount = mount(backend).await;
    let file = mount.root.create_file(&ctx, "hello.txt", 4096).await.unwrap();

    let n = file
        .write(&ctx, b"Hello, World!", 0, WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(n, 13);
    assert_eq!(file.size(&ctx).await.unwrap(), 13);

    let mut buf = [0u8; 13];
    assert_eq!(file.read(&ctx, &mut buf, 0).await.unwrap(), 13);
    assert_eq!(&buf, b"Hello, World!");

    // a fresh handle reads the same bytes.
    let again = mount.root.get_file(&ctx, "hello.txt").await.unwrap();
    assert_eq!(again.read_range(&ctx, 0, 13).await.unwrap(), b"Hello, World!");
}

#[rstest]
#[tokio::test]
async fn straddling_writes(
    #[values(
        Backend::Memory,
        Backend::Disk,
        Backend::LayeredMemory,
        Backend::LayeredDisk
    )]
    backend: Backend,
) {
    let ctx = Context::background();
    let mount = mount(backend).await;
    let file = mount.root.create_file(&ctx, "f", 4).await.unwrap();

    for offset in 0..10 {
        let n = file
            .write(&ctx, b"Hello, world!", offset, WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(n, 13);
        let mut buf = [0u8; 13];
        assert_eq!(file.read(&ctx, &mut buf, offset).await.unwrap(), 13);
        assert_eq!(&buf, b"Hello, world!");
    }
    assert_eq!(file.size(&ctx).await.unwrap(), 22);
    assert_eq!(
        file.read_range(&ctx, 0, 22).await.unwrap(),
        b"HHHHHHHHHHello, world!"
    );
}

#[rstest]
#[tokio::test]
async fn append(
    #[values(
        Backend::Memory,
        Backend::Disk,
        Backend::LayeredMemory,
        Backend::LayeredDisk
    )]
    backend: Backend,
) {
    let ctx = Context::background();
    let mount = mount(backend).await;
    let file = mount.root.create_file(&ctx, "f", 4096).await.unwrap();

    file.write(&ctx, b"abc", 0, WriteOptions::default()).await.unwrap();
    let n = file.write(&ctx, b"de", 0, WriteOptions::append()).await.unwrap();
    assert_eq!(n, 2);
    assert_eq!(file.size(&ctx).await.unwrap(), 5);
    let mut buf = [0u8; 5];
    file.read(&ctx, &mut buf, 0).await.unwrap();
    assert_eq!(&buf, b"abcde");
}

#[rstest]
#[tokio::test]
async fn truncate_shrink(
    #[values(
        Backend::Memory,
        Backend::Disk,
        Backend::LayeredMemory,
        Backend::LayeredDisk
    )]
    backend: Backend,
) {
    let ctx = Context::background();
    let mount = mount(backend).await;
    let file = mount.root.create_file(&ctx, "f", 4).await.unwrap();

    file.write(&ctx, b"0123456789", 0, WriteOptions::default())
        .await
        .unwrap();
    file.truncate(&ctx, 5).await.unwrap();
    assert_eq!(file.size(&ctx).await.unwrap(), 5);
    let info = file.storage().info(&ctx).await.unwrap();
    assert_eq!(info.chunks_count, 2);
    assert_eq!(info.last_chunk_size, 1);
    assert_eq!(file.read_range(&ctx, 0, 10).await.unwrap(), b"01234");
}

#[tokio::test]
async fn layered_lazy_materialisation() {
    chonk_utils::logger::install_fmt_log();
    let ctx = Context::background();
    let upper: StorageDirectoryRef = MemoryDirectory::new();
    let under: StorageDirectoryRef = MemoryDirectory::new();
    let under_file = under
        .create_file(&ctx, "F", FileInfo::new(4096))
        .await
        .unwrap();
    under_file.resize_chunks_nb(&ctx, 1).await.unwrap();
    under_file
        .write_chunk(&ctx, 0, b"Hello, World!", 0)
        .await
        .unwrap();
    let layered = LayeredDirectory::new(upper.clone(), under.clone(), LayeredConfig::default());

    let file = layered.get_file(&ctx, "F").await.unwrap();
    let upper_file = upper.get_file(&ctx, "F").await.unwrap();
    assert_eq!(upper_file.info(&ctx).await.unwrap().chunk_size, 4096);

    let mut buf = vec![0u8; 4096];
    assert_eq!(file.read_chunk(&ctx, 0, &mut buf, 0).await.unwrap(), 4096);
    assert_eq!(&buf[..13], b"Hello, World!");

    // the upper layer now answers on its own.
    let mut buf = vec![0u8; 4096];
    upper_file.read_chunk(&ctx, 0, &mut buf, 0).await.unwrap();
    assert_eq!(&buf[..13], b"Hello, World!");
    assert_eq!(
        upper_file.info(&ctx).await.unwrap(),
        under_file.info(&ctx).await.unwrap()
    );
    under.remove_file(&ctx, "F").await.unwrap();
    upper_file.read_chunk(&ctx, 0, &mut buf, 0).await.unwrap();
    assert_eq!(&buf[..13], b"Hello, World!");
}

#[tokio::test]
async fn layered_rename_only_in_under() {
    chonk_utils::logger::install_fmt_log();
    let ctx = Context::background();
    let upper: StorageDirectoryRef = MemoryDirectory::new();
    let under: StorageDirectoryRef = MemoryDirectory::new();
    under.create_directory(&ctx, "D").await.unwrap();
    let layered = LayeredDirectory::new(upper.clone(), under.clone(), LayeredConfig::default());

    layered
        .rename_directory(&ctx, "D", &layered, "D2", false)
        .await
        .unwrap();
    for layer in [&upper, &under] {
        assert!(layer.get_directory(&ctx, "D").await.unwrap_err().is_not_found());
    }
    assert!(under.get_directory(&ctx, "D2").await.is_ok());
    assert!(upper.get_directory(&ctx, "D2").await.is_err());

    // the next operation needing it materialises D2 in upper.
    let d2 = layered.get_directory(&ctx, "D2").await.unwrap();
    d2.create_file(&ctx, "f", FileInfo::new(8)).await.unwrap();
    let upper_d2 = upper.get_directory(&ctx, "D2").await.unwrap();
    assert!(upper_d2.get_file(&ctx, "f").await.is_ok());
}

#[rstest]
#[tokio::test]
async fn round_trip_laws(
    #[values(
        Backend::Memory,
        Backend::Disk,
        Backend::LayeredMemory,
        Backend::LayeredDisk
    )]
    backend: Backend,
) {
    let ctx = Context::background();
    let mount = mount(backend).await;
    let file = mount.root.create_file(&ctx, "f", 3).await.unwrap();
    let data = b"the quick brown fox";

    file.write(&ctx, data, 0, WriteOptions::truncate()).await.unwrap();
    assert_eq!(file.size(&ctx).await.unwrap(), data.len());
    assert_eq!(file.read_range(&ctx, 0, data.len()).await.unwrap(), data);

    file.write(&ctx, b"slow", 4, WriteOptions::truncate()).await.unwrap();
    assert_eq!(file.read_range(&ctx, 0, 100).await.unwrap(), b"the slow");

    let old_size = file.size(&ctx).await.unwrap();
    file.write(&ctx, b" dog", old_size, WriteOptions::append())
        .await
        .unwrap();
    assert_eq!(file.size(&ctx).await.unwrap(), old_size + 4);
    assert_eq!(file.read_range(&ctx, old_size, old_size + 4).await.unwrap(), b" dog");

    for n in [20, 12, 7, 6, 0] {
        let before = file.size(&ctx).await.unwrap();
        file.truncate(&ctx, n).await.unwrap();
        assert_eq!(file.size(&ctx).await.unwrap(), before.min(n));
    }

    let mut buf = [0u8; 4];
    assert_eq!(file.read(&ctx, &mut buf, 0).await.unwrap(), 0);

    mount.root.rename_file(&ctx, "f", &mount.root, "f", true).await.unwrap();
    assert!(mount.root.get_file(&ctx, "f").await.is_ok());

    mount.root.remove_file(&ctx, "f").await.unwrap();
    assert!(mount.root.get_file(&ctx, "f").await.unwrap_err().is_not_found());
}

#[rstest]
#[tokio::test]
async fn namespace_through_the_chunker(
    #[values(
        Backend::Memory,
        Backend::Disk,
        Backend::LayeredMemory,
        Backend::LayeredDisk
    )]
    backend: Backend,
) {
    let ctx = Context::background();
    let mount = mount(backend).await;
    let docs = mount.root.create_directory(&ctx, "docs").await.unwrap();
    let file = docs.create_file_default(&ctx, "readme").await.unwrap();
    file.write(&ctx, b"# chonkfs", 0, WriteOptions::default())
        .await
        .unwrap();
    file.sync(&ctx).await.unwrap();

    assert!(matches!(
        mount.root.get_file(&ctx, "docs").await,
        Err(Error::NotFile { .. })
    ));
    assert!(matches!(
        docs.get_directory(&ctx, "readme").await,
        Err(Error::NotDirectory { .. })
    ));
    assert!(matches!(
        mount.root.create_file(&ctx, "zero", 0).await,
        Err(Error::StorageError { .. })
    ));

    let archive = mount.root.create_directory(&ctx, "archive").await.unwrap();
    mount
        .root
        .rename_directory(&ctx, "docs", &archive, "docs-old", true)
        .await
        .unwrap();
    let moved = archive.get_directory(&ctx, "docs-old").await.unwrap();
    let readme = moved.get_file(&ctx, "readme").await.unwrap();
    assert_eq!(readme.read_range(&ctx, 0, 64).await.unwrap(), b"# chonkfs");
    assert_eq!(
        mount
            .root
            .list_directories(&ctx)
            .await
            .unwrap()
            .keys()
            .collect::<Vec<_>>(),
        ["archive"]
    );

    mount.root.remove_directory(&ctx, "archive").await.unwrap();
    assert!(mount.root.list_directories(&ctx).await.unwrap().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_on_one_mount(
    #[values(
        Backend::Memory,
        Backend::Disk,
        Backend::LayeredMemory,
        Backend::LayeredDisk
    )]
    backend: Backend,
) {
    let ctx = Context::background();
    let mount = mount(backend).await;
    mount.root.create_file(&ctx, "log", 8).await.unwrap();

    let mut tasks = vec![];
    for _ in 0..4 {
        let root = mount.root.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = Context::background();
            let file = root.get_file(&ctx, "log").await.unwrap();
            for _ in 0..50 {
                file.write(&ctx, b"abc", 0, WriteOptions::append())
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let file = mount.root.get_file(&ctx, "log").await.unwrap();
    assert_eq!(file.size(&ctx).await.unwrap(), 4 * 50 * 3);
    let content = file.read_range(&ctx, 0, 4 * 50 * 3).await.unwrap();
    assert!(content.chunks(3).all(|c| c == b"abc"));
}
