// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use std::io::{Read, Write};

use memfs_core::{ErrorCode, SharedFs, VirtualFile};

fn shared() -> SharedFs {
    SharedFs::new(common::scenario_fs())
}

#[tokio::test]
async fn test_future_convention_resolves() {
    let fs = shared();
    let names = fs.call_async(|core| core.readdir("nested/sub/dir")).await.unwrap();
    assert_eq!(names, vec!["empty", "one.txt", "two.txt"]);
}

#[tokio::test]
async fn test_future_convention_rejects() {
    let fs = shared();
    let err = fs.call_async(|core| core.readdir("bogus")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_conventions_share_one_engine() {
    let fs = shared();
    fs.call_async(|core| core.write_file("/async.txt", "from a future"))
        .await
        .unwrap();

    let mut seen = None;
    fs.call_with(|core| core.read_to_string("/async.txt"), |r| seen = Some(r));
    assert_eq!(seen.unwrap().unwrap(), "from a future");
    assert_eq!(fs.call(|core| core.stat("/async.txt")).unwrap().size, 13);
}

#[tokio::test]
async fn test_tasks_observe_whole_operations() {
    let fs = shared();
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let fs = fs.clone();
            tokio::spawn(async move {
                let path = format!("/tmp/task-{i:02}");
                fs.call_async(move |core| core.write_file(&path, "x")).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(fs.readdir("/tmp").unwrap().len(), 16);
}

#[test]
fn test_std_io_adapter() -> anyhow::Result<()> {
    let fs = shared();
    {
        let mut file = VirtualFile::create(&fs, "/report.txt")?;
        file.write_all(b"alpha\n")?;
        file.write_all(b"beta\n")?;
    }
    let mut text = String::new();
    VirtualFile::open(&fs, "/report.txt")?.read_to_string(&mut text)?;
    assert_eq!(text, "alpha\nbeta\n");
    assert_eq!(fs.stats().open_descriptors, 0);
    Ok(())
}
