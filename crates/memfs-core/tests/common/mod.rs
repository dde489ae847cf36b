// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

#![allow(dead_code)]

use memfs_core::{FsConfig, FsCore, Layout, LayoutEntry};

/// Route engine logs to the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The tree used by the listing scenarios
pub fn scenario_layout() -> Layout {
    Layout::new().entry("path/to/file.txt", "file content").entry(
        "nested/sub/dir",
        LayoutEntry::dir()
            .with("one.txt", "file one content")
            .with("two.txt", "file two content")
            .with("empty", LayoutEntry::dir()),
    )
}

pub fn scenario_fs() -> FsCore {
    init_tracing();
    FsCore::with_layout(FsConfig::default(), &scenario_layout()).expect("layout applies")
}

pub fn empty_fs() -> FsCore {
    init_tracing();
    FsCore::new(FsConfig::default()).expect("filesystem")
}
