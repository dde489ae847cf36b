// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory POSIX-like filesystem engine.
//!
//! Build a virtual tree from a [`Layout`], then list, read, write, link and
//! stat it with the error codes a real filesystem would produce.
//!
//! ```no_run
//! use memfs_core::{FsConfig, FsCore, Layout, LayoutEntry, OpenOptions};
//!
//! let layout = Layout::new()
//!     .entry("path/to/file.txt", "file content")
//!     .entry("nested/sub/dir", LayoutEntry::dir().with("one.txt", "1"));
//! let fs = FsCore::with_layout(FsConfig::default(), &layout)?;
//!
//! assert_eq!(fs.readdir("path/to")?, vec!["file.txt"]);
//!
//! let fd = fs.open("new.txt", &OpenOptions::create_truncate())?;
//! fs.write(fd, b"hi")?;
//! fs.close(fd)?;
//! assert_eq!(fs.read_file("new.txt")?, b"hi");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod file;
pub mod layout;
pub mod shared;
pub mod types;
pub mod vfs;

mod descriptor;
mod inode;
mod ops;
mod tree;

pub use clock::{Clock, SystemClock};
pub use config::{FsConfig, FsLimits, SecurityPolicy};
pub use error::{ErrorCode, FsError, FsResult};
pub use file::VirtualFile;
pub use layout::{EntryMeta, Layout, LayoutEntry, LayoutError};
pub use shared::SharedFs;
pub use types::{
    AccessMode, Credentials, DirEntry, Fd, FileKind, FileTimes, FsStats, OpenOptions,
    RemoveOptions, Stats,
};
pub use vfs::FsCore;
