// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Public value types shared by the engine API

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CodeResult, ErrorCode};

/// Open file descriptor number
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

impl Fd {
    pub fn new(fd: u32) -> Self {
        Self(fd)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Fd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inode timestamps, nanoseconds since the Unix epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTimes {
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
}

impl FileTimes {
    pub fn all(now: i64) -> Self {
        Self {
            atime: now,
            mtime: now,
            ctime: now,
            birthtime: now,
        }
    }
}

/// Convert an epoch-nanosecond timestamp into a `SystemTime`
pub fn to_system_time(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
    }
}

/// Convert a `SystemTime` into epoch nanoseconds
pub fn from_system_time(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Kind of object an inode represents
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
}

impl FileKind {
    /// `S_IF*` type bits for this kind
    pub fn type_bits(self) -> u32 {
        match self {
            FileKind::File => libc::S_IFREG as u32,
            FileKind::Directory => libc::S_IFDIR as u32,
            FileKind::Symlink => libc::S_IFLNK as u32,
        }
    }
}

/// Snapshot of inode metadata returned by the stat family
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stats {
    pub ino: u64,
    pub kind: FileKind,
    /// Type bits combined with permission bits
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub times: FileTimes,
}

impl Stats {
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn accessed(&self) -> SystemTime {
        to_system_time(self.times.atime)
    }

    pub fn modified(&self) -> SystemTime {
        to_system_time(self.times.mtime)
    }

    pub fn changed(&self) -> SystemTime {
        to_system_time(self.times.ctime)
    }

    pub fn created(&self) -> SystemTime {
        to_system_time(self.times.birthtime)
    }
}

/// Directory listing entry with its type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Simulated caller identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups
    pub groups: Vec<u32>,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            groups: vec![gid],
        }
    }

    pub fn root() -> Self {
        Self::new(0, 0)
    }

    pub fn with_groups(mut self, groups: Vec<u32>) -> Self {
        self.groups = groups;
        self
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Access classes requested by `access()`; all false means existence only
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessMode {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl AccessMode {
    pub const EXISTS: AccessMode = AccessMode {
        read: false,
        write: false,
        execute: false,
    };
    pub const READ: AccessMode = AccessMode {
        read: true,
        write: false,
        execute: false,
    };
    pub const WRITE: AccessMode = AccessMode {
        read: false,
        write: true,
        execute: false,
    };
    pub const EXECUTE: AccessMode = AccessMode {
        read: false,
        write: false,
        execute: true,
    };

    /// Decode `F_OK`/`R_OK`/`W_OK`/`X_OK` bits
    pub fn from_bits(bits: i32) -> Self {
        Self {
            read: bits & libc::R_OK != 0,
            write: bits & libc::W_OK != 0,
            execute: bits & libc::X_OK != 0,
        }
    }
}

/// Options for `remove`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Remove directories and their contents
    pub recursive: bool,
    /// Ignore a missing target
    pub force: bool,
}

/// File open options
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    /// Fail with EEXIST if the target exists (`O_EXCL`)
    pub create_new: bool,
    pub truncate: bool,
    /// Fail with ENOTDIR unless the target is a directory
    pub directory: bool,
    /// Fail with ELOOP if the final component is a symlink
    pub nofollow: bool,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    /// `w`: write, create, truncate
    pub fn create_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// `a`: append, create
    pub fn append_create() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Self::default()
        }
    }

    /// Parse a flag string such as `r`, `r+`, `wx`, `a+`
    pub fn from_flags(flags: &str) -> CodeResult<Self> {
        let opts = match flags {
            "r" | "rs" | "sr" => Self::read_only(),
            "r+" | "rs+" | "sr+" => Self::read_write(),
            "w" => Self::create_truncate(),
            "wx" | "xw" => Self {
                create_new: true,
                ..Self::create_truncate()
            },
            "w+" => Self {
                read: true,
                ..Self::create_truncate()
            },
            "wx+" | "xw+" => Self {
                read: true,
                create_new: true,
                ..Self::create_truncate()
            },
            "a" | "as" | "sa" => Self::append_create(),
            "ax" | "xa" => Self {
                create_new: true,
                ..Self::append_create()
            },
            "a+" | "as+" | "sa+" => Self {
                read: true,
                ..Self::append_create()
            },
            "ax+" | "xa+" => Self {
                read: true,
                create_new: true,
                ..Self::append_create()
            },
            _ => return Err(ErrorCode::InvalidArgument),
        };
        Ok(opts)
    }

    /// Decode raw `O_*` open flags
    pub fn from_raw(flags: i32) -> CodeResult<Self> {
        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_RDONLY => (true, false),
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => return Err(ErrorCode::InvalidArgument),
        };
        Ok(Self {
            read,
            write,
            append: flags & libc::O_APPEND != 0,
            create: flags & libc::O_CREAT != 0,
            create_new: flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0,
            truncate: flags & libc::O_TRUNC != 0,
            directory: flags & libc::O_DIRECTORY != 0,
            nofollow: flags & libc::O_NOFOLLOW != 0,
        })
    }
}

/// Engine-wide counters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsStats {
    pub inodes: usize,
    pub open_descriptors: usize,
    pub bytes_stored: u64,
}
