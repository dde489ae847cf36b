// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Inode model: files, directories and symbolic links

use std::collections::BTreeMap;

use crate::config::SecurityPolicy;
use crate::error::{CodeResult, ErrorCode};
use crate::types::{AccessMode, Credentials, FileKind, FileTimes, Stats};

const BLOCK_SIZE: u64 = 4096;

/// Stable arena identifier of an inode. Never reused within one filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct InodeId(pub(crate) u64);

/// Variant payload of an inode
#[derive(Clone, Debug)]
pub(crate) enum InodeKind {
    File {
        content: Vec<u8>,
    },
    Directory {
        /// Name -> child. Names are never empty, `.`, `..` or contain `/`.
        entries: BTreeMap<String, InodeId>,
        /// Containing directory; the root points at itself
        parent: InodeId,
    },
    Symlink {
        /// Stored verbatim, resolved only on traversal
        target: String,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Inode {
    pub id: InodeId,
    pub kind: InodeKind,
    /// Permission bits only (`0o7777`); type bits come from `kind`
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub times: FileTimes,
    pub nlink: u32,
}

/// Make room for `len` bytes in total, reporting allocation failure as EFBIG
pub(crate) fn reserve_to(content: &mut Vec<u8>, len: usize) -> CodeResult<()> {
    if let Some(extra) = len.checked_sub(content.len()) {
        content
            .try_reserve_exact(extra)
            .map_err(|_| ErrorCode::FileTooLarge)?;
    }
    Ok(())
}

impl Inode {
    pub fn new(id: InodeId, kind: InodeKind, mode: u32, owner: &Credentials, now: i64) -> Self {
        let nlink = match kind {
            InodeKind::Directory { .. } => 2, // '.' and the parent entry
            _ => 1,
        };
        Self {
            id,
            kind,
            mode: mode & 0o7777,
            uid: owner.uid,
            gid: owner.gid,
            times: FileTimes::all(now),
            nlink,
        }
    }

    pub fn file_kind(&self) -> FileKind {
        match self.kind {
            InodeKind::File { .. } => FileKind::File,
            InodeKind::Directory { .. } => FileKind::Directory,
            InodeKind::Symlink { .. } => FileKind::Symlink,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, InodeKind::Directory { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, InodeKind::Symlink { .. })
    }

    pub fn is_sticky(&self) -> bool {
        self.mode & libc::S_ISVTX as u32 != 0
    }

    pub fn size(&self) -> u64 {
        match &self.kind {
            InodeKind::File { content } => content.len() as u64,
            InodeKind::Directory { .. } => 0,
            InodeKind::Symlink { target } => target.len() as u64,
        }
    }

    pub fn entries(&self) -> CodeResult<&BTreeMap<String, InodeId>> {
        match &self.kind {
            InodeKind::Directory { entries, .. } => Ok(entries),
            _ => Err(ErrorCode::NotADirectory),
        }
    }

    pub fn entries_mut(&mut self) -> CodeResult<&mut BTreeMap<String, InodeId>> {
        match &mut self.kind {
            InodeKind::Directory { entries, .. } => Ok(entries),
            _ => Err(ErrorCode::NotADirectory),
        }
    }

    pub fn content(&self) -> CodeResult<&Vec<u8>> {
        match &self.kind {
            InodeKind::File { content } => Ok(content),
            InodeKind::Directory { .. } => Err(ErrorCode::IsADirectory),
            InodeKind::Symlink { .. } => Err(ErrorCode::InvalidArgument),
        }
    }

    pub fn content_mut(&mut self) -> CodeResult<&mut Vec<u8>> {
        match &mut self.kind {
            InodeKind::File { content } => Ok(content),
            InodeKind::Directory { .. } => Err(ErrorCode::IsADirectory),
            InodeKind::Symlink { .. } => Err(ErrorCode::InvalidArgument),
        }
    }

    /// Resize file content, zero-filling any growth. Content is left
    /// untouched when the new length cannot be allocated.
    pub fn resize(&mut self, len: u64, now: i64) -> CodeResult<()> {
        let content = self.content_mut()?;
        let len = usize::try_from(len).map_err(|_| ErrorCode::FileTooLarge)?;
        reserve_to(content, len)?;
        content.resize(len, 0);
        self.touch_modified(now);
        Ok(())
    }

    pub fn touch_modified(&mut self, now: i64) {
        self.times.mtime = now;
        self.times.ctime = now;
    }

    pub fn touch_changed(&mut self, now: i64) {
        self.times.ctime = now;
    }

    pub fn stats(&self) -> Stats {
        let size = self.size();
        Stats {
            ino: self.id.0,
            kind: self.file_kind(),
            mode: self.file_kind().type_bits() | self.mode,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            size,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(512),
            times: self.times,
        }
    }

    /// Check the owner/group/other class bits for `user` against `want`
    pub fn permits(&self, user: &Credentials, want: AccessMode, policy: &SecurityPolicy) -> bool {
        if !policy.enforce_posix_permissions {
            return true;
        }
        if policy.root_bypass_permissions && user.is_root() {
            // root still needs some execute bit on non-directories
            return !want.execute || self.is_dir() || self.mode & 0o111 != 0;
        }

        let (r_bit, w_bit, x_bit) = if user.uid == self.uid {
            (0o400, 0o200, 0o100)
        } else if user.in_group(self.gid) {
            (0o040, 0o020, 0o010)
        } else {
            (0o004, 0o002, 0o001)
        };

        let allow_r = !want.read || self.mode & r_bit != 0;
        let allow_w = !want.write || self.mode & w_bit != 0;
        let allow_x = !want.execute || self.mode & x_bit != 0;
        allow_r && allow_w && allow_x
    }
}
