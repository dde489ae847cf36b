// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Open file descriptor table

use std::collections::BTreeMap;

use crate::error::{CodeResult, ErrorCode};
use crate::inode::InodeId;
use crate::types::{Fd, OpenOptions};

/// First descriptor handed out; 0-2 stay reserved for the standard streams
pub(crate) const FIRST_FD: u32 = 3;

/// Open handle onto an inode
#[derive(Clone, Debug)]
pub(crate) struct Descriptor {
    pub inode: InodeId,
    /// Read/write offset; ignored by appending writes
    pub position: u64,
    pub options: OpenOptions,
    /// Path used at open time, for diagnostics
    pub path: String,
}

#[derive(Debug)]
pub(crate) struct DescriptorTable {
    open: BTreeMap<Fd, Descriptor>,
    limit: u32,
}

impl DescriptorTable {
    pub fn new(limit: u32) -> Self {
        Self {
            open: BTreeMap::new(),
            limit,
        }
    }

    /// Register `descriptor` under the lowest free number
    pub fn allocate(&mut self, descriptor: Descriptor) -> CodeResult<Fd> {
        if self.is_full() {
            return Err(ErrorCode::TooManyOpenFiles);
        }
        let mut candidate = FIRST_FD;
        for fd in self.open.keys() {
            if fd.0 != candidate {
                break;
            }
            candidate += 1;
        }
        let fd = Fd(candidate);
        tracing::debug!(%fd, path = %descriptor.path, "descriptor opened");
        self.open.insert(fd, descriptor);
        Ok(fd)
    }

    pub fn lookup(&self, fd: Fd) -> CodeResult<&Descriptor> {
        self.open.get(&fd).ok_or(ErrorCode::BadFileDescriptor)
    }

    pub fn lookup_mut(&mut self, fd: Fd) -> CodeResult<&mut Descriptor> {
        self.open.get_mut(&fd).ok_or(ErrorCode::BadFileDescriptor)
    }

    pub fn release(&mut self, fd: Fd) -> CodeResult<Descriptor> {
        let descriptor = self.open.remove(&fd).ok_or(ErrorCode::BadFileDescriptor)?;
        tracing::debug!(%fd, path = %descriptor.path, "descriptor closed");
        Ok(descriptor)
    }

    /// Whether any open descriptor keeps `inode` alive
    pub fn references(&self, inode: InodeId) -> bool {
        self.open.values().any(|d| d.inode == inode)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_full(&self) -> bool {
        self.open.len() >= self.limit as usize
    }
}
