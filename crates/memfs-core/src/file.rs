// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `std::io` adapter over an open descriptor

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::FsResult;
use crate::shared::SharedFs;
use crate::types::{Fd, OpenOptions, Stats};

/// Owned open file on a [`SharedFs`]; the descriptor is closed on drop
#[derive(Debug)]
pub struct VirtualFile {
    fs: SharedFs,
    fd: Fd,
    closed: bool,
}

impl VirtualFile {
    pub fn open_with(fs: &SharedFs, path: impl AsRef<Path>, options: &OpenOptions) -> FsResult<Self> {
        let fd = fs.open(path, options)?;
        Ok(Self {
            fs: fs.clone(),
            fd,
            closed: false,
        })
    }

    /// Open read-only
    pub fn open(fs: &SharedFs, path: impl AsRef<Path>) -> FsResult<Self> {
        Self::open_with(fs, path, &OpenOptions::read_only())
    }

    /// Create or truncate for writing
    pub fn create(fs: &SharedFs, path: impl AsRef<Path>) -> FsResult<Self> {
        Self::open_with(fs, path, &OpenOptions::create_truncate())
    }

    pub fn fd(&self) -> Fd {
        self.fd
    }

    pub fn metadata(&self) -> FsResult<Stats> {
        self.fs.fstat(self.fd)
    }

    pub fn set_len(&self, len: u64) -> FsResult<()> {
        self.fs.ftruncate(self.fd, len)
    }

    pub fn sync_all(&self) -> FsResult<()> {
        self.fs.fsync(self.fd)
    }

    /// Close now and report the outcome instead of ignoring it in `Drop`
    pub fn close(mut self) -> FsResult<()> {
        self.closed = true;
        self.fs.close(self.fd)
    }
}

impl Read for VirtualFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.fs.read(self.fd, buf)?)
    }
}

impl Write for VirtualFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.fs.write(self.fd, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.fs.fsync(self.fd)?)
    }
}

impl Seek for VirtualFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.fs.seek(self.fd, pos)?)
    }
}

impl Drop for VirtualFile {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.fs.close(self.fd) {
            tracing::debug!(fd = %self.fd, error = %err, "close on drop failed");
        }
    }
}
