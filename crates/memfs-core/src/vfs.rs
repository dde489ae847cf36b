// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Public filesystem facade
//!
//! [`FsCore`] owns one independent virtual filesystem. Each method takes the
//! engine lock once and holds it for the whole operation, so concurrent
//! callers never observe a partially applied change.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::clock::{Clock, SystemClock};
use crate::config::FsConfig;
use crate::error::{CodeResult, ErrorCode, FsError, FsResult};
use crate::layout::{Layout, LayoutError};
use crate::ops::FsState;
use crate::types::{
    from_system_time, AccessMode, Credentials, DirEntry, Fd, FsStats, OpenOptions, RemoveOptions,
    Stats,
};

fn as_str(path: &Path) -> CodeResult<&str> {
    path.to_str().ok_or(ErrorCode::InvalidArgument)
}

/// In-memory POSIX-like filesystem
pub struct FsCore {
    state: Mutex<FsState>,
}

impl std::fmt::Debug for FsCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("FsCore")
            .field("inodes", &stats.inodes)
            .field("open_descriptors", &stats.open_descriptors)
            .finish()
    }
}

impl FsCore {
    /// Create an empty filesystem using the host clock
    pub fn new(config: FsConfig) -> FsResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty filesystem with an injected time source
    pub fn with_clock(config: FsConfig, clock: Arc<dyn Clock>) -> FsResult<Self> {
        let cwd = config.cwd.clone();
        let state = FsState::new(config, clock)
            .map_err(|code| FsError::with_path(code, "init", Path::new(&cwd)))?;
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Create a filesystem populated from `layout` before any operation runs
    pub fn with_layout(config: FsConfig, layout: &Layout) -> Result<Self, LayoutError> {
        Self::with_layout_and_clock(config, layout, Arc::new(SystemClock))
    }

    pub fn with_layout_and_clock(
        config: FsConfig,
        layout: &Layout,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LayoutError> {
        let core = Self::with_clock(config, clock)?;
        layout.apply(&mut *core.lock())?;
        Ok(core)
    }

    fn lock(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn at<T>(
        &self,
        syscall: &'static str,
        path: &Path,
        op: impl FnOnce(&mut FsState, &str) -> CodeResult<T>,
    ) -> FsResult<T> {
        let result = as_str(path).and_then(|p| op(&mut *self.lock(), p));
        result.map_err(|code| FsError::with_path(code, syscall, path))
    }

    fn between<T>(
        &self,
        syscall: &'static str,
        from: &Path,
        to: &Path,
        op: impl FnOnce(&mut FsState, &str, &str) -> CodeResult<T>,
    ) -> FsResult<T> {
        let result = as_str(from)
            .and_then(|f| as_str(to).map(|t| (f, t)))
            .and_then(|(f, t)| op(&mut *self.lock(), f, t));
        result.map_err(|code| FsError::with_paths(code, syscall, from, to))
    }

    fn on_fd<T>(
        &self,
        syscall: &'static str,
        op: impl FnOnce(&mut FsState) -> CodeResult<T>,
    ) -> FsResult<T> {
        op(&mut *self.lock()).map_err(|code| FsError::new(code, syscall))
    }

    // Identity and counters

    /// Act as `credentials` for all following operations
    pub fn set_credentials(&self, credentials: Credentials) {
        self.lock().set_credentials(credentials);
    }

    pub fn credentials(&self) -> Credentials {
        self.lock().credentials().clone()
    }

    pub fn stats(&self) -> FsStats {
        self.lock().stats()
    }

    pub fn config(&self) -> FsConfig {
        self.lock().config.clone()
    }

    // Metadata queries

    pub fn stat(&self, path: impl AsRef<Path>) -> FsResult<Stats> {
        self.at("stat", path.as_ref(), |s, p| s.stat(p))
    }

    /// Like [`FsCore::stat`] but reports a final symlink itself
    pub fn lstat(&self, path: impl AsRef<Path>) -> FsResult<Stats> {
        self.at("lstat", path.as_ref(), |s, p| s.lstat(p))
    }

    pub fn fstat(&self, fd: Fd) -> FsResult<Stats> {
        self.on_fd("fstat", |s| s.fstat(fd))
    }

    pub fn access(&self, path: impl AsRef<Path>, mode: AccessMode) -> FsResult<()> {
        self.at("access", path.as_ref(), |s, p| s.access(p, mode))
    }

    /// True when `path` resolves; never fails
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        as_str(path.as_ref())
            .map(|p| self.lock().exists(p))
            .unwrap_or(false)
    }

    /// Canonical absolute path with every symlink resolved
    pub fn realpath(&self, path: impl AsRef<Path>) -> FsResult<String> {
        self.at("realpath", path.as_ref(), |s, p| s.realpath(p))
    }

    pub fn readlink(&self, path: impl AsRef<Path>) -> FsResult<String> {
        self.at("readlink", path.as_ref(), |s, p| s.readlink(p))
    }

    // Directories

    /// Entry names sorted by byte value
    pub fn readdir(&self, path: impl AsRef<Path>) -> FsResult<Vec<String>> {
        self.at("scandir", path.as_ref(), |s, p| s.readdir(p))
    }

    pub fn readdir_entries(&self, path: impl AsRef<Path>) -> FsResult<Vec<DirEntry>> {
        self.at("scandir", path.as_ref(), |s, p| s.readdir_entries(p))
    }

    pub fn mkdir(&self, path: impl AsRef<Path>) -> FsResult<()> {
        self.at("mkdir", path.as_ref(), |s, p| {
            let mode = s.config.default_dir_mode;
            s.mkdir(p, mode).map(|_| ())
        })
    }

    pub fn mkdir_with_mode(&self, path: impl AsRef<Path>, mode: u32) -> FsResult<()> {
        self.at("mkdir", path.as_ref(), |s, p| s.mkdir(p, mode).map(|_| ()))
    }

    /// Create a directory and any missing ancestors, returning the first one created
    pub fn mkdir_all(&self, path: impl AsRef<Path>) -> FsResult<Option<String>> {
        self.at("mkdir", path.as_ref(), |s, p| {
            let mode = s.config.default_dir_mode;
            s.mkdir_all(p, mode)
        })
    }

    pub fn rmdir(&self, path: impl AsRef<Path>) -> FsResult<()> {
        self.at("rmdir", path.as_ref(), |s, p| s.rmdir(p))
    }

    /// Create a unique directory named `prefix` plus six random characters
    pub fn mkdtemp(&self, prefix: impl AsRef<Path>) -> FsResult<String> {
        self.at("mkdtemp", prefix.as_ref(), |s, p| s.mkdtemp(p))
    }

    pub fn chdir(&self, path: impl AsRef<Path>) -> FsResult<()> {
        self.at("chdir", path.as_ref(), |s, p| s.chdir(p))
    }

    pub fn cwd(&self) -> FsResult<String> {
        self.on_fd("uv_cwd", |s| s.cwd())
    }

    // Entries

    pub fn unlink(&self, path: impl AsRef<Path>) -> FsResult<()> {
        self.at("unlink", path.as_ref(), |s, p| s.unlink(p))
    }

    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> FsResult<()> {
        self.between("rename", from.as_ref(), to.as_ref(), |s, f, t| s.rename(f, t))
    }

    /// Add a hard link `new` to the inode at `existing`
    pub fn link(&self, existing: impl AsRef<Path>, new: impl AsRef<Path>) -> FsResult<()> {
        self.between("link", existing.as_ref(), new.as_ref(), |s, e, n| s.link(e, n))
    }

    /// Create `path` as a symlink storing `target` verbatim
    pub fn symlink(&self, target: impl AsRef<Path>, path: impl AsRef<Path>) -> FsResult<()> {
        self.between("symlink", target.as_ref(), path.as_ref(), |s, t, p| s.symlink(t, p))
    }

    pub fn remove(&self, path: impl AsRef<Path>, options: RemoveOptions) -> FsResult<()> {
        self.at("rm", path.as_ref(), |s, p| s.remove(p, options))
    }

    // Metadata changes

    pub fn chmod(&self, path: impl AsRef<Path>, mode: u32) -> FsResult<()> {
        self.at("chmod", path.as_ref(), |s, p| s.chmod(p, mode))
    }

    pub fn lchmod(&self, path: impl AsRef<Path>, mode: u32) -> FsResult<()> {
        self.at("lchmod", path.as_ref(), |s, p| s.lchmod(p, mode))
    }

    pub fn fchmod(&self, fd: Fd, mode: u32) -> FsResult<()> {
        self.on_fd("fchmod", |s| s.fchmod(fd, mode))
    }

    pub fn chown(&self, path: impl AsRef<Path>, uid: u32, gid: u32) -> FsResult<()> {
        self.at("chown", path.as_ref(), |s, p| s.chown(p, uid, gid))
    }

    pub fn lchown(&self, path: impl AsRef<Path>, uid: u32, gid: u32) -> FsResult<()> {
        self.at("lchown", path.as_ref(), |s, p| s.lchown(p, uid, gid))
    }

    pub fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> FsResult<()> {
        self.on_fd("fchown", |s| s.fchown(fd, uid, gid))
    }

    pub fn utimes(&self, path: impl AsRef<Path>, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        let (atime, mtime) = (from_system_time(atime), from_system_time(mtime));
        self.at("utime", path.as_ref(), |s, p| s.utimes(p, atime, mtime))
    }

    pub fn lutimes(&self, path: impl AsRef<Path>, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        let (atime, mtime) = (from_system_time(atime), from_system_time(mtime));
        self.at("lutime", path.as_ref(), |s, p| s.lutimes(p, atime, mtime))
    }

    pub fn futimes(&self, fd: Fd, atime: SystemTime, mtime: SystemTime) -> FsResult<()> {
        let (atime, mtime) = (from_system_time(atime), from_system_time(mtime));
        self.on_fd("futime", |s| s.futimes(fd, atime, mtime))
    }

    /// Resize a file, zero-filling growth
    pub fn truncate(&self, path: impl AsRef<Path>, len: u64) -> FsResult<()> {
        self.at("open", path.as_ref(), |s, p| s.truncate(p, len))
    }

    pub fn ftruncate(&self, fd: Fd, len: u64) -> FsResult<()> {
        self.on_fd("ftruncate", |s| s.ftruncate(fd, len))
    }

    // Descriptors

    /// Open `path`, creating it with the default file mode when requested
    pub fn open(&self, path: impl AsRef<Path>, options: &OpenOptions) -> FsResult<Fd> {
        self.at("open", path.as_ref(), |s, p| {
            let mode = s.config.default_file_mode;
            s.open(p, options, mode)
        })
    }

    pub fn open_with_mode(&self, path: impl AsRef<Path>, options: &OpenOptions, mode: u32) -> FsResult<Fd> {
        self.at("open", path.as_ref(), |s, p| s.open(p, options, mode))
    }

    pub fn close(&self, fd: Fd) -> FsResult<()> {
        self.on_fd("close", |s| s.close(fd))
    }

    pub fn fsync(&self, fd: Fd) -> FsResult<()> {
        self.on_fd("fsync", |s| s.fsync(fd))
    }

    /// Read at the descriptor offset and advance it
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        self.on_fd("read", |s| s.read(fd, buf))
    }

    pub fn read_at(&self, fd: Fd, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        self.on_fd("read", |s| s.read_at(fd, buf, offset))
    }

    /// Write at the descriptor offset (or the end in append mode) and advance it
    pub fn write(&self, fd: Fd, data: &[u8]) -> FsResult<usize> {
        self.on_fd("write", |s| s.write(fd, data))
    }

    pub fn write_at(&self, fd: Fd, data: &[u8], offset: u64) -> FsResult<usize> {
        self.on_fd("write", |s| s.write_at(fd, data, offset))
    }

    pub fn seek(&self, fd: Fd, pos: SeekFrom) -> FsResult<u64> {
        self.on_fd("lseek", |s| s.seek(fd, pos))
    }

    // Whole-file helpers

    pub fn read_file(&self, path: impl AsRef<Path>) -> FsResult<Vec<u8>> {
        self.at("open", path.as_ref(), |s, p| s.read_file(p))
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> FsResult<String> {
        let path = path.as_ref();
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|_| FsError::with_path(ErrorCode::InvalidArgument, "read", path))
    }

    /// Replace the content of `path`, creating it if missing
    pub fn write_file(&self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> FsResult<()> {
        self.at("open", path.as_ref(), |s, p| {
            let mode = s.config.default_file_mode;
            s.write_file(p, data.as_ref(), mode)
        })
    }

    pub fn append_file(&self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> FsResult<()> {
        self.at("open", path.as_ref(), |s, p| {
            let mode = s.config.default_file_mode;
            s.append_file(p, data.as_ref(), mode)
        })
    }

    /// Copy file content; `exclusive` refuses to replace an existing destination
    pub fn copy_file(&self, from: impl AsRef<Path>, to: impl AsRef<Path>, exclusive: bool) -> FsResult<()> {
        self.between("copyfile", from.as_ref(), to.as_ref(), |s, f, t| s.copy_file(f, t, exclusive))
    }
}
