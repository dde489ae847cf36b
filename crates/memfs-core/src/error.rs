// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the memfs engine

use std::io;
use std::path::Path;

/// POSIX-style condition behind every engine failure
#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("file already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("illegal operation on a directory")]
    IsADirectory,
    #[error("permission denied")]
    AccessDenied,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("too many levels of symbolic links")]
    TooManySymlinks,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("resource busy or locked")]
    Busy,
    #[error("file too large")]
    FileTooLarge,
}

impl ErrorCode {
    /// Symbolic errno name, e.g. `ENOENT`
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "ENOENT",
            ErrorCode::NotADirectory => "ENOTDIR",
            ErrorCode::AlreadyExists => "EEXIST",
            ErrorCode::DirectoryNotEmpty => "ENOTEMPTY",
            ErrorCode::IsADirectory => "EISDIR",
            ErrorCode::AccessDenied => "EACCES",
            ErrorCode::NotPermitted => "EPERM",
            ErrorCode::BadFileDescriptor => "EBADF",
            ErrorCode::TooManySymlinks => "ELOOP",
            ErrorCode::InvalidArgument => "EINVAL",
            ErrorCode::TooManyOpenFiles => "EMFILE",
            ErrorCode::Busy => "EBUSY",
            ErrorCode::FileTooLarge => "EFBIG",
        }
    }

    /// Host errno value for this condition
    pub fn errno(self) -> i32 {
        match self {
            ErrorCode::NotFound => libc::ENOENT,
            ErrorCode::NotADirectory => libc::ENOTDIR,
            ErrorCode::AlreadyExists => libc::EEXIST,
            ErrorCode::DirectoryNotEmpty => libc::ENOTEMPTY,
            ErrorCode::IsADirectory => libc::EISDIR,
            ErrorCode::AccessDenied => libc::EACCES,
            ErrorCode::NotPermitted => libc::EPERM,
            ErrorCode::BadFileDescriptor => libc::EBADF,
            ErrorCode::TooManySymlinks => libc::ELOOP,
            ErrorCode::InvalidArgument => libc::EINVAL,
            ErrorCode::TooManyOpenFiles => libc::EMFILE,
            ErrorCode::Busy => libc::EBUSY,
            ErrorCode::FileTooLarge => libc::EFBIG,
        }
    }
}

/// Structured failure returned by every public filesystem operation.
///
/// Carries the condition, the syscall-like operation name and the paths
/// involved. The rendered message follows the familiar
/// `ENOENT: no such file or directory, scandir 'bogus'` layout.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct FsError {
    code: ErrorCode,
    syscall: &'static str,
    path: Option<String>,
    dest: Option<String>,
    message: String,
}

impl FsError {
    pub fn new(code: ErrorCode, syscall: &'static str) -> Self {
        Self::build(code, syscall, None, None)
    }

    pub fn with_path(code: ErrorCode, syscall: &'static str, path: &Path) -> Self {
        Self::build(code, syscall, Some(path.to_string_lossy().into_owned()), None)
    }

    pub fn with_paths(code: ErrorCode, syscall: &'static str, path: &Path, dest: &Path) -> Self {
        Self::build(
            code,
            syscall,
            Some(path.to_string_lossy().into_owned()),
            Some(dest.to_string_lossy().into_owned()),
        )
    }

    fn build(
        code: ErrorCode,
        syscall: &'static str,
        path: Option<String>,
        dest: Option<String>,
    ) -> Self {
        let mut message = format!("{}: {}, {}", code.name(), code, syscall);
        if let Some(path) = &path {
            message.push_str(&format!(" '{}'", path));
        }
        if let Some(dest) = &dest {
            message.push_str(&format!(" -> '{}'", dest));
        }
        Self {
            code,
            syscall,
            path,
            dest,
            message,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn syscall(&self) -> &'static str {
        self.syscall
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn dest(&self) -> Option<&str> {
        self.dest.as_deref()
    }

    pub fn errno(&self) -> i32 {
        self.code.errno()
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        io::Error::from_raw_os_error(err.errno())
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Result type used below the public facade, before syscall context is known
pub(crate) type CodeResult<T> = Result<T, ErrorCode>;
