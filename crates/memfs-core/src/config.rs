// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for the memfs engine

use serde::{Deserialize, Serialize};

/// Identity and permission enforcement settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Check mode bits against the caller identity on every operation
    pub enforce_posix_permissions: bool,
    /// uid 0 passes read/write checks unconditionally
    pub root_bypass_permissions: bool,
    /// Identity of the caller until `set_credentials` is used
    pub default_uid: u32,
    pub default_gid: u32,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            enforce_posix_permissions: true,
            root_bypass_permissions: true,
            default_uid: 0,
            default_gid: 0,
        }
    }
}

/// System limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    pub max_open_descriptors: u32,
    /// Symlinks followed during one resolution before ELOOP
    pub max_symlink_hops: u32,
    /// Largest file length in bytes; growing past it fails with EFBIG
    pub max_file_size: u64,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_open_descriptors: 10_000,
            max_symlink_hops: 32,
            max_file_size: 1 << 30,
        }
    }
}

/// Main filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub security: SecurityPolicy,
    pub limits: FsLimits,
    /// Absolute path relative lookups start from
    pub cwd: String,
    /// Create the `cwd` directory chain at construction
    pub create_cwd: bool,
    /// Create `tmp_dir` at construction
    pub create_tmp: bool,
    pub tmp_dir: String,
    pub default_file_mode: u32,
    pub default_dir_mode: u32,
    pub umask: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            security: SecurityPolicy::default(),
            limits: FsLimits::default(),
            cwd: "/".to_string(),
            create_cwd: true,
            create_tmp: true,
            tmp_dir: "/tmp".to_string(),
            default_file_mode: 0o666,
            default_dir_mode: 0o777,
            umask: 0,
        }
    }
}

impl FsConfig {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Apply the configured umask to a requested creation mode
    pub(crate) fn creation_mode(&self, mode: u32) -> u32 {
        mode & 0o7777 & !self.umask
    }
}
