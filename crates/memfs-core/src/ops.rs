// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation layer.
//!
//! Every method validates completely before it mutates anything, so a failed
//! call leaves the tree and descriptor table untouched. Methods return bare
//! [`ErrorCode`]s; the public facade attaches the syscall name and paths.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::FsConfig;
use crate::descriptor::{Descriptor, DescriptorTable};
use crate::error::{CodeResult, ErrorCode};
use crate::inode::{reserve_to, InodeId, InodeKind};
use crate::tree::{validate_name, Lookup, ResolveContext, Tree};
use crate::types::{
    AccessMode, Credentials, DirEntry, Fd, FsStats, OpenOptions, RemoveOptions, Stats,
};

/// Write plus search permission on a directory, needed to add or remove entries
const DIR_WRITE: AccessMode = AccessMode {
    read: false,
    write: true,
    execute: true,
};

const MKDTEMP_ATTEMPTS: usize = 100;

/// Split off trailing slashes, keeping a bare `/` intact
fn strip_trailing_slashes(path: &str) -> (&str, bool) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        (if path.is_empty() { "" } else { "/" }, false)
    } else {
        (trimmed, trimmed.len() != path.len())
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn writable(options: &OpenOptions) -> bool {
    options.write || options.append
}

/// Complete engine state guarded by the facade's single lock
pub(crate) struct FsState {
    pub(crate) tree: Tree,
    descriptors: DescriptorTable,
    cwd: Option<InodeId>,
    credentials: Credentials,
    pub(crate) config: FsConfig,
    clock: Arc<dyn Clock>,
}

impl FsState {
    pub fn new(config: FsConfig, clock: Arc<dyn Clock>) -> CodeResult<Self> {
        if !config.cwd.starts_with('/') || !config.tmp_dir.starts_with('/') {
            return Err(ErrorCode::InvalidArgument);
        }
        let credentials = Credentials::new(config.security.default_uid, config.security.default_gid);
        let tree = Tree::new(&credentials, config.creation_mode(config.default_dir_mode), clock.now());
        let mut state = Self {
            cwd: Some(tree.root()),
            tree,
            descriptors: DescriptorTable::new(config.limits.max_open_descriptors),
            credentials,
            config,
            clock,
        };

        let dir_mode = state.config.default_dir_mode;
        if state.config.create_tmp {
            let tmp = state.config.tmp_dir.clone();
            state.mkdir_all(&tmp, dir_mode)?;
        }
        let cwd = state.config.cwd.clone();
        if state.config.create_cwd {
            state.mkdir_all(&cwd, dir_mode)?;
        }
        state.chdir(&cwd)?;
        Ok(state)
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn ctx(&self) -> ResolveContext<'_> {
        ResolveContext {
            creds: &self.credentials,
            policy: &self.config.security,
            max_hops: self.config.limits.max_symlink_hops,
            cwd: self.cwd.filter(|id| self.tree.contains(*id)),
        }
    }

    pub(crate) fn resolve(&self, path: &str, follow_final: bool) -> CodeResult<Lookup> {
        self.tree.resolve(path, follow_final, &self.ctx())
    }

    fn resolve_existing(&self, path: &str, follow_final: bool) -> CodeResult<InodeId> {
        self.resolve(path, follow_final)?.existing()
    }

    /// Caller skips mode-bit and ownership checks
    fn privileged(&self) -> bool {
        let policy = &self.config.security;
        !policy.enforce_posix_permissions
            || (policy.root_bypass_permissions && self.credentials.is_root())
    }

    fn require(&self, id: InodeId, want: AccessMode) -> CodeResult<()> {
        if self.tree.get(id)?.permits(&self.credentials, want, &self.config.security) {
            Ok(())
        } else {
            Err(ErrorCode::AccessDenied)
        }
    }

    /// In a sticky directory only the directory owner or the entry owner may
    /// remove or rename the entry
    fn check_sticky(&self, parent: InodeId, child: InodeId) -> CodeResult<()> {
        let dir = self.tree.get(parent)?;
        if !dir.is_sticky() || self.privileged() {
            return Ok(());
        }
        let uid = self.credentials.uid;
        if uid == dir.uid || uid == self.tree.get(child)?.uid {
            Ok(())
        } else {
            Err(ErrorCode::NotPermitted)
        }
    }

    fn create_child(&mut self, at: &Lookup, kind: InodeKind, mode: u32) -> CodeResult<InodeId> {
        validate_name(&at.name)?;
        self.require(at.parent, DIR_WRITE)?;
        let now = self.now();
        let id = self.tree.insert(kind, mode, &self.credentials, now);
        self.tree.attach(at.parent, &at.name, id, now)?;
        tracing::trace!(inode = id.0, name = %at.name, "entry created");
        Ok(id)
    }

    /// Drop `name` from `parent`, destroying the child once nothing references it
    fn remove_entry(&mut self, parent: InodeId, name: &str) -> CodeResult<()> {
        let now = self.now();
        let id = self.tree.detach(parent, name, now)?;
        let node = self.tree.get_mut(id)?;
        let is_dir = node.is_dir();
        node.nlink = if is_dir { 0 } else { node.nlink.saturating_sub(1) };
        node.touch_changed(now);
        if is_dir && self.cwd == Some(id) {
            self.cwd = None;
        }
        self.release_if_orphaned(id);
        Ok(())
    }

    /// Files may not grow past the configured size limit
    fn check_file_size(&self, len: u64) -> CodeResult<()> {
        if len > self.config.limits.max_file_size {
            return Err(ErrorCode::FileTooLarge);
        }
        Ok(())
    }

    fn release_if_orphaned(&mut self, id: InodeId) {
        let orphaned = self.tree.get(id).map(|node| node.nlink == 0).unwrap_or(false);
        if orphaned && !self.descriptors.references(id) {
            self.tree.remove(id);
            tracing::debug!(inode = id.0, "inode destroyed");
        }
    }

    /// Create `path` as `kind` while populating a layout. An existing
    /// directory is reused when `kind` is a directory too.
    pub(crate) fn place(&mut self, path: &str, kind: InodeKind) -> CodeResult<InodeId> {
        let (path, _) = strip_trailing_slashes(path);
        let lookup = self.resolve(path, false)?;
        let mode = match kind {
            InodeKind::File { .. } => self.config.default_file_mode,
            InodeKind::Directory { .. } => self.config.default_dir_mode,
            InodeKind::Symlink { .. } => 0o777,
        };
        match lookup.inode {
            Some(id) if matches!(kind, InodeKind::Directory { .. }) && self.tree.get(id)?.is_dir() => {
                Ok(id)
            }
            Some(_) => Err(ErrorCode::AlreadyExists),
            None => {
                let mode = self.config.creation_mode(mode);
                self.create_child(&lookup, kind, mode)
            }
        }
    }

    // Identity and counters

    pub fn set_credentials(&mut self, credentials: Credentials) {
        tracing::debug!(uid = credentials.uid, gid = credentials.gid, "credentials changed");
        self.credentials = credentials;
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            inodes: self.tree.len(),
            open_descriptors: self.descriptors.len(),
            bytes_stored: self.tree.bytes_stored(),
        }
    }

    // Metadata queries

    pub fn stat(&self, path: &str) -> CodeResult<Stats> {
        let id = self.resolve_existing(path, true)?;
        Ok(self.tree.get(id)?.stats())
    }

    pub fn lstat(&self, path: &str) -> CodeResult<Stats> {
        let id = self.resolve_existing(path, false)?;
        Ok(self.tree.get(id)?.stats())
    }

    pub fn fstat(&self, fd: Fd) -> CodeResult<Stats> {
        let inode = self.descriptors.lookup(fd)?.inode;
        Ok(self.tree.get(inode)?.stats())
    }

    pub fn access(&self, path: &str, mode: AccessMode) -> CodeResult<()> {
        let id = self.resolve_existing(path, true)?;
        if mode != AccessMode::EXISTS {
            self.require(id, mode)?;
        }
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve_existing(path, true).is_ok()
    }

    pub fn realpath(&self, path: &str) -> CodeResult<String> {
        let lookup = self.resolve(path, true)?;
        let id = lookup.existing()?;
        if self.tree.get(id)?.is_dir() {
            return self.tree.dir_path(id);
        }
        Ok(join(&self.tree.dir_path(lookup.parent)?, &lookup.name))
    }

    pub fn readlink(&self, path: &str) -> CodeResult<String> {
        let id = self.resolve_existing(path, false)?;
        match &self.tree.get(id)?.kind {
            InodeKind::Symlink { target } => Ok(target.clone()),
            _ => Err(ErrorCode::InvalidArgument),
        }
    }

    // Directories

    pub fn readdir(&mut self, path: &str) -> CodeResult<Vec<String>> {
        Ok(self
            .readdir_entries(path)?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    /// Entries in bytewise name order, never including `.` or `..`
    pub fn readdir_entries(&mut self, path: &str) -> CodeResult<Vec<DirEntry>> {
        let id = self.resolve_existing(path, true)?;
        let entries = self.tree.get(id)?.entries()?;
        self.require(id, AccessMode::READ)?;
        let listing = entries
            .iter()
            .map(|(name, child)| {
                Ok(DirEntry {
                    name: name.clone(),
                    kind: self.tree.get(*child)?.file_kind(),
                })
            })
            .collect::<CodeResult<Vec<_>>>()?;
        let now = self.now();
        self.tree.get_mut(id)?.times.atime = now;
        Ok(listing)
    }

    pub fn mkdir(&mut self, path: &str, mode: u32) -> CodeResult<InodeId> {
        let (path, _) = strip_trailing_slashes(path);
        let lookup = self.resolve(path, false)?;
        if lookup.inode.is_some() {
            return Err(ErrorCode::AlreadyExists);
        }
        let kind = InodeKind::Directory {
            entries: BTreeMap::new(),
            parent: lookup.parent,
        };
        let mode = self.config.creation_mode(mode);
        self.create_child(&lookup, kind, mode)
    }

    /// Create `path` and any missing ancestors. Returns the first directory
    /// created, or `None` when everything already existed.
    pub fn mkdir_all(&mut self, path: &str, mode: u32) -> CodeResult<Option<String>> {
        let (path, _) = strip_trailing_slashes(path);
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.is_empty() {
            self.resolve_existing(path, true)?;
            return Ok(None);
        }

        let mut prefix = if path.starts_with('/') { "/".to_string() } else { String::new() };
        let mut first_created = None;
        for (index, part) in parts.iter().enumerate() {
            if prefix.is_empty() || prefix == "/" {
                prefix.push_str(part);
            } else {
                prefix.push('/');
                prefix.push_str(part);
            }
            let is_last = index + 1 == parts.len();
            let lookup = self.resolve(&prefix, true)?;
            if let Some(id) = lookup.inode {
                if !self.tree.get(id)?.is_dir() {
                    return Err(if is_last {
                        ErrorCode::AlreadyExists
                    } else {
                        ErrorCode::NotADirectory
                    });
                }
                continue;
            }

            if first_created.is_none() {
                // Nothing has been created yet: make sure the whole chain can be
                self.require(lookup.parent, DIR_WRITE)?;
                let effective = self.config.creation_mode(mode);
                if !is_last && !self.privileged() && effective & 0o300 != 0o300 {
                    return Err(ErrorCode::AccessDenied);
                }
            }
            let id = self.mkdir(&prefix, mode)?;
            if first_created.is_none() {
                first_created = Some(self.tree.dir_path(id)?);
            }
        }
        Ok(first_created)
    }

    pub fn rmdir(&mut self, path: &str) -> CodeResult<()> {
        let (path, _) = strip_trailing_slashes(path);
        let lookup = self.resolve(path, false)?;
        match lookup.name.as_str() {
            "" => return Err(ErrorCode::Busy),
            "." => return Err(ErrorCode::InvalidArgument),
            ".." => return Err(ErrorCode::DirectoryNotEmpty),
            _ => {}
        }
        let id = lookup.existing()?;
        if !self.tree.get(id)?.entries()?.is_empty() {
            return Err(ErrorCode::DirectoryNotEmpty);
        }
        self.require(lookup.parent, DIR_WRITE)?;
        self.check_sticky(lookup.parent, id)?;
        self.remove_entry(lookup.parent, &lookup.name)
    }

    /// Make a uniquely named directory `prefix` + six random characters
    pub fn mkdtemp(&mut self, prefix: &str) -> CodeResult<String> {
        for _ in 0..MKDTEMP_ATTEMPTS {
            let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
            let candidate = format!("{prefix}{suffix}");
            match self.mkdir(&candidate, 0o700) {
                Ok(_) => return Ok(candidate),
                Err(ErrorCode::AlreadyExists) => continue,
                Err(code) => return Err(code),
            }
        }
        Err(ErrorCode::AlreadyExists)
    }

    pub fn chdir(&mut self, path: &str) -> CodeResult<()> {
        let id = self.resolve_existing(path, true)?;
        if !self.tree.get(id)?.is_dir() {
            return Err(ErrorCode::NotADirectory);
        }
        self.require(id, AccessMode::EXECUTE)?;
        self.cwd = Some(id);
        Ok(())
    }

    pub fn cwd(&self) -> CodeResult<String> {
        let id = self.ctx().cwd.ok_or(ErrorCode::NotFound)?;
        self.tree.dir_path(id)
    }

    // Entries

    pub fn unlink(&mut self, path: &str) -> CodeResult<()> {
        let lookup = self.resolve(path, false)?;
        if lookup.is_dot_or_root() {
            return Err(ErrorCode::IsADirectory);
        }
        let id = lookup.existing()?;
        if self.tree.get(id)?.is_dir() {
            return Err(ErrorCode::IsADirectory);
        }
        self.require(lookup.parent, DIR_WRITE)?;
        self.check_sticky(lookup.parent, id)?;
        self.remove_entry(lookup.parent, &lookup.name)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> CodeResult<()> {
        let (from, from_slash) = strip_trailing_slashes(from);
        let (to, to_slash) = strip_trailing_slashes(to);
        let src = self.resolve(from, false)?;
        let dst = self.resolve(to, false)?;
        if src.name.is_empty() || dst.name.is_empty() {
            return Err(ErrorCode::Busy);
        }
        if src.is_dot_or_root() || dst.is_dot_or_root() {
            return Err(ErrorCode::InvalidArgument);
        }
        let src_id = src.existing()?;
        let src_is_dir = self.tree.get(src_id)?.is_dir();
        if (from_slash || to_slash) && !src_is_dir {
            return Err(ErrorCode::NotADirectory);
        }
        self.require(src.parent, DIR_WRITE)?;
        self.require(dst.parent, DIR_WRITE)?;
        self.check_sticky(src.parent, src_id)?;
        if src_is_dir && self.tree.is_ancestor(src_id, dst.parent) {
            return Err(ErrorCode::InvalidArgument);
        }

        if let Some(dst_id) = dst.inode {
            if dst_id == src_id {
                return Ok(());
            }
            let target = self.tree.get(dst_id)?;
            match (src_is_dir, target.is_dir()) {
                (true, false) => return Err(ErrorCode::NotADirectory),
                (false, true) => return Err(ErrorCode::IsADirectory),
                (true, true) if !target.entries()?.is_empty() => {
                    return Err(ErrorCode::DirectoryNotEmpty)
                }
                _ => {}
            }
            self.check_sticky(dst.parent, dst_id)?;
            self.remove_entry(dst.parent, &dst.name)?;
        }

        let now = self.now();
        self.tree.detach(src.parent, &src.name, now)?;
        self.tree.attach(dst.parent, &dst.name, src_id, now)?;
        self.tree.get_mut(src_id)?.touch_changed(now);
        tracing::trace!(from, to, "renamed");
        Ok(())
    }

    pub fn link(&mut self, existing: &str, new: &str) -> CodeResult<()> {
        let src_id = self.resolve_existing(existing, false)?;
        if self.tree.get(src_id)?.is_dir() {
            return Err(ErrorCode::NotPermitted);
        }
        let dst = self.resolve(new, false)?;
        if dst.inode.is_some() {
            return Err(ErrorCode::AlreadyExists);
        }
        if dst.trailing_slash {
            return Err(ErrorCode::NotFound);
        }
        validate_name(&dst.name)?;
        self.require(dst.parent, DIR_WRITE)?;

        let now = self.now();
        self.tree.attach(dst.parent, &dst.name, src_id, now)?;
        let node = self.tree.get_mut(src_id)?;
        node.nlink = node.nlink.saturating_add(1);
        node.touch_changed(now);
        Ok(())
    }

    pub fn symlink(&mut self, target: &str, path: &str) -> CodeResult<()> {
        if target.is_empty() {
            return Err(ErrorCode::NotFound);
        }
        let lookup = self.resolve(path, false)?;
        if lookup.inode.is_some() {
            return Err(ErrorCode::AlreadyExists);
        }
        if lookup.trailing_slash {
            return Err(ErrorCode::NotFound);
        }
        let kind = InodeKind::Symlink {
            target: target.to_string(),
        };
        self.create_child(&lookup, kind, 0o777)?;
        Ok(())
    }

    pub fn remove(&mut self, path: &str, options: RemoveOptions) -> CodeResult<()> {
        let (trimmed, _) = strip_trailing_slashes(path);
        let lookup = match self.resolve(trimmed, false) {
            Ok(lookup) => lookup,
            Err(ErrorCode::NotFound) if options.force => return Ok(()),
            Err(code) => return Err(code),
        };
        if lookup.name.is_empty() {
            return Err(ErrorCode::Busy);
        }
        if lookup.is_dot_or_root() {
            return Err(ErrorCode::InvalidArgument);
        }
        let Some(id) = lookup.inode else {
            return if options.force { Ok(()) } else { Err(ErrorCode::NotFound) };
        };

        if self.tree.get(id)?.is_dir() && !options.recursive {
            return Err(ErrorCode::IsADirectory);
        }
        self.require(lookup.parent, DIR_WRITE)?;
        self.check_sticky(lookup.parent, id)?;
        if self.tree.get(id)?.is_dir() {
            self.check_removable(id)?;
        }
        self.remove_tree(lookup.parent, &lookup.name)
    }

    fn check_removable(&self, dir: InodeId) -> CodeResult<()> {
        let entries = self.tree.get(dir)?.entries()?;
        if entries.is_empty() {
            return Ok(());
        }
        self.require(
            dir,
            AccessMode {
                read: true,
                write: true,
                execute: true,
            },
        )?;
        for &child in entries.values() {
            self.check_sticky(dir, child)?;
            if self.tree.get(child)?.is_dir() {
                self.check_removable(child)?;
            }
        }
        Ok(())
    }

    fn remove_tree(&mut self, parent: InodeId, name: &str) -> CodeResult<()> {
        let id = *self
            .tree
            .get(parent)?
            .entries()?
            .get(name)
            .ok_or(ErrorCode::NotFound)?;
        if self.tree.get(id)?.is_dir() {
            let children: Vec<String> = self.tree.get(id)?.entries()?.keys().cloned().collect();
            for child in children {
                self.remove_tree(id, &child)?;
            }
        }
        self.remove_entry(parent, name)
    }

    // Metadata changes

    fn chmod_inode(&mut self, id: InodeId, mode: u32) -> CodeResult<()> {
        let privileged = self.privileged();
        let uid = self.credentials.uid;
        let now = self.now();
        let node = self.tree.get_mut(id)?;
        if !privileged && node.uid != uid {
            return Err(ErrorCode::NotPermitted);
        }
        node.mode = mode & 0o7777;
        node.touch_changed(now);
        Ok(())
    }

    fn chown_inode(&mut self, id: InodeId, uid: u32, gid: u32) -> CodeResult<()> {
        let node = self.tree.get(id)?;
        if !self.privileged() {
            let is_owner = node.uid == self.credentials.uid;
            let gid_allowed = gid == node.gid || self.credentials.in_group(gid);
            if !is_owner || uid != node.uid || !gid_allowed {
                return Err(ErrorCode::NotPermitted);
            }
        }
        let now = self.now();
        let node = self.tree.get_mut(id)?;
        node.uid = uid;
        node.gid = gid;
        node.touch_changed(now);
        Ok(())
    }

    fn utimes_inode(&mut self, id: InodeId, atime: i64, mtime: i64) -> CodeResult<()> {
        let privileged = self.privileged();
        let uid = self.credentials.uid;
        let now = self.now();
        let node = self.tree.get_mut(id)?;
        if !privileged && node.uid != uid {
            return Err(ErrorCode::NotPermitted);
        }
        node.times.atime = atime;
        node.times.mtime = mtime;
        node.touch_changed(now);
        Ok(())
    }

    pub fn chmod(&mut self, path: &str, mode: u32) -> CodeResult<()> {
        let id = self.resolve_existing(path, true)?;
        self.chmod_inode(id, mode)
    }

    pub fn lchmod(&mut self, path: &str, mode: u32) -> CodeResult<()> {
        let id = self.resolve_existing(path, false)?;
        self.chmod_inode(id, mode)
    }

    pub fn fchmod(&mut self, fd: Fd, mode: u32) -> CodeResult<()> {
        let id = self.descriptors.lookup(fd)?.inode;
        self.chmod_inode(id, mode)
    }

    pub fn chown(&mut self, path: &str, uid: u32, gid: u32) -> CodeResult<()> {
        let id = self.resolve_existing(path, true)?;
        self.chown_inode(id, uid, gid)
    }

    pub fn lchown(&mut self, path: &str, uid: u32, gid: u32) -> CodeResult<()> {
        let id = self.resolve_existing(path, false)?;
        self.chown_inode(id, uid, gid)
    }

    pub fn fchown(&mut self, fd: Fd, uid: u32, gid: u32) -> CodeResult<()> {
        let id = self.descriptors.lookup(fd)?.inode;
        self.chown_inode(id, uid, gid)
    }

    pub fn utimes(&mut self, path: &str, atime: i64, mtime: i64) -> CodeResult<()> {
        let id = self.resolve_existing(path, true)?;
        self.utimes_inode(id, atime, mtime)
    }

    pub fn lutimes(&mut self, path: &str, atime: i64, mtime: i64) -> CodeResult<()> {
        let id = self.resolve_existing(path, false)?;
        self.utimes_inode(id, atime, mtime)
    }

    pub fn futimes(&mut self, fd: Fd, atime: i64, mtime: i64) -> CodeResult<()> {
        let id = self.descriptors.lookup(fd)?.inode;
        self.utimes_inode(id, atime, mtime)
    }

    pub fn truncate(&mut self, path: &str, len: u64) -> CodeResult<()> {
        let id = self.resolve_existing(path, true)?;
        self.tree.get(id)?.content()?;
        self.require(id, AccessMode::WRITE)?;
        self.check_file_size(len)?;
        let now = self.now();
        self.tree.get_mut(id)?.resize(len, now)
    }

    pub fn ftruncate(&mut self, fd: Fd, len: u64) -> CodeResult<()> {
        let descriptor = self.descriptors.lookup(fd)?;
        if !writable(&descriptor.options) {
            return Err(ErrorCode::InvalidArgument);
        }
        let id = descriptor.inode;
        self.check_file_size(len)?;
        let now = self.now();
        self.tree.get_mut(id)?.resize(len, now)
    }

    // Descriptors

    pub fn open(&mut self, path: &str, options: &OpenOptions, mode: u32) -> CodeResult<Fd> {
        if self.descriptors.is_full() {
            return Err(ErrorCode::TooManyOpenFiles);
        }
        let inode = self.open_inode(path, options, mode)?;
        self.descriptors.allocate(Descriptor {
            inode,
            position: 0,
            options: options.clone(),
            path: path.to_string(),
        })
    }

    /// Resolve or create the target of an open, applying truncation
    fn open_inode(&mut self, path: &str, options: &OpenOptions, mode: u32) -> CodeResult<InodeId> {
        let follow = !(options.nofollow || options.create_new);
        let lookup = self.resolve(path, follow)?;
        let writes = writable(options);

        let Some(id) = lookup.inode else {
            if !options.create {
                return Err(ErrorCode::NotFound);
            }
            if lookup.trailing_slash {
                return Err(ErrorCode::IsADirectory);
            }
            if options.directory {
                return Err(ErrorCode::InvalidArgument);
            }
            let mode = self.config.creation_mode(mode);
            return self.create_child(&lookup, InodeKind::File { content: Vec::new() }, mode);
        };

        if options.create_new {
            return Err(ErrorCode::AlreadyExists);
        }
        let node = self.tree.get(id)?;
        if node.is_symlink() {
            return Err(ErrorCode::TooManySymlinks);
        }
        if options.directory && !node.is_dir() {
            return Err(ErrorCode::NotADirectory);
        }
        if node.is_dir() && (writes || options.truncate) {
            return Err(ErrorCode::IsADirectory);
        }
        self.require(
            id,
            AccessMode {
                read: options.read,
                write: writes || options.truncate,
                execute: false,
            },
        )?;
        if options.truncate && writes {
            let now = self.now();
            self.tree.get_mut(id)?.resize(0, now)?;
        }
        Ok(id)
    }

    pub fn close(&mut self, fd: Fd) -> CodeResult<()> {
        let descriptor = self.descriptors.release(fd)?;
        self.release_if_orphaned(descriptor.inode);
        Ok(())
    }

    pub fn fsync(&self, fd: Fd) -> CodeResult<()> {
        self.descriptors.lookup(fd).map(|_| ())
    }

    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> CodeResult<usize> {
        let descriptor = self.descriptors.lookup(fd)?;
        if !descriptor.options.read {
            return Err(ErrorCode::BadFileDescriptor);
        }
        let (inode, position) = (descriptor.inode, descriptor.position);
        let count = self.read_inode(inode, position, buf)?;
        self.descriptors.lookup_mut(fd)?.position = position + count as u64;
        Ok(count)
    }

    /// Positional read; the descriptor offset is left alone
    pub fn read_at(&mut self, fd: Fd, buf: &mut [u8], offset: u64) -> CodeResult<usize> {
        let descriptor = self.descriptors.lookup(fd)?;
        if !descriptor.options.read {
            return Err(ErrorCode::BadFileDescriptor);
        }
        let inode = descriptor.inode;
        self.read_inode(inode, offset, buf)
    }

    fn read_inode(&mut self, id: InodeId, offset: u64, buf: &mut [u8]) -> CodeResult<usize> {
        let now = self.now();
        let node = self.tree.get_mut(id)?;
        let content = node.content()?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let count = buf.len().min(content.len() - start);
        buf[..count].copy_from_slice(&content[start..start + count]);
        node.times.atime = now;
        Ok(count)
    }

    pub fn write(&mut self, fd: Fd, data: &[u8]) -> CodeResult<usize> {
        let descriptor = self.descriptors.lookup(fd)?;
        if !writable(&descriptor.options) {
            return Err(ErrorCode::BadFileDescriptor);
        }
        let at = if descriptor.options.append {
            None
        } else {
            Some(descriptor.position)
        };
        let inode = descriptor.inode;
        let end = self.write_inode(inode, at, data)?;
        self.descriptors.lookup_mut(fd)?.position = end;
        Ok(data.len())
    }

    /// Positional write; appending descriptors still write at the end
    pub fn write_at(&mut self, fd: Fd, data: &[u8], offset: u64) -> CodeResult<usize> {
        let descriptor = self.descriptors.lookup(fd)?;
        if !writable(&descriptor.options) {
            return Err(ErrorCode::BadFileDescriptor);
        }
        let at = if descriptor.options.append { None } else { Some(offset) };
        let inode = descriptor.inode;
        self.write_inode(inode, at, data)?;
        Ok(data.len())
    }

    /// Write at `offset` (or the end), zero-filling any gap. Returns the
    /// offset just past the written bytes.
    fn write_inode(&mut self, id: InodeId, offset: Option<u64>, data: &[u8]) -> CodeResult<u64> {
        let len = self.tree.get(id)?.content()?.len() as u64;
        let start = offset.unwrap_or(len);
        if data.is_empty() {
            return Ok(start);
        }
        let end = start
            .checked_add(data.len() as u64)
            .ok_or(ErrorCode::FileTooLarge)?;
        self.check_file_size(end)?;
        let (start, end) = match (usize::try_from(start), usize::try_from(end)) {
            (Ok(start), Ok(end)) => (start, end),
            _ => return Err(ErrorCode::FileTooLarge),
        };

        let now = self.now();
        let node = self.tree.get_mut(id)?;
        let content = node.content_mut()?;
        if content.len() < end {
            reserve_to(content, end)?;
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);
        node.touch_modified(now);
        Ok(end as u64)
    }

    pub fn seek(&mut self, fd: Fd, pos: SeekFrom) -> CodeResult<u64> {
        let descriptor = self.descriptors.lookup(fd)?;
        let size = self.tree.get(descriptor.inode)?.size();
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => descriptor.position.checked_add_signed(delta),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
        }
        .ok_or(ErrorCode::InvalidArgument)?;
        self.descriptors.lookup_mut(fd)?.position = target;
        Ok(target)
    }

    // Whole-file helpers

    pub fn read_file(&mut self, path: &str) -> CodeResult<Vec<u8>> {
        let id = self.resolve_existing(path, true)?;
        self.tree.get(id)?.content()?;
        self.require(id, AccessMode::READ)?;
        let now = self.now();
        let node = self.tree.get_mut(id)?;
        node.times.atime = now;
        Ok(node.content()?.clone())
    }

    pub fn write_file(&mut self, path: &str, data: &[u8], mode: u32) -> CodeResult<()> {
        self.check_file_size(data.len() as u64)?;
        let id = self.open_inode(path, &OpenOptions::create_truncate(), mode)?;
        self.write_inode(id, Some(0), data)?;
        Ok(())
    }

    pub fn append_file(&mut self, path: &str, data: &[u8], mode: u32) -> CodeResult<()> {
        self.check_file_size(data.len() as u64)?;
        let id = self.open_inode(path, &OpenOptions::append_create(), mode)?;
        self.write_inode(id, None, data)?;
        Ok(())
    }

    /// Copy content; the new file takes the source's permission bits.
    /// With `exclusive` an existing destination fails with EEXIST.
    pub fn copy_file(&mut self, from: &str, to: &str, exclusive: bool) -> CodeResult<()> {
        let src_id = self.resolve_existing(from, true)?;
        let node = self.tree.get(src_id)?;
        let content = node.content()?.clone();
        let mode = node.mode;
        self.require(src_id, AccessMode::READ)?;
        self.check_file_size(content.len() as u64)?;
        let options = OpenOptions {
            create_new: exclusive,
            ..OpenOptions::create_truncate()
        };
        let dst_id = self.open_inode(to, &options, mode)?;
        self.write_inode(dst_id, Some(0), &content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use crate::clock::MockClock;

    /// Clock that advances by one on every reading
    fn ticking_clock() -> Arc<dyn Clock> {
        let ticks = AtomicI64::new(1);
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(move || ticks.fetch_add(1, Ordering::SeqCst));
        Arc::new(clock)
    }

    fn create_test_fs() -> FsState {
        FsState::new(FsConfig::default(), ticking_clock()).expect("state")
    }

    fn user(uid: u32) -> Credentials {
        Credentials::new(uid, uid)
    }

    #[test]
    fn test_default_layout_has_tmp() {
        let fs = create_test_fs();
        assert!(fs.stat("/tmp").unwrap().is_dir());
        assert_eq!(fs.cwd().unwrap(), "/");
        assert_eq!(fs.stats().inodes, 2);
    }

    #[test]
    fn test_configured_cwd_is_created() {
        let config = FsConfig {
            cwd: "/home/user".to_string(),
            ..FsConfig::default()
        };
        let mut fs = FsState::new(config, ticking_clock()).unwrap();
        assert_eq!(fs.cwd().unwrap(), "/home/user");
        fs.write_file("notes.txt", b"x", 0o644).unwrap();
        assert!(fs.exists("/home/user/notes.txt"));
    }

    #[test]
    fn test_missing_cwd_without_create() {
        let config = FsConfig {
            cwd: "/nowhere".to_string(),
            create_cwd: false,
            ..FsConfig::default()
        };
        assert_eq!(
            FsState::new(config, ticking_clock()).err(),
            Some(ErrorCode::NotFound)
        );
    }

    #[test]
    fn test_write_read_roundtrip_on_one_descriptor() {
        let mut fs = create_test_fs();
        let fd = fs.open("/f", &OpenOptions::from_flags("w+").unwrap(), 0o644).unwrap();
        assert_eq!(fs.write(fd, b"hello world").unwrap(), 11);
        assert_eq!(fs.seek(fd, SeekFrom::Start(0)).unwrap(), 0);
        let mut buf = [0u8; 32];
        let n = fs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let mut fs = create_test_fs();
        let fd = fs.open("/sparse", &OpenOptions::create_truncate(), 0o644).unwrap();
        fs.write_at(fd, b"end", 5).unwrap();
        fs.close(fd).unwrap();
        assert_eq!(fs.read_file("/sparse").unwrap(), b"\0\0\0\0\0end");
    }

    #[test]
    fn test_append_ignores_position() {
        let mut fs = create_test_fs();
        fs.write_file("/log", b"one", 0o644).unwrap();
        let fd = fs.open("/log", &OpenOptions::append_create(), 0o644).unwrap();
        fs.seek(fd, SeekFrom::Start(0)).unwrap();
        fs.write(fd, b"two").unwrap();
        fs.write_at(fd, b"!", 0).unwrap();
        assert_eq!(fs.read_file("/log").unwrap(), b"onetwo!");
    }

    #[test]
    fn test_wrong_direction_is_ebadf() {
        let mut fs = create_test_fs();
        fs.write_file("/f", b"data", 0o644).unwrap();
        let ro = fs.open("/f", &OpenOptions::read_only(), 0).unwrap();
        assert_eq!(fs.write(ro, b"x").unwrap_err(), ErrorCode::BadFileDescriptor);
        assert_eq!(fs.ftruncate(ro, 0).unwrap_err(), ErrorCode::InvalidArgument);
        let wo = fs.open("/f", &OpenOptions::from_flags("a").unwrap(), 0).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(fs.read(wo, &mut buf).unwrap_err(), ErrorCode::BadFileDescriptor);
    }

    #[test]
    fn test_open_flag_errors() {
        let mut fs = create_test_fs();
        fs.write_file("/f", b"", 0o644).unwrap();
        fs.symlink("/f", "/link").unwrap();

        let excl = OpenOptions::from_flags("wx").unwrap();
        assert_eq!(fs.open("/f", &excl, 0o644).unwrap_err(), ErrorCode::AlreadyExists);
        assert_eq!(fs.open("/link", &excl, 0o644).unwrap_err(), ErrorCode::AlreadyExists);
        assert_eq!(
            fs.open("/tmp", &OpenOptions::read_write(), 0).unwrap_err(),
            ErrorCode::IsADirectory
        );
        assert_eq!(
            fs.open("/missing", &OpenOptions::read_only(), 0).unwrap_err(),
            ErrorCode::NotFound
        );
        assert_eq!(
            fs.open("/newdir/", &OpenOptions::create_truncate(), 0o644).unwrap_err(),
            ErrorCode::IsADirectory
        );

        let nofollow = OpenOptions {
            nofollow: true,
            ..OpenOptions::read_only()
        };
        assert_eq!(fs.open("/link", &nofollow, 0).unwrap_err(), ErrorCode::TooManySymlinks);

        let directory = OpenOptions {
            directory: true,
            ..OpenOptions::read_only()
        };
        assert_eq!(fs.open("/f", &directory, 0).unwrap_err(), ErrorCode::NotADirectory);
        assert!(fs.open("/tmp", &directory, 0).is_ok());
    }

    #[test]
    fn test_open_through_dangling_symlink_creates_target() {
        let mut fs = create_test_fs();
        fs.symlink("/tmp/real", "/dangling").unwrap();
        let fd = fs.open("/dangling", &OpenOptions::create_truncate(), 0o644).unwrap();
        fs.write(fd, b"x").unwrap();
        fs.close(fd).unwrap();
        assert_eq!(fs.read_file("/tmp/real").unwrap(), b"x");
    }

    #[test]
    fn test_descriptor_limit_leaves_no_partial_file() {
        let config = FsConfig {
            limits: crate::config::FsLimits {
                max_open_descriptors: 1,
                ..Default::default()
            },
            ..FsConfig::default()
        };
        let mut fs = FsState::new(config, ticking_clock()).unwrap();
        let first = fs.open("/a", &OpenOptions::create_truncate(), 0o644).unwrap();
        assert_eq!(first, Fd(3));
        assert_eq!(
            fs.open("/b", &OpenOptions::create_truncate(), 0o644).unwrap_err(),
            ErrorCode::TooManyOpenFiles
        );
        assert!(!fs.exists("/b"));
    }

    #[test]
    fn test_unlink_while_open_defers_destruction() {
        let mut fs = create_test_fs();
        fs.write_file("/doomed", b"still here", 0o644).unwrap();
        let before = fs.stats().inodes;
        let fd = fs.open("/doomed", &OpenOptions::read_only(), 0).unwrap();
        fs.unlink("/doomed").unwrap();
        assert!(!fs.exists("/doomed"));
        assert_eq!(fs.fstat(fd).unwrap().nlink, 0);

        let mut buf = [0u8; 32];
        let n = fs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"still here");
        assert_eq!(fs.stats().inodes, before);

        fs.close(fd).unwrap();
        assert_eq!(fs.stats().inodes, before - 1);
    }

    #[test]
    fn test_hard_links_share_content() {
        let mut fs = create_test_fs();
        fs.write_file("/a", b"shared", 0o644).unwrap();
        fs.link("/a", "/b").unwrap();
        assert_eq!(fs.stat("/a").unwrap().nlink, 2);
        fs.append_file("/b", b"!", 0o644).unwrap();
        assert_eq!(fs.read_file("/a").unwrap(), b"shared!");

        fs.unlink("/a").unwrap();
        assert_eq!(fs.stat("/b").unwrap().nlink, 1);
        assert_eq!(fs.read_file("/b").unwrap(), b"shared!");
        assert_eq!(fs.link("/tmp", "/tmp2").unwrap_err(), ErrorCode::NotPermitted);
    }

    #[test]
    fn test_link_does_not_follow_symlink() {
        let mut fs = create_test_fs();
        fs.write_file("/f", b"", 0o644).unwrap();
        fs.symlink("/f", "/s").unwrap();
        fs.link("/s", "/s2").unwrap();
        assert!(fs.lstat("/s2").unwrap().is_symlink());
        assert_eq!(fs.stat("/f").unwrap().nlink, 1);
    }

    #[test]
    fn test_directory_link_counts() {
        let mut fs = create_test_fs();
        let root_links = fs.stat("/").unwrap().nlink;
        fs.mkdir("/d", 0o755).unwrap();
        fs.mkdir("/d/sub", 0o755).unwrap();
        fs.write_file("/d/file", b"", 0o644).unwrap();
        assert_eq!(fs.stat("/").unwrap().nlink, root_links + 1);
        assert_eq!(fs.stat("/d").unwrap().nlink, 3);
        fs.rmdir("/d/sub").unwrap();
        assert_eq!(fs.stat("/d").unwrap().nlink, 2);
    }

    #[test]
    fn test_rmdir_errors() {
        let mut fs = create_test_fs();
        fs.mkdir("/d", 0o755).unwrap();
        fs.write_file("/d/f", b"", 0o644).unwrap();
        assert_eq!(fs.rmdir("/d").unwrap_err(), ErrorCode::DirectoryNotEmpty);
        assert_eq!(fs.rmdir("/d/f").unwrap_err(), ErrorCode::NotADirectory);
        assert_eq!(fs.rmdir("/").unwrap_err(), ErrorCode::Busy);
        assert_eq!(fs.rmdir("/d/.").unwrap_err(), ErrorCode::InvalidArgument);
        assert_eq!(fs.unlink("/d").unwrap_err(), ErrorCode::IsADirectory);
    }

    #[test]
    fn test_rmdir_of_cwd_detaches_it() {
        let mut fs = create_test_fs();
        fs.mkdir("/work", 0o755).unwrap();
        fs.chdir("/work").unwrap();
        fs.rmdir("/work").unwrap();
        assert_eq!(fs.cwd().unwrap_err(), ErrorCode::NotFound);
        assert_eq!(fs.stat("anything").unwrap_err(), ErrorCode::NotFound);
        assert!(fs.stat("/tmp").is_ok());
    }

    #[test]
    fn test_rename_rules() {
        let mut fs = create_test_fs();
        fs.mkdir_all("/a/b", 0o755).unwrap();
        fs.mkdir("/full", 0o755).unwrap();
        fs.write_file("/full/x", b"", 0o644).unwrap();
        fs.write_file("/file", b"content", 0o644).unwrap();

        assert_eq!(fs.rename("/a", "/a/b/c").unwrap_err(), ErrorCode::InvalidArgument);
        assert_eq!(fs.rename("/a", "/file").unwrap_err(), ErrorCode::NotADirectory);
        assert_eq!(fs.rename("/file", "/a").unwrap_err(), ErrorCode::IsADirectory);
        assert_eq!(fs.rename("/a", "/full").unwrap_err(), ErrorCode::DirectoryNotEmpty);
        assert_eq!(fs.rename("/nope", "/x").unwrap_err(), ErrorCode::NotFound);
        assert_eq!(fs.rename("/file", "/missing/x").unwrap_err(), ErrorCode::NotFound);

        fs.rename("/file", "/a/b/moved").unwrap();
        assert_eq!(fs.read_file("/a/b/moved").unwrap(), b"content");
        assert!(!fs.exists("/file"));

        fs.mkdir("/empty", 0o755).unwrap();
        fs.rename("/a", "/empty").unwrap();
        assert_eq!(fs.readdir("/empty").unwrap(), vec!["b"]);
        assert_eq!(fs.realpath("/empty/b/moved").unwrap(), "/empty/b/moved");
    }

    #[test]
    fn test_rename_replaces_file_and_drops_old_inode() {
        let mut fs = create_test_fs();
        fs.write_file("/src", b"new", 0o644).unwrap();
        fs.write_file("/dst", b"old", 0o644).unwrap();
        let before = fs.stats().inodes;
        fs.rename("/src", "/dst").unwrap();
        assert_eq!(fs.read_file("/dst").unwrap(), b"new");
        assert_eq!(fs.stats().inodes, before - 1);
    }

    #[test]
    fn test_readlink_and_symlink() {
        let mut fs = create_test_fs();
        fs.symlink("../relative/target", "/tmp/l").unwrap();
        assert_eq!(fs.readlink("/tmp/l").unwrap(), "../relative/target");
        assert_eq!(fs.readlink("/tmp").unwrap_err(), ErrorCode::InvalidArgument);
        assert_eq!(fs.symlink("x", "/tmp/l").unwrap_err(), ErrorCode::AlreadyExists);
        assert_eq!(fs.lstat("/tmp/l").unwrap().size, 18);
        assert_eq!(fs.stat("/tmp/l").unwrap_err(), ErrorCode::NotFound);
    }

    #[test]
    fn test_truncate() {
        let mut fs = create_test_fs();
        fs.write_file("/f", b"abcdef", 0o644).unwrap();
        fs.truncate("/f", 3).unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"abc");
        fs.truncate("/f", 5).unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"abc\0\0");
        assert_eq!(fs.truncate("/tmp", 0).unwrap_err(), ErrorCode::IsADirectory);
    }

    #[test]
    fn test_timestamps() {
        let mut fs = create_test_fs();
        fs.write_file("/f", b"a", 0o644).unwrap();
        let created = fs.stat("/f").unwrap().times;
        let root_after_create = fs.stat("/").unwrap().times;
        assert_eq!(root_after_create.mtime, root_after_create.ctime);

        fs.read_file("/f").unwrap();
        let read = fs.stat("/f").unwrap().times;
        assert!(read.atime > created.atime);
        assert_eq!(read.mtime, created.mtime);

        fs.chmod("/f", 0o600).unwrap();
        let changed = fs.stat("/f").unwrap().times;
        assert!(changed.ctime > read.ctime);
        assert_eq!(changed.mtime, read.mtime);

        fs.append_file("/f", b"b", 0o644).unwrap();
        let written = fs.stat("/f").unwrap().times;
        assert!(written.mtime > changed.mtime);
        assert_eq!(written.birthtime, created.birthtime);

        fs.utimes("/f", 5, 6).unwrap();
        let set = fs.stat("/f").unwrap().times;
        assert_eq!((set.atime, set.mtime), (5, 6));
    }

    #[test]
    fn test_permission_enforcement() {
        let mut fs = create_test_fs();
        fs.mkdir("/home", 0o755).unwrap();
        fs.write_file("/home/secret", b"s", 0o600).unwrap();
        fs.set_credentials(user(1000));

        assert_eq!(fs.read_file("/home/secret").unwrap_err(), ErrorCode::AccessDenied);
        assert_eq!(
            fs.write_file("/home/new", b"", 0o644).unwrap_err(),
            ErrorCode::AccessDenied
        );
        assert_eq!(fs.chmod("/home/secret", 0o777).unwrap_err(), ErrorCode::NotPermitted);
        assert_eq!(fs.access("/home/secret", AccessMode::READ).unwrap_err(), ErrorCode::AccessDenied);
        assert!(fs.access("/home/secret", AccessMode::EXISTS).is_ok());
        assert_eq!(fs.unlink("/home/secret").unwrap_err(), ErrorCode::AccessDenied);
    }

    #[test]
    fn test_chown_rules() {
        let mut fs = create_test_fs();
        fs.write_file("/tmp/mine", b"", 0o644).unwrap();
        fs.chown("/tmp/mine", 1000, 1000).unwrap();

        fs.set_credentials(Credentials::new(1000, 1000).with_groups(vec![1000, 50]));
        fs.chown("/tmp/mine", 1000, 50).unwrap();
        assert_eq!(fs.stat("/tmp/mine").unwrap().gid, 50);
        assert_eq!(fs.chown("/tmp/mine", 1000, 60).unwrap_err(), ErrorCode::NotPermitted);
        assert_eq!(fs.chown("/tmp/mine", 0, 50).unwrap_err(), ErrorCode::NotPermitted);

        fs.set_credentials(user(2000));
        assert_eq!(fs.chown("/tmp/mine", 1000, 50).unwrap_err(), ErrorCode::NotPermitted);
    }

    #[test]
    fn test_sticky_directory() {
        let mut fs = create_test_fs();
        fs.chmod("/tmp", 0o1777).unwrap();
        fs.set_credentials(user(1000));
        fs.write_file("/tmp/alice", b"", 0o666).unwrap();

        fs.set_credentials(user(2000));
        assert_eq!(fs.unlink("/tmp/alice").unwrap_err(), ErrorCode::NotPermitted);
        assert_eq!(fs.rename("/tmp/alice", "/tmp/bob").unwrap_err(), ErrorCode::NotPermitted);

        fs.set_credentials(user(1000));
        fs.unlink("/tmp/alice").unwrap();
    }

    #[test]
    fn test_remove_recursive_and_force() {
        let mut fs = create_test_fs();
        fs.mkdir_all("/tree/a/b", 0o755).unwrap();
        fs.write_file("/tree/a/b/f", b"x", 0o644).unwrap();
        fs.symlink("/tree/a", "/tree/link").unwrap();
        let before = fs.stats().inodes;

        assert_eq!(
            fs.remove("/tree", RemoveOptions::default()).unwrap_err(),
            ErrorCode::IsADirectory
        );
        let recursive = RemoveOptions {
            recursive: true,
            force: false,
        };
        fs.remove("/tree", recursive).unwrap();
        assert!(!fs.exists("/tree"));
        assert_eq!(fs.stats().inodes, before - 5);

        assert_eq!(fs.remove("/tree", recursive).unwrap_err(), ErrorCode::NotFound);
        let force = RemoveOptions {
            recursive: true,
            force: true,
        };
        fs.remove("/tree", force).unwrap();
        fs.remove("/tree/deeper/still", force).unwrap();
    }

    #[test]
    fn test_remove_recursive_is_all_or_nothing() {
        let mut fs = create_test_fs();
        fs.set_credentials(user(1000));
        fs.mkdir_all("/tmp/t/locked", 0o755).unwrap();
        fs.write_file("/tmp/t/a", b"", 0o644).unwrap();
        fs.write_file("/tmp/t/locked/f", b"", 0o644).unwrap();
        fs.chmod("/tmp/t/locked", 0o555).unwrap();

        let recursive = RemoveOptions {
            recursive: true,
            force: false,
        };
        assert_eq!(fs.remove("/tmp/t", recursive).unwrap_err(), ErrorCode::AccessDenied);
        assert!(fs.exists("/tmp/t/a"));
        assert!(fs.exists("/tmp/t/locked/f"));
    }

    #[test]
    fn test_mkdir_all() {
        let mut fs = create_test_fs();
        assert_eq!(fs.mkdir_all("/x/y/z", 0o755).unwrap(), Some("/x".to_string()));
        assert_eq!(fs.mkdir_all("/x/y/z", 0o755).unwrap(), None);
        assert_eq!(fs.mkdir_all("/x/y/w/", 0o755).unwrap(), Some("/x/y/w".to_string()));
        fs.write_file("/x/file", b"", 0o644).unwrap();
        assert_eq!(fs.mkdir_all("/x/file/sub", 0o755).unwrap_err(), ErrorCode::NotADirectory);
        assert_eq!(fs.mkdir_all("/x/file", 0o755).unwrap_err(), ErrorCode::AlreadyExists);
        assert_eq!(fs.mkdir("/x", 0o755).unwrap_err(), ErrorCode::AlreadyExists);
    }

    #[test]
    fn test_mkdtemp() {
        let mut fs = create_test_fs();
        let first = fs.mkdtemp("/tmp/run-").unwrap();
        let second = fs.mkdtemp("/tmp/run-").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("/tmp/run-"));
        assert_eq!(first.len(), "/tmp/run-".len() + 6);
        assert_eq!(fs.stat(&first).unwrap().permissions(), 0o700);
        assert_eq!(fs.mkdtemp("/missing/run-").unwrap_err(), ErrorCode::NotFound);
    }

    #[test]
    fn test_copy_file() {
        let mut fs = create_test_fs();
        fs.write_file("/src", b"payload", 0o640).unwrap();
        fs.copy_file("/src", "/dst", false).unwrap();
        assert_eq!(fs.read_file("/dst").unwrap(), b"payload");
        assert_eq!(fs.stat("/dst").unwrap().permissions(), 0o640);
        assert_eq!(fs.copy_file("/src", "/dst", true).unwrap_err(), ErrorCode::AlreadyExists);
        assert_eq!(fs.copy_file("/tmp", "/x", false).unwrap_err(), ErrorCode::IsADirectory);
    }

    #[test]
    fn test_readdir_entries_kinds() {
        let mut fs = create_test_fs();
        fs.write_file("/b", b"", 0o644).unwrap();
        fs.symlink("/b", "/a").unwrap();
        let listing = fs.readdir_entries("/").unwrap();
        let summary: Vec<_> = listing.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            summary,
            vec![
                ("a", crate::types::FileKind::Symlink),
                ("b", crate::types::FileKind::File),
                ("tmp", crate::types::FileKind::Directory),
            ]
        );
        assert_eq!(fs.readdir("/b").unwrap_err(), ErrorCode::NotADirectory);
    }

    #[test]
    fn test_chdir_and_relative_paths() {
        let mut fs = create_test_fs();
        fs.mkdir_all("/srv/app", 0o755).unwrap();
        fs.chdir("/srv/app").unwrap();
        fs.write_file("config", b"1", 0o644).unwrap();
        assert_eq!(fs.realpath("config").unwrap(), "/srv/app/config");
        assert_eq!(fs.realpath("..").unwrap(), "/srv");
        assert_eq!(fs.chdir("config").unwrap_err(), ErrorCode::NotADirectory);
    }

    #[test]
    fn test_seek_bounds() {
        let mut fs = create_test_fs();
        fs.write_file("/f", b"12345", 0o644).unwrap();
        let fd = fs.open("/f", &OpenOptions::read_only(), 0).unwrap();
        assert_eq!(fs.seek(fd, SeekFrom::End(-2)).unwrap(), 3);
        assert_eq!(fs.seek(fd, SeekFrom::Current(-10)).unwrap_err(), ErrorCode::InvalidArgument);
        let mut buf = [0u8; 2];
        assert_eq!(fs.read_at(fd, &mut buf, 0).unwrap(), 2);
        assert_eq!(&buf, b"12");
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"45");
    }

    #[test]
    fn test_closed_descriptor_is_ebadf() {
        let mut fs = create_test_fs();
        let fd = fs.open("/f", &OpenOptions::create_truncate(), 0o644).unwrap();
        fs.close(fd).unwrap();
        assert_eq!(fs.close(fd).unwrap_err(), ErrorCode::BadFileDescriptor);
        assert_eq!(fs.fsync(fd).unwrap_err(), ErrorCode::BadFileDescriptor);
        assert_eq!(fs.fstat(fd).unwrap_err(), ErrorCode::BadFileDescriptor);
    }

    #[test]
    fn test_oversized_lengths_are_efbig() {
        let mut fs = create_test_fs();
        fs.write_file("/f", b"keep", 0o644).unwrap();
        let fd = fs.open("/f", &OpenOptions::read_write(), 0o644).unwrap();

        for len in [u64::MAX, 1 << 40] {
            assert_eq!(fs.truncate("/f", len).unwrap_err(), ErrorCode::FileTooLarge);
            assert_eq!(fs.ftruncate(fd, len).unwrap_err(), ErrorCode::FileTooLarge);
        }
        for offset in [u64::MAX - 10, u64::MAX, 1 << 40] {
            assert_eq!(fs.write_at(fd, b"x", offset).unwrap_err(), ErrorCode::FileTooLarge);
        }
        fs.seek(fd, SeekFrom::Start(u64::MAX)).unwrap();
        assert_eq!(fs.write(fd, b"x").unwrap_err(), ErrorCode::FileTooLarge);

        assert_eq!(fs.read_file("/f").unwrap(), b"keep");
        assert_eq!(fs.stats().bytes_stored, 4);
    }

    #[test]
    fn test_configured_file_size_limit() {
        let config = FsConfig {
            limits: crate::config::FsLimits {
                max_file_size: 8,
                ..Default::default()
            },
            ..FsConfig::default()
        };
        let mut fs = FsState::new(config, ticking_clock()).unwrap();
        fs.write_file("/f", b"12345678", 0o644).unwrap();
        assert_eq!(
            fs.append_file("/f", b"9", 0o644).unwrap_err(),
            ErrorCode::FileTooLarge
        );
        fs.truncate("/f", 8).unwrap();
        assert_eq!(fs.truncate("/f", 9).unwrap_err(), ErrorCode::FileTooLarge);
        fs.truncate("/f", 2).unwrap();
        assert_eq!(fs.read_file("/f").unwrap(), b"12");

        assert_eq!(
            fs.write_file("/f", b"123456789", 0o644).unwrap_err(),
            ErrorCode::FileTooLarge
        );
        assert_eq!(fs.read_file("/f").unwrap(), b"12");
        assert_eq!(
            fs.append_file("/new", b"123456789", 0o644).unwrap_err(),
            ErrorCode::FileTooLarge
        );
        assert!(!fs.exists("/new"));
    }
}
