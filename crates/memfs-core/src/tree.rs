// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Inode arena and path resolution

use std::collections::{HashMap, VecDeque};

use crate::config::SecurityPolicy;
use crate::error::{CodeResult, ErrorCode};
use crate::inode::{Inode, InodeId, InodeKind};
use crate::types::{AccessMode, Credentials};

/// Caller identity and limits applied while walking a path
#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolveContext<'a> {
    pub creds: &'a Credentials,
    pub policy: &'a SecurityPolicy,
    pub max_hops: u32,
    /// Start of relative lookups; `None` when the working directory is gone
    pub cwd: Option<InodeId>,
}

/// Outcome of resolving a path.
///
/// `parent` is the directory holding the final component. When the final
/// component does not exist `inode` is `None`, which lets create-style
/// operations reuse the same walk.
#[derive(Clone, Debug)]
pub(crate) struct Lookup {
    pub parent: InodeId,
    /// Final component: a plain name, `.`/`..`, or empty for `/`
    pub name: String,
    pub inode: Option<InodeId>,
    pub trailing_slash: bool,
}

impl Lookup {
    pub fn existing(&self) -> CodeResult<InodeId> {
        self.inode.ok_or(ErrorCode::NotFound)
    }

    /// True when the final component is `.`, `..` or the root itself
    pub fn is_dot_or_root(&self) -> bool {
        self.name.is_empty() || self.name == "." || self.name == ".."
    }
}

/// Owns every inode and the root directory
#[derive(Debug)]
pub(crate) struct Tree {
    inodes: HashMap<InodeId, Inode>,
    root: InodeId,
    next_id: u64,
}

fn segments(path: &str) -> VecDeque<String> {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

/// Entry names must be non-empty and free of `/` and NUL
pub(crate) fn validate_name(name: &str) -> CodeResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(ErrorCode::InvalidArgument);
    }
    Ok(())
}

impl Tree {
    pub fn new(owner: &Credentials, mode: u32, now: i64) -> Self {
        let root = InodeId(1);
        let mut tree = Self {
            inodes: HashMap::new(),
            root,
            next_id: 2,
        };
        let kind = InodeKind::Directory {
            entries: Default::default(),
            parent: root,
        };
        tree.inodes.insert(root, Inode::new(root, kind, mode, owner, now));
        tree
    }

    pub fn root(&self) -> InodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn bytes_stored(&self) -> u64 {
        self.inodes
            .values()
            .filter_map(|inode| inode.content().ok())
            .map(|content| content.len() as u64)
            .sum()
    }

    pub fn get(&self, id: InodeId) -> CodeResult<&Inode> {
        self.inodes.get(&id).ok_or(ErrorCode::NotFound)
    }

    pub fn get_mut(&mut self, id: InodeId) -> CodeResult<&mut Inode> {
        self.inodes.get_mut(&id).ok_or(ErrorCode::NotFound)
    }

    pub fn contains(&self, id: InodeId) -> bool {
        self.inodes.contains_key(&id)
    }

    /// Allocate a detached inode; it becomes reachable through `attach`
    pub fn insert(&mut self, kind: InodeKind, mode: u32, owner: &Credentials, now: i64) -> InodeId {
        let id = InodeId(self.next_id);
        self.next_id += 1;
        self.inodes.insert(id, Inode::new(id, kind, mode, owner, now));
        id
    }

    pub fn remove(&mut self, id: InodeId) -> Option<Inode> {
        debug_assert!(id != self.root, "root is never destroyed");
        self.inodes.remove(&id)
    }

    /// Containing directory of a directory inode
    pub fn parent_of(&self, dir: InodeId) -> CodeResult<InodeId> {
        match &self.get(dir)?.kind {
            InodeKind::Directory { parent, .. } => Ok(*parent),
            _ => Err(ErrorCode::NotADirectory),
        }
    }

    /// Add `name -> child` to `parent`, maintaining directory link counts
    pub fn attach(&mut self, parent: InodeId, name: &str, child: InodeId, now: i64) -> CodeResult<()> {
        validate_name(name)?;
        let child_is_dir = self.get(child)?.is_dir();
        let parent_node = self.get_mut(parent)?;
        let entries = parent_node.entries_mut()?;
        if entries.contains_key(name) {
            return Err(ErrorCode::AlreadyExists);
        }
        entries.insert(name.to_string(), child);
        parent_node.touch_modified(now);
        if child_is_dir {
            parent_node.nlink = parent_node.nlink.saturating_add(1);
            if let InodeKind::Directory { parent: up, .. } = &mut self.get_mut(child)?.kind {
                *up = parent;
            }
        }
        Ok(())
    }

    /// Remove `name` from `parent` and return the child it referenced.
    /// The child's own link count is left to the caller.
    pub fn detach(&mut self, parent: InodeId, name: &str, now: i64) -> CodeResult<InodeId> {
        let parent_node = self.get_mut(parent)?;
        let child = parent_node.entries_mut()?.remove(name).ok_or(ErrorCode::NotFound)?;
        parent_node.touch_modified(now);
        if self.get(child)?.is_dir() {
            let parent_node = self.get_mut(parent)?;
            parent_node.nlink = parent_node.nlink.saturating_sub(1);
        }
        Ok(child)
    }

    /// True when `ancestor` is `id` or one of its containing directories
    pub fn is_ancestor(&self, ancestor: InodeId, id: InodeId) -> bool {
        let mut current = id;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parent_of(current) {
                Ok(up) if up != current => current = up,
                _ => return false,
            }
        }
    }

    /// Absolute path of a directory, rebuilt from parent links
    pub fn dir_path(&self, dir: InodeId) -> CodeResult<String> {
        let mut names = Vec::new();
        let mut current = dir;
        while current != self.root {
            let parent = self.parent_of(current)?;
            let name = self
                .get(parent)?
                .entries()?
                .iter()
                .find(|(_, id)| **id == current)
                .map(|(name, _)| name.clone())
                .ok_or(ErrorCode::NotFound)?;
            names.push(name);
            current = parent;
        }
        names.reverse();
        Ok(format!("/{}", names.join("/")))
    }

    /// Resolve `path`, following symlinks on every intermediate component and
    /// on the final one when `follow_final` is set (or the path ends in `/`).
    pub fn resolve(&self, path: &str, follow_final: bool, ctx: &ResolveContext<'_>) -> CodeResult<Lookup> {
        let lookup = self.walk(path, follow_final, ctx)?;
        if lookup.trailing_slash {
            if let Some(id) = lookup.inode {
                if !self.get(id)?.is_dir() {
                    return Err(ErrorCode::NotADirectory);
                }
            }
        }
        Ok(lookup)
    }

    fn walk(&self, path: &str, follow_final: bool, ctx: &ResolveContext<'_>) -> CodeResult<Lookup> {
        if path.is_empty() {
            return Err(ErrorCode::NotFound);
        }
        if path.contains('\0') {
            return Err(ErrorCode::InvalidArgument);
        }
        let trailing_slash = path.len() > 1 && path.ends_with('/');
        let mut current = if path.starts_with('/') {
            self.root
        } else {
            ctx.cwd.ok_or(ErrorCode::NotFound)?
        };
        let mut pending = segments(path);
        if pending.is_empty() {
            return self.whole_dir(current, String::new(), trailing_slash);
        }

        let mut hops = 0u32;
        while let Some(segment) = pending.pop_front() {
            let is_last = pending.is_empty();
            let dir = self.get(current)?;
            if !dir.is_dir() {
                return Err(ErrorCode::NotADirectory);
            }
            if !dir.permits(ctx.creds, AccessMode::EXECUTE, ctx.policy) {
                return Err(ErrorCode::AccessDenied);
            }

            if segment == "." || segment == ".." {
                let next = if segment == ".." { self.parent_of(current)? } else { current };
                if is_last {
                    return self.whole_dir(next, segment, trailing_slash);
                }
                current = next;
                continue;
            }

            let Some(child_id) = dir.entries()?.get(&segment).copied() else {
                if is_last {
                    return Ok(Lookup {
                        parent: current,
                        name: segment,
                        inode: None,
                        trailing_slash,
                    });
                }
                return Err(ErrorCode::NotFound);
            };

            let child = self.get(child_id)?;
            if let InodeKind::Symlink { target } = &child.kind {
                if !is_last || follow_final || trailing_slash {
                    hops += 1;
                    if hops > ctx.max_hops {
                        return Err(ErrorCode::TooManySymlinks);
                    }
                    if target.is_empty() {
                        return Err(ErrorCode::NotFound);
                    }
                    tracing::trace!(link = %segment, %target, hops, "following symlink");
                    let mut expanded = segments(target);
                    expanded.extend(pending.drain(..));
                    pending = expanded;
                    if target.starts_with('/') {
                        current = self.root;
                    }
                    if pending.is_empty() {
                        // link to "/"
                        return self.whole_dir(current, String::new(), trailing_slash);
                    }
                    continue;
                }
            }

            if is_last {
                return Ok(Lookup {
                    parent: current,
                    name: segment,
                    inode: Some(child_id),
                    trailing_slash,
                });
            }
            if !child.is_dir() {
                return Err(ErrorCode::NotADirectory);
            }
            current = child_id;
        }
        Err(ErrorCode::NotFound)
    }

    fn whole_dir(&self, dir: InodeId, name: String, trailing_slash: bool) -> CodeResult<Lookup> {
        Ok(Lookup {
            parent: self.parent_of(dir)?,
            name,
            inode: Some(dir),
            trailing_slash,
        })
    }
}
