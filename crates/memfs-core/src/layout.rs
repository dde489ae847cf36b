// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Declarative description of an initial directory tree
//!
//! A [`Layout`] is built in code or parsed from JSON and applied once when a
//! filesystem is constructed:
//!
//! ```json
//! {
//!   "path/to/file.txt": "file content",
//!   "nested/sub/dir": { "one.txt": "1", "empty": {} },
//!   "bin/tool": { "$file": { "content": "#!/bin/sh", "mode": 493 } },
//!   "current": { "$symlink": { "target": "nested/sub/dir" } }
//! }
//! ```
//!
//! Keys may contain `/`; missing intermediate directories are created and
//! descriptions of the same directory merge.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorCode, FsError};
use crate::inode::{InodeId, InodeKind};
use crate::ops::FsState;

#[derive(thiserror::Error, Debug)]
pub enum LayoutError {
    #[error("invalid layout JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("layout must be a JSON object")]
    NotAnObject,
    #[error("invalid layout entry '{key}': {reason}")]
    InvalidEntry { key: String, reason: String },
    #[error("invalid entry name '{0}'")]
    InvalidName(String),
    #[error(transparent)]
    Fs(#[from] FsError),
}

/// Explicit metadata; unset fields keep the engine defaults.
/// Timestamps are nanoseconds since the Unix epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryMeta {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
    pub birthtime: Option<i64>,
}

/// One node of a layout
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutEntry {
    File { content: Vec<u8>, meta: EntryMeta },
    Directory { items: Vec<(String, LayoutEntry)>, meta: EntryMeta },
    Symlink { target: String, meta: EntryMeta },
    /// Left by a builder call that cannot apply, such as adding a child to
    /// a file; placing it fails with [`LayoutError::InvalidEntry`]
    Invalid { reason: String, meta: EntryMeta },
}

impl LayoutEntry {
    pub fn file(content: impl Into<Vec<u8>>) -> Self {
        LayoutEntry::File {
            content: content.into(),
            meta: EntryMeta::default(),
        }
    }

    pub fn dir() -> Self {
        LayoutEntry::Directory {
            items: Vec::new(),
            meta: EntryMeta::default(),
        }
    }

    pub fn symlink(target: impl Into<String>) -> Self {
        LayoutEntry::Symlink {
            target: target.into(),
            meta: EntryMeta::default(),
        }
    }

    /// Add a child entry. On a file or symlink the result is
    /// [`LayoutEntry::Invalid`], rejected when the layout is applied.
    pub fn with(self, name: impl Into<String>, entry: impl Into<LayoutEntry>) -> Self {
        let name = name.into();
        match self {
            LayoutEntry::Directory { mut items, meta } => {
                items.push((name, entry.into()));
                LayoutEntry::Directory { items, meta }
            }
            LayoutEntry::File { meta, .. } => LayoutEntry::Invalid {
                reason: format!("cannot add '{name}' to a file"),
                meta,
            },
            LayoutEntry::Symlink { meta, .. } => LayoutEntry::Invalid {
                reason: format!("cannot add '{name}' to a symlink"),
                meta,
            },
            rejected @ LayoutEntry::Invalid { .. } => rejected,
        }
    }

    pub fn meta(&self) -> &EntryMeta {
        match self {
            LayoutEntry::File { meta, .. }
            | LayoutEntry::Directory { meta, .. }
            | LayoutEntry::Symlink { meta, .. }
            | LayoutEntry::Invalid { meta, .. } => meta,
        }
    }

    fn meta_mut(&mut self) -> &mut EntryMeta {
        match self {
            LayoutEntry::File { meta, .. }
            | LayoutEntry::Directory { meta, .. }
            | LayoutEntry::Symlink { meta, .. }
            | LayoutEntry::Invalid { meta, .. } => meta,
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.meta_mut().mode = Some(mode);
        self
    }

    pub fn uid(mut self, uid: u32) -> Self {
        self.meta_mut().uid = Some(uid);
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.meta_mut().gid = Some(gid);
        self
    }

    pub fn mtime(mut self, nanos: i64) -> Self {
        self.meta_mut().mtime = Some(nanos);
        self
    }

    pub fn atime(mut self, nanos: i64) -> Self {
        self.meta_mut().atime = Some(nanos);
        self
    }
}

impl From<&str> for LayoutEntry {
    fn from(content: &str) -> Self {
        LayoutEntry::file(content)
    }
}

impl From<String> for LayoutEntry {
    fn from(content: String) -> Self {
        LayoutEntry::file(content)
    }
}

impl From<Vec<u8>> for LayoutEntry {
    fn from(content: Vec<u8>) -> Self {
        LayoutEntry::file(content)
    }
}

impl From<&[u8]> for LayoutEntry {
    fn from(content: &[u8]) -> Self {
        LayoutEntry::file(content)
    }
}

/// Ordered set of `(path, entry)` pairs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Layout {
    entries: Vec<(String, LayoutEntry)>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentSpec {
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Deserialize)]
struct FileSpec {
    #[serde(default)]
    content: Option<ContentSpec>,
    #[serde(flatten)]
    meta: EntryMeta,
}

#[derive(Deserialize)]
struct DirSpec {
    #[serde(default)]
    items: Map<String, Value>,
    #[serde(flatten)]
    meta: EntryMeta,
}

#[derive(Deserialize)]
struct SymlinkSpec {
    target: String,
    #[serde(flatten)]
    meta: EntryMeta,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> LayoutError {
    LayoutError::InvalidEntry {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn items_from_json(map: &Map<String, Value>) -> Result<Vec<(String, LayoutEntry)>, LayoutError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), entry_from_json(key, value)?)))
        .collect()
}

fn entry_from_json(key: &str, value: &Value) -> Result<LayoutEntry, LayoutError> {
    let map = match value {
        Value::String(text) => return Ok(LayoutEntry::file(text.as_bytes())),
        Value::Object(map) => map,
        other => {
            return Err(invalid(
                key,
                format!("expected a string or an object, found {}", json_kind(other)),
            ))
        }
    };

    let Some(marker) = map.keys().find(|k| k.starts_with('$')) else {
        return Ok(LayoutEntry::Directory {
            items: items_from_json(map)?,
            meta: EntryMeta::default(),
        });
    };
    if map.len() != 1 {
        return Err(invalid(key, format!("'{marker}' must be the only key")));
    }
    let body = map[marker.as_str()].clone();
    let parse_err = |e: serde_json::Error| invalid(key, format!("{marker}: {e}"));
    match marker.as_str() {
        "$file" => {
            let spec: FileSpec = serde_json::from_value(body).map_err(parse_err)?;
            let content = match spec.content {
                Some(ContentSpec::Text(text)) => text.into_bytes(),
                Some(ContentSpec::Bytes(bytes)) => bytes,
                None => Vec::new(),
            };
            Ok(LayoutEntry::File {
                content,
                meta: spec.meta,
            })
        }
        "$dir" => {
            let spec: DirSpec = serde_json::from_value(body).map_err(parse_err)?;
            Ok(LayoutEntry::Directory {
                items: items_from_json(&spec.items)?,
                meta: spec.meta,
            })
        }
        "$symlink" => {
            let spec: SymlinkSpec = serde_json::from_value(body).map_err(parse_err)?;
            Ok(LayoutEntry::Symlink {
                target: spec.target,
                meta: spec.meta,
            })
        }
        other => Err(invalid(key, format!("unknown marker '{other}'"))),
    }
}

fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn check_key(key: &str) -> Result<(), LayoutError> {
    let trimmed = key.trim_matches('/');
    let bad_segment = trimmed
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == ".." || segment.contains('\0'));
    if key.is_empty() || (bad_segment && !trimmed.is_empty()) {
        return Err(LayoutError::InvalidName(key.to_string()));
    }
    Ok(())
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Layout::insert`]
    pub fn entry(mut self, key: impl Into<String>, entry: impl Into<LayoutEntry>) -> Self {
        self.insert(key, entry);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: impl Into<LayoutEntry>) {
        self.entries.push((key.into(), entry.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LayoutEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn from_json(value: &Value) -> Result<Self, LayoutError> {
        match value {
            Value::Object(map) => Ok(Self {
                entries: items_from_json(map)?,
            }),
            _ => Err(LayoutError::NotAnObject),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, LayoutError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }

    /// Populate `state`; relative keys land under the configured cwd
    pub(crate) fn apply(&self, state: &mut FsState) -> Result<(), LayoutError> {
        for (key, entry) in &self.entries {
            place(state, key, entry)?;
        }
        tracing::debug!(entries = self.entries.len(), "layout applied");
        Ok(())
    }
}

fn place(state: &mut FsState, path: &str, entry: &LayoutEntry) -> Result<InodeId, LayoutError> {
    check_key(path)?;
    let fs_err = |code: ErrorCode| LayoutError::Fs(FsError::with_path(code, "layout", Path::new(path)));

    let trimmed = path.trim_end_matches('/');
    if let Some((parent, _)) = trimmed.rsplit_once('/') {
        if !parent.is_empty() {
            let dir_mode = state.config.default_dir_mode;
            state
                .mkdir_all(parent, dir_mode)
                .map_err(|code| match code {
                    ErrorCode::AlreadyExists => ErrorCode::NotADirectory,
                    other => other,
                })
                .map_err(fs_err)?;
        }
    }

    let id = match entry {
        LayoutEntry::File { content, .. } => state
            .place(path, InodeKind::File { content: content.clone() })
            .map_err(fs_err)?,
        LayoutEntry::Symlink { target, .. } => {
            if target.is_empty() {
                return Err(invalid(path, "symlink target is empty"));
            }
            state
                .place(path, InodeKind::Symlink { target: target.clone() })
                .map_err(fs_err)?
        }
        LayoutEntry::Directory { items, .. } => {
            let kind = InodeKind::Directory {
                entries: BTreeMap::new(),
                parent: state.tree.root(),
            };
            let id = state.place(path, kind).map_err(fs_err)?;
            for (name, child) in items {
                if name.is_empty() || name.starts_with('/') {
                    return Err(LayoutError::InvalidName(name.clone()));
                }
                place(state, &child_path(path, name), child)?;
            }
            id
        }
        LayoutEntry::Invalid { reason, .. } => return Err(invalid(path, reason.as_str())),
    };
    apply_meta(state, id, entry.meta()).map_err(fs_err)?;
    tracing::trace!(path, "layout entry placed");
    Ok(id)
}

fn apply_meta(state: &mut FsState, id: InodeId, meta: &EntryMeta) -> Result<(), ErrorCode> {
    let node = state.tree.get_mut(id)?;
    if let Some(mode) = meta.mode {
        node.mode = mode & 0o7777;
    }
    if let Some(uid) = meta.uid {
        node.uid = uid;
    }
    if let Some(gid) = meta.gid {
        node.gid = gid;
    }
    let times = &mut node.times;
    for (slot, value) in [
        (&mut times.atime, meta.atime),
        (&mut times.mtime, meta.mtime),
        (&mut times.ctime, meta.ctime),
        (&mut times.birthtime, meta.birthtime),
    ] {
        if let Some(value) = value {
            *slot = value;
        }
    }
    Ok(())
}
