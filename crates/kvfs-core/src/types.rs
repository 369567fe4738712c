// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for kvfs

use serde::{Deserialize, Serialize};

use crate::paths;

/// Reported mode bits for files. Modes are fixed and informational only;
/// nothing in the engine enforces them.
pub const FILE_MODE: u32 = 0o644;
/// Reported mode bits for directories.
pub const DIR_MODE: u32 = 0o755;
/// Reported mode bits for symbolic links.
pub const SYMLINK_MODE: u32 = 0o777;

/// Media type assigned to files created without an explicit one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// What kind of node an entry is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
}

/// A node in the path tree, keyed by its normalized absolute path.
///
/// Entries are the unit of persistence: the store adapter holds exactly one
/// entry per normalized path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    /// Last path segment (`"/"` for the root).
    pub name: String,
    /// Path of the containing directory; empty for the root.
    pub parent_path: String,
    /// Creation time, unix milliseconds.
    pub created_at: i64,
    /// Last modification time, unix milliseconds.
    pub modified_at: i64,
    pub kind: EntryKind,
}

/// Entry payload variants.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EntryKind {
    File {
        size: u64,
        content: Vec<u8>,
        mime_type: String,
        /// Hard-link group key; absent means a link count of 1. Shared by
        /// every file entry whose content is kept identical to this one.
        link_group: Option<String>,
    },
    Directory,
    Symlink {
        /// Stored verbatim; resolved lazily and never required to exist.
        target: String,
    },
}

impl Entry {
    pub fn directory(path: &str, now: i64) -> Entry {
        Entry {
            path: path.to_string(),
            name: paths::base_name(path).to_string(),
            parent_path: paths::parent_path(path),
            created_at: now,
            modified_at: now,
            kind: EntryKind::Directory,
        }
    }

    pub fn symlink(path: &str, target: &str, now: i64) -> Entry {
        Entry {
            path: path.to_string(),
            name: paths::base_name(path).to_string(),
            parent_path: paths::parent_path(path),
            created_at: now,
            modified_at: now,
            kind: EntryKind::Symlink {
                target: target.to_string(),
            },
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::File { .. } => EntryType::File,
            EntryKind::Directory => EntryType::Directory,
            EntryKind::Symlink { .. } => EntryType::Symlink,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, EntryKind::Symlink { .. })
    }

    /// Content length for files, target length for symlinks, 0 for
    /// directories.
    pub fn size(&self) -> u64 {
        match &self.kind {
            EntryKind::File { size, .. } => *size,
            EntryKind::Directory => 0,
            EntryKind::Symlink { target } => target.len() as u64,
        }
    }

    pub fn link_group(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::File { link_group, .. } => link_group.as_deref(),
            _ => None,
        }
    }
}

/// Stat-like snapshot of an entry.
#[derive(Clone, Debug)]
pub struct Stats {
    pub path: String,
    pub name: String,
    pub kind: EntryType,
    pub size: u64,
    pub mime_type: Option<String>,
    /// Hard-link count; 1 unless the entry belongs to a link group.
    pub nlink: u64,
    /// Fixed, informational mode bits.
    pub mode: u32,
    pub created_at: i64,
    pub modified_at: i64,
}

impl Stats {
    pub(crate) fn from_entry(entry: &Entry, nlink: u64) -> Stats {
        let (mode, mime_type) = match &entry.kind {
            EntryKind::File { mime_type, .. } => (FILE_MODE, Some(mime_type.clone())),
            EntryKind::Directory => (DIR_MODE, None),
            EntryKind::Symlink { .. } => (SYMLINK_MODE, None),
        };
        Stats {
            path: entry.path.clone(),
            name: entry.name.clone(),
            kind: entry.entry_type(),
            size: entry.size(),
            mime_type,
            nlink,
            mode,
            created_at: entry.created_at,
            modified_at: entry.modified_at,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryType::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryType::Symlink
    }
}

/// Directory entry information, as returned by typed directory listings.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryType,
    pub size: u64,
}

/// File open options.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    pub fn write() -> Self {
        Self {
            read: true,
            write: true,
            append: false,
        }
    }

    pub fn append() -> Self {
        Self {
            read: true,
            write: true,
            append: true,
        }
    }
}

/// Opaque descriptor identifier.
///
/// Ids are allocated monotonically starting above a small reserved range and
/// are never reused within an engine's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub u64);

impl DescriptorId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
