// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Virtual filesystem engine for kvfs
//!
//! `FsCore` is the engine context: it owns the store adapter, the descriptor
//! table, the per-path critical sections, and the watch bus. There are no
//! module-level singletons; multiple independent engines can coexist, each
//! behind its own `Arc`.
//!
//! Operations are single-shot transactions against the store adapter with no
//! cross-call atomicity. The original design ran on a single-threaded
//! scheduler; on a multi-threaded runtime the equivalent guarantee is a
//! per-path async mutex held across each read-modify-write sequence and each
//! whole-subtree mutation. Recursive operations that fail mid-way leave the
//! already-applied sub-mutations in place; callers must treat partial
//! failure as terminal.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::paths;
use crate::store::Store;
use crate::types::{
    DescriptorId, DirEntry, Entry, EntryKind, OpenOptions, Stats, DEFAULT_MIME_TYPE,
};
use crate::watch::{WatchBus, WatchEvent, WatchHandle};

/// Result of symlink-chain resolution: the final normalized path and the
/// entry found there, if any.
#[derive(Clone, Debug)]
pub(crate) struct Resolved {
    pub path: String,
    pub entry: Option<Entry>,
}

/// Open descriptor state, process-local and never persisted.
#[derive(Clone, Debug)]
struct Descriptor {
    path: String,
    cursor: u64,
    options: OpenOptions,
    /// Name of the plugin this descriptor routes back to, if a plugin
    /// minted it.
    bound_plugin: Option<String>,
}

/// The engine context.
pub struct FsCore {
    config: FsConfig,
    store: Arc<dyn Store>,
    descriptors: Mutex<HashMap<DescriptorId, Descriptor>>,
    next_descriptor_id: Mutex<u64>,
    path_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    events: WatchBus,
}

impl FsCore {
    /// Create an engine over a store adapter, creating the root directory
    /// entry if the store does not hold one yet.
    pub async fn new(config: FsConfig, store: Arc<dyn Store>) -> FsResult<Self> {
        let core = Self {
            config,
            next_descriptor_id: Mutex::new(0),
            store,
            descriptors: Mutex::new(HashMap::new()),
            path_locks: Mutex::new(HashMap::new()),
            events: WatchBus::new(),
        };
        *core.next_descriptor_id.lock().unwrap() = core.config.descriptors.first_id;
        if core.store.get(paths::ROOT).await?.is_none() {
            let now = Self::current_timestamp();
            core.store.put(Entry::directory(paths::ROOT, now)).await?;
        }
        Ok(core)
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Per-path critical sections
    // ------------------------------------------------------------------

    async fn lock_path(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.path_locks.lock().unwrap();
            Arc::clone(
                locks
                    .entry(path.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Lock two paths in lexicographic order so dual-path operations cannot
    /// deadlock against each other.
    async fn lock_pair(&self, a: &str, b: &str) -> (OwnedMutexGuard<()>, Option<OwnedMutexGuard<()>>) {
        if a == b {
            return (self.lock_path(a).await, None);
        }
        if a < b {
            let first = self.lock_path(a).await;
            let second = self.lock_path(b).await;
            (first, Some(second))
        } else {
            let first = self.lock_path(b).await;
            let second = self.lock_path(a).await;
            (first, Some(second))
        }
    }

    // ------------------------------------------------------------------
    // Symlink resolution
    // ------------------------------------------------------------------

    /// Iteratively follow symlink targets from `path`, bounded by the
    /// configured hop limit and protected by a visited-set.
    ///
    /// Stops when the entry at the current path is not a symlink, or when no
    /// entry exists there. A missing entry before any hop is returned
    /// undecided (the caller's semantics determine whether that is an
    /// error); a missing entry after at least one hop is a dangling link and
    /// fails unless `allow_missing_target` lets the caller create through
    /// it.
    pub(crate) async fn resolve_symlinks(
        &self,
        op: &'static str,
        path: &str,
        allow_missing_target: bool,
    ) -> FsResult<Resolved> {
        let mut current = paths::normalize(path);
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(current.clone());
        let mut hops: u32 = 0;

        loop {
            match self.store.get(&current).await? {
                None => {
                    if hops > 0 && !allow_missing_target {
                        return Err(FsError::NotFound { op, path: current });
                    }
                    trace!(op, path = %current, hops, "resolved to missing entry");
                    return Ok(Resolved {
                        path: current,
                        entry: None,
                    });
                }
                Some(entry) => match &entry.kind {
                    EntryKind::Symlink { target } => {
                        hops += 1;
                        if hops >= self.config.limits.max_symlink_hops {
                            return Err(FsError::LinkLoop {
                                op,
                                path: paths::normalize(path),
                            });
                        }
                        let next = paths::normalize(target);
                        if !visited.insert(next.clone()) {
                            return Err(FsError::LinkLoop {
                                op,
                                path: paths::normalize(path),
                            });
                        }
                        current = next;
                    }
                    _ => {
                        trace!(op, path = %current, hops, "resolved");
                        return Ok(Resolved {
                            path: current,
                            entry: Some(entry),
                        });
                    }
                },
            }
        }
    }

    /// Validate that the parent of `path` exists and is a directory.
    async fn require_parent_dir(&self, op: &'static str, path: &str) -> FsResult<()> {
        let parent = paths::parent_path(path);
        if parent.is_empty() {
            return Ok(());
        }
        match self.store.get(&parent).await? {
            None => Err(FsError::NotFound { op, path: parent }),
            Some(entry) if entry.is_dir() => Ok(()),
            Some(_) => Err(FsError::NotADirectory { op, path: parent }),
        }
    }

    // ------------------------------------------------------------------
    // Entry lifecycle operations
    // ------------------------------------------------------------------

    /// Create a directory. Idempotent: an existing entry at the path, of any
    /// type, is left untouched.
    pub async fn mkdir(&self, path: &str, recursive: bool) -> FsResult<()> {
        let op = "mkdir";
        let path = paths::normalize(path);
        let _guard = self.lock_path(&path).await;

        if self.store.get(&path).await?.is_some() {
            return Ok(());
        }

        if recursive {
            let mut prefix = paths::ROOT.to_string();
            for segment in paths::segments(&path) {
                prefix = paths::child_path(&prefix, segment);
                match self.store.get(&prefix).await? {
                    Some(entry) if entry.is_dir() => {}
                    Some(_) => {
                        return Err(FsError::NotADirectory { op, path: prefix });
                    }
                    None => {
                        let now = Self::current_timestamp();
                        self.store.put(Entry::directory(&prefix, now)).await?;
                        self.events.emit(&prefix, WatchEvent::Rename);
                    }
                }
            }
            debug!(path = %path, "mkdir -p");
            return Ok(());
        }

        self.require_parent_dir(op, &path).await?;
        let now = Self::current_timestamp();
        self.store.put(Entry::directory(&path, now)).await?;
        self.events.emit(&path, WatchEvent::Rename);
        debug!(path = %path, "mkdir");
        Ok(())
    }

    /// Read a file's raw bytes, following symlinks.
    pub async fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let op = "read";
        let resolved = self.resolve_symlinks(op, path, false).await?;
        match resolved.entry {
            None => Err(FsError::NotFound {
                op,
                path: resolved.path,
            }),
            Some(Entry {
                kind: EntryKind::File { content, .. },
                ..
            }) => Ok(content),
            Some(_) => Err(FsError::IsADirectory {
                op,
                path: resolved.path,
            }),
        }
    }

    /// Create or overwrite a file, creating through a symlink when the path
    /// names one. An overwrite preserves `created_at` and propagates the new
    /// content to every other member of the file's hard-link group.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let op = "write";
        let resolved = self.resolve_symlinks(op, path, true).await?;
        let _guard = self.lock_path(&resolved.path).await;
        let prior = self.store.get(&resolved.path).await?;
        self.persist_file_update(op, &resolved.path, prior, data.to_vec())
            .await
    }

    /// Append bytes to a file, creating it when missing.
    pub async fn append_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let op = "append";
        let resolved = self.resolve_symlinks(op, path, true).await?;
        let _guard = self.lock_path(&resolved.path).await;
        let prior = self.store.get(&resolved.path).await?;
        let mut content = match &prior {
            Some(Entry {
                kind: EntryKind::File { content, .. },
                ..
            }) => content.clone(),
            _ => Vec::new(),
        };
        content.extend_from_slice(data);
        self.persist_file_update(op, &resolved.path, prior, content).await
    }

    /// Resize a file's content, zero-extending when growing.
    pub async fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        let op = "truncate";
        let resolved = self.resolve_symlinks(op, path, false).await?;
        let _guard = self.lock_path(&resolved.path).await;
        let prior = self
            .store
            .get(&resolved.path)
            .await?
            .ok_or_else(|| FsError::NotFound {
                op,
                path: resolved.path.clone(),
            })?;
        let mut content = match &prior.kind {
            EntryKind::File { content, .. } => content.clone(),
            EntryKind::Directory => {
                return Err(FsError::IsADirectory {
                    op,
                    path: resolved.path,
                })
            }
            EntryKind::Symlink { .. } => {
                return Err(FsError::InvalidArgument {
                    op,
                    message: format!("'{}' is not a regular file", resolved.path),
                })
            }
        };
        content.resize(len as usize, 0);
        self.persist_file_update(op, &resolved.path, Some(prior), content)
            .await
    }

    /// Copy one file's bytes to another path, composed from the read and
    /// write primitives.
    pub async fn copy_file(&self, from: &str, to: &str) -> FsResult<()> {
        let data = self.read_file(from).await?;
        self.write_file(to, &data).await
    }

    /// Persist new content for a file path whose per-path lock is held.
    ///
    /// Handles create-vs-overwrite bookkeeping, change notification, and
    /// hard-link group propagation; each propagated sibling gets its own
    /// change notification.
    async fn persist_file_update(
        &self,
        op: &'static str,
        final_path: &str,
        prior: Option<Entry>,
        content: Vec<u8>,
    ) -> FsResult<()> {
        if let Some(entry) = &prior {
            if entry.is_dir() {
                return Err(FsError::IsADirectory {
                    op,
                    path: final_path.to_string(),
                });
            }
        }
        self.require_parent_dir(op, final_path).await?;

        let now = Self::current_timestamp();
        let size = content.len() as u64;
        let (created_at, mime_type, link_group, before) = match &prior {
            Some(entry) => match &entry.kind {
                EntryKind::File {
                    mime_type,
                    link_group,
                    ..
                } => (
                    entry.created_at,
                    mime_type.clone(),
                    link_group.clone(),
                    Some(entry.clone()),
                ),
                _ => (now, DEFAULT_MIME_TYPE.to_string(), None, None),
            },
            None => (now, DEFAULT_MIME_TYPE.to_string(), None, None),
        };

        // Fetch the group before mutating so snapshots report the real link
        // count.
        let group_members = match &link_group {
            Some(key) => self.store.list_by_link_group(key).await?,
            None => Vec::new(),
        };
        let nlink = if group_members.is_empty() {
            1
        } else {
            group_members.len() as u64
        };

        let updated = Entry {
            path: final_path.to_string(),
            name: paths::base_name(final_path).to_string(),
            parent_path: paths::parent_path(final_path),
            created_at,
            modified_at: now,
            kind: EntryKind::File {
                size,
                content: content.clone(),
                mime_type: mime_type.clone(),
                link_group: link_group.clone(),
            },
        };
        self.store.put(updated.clone()).await?;
        debug!(op, path = %final_path, size, "persisted file");

        match before {
            None => self.events.emit(final_path, WatchEvent::Rename),
            Some(before_entry) => {
                self.events.emit(final_path, WatchEvent::Change);
                self.events.emit_snapshot_pair(
                    final_path,
                    &Stats::from_entry(&before_entry, nlink),
                    &Stats::from_entry(&updated, nlink),
                );
            }
        }

        // Keep every member of the hard-link group content-identical; each
        // propagation is an independent change at that sibling's path.
        for sibling in group_members {
            if sibling.path == final_path || !sibling.is_file() {
                continue;
            }
            let mut updated_sibling = sibling.clone();
            updated_sibling.modified_at = now;
            updated_sibling.kind = EntryKind::File {
                size,
                content: content.clone(),
                mime_type: mime_type.clone(),
                link_group: link_group.clone(),
            };
            self.store.put(updated_sibling.clone()).await?;
            self.events.emit(&sibling.path, WatchEvent::Change);
            self.events.emit_snapshot_pair(
                &sibling.path,
                &Stats::from_entry(&sibling, nlink),
                &Stats::from_entry(&updated_sibling, nlink),
            );
        }

        Ok(())
    }

    /// Remove an entry. Directories require `recursive` unless empty;
    /// children are removed depth-first, one removal notification per
    /// removed path. A missing path is an error unless `force`.
    pub async fn remove(&self, path: &str, recursive: bool, force: bool) -> FsResult<()> {
        let op = "remove";
        let path = paths::normalize(path);
        if paths::is_root(&path) {
            return Err(FsError::NotPermitted { op, path });
        }
        let _guard = self.lock_path(&path).await;
        let entry = match self.store.get(&path).await? {
            Some(entry) => entry,
            None if force => return Ok(()),
            None => return Err(FsError::NotFound { op, path }),
        };
        if entry.is_dir() && !recursive {
            let children = self.store.list_children(&path).await?;
            if !children.is_empty() {
                return Err(FsError::NotEmpty { op, path });
            }
        }
        debug!(path = %path, recursive, "remove");
        self.remove_tree(entry).await
    }

    fn remove_tree(&self, entry: Entry) -> BoxFuture<'_, FsResult<()>> {
        Box::pin(async move {
            if entry.is_dir() {
                for child in self.store.list_children(&entry.path).await? {
                    self.remove_tree(child).await?;
                }
            }
            self.store.delete(&entry.path).await?;
            self.events.emit(&entry.path, WatchEvent::Rename);
            Ok(())
        })
    }

    /// Remove a single non-directory entry.
    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        let op = "unlink";
        let path = paths::normalize(path);
        if paths::is_root(&path) {
            return Err(FsError::NotPermitted { op, path });
        }
        let _guard = self.lock_path(&path).await;
        let entry = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| FsError::NotFound {
                op,
                path: path.clone(),
            })?;
        if entry.is_dir() {
            return Err(FsError::IsADirectory { op, path });
        }
        self.store.delete(&path).await?;
        self.events.emit(&path, WatchEvent::Rename);
        debug!(path = %path, "unlink");
        Ok(())
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let op = "rmdir";
        let path = paths::normalize(path);
        if paths::is_root(&path) {
            return Err(FsError::NotPermitted { op, path });
        }
        let _guard = self.lock_path(&path).await;
        let entry = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| FsError::NotFound {
                op,
                path: path.clone(),
            })?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory { op, path });
        }
        if !self.store.list_children(&path).await?.is_empty() {
            return Err(FsError::NotEmpty { op, path });
        }
        self.store.delete(&path).await?;
        self.events.emit(&path, WatchEvent::Rename);
        debug!(path = %path, "rmdir");
        Ok(())
    }

    /// Move an entry, re-pathing a directory's whole subtree.
    ///
    /// An existing entry at the destination is silently overwritten; this is
    /// long-standing observable behavior, kept as-is rather than aligned
    /// with stricter POSIX rename rules.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let op = "rename";
        let old_path = paths::normalize(old_path);
        let new_path = paths::normalize(new_path);
        if paths::is_root(&old_path) || paths::is_root(&new_path) {
            return Err(FsError::NotPermitted {
                op,
                path: paths::ROOT.to_string(),
            });
        }
        if old_path == new_path {
            return Ok(());
        }
        if paths::is_within(&new_path, &old_path) {
            return Err(FsError::InvalidArgument {
                op,
                message: format!("'{new_path}' is inside '{old_path}'"),
            });
        }
        let (_a, _b) = self.lock_pair(&old_path, &new_path).await;
        let entry = self
            .store
            .get(&old_path)
            .await?
            .ok_or_else(|| FsError::NotFound {
                op,
                path: old_path.clone(),
            })?;
        self.require_parent_dir(op, &new_path).await?;

        debug!(from = %old_path, to = %new_path, "rename");
        self.rename_tree(entry, new_path.clone(), true).await?;
        self.events.emit(&old_path, WatchEvent::Rename);
        self.events.emit(&new_path, WatchEvent::Rename);
        Ok(())
    }

    fn rename_tree(
        &self,
        entry: Entry,
        new_path: String,
        is_top: bool,
    ) -> BoxFuture<'_, FsResult<()>> {
        Box::pin(async move {
            let old_path = entry.path.clone();
            let mut moved = entry;
            moved.path = new_path.clone();
            moved.name = paths::base_name(&new_path).to_string();
            moved.parent_path = paths::parent_path(&new_path);
            if is_top {
                moved.modified_at = Self::current_timestamp();
            }
            let is_dir = moved.is_dir();
            self.store.put(moved).await?;
            if is_dir {
                for child in self.store.list_children(&old_path).await? {
                    let child_destination = paths::child_path(&new_path, &child.name);
                    self.rename_tree(child, child_destination, false).await?;
                }
            }
            self.store.delete(&old_path).await?;
            Ok(())
        })
    }

    /// Create a symbolic link at `path` pointing at `target`. The target is
    /// stored verbatim and need not exist.
    pub async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        let op = "symlink";
        let path = paths::normalize(path);
        let _guard = self.lock_path(&path).await;
        if self.store.get(&path).await?.is_some() {
            return Err(FsError::AlreadyExists { op, path });
        }
        self.require_parent_dir(op, &path).await?;
        let now = Self::current_timestamp();
        self.store.put(Entry::symlink(&path, target, now)).await?;
        self.events.emit(&path, WatchEvent::Rename);
        debug!(path = %path, target, "symlink");
        Ok(())
    }

    /// Read a symbolic link's stored target.
    pub async fn read_link(&self, path: &str) -> FsResult<String> {
        let op = "readlink";
        let path = paths::normalize(path);
        match self.store.get(&path).await? {
            None => Err(FsError::NotFound { op, path }),
            Some(Entry {
                kind: EntryKind::Symlink { target },
                ..
            }) => Ok(target),
            Some(_) => Err(FsError::InvalidArgument {
                op,
                message: format!("'{path}' is not a symbolic link"),
            }),
        }
    }

    /// Create a hard link: a new file entry sharing the source's content and
    /// hard-link group. The source gains a group key if it has none; the key
    /// defaults to the source's own resolved path and stays stable for the
    /// life of the group.
    pub async fn link(&self, existing_path: &str, new_path: &str) -> FsResult<()> {
        let op = "link";
        let resolved = self.resolve_symlinks(op, existing_path, false).await?;
        let new_path = paths::normalize(new_path);
        let (_a, _b) = self.lock_pair(&resolved.path, &new_path).await;

        let source = self
            .store
            .get(&resolved.path)
            .await?
            .ok_or_else(|| FsError::NotFound {
                op,
                path: resolved.path.clone(),
            })?;
        let (content, mime_type, existing_group) = match &source.kind {
            EntryKind::File {
                content,
                mime_type,
                link_group,
                ..
            } => (content.clone(), mime_type.clone(), link_group.clone()),
            _ => {
                return Err(FsError::NotPermitted {
                    op,
                    path: resolved.path,
                })
            }
        };
        if self.store.get(&new_path).await?.is_some() {
            return Err(FsError::AlreadyExists { op, path: new_path });
        }
        self.require_parent_dir(op, &new_path).await?;

        let key = match existing_group {
            Some(key) => key,
            None => {
                let key = source.path.clone();
                let mut updated_source = source.clone();
                updated_source.kind = EntryKind::File {
                    size: content.len() as u64,
                    content: content.clone(),
                    mime_type: mime_type.clone(),
                    link_group: Some(key.clone()),
                };
                self.store.put(updated_source).await?;
                key
            }
        };

        let now = Self::current_timestamp();
        let linked = Entry {
            path: new_path.clone(),
            name: paths::base_name(&new_path).to_string(),
            parent_path: paths::parent_path(&new_path),
            created_at: now,
            modified_at: now,
            kind: EntryKind::File {
                size: content.len() as u64,
                content,
                mime_type,
                link_group: Some(key),
            },
        };
        self.store.put(linked).await?;
        self.events.emit(&new_path, WatchEvent::Rename);
        debug!(source = %resolved.path, link = %new_path, "hard link");
        Ok(())
    }

    /// Number of file entries sharing the target's hard-link group: 0 for
    /// missing or non-file targets, 1 for ungrouped files.
    pub async fn link_count(&self, path: &str) -> FsResult<u64> {
        let op = "link-count";
        let resolved = self.resolve_symlinks(op, path, true).await?;
        let entry = match resolved.entry {
            Some(entry) if entry.is_file() => entry,
            _ => return Ok(0),
        };
        match entry.link_group() {
            None => Ok(1),
            Some(key) => {
                let members = self.store.list_by_link_group(key).await?;
                Ok(members.iter().filter(|e| e.is_file()).count() as u64)
            }
        }
    }

    /// Stat following symlinks; dangling links report not-found.
    pub async fn stat(&self, path: &str) -> FsResult<Stats> {
        let op = "stat";
        let resolved = self.resolve_symlinks(op, path, false).await?;
        let entry = resolved.entry.ok_or(FsError::NotFound {
            op,
            path: resolved.path,
        })?;
        let nlink = self.nlink_of(&entry).await?;
        Ok(Stats::from_entry(&entry, nlink))
    }

    /// Stat without following symlinks, reporting the link itself.
    pub async fn lstat(&self, path: &str) -> FsResult<Stats> {
        let op = "lstat";
        let path = paths::normalize(path);
        let entry = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| FsError::NotFound {
                op,
                path: path.clone(),
            })?;
        let nlink = self.nlink_of(&entry).await?;
        Ok(Stats::from_entry(&entry, nlink))
    }

    async fn nlink_of(&self, entry: &Entry) -> FsResult<u64> {
        match entry.link_group() {
            Some(key) => {
                let members = self.store.list_by_link_group(key).await?;
                Ok(members.iter().filter(|e| e.is_file()).count() as u64)
            }
            None => Ok(1),
        }
    }

    /// Whether an entry exists at the path, following symlinks.
    pub async fn exists(&self, path: &str) -> FsResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Existence/access check; the fixed reported modes make this an
    /// existence test.
    pub async fn access(&self, path: &str) -> FsResult<()> {
        self.stat(path).await.map(|_| ())
    }

    /// Child names of a directory, sorted.
    pub async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        Ok(self
            .readdir_typed(path)
            .await?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    /// Typed directory listing distinguishing files, directories, and
    /// symlinks, sorted by name.
    pub async fn readdir_typed(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let op = "readdir";
        let resolved = self.resolve_symlinks(op, path, false).await?;
        let entry = resolved.entry.ok_or(FsError::NotFound {
            op,
            path: resolved.path.clone(),
        })?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory {
                op,
                path: resolved.path,
            });
        }
        let mut children: Vec<DirEntry> = self
            .store
            .list_children(&resolved.path)
            .await?
            .iter()
            .map(|child| DirEntry {
                name: child.name.clone(),
                kind: child.entry_type(),
                size: child.size(),
            })
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    // ------------------------------------------------------------------
    // Descriptor layer
    // ------------------------------------------------------------------

    /// Open a descriptor on a path, resolving symlinks permissively. A
    /// missing file is created empty when the flags request writing, and is
    /// an error when they are read-only.
    pub async fn open(&self, path: &str, options: OpenOptions) -> FsResult<DescriptorId> {
        let op = "open";
        if !(options.read || options.write || options.append) {
            return Err(FsError::InvalidArgument {
                op,
                message: "open flags request neither read nor write".to_string(),
            });
        }
        let resolved = self.resolve_symlinks(op, path, true).await?;

        let cursor = match &resolved.entry {
            Some(entry) if entry.is_dir() => {
                return Err(FsError::IsADirectory {
                    op,
                    path: resolved.path,
                })
            }
            Some(entry) if options.append => entry.size(),
            Some(_) => 0,
            None => {
                if !(options.write || options.append) {
                    return Err(FsError::NotFound {
                        op,
                        path: resolved.path,
                    });
                }
                let _guard = self.lock_path(&resolved.path).await;
                if self.store.get(&resolved.path).await?.is_none() {
                    self.persist_file_update(op, &resolved.path, None, Vec::new())
                        .await?;
                }
                0
            }
        };

        self.allocate_descriptor(resolved.path, cursor, options, None)
    }

    fn allocate_descriptor(
        &self,
        path: String,
        cursor: u64,
        options: OpenOptions,
        bound_plugin: Option<String>,
    ) -> FsResult<DescriptorId> {
        let mut descriptors = self.descriptors.lock().unwrap();
        if descriptors.len() >= self.config.limits.max_open_descriptors {
            return Err(FsError::Busy { op: "open", path });
        }
        let id = {
            let mut next_id = self.next_descriptor_id.lock().unwrap();
            let id = DescriptorId::new(*next_id);
            *next_id += 1;
            id
        };
        trace!(fd = %id, path = %path, "descriptor opened");
        descriptors.insert(
            id,
            Descriptor {
                path,
                cursor,
                options,
                bound_plugin,
            },
        );
        Ok(id)
    }

    /// Mint a descriptor bound to a plugin, so later descriptor calls on the
    /// id route back to that plugin even though they carry no path.
    pub fn open_plugin_descriptor(
        &self,
        path: &str,
        options: OpenOptions,
        plugin: &str,
    ) -> FsResult<DescriptorId> {
        self.allocate_descriptor(
            paths::normalize(path),
            0,
            options,
            Some(plugin.to_string()),
        )
    }

    /// Name of the plugin a descriptor is bound to, if any.
    pub(crate) fn descriptor_plugin(
        &self,
        op: &'static str,
        fd: DescriptorId,
    ) -> FsResult<Option<String>> {
        let descriptors = self.descriptors.lock().unwrap();
        let descriptor = descriptors
            .get(&fd)
            .ok_or(FsError::BadDescriptor { op, fd: fd.0 })?;
        Ok(descriptor.bound_plugin.clone())
    }

    fn descriptor_snapshot(&self, op: &'static str, fd: DescriptorId) -> FsResult<Descriptor> {
        let descriptors = self.descriptors.lock().unwrap();
        descriptors
            .get(&fd)
            .cloned()
            .ok_or(FsError::BadDescriptor { op, fd: fd.0 })
    }

    fn set_descriptor_cursor(&self, fd: DescriptorId, cursor: u64) {
        let mut descriptors = self.descriptors.lock().unwrap();
        if let Some(descriptor) = descriptors.get_mut(&fd) {
            descriptor.cursor = cursor;
        }
    }

    /// Read from a descriptor into `buf` at `offset`.
    ///
    /// The file's current bytes are reloaded from the store on every call;
    /// descriptors cache nothing. Reads start at `position` when given,
    /// otherwise at the cursor, and only cursor-based reads advance the
    /// cursor.
    pub async fn fd_read(
        &self,
        fd: DescriptorId,
        buf: &mut [u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        let op = "read";
        let descriptor = self.descriptor_snapshot(op, fd)?;
        if !descriptor.options.read {
            return Err(FsError::BadDescriptor { op, fd: fd.0 });
        }
        if offset > buf.len() {
            return Err(FsError::InvalidArgument {
                op,
                message: format!("buffer offset {offset} exceeds buffer length {}", buf.len()),
            });
        }
        let content = self.load_descriptor_content(op, &descriptor.path).await?;
        let start = position.unwrap_or(descriptor.cursor) as usize;
        let available = content.len().saturating_sub(start);
        let count = length.min(available).min(buf.len() - offset);
        if count > 0 {
            buf[offset..offset + count].copy_from_slice(&content[start..start + count]);
        }
        if position.is_none() {
            self.set_descriptor_cursor(fd, (start + count) as u64);
        }
        Ok(count)
    }

    /// Write `data[offset..offset + length]` through a descriptor.
    ///
    /// The current bytes are reloaded, zero-extended to the write start when
    /// shorter, spliced, and the entire resulting buffer is persisted as one
    /// write — descriptor writes always rewrite the whole file, which is
    /// what makes hard-link propagation ordering observable. Only
    /// cursor-based writes advance the cursor.
    pub async fn fd_write(
        &self,
        fd: DescriptorId,
        data: &[u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        let op = "write";
        let descriptor = self.descriptor_snapshot(op, fd)?;
        if !(descriptor.options.write || descriptor.options.append) {
            return Err(FsError::BadDescriptor { op, fd: fd.0 });
        }
        if offset + length > data.len() {
            return Err(FsError::InvalidArgument {
                op,
                message: format!(
                    "range {offset}..{} exceeds data length {}",
                    offset + length,
                    data.len()
                ),
            });
        }

        let _guard = self.lock_path(&descriptor.path).await;
        let prior = self
            .store
            .get(&descriptor.path)
            .await?
            .ok_or_else(|| FsError::NotFound {
                op,
                path: descriptor.path.clone(),
            })?;
        let mut content = match &prior.kind {
            EntryKind::File { content, .. } => content.clone(),
            EntryKind::Directory => {
                return Err(FsError::IsADirectory {
                    op,
                    path: descriptor.path.clone(),
                })
            }
            EntryKind::Symlink { .. } => {
                return Err(FsError::InvalidArgument {
                    op,
                    message: format!("'{}' is not a regular file", descriptor.path),
                })
            }
        };

        let start = match position {
            Some(position) => position as usize,
            None if descriptor.options.append => content.len(),
            None => descriptor.cursor as usize,
        };
        if content.len() < start + length {
            content.resize(start + length, 0);
        }
        content[start..start + length].copy_from_slice(&data[offset..offset + length]);
        self.persist_file_update(op, &descriptor.path, Some(prior), content)
            .await?;
        if position.is_none() {
            self.set_descriptor_cursor(fd, (start + length) as u64);
        }
        Ok(length)
    }

    async fn load_descriptor_content(&self, op: &'static str, path: &str) -> FsResult<Vec<u8>> {
        match self.store.get(path).await? {
            None => Err(FsError::NotFound {
                op,
                path: path.to_string(),
            }),
            Some(Entry {
                kind: EntryKind::File { content, .. },
                ..
            }) => Ok(content),
            Some(Entry {
                kind: EntryKind::Directory,
                ..
            }) => Err(FsError::IsADirectory {
                op,
                path: path.to_string(),
            }),
            Some(_) => Err(FsError::InvalidArgument {
                op,
                message: format!("'{path}' is not a regular file"),
            }),
        }
    }

    /// Release a descriptor; the id is never reused.
    pub fn fd_close(&self, fd: DescriptorId) -> FsResult<()> {
        let mut descriptors = self.descriptors.lock().unwrap();
        descriptors
            .remove(&fd)
            .ok_or(FsError::BadDescriptor { op: "close", fd: fd.0 })?;
        trace!(fd = %fd, "descriptor closed");
        Ok(())
    }

    /// Number of currently open descriptors.
    pub fn open_descriptor_count(&self) -> usize {
        self.descriptors.lock().unwrap().len()
    }

    // ------------------------------------------------------------------
    // Watch surface
    // ------------------------------------------------------------------

    /// Register an event listener for an exact path.
    pub fn watch(
        &self,
        path: &str,
        listener: impl Fn(WatchEvent, &str) + Send + Sync + 'static,
    ) -> WatchHandle {
        self.events.watch(path, listener)
    }

    /// Register a paired-snapshot listener for an exact path; it fires only
    /// on in-place modification, with `(current, previous)` snapshots.
    pub fn watch_file(
        &self,
        path: &str,
        listener: impl Fn(&Stats, &Stats) + Send + Sync + 'static,
    ) -> WatchHandle {
        self.events.watch_file(path, listener)
    }

    /// Remove every paired-snapshot listener for a path.
    pub fn unwatch_file(&self, path: &str) {
        self.events.unwatch_file(path)
    }
}
