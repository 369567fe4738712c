// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Store adapter contract and the in-memory reference adapter
//!
//! The engine persists entries through this trait and nothing else. Every
//! call is a suspension point; failures are opaque [`StoreError`]s that the
//! engine surfaces as I/O errors without interpretation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::Entry;

/// Persistent key-value mapping from normalized path to entry, with
/// secondary lookups by parent path and by hard-link group key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the entry stored at a normalized path.
    async fn get(&self, path: &str) -> StoreResult<Option<Entry>>;

    /// Insert or replace the entry at `entry.path`.
    async fn put(&self, entry: Entry) -> StoreResult<()>;

    /// Remove the entry at a normalized path. Removing a missing path is not
    /// an adapter error.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// All entries whose `parent_path` equals `parent_path`. Order is
    /// unspecified.
    async fn list_children(&self, parent_path: &str) -> StoreResult<Vec<Entry>>;

    /// All file entries sharing a hard-link group key.
    async fn list_by_link_group(&self, key: &str) -> StoreResult<Vec<Entry>>;

    /// Drop every stored entry.
    async fn clear(&self) -> StoreResult<()>;
}

/// In-memory store adapter.
///
/// The reference adapter used by tests and ephemeral filesystems; secondary
/// lookups are linear scans, which is fine at the scale this adapter is
/// meant for.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, root included.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Entry>> {
        Ok(self.entries.lock().unwrap().get(path).cloned())
    }

    async fn put(&self, entry: Entry) -> StoreResult<()> {
        self.entries.lock().unwrap().insert(entry.path.clone(), entry);
        Ok(())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.entries.lock().unwrap().remove(path);
        Ok(())
    }

    async fn list_children(&self, parent_path: &str) -> StoreResult<Vec<Entry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.parent_path == parent_path)
            .cloned()
            .collect())
    }

    async fn list_by_link_group(&self, key: &str) -> StoreResult<Vec<Entry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.link_group() == Some(key))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}
