// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! kvfs core — a POSIX-inspired virtual filesystem over an abstract
//! key-value store
//!
//! Files, directories, and symbolic/hard links addressed by normalized
//! absolute paths, persisted through the pluggable [`Store`] adapter and
//! exposed through an asynchronous operation surface ([`KvFs`]) with a
//! path-pattern interposition layer, a descriptor table with cursor
//! semantics, chunked streaming, and a watch/notification bus. A
//! callback-style mirror ([`CallbackFs`]) covers the same surface for
//! callers that prefer error-first completion callbacks.

pub mod callback;
pub mod config;
pub mod error;
pub mod fs;
pub mod interpose;
pub mod paths;
pub mod store;
pub mod streams;
pub mod testing;
pub mod types;
pub mod vfs;
pub mod watch;

pub use callback::CallbackFs;
pub use config::{DescriptorPolicy, FsConfig, FsLimits, StreamPolicy};
pub use error::{FsError, FsResult, StoreError, StoreResult};
pub use fs::KvFs;
pub use interpose::{
    InterposeRouter, PluginContext, PluginFactory, PluginHandlers, PluginSpec,
};
pub use store::{InMemoryStore, Store};
pub use streams::{FileReadStream, FileWriteStream};
pub use types::{
    DescriptorId, DirEntry, Entry, EntryKind, EntryType, OpenOptions, Stats, DEFAULT_MIME_TYPE,
    DIR_MODE, FILE_MODE, SYMLINK_MODE,
};
pub use vfs::FsCore;
pub use watch::{WatchBus, WatchEvent, WatchHandle};

#[cfg(test)]
mod test_interpose;
#[cfg(test)]
mod test_watch;
