// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Routed filesystem facade
//!
//! `KvFs` is the public operation surface: every call normalizes its path
//! arguments, consults the interpose router, and either delegates to the
//! single matching plugin's handler or falls through to the built-in
//! engine. Descriptor calls carry no path, so they route by the plugin
//! binding recorded on the descriptor at open time. The watch surface is
//! independent of the router.

use std::sync::Arc;

use serde_json::Value;

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::interpose::{ActivePlugin, InterposeRouter, PluginFactory, RouteDecision};
use crate::paths;
use crate::store::Store;
use crate::streams::{FileReadStream, FileWriteStream};
use crate::types::{DescriptorId, DirEntry, OpenOptions, Stats};
use crate::vfs::FsCore;
use crate::watch::{WatchEvent, WatchHandle};

/// The routed filesystem surface.
pub struct KvFs {
    core: Arc<FsCore>,
    router: InterposeRouter,
}

impl std::fmt::Debug for KvFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvFs").finish_non_exhaustive()
    }
}

impl KvFs {
    /// Create a filesystem over a store adapter.
    pub async fn new(config: FsConfig, store: Arc<dyn Store>) -> FsResult<Self> {
        Ok(Self {
            core: Arc::new(FsCore::new(config, store).await?),
            router: InterposeRouter::new(),
        })
    }

    /// The built-in engine, bypassing the router.
    pub fn core(&self) -> &Arc<FsCore> {
        &self.core
    }

    /// Routing decision for one operation, raised as an error on ambiguity
    /// before any side effect.
    fn route(&self, op: &'static str, op_paths: &[&str]) -> FsResult<Option<Arc<ActivePlugin>>> {
        match self.router.route(op_paths) {
            RouteDecision::Builtin => Ok(None),
            RouteDecision::Delegate(plugin) => Ok(Some(plugin)),
            RouteDecision::Ambiguous(names) => Err(FsError::RoutingAmbiguity {
                op,
                plugins: names.join(", "),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Plugin management
    // ------------------------------------------------------------------

    /// Register a plugin factory under a name; inert until activated.
    pub fn register_plugin(&self, name: &str, factory: Arc<dyn PluginFactory>) {
        self.router.register(name, factory);
    }

    /// Instantiate a registered factory; the produced instance replaces any
    /// prior active instance of the same name.
    pub fn activate_plugin(&self, name: &str, options: Value) -> FsResult<()> {
        self.router.activate(Arc::clone(&self.core), name, options)
    }

    // ------------------------------------------------------------------
    // Entry lifecycle operations
    // ------------------------------------------------------------------

    pub async fn mkdir(&self, path: &str, recursive: bool) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("mkdir", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.mkdir.clone() {
                return handler(path, recursive).await;
            }
        }
        self.core.mkdir(&path, recursive).await
    }

    pub async fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("read", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.read_file.clone() {
                return handler(path).await;
            }
        }
        self.core.read_file(&path).await
    }

    pub async fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("write", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.write_file.clone() {
                return handler(path, data.to_vec()).await;
            }
        }
        self.core.write_file(&path, data).await
    }

    pub async fn append_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("append", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.append_file.clone() {
                return handler(path, data.to_vec()).await;
            }
        }
        self.core.append_file(&path, data).await
    }

    pub async fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("truncate", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.truncate.clone() {
                return handler(path, len).await;
            }
        }
        self.core.truncate(&path, len).await
    }

    pub async fn remove(&self, path: &str, recursive: bool, force: bool) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("remove", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.remove.clone() {
                return handler(path, recursive, force).await;
            }
        }
        self.core.remove(&path, recursive, force).await
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("unlink", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.unlink.clone() {
                return handler(path).await;
            }
        }
        self.core.unlink(&path).await
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("rmdir", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.rmdir.clone() {
                return handler(path).await;
            }
        }
        self.core.rmdir(&path).await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let old_path = paths::normalize(old_path);
        let new_path = paths::normalize(new_path);
        if let Some(plugin) = self.route("rename", &[old_path.as_str(), new_path.as_str()])? {
            if let Some(handler) = plugin.handlers.rename.clone() {
                return handler(old_path, new_path).await;
            }
        }
        self.core.rename(&old_path, &new_path).await
    }

    pub async fn copy_file(&self, from: &str, to: &str) -> FsResult<()> {
        let from = paths::normalize(from);
        let to = paths::normalize(to);
        if let Some(plugin) = self.route("copy-file", &[from.as_str(), to.as_str()])? {
            if let Some(handler) = plugin.handlers.copy_file.clone() {
                return handler(from, to).await;
            }
        }
        self.core.copy_file(&from, &to).await
    }

    /// Create a symlink. Only the link path routes; the target is stored
    /// verbatim and never interpreted here.
    pub async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("symlink", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.symlink.clone() {
                return handler(target.to_string(), path).await;
            }
        }
        self.core.symlink(target, &path).await
    }

    pub async fn read_link(&self, path: &str) -> FsResult<String> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("readlink", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.read_link.clone() {
                return handler(path).await;
            }
        }
        self.core.read_link(&path).await
    }

    pub async fn link(&self, existing_path: &str, new_path: &str) -> FsResult<()> {
        let existing_path = paths::normalize(existing_path);
        let new_path = paths::normalize(new_path);
        if let Some(plugin) = self.route("link", &[existing_path.as_str(), new_path.as_str()])? {
            if let Some(handler) = plugin.handlers.link.clone() {
                return handler(existing_path, new_path).await;
            }
        }
        self.core.link(&existing_path, &new_path).await
    }

    pub async fn link_count(&self, path: &str) -> FsResult<u64> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("link-count", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.link_count.clone() {
                return handler(path).await;
            }
        }
        self.core.link_count(&path).await
    }

    pub async fn stat(&self, path: &str) -> FsResult<Stats> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("stat", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.stat.clone() {
                return handler(path).await;
            }
        }
        self.core.stat(&path).await
    }

    pub async fn lstat(&self, path: &str) -> FsResult<Stats> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("lstat", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.lstat.clone() {
                return handler(path).await;
            }
        }
        self.core.lstat(&path).await
    }

    pub async fn exists(&self, path: &str) -> FsResult<bool> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("exists", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.exists.clone() {
                return handler(path).await;
            }
        }
        self.core.exists(&path).await
    }

    pub async fn access(&self, path: &str) -> FsResult<()> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("access", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.access.clone() {
                return handler(path).await;
            }
        }
        self.core.access(&path).await
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("readdir", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.readdir.clone() {
                return handler(path).await;
            }
        }
        self.core.readdir(&path).await
    }

    pub async fn readdir_typed(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("readdir", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.readdir_typed.clone() {
                return handler(path).await;
            }
        }
        self.core.readdir_typed(&path).await
    }

    // ------------------------------------------------------------------
    // Descriptor layer
    // ------------------------------------------------------------------

    pub async fn open(&self, path: &str, options: OpenOptions) -> FsResult<DescriptorId> {
        let path = paths::normalize(path);
        if let Some(plugin) = self.route("open", &[path.as_str()])? {
            if let Some(handler) = plugin.handlers.open.clone() {
                return handler(path, options).await;
            }
        }
        self.core.open(&path, options).await
    }

    /// Read through a descriptor into `buf` at `offset`. Descriptor calls
    /// carry no path; a descriptor minted by a plugin routes back to that
    /// plugin's handler by name, and a bound descriptor whose plugin is gone
    /// (or lacks the handler) is a dead handle.
    pub async fn fd_read(
        &self,
        fd: DescriptorId,
        buf: &mut [u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        let op = "read";
        if let Some(name) = self.core.descriptor_plugin(op, fd)? {
            let handler = self
                .router
                .active_named(&name)
                .and_then(|plugin| plugin.handlers.fd_read.clone())
                .ok_or(FsError::BadDescriptor { op, fd: fd.0 })?;
            if offset > buf.len() {
                return Err(FsError::InvalidArgument {
                    op,
                    message: format!("buffer offset {offset} exceeds buffer length {}", buf.len()),
                });
            }
            let data = handler(fd, length as u64, position).await?;
            let count = data.len().min(length).min(buf.len() - offset);
            if count > 0 {
                buf[offset..offset + count].copy_from_slice(&data[..count]);
            }
            return Ok(count);
        }
        self.core.fd_read(fd, buf, offset, length, position).await
    }

    /// Write `data[offset..offset + length]` through a descriptor.
    pub async fn fd_write(
        &self,
        fd: DescriptorId,
        data: &[u8],
        offset: usize,
        length: usize,
        position: Option<u64>,
    ) -> FsResult<usize> {
        let op = "write";
        if let Some(name) = self.core.descriptor_plugin(op, fd)? {
            let handler = self
                .router
                .active_named(&name)
                .and_then(|plugin| plugin.handlers.fd_write.clone())
                .ok_or(FsError::BadDescriptor { op, fd: fd.0 })?;
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
            return handler(fd, data[offset..offset + length].to_vec(), position).await;
        }
        self.core.fd_write(fd, data, offset, length, position).await
    }

    pub async fn fd_close(&self, fd: DescriptorId) -> FsResult<()> {
        let op = "close";
        if let Some(name) = self.core.descriptor_plugin(op, fd)? {
            let handler = self
                .router
                .active_named(&name)
                .and_then(|plugin| plugin.handlers.fd_close.clone())
                .ok_or(FsError::BadDescriptor { op, fd: fd.0 })?;
            return handler(fd).await;
        }
        self.core.fd_close(fd)
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Chunked read stream; the whole file is loaded on first poll and then
    /// emitted in `FsConfig.streams.chunk_size` chunks.
    pub fn create_read_stream(&self, path: &str) -> FileReadStream {
        FileReadStream::new(
            Arc::clone(&self.core),
            paths::normalize(path),
            self.core.config().streams.chunk_size,
        )
    }

    /// Buffering write stream; persisted as a single write on `finish`.
    pub fn create_write_stream(&self, path: &str) -> FileWriteStream {
        FileWriteStream::new(Arc::clone(&self.core), paths::normalize(path))
    }

    // ------------------------------------------------------------------
    // Watch surface (independent of the router)
    // ------------------------------------------------------------------

    pub fn watch(
        &self,
        path: &str,
        listener: impl Fn(WatchEvent, &str) + Send + Sync + 'static,
    ) -> WatchHandle {
        self.core.watch(path, listener)
    }

    pub fn watch_file(
        &self,
        path: &str,
        listener: impl Fn(&Stats, &Stats) + Send + Sync + 'static,
    ) -> WatchHandle {
        self.core.watch_file(path, listener)
    }

    pub fn unwatch_file(&self, path: &str) {
        self.core.unwatch_file(path)
    }
}
