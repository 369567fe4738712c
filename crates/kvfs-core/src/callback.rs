// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error-first callback mirror of the filesystem surface
//!
//! Every routed operation is mirrored with a completion callback instead of
//! a returned future, for callers that prefer that style. The mirror is
//! buffered: descriptor reads hand the callback an owned buffer rather than
//! filling a caller-provided slice. Calls are dispatched onto the ambient
//! tokio runtime, so a runtime must be running.

use std::sync::Arc;

use crate::error::FsResult;
use crate::fs::KvFs;
use crate::types::{DescriptorId, DirEntry, OpenOptions, Stats};

/// Callback-style mirror over a shared [`KvFs`].
#[derive(Clone)]
pub struct CallbackFs {
    fs: Arc<KvFs>,
}

impl CallbackFs {
    pub fn new(fs: Arc<KvFs>) -> Self {
        Self { fs }
    }

    pub fn fs(&self) -> &Arc<KvFs> {
        &self.fs
    }

    pub fn mkdir(
        &self,
        path: &str,
        recursive: bool,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.mkdir(&path, recursive).await) });
    }

    pub fn read_file(
        &self,
        path: &str,
        callback: impl FnOnce(FsResult<Vec<u8>>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.read_file(&path).await) });
    }

    pub fn write_file(
        &self,
        path: &str,
        data: &[u8],
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        let data = data.to_vec();
        tokio::spawn(async move { callback(fs.write_file(&path, &data).await) });
    }

    pub fn append_file(
        &self,
        path: &str,
        data: &[u8],
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        let data = data.to_vec();
        tokio::spawn(async move { callback(fs.append_file(&path, &data).await) });
    }

    pub fn truncate(
        &self,
        path: &str,
        len: u64,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.truncate(&path, len).await) });
    }

    pub fn remove(
        &self,
        path: &str,
        recursive: bool,
        force: bool,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.remove(&path, recursive, force).await) });
    }

    pub fn unlink(&self, path: &str, callback: impl FnOnce(FsResult<()>) + Send + 'static) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.unlink(&path).await) });
    }

    pub fn rmdir(&self, path: &str, callback: impl FnOnce(FsResult<()>) + Send + 'static) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.rmdir(&path).await) });
    }

    pub fn rename(
        &self,
        old_path: &str,
        new_path: &str,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let old_path = old_path.to_string();
        let new_path = new_path.to_string();
        tokio::spawn(async move { callback(fs.rename(&old_path, &new_path).await) });
    }

    pub fn copy_file(
        &self,
        from: &str,
        to: &str,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let from = from.to_string();
        let to = to.to_string();
        tokio::spawn(async move { callback(fs.copy_file(&from, &to).await) });
    }

    pub fn symlink(
        &self,
        target: &str,
        path: &str,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let target = target.to_string();
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.symlink(&target, &path).await) });
    }

    pub fn read_link(
        &self,
        path: &str,
        callback: impl FnOnce(FsResult<String>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.read_link(&path).await) });
    }

    pub fn link(
        &self,
        existing_path: &str,
        new_path: &str,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let existing_path = existing_path.to_string();
        let new_path = new_path.to_string();
        tokio::spawn(async move { callback(fs.link(&existing_path, &new_path).await) });
    }

    pub fn link_count(
        &self,
        path: &str,
        callback: impl FnOnce(FsResult<u64>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.link_count(&path).await) });
    }

    pub fn stat(&self, path: &str, callback: impl FnOnce(FsResult<Stats>) + Send + 'static) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.stat(&path).await) });
    }

    pub fn lstat(&self, path: &str, callback: impl FnOnce(FsResult<Stats>) + Send + 'static) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.lstat(&path).await) });
    }

    pub fn exists(&self, path: &str, callback: impl FnOnce(FsResult<bool>) + Send + 'static) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.exists(&path).await) });
    }

    pub fn access(&self, path: &str, callback: impl FnOnce(FsResult<()>) + Send + 'static) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.access(&path).await) });
    }

    pub fn readdir(
        &self,
        path: &str,
        callback: impl FnOnce(FsResult<Vec<String>>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.readdir(&path).await) });
    }

    pub fn readdir_typed(
        &self,
        path: &str,
        callback: impl FnOnce(FsResult<Vec<DirEntry>>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.readdir_typed(&path).await) });
    }

    pub fn open(
        &self,
        path: &str,
        options: OpenOptions,
        callback: impl FnOnce(FsResult<DescriptorId>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        tokio::spawn(async move { callback(fs.open(&path, options).await) });
    }

    /// Buffered descriptor read: the callback receives the bytes actually
    /// read, at most `length` of them.
    pub fn fd_read(
        &self,
        fd: DescriptorId,
        length: usize,
        position: Option<u64>,
        callback: impl FnOnce(FsResult<Vec<u8>>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        tokio::spawn(async move {
            let mut buf = vec![0u8; length];
            let result = fs.fd_read(fd, &mut buf, 0, length, position).await;
            callback(result.map(|count| {
                buf.truncate(count);
                buf
            }));
        });
    }

    pub fn fd_write(
        &self,
        fd: DescriptorId,
        data: &[u8],
        position: Option<u64>,
        callback: impl FnOnce(FsResult<usize>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        let data = data.to_vec();
        tokio::spawn(async move {
            let len = data.len();
            callback(fs.fd_write(fd, &data, 0, len, position).await)
        });
    }

    pub fn fd_close(
        &self,
        fd: DescriptorId,
        callback: impl FnOnce(FsResult<()>) + Send + 'static,
    ) {
        let fs = Arc::clone(&self.fs);
        tokio::spawn(async move { callback(fs.fd_close(fd).await) });
    }
}
