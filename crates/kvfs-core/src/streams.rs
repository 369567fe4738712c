// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Chunked read/write streaming over the whole-file primitives
//!
//! A read stream loads the file once and then yields fixed-size chunks; the
//! consumer's poll cadence is the pause/resume mechanism. A write stream is
//! a buffering convenience: chunks accumulate in memory and nothing reaches
//! the store until `finish`, which persists the accumulated buffer as a
//! single write. Neither stream holds a descriptor.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;

use crate::error::FsResult;
use crate::vfs::FsCore;

enum ReadState {
    Idle,
    Loading(BoxFuture<'static, FsResult<Vec<u8>>>),
    Draining { content: Vec<u8>, position: usize },
    Done,
}

/// Stream of file chunks; item errors are terminal.
pub struct FileReadStream {
    core: Arc<FsCore>,
    path: String,
    chunk_size: usize,
    state: ReadState,
}

impl FileReadStream {
    pub(crate) fn new(core: Arc<FsCore>, path: String, chunk_size: usize) -> Self {
        Self {
            core,
            path,
            chunk_size: chunk_size.max(1),
            state: ReadState::Idle,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Stream for FileReadStream {
    type Item = FsResult<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ReadState::Idle => {
                    let core = Arc::clone(&this.core);
                    let path = this.path.clone();
                    this.state = ReadState::Loading(Box::pin(async move {
                        core.read_file(&path).await
                    }));
                }
                ReadState::Loading(load) => match load.as_mut().poll(cx) {
                    Poll::Ready(Ok(content)) => {
                        this.state = ReadState::Draining {
                            content,
                            position: 0,
                        };
                    }
                    Poll::Ready(Err(err)) => {
                        this.state = ReadState::Done;
                        return Poll::Ready(Some(Err(err)));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                ReadState::Draining { content, position } => {
                    if *position >= content.len() {
                        this.state = ReadState::Done;
                        return Poll::Ready(None);
                    }
                    let end = (*position + this.chunk_size).min(content.len());
                    let chunk = content[*position..end].to_vec();
                    *position = end;
                    return Poll::Ready(Some(Ok(chunk)));
                }
                ReadState::Done => return Poll::Ready(None),
            }
        }
    }
}

/// Accumulating write stream; persisted only by `finish`.
pub struct FileWriteStream {
    core: Arc<FsCore>,
    path: String,
    buffer: Vec<u8>,
}

impl FileWriteStream {
    pub(crate) fn new(core: Arc<FsCore>, path: String) -> Self {
        Self {
            core,
            path,
            buffer: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Buffer a chunk. Nothing is persisted until `finish`.
    pub fn write(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Persist the accumulated buffer as a single write. Dropping the stream
    /// without calling this writes nothing.
    pub async fn finish(self) -> FsResult<()> {
        self.core.write_file(&self.path, &self.buffer).await
    }
}
