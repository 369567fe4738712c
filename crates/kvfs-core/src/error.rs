// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the kvfs engine

/// Opaque failure reported by a store adapter.
///
/// Adapter failures are never translated into the filesystem error taxonomy;
/// they surface to callers as [`FsError::Io`] with whatever context the
/// adapter attached.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct StoreError(#[from] anyhow::Error);

impl StoreError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self(anyhow::anyhow!(message.into()))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Core filesystem error type.
///
/// Every variant carries the operation it arose from and the offending
/// path(s); `code()` yields the short symbolic code for programmatic
/// matching.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("{op}: no such entry: '{path}'")]
    NotFound { op: &'static str, path: String },
    #[error("{op}: entry already exists: '{path}'")]
    AlreadyExists { op: &'static str, path: String },
    #[error("{op}: not a directory: '{path}'")]
    NotADirectory { op: &'static str, path: String },
    #[error("{op}: directory not empty: '{path}'")]
    NotEmpty { op: &'static str, path: String },
    #[error("{op}: is a directory: '{path}'")]
    IsADirectory { op: &'static str, path: String },
    #[error("{op}: too many levels of symbolic links: '{path}'")]
    LinkLoop { op: &'static str, path: String },
    #[error("{op}: invalid argument: {message}")]
    InvalidArgument { op: &'static str, message: String },
    #[error("{op}: operation not permitted: '{path}'")]
    NotPermitted { op: &'static str, path: String },
    #[error("{op}: bad file descriptor: {fd}")]
    BadDescriptor { op: &'static str, fd: u64 },
    #[error("{op}: resource busy: '{path}'")]
    Busy { op: &'static str, path: String },
    #[error("{op}: cross-device link: '{from}' -> '{to}'")]
    CrossDevice {
        op: &'static str,
        from: String,
        to: String,
    },
    #[error("{op}: ambiguous routing, paths match plugins [{plugins}]")]
    RoutingAmbiguity { op: &'static str, plugins: String },
    #[error("io error: {0}")]
    Io(#[from] StoreError),
}

impl FsError {
    /// Short symbolic code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound { .. } => "not-found",
            FsError::AlreadyExists { .. } => "already-exists",
            FsError::NotADirectory { .. } => "not-a-directory",
            FsError::NotEmpty { .. } => "directory-not-empty",
            FsError::IsADirectory { .. } => "is-a-directory",
            FsError::LinkLoop { .. } => "link-loop",
            FsError::InvalidArgument { .. } => "invalid-argument",
            FsError::NotPermitted { .. } => "operation-not-permitted",
            FsError::BadDescriptor { .. } => "bad-descriptor",
            FsError::Busy { .. } => "resource-busy",
            FsError::CrossDevice { .. } => "cross-device",
            FsError::RoutingAmbiguity { .. } => "routing-ambiguity",
            FsError::Io(_) => "io",
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
