// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path normalization helpers
//!
//! All engine state is keyed by normalized absolute paths: a single leading
//! `/`, no trailing `/` except for the root itself. Normalization is
//! idempotent.

/// The root path.
pub const ROOT: &str = "/";

/// Normalize a path: ensure a single leading `/` and strip any trailing `/`
/// unless the path is exactly the root.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{trimmed}")
    }
}

pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Last segment of a normalized path; the root's base name is `/`.
pub fn base_name(path: &str) -> &str {
    if is_root(path) {
        ROOT
    } else {
        path.rsplit('/').next().unwrap_or(path)
    }
}

/// Containing directory of a normalized path; empty for the root, so the
/// root is never listed as its own child.
pub fn parent_path(path: &str) -> String {
    if is_root(path) {
        return String::new();
    }
    match path.rfind('/') {
        Some(0) => ROOT.to_string(),
        Some(idx) => path[..idx].to_string(),
        None => ROOT.to_string(),
    }
}

/// Join a child name onto a normalized directory path.
pub fn child_path(parent: &str, name: &str) -> String {
    if is_root(parent) {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Non-empty segments of a normalized path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Whether `path` lies strictly inside the subtree rooted at `ancestor`
/// (segment-exact, so `/foobar` is not within `/foo`).
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if is_root(ancestor) {
        return !is_root(path);
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}
