// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine configuration

/// Traversal and table limits.
#[derive(Clone, Debug)]
pub struct FsLimits {
    /// Symlink-chain hop bound; resolution fails with a link-loop error when
    /// a chain would need this many hops.
    pub max_symlink_hops: u32,
    /// Maximum number of simultaneously open descriptors.
    pub max_open_descriptors: usize,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_symlink_hops: 10,
            max_open_descriptors: 10_000,
        }
    }
}

/// Descriptor id allocation policy.
#[derive(Clone, Debug)]
pub struct DescriptorPolicy {
    /// First id handed out; everything below is reserved.
    pub first_id: u64,
}

impl Default for DescriptorPolicy {
    fn default() -> Self {
        Self { first_id: 3 }
    }
}

/// Chunked streaming policy.
#[derive(Clone, Debug)]
pub struct StreamPolicy {
    /// Size of the chunks a read stream emits.
    pub chunk_size: usize,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Default)]
pub struct FsConfig {
    pub limits: FsLimits,
    pub descriptors: DescriptorPolicy,
    pub streams: StreamPolicy,
}
