// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mock store adapter for testing fault injection and error handling
//!
//! A configurable decorator around any `Store` implementation that can
//! simulate failure scenarios: fail a given operation always, after N
//! successful calls, for the first N calls, or per a custom predicate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::store::Store;
use crate::types::Entry;

/// Custom predicate: receives `(operation_name, call_count)` and returns an
/// error to inject, or `None` to let the call through.
pub type FaultPredicate = Arc<dyn Fn(&str, u64) -> Option<StoreError> + Send + Sync>;

/// Configurable failure behavior for mock store operations.
pub enum FailureBehavior {
    /// Never fail.
    AlwaysSucceed,
    /// Fail a specific operation after `count` successful calls to it.
    FailAfter { op: &'static str, count: u64 },
    /// Fail the first `count` calls to a specific operation.
    FailFor { op: &'static str, count: u64 },
    /// Always fail a specific operation.
    AlwaysFail { op: &'static str },
    /// Custom predicate deciding per call.
    Custom(FaultPredicate),
}

impl Default for FailureBehavior {
    fn default() -> Self {
        Self::AlwaysSucceed
    }
}

fn injected_error(op: &str) -> StoreError {
    StoreError::msg(format!("injected {op} failure"))
}

/// Fault-injecting decorator over an inner store.
pub struct FaultStore {
    inner: Arc<dyn Store>,
    behavior: FailureBehavior,
    call_counts: Mutex<HashMap<&'static str, u64>>,
}

impl FaultStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self::with_behavior(inner, FailureBehavior::AlwaysSucceed)
    }

    pub fn with_behavior(inner: Arc<dyn Store>, behavior: FailureBehavior) -> Self {
        Self {
            inner,
            behavior,
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Calls seen for one operation so far.
    pub fn calls(&self, op: &'static str) -> u64 {
        *self.call_counts.lock().unwrap().get(op).unwrap_or(&0)
    }

    fn check(&self, op: &'static str) -> StoreResult<()> {
        let count = {
            let mut counts = self.call_counts.lock().unwrap();
            let entry = counts.entry(op).or_insert(0);
            *entry += 1;
            *entry
        };
        match &self.behavior {
            FailureBehavior::AlwaysSucceed => Ok(()),
            FailureBehavior::FailAfter { op: target, count: threshold } => {
                if op == *target && count > *threshold {
                    Err(injected_error(op))
                } else {
                    Ok(())
                }
            }
            FailureBehavior::FailFor { op: target, count: threshold } => {
                if op == *target && count <= *threshold {
                    Err(injected_error(op))
                } else {
                    Ok(())
                }
            }
            FailureBehavior::AlwaysFail { op: target } => {
                if op == *target {
                    Err(injected_error(op))
                } else {
                    Ok(())
                }
            }
            FailureBehavior::Custom(predicate) => match predicate(op, count) {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }
}

#[async_trait]
impl Store for FaultStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Entry>> {
        self.check("get")?;
        self.inner.get(path).await
    }

    async fn put(&self, entry: Entry) -> StoreResult<()> {
        self.check("put")?;
        self.inner.put(entry).await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.check("delete")?;
        self.inner.delete(path).await
    }

    async fn list_children(&self, parent_path: &str) -> StoreResult<Vec<Entry>> {
        self.check("list_children")?;
        self.inner.list_children(parent_path).await
    }

    async fn list_by_link_group(&self, key: &str) -> StoreResult<Vec<Entry>> {
        self.check("list_by_link_group")?;
        self.inner.list_by_link_group(key).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.check("clear")?;
        self.inner.clear().await
    }
}
