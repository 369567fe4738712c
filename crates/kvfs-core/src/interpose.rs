// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Interpose router: path-pattern plugin interception
//!
//! A plugin is registered as a named factory (pure registration, inert) and
//! becomes active when instantiated with options. The active instance is a
//! match pattern plus a capability table: one optional handler slot per
//! interceptable operation, looked up through a fallback chain of plugin
//! handler first, built-in second. Re-registering a name replaces only the
//! factory; re-activating a name atomically replaces the active instance.
//!
//! Dispatch inspects every path argument of an operation. If the paths match
//! more than one distinct active plugin, the operation fails with a
//! routing-ambiguity error before any side effect; if they match exactly one
//! and it defines the operation's handler, the call is delegated entirely;
//! otherwise the built-in implementation runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{FsError, FsResult};
use crate::paths;
use crate::streams::{FileReadStream, FileWriteStream};
use crate::types::{DescriptorId, DirEntry, OpenOptions, Stats};
use crate::vfs::FsCore;
use crate::watch::{WatchEvent, WatchHandle};

// Handler slots. Each takes owned arguments so instances can move them into
// their futures; paths arrive normalized.
pub type MkdirHandler =
    Arc<dyn Fn(String, bool) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;
pub type ReadFileHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<Vec<u8>>> + Send + Sync>;
pub type WriteFileHandler =
    Arc<dyn Fn(String, Vec<u8>) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;
pub type TruncateHandler =
    Arc<dyn Fn(String, u64) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;
pub type RemoveHandler =
    Arc<dyn Fn(String, bool, bool) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;
pub type PathHandler = Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;
pub type DualPathHandler =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;
pub type ReadLinkHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<String>> + Send + Sync>;
pub type LinkCountHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<u64>> + Send + Sync>;
pub type StatHandler = Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<Stats>> + Send + Sync>;
pub type ExistsHandler = Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<bool>> + Send + Sync>;
pub type ReaddirHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<Vec<String>>> + Send + Sync>;
pub type ReaddirTypedHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, FsResult<Vec<DirEntry>>> + Send + Sync>;
pub type OpenHandler =
    Arc<dyn Fn(String, OpenOptions) -> BoxFuture<'static, FsResult<DescriptorId>> + Send + Sync>;
pub type FdReadHandler = Arc<
    dyn Fn(DescriptorId, u64, Option<u64>) -> BoxFuture<'static, FsResult<Vec<u8>>> + Send + Sync,
>;
pub type FdWriteHandler = Arc<
    dyn Fn(DescriptorId, Vec<u8>, Option<u64>) -> BoxFuture<'static, FsResult<usize>>
        + Send
        + Sync,
>;
pub type FdCloseHandler =
    Arc<dyn Fn(DescriptorId) -> BoxFuture<'static, FsResult<()>> + Send + Sync>;

/// Capability table for an active plugin: one optional handler per
/// interceptable operation. Missing slots fall through to the built-in
/// implementation.
#[derive(Clone, Default)]
pub struct PluginHandlers {
    pub mkdir: Option<MkdirHandler>,
    pub read_file: Option<ReadFileHandler>,
    pub write_file: Option<WriteFileHandler>,
    pub append_file: Option<WriteFileHandler>,
    pub truncate: Option<TruncateHandler>,
    pub remove: Option<RemoveHandler>,
    pub unlink: Option<PathHandler>,
    pub rmdir: Option<PathHandler>,
    pub rename: Option<DualPathHandler>,
    pub copy_file: Option<DualPathHandler>,
    pub symlink: Option<DualPathHandler>,
    pub read_link: Option<ReadLinkHandler>,
    pub link: Option<DualPathHandler>,
    pub link_count: Option<LinkCountHandler>,
    pub stat: Option<StatHandler>,
    pub lstat: Option<StatHandler>,
    pub exists: Option<ExistsHandler>,
    pub access: Option<PathHandler>,
    pub readdir: Option<ReaddirHandler>,
    pub readdir_typed: Option<ReaddirTypedHandler>,
    pub open: Option<OpenHandler>,
    pub fd_read: Option<FdReadHandler>,
    pub fd_write: Option<FdWriteHandler>,
    pub fd_close: Option<FdCloseHandler>,
}

/// What a factory produces: the pattern the instance intercepts plus its
/// handler table. The pattern is a regular expression matched against
/// normalized absolute paths; anchor it as needed.
pub struct PluginSpec {
    pub match_pattern: String,
    pub handlers: PluginHandlers,
}

/// Named plugin constructor, inert until activated.
pub trait PluginFactory: Send + Sync {
    fn instantiate(&self, ctx: PluginContext, options: Value) -> FsResult<PluginSpec>;
}

/// Capabilities handed to a plugin at activation: the built-in engine,
/// descriptor allocation/release bound to this plugin's name, and the
/// unrouted watch/stream primitives.
#[derive(Clone)]
pub struct PluginContext {
    core: Arc<FsCore>,
    plugin_name: String,
}

impl PluginContext {
    pub(crate) fn new(core: Arc<FsCore>, plugin_name: String) -> Self {
        Self { core, plugin_name }
    }

    /// The built-in engine, bypassing the router.
    pub fn core(&self) -> &Arc<FsCore> {
        &self.core
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// Mint a descriptor bound to this plugin, so later descriptor calls on
    /// the id route back here even though they carry no path.
    pub fn mint_descriptor(&self, path: &str, options: OpenOptions) -> FsResult<DescriptorId> {
        self.core
            .open_plugin_descriptor(path, options, &self.plugin_name)
    }

    /// Release a descriptor minted by this plugin.
    pub fn release_descriptor(&self, fd: DescriptorId) -> FsResult<()> {
        self.core.fd_close(fd)
    }

    /// Unrouted chunked read stream over the built-in engine.
    pub fn read_stream(&self, path: &str) -> FileReadStream {
        FileReadStream::new(
            Arc::clone(&self.core),
            paths::normalize(path),
            self.core.config().streams.chunk_size,
        )
    }

    /// Unrouted buffering write stream over the built-in engine.
    pub fn write_stream(&self, path: &str) -> FileWriteStream {
        FileWriteStream::new(Arc::clone(&self.core), paths::normalize(path))
    }

    /// Unrouted watch registration.
    pub fn watch(
        &self,
        path: &str,
        listener: impl Fn(WatchEvent, &str) + Send + Sync + 'static,
    ) -> WatchHandle {
        self.core.watch(path, listener)
    }
}

pub(crate) struct ActivePlugin {
    pub(crate) name: String,
    pattern: Regex,
    pub(crate) handlers: PluginHandlers,
}

/// Routing decision for one operation's path arguments, computed before any
/// side effect.
pub(crate) enum RouteDecision {
    /// No path matched an active plugin.
    Builtin,
    /// Every matched path agreed on a single plugin.
    Delegate(Arc<ActivePlugin>),
    /// The paths matched two or more distinct plugins.
    Ambiguous(Vec<String>),
}

/// Registry of plugin factories and active instances.
pub struct InterposeRouter {
    factories: Mutex<HashMap<String, Arc<dyn PluginFactory>>>,
    /// Active instances in activation order; the first match wins per path.
    active: Mutex<Vec<Arc<ActivePlugin>>>,
}

impl InterposeRouter {
    pub(crate) fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
            active: Mutex::new(Vec::new()),
        }
    }

    /// Store a factory under a name. Replaces only the factory; any
    /// already-activated instance of that name keeps running until the next
    /// activation.
    pub fn register(&self, name: &str, factory: Arc<dyn PluginFactory>) {
        debug!(plugin = name, "plugin factory registered");
        self.factories
            .lock()
            .unwrap()
            .insert(name.to_string(), factory);
    }

    /// Instantiate the named factory and install the produced instance,
    /// atomically replacing any prior active instance of the same name.
    pub fn activate(&self, core: Arc<FsCore>, name: &str, options: Value) -> FsResult<()> {
        let op = "activate-plugin";
        let factory = self
            .factories
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| FsError::InvalidArgument {
                op,
                message: format!("no plugin factory registered under '{name}'"),
            })?;
        let spec = factory.instantiate(PluginContext::new(core, name.to_string()), options)?;
        let pattern = Regex::new(&spec.match_pattern).map_err(|err| FsError::InvalidArgument {
            op,
            message: format!("invalid match pattern '{}': {err}", spec.match_pattern),
        })?;
        let plugin = Arc::new(ActivePlugin {
            name: name.to_string(),
            pattern,
            handlers: spec.handlers,
        });

        let mut active = self.active.lock().unwrap();
        match active.iter_mut().find(|p| p.name == name) {
            Some(slot) => *slot = plugin,
            None => active.push(plugin),
        }
        debug!(plugin = name, "plugin activated");
        Ok(())
    }

    /// Route an operation by its normalized path arguments.
    pub(crate) fn route(&self, op_paths: &[&str]) -> RouteDecision {
        let active = self.active.lock().unwrap();
        if active.is_empty() {
            return RouteDecision::Builtin;
        }
        let mut matched: Vec<Arc<ActivePlugin>> = Vec::new();
        for path in op_paths {
            if let Some(plugin) = active.iter().find(|p| p.pattern.is_match(path)) {
                if !matched.iter().any(|m| m.name == plugin.name) {
                    matched.push(Arc::clone(plugin));
                }
            }
        }
        match matched.len() {
            0 => RouteDecision::Builtin,
            1 => RouteDecision::Delegate(matched.remove(0)),
            _ => {
                let mut names: Vec<String> = matched.iter().map(|m| m.name.clone()).collect();
                names.sort();
                RouteDecision::Ambiguous(names)
            }
        }
    }

    /// Active instance by name, used for descriptor continuity.
    pub(crate) fn active_named(&self, name: &str) -> Option<Arc<ActivePlugin>> {
        self.active.lock().unwrap().iter().find(|p| p.name == name).map(Arc::clone)
    }
}
