// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tests for the interpose router: registration/activation lifecycle,
//! dispatch and fallthrough, ambiguity detection, and descriptor
//! continuity.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::config::FsConfig;
use crate::error::FsResult;
use crate::fs::KvFs;
use crate::interpose::{PluginContext, PluginFactory, PluginHandlers, PluginSpec};
use crate::store::InMemoryStore;
use crate::types::{DescriptorId, OpenOptions};

async fn new_fs() -> KvFs {
    KvFs::new(FsConfig::default(), Arc::new(InMemoryStore::new()))
        .await
        .expect("engine creation")
}

/// Serves a fixed payload for reads under a fixed pattern; defines no other
/// handlers.
struct ConstReadFactory {
    pattern: &'static str,
    payload: &'static [u8],
}

impl PluginFactory for ConstReadFactory {
    fn instantiate(&self, _ctx: PluginContext, _options: Value) -> FsResult<PluginSpec> {
        let payload = self.payload.to_vec();
        let mut handlers = PluginHandlers::default();
        handlers.read_file = Some(Arc::new(
            move |_path: String| -> BoxFuture<'static, FsResult<Vec<u8>>> {
                let payload = payload.clone();
                Box::pin(async move { Ok(payload) })
            },
        ));
        Ok(PluginSpec {
            match_pattern: self.pattern.to_string(),
            handlers,
        })
    }
}

/// Takes its payload from the activation options, so re-activation visibly
/// swaps the instance.
struct OptionedReadFactory {
    pattern: &'static str,
}

impl PluginFactory for OptionedReadFactory {
    fn instantiate(&self, _ctx: PluginContext, options: Value) -> FsResult<PluginSpec> {
        let payload = options
            .get("payload")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .as_bytes()
            .to_vec();
        let mut handlers = PluginHandlers::default();
        handlers.read_file = Some(Arc::new(
            move |_path: String| -> BoxFuture<'static, FsResult<Vec<u8>>> {
                let payload = payload.clone();
                Box::pin(async move { Ok(payload) })
            },
        ));
        Ok(PluginSpec {
            match_pattern: self.pattern.to_string(),
            handlers,
        })
    }
}

/// Device-style plugin: open mints a descriptor bound to the plugin, reads
/// on it serve canned bytes, close releases it.
struct DeviceFactory;

impl PluginFactory for DeviceFactory {
    fn instantiate(&self, ctx: PluginContext, _options: Value) -> FsResult<PluginSpec> {
        let mut handlers = PluginHandlers::default();

        let open_ctx = ctx.clone();
        handlers.open = Some(Arc::new(
            move |path: String, options: OpenOptions| -> BoxFuture<'static, FsResult<DescriptorId>> {
                let ctx = open_ctx.clone();
                Box::pin(async move { ctx.mint_descriptor(&path, options) })
            },
        ));
        handlers.fd_read = Some(Arc::new(
            move |_fd: DescriptorId,
                  length: u64,
                  _position: Option<u64>|
                  -> BoxFuture<'static, FsResult<Vec<u8>>> {
                Box::pin(async move {
                    let payload = b"device-bytes";
                    Ok(payload[..payload.len().min(length as usize)].to_vec())
                })
            },
        ));
        let close_ctx = ctx.clone();
        handlers.fd_close = Some(Arc::new(
            move |fd: DescriptorId| -> BoxFuture<'static, FsResult<()>> {
                let ctx = close_ctx.clone();
                Box::pin(async move { ctx.release_descriptor(fd) })
            },
        ));
        Ok(PluginSpec {
            match_pattern: "^/dev(/|$)".to_string(),
            handlers,
        })
    }
}

/// Mints bound descriptors but defines no descriptor handlers, leaving its
/// ids dead on arrival.
struct MintOnlyFactory;

impl PluginFactory for MintOnlyFactory {
    fn instantiate(&self, ctx: PluginContext, _options: Value) -> FsResult<PluginSpec> {
        let mut handlers = PluginHandlers::default();
        let open_ctx = ctx.clone();
        handlers.open = Some(Arc::new(
            move |path: String, options: OpenOptions| -> BoxFuture<'static, FsResult<DescriptorId>> {
                let ctx = open_ctx.clone();
                Box::pin(async move { ctx.mint_descriptor(&path, options) })
            },
        ));
        Ok(PluginSpec {
            match_pattern: "^/dev(/|$)".to_string(),
            handlers,
        })
    }
}

#[tokio::test]
async fn registration_alone_is_inert() {
    let fs = new_fs().await;
    fs.register_plugin(
        "shadow",
        Arc::new(ConstReadFactory {
            pattern: "^/p(/|$)",
            payload: b"shadowed",
        }),
    );

    fs.mkdir("/p", false).await.unwrap();
    fs.write_file("/p/f", b"real").await.unwrap();
    assert_eq!(fs.read_file("/p/f").await.unwrap(), b"real");
}

#[tokio::test]
async fn an_active_plugin_intercepts_matching_paths_only() {
    let fs = new_fs().await;
    fs.register_plugin(
        "shadow",
        Arc::new(ConstReadFactory {
            pattern: "^/p(/|$)",
            payload: b"shadowed",
        }),
    );
    fs.activate_plugin("shadow", json!({})).unwrap();

    // Matching path: delegated, no entry needs to exist.
    assert_eq!(fs.read_file("/p/anything").await.unwrap(), b"shadowed");

    // Unmatched path: built-in all the way.
    fs.write_file("/elsewhere", b"real").await.unwrap();
    assert_eq!(fs.read_file("/elsewhere").await.unwrap(), b"real");
}

#[tokio::test]
async fn a_matched_plugin_without_the_handler_falls_through() {
    let fs = new_fs().await;
    fs.register_plugin(
        "shadow",
        Arc::new(ConstReadFactory {
            pattern: "^/p(/|$)",
            payload: b"shadowed",
        }),
    );
    fs.activate_plugin("shadow", json!({})).unwrap();

    // mkdir and write match the pattern but have no handlers: built-in runs.
    fs.mkdir("/p", false).await.unwrap();
    fs.write_file("/p/f", b"real").await.unwrap();
    assert_eq!(fs.stat("/p/f").await.unwrap().size, 4);

    // read does have a handler: fully delegated, stored bytes notwithstanding.
    assert_eq!(fs.read_file("/p/f").await.unwrap(), b"shadowed");
}

#[tokio::test]
async fn activating_an_unregistered_name_is_an_error() {
    let fs = new_fs().await;
    let err = fs.activate_plugin("ghost", json!({})).unwrap_err();
    assert_eq!(err.code(), "invalid-argument");
}

#[tokio::test]
async fn an_invalid_match_pattern_is_rejected_at_activation() {
    let fs = new_fs().await;
    fs.register_plugin(
        "broken",
        Arc::new(ConstReadFactory {
            pattern: "^/p[",
            payload: b"",
        }),
    );
    let err = fs.activate_plugin("broken", json!({})).unwrap_err();
    assert_eq!(err.code(), "invalid-argument");
}

#[tokio::test]
async fn reactivation_replaces_the_active_instance() {
    let fs = new_fs().await;
    fs.register_plugin("versioned", Arc::new(OptionedReadFactory { pattern: "^/p(/|$)" }));

    fs.activate_plugin("versioned", json!({ "payload": "v1" })).unwrap();
    assert_eq!(fs.read_file("/p/f").await.unwrap(), b"v1");

    fs.activate_plugin("versioned", json!({ "payload": "v2" })).unwrap();
    assert_eq!(fs.read_file("/p/f").await.unwrap(), b"v2");
}

#[tokio::test]
async fn reregistering_a_factory_leaves_the_active_instance_running() {
    let fs = new_fs().await;
    fs.register_plugin(
        "swap",
        Arc::new(ConstReadFactory {
            pattern: "^/p(/|$)",
            payload: b"first",
        }),
    );
    fs.activate_plugin("swap", json!({})).unwrap();
    assert_eq!(fs.read_file("/p/f").await.unwrap(), b"first");

    fs.register_plugin(
        "swap",
        Arc::new(ConstReadFactory {
            pattern: "^/p(/|$)",
            payload: b"second",
        }),
    );
    // Still the old instance until the next activation.
    assert_eq!(fs.read_file("/p/f").await.unwrap(), b"first");

    fs.activate_plugin("swap", json!({})).unwrap();
    assert_eq!(fs.read_file("/p/f").await.unwrap(), b"second");
}

#[tokio::test]
async fn dual_path_operations_reject_ambiguous_routing_before_mutating() {
    let fs = new_fs().await;
    fs.register_plugin(
        "one",
        Arc::new(ConstReadFactory {
            pattern: "^/one(/|$)",
            payload: b"one",
        }),
    );
    fs.register_plugin(
        "two",
        Arc::new(ConstReadFactory {
            pattern: "^/two(/|$)",
            payload: b"two",
        }),
    );
    fs.activate_plugin("one", json!({})).unwrap();
    fs.activate_plugin("two", json!({})).unwrap();

    // Set up real entries through the built-in engine, bypassing the router.
    let core = Arc::clone(fs.core());
    core.mkdir("/one", false).await.unwrap();
    core.mkdir("/two", false).await.unwrap();
    core.write_file("/one/a", b"payload").await.unwrap();

    let err = fs.rename("/one/a", "/two/b").await.unwrap_err();
    assert_eq!(err.code(), "routing-ambiguity");
    let message = err.to_string();
    assert!(message.contains("one") && message.contains("two"), "{message}");

    // No mutation happened on either side.
    assert_eq!(core.read_file("/one/a").await.unwrap(), b"payload");
    assert!(!core.exists("/two/b").await.unwrap());

    let err = fs.copy_file("/one/a", "/two/b").await.unwrap_err();
    assert_eq!(err.code(), "routing-ambiguity");
    assert!(!core.exists("/two/b").await.unwrap());
}

#[tokio::test]
async fn dual_path_operations_with_one_matched_path_route_to_that_plugin() {
    let fs = new_fs().await;
    fs.register_plugin(
        "one",
        Arc::new(ConstReadFactory {
            pattern: "^/one(/|$)",
            payload: b"one",
        }),
    );
    fs.activate_plugin("one", json!({})).unwrap();

    let core = Arc::clone(fs.core());
    core.mkdir("/one", false).await.unwrap();
    core.mkdir("/plain", false).await.unwrap();
    core.write_file("/one/a", b"payload").await.unwrap();

    // "one" matches only the source and defines no rename handler, so the
    // built-in runs with no ambiguity.
    fs.rename("/one/a", "/plain/b").await.unwrap();
    assert_eq!(core.read_file("/plain/b").await.unwrap(), b"payload");
}

#[tokio::test]
async fn plugin_minted_descriptors_route_back_to_the_plugin() {
    let fs = new_fs().await;
    fs.register_plugin("dev", Arc::new(DeviceFactory));
    fs.activate_plugin("dev", json!({})).unwrap();

    let fd = fs.open("/dev/input", OpenOptions::read_only()).await.unwrap();

    // No entry was created for the device path.
    assert!(!fs.core().exists("/dev/input").await.unwrap());

    let mut buf = [0u8; 16];
    let count = fs.fd_read(fd, &mut buf, 0, 16, None).await.unwrap();
    assert_eq!(&buf[..count], b"device-bytes");

    fs.fd_close(fd).await.unwrap();
    let err = fs.fd_read(fd, &mut buf, 0, 16, None).await.unwrap_err();
    assert_eq!(err.code(), "bad-descriptor");
}

#[tokio::test]
async fn bound_descriptors_without_a_handler_are_dead_handles() {
    let fs = new_fs().await;
    fs.register_plugin("dev", Arc::new(DeviceFactory));
    fs.activate_plugin("dev", json!({})).unwrap();

    let fd = fs.open("/dev/input", OpenOptions::read_only()).await.unwrap();

    // Replace the active instance with one that mints but cannot serve.
    fs.register_plugin("dev", Arc::new(MintOnlyFactory));
    fs.activate_plugin("dev", json!({})).unwrap();

    let mut buf = [0u8; 4];
    let err = fs.fd_read(fd, &mut buf, 0, 4, None).await.unwrap_err();
    assert_eq!(err.code(), "bad-descriptor");
    let err = fs.fd_close(fd).await.unwrap_err();
    assert_eq!(err.code(), "bad-descriptor");
}
