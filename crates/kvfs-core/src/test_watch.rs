// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tests for the watch bus: event listeners, paired-snapshot listeners, and
//! best-effort delivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::FsConfig;
use crate::fs::KvFs;
use crate::store::InMemoryStore;
use crate::watch::WatchEvent;

async fn new_fs() -> KvFs {
    KvFs::new(FsConfig::default(), Arc::new(InMemoryStore::new()))
        .await
        .expect("engine creation")
}

#[tokio::test]
async fn a_content_write_delivers_exactly_one_change_with_the_base_name() {
    let fs = new_fs().await;
    fs.mkdir("/a", false).await.unwrap();
    fs.write_file("/a/c.txt", b"hi").await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handle = fs.watch("/a/c.txt", move |event, name| {
        sink.lock().unwrap().push((event, name.to_string()));
    });

    fs.write_file("/a/c.txt", b"bye").await.unwrap();

    let seen = events.lock().unwrap().clone();
    assert_eq!(seen, vec![(WatchEvent::Change, "c.txt".to_string())]);
    handle.close();
}

#[tokio::test]
async fn creates_and_deletes_deliver_rename_events() {
    let fs = new_fs().await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _handle = fs.watch("/f", move |event, name| {
        sink.lock().unwrap().push((event, name.to_string()));
    });

    fs.write_file("/f", b"x").await.unwrap();
    fs.unlink("/f").await.unwrap();

    let seen = events.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (WatchEvent::Rename, "f".to_string()),
            (WatchEvent::Rename, "f".to_string()),
        ]
    );
}

#[tokio::test]
async fn listeners_are_exact_path_only() {
    let fs = new_fs().await;
    fs.mkdir("/a", false).await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let _handle = fs.watch("/a", move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    fs.write_file("/a/child", b"x").await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recursive_removal_notifies_each_removed_path() {
    let fs = new_fs().await;
    fs.mkdir("/dir", false).await.unwrap();
    fs.write_file("/dir/f", b"x").await.unwrap();

    let file_events = Arc::new(AtomicUsize::new(0));
    let dir_events = Arc::new(AtomicUsize::new(0));
    let file_sink = Arc::clone(&file_events);
    let dir_sink = Arc::clone(&dir_events);
    let _f = fs.watch("/dir/f", move |_, _| {
        file_sink.fetch_add(1, Ordering::SeqCst);
    });
    let _d = fs.watch("/dir", move |_, _| {
        dir_sink.fetch_add(1, Ordering::SeqCst);
    });

    fs.remove("/dir", true, false).await.unwrap();

    assert_eq!(file_events.load(Ordering::SeqCst), 1);
    assert_eq!(dir_events.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hard_link_propagation_notifies_the_sibling_path() {
    let fs = new_fs().await;
    fs.mkdir("/a", false).await.unwrap();
    fs.write_file("/a/b.txt", b"hi").await.unwrap();
    fs.link("/a/b.txt", "/a/c.txt").await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _handle = fs.watch("/a/b.txt", move |event, name| {
        sink.lock().unwrap().push((event, name.to_string()));
    });

    fs.write_file("/a/c.txt", b"bye").await.unwrap();

    let seen = events.lock().unwrap().clone();
    assert_eq!(seen, vec![(WatchEvent::Change, "b.txt".to_string())]);
}

#[tokio::test]
async fn rename_notifies_both_paths() {
    let fs = new_fs().await;
    fs.write_file("/old", b"x").await.unwrap();

    let old_events = Arc::new(AtomicUsize::new(0));
    let new_events = Arc::new(AtomicUsize::new(0));
    let old_sink = Arc::clone(&old_events);
    let new_sink = Arc::clone(&new_events);
    let _o = fs.watch("/old", move |_, _| {
        old_sink.fetch_add(1, Ordering::SeqCst);
    });
    let _n = fs.watch("/new", move |_, _| {
        new_sink.fetch_add(1, Ordering::SeqCst);
    });

    fs.rename("/old", "/new").await.unwrap();

    assert_eq!(old_events.load(Ordering::SeqCst), 1);
    assert_eq!(new_events.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn paired_snapshots_fire_only_on_in_place_modification() {
    let fs = new_fs().await;
    let pairs = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&pairs);
    let _handle = fs.watch_file("/f", move |current, previous| {
        sink.lock().unwrap().push((previous.size, current.size));
    });

    // Creation: no prior snapshot, no delivery.
    fs.write_file("/f", b"abc").await.unwrap();
    assert!(pairs.lock().unwrap().is_empty());

    // In-place modification: both snapshots exist.
    fs.write_file("/f", b"abcdef").await.unwrap();
    assert_eq!(*pairs.lock().unwrap(), vec![(3, 6)]);

    // Deletion: no new snapshot, no delivery.
    fs.unlink("/f").await.unwrap();
    assert_eq!(pairs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unwatch_file_clears_snapshot_listeners() {
    let fs = new_fs().await;
    fs.write_file("/f", b"x").await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let _handle = fs.watch_file("/f", move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    fs.write_file("/f", b"y").await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    fs.unwatch_file("/f");
    fs.write_file("/f", b"z").await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closing_a_handle_stops_delivery() {
    let fs = new_fs().await;
    fs.write_file("/f", b"x").await.unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let handle = fs.watch("/f", move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    fs.write_file("/f", b"y").await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);

    handle.close();
    fs.write_file("/f", b"z").await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn listeners_may_unregister_themselves_during_dispatch() {
    let fs = new_fs().await;
    fs.write_file("/f", b"x").await.unwrap();

    // The self-closing listener needs its own handle; park it in a slot the
    // closure can reach.
    let slot: Arc<Mutex<Option<crate::watch::WatchHandle>>> = Arc::new(Mutex::new(None));
    let slot_for_listener = Arc::clone(&slot);
    let first_calls = Arc::new(AtomicUsize::new(0));
    let first_sink = Arc::clone(&first_calls);
    let handle = fs.watch("/f", move |_, _| {
        first_sink.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = slot_for_listener.lock().unwrap().take() {
            handle.close();
        }
    });
    *slot.lock().unwrap() = Some(handle);

    let second_calls = Arc::new(AtomicUsize::new(0));
    let second_sink = Arc::clone(&second_calls);
    let _second = fs.watch("/f", move |_, _| {
        second_sink.fetch_add(1, Ordering::SeqCst);
    });

    // Both listeners see the first event; only the survivor sees the next.
    fs.write_file("/f", b"y").await.unwrap();
    fs.write_file("/f", b"z").await.unwrap();

    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn a_panicking_listener_does_not_block_the_rest() {
    let fs = new_fs().await;
    fs.write_file("/f", b"x").await.unwrap();

    let _panicker = fs.watch("/f", |_, _| {
        panic!("listener failure");
    });

    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let _survivor = fs.watch("/f", move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    // The triggering operation must not observe the listener failure.
    fs.write_file("/f", b"y").await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
