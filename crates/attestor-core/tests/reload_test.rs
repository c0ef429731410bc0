//! Integration test: configuration reload.
//!
//! Verifies that:
//! 1. Readers never observe a half-applied package table while reloads race.
//! 2. A broken keybox is rejected and the previous one stays in service.
//! 3. Removing `keybox.xml` clears the keybox; removing the rules file
//!    leaves only the bootstrap packages.
//! 4. Events for unrelated files are not reloadable.

mod common;

use attestor_core::{
    ConfigEvent, ConfigStore, KeyAlgorithm, Mode, ReloadController, ResourceKind,
    BOOTSTRAP_GENERATE_PACKAGES,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

#[test]
fn readers_never_see_torn_policy() {
    let store = Arc::new(ConfigStore::new("/nonexistent"));
    store.reload(ResourceKind::Policy, Some("com.a?\ncom.b?\ncom.c?"));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let snap = store.snapshot();
                    let a = snap.policy.mode("com.a");
                    assert_eq!(a, snap.policy.mode("com.b"));
                    assert_eq!(a, snap.policy.mode("com.c"));
                }
            })
        })
        .collect();

    let (tx, rx) = mpsc::channel();
    let controller = ReloadController::spawn(Arc::clone(&store), rx).unwrap();
    for i in 0..200 {
        let rules = if i % 2 == 0 { "com.a!\ncom.b!\ncom.c!" } else { "com.a\ncom.b\ncom.c" };
        tx.send(ConfigEvent::updated(ResourceKind::Policy, rules)).unwrap();
    }
    drop(tx);
    controller.join().unwrap();
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.version(), 201);
    assert_eq!(store.snapshot().policy.mode("com.a"), Some(Mode::Auto));
}

#[test]
fn bad_keybox_keeps_last_good() {
    let dir = tempfile::tempdir().unwrap();
    let (xml, root) = common::ec_keybox_xml("Reload Root");
    std::fs::write(dir.path().join("keybox.xml"), &xml).unwrap();
    let store = ConfigStore::new(dir.path());
    store.load_all();
    let good = store.snapshot();
    assert_eq!(
        good.keybox.as_ref().unwrap().entry(KeyAlgorithm::Ec).unwrap().chain(),
        &[root.clone()]
    );

    std::fs::write(dir.path().join("keybox.xml"), "<AndroidAttestation><Keybox>").unwrap();
    assert!(!store.reload_from_disk(ResourceKind::Keybox));
    let after = store.snapshot();
    assert_eq!(after.version, good.version);
    assert_eq!(
        after.keybox.as_ref().unwrap().entry(KeyAlgorithm::Ec).unwrap().chain(),
        &[root]
    );
}

#[test]
fn removals_clear_resources() {
    let dir = tempfile::tempdir().unwrap();
    let (xml, _) = common::ec_keybox_xml("Removed Root");
    std::fs::write(dir.path().join("keybox.xml"), &xml).unwrap();
    std::fs::write(dir.path().join("target.txt"), "com.example.bank?\n").unwrap();
    let store = Arc::new(ConfigStore::new(dir.path()));
    store.load_all();
    assert!(store.snapshot().keybox.is_some());

    let (tx, rx) = mpsc::channel();
    let controller = ReloadController::spawn(Arc::clone(&store), rx).unwrap();
    tx.send(ConfigEvent::removed(ResourceKind::Keybox)).unwrap();
    tx.send(ConfigEvent::removed(ResourceKind::Policy)).unwrap();
    drop(tx);
    controller.join().unwrap();

    let snap = store.snapshot();
    assert!(snap.keybox.is_none());
    assert_eq!(snap.policy.mode("com.example.bank"), None);
    for pkg in BOOTSTRAP_GENERATE_PACKAGES {
        assert_eq!(snap.policy.mode(pkg), Some(Mode::Generate));
    }
}

#[test]
fn health_record_is_not_reloadable() {
    assert_eq!(ResourceKind::from_file_name("tee_status"), None);
    assert_eq!(ResourceKind::from_file_name("service.toml"), None);
    assert_eq!(ResourceKind::Keybox.file_name(), "keybox.xml");
}
