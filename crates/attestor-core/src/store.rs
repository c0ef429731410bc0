//! Versioned configuration snapshot.
//!
//! Readers take an `Arc<ConfigSnapshot>` and keep using it for the whole
//! request; reloads build a new snapshot and swap the pointer, so a reader
//! sees either the old or the new table, never a mix. A failed reload leaves
//! the current snapshot in place.

use crate::keybox::Keybox;
use crate::patch_level::PatchLevelOverride;
use crate::policy::PackagePolicy;
use crate::reload::ResourceKind;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// One consistent view of every reloadable resource.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// Bumped on every applied reload.
    pub version: u64,
    pub policy: Arc<PackagePolicy>,
    pub keybox: Option<Arc<Keybox>>,
    pub patch_level: Option<Arc<PatchLevelOverride>>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            policy: Arc::new(PackagePolicy::default()),
            keybox: None,
            patch_level: None,
        }
    }
}

pub struct ConfigStore {
    config_dir: PathBuf,
    current: RwLock<Arc<ConfigSnapshot>>,
    // Serializes read-modify-swap so two reloads cannot drop each other's change.
    writer: Mutex<()>,
}

impl ConfigStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            current: RwLock::new(Arc::new(ConfigSnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Apply new contents for `kind`; `None` means the backing file is gone.
    ///
    /// Returns `false` when the contents were rejected and the previous value kept.
    pub fn reload(&self, kind: ResourceKind, contents: Option<&str>) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.snapshot()).clone();

        match kind {
            ResourceKind::Policy => {
                if contents.is_none() {
                    tracing::warn!(
                        target: "attestor::policy",
                        path = %self.config_dir.join(kind.file_name()).display(),
                        "package rules file missing, only bootstrap packages apply"
                    );
                }
                let policy = PackagePolicy::parse(contents);
                let (auto, hack, generate) = policy.counts();
                tracing::info!(
                    target: "attestor::policy",
                    packages = policy.len(),
                    auto,
                    leaf_hack = hack,
                    generate,
                    "package policy reloaded"
                );
                next.policy = Arc::new(policy);
            }
            ResourceKind::Keybox => match contents.map(Keybox::parse_xml).transpose() {
                Ok(Some(keybox)) => {
                    tracing::info!(
                        target: "attestor::keybox",
                        algorithms = ?keybox.algorithms(),
                        "keybox reloaded"
                    );
                    next.keybox = Some(Arc::new(keybox));
                }
                Ok(None) => {
                    tracing::warn!(
                        target: "attestor::keybox",
                        path = %self.config_dir.join(kind.file_name()).display(),
                        "keybox file missing, generation unavailable"
                    );
                    next.keybox = None;
                }
                Err(e) => {
                    tracing::warn!(target: "attestor::keybox", error = %e, "rejecting keybox, keeping previous");
                    return false;
                }
            },
            ResourceKind::PatchLevel => {
                let patch = PatchLevelOverride::parse(contents);
                match &patch {
                    Some(p) => tracing::info!(
                        target: "attestor::patch_level",
                        system = ?p.system,
                        vendor = ?p.vendor,
                        boot = ?p.boot,
                        "patch level override reloaded"
                    ),
                    None => tracing::info!(target: "attestor::patch_level", "no patch level override"),
                }
                next.patch_level = patch.map(Arc::new);
            }
        }

        next.version += 1;
        let version = next.version;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        tracing::debug!(target: "attestor::store", %kind, version, "snapshot swapped");
        true
    }

    /// Re-read `kind`'s file from the configuration directory.
    pub fn reload_from_disk(&self, kind: ResourceKind) -> bool {
        let path = self.config_dir.join(kind.file_name());
        match std::fs::read_to_string(&path) {
            Ok(contents) => self.reload(kind, Some(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.reload(kind, None),
            Err(e) => {
                tracing::warn!(
                    target: "attestor::store",
                    path = %path.display(),
                    error = %e,
                    "failed to read configuration file, keeping previous"
                );
                false
            }
        }
    }

    /// Initial load of every reloadable resource.
    pub fn load_all(&self) {
        for kind in ResourceKind::ALL {
            self.reload_from_disk(kind);
        }
        tracing::info!(
            target: "attestor::store",
            dir = %self.config_dir.display(),
            version = self.version(),
            "configuration loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keybox::test_support::{bundle, ec_key_xml};
    use crate::policy::Mode;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Collects `(level, target)` of every event.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<(tracing::Level, String)>>>);

    impl<S: tracing::Subscriber> Layer<S> for Captured {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let meta = event.metadata();
            self.0.lock().unwrap().push((*meta.level(), meta.target().to_string()));
        }
    }

    fn loaded_keybox(store: &ConfigStore) -> Arc<Keybox> {
        let (key, _) = ec_key_xml();
        assert!(store.reload(ResourceKind::Keybox, Some(&bundle(&[key]))));
        store.snapshot().keybox.clone().unwrap()
    }

    #[test]
    fn other_reloads_keep_keybox_instance() {
        let store = ConfigStore::new("/nonexistent");
        let keybox = loaded_keybox(&store);

        assert!(store.reload(ResourceKind::Policy, Some("com.a!")));
        assert!(Arc::ptr_eq(store.snapshot().keybox.as_ref().unwrap(), &keybox));
        assert!(store.reload(ResourceKind::PatchLevel, Some("2024-05-01")));
        assert!(Arc::ptr_eq(store.snapshot().keybox.as_ref().unwrap(), &keybox));
        assert!(store.reload(ResourceKind::Policy, None));
        assert!(store.reload(ResourceKind::PatchLevel, None));
        assert!(Arc::ptr_eq(store.snapshot().keybox.as_ref().unwrap(), &keybox));

        let policy = store.snapshot().policy.clone();
        assert!(store.reload(ResourceKind::PatchLevel, Some("all=2024-06-01")));
        assert!(Arc::ptr_eq(&store.snapshot().policy, &policy));
    }

    #[test]
    fn missing_rules_and_keybox_are_warned() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let captured = Captured::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());
        tracing::subscriber::with_default(subscriber, || store.load_all());

        let events = captured.0.lock().unwrap();
        for target in ["attestor::policy", "attestor::keybox"] {
            assert!(
                events.iter().any(|(level, t)| *level == tracing::Level::WARN && t == target),
                "no warning on {target}: {events:?}"
            );
        }
        assert!(!events
            .iter()
            .any(|(level, t)| *level == tracing::Level::WARN && t == "attestor::patch_level"));
    }

    #[test]
    fn starts_with_bootstrap_policy() {
        let store = ConfigStore::new("/nonexistent");
        let snap = store.snapshot();
        assert_eq!(snap.version, 0);
        assert_eq!(snap.policy.len(), 3);
        assert!(snap.keybox.is_none());
    }

    #[test]
    fn rejected_keybox_keeps_version_and_value() {
        let store = ConfigStore::new("/nonexistent");
        assert!(store.reload(ResourceKind::Policy, Some("com.a?")));
        let before = store.snapshot();
        assert!(!store.reload(ResourceKind::Keybox, Some("<AndroidAttestation/>")));
        let after = store.snapshot();
        assert_eq!(after.version, before.version);
        assert_eq!(after.policy.mode("com.a"), Some(Mode::LeafHack));
    }

    #[test]
    fn old_snapshot_survives_reload() {
        let store = ConfigStore::new("/nonexistent");
        store.reload(ResourceKind::Policy, Some("com.a!"));
        let held = store.snapshot();
        store.reload(ResourceKind::Policy, Some("com.a?"));
        assert_eq!(held.policy.mode("com.a"), Some(Mode::Generate));
        assert_eq!(store.snapshot().policy.mode("com.a"), Some(Mode::LeafHack));
        assert_eq!(store.version(), held.version + 1);
    }

    #[test]
    fn missing_files_load_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.load_all();
        let snap = store.snapshot();
        assert_eq!(snap.version, 3);
        assert_eq!(snap.policy.len(), 3);
        assert!(snap.keybox.is_none());
        assert!(snap.patch_level.is_none());
    }

    #[test]
    fn reads_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("target.txt"), "com.example.bank?\n").unwrap();
        std::fs::write(dir.path().join("security_patch.txt"), "2024-05-01").unwrap();
        let store = ConfigStore::new(dir.path());
        store.load_all();
        let snap = store.snapshot();
        assert_eq!(snap.policy.mode("com.example.bank"), Some(Mode::LeafHack));
        assert_eq!(
            snap.patch_level.as_ref().and_then(|p| p.boot.clone()).as_deref(),
            Some("2024-05-01")
        );
    }
}
