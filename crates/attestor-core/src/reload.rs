//! Reload Controller.
//!
//! File-change notifications arrive as [`ConfigEvent`] messages; a single
//! controller thread applies them to the [`ConfigStore`] in order. The
//! controller never reads files itself: whoever observes the change ships
//! the new contents (or the removal) with the event.

use crate::config::{KEYBOX_FILE, PATCH_LEVEL_FILE, TARGET_FILE};
use crate::store::ConfigStore;
use std::fmt;
use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A reloadable resource backed by one file in the configuration directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Policy,
    Keybox,
    PatchLevel,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Policy,
        ResourceKind::Keybox,
        ResourceKind::PatchLevel,
    ];

    /// Maps a file name to its resource. Anything else, including the
    /// health record, is not reloadable.
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            TARGET_FILE => Some(ResourceKind::Policy),
            KEYBOX_FILE => Some(ResourceKind::Keybox),
            PATCH_LEVEL_FILE => Some(ResourceKind::PatchLevel),
            _ => None,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ResourceKind::Policy => TARGET_FILE,
            ResourceKind::Keybox => KEYBOX_FILE,
            ResourceKind::PatchLevel => PATCH_LEVEL_FILE,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    Updated(String),
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub kind: ResourceKind,
    pub change: ConfigChange,
}

impl ConfigEvent {
    pub fn updated(kind: ResourceKind, contents: impl Into<String>) -> Self {
        Self {
            kind,
            change: ConfigChange::Updated(contents.into()),
        }
    }

    pub fn removed(kind: ResourceKind) -> Self {
        Self {
            kind,
            change: ConfigChange::Removed,
        }
    }
}

pub struct ReloadController;

impl ReloadController {
    /// Spawn the controller thread. It exits once every sender is dropped.
    pub fn spawn(store: Arc<ConfigStore>, events: Receiver<ConfigEvent>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("attestor-reload".into())
            .spawn(move || {
                for event in events {
                    let contents = match &event.change {
                        ConfigChange::Updated(text) => Some(text.as_str()),
                        ConfigChange::Removed => None,
                    };
                    let applied = store.reload(event.kind, contents);
                    tracing::debug!(target: "attestor::reload", kind = %event.kind, applied, "event processed");
                }
                tracing::info!(target: "attestor::reload", "event channel closed, reload controller stopping");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Mode;
    use std::sync::mpsc;

    #[test]
    fn file_names_map_to_resources() {
        assert_eq!(ResourceKind::from_file_name("target.txt"), Some(ResourceKind::Policy));
        assert_eq!(ResourceKind::from_file_name("keybox.xml"), Some(ResourceKind::Keybox));
        assert_eq!(
            ResourceKind::from_file_name("security_patch.txt"),
            Some(ResourceKind::PatchLevel)
        );
        assert_eq!(ResourceKind::from_file_name("tee_status"), None);
        assert_eq!(ResourceKind::from_file_name("target.txt.bak"), None);
    }

    #[test]
    fn controller_applies_events_in_order() {
        let store = Arc::new(ConfigStore::new("/nonexistent"));
        let (tx, rx) = mpsc::channel();
        let handle = ReloadController::spawn(store.clone(), rx).unwrap();

        tx.send(ConfigEvent::updated(ResourceKind::Policy, "com.a!")).unwrap();
        tx.send(ConfigEvent::updated(ResourceKind::Policy, "com.a?")).unwrap();
        tx.send(ConfigEvent::updated(ResourceKind::PatchLevel, "2024-01-01")).unwrap();
        tx.send(ConfigEvent::removed(ResourceKind::PatchLevel)).unwrap();
        drop(tx);
        handle.join().unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.version, 4);
        assert_eq!(snap.policy.mode("com.a"), Some(Mode::LeafHack));
        assert!(snap.patch_level.is_none());
    }
}
