//! Turns file-system events in the configuration directory into reload messages.

use attestor_core::{ConfigEvent, ResourceKind};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// The file holds new contents (closed after write, or moved in).
    Reload,
    /// The file is gone (deleted, or moved out).
    Remove,
}

/// Reloadable files touched by `event` and what happened to each.
pub fn classify(event: &Event) -> Vec<(ResourceKind, FileAction, PathBuf)> {
    let actions: Vec<(FileAction, &PathBuf)> = match event.kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(|p| (FileAction::Reload, p)).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().map(|p| (FileAction::Remove, p)).collect()
        }
        // Rename inside the directory: [from, to].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![(FileAction::Remove, from), (FileAction::Reload, to)],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    actions
        .into_iter()
        .filter_map(|(action, path)| {
            let name = path.file_name()?.to_str()?;
            let kind = ResourceKind::from_file_name(name)?;
            Some((kind, action, path.clone()))
        })
        .collect()
}

/// Build the reload message, reading the file for [`FileAction::Reload`].
/// A file that cannot be read yields no message so the last good state stays.
pub fn to_config_event(kind: ResourceKind, action: FileAction, path: &Path) -> Option<ConfigEvent> {
    match action {
        FileAction::Remove => Some(ConfigEvent::removed(kind)),
        FileAction::Reload => match std::fs::read_to_string(path) {
            Ok(contents) => Some(ConfigEvent::updated(kind, contents)),
            Err(e) => {
                tracing::warn!(
                    target: "attestor::watcher",
                    path = %path.display(),
                    error = %e,
                    "failed to read changed file"
                );
                None
            }
        },
    }
}

/// Watch `dir` (non-recursive). The returned watcher must be kept alive.
pub fn watch_config_dir(dir: &Path, events: Sender<ConfigEvent>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for (kind, action, path) in classify(&event) {
                    tracing::debug!(target: "attestor::watcher", %kind, ?action, "config file changed");
                    if let Some(msg) = to_config_event(kind, action, &path) {
                        if events.send(msg).is_err() {
                            tracing::warn!(target: "attestor::watcher", "reload controller gone, dropping event");
                        }
                    }
                }
            }
            Err(e) => tracing::error!(target: "attestor::watcher", error = %e, "watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::info!(target: "attestor::watcher", dir = %dir.display(), "watching configuration directory");
    Ok(watcher)
}
