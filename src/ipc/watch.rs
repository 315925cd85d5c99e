use anyhow::Result;
use log::{debug, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{path::Path, sync::mpsc::Sender};

use super::server::Inbox;

/// Reports every profile file that is written; the daemon decides whether it
/// is the active one. The returned watcher must be kept alive for as long as
/// reloads are wanted.
pub fn watch_profiles(dir: &Path, tx: Sender<Inbox>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) if matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                for path in ev.paths {
                    if path.extension().is_some_and(|e| e == "toml") {
                        debug!("profile change: {}", path.display());
                        let _ = tx.send(Inbox::ProfileChanged(path));
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!("profile watcher error: {e}"),
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}
