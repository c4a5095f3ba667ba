//! File watcher for the crawler's output directory. Reloads documents when files change.

use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use notify_debouncer_mini::notify;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};

use crate::documents::{load_documents, DocumentError, RawDocument};

const DEBOUNCE: Duration = Duration::from_millis(400);

/// Watches `inbox` and calls `on_change` with its documents whenever files change (debounced).
/// Blocks until the process is stopped. Returns Err on setup failure.
pub fn watch_inbox(
    inbox: &Path,
    on_change: impl Fn(Result<Vec<RawDocument>, DocumentError>) + Send + 'static,
) -> Result<(), WatchError> {
    let (_stop_tx, stop_rx) = mpsc::channel::<()>();
    watch_inbox_until(inbox, on_change, stop_rx)
}

/// Like [`watch_inbox`], but returns once `stop` receives a message or its sender is dropped.
pub fn watch_inbox_until(
    inbox: &Path,
    on_change: impl Fn(Result<Vec<RawDocument>, DocumentError>) + Send + 'static,
    stop: mpsc::Receiver<()>,
) -> Result<(), WatchError> {
    if !inbox.is_dir() {
        return Err(WatchError::NotADirectory(inbox.to_path_buf()));
    }
    let inbox = inbox.canonicalize().map_err(WatchError::Canonicalize)?;
    let inbox_for_callback = inbox.clone();

    let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
        Ok(events) => {
            tracing::debug!(events = events.len(), "inbox changed");
            on_change(load_documents(&inbox_for_callback));
        }
        Err(e) => tracing::warn!(error = %e, "watcher error"),
    })
    .map_err(|e| WatchError::Notify(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&inbox, notify::RecursiveMode::Recursive)
        .map_err(|e| WatchError::Watch(e.to_string()))?;
    tracing::info!(inbox = %inbox.display(), "watching for new documents");

    stop.recv().ok();
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("not a directory: {0}")]
    NotADirectory(std::path::PathBuf),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("watcher init: {0}")]
    Notify(String),
    #[error("watch failed: {0}")]
    Watch(String),
}
