//! Where rbiq keeps its own state (config, snapshot, processed-ids ledger).
//!
//! Scraped documents can live anywhere; only derived state is stored here.

use std::path::PathBuf;

/// Subdirectory of the app data dir holding the default snapshot.
pub const INDEX_SUBDIR: &str = "faiss_index";

/// Returns the directory where rbiq stores config, snapshot, and ledger.
/// On Linux: `~/.local/share/rbiq/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("in", "rbiq", "rbiq")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default snapshot directory under the app data dir.
pub fn default_index_dir() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join(INDEX_SUBDIR))
}
