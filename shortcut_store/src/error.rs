/// Errors that can escape the repository's public API.
///
/// Per spec §4.4's failure model, errors from within `report_stats` and
/// `refresh_shortcut` are caught and logged internally rather than
/// propagated; this type exists for the operations that legitimately need
/// to report failure to their caller (opening the store, the shortcut
/// query path).
#[derive(Debug, thiserror::Error)]
pub enum ShortcutStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("background task failed: {0}")]
    TaskFailed(String),
}
