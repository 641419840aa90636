use crate::source_identifier::SourceIdentifier;
use crate::suggestion::Suggestion;

/// A suggestion that was clicked and is now replayed from the repository
/// ahead of (or instead of) asking its source again, until it's refreshed or
/// invalidated (spec §4.4, §4.5).
#[derive(Debug, Clone)]
pub struct ShortcutRecord {
    pub shortcut_id: String,
    pub source: SourceIdentifier,
    /// The query prefix this shortcut was created under; shown again for
    /// any query this string is a prefix of.
    pub intent_key: String,
    pub suggestion: Suggestion,
    /// Whether the repository has attempted and successfully validated
    /// this shortcut against its source since it was last clicked.
    pub refreshed: bool,
    pub hit_count: u32,
    pub last_hit_millis: i64,
}

/// A record of a suggestion (or a shortcut) being clicked, used to compute
/// per-source ranking and to prune shortcuts that stop being clicked.
#[derive(Debug, Clone)]
pub struct ClickLogEntry {
    pub source: SourceIdentifier,
    pub intent_key: String,
    pub shortcut_id: Option<String>,
    pub clicked_millis: i64,
}
