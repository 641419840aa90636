use crate::source_identifier::SourceIdentifier;
use crate::suggestion::Suggestion;

/// Outcome of a single source's query, mirroring the three ways a source
/// can finish (spec §3: `SuggestionResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionStatus {
    Ok,
    Error,
    Canceled,
}

/// What a [`crate::SuggestionSource`] handed back for a single query,
/// including enough bookkeeping for the backer to decide whether to ask for
/// more and for stats to be recorded against the source.
#[derive(Debug, Clone)]
pub struct SuggestionResult {
    pub source: SourceIdentifier,
    pub status: SuggestionStatus,
    pub suggestions: Vec<Suggestion>,
    /// Total suggestions available, if known and larger than what's
    /// included here (the source is willing to supply more on request).
    pub count: Option<u32>,
    /// Echo of the cap this result was produced under, so callers can tell
    /// a source-initiated truncation from one enforced upstream.
    pub query_limit: u32,
}

impl SuggestionResult {
    pub fn ok(source: SourceIdentifier, suggestions: Vec<Suggestion>, query_limit: u32) -> Self {
        Self {
            source,
            status: SuggestionStatus::Ok,
            suggestions,
            count: None,
            query_limit,
        }
    }

    pub fn error(source: SourceIdentifier, query_limit: u32) -> Self {
        Self {
            source,
            status: SuggestionStatus::Error,
            suggestions: Vec::new(),
            count: None,
            query_limit,
        }
    }

    pub fn canceled(source: SourceIdentifier, query_limit: u32) -> Self {
        Self {
            source,
            status: SuggestionStatus::Canceled,
            suggestions: Vec::new(),
            count: None,
            query_limit,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn has_more(&self) -> bool {
        match self.count {
            Some(count) => (count as usize) > self.suggestions.len(),
            None => false,
        }
    }
}
