use crate::source_identifier::SourceIdentifier;

/// A single timed observation about a source's query, recorded so sources
/// can be ranked by how often they're queried and clicked (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEventKind {
    Impression,
    Click,
}

#[derive(Debug, Clone)]
pub struct SourceEvent {
    pub source: SourceIdentifier,
    pub kind: SourceEventKind,
    pub at_millis: i64,
}

/// Rolled-up counters the repository maintains per source, refreshed from
/// [`SourceEvent`] rows and aged out per [`crate::SuggestionConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceStat {
    pub impressions: u32,
    pub clicks: u32,
}

impl SourceStat {
    pub fn click_through_rate(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            f64::from(self.clicks) / f64::from(self.impressions)
        }
    }

    /// Whether this source has accrued enough history to be ranked on
    /// click-through rate rather than treated as unranked/new.
    pub fn is_statistically_significant(&self, min_impressions: u32, min_clicks: u32) -> bool {
        self.impressions >= min_impressions && self.clicks >= min_clicks
    }
}

/// Summary counters for a single session, surfaced for diagnostics and for
/// the daemon's click-report gating (spec §4.8's gating discussion).
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub queries_issued: u32,
    pub suggestions_displayed: u32,
    pub clicks_reported: u32,
}
