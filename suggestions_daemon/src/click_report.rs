//! The click-report endpoint (spec §6): a path into `ShortcutRepository`
//! independent of a live `Cursor`, for a UI that relaunches a previously
//! shortcutted suggestion without having an open query session. Gated by the
//! current source ranking so a suggestion surfaced from a source that has
//! since fallen out of the promoted set cannot be shortcutted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use shortcut_store::{ReportedStats, ShortcutRepository, ShortcutStoreError};
use suggestion_model::{Suggestion, SuggestionConfig};

#[async_trait]
pub trait ClickReportSink: Send + Sync {
    async fn report_click(&self, query: String, clicked: Suggestion);
}

pub struct GatedClickReportSink {
    repo: Arc<ShortcutRepository>,
    config: SuggestionConfig,
}

impl GatedClickReportSink {
    pub fn new(repo: Arc<ShortcutRepository>, config: SuggestionConfig) -> Self {
        Self { repo, config }
    }

    async fn is_promoted(&self, source: &suggestion_model::SourceIdentifier) -> Result<bool, ShortcutStoreError> {
        let ranking = self
            .repo
            .get_source_ranking(self.config.min_impressions_for_source_ranking, self.config.min_clicks_for_source_ranking)
            .await?;
        let promoted: HashSet<_> = ranking.into_iter().take(self.config.num_promoted_sources).map(|(id, _)| id).collect();
        Ok(promoted.contains(source))
    }
}

#[async_trait]
impl ClickReportSink for GatedClickReportSink {
    async fn report_click(&self, query: String, clicked: Suggestion) {
        let promoted = match self.is_promoted(&clicked.source).await {
            Ok(promoted) => promoted,
            Err(e) => {
                log::error!("suggestions_daemon: click-report ranking lookup failed: {e}");
                return;
            }
        };
        if !promoted {
            log::debug!(
                "suggestions_daemon: dropping click report for {:?}: not in the top {} ranked sources",
                clicked.source,
                self.config.num_promoted_sources
            );
            return;
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before the unix epoch").as_millis() as i64;
        self.repo
            .report_stats(ReportedStats { query, clicked: Some(clicked), source_impressions: Vec::new() }, now)
            .await;
    }
}
