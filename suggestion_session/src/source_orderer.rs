//! Decides, for one query's available sources, which get the scarce
//! promoted slots this query (spec §4.9's `orderSources`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use shortcut_store::ShortcutRepository;
use suggestion_model::{SourceIdentifier, SuggestionConfig};

use crate::session::RegisteredSource;

/// Partitions a query's available sources into promoted (round-robined
/// into the main result list) and additional (queried only once the "more"
/// row is reached), following spec §4.9's five literal steps:
///   1. Build a dictionary of enabled sources keyed by identifier in
///      insertion order.
///   2. Promotable starts with the web source, if present, removed from the
///      pool.
///   3. Then at most `numPromotedSources - 1` sources in ranking order,
///      removed from the pool as they're consumed.
///   4. Walk what's left of the pool in insertion order: each entry *not*
///      present in the ranking is emitted now, promotable iff trusted
///      (the static allow-list covering the cold-start "empty room" case),
///      additional otherwise. Entries present in the ranking are left
///      behind for step 5.
///   5. Walk the ranking order again for whatever step 3's budget didn't
///      consume: promotable iff trusted, additional otherwise.
///
/// Note step 3's budget bounds only how many *ranked* sources get an
/// automatic promoted slot — a trusted source reached in step 4 or 5 is
/// always promotable, uncapped by `numPromotedSources`. That is
/// intentional: with no ranking history at all (a fresh install), every
/// trusted source must still be promoted, or the "empty room" has nothing
/// to show (spec §9's design note on the trust allow-list).
pub struct SourceOrderer {
    repo: Arc<ShortcutRepository>,
    config: SuggestionConfig,
}

impl SourceOrderer {
    pub fn new(repo: Arc<ShortcutRepository>, config: SuggestionConfig) -> Self {
        Self { repo, config }
    }

    pub async fn order_sources(
        &self,
        available: Vec<RegisteredSource>,
        web_source: Option<&SourceIdentifier>,
    ) -> (Vec<RegisteredSource>, Vec<RegisteredSource>) {
        let ranking = self
            .repo
            .get_source_ranking(
                self.config.min_impressions_for_source_ranking,
                self.config.min_clicks_for_source_ranking,
            )
            .await
            .unwrap_or_default();
        let rank_order: Vec<SourceIdentifier> = ranking.into_iter().map(|(source, _stat)| source).collect();
        let rank_set: HashSet<&SourceIdentifier> = rank_order.iter().collect();

        // Step 1: the enabled-source dictionary, plus a separate vector
        // that remembers insertion order (a `HashMap` alone would lose it).
        let insertion_order: Vec<SourceIdentifier> =
            available.iter().map(|r| r.source.identifier().clone()).collect();
        let mut pool: HashMap<SourceIdentifier, RegisteredSource> =
            available.into_iter().map(|r| (r.source.identifier().clone(), r)).collect();

        let mut promotable = Vec::new();
        let mut additional = Vec::new();

        // Step 2.
        if let Some(web) = web_source {
            if let Some(entry) = pool.remove(web) {
                promotable.push(entry);
            }
        }

        // Step 3.
        let ranking_budget = self.config.num_promoted_sources.saturating_sub(1);
        let mut taken_from_ranking = 0;
        for id in &rank_order {
            if taken_from_ranking >= ranking_budget {
                break;
            }
            if let Some(entry) = pool.remove(id) {
                promotable.push(entry);
                taken_from_ranking += 1;
            }
        }

        // Step 4.
        for id in &insertion_order {
            if rank_set.contains(id) {
                continue;
            }
            if let Some(entry) = pool.remove(id) {
                if entry.trusted {
                    promotable.push(entry);
                } else {
                    additional.push(entry);
                }
            }
        }

        // Step 5.
        for id in &rank_order {
            if let Some(entry) = pool.remove(id) {
                if entry.trusted {
                    promotable.push(entry);
                } else {
                    additional.push(entry);
                }
            }
        }

        (promotable, additional)
    }
}
