use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use suggestion_model::{
    LaunchIntent, ShortcutRecord, SourceIdentifier, SourceStat, Suggestion, SuggestionConfig,
    SuggestionFormat, NEVER_SHORTCUT,
};
use task_executor::Executor;

use crate::error::ShortcutStoreError;
use crate::schema::{next_string, open_with_schema, SPINNER_ICON_SENTINEL};

/// What a session hands the repository at the end of a query to record an
/// impression and, if one happened, a click (spec §4.4's `reportStats`).
#[derive(Debug, Clone, Default)]
pub struct ReportedStats {
    pub query: String,
    pub clicked: Option<Suggestion>,
    pub source_impressions: Vec<SourceIdentifier>,
}

/// Durable click/impression store (spec §4.4). All blocking SQLite calls
/// are dispatched through `executor.spawn_blocking`, following the same
/// convention the query and refresh executors use to keep synchronous I/O
/// off the async runtime's worker threads.
pub struct ShortcutRepository {
    executor: Executor,
    conn: Arc<Mutex<Connection>>,
    config: SuggestionConfig,
}

impl ShortcutRepository {
    pub fn open(
        executor: Executor,
        path: &Path,
        config: SuggestionConfig,
    ) -> Result<Self, ShortcutStoreError> {
        let conn = Connection::open(path)?;
        open_with_schema(&conn, config.max_stat_age.as_millis() as i64)?;
        Ok(Self {
            executor,
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    pub fn open_in_memory(
        executor: Executor,
        config: SuggestionConfig,
    ) -> Result<Self, ShortcutStoreError> {
        let conn = Connection::open_in_memory()?;
        open_with_schema(&conn, config.max_stat_age.as_millis() as i64)?;
        Ok(Self {
            executor,
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Ranked shortcuts matching `query`'s prefix (spec §4.4's
    /// `getShortcutsForQuery`). An empty query skips the prefix
    /// restriction entirely rather than calling [`next_string`] on it,
    /// since `next_string("")` returns `""` and would wrongly bound the
    /// range to nothing (spec §9, resolved open question).
    pub async fn get_shortcuts_for_query(
        &self,
        query: &str,
    ) -> Result<Vec<ShortcutRecord>, ShortcutStoreError> {
        let conn = self.conn.clone();
        let query = query.to_string();
        let max_stat_age_millis = self.config.max_stat_age.as_millis() as i64;
        let max_shortcuts_returned = self.config.max_shortcuts_returned;
        let now = now_millis();
        self.executor
            .spawn_blocking(
                move || {
                    let conn = conn.lock();
                    fetch_shortcuts_for_query(
                        &conn,
                        &query,
                        now,
                        max_stat_age_millis,
                        max_shortcuts_returned,
                    )
                },
                |e| Err(ShortcutStoreError::TaskFailed(e.to_string())),
            )
            .await
    }

    /// Records an impression (and, if present, a click) and refreshes the
    /// derived per-source stats. Per spec §4.4's failure model, any
    /// underlying store error is caught and logged here rather than
    /// propagated.
    pub async fn report_stats(&self, stats: ReportedStats, now: i64) {
        let conn = self.conn.clone();
        let max_source_event_age_millis = self.config.max_source_event_age.as_millis() as i64;
        let result: Result<(), ShortcutStoreError> = self
            .executor
            .spawn_blocking(
                move || {
                    let mut conn = conn.lock();
                    report_stats_sync(&mut conn, &stats, now, max_source_event_age_millis)
                        .map_err(ShortcutStoreError::from)
                },
                |e| Err(ShortcutStoreError::TaskFailed(e.to_string())),
            )
            .await;
        if let Err(e) = result {
            log::error!("shortcut_store: report_stats failed: {e}");
        }
    }

    /// Sources ranked by click-through rate, restricted to those with
    /// enough history to be statistically meaningful (spec §4.4's
    /// `getSourceRanking`). The ordering expression is kept in integer
    /// arithmetic to preserve stable tie-breaking.
    pub async fn get_source_ranking(
        &self,
        min_impressions: u32,
        min_clicks: u32,
    ) -> Result<Vec<(SourceIdentifier, SourceStat)>, ShortcutStoreError> {
        let conn = self.conn.clone();
        self.executor
            .spawn_blocking(
                move || {
                    let conn = conn.lock();
                    fetch_source_ranking(&conn, min_impressions, min_clicks)
                },
                |e| Err(ShortcutStoreError::TaskFailed(e.to_string())),
            )
            .await
    }

    /// Invalidates or replaces a shortcut following a
    /// [`crate::ShortcutRepository`] refresh. `refreshed = None` deletes
    /// the shortcut (cascading to its click-log rows via the delete
    /// trigger); `Some(suggestion)` replaces its fields, relabeling
    /// click-log rows only if the suggestion's identity actually changed.
    /// Errors are caught and logged, never propagated (spec §4.4, §4.5).
    pub async fn refresh_shortcut(
        &self,
        source: &SourceIdentifier,
        shortcut_id: &str,
        refreshed: Option<Suggestion>,
    ) {
        let conn = self.conn.clone();
        let source = source.clone();
        let shortcut_id = shortcut_id.to_string();
        let result: Result<(), ShortcutStoreError> = self
            .executor
            .spawn_blocking(
                move || {
                    let mut conn = conn.lock();
                    refresh_shortcut_sync(&mut conn, &source, &shortcut_id, refreshed)
                        .map_err(ShortcutStoreError::from)
                },
                |e| Err(ShortcutStoreError::TaskFailed(e.to_string())),
            )
            .await;
        if let Err(e) = result {
            log::error!("shortcut_store: refresh_shortcut failed: {e}");
        }
    }

    /// Reclaims space left by deleted rows. Not part of the original
    /// contract; added because a long-lived SQLite file that only ever
    /// grows its page count is an obvious operational gap for a daemon
    /// expected to run indefinitely.
    pub async fn compact(&self) -> Result<(), ShortcutStoreError> {
        let conn = self.conn.clone();
        self.executor
            .spawn_blocking(
                move || conn.lock().execute_batch("VACUUM;").map_err(ShortcutStoreError::from),
                |e| Err(ShortcutStoreError::TaskFailed(e.to_string())),
            )
            .await
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the unix epoch")
        .as_millis() as i64
}

fn intent_key_for(suggestion: &Suggestion) -> String {
    format!(
        "{}\u{1}{}\u{1}{}\u{1}{}\u{1}{}",
        suggestion.source.flatten(),
        suggestion.launch.action.as_deref().unwrap_or(""),
        suggestion.launch.data_uri.as_deref().unwrap_or(""),
        suggestion.launch.query.as_deref().unwrap_or(""),
        suggestion.launch.component.as_deref().unwrap_or(""),
    )
}

fn format_to_str(format: SuggestionFormat) -> &'static str {
    match format {
        SuggestionFormat::Default => "default",
        SuggestionFormat::Quickcontact => "quickcontact",
        SuggestionFormat::Histogram => "histogram",
    }
}

fn str_to_format(s: &str) -> SuggestionFormat {
    match s {
        "quickcontact" => SuggestionFormat::Quickcontact,
        "histogram" => SuggestionFormat::Histogram,
        _ => SuggestionFormat::Default,
    }
}

fn upsert_shortcut_row(
    conn: &Connection,
    intent_key: &str,
    suggestion: &Suggestion,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO shortcuts (
            intent_key, source, format, title, description, icon1, icon2,
            action, data, query, extra_data, component_name, shortcut_id,
            spinner_while_refreshing
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(intent_key) DO UPDATE SET
            source = excluded.source,
            format = excluded.format,
            title = excluded.title,
            description = excluded.description,
            icon1 = excluded.icon1,
            icon2 = excluded.icon2,
            action = excluded.action,
            data = excluded.data,
            query = excluded.query,
            extra_data = excluded.extra_data,
            component_name = excluded.component_name,
            shortcut_id = excluded.shortcut_id,
            spinner_while_refreshing = excluded.spinner_while_refreshing",
        params![
            intent_key,
            suggestion.source.flatten(),
            format_to_str(suggestion.format),
            suggestion.title,
            suggestion.description,
            suggestion.icon1,
            suggestion.icon2,
            suggestion.launch.action,
            suggestion.launch.data_uri,
            suggestion.launch.query,
            suggestion.launch.extra_data,
            suggestion.launch.component,
            suggestion.shortcut_id,
            suggestion.spinner_while_refreshing,
        ],
    )?;
    Ok(())
}

fn report_stats_sync(
    conn: &mut Connection,
    stats: &ReportedStats,
    now: i64,
    max_source_event_age_millis: i64,
) -> rusqlite::Result<()> {
    let clicked_source = stats.clicked.as_ref().map(|s| s.source.clone());

    if let Some(clicked) = &stats.clicked {
        if clicked.shortcut_id != NEVER_SHORTCUT {
            let intent_key = intent_key_for(clicked);
            upsert_shortcut_row(conn, &intent_key, clicked)?;
            conn.execute(
                "INSERT INTO clicklog (intent_key, query, hit_time) VALUES (?1, ?2, ?3)",
                params![intent_key, stats.query, now],
            )?;
        }
    }

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO source_events (source, time, click_count, impression_count)
             VALUES (?1, ?2, ?3, 1)",
        )?;
        for source in &stats.source_impressions {
            let click_count = if Some(source) == clicked_source.as_ref() { 1 } else { 0 };
            stmt.execute(params![source.flatten(), now, click_count])?;
        }
    }
    tx.execute(
        "DELETE FROM source_events WHERE time < ?1",
        params![now - max_source_event_age_millis],
    )?;
    tx.execute("DELETE FROM source_stats", [])?;
    tx.execute(
        "INSERT INTO source_stats (source, total_clicks, total_impressions)
         SELECT source, SUM(click_count), SUM(impression_count) FROM source_events GROUP BY source",
        [],
    )?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use suggestion_model::NEVER_SHORTCUT;

    fn config() -> SuggestionConfig {
        SuggestionConfig::default()
    }

    fn repo(config: SuggestionConfig) -> ShortcutRepository {
        ShortcutRepository::open_in_memory(Executor::new(), config).unwrap()
    }

    fn suggestion(app: &str) -> Suggestion {
        let source = SourceIdentifier::new("com.example", app);
        Suggestion::builder(source, app).shortcut_id(format!("sc-{app}")).build()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn report_stats_inserts_one_click_log_row_and_one_impression_per_source() {
        let repo = repo(config());
        let clicked = suggestion("app1");
        let other_source = SourceIdentifier::new("com.example", "app2");

        repo.report_stats(
            ReportedStats {
                query: "app".to_string(),
                clicked: Some(clicked.clone()),
                source_impressions: vec![clicked.source.clone(), other_source.clone()],
            },
            1_000,
        )
        .await;

        let shortcuts = repo.get_shortcuts_for_query("app").await.unwrap();
        assert_eq!(shortcuts.len(), 1);
        assert_eq!(shortcuts[0].suggestion.shortcut_id, "sc-app1");
        assert_eq!(shortcuts[0].hit_count, 1);

        let ranking = repo.get_source_ranking(1, 1).await.unwrap();
        let clicked_stat = ranking.iter().find(|(id, _)| *id == clicked.source).unwrap();
        assert_eq!(clicked_stat.1.impressions, 1);
        assert_eq!(clicked_stat.1.clicks, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_never_shortcut_click_is_not_recorded_as_a_shortcut() {
        let repo = repo(config());
        let mut clicked = suggestion("app1");
        clicked.shortcut_id = NEVER_SHORTCUT.to_string();

        repo.report_stats(
            ReportedStats { query: "app".to_string(), clicked: Some(clicked.clone()), source_impressions: vec![clicked.source.clone()] },
            1_000,
        )
        .await;

        let shortcuts = repo.get_shortcuts_for_query("app").await.unwrap();
        assert!(shortcuts.is_empty());
    }

    // S4 — shortcut ranking by recency: the most recently clicked shortcut
    // wins the tie-break even against a shortcut with more total hits,
    // since both land well inside the same max-stat-age window.
    #[tokio::test(flavor = "multi_thread")]
    async fn shortcuts_are_ranked_by_recency_ahead_of_raw_hit_count() {
        let repo = repo(config());
        let now = now_millis();

        for _ in 0..3 {
            repo.report_stats(
                ReportedStats { query: "app".to_string(), clicked: Some(suggestion("app1")), source_impressions: vec![] },
                now - 5,
            )
            .await;
        }
        for _ in 0..2 {
            repo.report_stats(
                ReportedStats { query: "app".to_string(), clicked: Some(suggestion("app2")), source_impressions: vec![] },
                now - 2,
            )
            .await;
        }
        repo.report_stats(
            ReportedStats { query: "app".to_string(), clicked: Some(suggestion("app3")), source_impressions: vec![] },
            now - 1,
        )
        .await;

        let shortcuts = repo.get_shortcuts_for_query("app").await.unwrap();
        let ids: Vec<&str> = shortcuts.iter().map(|s| s.suggestion.shortcut_id.as_str()).collect();
        assert_eq!(ids, vec!["sc-app3", "sc-app1", "sc-app2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_source_ranking_orders_by_click_through_rate_and_respects_floors() {
        let repo = repo(config());
        let good = SourceIdentifier::new("com.example", "good");
        let poor = SourceIdentifier::new("com.example", "poor");
        let sparse = SourceIdentifier::new("com.example", "sparse");

        // `good`: 5 impressions, 4 clicks (high CTR, clears the floors).
        for i in 0..5 {
            let clicked = if i < 4 { Some(suggestion("good")) } else { None };
            repo.report_stats(ReportedStats { query: "q".to_string(), clicked, source_impressions: vec![good.clone()] }, 1_000).await;
        }
        // `poor`: 5 impressions, 1 click (clears the floors, low CTR).
        for i in 0..5 {
            let clicked = if i == 0 { Some(suggestion("poor")) } else { None };
            repo.report_stats(ReportedStats { query: "q".to_string(), clicked, source_impressions: vec![poor.clone()] }, 1_000).await;
        }
        // `sparse`: only 2 impressions, never clears the impression floor.
        for _ in 0..2 {
            repo.report_stats(ReportedStats { query: "q".to_string(), clicked: None, source_impressions: vec![sparse.clone()] }, 1_000).await;
        }

        let ranking = repo.get_source_ranking(5, 1).await.unwrap();
        let ids: Vec<&SourceIdentifier> = ranking.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![&good, &poor]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_shortcut_with_none_deletes_it_and_its_click_log() {
        let repo = repo(config());
        let clicked = suggestion("app1");
        repo.report_stats(
            ReportedStats { query: "app".to_string(), clicked: Some(clicked.clone()), source_impressions: vec![] },
            1_000,
        )
        .await;
        assert_eq!(repo.get_shortcuts_for_query("app").await.unwrap().len(), 1);

        repo.refresh_shortcut(&clicked.source, &clicked.shortcut_id, None).await;

        assert!(repo.get_shortcuts_for_query("app").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_shortcut_with_some_replaces_its_fields_in_place() {
        let repo = repo(config());
        let clicked = suggestion("app1");
        repo.report_stats(
            ReportedStats { query: "app".to_string(), clicked: Some(clicked.clone()), source_impressions: vec![] },
            1_000,
        )
        .await;

        let mut refreshed = clicked.clone();
        refreshed.description = Some("now with a description".to_string());
        repo.refresh_shortcut(&clicked.source, &clicked.shortcut_id, Some(refreshed)).await;

        let shortcuts = repo.get_shortcuts_for_query("app").await.unwrap();
        assert_eq!(shortcuts.len(), 1);
        assert_eq!(shortcuts[0].suggestion.description.as_deref(), Some("now with a description"));
        // The click log survived the in-place update.
        assert_eq!(shortcuts[0].hit_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refreshing_an_unknown_shortcut_is_a_silent_no_op() {
        let repo = repo(config());
        let source = SourceIdentifier::new("com.example", "ghost");
        repo.refresh_shortcut(&source, "does-not-exist", None).await;
        assert!(repo.get_shortcuts_for_query("").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn compact_succeeds_on_an_empty_store() {
        let repo = repo(config());
        repo.compact().await.unwrap();
    }
}

struct RawShortcutRow {
    source: String,
    format: String,
    title: String,
    description: Option<String>,
    icon1: Option<String>,
    icon2: Option<String>,
    action: Option<String>,
    data: Option<String>,
    query: Option<String>,
    extra_data: Option<String>,
    component_name: Option<String>,
    shortcut_id: String,
    spinner_while_refreshing: bool,
}

struct Group {
    intent_key: String,
    row: RawShortcutRow,
    hits: u32,
    last_hit: i64,
}

fn fetch_shortcuts_for_query(
    conn: &Connection,
    query: &str,
    now: i64,
    max_stat_age_millis: i64,
    max_shortcuts_returned: usize,
) -> Result<Vec<ShortcutRecord>, ShortcutStoreError> {
    let cutoff = now - max_stat_age_millis;
    const BASE_SQL: &str = "SELECT s.intent_key, s.source, s.format, s.title, s.description,
                                    s.icon1, s.icon2, s.action, s.data, s.query, s.extra_data,
                                    s.component_name, s.shortcut_id, s.spinner_while_refreshing,
                                    c.hit_time
                             FROM clicklog c JOIN shortcuts s ON c.intent_key = s.intent_key
                             WHERE c.hit_time >= ?1";

    let mapper = |row: &rusqlite::Row| -> rusqlite::Result<(String, RawShortcutRow, i64)> {
        Ok((
            row.get(0)?,
            RawShortcutRow {
                source: row.get(1)?,
                format: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                icon1: row.get(5)?,
                icon2: row.get(6)?,
                action: row.get(7)?,
                data: row.get(8)?,
                query: row.get(9)?,
                extra_data: row.get(10)?,
                component_name: row.get(11)?,
                shortcut_id: row.get(12)?,
                spinner_while_refreshing: row.get(13)?,
            },
            row.get(14)?,
        ))
    };

    let mut raw_rows = Vec::new();
    if query.is_empty() {
        let mut stmt = conn.prepare(BASE_SQL)?;
        for row in stmt.query_map(params![cutoff], mapper)? {
            raw_rows.push(row?);
        }
    } else {
        let upper = next_string(query);
        let sql = format!("{BASE_SQL} AND c.query >= ?2 AND c.query < ?3");
        let mut stmt = conn.prepare(&sql)?;
        for row in stmt.query_map(params![cutoff, query, upper], mapper)? {
            raw_rows.push(row?);
        }
    }

    let mut groups: HashMap<String, Group> = HashMap::new();
    for (intent_key, row, hit_time) in raw_rows {
        let group = groups.entry(intent_key.clone()).or_insert_with(|| Group {
            intent_key,
            row,
            hits: 0,
            last_hit: i64::MIN,
        });
        group.hits += 1;
        group.last_hit = group.last_hit.max(hit_time);
    }

    let max_last_hit = groups.values().map(|g| g.last_hit).max().unwrap_or(i64::MIN);
    let max_stat_age_secs = (max_stat_age_millis / 1000).max(1);

    let mut ordered: Vec<Group> = groups.into_values().collect();
    ordered.sort_by(|a, b| {
        let a_primary = i32::from(a.last_hit == max_last_hit);
        let b_primary = i32::from(b.last_hit == max_last_hit);
        let a_score = i64::from(a.hits) * (a.last_hit - cutoff) / max_stat_age_secs;
        let b_score = i64::from(b.hits) * (b.last_hit - cutoff) / max_stat_age_secs;
        (b_primary, b_score).cmp(&(a_primary, a_score))
    });
    ordered.truncate(max_shortcuts_returned);

    Ok(ordered
        .into_iter()
        .map(|group| {
            let icon2 = if group.row.spinner_while_refreshing {
                Some(SPINNER_ICON_SENTINEL.to_string())
            } else {
                group.row.icon2
            };
            let suggestion = Suggestion {
                source: SourceIdentifier::parse(&group.row.source),
                format: str_to_format(&group.row.format),
                title: group.row.title,
                description: group.row.description,
                icon1: group.row.icon1,
                icon2,
                background_color: None,
                launch: LaunchIntent {
                    action: group.row.action,
                    data_uri: group.row.data,
                    query: group.row.query,
                    extra_data: group.row.extra_data,
                    component: group.row.component_name,
                },
                shortcut_id: group.row.shortcut_id.clone(),
                pin_to_bottom: false,
                spinner_while_refreshing: group.row.spinner_while_refreshing,
            };
            ShortcutRecord {
                shortcut_id: group.row.shortcut_id,
                source: suggestion.source.clone(),
                intent_key: group.intent_key,
                suggestion,
                refreshed: false,
                hit_count: group.hits,
                last_hit_millis: group.last_hit,
            }
        })
        .collect())
}

fn fetch_source_ranking(
    conn: &Connection,
    min_impressions: u32,
    min_clicks: u32,
) -> Result<Vec<(SourceIdentifier, SourceStat)>, ShortcutStoreError> {
    let mut stmt = conn.prepare(
        "SELECT source, total_clicks, total_impressions FROM source_stats
         WHERE total_impressions >= ?1 AND total_clicks >= ?2
         ORDER BY (1000 * total_clicks) / total_impressions DESC",
    )?;
    let rows = stmt.query_map(params![min_impressions, min_clicks], |row| {
        let source: String = row.get(0)?;
        let clicks: u32 = row.get(1)?;
        let impressions: u32 = row.get(2)?;
        Ok((
            SourceIdentifier::parse(&source),
            SourceStat { impressions, clicks },
        ))
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn refresh_shortcut_sync(
    conn: &mut Connection,
    source: &SourceIdentifier,
    shortcut_id: &str,
    refreshed: Option<Suggestion>,
) -> rusqlite::Result<()> {
    let existing_intent_key: Option<String> = conn
        .query_row(
            "SELECT intent_key FROM shortcuts WHERE shortcut_id = ?1 AND source = ?2",
            params![shortcut_id, source.flatten()],
            |row| row.get(0),
        )
        .optional()?;

    let Some(old_intent_key) = existing_intent_key else {
        return Ok(());
    };

    match refreshed {
        None => {
            conn.execute("DELETE FROM shortcuts WHERE intent_key = ?1", params![old_intent_key])?;
        }
        Some(suggestion) => {
            let new_intent_key = intent_key_for(&suggestion);
            if new_intent_key != old_intent_key {
                conn.execute(
                    "UPDATE shortcuts SET intent_key = ?1 WHERE intent_key = ?2",
                    params![new_intent_key, old_intent_key],
                )?;
            }
            upsert_shortcut_row(conn, &new_intent_key, &suggestion)?;
        }
    }
    Ok(())
}
