use rusqlite::Connection;

/// Bumped whenever the table layout changes incompatibly. A mismatch at
/// open drops and recreates every table — the store is purely a cache
/// (spec §4.4's failure model).
const SCHEMA_VERSION: i64 = 1;

/// Sentinel written into a shortcut's `icon2` column while it's awaiting
/// this session's `validate_shortcut` refresh (spec §4.4's shortcut-query
/// step, spec §4.6's `spinnerWhileRefreshing`).
pub const SPINNER_ICON_SENTINEL: &str = "shortcut:spinner";

pub fn open_with_schema(conn: &Connection, max_stat_age_millis: i64) -> rusqlite::Result<()> {
    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version != SCHEMA_VERSION {
        if user_version != 0 {
            log::warn!(
                "shortcut_store: schema version {user_version} != {SCHEMA_VERSION}, dropping and recreating all tables"
            );
        }
        drop_all(conn)?;
        create_all(conn, max_stat_age_millis)?;
        conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
    }
    Ok(())
}

fn drop_all(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS clicklog;
         DROP TABLE IF EXISTS shortcuts;
         DROP TABLE IF EXISTS source_events;
         DROP TABLE IF EXISTS source_stats;",
    )
}

fn create_all(conn: &Connection, max_stat_age_millis: i64) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE shortcuts (
            intent_key                 TEXT PRIMARY KEY,
            source                     TEXT NOT NULL,
            format                     TEXT NOT NULL,
            title                      TEXT NOT NULL,
            description                TEXT,
            icon1                      TEXT,
            icon2                      TEXT,
            action                     TEXT,
            data                       TEXT,
            query                      TEXT,
            extra_data                 TEXT,
            component_name             TEXT,
            shortcut_id                TEXT NOT NULL,
            spinner_while_refreshing   INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX idx_shortcuts_shortcut_source ON shortcuts(shortcut_id, source);

         CREATE TABLE clicklog (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            intent_key  TEXT NOT NULL REFERENCES shortcuts(intent_key),
            query       TEXT NOT NULL,
            hit_time    INTEGER NOT NULL
         );
         CREATE INDEX idx_clicklog_query ON clicklog(query);
         CREATE INDEX idx_clicklog_hit_time ON clicklog(hit_time);

         CREATE TABLE source_events (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            source            TEXT NOT NULL,
            time              INTEGER NOT NULL,
            click_count       INTEGER NOT NULL,
            impression_count  INTEGER NOT NULL
         );

         CREATE TABLE source_stats (
            source             TEXT PRIMARY KEY,
            total_clicks       INTEGER NOT NULL,
            total_impressions  INTEGER NOT NULL
         );",
    )?;

    // Cascade-delete and relabel triggers (spec §4.4's maintenance rules).
    // The prune on insert is baked in here because SQLite triggers can't
    // take a parameter at fire time; the batch prune+rebuild of
    // source_stats after writing source_events is instead run explicitly
    // from Rust, since it isn't a per-row operation.
    conn.execute_batch(&format!(
        "CREATE TRIGGER trg_clicklog_prune AFTER INSERT ON clicklog
         BEGIN
            DELETE FROM clicklog WHERE hit_time < NEW.hit_time - {max_stat_age_millis};
         END;

         CREATE TRIGGER trg_shortcut_delete_cascade AFTER DELETE ON shortcuts
         BEGIN
            DELETE FROM clicklog WHERE intent_key = OLD.intent_key;
         END;

         CREATE TRIGGER trg_shortcut_relabel AFTER UPDATE OF intent_key ON shortcuts
         BEGIN
            UPDATE clicklog SET intent_key = NEW.intent_key WHERE intent_key = OLD.intent_key;
         END;"
    ))
}

/// Returns the lexicographically least string of which `s` is not a
/// prefix, by incrementing `s`'s last Unicode scalar value (carrying into
/// the previous one on overflow). Used to turn a prefix match into a
/// `[s, next_string(s))` byte-range lookup (spec §4.4, §8).
///
/// Callers must guard the empty-string case themselves: `next_string("")`
/// returns `""`, which does not bound any useful range (spec §9's resolved
/// open question; see the repository's query path).
pub fn next_string(s: &str) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(incremented) = increment_scalar(last) {
            chars.push(incremented);
            return chars.into_iter().collect();
        }
        // This scalar was already maximal; drop it and carry into the
        // previous one.
    }
    String::new()
}

fn increment_scalar(c: char) -> Option<char> {
    let next = (c as u32).checked_add(1)?;
    // Skip the surrogate range, which is not a valid scalar value.
    let next = if (0xD800..=0xDFFF).contains(&next) {
        0xE000
    } else {
        next
    };
    char::from_u32(next)
}
