#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

//! Process entry point: wires the query-fanout pool, the shortcut-refresh
//! pool, the durable shortcut store and a small set of demo sources into a
//! `SessionManager`, then drives it from stdin so the wiring can be
//! exercised locally (spec §5, §6).

mod click_report;

use std::io::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

use shortcut_store::ShortcutRepository;
use suggestion_model::{Suggestion, SuggestionConfig};
use suggestion_session::{built_in_source, ClickLogger, RegisteredSource, SessionManager, SlotKind, SuggestionFactories};
use suggestion_source::testing::FixedSource;
use task_executor::Executor;
use tokio::io::{AsyncBufReadExt, BufReader};

use click_report::{ClickReportSink, GatedClickReportSink};

/// Builds `goToWebsite`/`searchTheWeb` rows the way the embedding UI would
/// (spec §4.8 step 4); this demo build just recognizes anything that looks
/// like it has a dot in it as "navigable".
struct DemoFactories;

impl SuggestionFactories for DemoFactories {
    fn go_to_website(&self, query: &str) -> Option<Suggestion> {
        if query.contains('.') {
            Some(Suggestion::builder(built_in_source(), format!("Go to {query}")).never_shortcut().build())
        } else {
            None
        }
    }

    fn search_the_web(&self, query: &str) -> Option<Suggestion> {
        if query.is_empty() {
            None
        } else {
            Some(Suggestion::builder(built_in_source(), format!("Search the web for {query}")).never_shortcut().build())
        }
    }
}

struct LoggingClickLogger;

impl ClickLogger for LoggingClickLogger {
    fn log_click(&self, source: &suggestion_model::SourceIdentifier, slot: SlotKind, position: usize) {
        log::info!("click logged: source={source:?} slot={slot:?} position={position}");
    }
}

fn main() {
    env_logger::init();

    let config = SuggestionConfig::default();
    let executor_query = Executor::new_owned(config.query_thread_core_pool, config.query_thread_max_pool)
        .expect("failed to start the query executor");
    let executor_refresh = Executor::new_owned(config.shortcut_refresh_core_pool, config.shortcut_refresh_core_pool)
        .expect("failed to start the shortcut-refresh executor");

    executor_query.handle().clone().block_on(run(config, executor_query.clone(), executor_refresh));
}

async fn run(config: SuggestionConfig, executor_query: Executor, executor_refresh: Executor) {
    let repo = Arc::new(
        ShortcutRepository::open_in_memory(executor_refresh.clone(), config.clone()).expect("failed to open the shortcut store"),
    );

    let sources = vec![
        RegisteredSource {
            source: Arc::new(FixedSource::new(
                suggestion_model::SourceIdentifier::new("com.example.contacts", "ContactsProvider"),
                vec!["Alice", "Alicia", "Alison"],
            )),
            is_web: false,
            trusted: true,
            min_query_length: 1,
        },
        RegisteredSource {
            source: Arc::new(FixedSource::new(
                suggestion_model::SourceIdentifier::new("com.example.apps", "AppsProvider"),
                vec!["Alarm Clock", "Albums"],
            )),
            is_web: false,
            trusted: false,
            min_query_length: 1,
        },
    ];

    let manager = SessionManager::new(
        repo.clone(),
        executor_query,
        executor_refresh,
        config.clone(),
        sources,
        None,
        Arc::new(DemoFactories),
        Some(Arc::new(LoggingClickLogger)),
    );
    let click_sink: Arc<dyn ClickReportSink> = Arc::new(GatedClickReportSink::new(repo, config));

    println!("suggestions_daemon: type a query and press enter (empty line starts a new session, Ctrl-D exits)");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        print!("> ");
        io::stdout().flush().ok();
        let Ok(Some(line)) = lines.next_line().await else { break };
        let cursor = manager.query(&line).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = cursor.snapshot();
        for (i, row) in snapshot.rows.iter().enumerate() {
            println!("  [{i}] {row:?}");
        }
        if let Some(first) = snapshot.rows.first() {
            if let suggestion_backer::SnapshotRow::Suggestion(s) = first {
                click_sink.report_click(line.clone(), s.clone()).await;
            }
        }
        cursor.close();
    }
}
