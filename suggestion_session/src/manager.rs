//! Process-wide entry point: creates and replaces `SuggestionSession`s as the
//! user types, and is the single long-lived service object an embedder
//! constructs once (spec §4.9's `SessionManager.query`, §9's "Global process
//! state" design note — "a long-lived service object owned by the entry
//! point; no true globals").

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use shortcut_store::ShortcutRepository;
use suggestion_model::{SourceIdentifier, SuggestionConfig};
use task_executor::Executor;

use crate::cursor::Cursor;
use crate::session::{ClickLogger, RegisteredSource, SuggestionFactories, SuggestionSession};

/// Owns the one active `SuggestionSession` for a query stream, replacing it
/// whenever the user starts a fresh typing session (spec §4.9: "if no
/// current session, or if q is empty ..., create a new one; forward query to
/// it"). A single instance of this type backs the query endpoint for the
/// lifetime of the process (spec §9).
pub struct SessionManager {
    repo: Arc<ShortcutRepository>,
    executor_query: Executor,
    executor_refresh: Executor,
    config: SuggestionConfig,
    sources: Vec<RegisteredSource>,
    web_source: Option<SourceIdentifier>,
    factories: Arc<dyn SuggestionFactories>,
    click_logger: Option<Arc<dyn ClickLogger>>,
    current: Mutex<Option<Arc<SuggestionSession>>>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<ShortcutRepository>,
        executor_query: Executor,
        executor_refresh: Executor,
        config: SuggestionConfig,
        sources: Vec<RegisteredSource>,
        web_source: Option<SourceIdentifier>,
        factories: Arc<dyn SuggestionFactories>,
        click_logger: Option<Arc<dyn ClickLogger>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            repo,
            executor_query,
            executor_refresh,
            config,
            sources,
            web_source,
            factories,
            click_logger,
            current: Mutex::new(None),
        })
    }

    /// Forwards `query` to the current session, creating (and replacing) one
    /// first if there isn't one yet or `query` is empty — the user cleared
    /// the box and is beginning a new typing session (spec §4.9).
    pub async fn query(self: &Arc<Self>, query: &str) -> Arc<Cursor> {
        let session = {
            let mut current = self.current.lock();
            let need_new = current.is_none() || query.is_empty();
            if need_new {
                let session = self.spawn_session();
                *current = Some(session.clone());
                session
            } else {
                current.as_ref().expect("checked above").clone()
            }
        };
        session.query(query).await
    }

    fn spawn_session(self: &Arc<Self>) -> Arc<SuggestionSession> {
        let manager = self.clone();
        // `SuggestionSession::new` needs its close callback before the
        // `Arc<SuggestionSession>` it identifies itself with exists; stash a
        // weak handle into this slot once construction finishes so the
        // callback can tell whether it's still the live session (an earlier
        // session closing after being superseded must not clear `current`
        // out from under its successor).
        let self_weak: Arc<Mutex<Option<Weak<SuggestionSession>>>> = Arc::new(Mutex::new(None));
        let slot = self_weak.clone();

        let session = SuggestionSession::new(
            self.repo.clone(),
            self.executor_query.clone(),
            self.executor_refresh.clone(),
            self.config.clone(),
            self.sources.clone(),
            self.web_source.clone(),
            self.factories.clone(),
            self.click_logger.clone(),
            Arc::new(move || {
                let Some(closing) = slot.lock().clone() else {
                    return;
                };
                let mut current = manager.current.lock();
                let still_current = current.as_ref().is_some_and(|c| closing.as_ptr() == Arc::as_ptr(c));
                if still_current {
                    *current = None;
                }
            }),
        );
        *self_weak.lock() = Some(Arc::downgrade(&session));
        session
    }
}
