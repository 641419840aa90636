#![deny(warnings)]
#![deny(clippy::all)]

//! The capability every suggestion source implements: answer a query, and
//! say whether a previously clicked shortcut is still valid (spec §4).

use async_trait::async_trait;
use suggestion_model::{ShortcutRecord, SourceIdentifier, Suggestion, SuggestionResult};

/// Why a source failed to answer, distinguished so callers can tell an
/// outright failure from a timeout enforced against the source's own will
/// from a query this session canceled out from under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    Failed(String),
    TimedOut,
    Canceled,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Failed(reason) => write!(f, "source failed: {reason}"),
            SourceError::TimedOut => write!(f, "source timed out"),
            SourceError::Canceled => write!(f, "query canceled"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A pluggable origin of suggestions. Implementations are expected to be
/// cheap to clone (an `Arc`-wrapped handle to whatever backs the source) and
/// safe to query concurrently up to the per-source concurrency limit the
/// caller enforces; the trait itself assumes nothing about threading beyond
/// `Send + Sync`.
#[async_trait]
pub trait SuggestionSource: Send + Sync {
    /// This source's stable identity.
    fn identifier(&self) -> &SourceIdentifier;

    /// Whether this source should still be asked after it has already
    /// returned zero results for a shorter prefix of the current query.
    /// Most sources are prefix-monotonic and can say `false` here to save a
    /// round trip; a source whose results don't vary monotonically with
    /// prefix length (e.g. fuzzy/web search) should say `true`.
    fn query_after_zero_results(&self) -> bool {
        false
    }

    /// Answer `query`, returning at most `max_results` suggestions.
    /// `query_limit` is the advisory cap the caller configured for this
    /// source independently of `max_results`; a source that itself caps its
    /// result count (e.g. against a remote API's page size) is expected to
    /// echo whichever of the two binds tighter back in
    /// `SuggestionResult.query_limit` (spec §3, §4.3 step 1).
    async fn query(
        &self,
        query: &str,
        max_results: usize,
        query_limit: u32,
    ) -> Result<SuggestionResult, SourceError>;

    /// Re-validate a shortcut this source previously produced. Returns
    /// `Ok(Some(suggestion))` with a refreshed suggestion if the shortcut is
    /// still valid (the suggestion's fields may have changed), `Ok(None)` if
    /// the shortcut should be dropped, or `Err` if validation couldn't be
    /// completed this time (the shortcut is left intact to retry later).
    async fn validate_shortcut(
        &self,
        shortcut: &ShortcutRecord,
    ) -> Result<Option<Suggestion>, SourceError>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! Stub sources for exercising the aggregator pipeline in tests,
    //! mirroring the kind of mock sources a test suite uses to stand in for
    //! real, I/O-bound suggestion providers.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use suggestion_model::SuggestionFormat;

    /// Answers immediately with a fixed, caller-provided set of titles.
    pub struct FixedSource {
        identifier: SourceIdentifier,
        titles: Vec<String>,
        pub query_count: Arc<AtomicUsize>,
    }

    impl FixedSource {
        pub fn new(identifier: SourceIdentifier, titles: Vec<&str>) -> Self {
            Self {
                identifier,
                titles: titles.into_iter().map(str::to_string).collect(),
                query_count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SuggestionSource for FixedSource {
        fn identifier(&self) -> &SourceIdentifier {
            &self.identifier
        }

        async fn query(
            &self,
            _query: &str,
            max_results: usize,
            query_limit: u32,
        ) -> Result<SuggestionResult, SourceError> {
            self.query_count.fetch_add(1, Ordering::SeqCst);
            let suggestions = self
                .titles
                .iter()
                .take(max_results)
                .map(|title| {
                    Suggestion::builder(self.identifier.clone(), title.clone())
                        .format(SuggestionFormat::Default)
                        .build()
                })
                .collect();
            Ok(SuggestionResult::ok(self.identifier.clone(), suggestions, query_limit))
        }

        async fn validate_shortcut(
            &self,
            shortcut: &ShortcutRecord,
        ) -> Result<Option<Suggestion>, SourceError> {
            Ok(Some(shortcut.suggestion.clone()))
        }
    }

    /// Sleeps for a fixed duration before answering, for exercising
    /// timeout and deadline behavior upstream.
    pub struct SlowSource {
        identifier: SourceIdentifier,
        delay: Duration,
    }

    impl SlowSource {
        pub fn new(identifier: SourceIdentifier, delay: Duration) -> Self {
            Self { identifier, delay }
        }
    }

    #[async_trait]
    impl SuggestionSource for SlowSource {
        fn identifier(&self) -> &SourceIdentifier {
            &self.identifier
        }

        async fn query(
            &self,
            _query: &str,
            _max_results: usize,
            query_limit: u32,
        ) -> Result<SuggestionResult, SourceError> {
            tokio::time::sleep(self.delay).await;
            Ok(SuggestionResult::ok(self.identifier.clone(), Vec::new(), query_limit))
        }

        async fn validate_shortcut(
            &self,
            _shortcut: &ShortcutRecord,
        ) -> Result<Option<Suggestion>, SourceError> {
            tokio::time::sleep(self.delay).await;
            Ok(None)
        }
    }

    /// Always errors, for exercising the backer's/multiplexer's error path.
    pub struct FailingSource {
        identifier: SourceIdentifier,
    }

    impl FailingSource {
        pub fn new(identifier: SourceIdentifier) -> Self {
            Self { identifier }
        }
    }

    #[async_trait]
    impl SuggestionSource for FailingSource {
        fn identifier(&self) -> &SourceIdentifier {
            &self.identifier
        }

        async fn query(
            &self,
            _query: &str,
            _max_results: usize,
            _query_limit: u32,
        ) -> Result<SuggestionResult, SourceError> {
            Err(SourceError::Failed("stub source always fails".to_string()))
        }

        async fn validate_shortcut(
            &self,
            _shortcut: &ShortcutRecord,
        ) -> Result<Option<Suggestion>, SourceError> {
            Err(SourceError::Failed("stub source always fails".to_string()))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::testing::FixedSource;
    use super::SuggestionSource;
    use suggestion_model::SourceIdentifier;

    #[tokio::test]
    async fn fixed_source_respects_limit() {
        let identifier = SourceIdentifier::new("pkg", "Fixed");
        let source = FixedSource::new(identifier, vec!["a", "b", "c"]);
        let result = source.query("q", 2, 2).await.unwrap();
        assert_eq!(result.suggestions.len(), 2);
    }
}
