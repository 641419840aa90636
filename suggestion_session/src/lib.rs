#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

//! Ties the per-query presentation state (`suggestion_backer`), fan-out
//! (`query_multiplexer`, `shortcut_refresher`) and durable storage
//! (`shortcut_store`) together into the session/cursor protocol a UI talks
//! to (spec §4.8-§4.10).

mod cursor;
mod manager;
mod session;
mod source_orderer;

pub use cursor::{ClickOutcome, Cursor, CursorObserver, PostRefreshResult, SessionCursorListener};
pub use manager::SessionManager;
pub use session::{built_in_source, ClickLogger, RegisteredSource, SlotKind, SuggestionFactories, SuggestionSession};
