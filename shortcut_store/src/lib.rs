#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

//! Durable click/impression store and shortcut ranking (spec §4.4):
//! `ShortcutRepository` is the single-writer, SQLite-backed persistence
//! layer every `SuggestionSession` shares.

mod error;
mod repository;
mod schema;

pub use error::ShortcutStoreError;
pub use repository::{ReportedStats, ShortcutRepository};
